use crate::error::{AgentError, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_DATABASE_PATH: &str = "data/desserts.db";
pub const DEFAULT_TABLE: &str = "indian_desserts";
pub const DEFAULT_MAX_ITERATIONS: usize = 5;
pub const DEFAULT_DRY_RUN_LIMIT: usize = 5;
pub const DEFAULT_RETRIEVAL_LIMIT: usize = 5;
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
const DEFAULT_ORACLE_TIMEOUT_SECS: u64 = 60;
const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 10;
const DEFAULT_DOMAINS: [&str; 2] = ["Food", "Desserts"];

/// settings for the text-to-query oracle
#[derive(Debug, Clone)]
pub struct OracleSettings {
    pub model: String,
    pub api_key: Option<String>,
    pub temperature: f32,
}

impl Default for OracleSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            temperature: 0.0,
        }
    }
}

/// everything one agent needs, built once and handed to `AgentLoop::new`
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub database_path: PathBuf,
    /// metadata document; when absent the schema is read from the store
    pub schema_path: Option<PathBuf>,
    pub table: String,
    /// generation attempts before execution is forced
    pub max_iterations: usize,
    pub dry_run_limit: usize,
    pub oracle_timeout: Duration,
    pub query_timeout: Duration,
    pub use_retrieval: bool,
    pub retrieval_limit: usize,
    /// domains assumed when intent analysis fails
    pub default_domains: Vec<String>,
    pub oracle: OracleSettings,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from(DEFAULT_DATABASE_PATH),
            schema_path: None,
            table: DEFAULT_TABLE.to_string(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            dry_run_limit: DEFAULT_DRY_RUN_LIMIT,
            oracle_timeout: Duration::from_secs(DEFAULT_ORACLE_TIMEOUT_SECS),
            query_timeout: Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS),
            use_retrieval: false,
            retrieval_limit: DEFAULT_RETRIEVAL_LIMIT,
            default_domains: DEFAULT_DOMAINS.iter().map(|d| d.to_string()).collect(),
            oracle: OracleSettings::default(),
        }
    }
}

impl AgentConfig {
    /// defaults overridden by `SQLAGENT_*` variables and `GEMINI_API_KEY`
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = env_value("SQLAGENT_DATABASE") {
            config.database_path = PathBuf::from(path);
        }
        if let Some(path) = env_value("SQLAGENT_SCHEMA") {
            config.schema_path = Some(PathBuf::from(path));
        }
        if let Some(table) = env_value("SQLAGENT_TABLE") {
            config.table = table;
        }
        if let Some(n) = env_parsed("SQLAGENT_MAX_ITERATIONS")? {
            config.max_iterations = n;
        }
        if let Some(n) = env_parsed("SQLAGENT_DRY_RUN_LIMIT")? {
            config.dry_run_limit = n;
        }
        if let Some(secs) = env_parsed("SQLAGENT_ORACLE_TIMEOUT_SECS")? {
            config.oracle_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parsed("SQLAGENT_QUERY_TIMEOUT_SECS")? {
            config.query_timeout = Duration::from_secs(secs);
        }
        if let Some(flag) = env_value("SQLAGENT_USE_RETRIEVAL") {
            config.use_retrieval = parse_flag(&flag);
        }
        if let Some(model) = env_value("SQLAGENT_MODEL") {
            config.oracle.model = model;
        }
        config.oracle.api_key = env_value("GEMINI_API_KEY");

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(AgentError::Config(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        if self.dry_run_limit == 0 {
            return Err(AgentError::Config(
                "dry_run_limit must be at least 1".to_string(),
            ));
        }
        if self.oracle_timeout.is_zero() || self.query_timeout.is_zero() {
            return Err(AgentError::Config(
                "timeouts must be greater than zero".to_string(),
            ));
        }
        if self.table.trim().is_empty() {
            return Err(AgentError::Config("table name is empty".to_string()));
        }
        Ok(())
    }
}

fn env_value(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.trim().is_empty())
}

fn env_parsed<T: FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match env_value(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| AgentError::Config(format!("{}={:?}: {}", key, raw, e))),
        None => Ok(None),
    }
}

pub(crate) fn parse_flag(value: &str) -> bool {
    let v = value.to_lowercase();
    v == "1" || v == "true" || v == "yes"
}
