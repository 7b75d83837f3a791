use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("oracle error: {0}")]
    Oracle(String),

    #[error("schema error: {0}")]
    Schema(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{operation} timed out after {seconds:.1}s")]
    Timeout { operation: &'static str, seconds: f64 },

    #[error("invalid transition: event {event} in stage {stage}")]
    InvalidTransition { stage: String, event: String },

    #[error("tracing initialization failed: {0}")]
    Telemetry(String),
}

impl AgentError {
    pub fn timeout(operation: &'static str, limit: std::time::Duration) -> Self {
        AgentError::Timeout {
            operation,
            seconds: limit.as_secs_f64(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
