use crate::agent::columns::{ColumnExtractor, ColumnSelection, PatternColumnExtractor};
use crate::schema::SchemaDescription;
use crate::store::{store_error_message, SqliteStore};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// feedback text when every check came back clean
pub const ALL_CLEAR: &str = "All validations passed";

static LIMIT_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bLIMIT\b").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Pending,
    Passed,
    Failed,
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationStatus::Pending => write!(f, "pending"),
            ValidationStatus::Passed => write!(f, "passed"),
            ValidationStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationIssue {
    ParseFailure { reason: String },
    SchemaViolation { invalid: Vec<String>, valid: Vec<String> },
    RuntimeFailure { message: String },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::ParseFailure { reason } => write!(f, "{}", reason),
            ValidationIssue::SchemaViolation { invalid, valid } => write!(
                f,
                "Invalid columns: {}. Valid: {}",
                invalid.join(", "),
                valid.join(", ")
            ),
            ValidationIssue::RuntimeFailure { message } => write!(f, "SQL error: {}", message),
        }
    }
}

/// result of one validation pass; never merged with earlier passes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationOutcome {
    pub status: ValidationStatus,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationOutcome {
    fn from_issues(issues: Vec<ValidationIssue>) -> Self {
        let status = if issues.is_empty() {
            ValidationStatus::Passed
        } else {
            ValidationStatus::Failed
        };
        Self { status, issues }
    }

    pub fn passed(&self) -> bool {
        self.status == ValidationStatus::Passed
    }

    /// issues joined in check order, or the all-clear text
    pub fn feedback(&self) -> String {
        if self.issues.is_empty() {
            return ALL_CLEAR.to_string();
        }
        self.issues
            .iter()
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(" | ")
    }
}

/// caps a dry-run query at `limit` rows unless it already has a LIMIT.
/// the cap goes on its own line so a trailing `--` comment cannot swallow it
pub fn with_row_cap(query: &str, limit: usize) -> String {
    let query = query.trim().trim_end_matches(';').trim_end();
    if LIMIT_REGEX.is_match(query) {
        query.to_string()
    } else {
        format!("{}\nLIMIT {}", query, limit)
    }
}

pub struct QueryValidator {
    schema: Arc<SchemaDescription>,
    store: SqliteStore,
    extractor: Box<dyn ColumnExtractor>,
    dry_run_limit: usize,
}

impl QueryValidator {
    pub fn new(schema: Arc<SchemaDescription>, store: SqliteStore, dry_run_limit: usize) -> Self {
        Self {
            schema,
            store,
            extractor: Box::new(PatternColumnExtractor),
            dry_run_limit,
        }
    }

    pub fn with_extractor(mut self, extractor: impl ColumnExtractor + 'static) -> Self {
        self.extractor = Box::new(extractor);
        self
    }

    /// parse and column checks; at most one issue
    pub fn check_columns(&self, query: &str) -> Option<ValidationIssue> {
        let selection = match self.extractor.extract_columns(query) {
            Ok(selection) => selection,
            Err(e) => {
                return Some(ValidationIssue::ParseFailure {
                    reason: e.to_string(),
                })
            }
        };

        let referenced = match selection {
            ColumnSelection::Wildcard => {
                tracing::debug!("extracted columns: * (all columns)");
                return None;
            }
            ColumnSelection::Columns(columns) => columns,
        };
        tracing::debug!(columns = ?referenced, "extracted columns");

        let invalid: Vec<String> = referenced
            .into_iter()
            .filter(|c| !self.schema.contains(c))
            .collect();

        if invalid.is_empty() {
            return None;
        }

        Some(ValidationIssue::SchemaViolation {
            invalid,
            valid: self
                .schema
                .column_names()
                .into_iter()
                .map(String::from)
                .collect(),
        })
    }

    /// bounded read-only probe against the real data
    pub async fn dry_run(&self, query: &str) -> Option<ValidationIssue> {
        let probe = with_row_cap(query, self.dry_run_limit);

        match self.store.fetch(&probe).await {
            Ok(rows) => {
                tracing::debug!(sample_rows = rows.rows.len(), "dry run succeeded");
                None
            }
            Err(e) => Some(ValidationIssue::RuntimeFailure {
                message: store_error_message(&e),
            }),
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn validate(&self, query: &str) -> ValidationOutcome {
        let mut issues = Vec::new();

        if let Some(issue) = self.check_columns(query) {
            issues.push(issue);
        }

        // runs even when the column check failed: the engine's message is the best repair hint
        if let Some(issue) = self.dry_run(query).await {
            issues.push(issue);
        }

        let outcome = ValidationOutcome::from_issues(issues);
        if outcome.passed() {
            tracing::info!("validation passed");
        } else {
            tracing::warn!(feedback = %outcome.feedback(), "validation failed");
        }
        outcome
    }
}
