pub mod columns;
pub mod executor;
pub mod intent;
pub mod prompt;
pub mod sanitizer;
pub mod state;
pub mod validator;

pub use columns::{ColumnExtractor, ColumnSelection, PatternColumnExtractor};
pub use executor::{AgentLoop, SessionReport};
pub use intent::{analyze_intent, QueryIntent};
pub use sanitizer::sanitize_query;
pub use state::{Event, SessionState, Stage};
pub use validator::{QueryValidator, ValidationIssue, ValidationOutcome, ValidationStatus};
