pub mod error;
pub mod config;
pub mod schema;
pub mod llm;
pub mod store;
pub mod agent;
pub mod telemetry;

pub use agent::{AgentLoop, SessionReport};
pub use config::AgentConfig;
pub use error::{AgentError, Result};
