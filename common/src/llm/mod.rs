pub mod gemini;
pub mod model;
pub mod scripted;

pub use gemini::GeminiOracle;
pub use model::{complete_with_timeout, Message, MessageRole, Oracle};
pub use scripted::{ScriptedOracle, ScriptedReply};
