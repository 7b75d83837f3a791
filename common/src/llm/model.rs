use crate::error::{AgentError, Result};
use async_trait::async_trait;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// text generation capability behind the agent; every reply is untrusted
#[async_trait]
pub trait Oracle: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, messages: &[Message]) -> Result<String>;
}

/// `Oracle::complete` bounded by `limit`; expiry is reported as `AgentError::Timeout`
#[tracing::instrument(skip(oracle, messages), fields(oracle = oracle.name(), message_count = messages.len()))]
pub async fn complete_with_timeout(
    oracle: &dyn Oracle,
    messages: &[Message],
    limit: Duration,
) -> Result<String> {
    match tokio::time::timeout(limit, oracle.complete(messages)).await {
        Ok(Ok(output)) => {
            tracing::debug!("oracle returned {} chars", output.len());
            Ok(output)
        }
        Ok(Err(e)) => Err(e),
        Err(_) => Err(AgentError::timeout("oracle call", limit)),
    }
}
