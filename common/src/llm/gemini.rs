//! Google Gemini client for the Generative Language REST API.

use crate::config::OracleSettings;
use crate::error::{AgentError, Result};
use crate::llm::model::{Message, MessageRole, Oracle};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: Option<u32>,
    #[serde(default)]
    candidates_token_count: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct GeminiOracle {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
    temperature: f32,
}

impl GeminiOracle {
    /// `timeout` bounds the http exchange; the agent applies its own limit on top
    pub fn new(settings: &OracleSettings, timeout: Duration) -> Result<Self> {
        let api_key = settings
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| AgentError::Config("GEMINI_API_KEY is not set".to_string()))?;

        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: settings.model.clone(),
            api_key,
            temperature: settings.temperature,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }

    fn build_request(&self, messages: &[Message]) -> GenerateRequest {
        let system: Vec<Part> = messages
            .iter()
            .filter(|m| m.role == MessageRole::System)
            .map(|m| Part {
                text: m.content.clone(),
            })
            .collect();

        let contents = messages
            .iter()
            .filter(|m| m.role != MessageRole::System)
            .map(|m| Content {
                role: Some(
                    match m.role {
                        MessageRole::Assistant => "model",
                        _ => "user",
                    }
                    .to_string(),
                ),
                parts: vec![Part {
                    text: m.content.clone(),
                }],
            })
            .collect();

        GenerateRequest {
            system_instruction: (!system.is_empty()).then(|| Content {
                role: None,
                parts: system,
            }),
            contents,
            generation_config: GenerationConfig {
                temperature: self.temperature,
            },
        }
    }
}

fn extract_text(response: GenerateResponse) -> Result<String> {
    if let Some(usage) = &response.usage_metadata {
        tracing::debug!(
            prompt_tokens = ?usage.prompt_token_count,
            response_tokens = ?usage.candidates_token_count,
            "gemini usage"
        );
    }

    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| AgentError::Oracle("no candidates in response".to_string()))?;

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(AgentError::Oracle(format!(
            "empty candidate (finish reason: {})",
            candidate.finish_reason.as_deref().unwrap_or("unknown")
        )));
    }

    Ok(text)
}

#[async_trait]
impl Oracle for GeminiOracle {
    fn name(&self) -> &str {
        &self.model
    }

    #[tracing::instrument(skip(self, messages), fields(model = %self.model))]
    async fn complete(&self, messages: &[Message]) -> Result<String> {
        let url = self.endpoint();
        let body = self.build_request(messages);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            tracing::error!("gemini api error: {} - {}", status, text);
            return Err(AgentError::Oracle(format!("http {}: {}", status, text)));
        }

        let parsed: GenerateResponse = serde_json::from_str(&text)
            .map_err(|e| AgentError::Oracle(format!("unparseable response: {}", e)))?;

        extract_text(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oracle() -> GeminiOracle {
        let settings = OracleSettings {
            api_key: Some("test-key".to_string()),
            ..OracleSettings::default()
        };
        GeminiOracle::new(&settings, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_new_requires_api_key() {
        let result = GeminiOracle::new(&OracleSettings::default(), Duration::from_secs(5));
        assert!(matches!(result, Err(AgentError::Config(_))));
    }

    #[test]
    fn test_build_request_splits_system_instruction() {
        let request = oracle().build_request(&[
            Message::system("you write sql"),
            Message::user("desserts please"),
            Message::assistant("SELECT 1"),
        ]);

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["systemInstruction"]["parts"][0]["text"], "you write sql");
        assert_eq!(value["contents"][0]["role"], "user");
        assert_eq!(value["contents"][1]["role"], "model");
        assert_eq!(value["generationConfig"]["temperature"], 0.0);
    }

    #[test]
    fn test_endpoint_follows_base_url() {
        assert_eq!(
            oracle().endpoint(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:generateContent"
        );

        let local = oracle().with_base_url("http://127.0.0.1:8089/v1beta/models/");
        assert_eq!(
            local.endpoint(),
            "http://127.0.0.1:8089/v1beta/models/gemini-2.5-flash:generateContent"
        );
    }

    #[test]
    fn test_extract_text_joins_parts() {
        let response: GenerateResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"SELECT "},{"text":"name"}]},"finishReason":"STOP"}]}"#,
        )
        .unwrap();

        assert_eq!(extract_text(response).unwrap(), "SELECT name");
    }

    #[test]
    fn test_extract_text_rejects_empty() {
        let response: GenerateResponse =
            serde_json::from_str(r#"{"candidates":[{"finishReason":"SAFETY"}]}"#).unwrap();
        let err = extract_text(response).unwrap_err();
        assert!(err.to_string().contains("SAFETY"));

        let none: GenerateResponse = serde_json::from_str("{}").unwrap();
        assert!(extract_text(none).is_err());
    }
}
