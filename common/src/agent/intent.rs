use crate::agent::prompt::{build_intent_prompt, INTENT_SYSTEM_PROMPT};
use crate::error::{AgentError, Result};
use crate::llm::{complete_with_timeout, Message, Oracle};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// search terms the oracle pulled out of a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryIntent {
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub domains: Vec<String>,
}

impl QueryIntent {
    /// raw request words, used whenever the oracle cannot be trusted to answer
    pub fn fallback(request: &str, default_domains: &[String]) -> Self {
        Self {
            keywords: request
                .to_lowercase()
                .split_whitespace()
                .map(String::from)
                .collect(),
            domains: default_domains.to_vec(),
        }
    }

    pub fn search_terms(&self) -> Vec<String> {
        self.keywords
            .iter()
            .chain(self.domains.iter())
            .cloned()
            .collect()
    }
}

/// parse the oracle's json reply, tolerating fences or chatter around the object
pub fn parse_intent(text: &str) -> Result<QueryIntent> {
    let start = text.find('{');
    let end = text.rfind('}');

    let body = match (start, end) {
        (Some(s), Some(e)) if s < e => &text[s..=e],
        _ => {
            return Err(AgentError::Oracle(
                "intent reply contains no json object".to_string(),
            ))
        }
    };

    let intent: QueryIntent = serde_json::from_str(body)?;
    if intent.keywords.is_empty() {
        return Err(AgentError::Oracle("intent reply has no keywords".to_string()));
    }
    Ok(intent)
}

/// ask the oracle for keywords and domains; never fails, falls back to the request words
#[tracing::instrument(skip(oracle, default_domains))]
pub async fn analyze_intent(
    oracle: &dyn Oracle,
    request: &str,
    limit: Duration,
    default_domains: &[String],
) -> QueryIntent {
    let messages = vec![
        Message::system(INTENT_SYSTEM_PROMPT),
        Message::user(build_intent_prompt(request, default_domains)),
    ];

    let parsed = complete_with_timeout(oracle, &messages, limit)
        .await
        .and_then(|reply| parse_intent(&reply));

    match parsed {
        Ok(intent) => {
            tracing::info!(keywords = ?intent.keywords, domains = ?intent.domains, "query analysis");
            intent
        }
        Err(e) => {
            tracing::warn!("query analysis failed, using request words: {}", e);
            QueryIntent::fallback(request, default_domains)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ScriptedOracle, ScriptedReply};

    fn domains() -> Vec<String> {
        vec!["Food".to_string(), "Desserts".to_string()]
    }

    #[test]
    fn test_parse_intent_inside_fence() {
        let intent = parse_intent(
            "```json\n{\"keywords\": [\"prep time\", \"bengal\"], \"domains\": [\"Timing\"]}\n```",
        )
        .unwrap();

        assert_eq!(intent.keywords, vec!["prep time", "bengal"]);
        assert_eq!(intent.search_terms(), vec!["prep time", "bengal", "Timing"]);
    }

    #[test]
    fn test_parse_intent_rejects_garbage() {
        assert!(parse_intent("no json here").is_err());
        assert!(parse_intent("{\"domains\": [\"Food\"]}").is_err());
        assert!(parse_intent("{not json}").is_err());
    }

    #[tokio::test]
    async fn test_analyze_intent_uses_oracle_reply() {
        let oracle =
            ScriptedOracle::from_texts([r#"{"keywords": ["sweet"], "domains": ["Desserts"]}"#]);
        let intent =
            analyze_intent(&oracle, "sweet things", Duration::from_secs(1), &domains()).await;

        assert_eq!(intent.keywords, vec!["sweet"]);
    }

    #[tokio::test]
    async fn test_analyze_intent_falls_back_on_failure() {
        let oracle = ScriptedOracle::new(vec![ScriptedReply::Fail("quota exceeded".to_string())]);
        let intent = analyze_intent(
            &oracle,
            "Show Desserts under 30 minutes",
            Duration::from_secs(1),
            &domains(),
        )
        .await;

        assert_eq!(
            intent,
            QueryIntent {
                keywords: vec!["show", "desserts", "under", "30", "minutes"]
                    .into_iter()
                    .map(String::from)
                    .collect(),
                domains: domains(),
            }
        );
    }
}
