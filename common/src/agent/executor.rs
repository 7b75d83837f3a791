use crate::agent::intent::{analyze_intent, QueryIntent};
use crate::agent::prompt::{build_generation_prompt, SQL_SYSTEM_PROMPT};
use crate::agent::sanitizer::sanitize_query;
use crate::agent::state::{Event, SessionState, Stage};
use crate::agent::validator::{QueryValidator, ValidationStatus};
use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::llm::{complete_with_timeout, Message, Oracle};
use crate::schema::{relevant_schema, KeywordRetriever, SchemaDescription, SchemaRetriever};
use crate::store::{QueryOutcome, SqliteStore};
use serde::Serialize;
use std::sync::Arc;

/// what a caller gets back from one question
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub user_request: String,
    pub final_query: String,
    pub result: QueryOutcome,
    pub iterations: usize,
    pub validation_status: ValidationStatus,
    pub feedback: String,
    /// true when the ceiling forced execution of a query that never validated
    pub forced: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
}

/// drives generate -> validate -> execute for one question at a time.
///
/// holds only read-only shared state, so one instance can serve concurrent
/// sessions; each `ask` owns its `SessionState` and opens its own connections.
pub struct AgentLoop {
    config: AgentConfig,
    oracle: Arc<dyn Oracle>,
    schema: Arc<SchemaDescription>,
    retriever: Option<Arc<dyn SchemaRetriever>>,
    validator: QueryValidator,
    store: SqliteStore,
}

impl AgentLoop {
    pub fn new(
        config: AgentConfig,
        oracle: Arc<dyn Oracle>,
        schema: Arc<SchemaDescription>,
    ) -> Result<Self> {
        config.validate()?;

        if !config.database_path.exists() {
            return Err(AgentError::Config(format!(
                "database not found: {}",
                config.database_path.display()
            )));
        }

        let store = SqliteStore::new(&config.database_path, config.query_timeout);
        let validator =
            QueryValidator::new(Arc::clone(&schema), store.clone(), config.dry_run_limit);

        let retriever: Option<Arc<dyn SchemaRetriever>> = if config.use_retrieval {
            Some(Arc::new(KeywordRetriever::build(&schema)))
        } else {
            None
        };

        tracing::info!(
            oracle = oracle.name(),
            table = %schema.table,
            max_iterations = config.max_iterations,
            retrieval = retriever.is_some(),
            "agent initialized"
        );

        Ok(Self {
            config,
            oracle,
            schema,
            retriever,
            validator,
            store,
        })
    }

    pub fn with_retriever(mut self, retriever: Arc<dyn SchemaRetriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    pub fn with_validator(mut self, validator: QueryValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn schema(&self) -> &SchemaDescription {
        &self.schema
    }

    /// answer one natural-language question.
    ///
    /// always ends in an execution: when every attempt fails validation the
    /// last candidate is run anyway and `SessionReport::forced` is set, so the
    /// result may be the store's error message.
    #[tracing::instrument(skip(self), fields(table = %self.schema.table))]
    pub async fn ask(&self, request: &str) -> Result<SessionReport> {
        let (prompt_schema, keywords) = self.prepare_schema(request).await;

        let mut state = SessionState::new(request, self.config.max_iterations);

        loop {
            let event = match state.stage() {
                Stage::Generate => self.generate(&state, &prompt_schema, &keywords).await,
                Stage::Validate => {
                    Event::Validated(self.validator.validate(state.candidate_query()).await)
                }
                Stage::Execute => {
                    Event::Executed(self.store.execute(state.candidate_query()).await)
                }
                Stage::Done => break,
            };
            state = state.transition(event)?;
        }

        tracing::info!(
            iterations = state.iteration_count(),
            status = %state.validation_status(),
            forced = state.forced(),
            "session complete"
        );

        Ok(SessionReport {
            user_request: state.user_request().to_string(),
            final_query: state.candidate_query().to_string(),
            iterations: state.iteration_count(),
            validation_status: state.validation_status(),
            feedback: state.feedback().to_string(),
            forced: state.forced(),
            keywords,
            result: state.into_result().ok_or_else(|| {
                AgentError::InvalidTransition {
                    stage: Stage::Done.to_string(),
                    event: "missing result".to_string(),
                }
            })?,
        })
    }

    /// schema shown to the oracle, narrowed by retrieval when configured
    async fn prepare_schema(&self, request: &str) -> (SchemaDescription, Vec<String>) {
        let Some(retriever) = &self.retriever else {
            return (self.schema.as_ref().clone(), Vec::new());
        };

        let intent: QueryIntent = analyze_intent(
            self.oracle.as_ref(),
            request,
            self.config.oracle_timeout,
            &self.config.default_domains,
        )
        .await;

        let schema = relevant_schema(
            &self.schema,
            Some(retriever.as_ref()),
            &intent.search_terms(),
            self.config.retrieval_limit,
        );

        (schema, intent.keywords)
    }

    async fn generate(
        &self,
        state: &SessionState,
        schema: &SchemaDescription,
        keywords: &[String],
    ) -> Event {
        let messages = vec![
            Message::system(SQL_SYSTEM_PROMPT),
            Message::user(build_generation_prompt(
                state.user_request(),
                schema,
                keywords,
                state.feedback(),
            )),
        ];

        let limit = self.config.oracle_timeout;

        match complete_with_timeout(self.oracle.as_ref(), &messages, limit).await {
            Ok(raw) => {
                let query = sanitize_query(&raw);
                tracing::info!(
                    iteration = state.iteration_count() + 1,
                    "generated sql: {}",
                    query
                );
                Event::Generated(query)
            }
            Err(e) => Event::OracleFailed(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ScriptedOracle, ScriptedReply};
    use crate::schema::description::tests::desserts_schema;
    use crate::store::sqlite::tests::desserts_db;
    use crate::store::Scalar;
    use std::path::Path;
    use std::time::Duration;

    const SCENARIO_A_QUERY: &str =
        "SELECT name, state FROM indian_desserts WHERE course = 'dessert' AND prep_time < 30";

    fn config(dir: &Path) -> AgentConfig {
        AgentConfig {
            database_path: desserts_db(dir),
            ..AgentConfig::default()
        }
    }

    fn agent(config: AgentConfig, oracle: Arc<ScriptedOracle>) -> AgentLoop {
        AgentLoop::new(config, oracle, Arc::new(desserts_schema())).unwrap()
    }

    fn last_prompt(oracle: &ScriptedOracle, call: usize) -> String {
        oracle.calls()[call]
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_fenced_query_passes_first_time() {
        let dir = tempfile::tempdir().unwrap();
        let oracle = Arc::new(ScriptedOracle::from_texts([format!(
            "```sql\n{};\n```",
            SCENARIO_A_QUERY
        )]));

        let report = agent(config(dir.path()), Arc::clone(&oracle))
            .ask("show desserts under 30 minutes prep time")
            .await
            .unwrap();

        assert_eq!(report.final_query, SCENARIO_A_QUERY);
        assert_eq!(report.iterations, 1);
        assert_eq!(report.validation_status, ValidationStatus::Passed);
        assert_eq!(report.feedback, "All validations passed");
        assert!(!report.forced);
        assert_eq!(
            report.result.rows(),
            &[
                vec![
                    Scalar::Text("Gulab jamun".to_string()),
                    Scalar::Text("West Bengal".to_string())
                ],
                vec![
                    Scalar::Text("Ras malai".to_string()),
                    Scalar::Text("West Bengal".to_string())
                ],
            ]
        );
        assert_eq!(oracle.calls().len(), 1);
        assert!(last_prompt(&oracle, 0).contains("validator feedback: None"));
    }

    #[tokio::test]
    async fn test_unknown_column_feedback_reaches_next_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let oracle = Arc::new(ScriptedOracle::from_texts([
            "SELECT name, prep_minutes FROM indian_desserts WHERE prep_minutes < 30",
            "SELECT name, prep_time FROM indian_desserts WHERE prep_time < 30",
        ]));

        let report = agent(config(dir.path()), Arc::clone(&oracle))
            .ask("show desserts under 30 minutes prep time")
            .await
            .unwrap();

        assert_eq!(report.iterations, 2);
        assert_eq!(report.validation_status, ValidationStatus::Passed);

        let retry_prompt = last_prompt(&oracle, 1);
        assert!(retry_prompt
            .contains("Invalid columns: prep_minutes. Valid: name, state, course, prep_time"));
        assert!(retry_prompt.contains("SQL error: no such column: prep_minutes"));
    }

    #[tokio::test]
    async fn test_ceiling_forces_execution_of_last_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let oracle = Arc::new(ScriptedOracle::from_texts(
            (1..=6).map(|i| format!("SELECT flavor_{} FROM indian_desserts", i)),
        ));

        let report = agent(config(dir.path()), Arc::clone(&oracle))
            .ask("what do they taste like")
            .await
            .unwrap();

        assert_eq!(report.iterations, 5);
        assert!(report.forced);
        assert_eq!(report.validation_status, ValidationStatus::Failed);
        assert_eq!(report.final_query, "SELECT flavor_5 FROM indian_desserts");
        assert_eq!(report.result.error_message(), Some("no such column: flavor_5"));
        assert_eq!(oracle.calls().len(), 5);
        assert_eq!(oracle.remaining(), 1);
    }

    #[tokio::test]
    async fn test_store_error_text_is_final_result() {
        let dir = tempfile::tempdir().unwrap();
        let oracle = Arc::new(ScriptedOracle::from_texts(["SELECT name FROM no_such_table"]));
        let config = AgentConfig {
            max_iterations: 1,
            ..config(dir.path())
        };

        let report = agent(config, oracle).ask("anything").await.unwrap();

        assert_eq!(
            report.result,
            QueryOutcome::Error {
                message: "no such table: no_such_table".to_string()
            }
        );
        assert!(report.forced);
    }

    #[tokio::test]
    async fn test_unknown_column_error_is_final_result_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let oracle = Arc::new(ScriptedOracle::from_texts([
            "SELECT prep_minutes FROM indian_desserts",
        ]));
        let config = AgentConfig {
            max_iterations: 1,
            ..config(dir.path())
        };

        let report = agent(config, oracle).ask("how long do they take").await.unwrap();

        assert_eq!(report.result.error_message(), Some("no such column: prep_minutes"));
        assert!(report.feedback.ends_with("SQL error: no such column: prep_minutes"));
    }

    struct FixedRetriever(Vec<String>);

    impl SchemaRetriever for FixedRetriever {
        fn retrieve(&self, _terms: &[String], limit: usize) -> Vec<String> {
            self.0.iter().take(limit).cloned().collect()
        }
    }

    #[tokio::test]
    async fn test_custom_retriever_shapes_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let oracle = Arc::new(ScriptedOracle::from_texts([
            r#"{"keywords": ["region"], "domains": ["Food"]}"#,
            "SELECT state FROM indian_desserts",
        ]));

        let agent = agent(config(dir.path()), Arc::clone(&oracle))
            .with_retriever(Arc::new(FixedRetriever(vec!["state".to_string()])));
        assert_eq!(agent.schema().column_names().len(), 4);

        let report = agent.ask("which region").await.unwrap();

        assert_eq!(report.validation_status, ValidationStatus::Passed);
        let prompt = last_prompt(&oracle, 1);
        assert!(prompt.contains("- state (TEXT)"));
        assert!(!prompt.contains("- name (TEXT)"));
    }

    #[tokio::test]
    async fn test_replaced_validator_drives_feedback() {
        let dir = tempfile::tempdir().unwrap();
        let config = AgentConfig {
            max_iterations: 1,
            ..config(dir.path())
        };
        let narrow = desserts_schema().subset(&["name".to_string()]);
        let validator = QueryValidator::new(
            Arc::new(narrow),
            SqliteStore::new(&config.database_path, config.query_timeout),
            config.dry_run_limit,
        );
        let oracle = Arc::new(ScriptedOracle::from_texts(["SELECT state FROM indian_desserts"]));

        let report = agent(config, oracle)
            .with_validator(validator)
            .ask("where are they from")
            .await
            .unwrap();

        assert!(report.forced);
        assert_eq!(report.feedback, "Invalid columns: state. Valid: name");
        // forced execution still runs against the real table
        assert_eq!(report.result.rows().len(), 4);
    }

    #[tokio::test]
    async fn test_oracle_failure_and_timeout_consume_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let oracle = Arc::new(ScriptedOracle::new(vec![
            ScriptedReply::Fail("503 service unavailable".to_string()),
            ScriptedReply::Hang,
            ScriptedReply::Text("SELECT * FROM indian_desserts".to_string()),
        ]));
        let config = AgentConfig {
            oracle_timeout: Duration::from_millis(50),
            ..config(dir.path())
        };

        let report = agent(config, Arc::clone(&oracle)).ask("everything").await.unwrap();

        assert_eq!(report.iterations, 3);
        assert_eq!(report.validation_status, ValidationStatus::Passed);
        assert_eq!(report.result.rows().len(), 4);
        assert!(last_prompt(&oracle, 1).contains("Could not parse SELECT clause"));
    }

    #[tokio::test]
    async fn test_retrieval_narrows_prompt_schema() {
        let dir = tempfile::tempdir().unwrap();
        let oracle = Arc::new(ScriptedOracle::from_texts([
            r#"{"keywords": ["prep", "time"], "domains": ["Timing"]}"#,
            "SELECT name FROM indian_desserts WHERE prep_time < 30",
        ]));
        let config = AgentConfig {
            use_retrieval: true,
            ..config(dir.path())
        };

        let report = agent(config, Arc::clone(&oracle))
            .ask("quick ones please")
            .await
            .unwrap();

        assert_eq!(report.keywords, vec!["prep", "time"]);
        assert_eq!(report.validation_status, ValidationStatus::Passed);

        let prompt = last_prompt(&oracle, 1);
        assert!(prompt.contains("- prep_time (INTEGER)"));
        assert!(!prompt.contains("- state (TEXT)"));
    }

    #[tokio::test]
    async fn test_retrieval_falls_back_when_analysis_fails() {
        let dir = tempfile::tempdir().unwrap();
        let oracle = Arc::new(ScriptedOracle::new(vec![
            ScriptedReply::Fail("bad gateway".to_string()),
            ScriptedReply::Text("SELECT state FROM indian_desserts".to_string()),
        ]));
        let config = AgentConfig {
            use_retrieval: true,
            ..config(dir.path())
        };

        let report = agent(config, Arc::clone(&oracle))
            .ask("Which States")
            .await
            .unwrap();

        assert_eq!(report.keywords, vec!["which", "states"]);
        // "states" matches nothing exactly, so the whole schema is shown
        assert!(last_prompt(&oracle, 1).contains("- name (TEXT)"));
    }

    #[tokio::test]
    async fn test_concurrent_sessions_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        let oracle = Arc::new(ScriptedOracle::from_texts([
            "SELECT name FROM indian_desserts",
            "SELECT name FROM indian_desserts",
        ]));
        let agent = Arc::new(agent(config(dir.path()), oracle));

        let (a, b) = tokio::join!(agent.ask("first"), agent.ask("second"));
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(a.iterations, 1);
        assert_eq!(b.iterations, 1);
        assert_eq!(a.user_request, "first");
        assert_eq!(b.user_request, "second");
    }

    #[test]
    fn test_new_rejects_missing_database() {
        let dir = tempfile::tempdir().unwrap();
        let config = AgentConfig {
            database_path: dir.path().join("missing.db"),
            ..AgentConfig::default()
        };
        let oracle = Arc::new(ScriptedOracle::from_texts(Vec::<String>::new()));

        let result = AgentLoop::new(config, oracle, Arc::new(desserts_schema()));
        assert!(matches!(result, Err(AgentError::Config(_))));
    }
}
