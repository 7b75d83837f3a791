//! Session state and the transition function of the generate/validate/execute loop.
//!
//! The state is a plain value: `SessionState::transition` consumes it together
//! with the event produced by the current stage and returns the next state.
//! The only way out of the loop is `Execute`, which is reached either when a
//! candidate passes validation or when `iteration_count` hits the ceiling. In
//! the second case the last candidate is executed anyway and the report is
//! marked `forced`, so callers see the store's real error instead of a refusal.

use crate::agent::validator::{ValidationOutcome, ValidationStatus};
use crate::error::{AgentError, Result};
use crate::store::QueryOutcome;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Generate,
    Validate,
    Execute,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Generate => "generate",
            Stage::Validate => "validate",
            Stage::Execute => "execute",
            Stage::Done => "done",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone)]
pub enum Event {
    /// sanitized candidate from the oracle
    Generated(String),
    /// oracle call failed or timed out; the attempt still counts
    OracleFailed(String),
    Validated(ValidationOutcome),
    Executed(QueryOutcome),
}

impl Event {
    fn name(&self) -> &'static str {
        match self {
            Event::Generated(_) => "generated",
            Event::OracleFailed(_) => "oracle_failed",
            Event::Validated(_) => "validated",
            Event::Executed(_) => "executed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionState {
    user_request: String,
    candidate_query: String,
    validation_status: ValidationStatus,
    feedback: String,
    result: Option<QueryOutcome>,
    iteration_count: usize,
    max_iterations: usize,
    stage: Stage,
    forced: bool,
}

impl SessionState {
    pub fn new(user_request: impl Into<String>, max_iterations: usize) -> Self {
        Self {
            user_request: user_request.into(),
            candidate_query: String::new(),
            validation_status: ValidationStatus::Pending,
            feedback: String::new(),
            result: None,
            iteration_count: 0,
            max_iterations,
            stage: Stage::Generate,
            forced: false,
        }
    }

    pub fn user_request(&self) -> &str {
        &self.user_request
    }

    pub fn candidate_query(&self) -> &str {
        &self.candidate_query
    }

    pub fn validation_status(&self) -> ValidationStatus {
        self.validation_status
    }

    pub fn feedback(&self) -> &str {
        &self.feedback
    }

    pub fn result(&self) -> Option<&QueryOutcome> {
        self.result.as_ref()
    }

    pub fn iteration_count(&self) -> usize {
        self.iteration_count
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// execution was reached through the ceiling, not through a passing validation
    pub fn forced(&self) -> bool {
        self.forced
    }

    pub fn into_result(self) -> Option<QueryOutcome> {
        self.result
    }

    pub fn transition(self, event: Event) -> Result<Self> {
        match (self.stage, event) {
            (Stage::Generate, Event::Generated(candidate)) => Ok(self.next_attempt(candidate)),
            (Stage::Generate, Event::OracleFailed(reason)) => {
                tracing::warn!(
                    iteration = self.iteration_count + 1,
                    "oracle failed, attempt consumed: {}",
                    reason
                );
                Ok(self.next_attempt(String::new()))
            }
            (Stage::Validate, Event::Validated(outcome)) => {
                let passed = outcome.passed();
                let exhausted = self.iteration_count >= self.max_iterations;

                let stage = if passed || exhausted {
                    Stage::Execute
                } else {
                    Stage::Generate
                };

                if exhausted && !passed {
                    tracing::warn!(
                        "max iterations ({}) reached, executing last candidate",
                        self.max_iterations
                    );
                }

                Ok(Self {
                    validation_status: outcome.status,
                    feedback: outcome.feedback(),
                    forced: !passed && exhausted,
                    stage,
                    ..self
                })
            }
            (Stage::Execute, Event::Executed(outcome)) => Ok(Self {
                result: Some(outcome),
                stage: Stage::Done,
                ..self
            }),
            (stage, event) => Err(AgentError::InvalidTransition {
                stage: stage.to_string(),
                event: event.name().to_string(),
            }),
        }
    }

    fn next_attempt(self, candidate: String) -> Self {
        Self {
            candidate_query: candidate,
            validation_status: ValidationStatus::Pending,
            iteration_count: self.iteration_count + 1,
            stage: Stage::Validate,
            ..self
        }
    }
}
