//! Execution Loop
//!
//! Self-healing retry controller: an explicit state machine that alternates
//! between generating SQL and executing it, feeding each execution error back
//! into the next generation, for at most `max_retries + 1` executions.

use crate::error::Result;
use crate::execution::engine::QueryExecutor;
use crate::execution::result::{ExecutionOutcome, RowSet};
use crate::execution_loop::error_classifier::{classify_error, SqlErrorClass};
use crate::schema_rag::catalog::SchemaContext;
use crate::sql_generator::{PriorError, SqlGenerator};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum RetryState {
    Generating {
        attempt: u8,
        prior_error: Option<PriorError>,
    },
    Executing {
        attempt: u8,
        sql: String,
    },
    Succeeded {
        attempt: u8,
        sql: String,
        rows: RowSet,
    },
    Exhausted {
        attempt: u8,
        sql: String,
        error: String,
    },
}

impl RetryState {
    pub fn initial() -> Self {
        RetryState::Generating {
            attempt: 0,
            prior_error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RetryState::Succeeded { .. } | RetryState::Exhausted { .. })
    }
}

/// One executed attempt, kept for logs and the response's reasoning
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptRecord {
    pub attempt: u8,
    pub sql: String,
    pub error: Option<String>,
    pub error_class: Option<SqlErrorClass>,
}

/// Terminal state plus the attempts that led to it
#[derive(Debug, Clone)]
pub struct RetryRun {
    pub state: RetryState,
    pub history: Vec<AttemptRecord>,
}

pub struct RetryController {
    max_retries: u8,
}

impl RetryController {
    pub fn new(max_retries: u8) -> Self {
        Self { max_retries }
    }

    pub fn max_retries(&self) -> u8 {
        self.max_retries
    }

    /// Pure transition out of `Executing` once the executor has answered
    pub fn on_outcome(&self, attempt: u8, sql: String, outcome: ExecutionOutcome) -> RetryState {
        match outcome {
            ExecutionOutcome::Success(rows) => RetryState::Succeeded { attempt, sql, rows },
            ExecutionOutcome::Failure(error) if attempt < self.max_retries => {
                RetryState::Generating {
                    attempt: attempt + 1,
                    prior_error: Some(PriorError { sql, message: error }),
                }
            }
            ExecutionOutcome::Failure(error) => RetryState::Exhausted { attempt, sql, error },
        }
    }

    /// Advance one state. Terminal states are returned unchanged.
    pub async fn step(
        &self,
        state: RetryState,
        question: &str,
        schema: &SchemaContext,
        generator: &SqlGenerator,
        executor: &QueryExecutor,
        history: &mut Vec<AttemptRecord>,
    ) -> Result<RetryState> {
        match state {
            RetryState::Generating {
                attempt,
                prior_error,
            } => {
                if prior_error.is_some() {
                    info!("Attempting to fix SQL (retry {} of {})", attempt, self.max_retries);
                }
                let sql = generator
                    .generate(question, schema, prior_error.as_ref())
                    .await?;
                Ok(RetryState::Executing { attempt, sql })
            }
            RetryState::Executing { attempt, sql } => {
                info!("Executing SQL (Attempt {}): {}", attempt + 1, sql);
                let outcome = executor.execute(&sql).await;
                let error = match &outcome {
                    ExecutionOutcome::Success(_) => None,
                    ExecutionOutcome::Failure(message) => Some(message.clone()),
                };
                history.push(AttemptRecord {
                    attempt,
                    sql: sql.clone(),
                    error_class: error.as_deref().map(classify_error),
                    error,
                });
                Ok(self.on_outcome(attempt, sql, outcome))
            }
            terminal => Ok(terminal),
        }
    }

    /// Drive the state machine to a terminal state.
    ///
    /// `schema` is fixed for the whole run. Generation errors abort immediately;
    /// only execution failures are retried.
    pub async fn run(
        &self,
        question: &str,
        schema: &SchemaContext,
        generator: &SqlGenerator,
        executor: &QueryExecutor,
    ) -> Result<RetryRun> {
        let mut state = RetryState::initial();
        let mut history = Vec::new();

        while !state.is_terminal() {
            state = self
                .step(state, question, schema, generator, executor, &mut history)
                .await?;
        }

        match &state {
            RetryState::Succeeded { attempt, .. } => {
                info!("✅ Execution succeeded on attempt {}", attempt + 1)
            }
            RetryState::Exhausted { error, .. } => {
                warn!("Retries exhausted after {} attempts: {}", history.len(), error)
            }
            _ => {}
        }

        Ok(RetryRun { state, history })
    }
}
