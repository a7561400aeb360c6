//! Execution Engine - contract for data stores and the failure-capturing executor

use crate::error::{PipelineError, Result};
use crate::execution::result::{ExecutionOutcome, RowSet};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Relational backend. Errors carry the backend's diagnostic text.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Backend name (e.g., "sqlite")
    fn name(&self) -> &'static str;

    async fn execute(&self, sql: &str) -> Result<RowSet>;
}

/// Wraps a `DataStore` so that every failure, including timeouts, becomes
/// `ExecutionOutcome::Failure` instead of an error.
#[derive(Clone)]
pub struct QueryExecutor {
    store: Arc<dyn DataStore>,
    timeout: Duration,
}

impl QueryExecutor {
    pub fn new(store: Arc<dyn DataStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub async fn execute(&self, sql: &str) -> ExecutionOutcome {
        let start = Instant::now();
        match tokio::time::timeout(self.timeout, self.store.execute(sql)).await {
            Ok(Ok(rows)) => {
                debug!(
                    "{} returned {} rows in {} ms",
                    self.store.name(),
                    rows.row_count(),
                    start.elapsed().as_millis()
                );
                ExecutionOutcome::Success(rows)
            }
            Ok(Err(e)) => {
                warn!("SQL Error: {}", e);
                ExecutionOutcome::Failure(diagnostic_text(e))
            }
            Err(_) => {
                let message = format!("query timed out after {} ms", self.timeout.as_millis());
                warn!("SQL Error: {}", message);
                ExecutionOutcome::Failure(message)
            }
        }
    }
}

/// Backend text without our own error-kind prefix
fn diagnostic_text(error: PipelineError) -> String {
    match error {
        PipelineError::Execution(message) => message,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ScriptedStore;

    #[async_trait]
    impl DataStore for ScriptedStore {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn execute(&self, sql: &str) -> Result<RowSet> {
            match sql {
                "SLOW" => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(RowSet::default())
                }
                "BAD" => Err(PipelineError::Execution("no such table: nope".to_string())),
                _ => Ok(RowSet::new(vec!["n".to_string()], vec![vec![serde_json::json!(1)]])),
            }
        }
    }

    fn executor() -> QueryExecutor {
        QueryExecutor::new(Arc::new(ScriptedStore), Duration::from_millis(20))
    }

    #[tokio::test]
    async fn test_success() {
        let outcome = executor().execute("SELECT 1").await;
        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn test_backend_error_is_verbatim_failure() {
        let outcome = executor().execute("BAD").await;
        assert_eq!(outcome, ExecutionOutcome::Failure("no such table: nope".to_string()));
    }

    #[tokio::test]
    async fn test_timeout_is_failure() {
        match executor().execute("SLOW").await {
            ExecutionOutcome::Failure(message) => assert!(message.contains("timed out")),
            other => panic!("expected failure, got {:?}", other),
        }
    }
}
