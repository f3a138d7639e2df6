//! Statement submission
//!
//! Submission is never retried: a rejection here means the statement or
//! the connection parameters are wrong, and waiting will not fix that.

use crate::metrics::STATEMENTS_SUBMITTED_TOTAL;
use crate::warehouse::{JobHandle, WarehouseError, WarehouseService, WarehouseTarget};
use std::sync::Arc;
use tracing::{debug, error, instrument};

/// The warehouse refused a statement at submission time
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
#[error("Submission of `{statement}` failed: {source}")]
pub struct SubmissionError {
    /// Statement text, shortened for display
    pub statement: String,
    #[source]
    pub source: WarehouseError,
}

/// Submits SQL text to the warehouse and hands back job handles
#[derive(Clone)]
pub struct StatementExecutor {
    service: Arc<dyn WarehouseService>,
    target: WarehouseTarget,
}

impl StatementExecutor {
    pub fn new(service: Arc<dyn WarehouseService>, target: WarehouseTarget) -> Self {
        Self { service, target }
    }

    pub fn service(&self) -> &Arc<dyn WarehouseService> {
        &self.service
    }

    pub fn target(&self) -> &WarehouseTarget {
        &self.target
    }

    /// Submit `sql` and return the job handle without waiting for completion
    #[instrument(
        skip(self, sql),
        fields(
            cluster = %self.target.cluster_identifier,
            database = %self.target.database,
            statement = %abbreviate(sql),
        )
    )]
    pub async fn submit(&self, sql: &str) -> Result<JobHandle, SubmissionError> {
        match self.service.submit_statement(&self.target, sql).await {
            Ok(handle) => {
                STATEMENTS_SUBMITTED_TOTAL
                    .with_label_values(&["accepted"])
                    .inc();
                debug!(statement_id = %handle, "Statement submitted");
                Ok(handle)
            }
            Err(e) => {
                STATEMENTS_SUBMITTED_TOTAL
                    .with_label_values(&["rejected"])
                    .inc();
                error!(error = %e, "Statement submission rejected");
                Err(SubmissionError {
                    statement: abbreviate(sql),
                    source: e,
                })
            }
        }
    }
}

/// First line of a statement, cut to a loggable length
pub(crate) fn abbreviate(sql: &str) -> String {
    const MAX_CHARS: usize = 96;

    let flat = sql.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= MAX_CHARS {
        flat
    } else {
        let cut: String = flat.chars().take(MAX_CHARS).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warehouse::{PollResponse, RawResult};
    use async_trait::async_trait;

    struct RejectingWarehouse;

    #[async_trait]
    impl WarehouseService for RejectingWarehouse {
        async fn submit_statement(
            &self,
            _target: &WarehouseTarget,
            sql: &str,
        ) -> Result<JobHandle, WarehouseError> {
            if sql.contains("SELEC ") {
                Err(WarehouseError::Rejected("syntax error at SELEC".into()))
            } else {
                Ok(JobHandle::new("job-1"))
            }
        }

        async fn poll_status(
            &self,
            _target: &WarehouseTarget,
            _handle: &JobHandle,
        ) -> Result<PollResponse, WarehouseError> {
            Ok(PollResponse::status(crate::warehouse::JobStatus::Finished))
        }

        async fn fetch_result(
            &self,
            _target: &WarehouseTarget,
            _handle: &JobHandle,
        ) -> Result<RawResult, WarehouseError> {
            Ok(RawResult::default())
        }
    }

    fn executor() -> StatementExecutor {
        StatementExecutor::new(
            Arc::new(RejectingWarehouse),
            WarehouseTarget {
                cluster_identifier: "analytics".into(),
                database: "dev".into(),
                secret_arn: "arn:aws:secretsmanager:secret".into(),
            },
        )
    }

    #[tokio::test]
    async fn test_submit_returns_handle() {
        let handle = executor().submit("SELECT 1").await.unwrap();
        assert_eq!(handle.as_str(), "job-1");
    }

    #[tokio::test]
    async fn test_rejection_is_surfaced() {
        let err = executor().submit("SELEC 1").await.unwrap_err();
        assert_eq!(err.statement, "SELEC 1");
        assert!(matches!(err.source, WarehouseError::Rejected(_)));
    }

    #[test]
    fn test_abbreviate() {
        assert_eq!(abbreviate("SELECT *\n   FROM t"), "SELECT * FROM t");
        let long = "x".repeat(200);
        assert_eq!(abbreviate(&long).len(), 99);
    }
}
