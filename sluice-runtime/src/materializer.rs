//! Decoding of finished statement results into [`TabularResult`]s

use crate::retry::RetryPolicy;
use crate::warehouse::{JobHandle, RawResult, WarehouseError, WarehouseService, WarehouseTarget, WireField};
use sluice_core::{Cell, TabularResult};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Errors raised while turning a result payload into a table
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum MaterializeError {
    #[error("Fetching result of {handle} failed: {source}")]
    Service {
        handle: JobHandle,
        #[source]
        source: WarehouseError,
    },

    #[error("Result of {handle} is malformed: {source}")]
    Shape {
        handle: JobHandle,
        #[source]
        source: sluice_core::Error,
    },
}

/// Pick the typed value of a wire cell.
///
/// Tags are probed in the order string, integer, double; a cell carrying
/// none of them, or flagged null, becomes [`Cell::Null`].
pub fn decode_field(field: &WireField) -> Cell {
    if field.is_null == Some(true) {
        return Cell::Null;
    }
    match field {
        WireField {
            string_value: Some(s),
            ..
        } => Cell::String(s.clone()),
        WireField {
            long_value: Some(v),
            ..
        } => Cell::Integer(*v),
        WireField {
            double_value: Some(v),
            ..
        } => Cell::Double(*v),
        _ => Cell::Null,
    }
}

/// Build a table from a raw payload, preserving column and row order
pub fn decode_result(raw: RawResult) -> sluice_core::Result<TabularResult> {
    let columns = raw.column_metadata.into_iter().map(|c| c.label).collect();
    let rows = raw
        .records
        .iter()
        .map(|record| record.iter().map(decode_field).collect())
        .collect();
    TabularResult::new(columns, rows)
}

/// Fetches and decodes the results of finished statements
#[derive(Clone)]
pub struct ResultMaterializer {
    service: Arc<dyn WarehouseService>,
    target: WarehouseTarget,
    policy: RetryPolicy,
}

impl ResultMaterializer {
    /// `policy` bounds retries of transient fetch errors, as for polling
    pub fn new(
        service: Arc<dyn WarehouseService>,
        target: WarehouseTarget,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            service,
            target,
            policy,
        }
    }

    /// Fetch and decode the result of a job the poller reported FINISHED
    #[instrument(skip(self), fields(statement_id = %handle))]
    pub async fn materialize(&self, handle: &JobHandle) -> Result<TabularResult, MaterializeError> {
        let raw = self.fetch(handle).await?;

        let table = decode_result(raw).map_err(|source| MaterializeError::Shape {
            handle: handle.clone(),
            source,
        })?;

        debug!(
            rows = table.row_count(),
            columns = table.column_count(),
            "Result materialized"
        );
        Ok(table)
    }

    /// Fetch the raw payload, retrying transient errors up to the ceiling.
    ///
    /// A fatal error, or a transient one on the last attempt, is returned.
    async fn fetch(&self, handle: &JobHandle) -> Result<RawResult, MaterializeError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.service.fetch_result(&self.target, handle).await {
                Ok(raw) => return Ok(raw),
                Err(e) if e.is_transient() && self.policy.should_retry(attempts) => {
                    warn!(attempt = attempts, error = %e, "Result not available yet, retrying");
                    tokio::time::sleep(self.policy.calculate_delay(attempts - 1)).await;
                }
                Err(source) => {
                    return Err(MaterializeError::Service {
                        handle: handle.clone(),
                        source,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warehouse::{ColumnMetadata, PollResponse};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Replays a script of fetch outcomes, then serves `fallback`
    struct FlakyResults {
        script: Mutex<VecDeque<Result<RawResult, WarehouseError>>>,
        fallback: RawResult,
        fetches: Mutex<u32>,
    }

    impl FlakyResults {
        fn new(script: Vec<Result<RawResult, WarehouseError>>, fallback: RawResult) -> Self {
            Self {
                script: Mutex::new(script.into()),
                fallback,
                fetches: Mutex::new(0),
            }
        }

        fn fetches(&self) -> u32 {
            *self.fetches.lock().unwrap()
        }
    }

    #[async_trait]
    impl WarehouseService for FlakyResults {
        async fn submit_statement(
            &self,
            _target: &WarehouseTarget,
            _sql: &str,
        ) -> Result<JobHandle, WarehouseError> {
            Ok(JobHandle::new("unused"))
        }

        async fn poll_status(
            &self,
            _target: &WarehouseTarget,
            _handle: &JobHandle,
        ) -> Result<PollResponse, WarehouseError> {
            Ok(PollResponse::TransientUnavailable)
        }

        async fn fetch_result(
            &self,
            _target: &WarehouseTarget,
            _handle: &JobHandle,
        ) -> Result<RawResult, WarehouseError> {
            *self.fetches.lock().unwrap() += 1;
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(self.fallback.clone()))
        }
    }

    fn materializer(service: Arc<FlakyResults>, max_attempts: u32) -> ResultMaterializer {
        ResultMaterializer::new(
            service,
            WarehouseTarget {
                cluster_identifier: "analytics".into(),
                database: "dev".into(),
                secret_arn: "arn:aws:secretsmanager:secret".into(),
            },
            RetryPolicy::fixed(max_attempts, Duration::from_secs(30)),
        )
    }

    fn one_row() -> RawResult {
        RawResult {
            column_metadata: vec![ColumnMetadata::new("row_count")],
            records: vec![vec![WireField {
                long_value: Some(3),
                ..Default::default()
            }]],
        }
    }

    fn string(s: &str) -> WireField {
        WireField {
            string_value: Some(s.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_decode_field_probes_tags() {
        assert_eq!(decode_field(&string("A")), Cell::from("A"));
        assert_eq!(
            decode_field(&WireField {
                long_value: Some(7),
                ..Default::default()
            }),
            Cell::Integer(7)
        );
        assert_eq!(
            decode_field(&WireField {
                double_value: Some(1.5),
                ..Default::default()
            }),
            Cell::Double(1.5)
        );
        assert_eq!(decode_field(&WireField::default()), Cell::Null);
        assert_eq!(
            decode_field(&WireField {
                is_null: Some(true),
                ..Default::default()
            }),
            Cell::Null
        );
    }

    #[test]
    fn test_decode_empty_string_is_kept() {
        // Empty strings are only treated as missing by the null check
        assert_eq!(decode_field(&string("")), Cell::from(""));
    }

    #[test]
    fn test_decode_result_preserves_order() {
        let raw = RawResult {
            column_metadata: vec![ColumnMetadata::new("sku_id"), ColumnMetadata::new("cost")],
            records: vec![
                vec![string("B"), string("2.0")],
                vec![string("A"), string("1.0")],
                vec![string("B"), string("2.0")],
            ],
        };
        let table = decode_result(raw).unwrap();
        assert_eq!(table.columns(), &["sku_id".to_string(), "cost".to_string()]);
        let skus: Vec<_> = table.column("sku_id").unwrap().cloned().collect();
        assert_eq!(skus, vec![Cell::from("B"), Cell::from("A"), Cell::from("B")]);
    }

    #[test]
    fn test_decode_result_keeps_repeated_labels() {
        let raw = RawResult {
            column_metadata: vec![ColumnMetadata::new("?column?"), ColumnMetadata::new("?column?")],
            records: vec![vec![string("1"), string("2")]],
        };
        let table = decode_result(raw).unwrap();
        assert_eq!(table.columns(), &["?column?".to_string(), "?column?".to_string()]);
        assert_eq!(table.rows()[0], vec![Cell::from("1"), Cell::from("2")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_materialize_retries_throttled_fetch() {
        let service = Arc::new(FlakyResults::new(
            vec![Err(WarehouseError::Throttled("429".into()))],
            one_row(),
        ));
        let started = tokio::time::Instant::now();

        let table = materializer(service.clone(), 5)
            .materialize(&JobHandle::new("j"))
            .await
            .unwrap();

        assert_eq!(table.rows()[0], vec![Cell::Integer(3)]);
        assert_eq!(service.fetches(), 2);
        assert_eq!(started.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_materialize_gives_up_at_ceiling() {
        let unavailable = || Err(WarehouseError::Transient("result not ready".into()));
        let service = Arc::new(FlakyResults::new(
            vec![unavailable(), unavailable(), unavailable()],
            one_row(),
        ));

        let err = materializer(service.clone(), 2)
            .materialize(&JobHandle::new("j"))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            MaterializeError::Service {
                handle: JobHandle::new("j"),
                source: WarehouseError::Transient("result not ready".into()),
            }
        );
        assert_eq!(service.fetches(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_materialize_fatal_error_is_not_retried() {
        let service = Arc::new(FlakyResults::new(
            vec![Err(WarehouseError::NotFound("statement j".into()))],
            one_row(),
        ));

        let err = materializer(service.clone(), 5)
            .materialize(&JobHandle::new("j"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            MaterializeError::Service {
                source: WarehouseError::NotFound(_),
                ..
            }
        ));
        assert_eq!(service.fetches(), 1);
    }

    #[test]
    fn test_decode_result_rejects_ragged_rows() {
        let raw = RawResult {
            column_metadata: vec![ColumnMetadata::new("a"), ColumnMetadata::new("b")],
            records: vec![vec![string("x")]],
        };
        assert!(matches!(
            decode_result(raw),
            Err(sluice_core::Error::RowWidthMismatch { row: 0, .. })
        ));
    }
}
