//! Submit, wait and fetch as one call
//!
//! A session bundles the executor, poller and materializer for one
//! warehouse target. Paired calls submit two independent statements and
//! only return once both have been waited out.

use crate::executor::{StatementExecutor, SubmissionError};
use crate::materializer::{MaterializeError, ResultMaterializer};
use crate::poller::{CompletionPoller, PollError};
use crate::retry::RetryPolicy;
use crate::warehouse::{JobHandle, JobStatus, WarehouseService, WarehouseTarget};
use sluice_core::TabularResult;
use std::sync::Arc;
use tracing::warn;

/// Any failure on the way from SQL text to a finished statement
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum StatementError {
    #[error(transparent)]
    Submission(#[from] SubmissionError),

    #[error(transparent)]
    Poll(#[from] PollError),

    #[error(transparent)]
    Materialize(#[from] MaterializeError),
}

#[derive(Clone)]
pub struct WarehouseSession {
    executor: StatementExecutor,
    poller: CompletionPoller,
    materializer: ResultMaterializer,
}

impl WarehouseSession {
    pub fn new(
        service: Arc<dyn WarehouseService>,
        target: WarehouseTarget,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            executor: StatementExecutor::new(service.clone(), target.clone()),
            poller: CompletionPoller::new(service.clone(), target.clone(), policy.clone()),
            materializer: ResultMaterializer::new(service, target, policy),
        }
    }

    pub fn executor(&self) -> &StatementExecutor {
        &self.executor
    }

    pub fn poller(&self) -> &CompletionPoller {
        &self.poller
    }

    pub fn materializer(&self) -> &ResultMaterializer {
        &self.materializer
    }

    /// Run a statement to completion, discarding any result
    pub async fn execute(&self, sql: &str) -> Result<JobStatus, StatementError> {
        let handle = self.executor.submit(sql).await?;
        Ok(self.poller.await_completion(&handle).await?)
    }

    /// Run a statement to completion and fetch its result
    pub async fn query(&self, sql: &str) -> Result<TabularResult, StatementError> {
        let handle = self.executor.submit(sql).await?;
        self.poller.await_completion(&handle).await?;
        Ok(self.materializer.materialize(&handle).await?)
    }

    /// Run two independent statements concurrently
    pub async fn execute_pair(&self, first: &str, second: &str) -> Result<(), StatementError> {
        let (a, b) = self.submit_pair(first, second).await?;
        self.poller.await_both(&a, &b).await?;
        Ok(())
    }

    /// Run two independent queries concurrently and fetch both results
    pub async fn query_pair(
        &self,
        first: &str,
        second: &str,
    ) -> Result<(TabularResult, TabularResult), StatementError> {
        let (a, b) = self.submit_pair(first, second).await?;
        self.poller.await_both(&a, &b).await?;
        let (left, right) = tokio::try_join!(
            self.materializer.materialize(&a),
            self.materializer.materialize(&b),
        )?;
        Ok((left, right))
    }

    /// Submit both statements. If the second is rejected, the first job is
    /// still waited out before the rejection is returned.
    async fn submit_pair(
        &self,
        first: &str,
        second: &str,
    ) -> Result<(JobHandle, JobHandle), StatementError> {
        let a = self.executor.submit(first).await?;
        match self.executor.submit(second).await {
            Ok(b) => Ok((a, b)),
            Err(e) => {
                if let Err(sibling) = self.poller.await_completion(&a).await {
                    warn!(error = %sibling, "Sibling statement also failed");
                }
                Err(e.into())
            }
        }
    }
}
