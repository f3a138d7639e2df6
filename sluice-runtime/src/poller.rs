//! Completion polling with a bounded retry ceiling
//!
//! A [`JobPoller`] tracks exactly one job handle. Each poll either ends the
//! wait (FINISHED or FAILED), or counts as one attempt and schedules the
//! next poll after the policy's delay. Responses that only say "not ready
//! yet" are never failures; running out of attempts is.

use crate::metrics::{POLL_ATTEMPTS_TOTAL, STATEMENT_WAIT_DURATION};
use crate::retry::RetryPolicy;
use crate::warehouse::{
    JobHandle, JobStatus, PollResponse, WarehouseError, WarehouseService, WarehouseTarget,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// Errors that end a wait without a FINISHED status
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum PollError {
    #[error("Statement {handle} failed: {reason}")]
    JobFailed { handle: JobHandle, reason: String },

    #[error("Statement {handle} did not finish after {attempts} polls")]
    Exhausted { handle: JobHandle, attempts: u32 },

    #[error("Polling statement {handle} failed: {source}")]
    Service {
        handle: JobHandle,
        #[source]
        source: WarehouseError,
    },
}

impl PollError {
    pub fn handle(&self) -> &JobHandle {
        match self {
            PollError::JobFailed { handle, .. }
            | PollError::Exhausted { handle, .. }
            | PollError::Service { handle, .. } => handle,
        }
    }

    fn outcome_label(&self) -> &'static str {
        match self {
            PollError::JobFailed { .. } => "failed",
            PollError::Exhausted { .. } => "exhausted",
            PollError::Service { .. } => "error",
        }
    }
}

/// Creates per-job pollers sharing one service, target and policy
#[derive(Clone)]
pub struct CompletionPoller {
    service: Arc<dyn WarehouseService>,
    target: WarehouseTarget,
    policy: RetryPolicy,
}

impl CompletionPoller {
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

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Start tracking one job
    pub fn track(&self, handle: JobHandle) -> JobPoller {
        JobPoller {
            service: self.service.clone(),
            target: self.target.clone(),
            policy: self.policy.clone(),
            handle,
            attempts: 0,
            last_status: JobStatus::Submitted,
        }
    }

    /// Wait for one job to reach a terminal state
    pub async fn await_completion(&self, handle: &JobHandle) -> Result<JobStatus, PollError> {
        self.track(handle.clone()).await_completion().await
    }

    /// Wait for two independently submitted jobs.
    ///
    /// Both pollers run concurrently and both are waited out, since a
    /// submitted statement cannot be cancelled. Joint success needs both
    /// FINISHED; otherwise the first job's error wins, then the second's.
    pub async fn await_both(
        &self,
        first: &JobHandle,
        second: &JobHandle,
    ) -> Result<(JobStatus, JobStatus), PollError> {
        let (a, b) = tokio::join!(
            self.track(first.clone()).await_completion(),
            self.track(second.clone()).await_completion(),
        );

        match (a, b) {
            (Ok(a), Ok(b)) => Ok((a, b)),
            (Err(e), other) => {
                if let Err(sibling) = other {
                    warn!(error = %sibling, "Sibling statement also failed");
                }
                Err(e)
            }
            (Ok(_), Err(e)) => Err(e),
        }
    }
}

/// Bounded retry state for a single job handle
pub struct JobPoller {
    service: Arc<dyn WarehouseService>,
    target: WarehouseTarget,
    policy: RetryPolicy,
    handle: JobHandle,
    attempts: u32,
    last_status: JobStatus,
}

impl JobPoller {
    pub fn handle(&self) -> &JobHandle {
        &self.handle
    }

    /// Polls made so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Last non-terminal status observed
    pub fn last_status(&self) -> JobStatus {
        self.last_status
    }

    /// Poll until FINISHED, FAILED, a fatal service error, or the ceiling
    #[instrument(
        name = "poller.await_completion",
        skip(self),
        fields(
            statement_id = %self.handle,
            max_attempts = self.policy.max_attempts,
        )
    )]
    pub async fn await_completion(mut self) -> Result<JobStatus, PollError> {
        let started = Instant::now();
        let result = self.run().await;

        let outcome = match &result {
            Ok(status) => status.as_str(),
            Err(e) => e.outcome_label(),
        };
        STATEMENT_WAIT_DURATION
            .with_label_values(&[outcome])
            .observe(started.elapsed().as_secs_f64());

        match &result {
            Ok(_) => debug!(attempts = self.attempts, "Statement finished"),
            Err(e) => error!(attempts = self.attempts, error = %e, "Statement did not finish"),
        }
        result
    }

    async fn run(&mut self) -> Result<JobStatus, PollError> {
        loop {
            self.attempts += 1;

            match self.service.poll_status(&self.target, &self.handle).await {
                Ok(response) => {
                    POLL_ATTEMPTS_TOTAL
                        .with_label_values(&[response.kind()])
                        .inc();

                    match response {
                        PollResponse::Status {
                            status: JobStatus::Finished,
                            ..
                        } => return Ok(JobStatus::Finished),
                        PollResponse::Status {
                            status: JobStatus::Failed,
                            error,
                        } => {
                            return Err(PollError::JobFailed {
                                handle: self.handle.clone(),
                                reason: error.unwrap_or_else(|| "no error reported".to_string()),
                            });
                        }
                        PollResponse::Status { status, .. } => {
                            self.last_status = status;
                            debug!(attempt = self.attempts, status = %status, "Statement still in progress");
                        }
                        PollResponse::TransientUnavailable => {
                            info!(
                                attempt = self.attempts,
                                "Statement has no result yet, waiting"
                            );
                        }
                    }
                }
                Err(e) if e.is_transient() => {
                    POLL_ATTEMPTS_TOTAL.with_label_values(&["error"]).inc();
                    warn!(attempt = self.attempts, error = %e, "Transient error while polling");
                }
                Err(e) => {
                    POLL_ATTEMPTS_TOTAL.with_label_values(&["error"]).inc();
                    return Err(PollError::Service {
                        handle: self.handle.clone(),
                        source: e,
                    });
                }
            }

            if !self.policy.should_retry(self.attempts) {
                return Err(PollError::Exhausted {
                    handle: self.handle.clone(),
                    attempts: self.attempts,
                });
            }

            tokio::time::sleep(self.policy.calculate_delay(self.attempts - 1)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warehouse::RawResult;
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Replays a fixed script of poll responses per handle
    #[derive(Default)]
    struct ScriptedWarehouse {
        scripts: Mutex<HashMap<String, VecDeque<Result<PollResponse, WarehouseError>>>>,
        polls: Mutex<HashMap<String, u32>>,
    }

    impl ScriptedWarehouse {
        fn script(self, id: &str, responses: Vec<Result<PollResponse, WarehouseError>>) -> Self {
            self.scripts
                .lock()
                .unwrap()
                .insert(id.to_string(), responses.into());
            self
        }

        fn polls(&self, id: &str) -> u32 {
            self.polls.lock().unwrap().get(id).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl WarehouseService for ScriptedWarehouse {
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
            handle: &JobHandle,
        ) -> Result<PollResponse, WarehouseError> {
            *self
                .polls
                .lock()
                .unwrap()
                .entry(handle.to_string())
                .or_insert(0) += 1;
            self.scripts
                .lock()
                .unwrap()
                .get_mut(handle.as_str())
                .and_then(|s| s.pop_front())
                .unwrap_or(Ok(PollResponse::TransientUnavailable))
        }

        async fn fetch_result(
            &self,
            _target: &WarehouseTarget,
            _handle: &JobHandle,
        ) -> Result<RawResult, WarehouseError> {
            Ok(RawResult::default())
        }
    }

    fn target() -> WarehouseTarget {
        WarehouseTarget {
            cluster_identifier: "analytics".into(),
            database: "dev".into(),
            secret_arn: "arn:aws:secretsmanager:secret".into(),
        }
    }

    fn unavailable_then_finished(n: usize) -> Vec<Result<PollResponse, WarehouseError>> {
        let mut responses: Vec<_> = (0..n - 1)
            .map(|_| Ok(PollResponse::TransientUnavailable))
            .collect();
        responses.push(Ok(PollResponse::status(JobStatus::Finished)));
        responses
    }

    fn poller(service: Arc<ScriptedWarehouse>, max_attempts: u32) -> CompletionPoller {
        CompletionPoller::new(
            service,
            target(),
            RetryPolicy::fixed(max_attempts, Duration::from_secs(30)),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_when_ceiling_covers_polls() {
        let service = Arc::new(ScriptedWarehouse::default().script("job", unavailable_then_finished(4)));
        let status = poller(service.clone(), 4)
            .await_completion(&JobHandle::new("job"))
            .await
            .unwrap();

        assert_eq!(status, JobStatus::Finished);
        assert_eq!(service.polls("job"), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_when_ceiling_too_low() {
        let service = Arc::new(ScriptedWarehouse::default().script("job", unavailable_then_finished(4)));
        let err = poller(service.clone(), 3)
            .await_completion(&JobHandle::new("job"))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            PollError::Exhausted {
                handle: JobHandle::new("job"),
                attempts: 3
            }
        );
        assert_eq!(service.polls("job"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_the_configured_delay() {
        let service = Arc::new(ScriptedWarehouse::default().script("job", unavailable_then_finished(3)));
        let started = tokio::time::Instant::now();
        poller(service, 5)
            .await_completion(&JobHandle::new("job"))
            .await
            .unwrap();
        assert_eq!(started.elapsed(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_status_counts_as_attempt() {
        let service = Arc::new(ScriptedWarehouse::default().script(
            "job",
            vec![
                Ok(PollResponse::status(JobStatus::Submitted)),
                Ok(PollResponse::status(JobStatus::Running)),
                Ok(PollResponse::status(JobStatus::Finished)),
            ],
        ));
        let mut job = poller(service, 2).track(JobHandle::new("job"));
        assert_eq!(job.attempts(), 0);
        let err = job.run().await.unwrap_err();
        assert!(matches!(err, PollError::Exhausted { attempts: 2, .. }));
        assert_eq!(job.last_status(), JobStatus::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_job_returns_immediately() {
        let service = Arc::new(ScriptedWarehouse::default().script(
            "job",
            vec![
                Ok(PollResponse::TransientUnavailable),
                Ok(PollResponse::failed("relation does not exist")),
            ],
        ));
        let err = poller(service.clone(), 10)
            .await_completion(&JobHandle::new("job"))
            .await
            .unwrap_err();

        match err {
            PollError::JobFailed { reason, .. } => assert_eq!(reason, "relation does not exist"),
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(service.polls("job"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_service_errors_are_retried() {
        let service = Arc::new(ScriptedWarehouse::default().script(
            "job",
            vec![
                Err(WarehouseError::Throttled("slow down".into())),
                Ok(PollResponse::status(JobStatus::Finished)),
            ],
        ));
        let status = poller(service, 3)
            .await_completion(&JobHandle::new("job"))
            .await
            .unwrap();
        assert_eq!(status, JobStatus::Finished);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_service_error_stops_polling() {
        let service = Arc::new(ScriptedWarehouse::default().script(
            "job",
            vec![Err(WarehouseError::NotFound("unknown statement".into()))],
        ));
        let err = poller(service.clone(), 5)
            .await_completion(&JobHandle::new("job"))
            .await
            .unwrap_err();
        assert!(matches!(err, PollError::Service { .. }));
        assert_eq!(service.polls("job"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_both_requires_both_finished() {
        let service = Arc::new(
            ScriptedWarehouse::default()
                .script("fact", unavailable_then_finished(2))
                .script("dim", unavailable_then_finished(3)),
        );
        let (a, b) = poller(service, 5)
            .await_both(&JobHandle::new("fact"), &JobHandle::new("dim"))
            .await
            .unwrap();
        assert_eq!((a, b), (JobStatus::Finished, JobStatus::Finished));
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_both_fails_if_either_fails() {
        let service = Arc::new(
            ScriptedWarehouse::default()
                .script("fact", unavailable_then_finished(3))
                .script("dim", vec![Ok(PollResponse::failed("disk full"))]),
        );
        let err = poller(service.clone(), 5)
            .await_both(&JobHandle::new("fact"), &JobHandle::new("dim"))
            .await
            .unwrap_err();

        assert_eq!(err.handle(), &JobHandle::new("dim"));
        // The sibling is still waited out to its terminal state
        assert_eq!(service.polls("fact"), 3);
    }
}
