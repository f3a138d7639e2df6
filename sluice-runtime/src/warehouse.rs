//! Warehouse service abstraction
//!
//! The warehouse executes SQL asynchronously: a statement is submitted and
//! a job handle comes back immediately, then the caller polls the handle
//! until the job finishes and fetches the result payload.
//!
//! Implementations only move bytes; retry and decoding live in the poller
//! and the materializer.

use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sluice_core::Cell;
use std::fmt;

/// Opaque identifier issued by the warehouse when a statement is accepted
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobHandle(String);

impl JobHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of a submitted statement. FINISHED and FAILED are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Submitted,
    #[serde(alias = "PICKED", alias = "STARTED")]
    Running,
    Finished,
    #[serde(alias = "ABORTED")]
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Finished | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Submitted => "submitted",
            JobStatus::Running => "running",
            JobStatus::Finished => "finished",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Answer to a single status poll
#[derive(Debug, Clone, PartialEq)]
pub enum PollResponse {
    /// The job is known and reports a status; `error` is set for failures
    Status {
        status: JobStatus,
        error: Option<String>,
    },

    /// The job was accepted but has no result cursor yet. Not a failure.
    TransientUnavailable,
}

impl PollResponse {
    pub fn status(status: JobStatus) -> Self {
        PollResponse::Status {
            status,
            error: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        PollResponse::Status {
            status: JobStatus::Failed,
            error: Some(reason.into()),
        }
    }

    /// Label for metrics and logging
    pub fn kind(&self) -> &'static str {
        match self {
            PollResponse::Status { status, .. } => status.as_str(),
            PollResponse::TransientUnavailable => "unavailable",
        }
    }
}

/// Column metadata of a result payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMetadata {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
}

impl ColumnMetadata {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            type_name: None,
        }
    }
}

/// One cell on the wire: at most one value tag is expected to be set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireField {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long_value: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub double_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_null: Option<bool>,
}

impl From<&Cell> for WireField {
    fn from(cell: &Cell) -> Self {
        match cell {
            Cell::String(s) => WireField {
                string_value: Some(s.clone()),
                ..Default::default()
            },
            Cell::Integer(v) => WireField {
                long_value: Some(*v),
                ..Default::default()
            },
            Cell::Double(v) => WireField {
                double_value: Some(*v),
                ..Default::default()
            },
            Cell::Null => WireField {
                is_null: Some(true),
                ..Default::default()
            },
        }
    }
}

/// Raw result payload of a finished statement
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawResult {
    #[serde(default)]
    pub column_metadata: Vec<ColumnMetadata>,
    #[serde(default)]
    pub records: Vec<Vec<WireField>>,
}

/// Cluster, database and credential reference for every warehouse call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarehouseTarget {
    pub cluster_identifier: String,
    pub database: String,
    pub secret_arn: String,
}

impl WarehouseTarget {
    /// Load from `SLUICE_CLUSTER_ID`, `SLUICE_DATABASE` and `SLUICE_SECRET_ARN`
    pub fn from_env() -> Result<Self> {
        let cluster_identifier = std::env::var("SLUICE_CLUSTER_ID")
            .map_err(|_| Error::Configuration("SLUICE_CLUSTER_ID not set".into()))?;
        let database = std::env::var("SLUICE_DATABASE")
            .map_err(|_| Error::Configuration("SLUICE_DATABASE not set".into()))?;
        let secret_arn = std::env::var("SLUICE_SECRET_ARN")
            .map_err(|_| Error::Configuration("SLUICE_SECRET_ARN not set".into()))?;

        let target = Self {
            cluster_identifier,
            database,
            secret_arn,
        };
        target.validate()?;
        Ok(target)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cluster_identifier.trim().is_empty() {
            return Err(Error::Configuration(
                "cluster_identifier cannot be empty".into(),
            ));
        }
        if self.database.trim().is_empty() {
            return Err(Error::Configuration("database cannot be empty".into()));
        }
        if !self.secret_arn.starts_with("arn:") {
            return Err(Error::Configuration(
                "secret_arn must be an ARN (arn:...)".into(),
            ));
        }
        Ok(())
    }
}

/// Errors reported by a warehouse service implementation
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum WarehouseError {
    #[error("Statement rejected: {0}")]
    Rejected(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Transient warehouse error: {0}")]
    Transient(String),

    #[error("Throttled: {0}")]
    Throttled(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl WarehouseError {
    /// Whether retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, WarehouseError::Transient(_) | WarehouseError::Throttled(_))
    }
}

/// Client for a warehouse that executes SQL with submit-then-poll semantics.
///
/// The connection is a stateless, shareable handle; all mutation happens
/// server-side.
#[async_trait]
pub trait WarehouseService: Send + Sync {
    /// Submit a statement and return its job handle without waiting
    async fn submit_statement(
        &self,
        target: &WarehouseTarget,
        sql: &str,
    ) -> std::result::Result<JobHandle, WarehouseError>;

    /// Query the current state of a job
    async fn poll_status(
        &self,
        target: &WarehouseTarget,
        handle: &JobHandle,
    ) -> std::result::Result<PollResponse, WarehouseError>;

    /// Fetch the result payload of a finished job
    async fn fetch_result(
        &self,
        target: &WarehouseTarget,
        handle: &JobHandle,
    ) -> std::result::Result<RawResult, WarehouseError>;
}
