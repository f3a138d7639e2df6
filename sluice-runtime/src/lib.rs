//! # Sluice Runtime
//!
//! Asynchronous execution runtime for the Sluice pipeline: statement
//! submission, bounded completion polling, result materialization, schema
//! orchestration and the pipeline controller that sequences them.

pub mod blob;
pub mod controller;
pub mod executor;
pub mod materializer;
pub mod metrics;
pub mod poller;
pub mod retry;
pub mod schema;
pub mod session;
pub mod state_machine;
pub mod warehouse;

// Re-export commonly used types
pub use blob::{BlobStore, BlobStoreConfig};
pub use controller::{
    PipelineConfig, PipelineController, PipelineError, PipelineReport, StageError,
};
pub use executor::{StatementExecutor, SubmissionError};
pub use materializer::{MaterializeError, ResultMaterializer};
pub use poller::{CompletionPoller, JobPoller, PollError};
pub use retry::{RetryPolicy, RetryStrategy};
pub use schema::{EnsureOutcome, SchemaError, SchemaOrchestrator};
pub use session::{StatementError, WarehouseSession};
pub use state_machine::{PipelineState, PipelineStateMachine};
pub use warehouse::{
    JobHandle, JobStatus, PollResponse, RawResult, WarehouseError, WarehouseService,
    WarehouseTarget,
};

/// Result type for runtime configuration and bookkeeping
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for runtime configuration and bookkeeping
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}
