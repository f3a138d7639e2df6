//! Shared test utilities for Sluice crates
//!
//! This crate provides:
//! - **Mocks**: `MockWarehouse`, an in-memory warehouse that runs the
//!   pipeline's SQL and scripts poll latency, failures and rejections
//! - **Fixtures**: base table blobs and rows, targets and policies
//!
//! # Example
//!
//! ```ignore
//! use sluice_tests::{fixtures, MockWarehouse};
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_pipeline() {
//!     let warehouse = Arc::new(MockWarehouse::new());
//!     warehouse.put_blob("s3://sluice-landing/fact_avgs_tbl.txt", &fixtures::fact::clean_blob());
//!     // ...
//! }
//! ```

pub mod fixtures;
pub mod mocks;

// Re-export commonly used items
pub use fixtures::{dimension, fact, target, transactions};
pub use mocks::MockWarehouse;

use sluice_runtime::{BlobStore, PipelineController, WarehouseSession};
use std::sync::Arc;

/// A mock warehouse holding the transaction table and both landing blobs
pub fn landing_warehouse(fact_blob: &str, dimension_blob: &str) -> Arc<MockWarehouse> {
    let warehouse = Arc::new(MockWarehouse::new());
    let config = target::pipeline();
    warehouse.seed_table(&transactions::definition(), transactions::rows());
    warehouse.put_blob(&config.fact_blob_path, fact_blob);
    warehouse.put_blob(&config.dimension_blob_path, dimension_blob);
    warehouse
}

pub fn session(warehouse: &Arc<MockWarehouse>, max_attempts: u32) -> WarehouseSession {
    WarehouseSession::new(
        warehouse.clone(),
        target::analytics(),
        target::policy(max_attempts),
    )
}

/// Controller over the mock with default config and the given retry ceiling
pub fn controller(warehouse: &Arc<MockWarehouse>, max_attempts: u32) -> PipelineController {
    PipelineController::new(
        session(warehouse, max_attempts),
        BlobStore::new(target::blob_store()),
        target::pipeline(),
    )
}
