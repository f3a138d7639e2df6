//! # Sluice Core
//!
//! Pure data structures and rules for the Sluice warehouse pipeline:
//! materialized tabular results, data quality checks, table catalog
//! definitions, staging plans and the SQL text the runtime submits.

pub mod catalog;
pub mod quality;
pub mod sql;
pub mod staging;
pub mod table;

// Re-export commonly used types
pub use catalog::{AggregateSpec, ColumnSpec, ColumnType, SumColumn, TableDefinition};
pub use quality::{CheckType, FindingKind, ValidationFinding};
pub use staging::{StagingPlan, StagingTableSpec};
pub use table::{Cell, TabularResult};

/// Result type for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for core operations
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum Error {
    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    #[error("Ambiguous column: {0} appears more than once")]
    AmbiguousColumn(String),

    #[error("Row {row} has {actual} cells but the table has {expected} columns")]
    RowWidthMismatch {
        row: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid check: {0}")]
    InvalidCheck(String),

    #[error("Staging graph error: {0}")]
    Graph(String),
}
