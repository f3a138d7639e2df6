//! # Sluice Warehouse
//!
//! HTTP adapter for a warehouse statement gateway. Implements the runtime's
//! `WarehouseService` seam over three JSON endpoints:
//!
//! - `POST /statements` submits SQL and returns the statement id
//! - `GET /statements/{id}` describes the statement's status
//! - `GET /statements/{id}/result` returns columns and records

pub mod client;
pub mod config;

// Re-export commonly used types
pub use client::HttpWarehouse;
pub use config::GatewayConfig;

/// Result type for gateway setup
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for gateway setup
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}
