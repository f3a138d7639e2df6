//! Blob Store bulk loads
//!
//! Files in the blob store are pipe-delimited with a one-line header and
//! are loaded through the warehouse's own COPY statement, so the blob store
//! never talks to the pipeline directly.

use crate::{Error, Result};
use sluice_core::sql;

/// Credentials the warehouse uses to read from the blob store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobStoreConfig {
    /// Role the warehouse assumes for the COPY
    pub iam_role: String,

    /// Bucket region, when it differs from the cluster's
    pub region: Option<String>,
}

impl BlobStoreConfig {
    pub fn new(iam_role: impl Into<String>) -> Self {
        Self {
            iam_role: iam_role.into(),
            region: None,
        }
    }

    /// Load from `SLUICE_BLOB_IAM_ROLE` and the optional `SLUICE_BLOB_REGION`
    pub fn from_env() -> Result<Self> {
        let iam_role = std::env::var("SLUICE_BLOB_IAM_ROLE")
            .map_err(|_| Error::Configuration("SLUICE_BLOB_IAM_ROLE not set".into()))?;
        let region = std::env::var("SLUICE_BLOB_REGION")
            .ok()
            .filter(|r| !r.trim().is_empty());

        let config = Self { iam_role, region };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.iam_role.starts_with("arn:") {
            return Err(Error::Configuration(
                "iam_role must be an ARN (arn:...)".into(),
            ));
        }
        Ok(())
    }
}

/// Builds bulk-load statements from blob paths
#[derive(Debug, Clone)]
pub struct BlobStore {
    config: BlobStoreConfig,
}

impl BlobStore {
    pub fn new(config: BlobStoreConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BlobStoreConfig {
        &self.config
    }

    /// COPY statement loading the file at `path` into `table`
    pub fn load_statement(&self, table: &str, path: &str) -> Result<String> {
        validate_path(path)?;
        Ok(sql::copy_from_blob(
            table,
            path,
            &self.config.iam_role,
            self.config.region.as_deref(),
        ))
    }
}

/// A blob path must carry a scheme and a non-empty location
pub fn validate_path(path: &str) -> Result<()> {
    match path.split_once("://") {
        Some((scheme, rest))
            if !scheme.is_empty()
                && scheme.chars().all(|c| c.is_ascii_alphanumeric())
                && !rest.is_empty() =>
        {
            Ok(())
        }
        _ => Err(Error::Configuration(format!(
            "blob path '{}' must look like scheme://bucket/key",
            path
        ))),
    }
}
