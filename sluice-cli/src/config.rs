//! CLI configuration management

use anyhow::Context;
use sluice_runtime::{BlobStoreConfig, PipelineConfig, RetryPolicy, WarehouseTarget};
use sluice_warehouse::GatewayConfig;

/// Everything a pipeline run needs, loaded from the environment
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub target: WarehouseTarget,
    pub gateway: GatewayConfig,
    pub blob: BlobStoreConfig,
    pub retry: RetryPolicy,
    pub pipeline: PipelineConfig,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        Ok(Self {
            target: WarehouseTarget::from_env().context("Invalid warehouse target")?,
            gateway: GatewayConfig::from_env().context("Invalid gateway configuration")?,
            blob: BlobStoreConfig::from_env().context("Invalid blob store configuration")?,
            retry: RetryPolicy::from_env().context("Invalid polling configuration")?,
            pipeline: PipelineConfig::from_env().context("Invalid pipeline configuration")?,
        })
    }
}
