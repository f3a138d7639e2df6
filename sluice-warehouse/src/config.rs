//! Gateway configuration loading and validation.

use crate::{Error, Result};
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Connection settings for the statement gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    /// Base URL, e.g. `https://gateway.internal:8443`
    pub endpoint: String,
    pub request_timeout: Duration,
}

impl GatewayConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Load from `SLUICE_GATEWAY_URL` and the optional
    /// `SLUICE_GATEWAY_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self> {
        let endpoint = std::env::var("SLUICE_GATEWAY_URL")
            .map_err(|_| Error::Configuration("SLUICE_GATEWAY_URL not set".into()))?;
        let request_timeout = match std::env::var("SLUICE_GATEWAY_TIMEOUT_SECS") {
            Ok(v) => Duration::from_secs(v.parse().map_err(|_| {
                Error::Configuration(format!(
                    "SLUICE_GATEWAY_TIMEOUT_SECS must be an integer, got '{}'",
                    v
                ))
            })?),
            Err(_) => Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        };

        let cfg = Self {
            endpoint,
            request_timeout,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.endpoint.starts_with("https://") && !self.endpoint.starts_with("http://") {
            return Err(Error::Configuration(
                "endpoint must be a valid HTTP(S) URL".into(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(Error::Configuration(
                "request_timeout must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
