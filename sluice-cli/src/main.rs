//! Sluice CLI tool
//!
//! Runs the warehouse pipeline once. All settings come from the
//! environment; the process exits non-zero only on a fatal error, never on
//! data quality findings.

use anyhow::Context;
use clap::Parser;
use sluice_runtime::{BlobStore, PipelineController, WarehouseSession};
use sluice_warehouse::HttpWarehouse;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;

use config::AppConfig;

#[derive(Parser)]
#[command(name = "sluice")]
#[command(author, version, about = "Load, validate and stage warehouse tables", long_about = None)]
struct Cli {}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "sluice_cli=info,sluice_runtime=info,sluice_warehouse=info".into());
    let registry = tracing_subscriber::registry().with(env_filter);

    match std::env::var("SLUICE_LOG_FORMAT").as_deref() {
        Ok("json") => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        _ => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _cli = Cli::parse();
    init_tracing();

    let config = AppConfig::load().context("Failed to load configuration")?;
    info!(
        cluster = %config.target.cluster_identifier,
        database = %config.target.database,
        max_attempts = config.retry.max_attempts,
        "Starting Sluice pipeline"
    );

    let warehouse =
        HttpWarehouse::new(&config.gateway).context("Failed to create gateway client")?;
    let session = WarehouseSession::new(Arc::new(warehouse), config.target, config.retry);
    let controller =
        PipelineController::new(session, BlobStore::new(config.blob), config.pipeline);

    let report = match controller.run().await {
        Ok(report) => report,
        Err(e) => {
            let reached: Vec<&str> = e.report.history.iter().map(|(s, _)| s.as_str()).collect();
            error!(
                failed_stage = %e.stage,
                reached = ?reached,
                findings = e.report.findings.len(),
                "Pipeline stopped"
            );
            return Err(e).context("Pipeline run failed");
        }
    };

    for finding in &report.findings {
        warn!(
            table = %finding.table,
            kind = %finding.kind,
            offending_rows = finding.offending_count(),
            "Data quality finding"
        );
    }
    info!(
        final_state = %report.final_state,
        findings = report.findings.len(),
        staged_tables = report.staged_tables.len(),
        bulk_loaded = report.bulk_loaded,
        "Pipeline finished"
    );
    Ok(())
}
