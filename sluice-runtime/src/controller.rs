//! Pipeline controller
//!
//! Drives one run through the stages of [`PipelineState`]: ensure the base
//! tables, bulk-load them if empty, fetch and validate them, rebuild the
//! staging schema and create the aggregate table. A fatal error stops the
//! run where it happened. Nothing is rolled back; every stage is safe to
//! re-run from the top.

use crate::blob::{validate_path, BlobStore};
use crate::metrics::VALIDATION_FINDINGS_TOTAL;
use crate::schema::{SchemaError, SchemaOrchestrator};
use crate::session::{StatementError, WarehouseSession};
use crate::state_machine::{PipelineState, PipelineStateMachine};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sluice_core::catalog::{fact_avgs_table, hier_prod_table, weekly_sales_aggregate};
use sluice_core::quality::run_check;
use sluice_core::staging::hierarchy_staging_plan;
use sluice_core::{sql, CheckType, TabularResult, ValidationFinding};
use tracing::{error, info, instrument, warn};

/// Rows shown when previewing a fetched table or a finding
const PREVIEW_ROWS: usize = 5;

/// Table names, blob paths and check columns for a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Schema holding the base, transaction and aggregate tables
    pub base_schema: String,
    pub fact_table: String,
    pub dimension_table: String,
    /// Source of the weekly sales aggregate
    pub transaction_table: String,
    pub aggregate_table: String,
    pub staging_schema: String,
    pub fact_blob_path: String,
    pub dimension_blob_path: String,
    pub primary_key: Vec<String>,
    /// Column joining the fact table to the dimension table
    pub join_column: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            base_schema: "public".to_string(),
            fact_table: "fact_avgs_tbl".to_string(),
            dimension_table: "hier_prod_tbl".to_string(),
            transaction_table: "fact_trans_tbl".to_string(),
            aggregate_table: "mview_weekly_sales".to_string(),
            staging_schema: "stages".to_string(),
            fact_blob_path: "s3://sluice-landing/fact_avgs_tbl.txt".to_string(),
            dimension_blob_path: "s3://sluice-landing/hier_prod_tbl.txt".to_string(),
            primary_key: vec!["sku_id".to_string()],
            join_column: "sku_id".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Load overrides from `SLUICE_*` variables on top of the defaults
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let var = |name: &str, default: String| std::env::var(name).unwrap_or(default);

        let primary_key = match std::env::var("SLUICE_PRIMARY_KEY") {
            Ok(v) => v
                .split(',')
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect(),
            Err(_) => defaults.primary_key.clone(),
        };

        let config = Self {
            base_schema: var("SLUICE_BASE_SCHEMA", defaults.base_schema),
            fact_table: var("SLUICE_FACT_TABLE", defaults.fact_table),
            dimension_table: var("SLUICE_DIMENSION_TABLE", defaults.dimension_table),
            transaction_table: var("SLUICE_TRANSACTION_TABLE", defaults.transaction_table),
            aggregate_table: var("SLUICE_AGGREGATE_TABLE", defaults.aggregate_table),
            staging_schema: var("SLUICE_STAGING_SCHEMA", defaults.staging_schema),
            fact_blob_path: var("SLUICE_FACT_BLOB_PATH", defaults.fact_blob_path),
            dimension_blob_path: var("SLUICE_DIMENSION_BLOB_PATH", defaults.dimension_blob_path),
            primary_key,
            join_column: var("SLUICE_JOIN_COLUMN", defaults.join_column),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let identifiers = [
            ("base_schema", &self.base_schema),
            ("fact_table", &self.fact_table),
            ("dimension_table", &self.dimension_table),
            ("transaction_table", &self.transaction_table),
            ("aggregate_table", &self.aggregate_table),
            ("staging_schema", &self.staging_schema),
            ("join_column", &self.join_column),
        ];
        for (field, value) in identifiers {
            validate_identifier(field, value)?;
        }

        if self.primary_key.is_empty() {
            return Err(Error::Configuration(
                "primary_key needs at least one column".into(),
            ));
        }
        for column in &self.primary_key {
            validate_identifier("primary_key", column)?;
        }

        validate_path(&self.fact_blob_path)?;
        validate_path(&self.dimension_blob_path)?;
        Ok(())
    }

    pub fn fact_qualified(&self) -> String {
        format!("{}.{}", self.base_schema, self.fact_table)
    }

    pub fn dimension_qualified(&self) -> String {
        format!("{}.{}", self.base_schema, self.dimension_table)
    }

    pub fn transaction_qualified(&self) -> String {
        format!("{}.{}", self.base_schema, self.transaction_table)
    }

    /// Checks run on the fact table; the foreign key references the dimension
    pub fn fact_checks(&self) -> Vec<CheckType> {
        vec![
            CheckType::NotNull,
            CheckType::PrimaryKey {
                columns: self.primary_key.clone(),
            },
            CheckType::ForeignKey {
                column: self.join_column.clone(),
                reference_table: self.dimension_qualified(),
            },
        ]
    }

    pub fn dimension_checks(&self) -> Vec<CheckType> {
        vec![
            CheckType::NotNull,
            CheckType::PrimaryKey {
                columns: self.primary_key.clone(),
            },
        ]
    }
}

fn validate_identifier(field: &str, value: &str) -> Result<()> {
    let valid = value
        .chars()
        .next()
        .map_or(false, |c| c.is_ascii_alphabetic() || c == '_')
        && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(Error::Configuration(format!(
            "{} '{}' is not a valid identifier",
            field, value
        )));
    }
    Ok(())
}

/// Failure inside one pipeline stage
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum StageError {
    #[error(transparent)]
    Statement(#[from] StatementError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Core(#[from] sluice_core::Error),

    #[error(transparent)]
    Runtime(#[from] Error),

    #[error("Unexpected result: {0}")]
    UnexpectedResult(String),
}

/// A fatal error and the stage the run was trying to reach
#[derive(Debug, thiserror::Error, PartialEq)]
#[error("Pipeline failed before reaching {stage}: {source}")]
pub struct PipelineError {
    pub stage: PipelineState,
    #[source]
    pub source: StageError,
    /// What the run got done before failing, with `final_state` FAILED
    pub report: Box<PipelineReport>,
}

/// Summary of a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineReport {
    pub final_state: PipelineState,
    pub history: Vec<(PipelineState, DateTime<Utc>)>,
    /// Data quality findings; advisory only
    pub findings: Vec<ValidationFinding>,
    pub staged_tables: Vec<String>,
    /// Whether the base tables had to be loaded from the blob store
    pub bulk_loaded: bool,
}

impl PipelineReport {
    fn new() -> Self {
        Self {
            final_state: PipelineState::Init,
            history: Vec::new(),
            findings: Vec::new(),
            staged_tables: Vec::new(),
            bulk_loaded: false,
        }
    }

    fn finish(mut self, machine: &PipelineStateMachine) -> Self {
        self.final_state = machine.current_state();
        self.history = machine.history().to_vec();
        self
    }
}

pub struct PipelineController {
    session: WarehouseSession,
    schema: SchemaOrchestrator,
    blob_store: BlobStore,
    config: PipelineConfig,
}

impl PipelineController {
    pub fn new(session: WarehouseSession, blob_store: BlobStore, config: PipelineConfig) -> Self {
        Self {
            schema: SchemaOrchestrator::new(session.clone()),
            session,
            blob_store,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every stage in order until DONE or the first fatal error
    #[instrument(name = "pipeline.run", skip(self))]
    pub async fn run(&self) -> std::result::Result<PipelineReport, PipelineError> {
        let mut machine = PipelineStateMachine::new();
        let mut report = PipelineReport::new();

        while let Some(next) = machine.current_state().next() {
            let outcome = match self.run_stage(next, &mut report).await {
                Ok(()) => machine.transition(next).map_err(StageError::from),
                Err(e) => Err(e),
            };

            if let Err(source) = outcome {
                error!(stage = %next, error = %source, "Pipeline stage failed");
                if let Err(e) = machine.transition(PipelineState::Failed) {
                    warn!(error = %e, "Could not record pipeline failure");
                }
                return Err(PipelineError {
                    stage: next,
                    source,
                    report: Box::new(report.finish(&machine)),
                });
            }
            info!(stage = %next, "Pipeline stage complete");
        }

        Ok(report.finish(&machine))
    }

    async fn run_stage(
        &self,
        stage: PipelineState,
        report: &mut PipelineReport,
    ) -> std::result::Result<(), StageError> {
        match stage {
            PipelineState::TablesEnsured => self.ensure_base_tables().await,
            PipelineState::DataLoaded => {
                report.bulk_loaded = self.ensure_loaded().await?;
                Ok(())
            }
            PipelineState::FetchedAndValidated => {
                report.findings = self.fetch_and_validate().await?;
                Ok(())
            }
            PipelineState::Staged => {
                report.staged_tables = self.build_staging().await?;
                Ok(())
            }
            PipelineState::Aggregated => {
                let spec = weekly_sales_aggregate(
                    &self.config.base_schema,
                    &self.config.aggregate_table,
                    &self.config.transaction_qualified(),
                );
                self.schema.ensure_aggregate(&spec).await?;
                Ok(())
            }
            PipelineState::Done => Ok(()),
            PipelineState::Init | PipelineState::Failed => Err(StageError::Runtime(
                Error::InvalidState(format!("{} is not a runnable stage", stage)),
            )),
        }
    }

    async fn ensure_base_tables(&self) -> std::result::Result<(), StageError> {
        let fact = fact_avgs_table(&self.config.base_schema, &self.config.fact_table);
        let dimension = hier_prod_table(&self.config.base_schema, &self.config.dimension_table);
        self.schema.ensure_table(&fact).await?;
        self.schema.ensure_table(&dimension).await?;
        Ok(())
    }

    /// Load both base tables unless both already hold rows
    async fn ensure_loaded(&self) -> std::result::Result<bool, StageError> {
        let fact = self.config.fact_qualified();
        let dimension = self.config.dimension_qualified();

        let (fact_counts, dimension_counts) = self
            .session
            .query_pair(&sql::count_rows(&fact), &sql::count_rows(&dimension))
            .await?;
        let fact_rows = single_count(&fact, &fact_counts)?;
        let dimension_rows = single_count(&dimension, &dimension_counts)?;

        if fact_rows > 0 && dimension_rows > 0 {
            info!(fact_rows, dimension_rows, "Base tables already populated, skipping bulk load");
            return Ok(false);
        }

        info!(fact_rows, dimension_rows, "Loading base tables from the blob store");
        let load_fact = self
            .blob_store
            .load_statement(&fact, &self.config.fact_blob_path)?;
        let load_dimension = self
            .blob_store
            .load_statement(&dimension, &self.config.dimension_blob_path)?;
        self.session.execute_pair(&load_fact, &load_dimension).await?;
        info!("Bulk load complete");
        Ok(true)
    }

    async fn fetch_and_validate(&self) -> std::result::Result<Vec<ValidationFinding>, StageError> {
        let fact_name = self.config.fact_qualified();
        let dimension_name = self.config.dimension_qualified();

        let (fact, dimension) = self
            .session
            .query_pair(&sql::select_all(&fact_name), &sql::select_all(&dimension_name))
            .await?;
        preview(&fact_name, &fact);
        preview(&dimension_name, &dimension);

        let mut findings = Vec::new();
        for check in self.config.fact_checks() {
            findings.extend(validate(&check, &fact_name, &fact, Some(&dimension)));
        }
        for check in self.config.dimension_checks() {
            findings.extend(validate(&check, &dimension_name, &dimension, None));
        }

        if findings.is_empty() {
            info!("No data quality findings");
        }
        Ok(findings)
    }

    async fn build_staging(&self) -> std::result::Result<Vec<String>, StageError> {
        self.schema.ensure_schema(&self.config.staging_schema).await?;
        let plan = hierarchy_staging_plan(
            &self.config.staging_schema,
            &self.config.dimension_qualified(),
        )?;
        Ok(self.schema.apply_plan(&plan).await?)
    }
}

/// The integer in the single cell of a `COUNT(*)` result
fn single_count(table: &str, result: &TabularResult) -> std::result::Result<i64, StageError> {
    result
        .rows()
        .first()
        .and_then(|row| row.first())
        .and_then(|cell| cell.as_i64())
        .ok_or_else(|| {
            StageError::UnexpectedResult(format!("row count of {} is not an integer", table))
        })
}

fn preview(name: &str, table: &TabularResult) {
    info!(
        table = name,
        rows = table.row_count(),
        "Fetched table\n{}",
        table.head(PREVIEW_ROWS)
    );
}

/// Run one check, logging and counting any finding. A check that cannot
/// run is reported and skipped.
fn validate(
    check: &CheckType,
    name: &str,
    table: &TabularResult,
    reference: Option<&TabularResult>,
) -> Option<ValidationFinding> {
    match run_check(check, name, table, reference) {
        Ok(Some(finding)) => {
            VALIDATION_FINDINGS_TOTAL
                .with_label_values(&[finding.kind.as_str()])
                .inc();
            warn!(
                table = name,
                kind = %finding.kind,
                offending_rows = finding.offending_count(),
                "{}\n{}",
                finding.message,
                finding.offending_rows.head(PREVIEW_ROWS)
            );
            Some(finding)
        }
        Ok(None) => None,
        Err(e) => {
            warn!(table = name, check = check.type_name(), error = %e, "Check could not run");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::Cell;

    #[test]
    fn test_default_config_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.fact_qualified(), "public.fact_avgs_tbl");
        assert_eq!(config.dimension_qualified(), "public.hier_prod_tbl");
        assert_eq!(config.transaction_qualified(), "public.fact_trans_tbl");
    }

    #[test]
    fn test_config_rejects_bad_values() {
        let config = PipelineConfig {
            fact_table: "fact; DROP TABLE x".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = PipelineConfig {
            primary_key: vec![],
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = PipelineConfig {
            dimension_blob_path: "hier_prod_tbl.txt".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_check_lists() {
        let config = PipelineConfig::default();
        let fact = config.fact_checks();
        assert_eq!(fact.len(), 3);
        assert_eq!(
            fact[2],
            CheckType::ForeignKey {
                column: "sku_id".into(),
                reference_table: "public.hier_prod_tbl".into(),
            }
        );
        assert!(config
            .dimension_checks()
            .iter()
            .all(|c| c.type_name() != "foreign_key"));
    }

    #[test]
    fn test_single_count() {
        let counts =
            TabularResult::new(vec!["row_count".into()], vec![vec![Cell::Integer(42)]]).unwrap();
        assert_eq!(single_count("t", &counts).unwrap(), 42);

        let as_text =
            TabularResult::new(vec!["row_count".into()], vec![vec![Cell::from("7")]]).unwrap();
        assert_eq!(single_count("t", &as_text).unwrap(), 7);

        let empty = TabularResult::empty(vec!["row_count".into()]).unwrap();
        assert!(matches!(
            single_count("t", &empty),
            Err(StageError::UnexpectedResult(_))
        ));
    }

    #[test]
    fn test_validate_skips_checks_that_cannot_run() {
        let table = TabularResult::new(vec!["a".into()], vec![vec![Cell::from("x")]]).unwrap();
        let check = CheckType::PrimaryKey {
            columns: vec!["missing".into()],
        };
        assert!(validate(&check, "t", &table, None).is_none());
    }
}
