//! Idempotent DDL and truncate-and-reload DML
//!
//! Every operation here is safe to re-run from the top: objects are probed
//! before they are created, and staging tables are rebuilt from scratch
//! rather than patched.

use crate::session::{StatementError, WarehouseSession};
use sluice_core::staging::StagingPlan;
use sluice_core::{sql, AggregateSpec, StagingTableSpec, TableDefinition};
use tracing::{info, instrument};

/// Errors raised while building the staging schema
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SchemaError {
    #[error(transparent)]
    Statement(#[from] StatementError),

    #[error("Invalid staging plan: {0}")]
    Plan(#[from] sluice_core::Error),
}

/// Whether an ensure call had to create the object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    Created,
    AlreadyPresent,
}

pub struct SchemaOrchestrator {
    session: WarehouseSession,
}

impl SchemaOrchestrator {
    pub fn new(session: WarehouseSession) -> Self {
        Self { session }
    }

    /// Create `schema` unless the catalog already lists it
    #[instrument(skip(self))]
    pub async fn ensure_schema(&self, schema: &str) -> Result<EnsureOutcome, StatementError> {
        if self.exists(&sql::schema_exists(schema)).await? {
            info!("Schema already exists");
            return Ok(EnsureOutcome::AlreadyPresent);
        }

        self.session.execute(&sql::create_schema(schema)).await?;
        info!("Schema created");
        Ok(EnsureOutcome::Created)
    }

    /// Create `table` unless the catalog already lists it
    #[instrument(skip(self, table), fields(table = %table.qualified_name()))]
    pub async fn ensure_table(
        &self,
        table: &TableDefinition,
    ) -> Result<EnsureOutcome, StatementError> {
        if self
            .exists(&sql::table_exists(&table.schema, &table.name))
            .await?
        {
            info!("Table already exists");
            return Ok(EnsureOutcome::AlreadyPresent);
        }

        self.session.execute(&sql::create_table(table)).await?;
        info!("Table created");
        Ok(EnsureOutcome::Created)
    }

    /// Empty the staging table, then refill it from `source`.
    ///
    /// The insert is only submitted once the truncate has finished.
    #[instrument(skip(self, spec), fields(table = %spec.qualified_name()))]
    pub async fn reload_table(
        &self,
        spec: &StagingTableSpec,
        source: &str,
    ) -> Result<(), StatementError> {
        let target = spec.qualified_name();
        self.session.execute(&sql::truncate_table(&target)).await?;
        self.session
            .execute(&sql::insert_projection(spec, source))
            .await?;
        info!(source, "Table reloaded");
        Ok(())
    }

    /// Ensure and reload every staging table, upstream tables first.
    ///
    /// Returns the qualified names of the tables that were rebuilt.
    #[instrument(skip(self, plan), fields(tables = plan.len()))]
    pub async fn apply_plan(&self, plan: &StagingPlan) -> Result<Vec<String>, SchemaError> {
        let order = plan.execution_order()?;

        let mut staged = Vec::with_capacity(order.len());
        for spec in order {
            self.ensure_table(&spec.table).await?;
            self.reload_table(spec, &spec.source).await?;
            staged.push(spec.qualified_name());
        }
        Ok(staged)
    }

    /// Create the grouped-sum table unless it already exists
    #[instrument(skip(self, spec), fields(table = %spec.qualified_name()))]
    pub async fn ensure_aggregate(
        &self,
        spec: &AggregateSpec,
    ) -> Result<EnsureOutcome, StatementError> {
        if self
            .exists(&sql::table_exists(&spec.schema, &spec.name))
            .await?
        {
            info!("Aggregate table already exists");
            return Ok(EnsureOutcome::AlreadyPresent);
        }

        self.session.execute(&sql::create_aggregate(spec)).await?;
        info!(source = %spec.source, "Aggregate table created");
        Ok(EnsureOutcome::Created)
    }

    async fn exists(&self, probe: &str) -> Result<bool, StatementError> {
        Ok(!self.session.query(probe).await?.is_empty())
    }
}
