//! Table definitions for the base, staging and aggregate tables
//!
//! Column sets here are the fixed schema contracts of the pipeline. Lookups
//! against them are by name, so their order only matters for DDL output.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Warehouse column types used by the pipeline's tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Varchar,
    Integer,
    BigInt,
    Double,
}

impl ColumnType {
    /// SQL spelling of the type
    pub fn sql_name(&self) -> &'static str {
        match self {
            ColumnType::Varchar => "VARCHAR",
            ColumnType::Integer => "INTEGER",
            ColumnType::BigInt => "BIGINT",
            ColumnType::Double => "DOUBLE PRECISION",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql_name())
    }
}

/// A named, typed column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub column_type: ColumnType,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }

    pub fn varchar(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Varchar)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Integer)
    }

    pub fn double(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Double)
    }
}

/// A table with its schema-qualified name and column list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDefinition {
    pub schema: String,
    pub name: String,
    pub columns: Vec<ColumnSpec>,
}

impl TableDefinition {
    pub fn new(schema: impl Into<String>, name: impl Into<String>, columns: Vec<ColumnSpec>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            columns,
        }
    }

    /// `schema.name`
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }
}

/// Base fact table of average unit costs per SKU and fiscal date
pub fn fact_avgs_table(schema: &str, name: &str) -> TableDefinition {
    TableDefinition::new(
        schema,
        name,
        vec![
            ColumnSpec::varchar("fscldt_id"),
            ColumnSpec::varchar("sku_id"),
            ColumnSpec::double("average_unit_standardcost"),
            ColumnSpec::double("average_unit_landedcost"),
        ],
    )
}

/// Base dimension table holding the denormalized product hierarchy
pub fn hier_prod_table(schema: &str, name: &str) -> TableDefinition {
    TableDefinition::new(
        schema,
        name,
        vec![
            ColumnSpec::varchar("sku_id"),
            ColumnSpec::varchar("sku_label"),
            ColumnSpec::varchar("stylclr_id"),
            ColumnSpec::varchar("stylclr_label"),
            ColumnSpec::varchar("styl_id"),
            ColumnSpec::varchar("styl_label"),
            ColumnSpec::varchar("subcat_id"),
            ColumnSpec::varchar("subcat_label"),
            ColumnSpec::varchar("cat_id"),
            ColumnSpec::varchar("cat_label"),
            ColumnSpec::varchar("dept_id"),
            ColumnSpec::varchar("dept_label"),
            ColumnSpec::integer("issvc"),
            ColumnSpec::integer("isasmbly"),
            ColumnSpec::integer("isnfs"),
        ],
    )
}

/// A `SUM(column) AS alias` output of an aggregate table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SumColumn {
    pub column: String,
    pub alias: String,
}

/// A grouped-sum table materialized from a source table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateSpec {
    pub schema: String,
    pub name: String,
    pub source: String,
    pub group_by: Vec<String>,
    pub sums: Vec<SumColumn>,
}

impl AggregateSpec {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

/// Weekly sales rollup over the transaction fact table
pub fn weekly_sales_aggregate(schema: &str, name: &str, source: &str) -> AggregateSpec {
    let group_by = ["pos_site_id", "sku_id", "fscldt_id", "price_substate_id", "type"];
    let sums = ["sales_units", "sales_dollars", "discount_dollars"];

    AggregateSpec {
        schema: schema.to_string(),
        name: name.to_string(),
        source: source.to_string(),
        group_by: group_by.iter().map(|c| c.to_string()).collect(),
        sums: sums
            .iter()
            .map(|c| SumColumn {
                column: c.to_string(),
                alias: format!("total_{}", c),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fact_contract() {
        let fact = fact_avgs_table("public", "fact_avgs_tbl");
        assert_eq!(fact.qualified_name(), "public.fact_avgs_tbl");
        for col in [
            "fscldt_id",
            "sku_id",
            "average_unit_standardcost",
            "average_unit_landedcost",
        ] {
            assert!(fact.has_column(col), "missing {}", col);
        }
        assert_eq!(fact.columns.len(), 4);
    }

    #[test]
    fn test_dimension_contract() {
        let dim = hier_prod_table("public", "hier_prod_tbl");
        assert_eq!(dim.columns.len(), 15);
        assert!(dim.has_column("dept_label"));
        assert!(dim.has_column("isnfs"));
    }

    #[test]
    fn test_weekly_sales_aggregate() {
        let agg = weekly_sales_aggregate("public", "mview_weekly_sales", "public.fact_trans_tbl");
        assert_eq!(agg.group_by.len(), 5);
        assert_eq!(agg.sums[0].alias, "total_sales_units");
        assert_eq!(agg.qualified_name(), "public.mview_weekly_sales");
    }
}
