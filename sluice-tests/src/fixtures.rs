//! Test data factories for Sluice types
//!
//! Base table contents come in two forms: pipe-delimited blobs for the bulk
//! load path and ready-made rows for seeding the mock warehouse directly.

use sluice_core::catalog::{fact_avgs_table, hier_prod_table};
use sluice_core::{Cell, ColumnSpec, TableDefinition, TabularResult};
use sluice_runtime::{BlobStoreConfig, PipelineConfig, RetryPolicy, WarehouseTarget};
use std::time::Duration;

pub const FACT_HEADER: &str =
    "fscldt_id|sku_id|average_unit_standardcost|average_unit_landedcost";

pub const DIMENSION_HEADER: &str = "sku_id|sku_label|stylclr_id|stylclr_label|styl_id|styl_label|subcat_id|subcat_label|cat_id|cat_label|dept_id|dept_label|issvc|isasmbly|isnfs";

/// Build a table from string literals, mapping "" to an empty string cell
pub fn tabular(columns: &[&str], rows: &[&[&str]]) -> TabularResult {
    TabularResult::new(
        columns.iter().map(|c| c.to_string()).collect(),
        rows.iter()
            .map(|row| row.iter().map(|v| Cell::from(*v)).collect())
            .collect(),
    )
    .expect("fixture table is rectangular")
}

/// Connection target fixtures
pub mod target {
    use super::*;

    pub fn analytics() -> WarehouseTarget {
        WarehouseTarget {
            cluster_identifier: "analytics-cluster".to_string(),
            database: "dev".to_string(),
            secret_arn: "arn:aws:secretsmanager:us-east-1:123456789012:secret:sluice".to_string(),
        }
    }

    pub fn blob_store() -> BlobStoreConfig {
        BlobStoreConfig::new("arn:aws:iam::123456789012:role/sluice-copy")
    }

    /// Fixed 30s delay, five polls
    pub fn default_policy() -> RetryPolicy {
        RetryPolicy::fixed(5, Duration::from_secs(30))
    }

    pub fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::fixed(max_attempts, Duration::from_secs(30))
    }

    pub fn pipeline() -> PipelineConfig {
        PipelineConfig::default()
    }
}

/// Base fact table fixtures
pub mod fact {
    use super::*;

    pub fn definition() -> TableDefinition {
        fact_avgs_table("public", "fact_avgs_tbl")
    }

    /// Three distinct SKUs, all present in the clean dimension
    pub fn clean_blob() -> String {
        [
            FACT_HEADER,
            "20240101|A|1.5|2.0",
            "20240101|B|3.25|4.0",
            "20240108|C|0.75|1.1",
        ]
        .join("\n")
    }

    /// A duplicated SKU, an orphan SKU and a missing landed cost
    pub fn dirty_blob() -> String {
        [
            FACT_HEADER,
            "20240101|A|1.5|2.0",
            "20240108|A|1.5|2.0",
            "20240101|Z|9.0|9.5",
            "20240108|C|0.75|",
        ]
        .join("\n")
    }

    pub fn clean_rows() -> Vec<Vec<Cell>> {
        vec![
            vec!["20240101".into(), "A".into(), Cell::Double(1.5), Cell::Double(2.0)],
            vec!["20240101".into(), "B".into(), Cell::Double(3.25), Cell::Double(4.0)],
            vec!["20240108".into(), "C".into(), Cell::Double(0.75), Cell::Double(1.1)],
        ]
    }
}

/// Base dimension table fixtures
pub mod dimension {
    use super::*;

    const CLEAN: [&str; 3] = [
        "A|Alpha tee|SC1|Alpha red|S1|Alpha|SUB1|Tees|C1|Tops|D1|Apparel|0|0|1",
        "B|Beta tee|SC2|Beta blue|S2|Beta|SUB1|Tees|C1|Tops|D1|Apparel|0|1|0",
        "C|Gamma mug|SC3|Gamma white|S3|Gamma|SUB2|Mugs|C2|Kitchen|D2|Home|1|0|0",
    ];

    pub fn definition() -> TableDefinition {
        hier_prod_table("public", "hier_prod_tbl")
    }

    pub fn clean_blob() -> String {
        std::iter::once(DIMENSION_HEADER)
            .chain(CLEAN)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn clean_rows() -> Vec<Vec<Cell>> {
        let definition = definition();
        CLEAN
            .iter()
            .map(|line| {
                line.split('|')
                    .zip(&definition.columns)
                    .map(|(value, column)| match column.column_type {
                        sluice_core::ColumnType::Varchar => Cell::from(value),
                        _ => Cell::Integer(value.parse().unwrap_or_default()),
                    })
                    .collect()
            })
            .collect()
    }
}

/// Transaction fact fixtures feeding the weekly sales aggregate
pub mod transactions {
    use super::*;

    pub fn definition() -> TableDefinition {
        TableDefinition::new(
            "public",
            "fact_trans_tbl",
            vec![
                ColumnSpec::varchar("pos_site_id"),
                ColumnSpec::varchar("sku_id"),
                ColumnSpec::varchar("fscldt_id"),
                ColumnSpec::varchar("price_substate_id"),
                ColumnSpec::varchar("type"),
                ColumnSpec::integer("sales_units"),
                ColumnSpec::double("sales_dollars"),
                ColumnSpec::double("discount_dollars"),
            ],
        )
    }

    /// Two sales of A at one site in one week, one sale of B elsewhere
    pub fn rows() -> Vec<Vec<Cell>> {
        let row = |site: &str, sku: &str, units: i64, dollars: f64, discount: f64| {
            vec![
                Cell::from(site),
                Cell::from(sku),
                Cell::from("20240101"),
                Cell::from("P1"),
                Cell::from("sale"),
                Cell::Integer(units),
                Cell::Double(dollars),
                Cell::Double(discount),
            ]
        };
        vec![
            row("S1", "A", 2, 20.0, 1.0),
            row("S1", "A", 3, 30.0, 0.5),
            row("S2", "B", 1, 10.0, 0.0),
        ]
    }
}
