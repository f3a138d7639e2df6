//! SQL text for every statement the pipeline submits
//!
//! Statements are rendered on a single line with single spaces so that
//! logs and statement recorders see a stable form.

use crate::catalog::{AggregateSpec, TableDefinition};
use crate::staging::StagingTableSpec;

/// Quote a string literal, doubling embedded single quotes
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Probe returning one row if the schema exists
pub fn schema_exists(schema: &str) -> String {
    format!(
        "SELECT 1 FROM information_schema.schemata WHERE schema_name = {}",
        quote_literal(schema)
    )
}

/// Probe returning one row if the table exists
pub fn table_exists(schema: &str, table: &str) -> String {
    format!(
        "SELECT 1 FROM information_schema.tables WHERE table_schema = {} AND table_name = {}",
        quote_literal(schema),
        quote_literal(table)
    )
}

pub fn create_schema(schema: &str) -> String {
    format!("CREATE SCHEMA {}", schema)
}

pub fn create_table(table: &TableDefinition) -> String {
    let columns: Vec<String> = table
        .columns
        .iter()
        .map(|c| format!("{} {}", c.name, c.column_type.sql_name()))
        .collect();
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        table.qualified_name(),
        columns.join(", ")
    )
}

pub fn truncate_table(qualified_name: &str) -> String {
    format!("TRUNCATE TABLE {}", qualified_name)
}

/// Insert the spec's projection of `source` into the staging table
pub fn insert_projection(spec: &StagingTableSpec, source: &str) -> String {
    let columns = spec.projection().join(", ");
    format!(
        "INSERT INTO {} ({}) SELECT {} FROM {}",
        spec.qualified_name(),
        columns,
        columns,
        source
    )
}

pub fn select_all(qualified_name: &str) -> String {
    format!("SELECT * FROM {}", qualified_name)
}

pub fn count_rows(qualified_name: &str) -> String {
    format!("SELECT COUNT(*) AS row_count FROM {}", qualified_name)
}

/// Grouped-sum table, created only if absent
pub fn create_aggregate(spec: &AggregateSpec) -> String {
    let group_by = spec.group_by.join(", ");
    let sums: Vec<String> = spec
        .sums
        .iter()
        .map(|s| format!("SUM({}) AS {}", s.column, s.alias))
        .collect();
    format!(
        "CREATE TABLE IF NOT EXISTS {} AS SELECT {}, {} FROM {} GROUP BY {}",
        spec.qualified_name(),
        group_by,
        sums.join(", "),
        spec.source,
        group_by
    )
}

/// Bulk load of a pipe-delimited file with a one-line header
pub fn copy_from_blob(
    qualified_name: &str,
    path: &str,
    iam_role: &str,
    region: Option<&str>,
) -> String {
    let region = region
        .map(|r| format!(" REGION {}", quote_literal(r)))
        .unwrap_or_default();
    format!(
        "COPY {} FROM {} IAM_ROLE {}{} DELIMITER '|' IGNOREHEADER 1",
        qualified_name,
        quote_literal(path),
        quote_literal(iam_role),
        region
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{weekly_sales_aggregate, ColumnSpec};

    #[test]
    fn test_probes_quote_literals() {
        assert_eq!(
            schema_exists("stages"),
            "SELECT 1 FROM information_schema.schemata WHERE schema_name = 'stages'"
        );
        assert_eq!(quote_literal("o'brien"), "'o''brien'");
        assert!(table_exists("public", "fact_avgs_tbl")
            .ends_with("table_schema = 'public' AND table_name = 'fact_avgs_tbl'"));
    }

    #[test]
    fn test_create_table() {
        let table = TableDefinition::new(
            "stages",
            "style_tbl",
            vec![ColumnSpec::varchar("styl_id"), ColumnSpec::double("cost")],
        );
        assert_eq!(
            create_table(&table),
            "CREATE TABLE IF NOT EXISTS stages.style_tbl (styl_id VARCHAR, cost DOUBLE PRECISION)"
        );
    }

    #[test]
    fn test_insert_projection() {
        let spec = StagingTableSpec::new(
            TableDefinition::new(
                "stages",
                "dept_tbl",
                vec![ColumnSpec::varchar("dept_id"), ColumnSpec::varchar("dept_label")],
            ),
            "public.hier_prod_tbl",
        );
        assert_eq!(
            insert_projection(&spec, &spec.source),
            "INSERT INTO stages.dept_tbl (dept_id, dept_label) SELECT dept_id, dept_label FROM public.hier_prod_tbl"
        );
    }

    #[test]
    fn test_create_aggregate() {
        let agg = weekly_sales_aggregate("public", "mview_weekly_sales", "public.fact_trans_tbl");
        let sql = create_aggregate(&agg);
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS public.mview_weekly_sales AS SELECT pos_site_id,"));
        assert!(sql.contains("SUM(discount_dollars) AS total_discount_dollars FROM public.fact_trans_tbl"));
        assert!(sql.ends_with("GROUP BY pos_site_id, sku_id, fscldt_id, price_substate_id, type"));
    }

    #[test]
    fn test_copy_from_blob() {
        assert_eq!(
            copy_from_blob("public.fact_avgs_tbl", "s3://bucket/fact.txt", "arn:role", None),
            "COPY public.fact_avgs_tbl FROM 's3://bucket/fact.txt' IAM_ROLE 'arn:role' DELIMITER '|' IGNOREHEADER 1"
        );
        assert!(copy_from_blob("t", "s3://b/p", "r", Some("us-east-1")).contains("REGION 'us-east-1' DELIMITER"));
    }
}
