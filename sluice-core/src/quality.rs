//! Data quality checks over materialized tables
//!
//! Three checks gate downstream staging:
//!
//! - `not_null` - any null or empty-string cell anywhere in the table
//! - `primary_key` - rows whose key tuple occurs more than once
//! - `foreign_key` - fact rows whose join value is missing from a dimension
//!
//! All checks are read-only and keep the original row order in what they
//! report. Findings are advisory: callers log them and carry on.

use crate::table::{Cell, CellKey, TabularResult};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Kind of data quality violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    NullViolation,
    PkDuplicate,
    FkOrphan,
}

impl FindingKind {
    /// Label for metrics and logging
    pub fn as_str(&self) -> &'static str {
        match self {
            FindingKind::NullViolation => "null_violation",
            FindingKind::PkDuplicate => "pk_duplicate",
            FindingKind::FkOrphan => "fk_orphan",
        }
    }
}

impl fmt::Display for FindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A violation raised against one table, with the offending rows
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationFinding {
    pub kind: FindingKind,
    /// Table the check ran against
    pub table: String,
    pub message: String,
    pub offending_rows: TabularResult,
}

impl ValidationFinding {
    pub fn offending_count(&self) -> usize {
        self.offending_rows.row_count()
    }
}

/// Check definitions, in the same tagged form used by pipeline configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CheckType {
    /// No null or empty-string cell in any column
    NotNull,
    /// Key tuple over `columns` must be unique
    PrimaryKey { columns: Vec<String> },
    /// Every value of `column` must exist in the same column of `reference_table`
    ForeignKey {
        column: String,
        reference_table: String,
    },
}

impl CheckType {
    /// Get the check type name for metrics and logging
    pub fn type_name(&self) -> &'static str {
        match self {
            CheckType::NotNull => "not_null",
            CheckType::PrimaryKey { .. } => "primary_key",
            CheckType::ForeignKey { .. } => "foreign_key",
        }
    }
}

/// Null check normalization: an empty string counts as missing.
///
/// Only used for the null check; it never rewrites the table.
fn is_missing(cell: &Cell) -> bool {
    match cell {
        Cell::Null => true,
        Cell::String(s) => s.is_empty(),
        _ => false,
    }
}

/// True if any cell in the table is null or an empty string
pub fn has_nulls(table: &TabularResult) -> bool {
    table.rows().iter().any(|row| row.iter().any(is_missing))
}

/// Rows containing at least one null or empty-string cell
pub fn rows_with_nulls(table: &TabularResult) -> TabularResult {
    let indices: Vec<usize> = table
        .rows()
        .iter()
        .enumerate()
        .filter(|(_, row)| row.iter().any(is_missing))
        .map(|(idx, _)| idx)
        .collect();
    table.select_rows(&indices)
}

/// Every row whose key tuple over `key_columns` appears more than once.
///
/// All occurrences are reported, not only the repeats. An empty result
/// means the key is unique.
pub fn check_primary_key_uniqueness<S: AsRef<str>>(
    table: &TabularResult,
    key_columns: &[S],
) -> Result<TabularResult> {
    if key_columns.is_empty() {
        return Err(Error::InvalidCheck(
            "primary key check requires at least one column".to_string(),
        ));
    }

    let positions = key_columns
        .iter()
        .map(|c| table.column_index(c.as_ref()))
        .collect::<Result<Vec<_>>>()?;

    let mut counts: HashMap<Vec<CellKey<'_>>, usize> = HashMap::new();
    for row in table.rows() {
        *counts.entry(key_of(row, &positions)).or_insert(0) += 1;
    }

    let duplicates: Vec<usize> = table
        .rows()
        .iter()
        .enumerate()
        .filter(|(_, row)| {
            counts
                .get(&key_of(row, &positions))
                .copied()
                .unwrap_or(0)
                > 1
        })
        .map(|(idx, _)| idx)
        .collect();

    Ok(table.select_rows(&duplicates))
}

fn key_of<'a>(row: &'a [Cell], positions: &[usize]) -> Vec<CellKey<'a>> {
    positions.iter().map(|&p| row[p].key()).collect()
}

/// Every fact row whose `column` value is absent from the dimension's `column`.
///
/// An empty result means referential integrity holds.
pub fn check_foreign_key(
    fact: &TabularResult,
    dimension: &TabularResult,
    column: &str,
) -> Result<TabularResult> {
    let fact_idx = fact.column_index(column)?;
    let known: HashSet<CellKey<'_>> = dimension.column(column)?.map(Cell::key).collect();

    let orphans: Vec<usize> = fact
        .rows()
        .iter()
        .enumerate()
        .filter(|(_, row)| !known.contains(&row[fact_idx].key()))
        .map(|(idx, _)| idx)
        .collect();

    Ok(fact.select_rows(&orphans))
}

/// Run one check against a named table.
///
/// Returns `Ok(None)` when the check passes. `reference` is required for
/// foreign key checks and ignored otherwise.
pub fn run_check(
    check: &CheckType,
    table_name: &str,
    table: &TabularResult,
    reference: Option<&TabularResult>,
) -> Result<Option<ValidationFinding>> {
    let finding = match check {
        CheckType::NotNull => {
            if !has_nulls(table) {
                return Ok(None);
            }
            let rows = rows_with_nulls(table);
            ValidationFinding {
                kind: FindingKind::NullViolation,
                table: table_name.to_string(),
                message: format!("{} rows contain null or empty values", rows.row_count()),
                offending_rows: rows,
            }
        }
        CheckType::PrimaryKey { columns } => {
            let rows = check_primary_key_uniqueness(table, columns.as_slice())?;
            if rows.is_empty() {
                return Ok(None);
            }
            ValidationFinding {
                kind: FindingKind::PkDuplicate,
                table: table_name.to_string(),
                message: format!(
                    "{} rows share a duplicate key on {:?}",
                    rows.row_count(),
                    columns
                ),
                offending_rows: rows,
            }
        }
        CheckType::ForeignKey {
            column,
            reference_table,
        } => {
            let dimension = reference.ok_or_else(|| {
                Error::InvalidCheck(format!(
                    "foreign key check on '{}' needs reference data from '{}'",
                    column, reference_table
                ))
            })?;
            let rows = check_foreign_key(table, dimension, column)?;
            if rows.is_empty() {
                return Ok(None);
            }
            ValidationFinding {
                kind: FindingKind::FkOrphan,
                table: table_name.to_string(),
                message: format!(
                    "{} rows have no matching '{}' in {}",
                    rows.row_count(),
                    column,
                    reference_table
                ),
                offending_rows: rows,
            }
        }
    };

    Ok(Some(finding))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table(columns: &[&str], rows: Vec<Vec<Cell>>) -> TabularResult {
        TabularResult::new(columns.iter().map(|c| c.to_string()).collect(), rows).unwrap()
    }

    fn fact() -> TabularResult {
        table(
            &["sku_id", "cost"],
            vec![
                vec![Cell::from("A"), Cell::from("1.0")],
                vec![Cell::from("A"), Cell::from("1.0")],
            ],
        )
    }

    #[test]
    fn test_null_check_on_full_table() {
        assert!(!has_nulls(&fact()));
        assert!(rows_with_nulls(&fact()).is_empty());
    }

    #[test]
    fn test_null_check_treats_empty_string_as_null() {
        let data = table(
            &["sku_id", "label"],
            vec![
                vec![Cell::from("A"), Cell::from("x")],
                vec![Cell::from("B"), Cell::from("")],
                vec![Cell::from("C"), Cell::Null],
            ],
        );
        let before = data.clone();

        assert!(has_nulls(&data));
        let rows = rows_with_nulls(&data);
        assert_eq!(rows.row_count(), 2);
        assert_eq!(rows.rows()[0][0], Cell::from("B"));
        assert_eq!(rows.rows()[1][0], Cell::from("C"));

        // Normalization must not leak into the caller's table
        assert_eq!(data, before);
        assert_eq!(data.rows()[1][1], Cell::from(""));
    }

    #[test]
    fn test_null_check_ignores_zero_values() {
        let data = table(&["n", "d"], vec![vec![Cell::Integer(0), Cell::Double(0.0)]]);
        assert!(!has_nulls(&data));
    }

    #[test]
    fn test_pk_duplicates_report_all_occurrences() {
        let dupes = check_primary_key_uniqueness(&fact(), &["sku_id"]).unwrap();
        assert_eq!(dupes.row_count(), 2);
    }

    #[test]
    fn test_pk_unique_is_empty() {
        let data = table(
            &["sku_id", "fscldt_id"],
            vec![
                vec![Cell::from("A"), Cell::Integer(1)],
                vec![Cell::from("A"), Cell::Integer(2)],
                vec![Cell::from("B"), Cell::Integer(1)],
            ],
        );
        assert!(check_primary_key_uniqueness(&data, &["sku_id", "fscldt_id"])
            .unwrap()
            .is_empty());
        assert_eq!(
            check_primary_key_uniqueness(&data, &["sku_id"])
                .unwrap()
                .row_count(),
            2
        );
    }

    #[test]
    fn test_pk_keeps_original_order() {
        let data = table(
            &["k", "v"],
            vec![
                vec![Cell::from("x"), Cell::Integer(1)],
                vec![Cell::from("y"), Cell::Integer(2)],
                vec![Cell::from("x"), Cell::Integer(3)],
                vec![Cell::from("y"), Cell::Integer(4)],
                vec![Cell::from("z"), Cell::Integer(5)],
            ],
        );
        let dupes = check_primary_key_uniqueness(&data, &["k"]).unwrap();
        let values: Vec<_> = dupes.column("v").unwrap().cloned().collect();
        assert_eq!(
            values,
            vec![
                Cell::Integer(1),
                Cell::Integer(2),
                Cell::Integer(3),
                Cell::Integer(4)
            ]
        );
    }

    #[test]
    fn test_pk_errors() {
        let empty: [&str; 0] = [];
        assert!(matches!(
            check_primary_key_uniqueness(&fact(), &empty),
            Err(Error::InvalidCheck(_))
        ));
        assert_eq!(
            check_primary_key_uniqueness(&fact(), &["nope"]).unwrap_err(),
            Error::ColumnNotFound("nope".to_string())
        );
    }

    #[test]
    fn test_fk_orphans() {
        let dim = table(&["sku_id"], vec![vec![Cell::from("B")]]);
        let orphans = check_foreign_key(&fact(), &dim, "sku_id").unwrap();
        assert_eq!(orphans.row_count(), 2);

        let dim = table(&["sku_id"], vec![vec![Cell::from("A")]]);
        assert!(check_foreign_key(&fact(), &dim, "sku_id").unwrap().is_empty());
    }

    #[test]
    fn test_fk_missing_column() {
        let dim = table(&["other"], vec![]);
        assert!(check_foreign_key(&fact(), &dim, "sku_id").is_err());
    }

    #[test]
    fn test_run_check_from_json_definition() {
        let check: CheckType =
            serde_json::from_value(json!({"type": "primary_key", "columns": ["sku_id"]})).unwrap();
        let finding = run_check(&check, "fact_avgs_tbl", &fact(), None)
            .unwrap()
            .expect("duplicate keys should be reported");
        assert_eq!(finding.kind, FindingKind::PkDuplicate);
        assert_eq!(finding.table, "fact_avgs_tbl");
        assert_eq!(finding.offending_count(), 2);
    }

    #[test]
    fn test_run_check_passes() {
        let check: CheckType = serde_json::from_value(json!({"type": "not_null"})).unwrap();
        assert!(run_check(&check, "fact", &fact(), None).unwrap().is_none());
    }

    #[test]
    fn test_run_foreign_key_requires_reference() {
        let check = CheckType::ForeignKey {
            column: "sku_id".to_string(),
            reference_table: "hier_prod_tbl".to_string(),
        };
        assert!(matches!(
            run_check(&check, "fact", &fact(), None),
            Err(Error::InvalidCheck(_))
        ));

        let dim = table(&["sku_id"], vec![vec![Cell::from("B")]]);
        let finding = run_check(&check, "fact", &fact(), Some(&dim))
            .unwrap()
            .unwrap();
        assert_eq!(finding.kind, FindingKind::FkOrphan);
        assert_eq!(check.type_name(), "foreign_key");
    }
}
