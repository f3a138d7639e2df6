//! In-memory typed tables materialized from warehouse results
//!
//! A [`TabularResult`] is built once per completed fetch and is read-only
//! afterwards. Column order defines field identity: names are resolved to
//! positions once, and every row is exactly as wide as the column list.
//! Labels may repeat, as in `SELECT 1, 1`; only looking such a label up by
//! name is an error.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single typed cell value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    String(String),
    Integer(i64),
    Double(f64),
    Null,
}

impl Cell {
    /// Returns true for SQL NULL
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    /// Returns the string payload, if this is a string cell
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Cell::String(s) => Some(s),
            _ => None,
        }
    }

    /// Interpret the cell as an integer.
    ///
    /// String cells are parsed, since count probes may come back as text
    /// depending on the warehouse driver.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Cell::Integer(v) => Some(*v),
            Cell::String(s) => s.trim().parse().ok(),
            Cell::Double(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    /// Hashable identity of the cell, used for key tuples.
    ///
    /// Doubles compare by bit pattern so that the key is `Eq`; two nulls
    /// are the same key.
    pub fn key(&self) -> CellKey<'_> {
        match self {
            Cell::String(s) => CellKey::String(s),
            Cell::Integer(v) => CellKey::Integer(*v),
            Cell::Double(v) => CellKey::Double(v.to_bits()),
            Cell::Null => CellKey::Null,
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::String(s) => write!(f, "{}", s),
            Cell::Integer(v) => write!(f, "{}", v),
            Cell::Double(v) => write!(f, "{}", v),
            Cell::Null => write!(f, "NULL"),
        }
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::String(value.to_string())
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::String(value)
    }
}

impl From<i64> for Cell {
    fn from(value: i64) -> Self {
        Cell::Integer(value)
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::Double(value)
    }
}

impl<T: Into<Cell>> From<Option<T>> for Cell {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Cell::Null)
    }
}

/// Borrowed, hashable view of a [`Cell`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellKey<'a> {
    String(&'a str),
    Integer(i64),
    Double(u64),
    Null,
}

/// Ordered column names plus ordered fixed-width rows
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct TabularResult {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl TabularResult {
    /// Build a table, rejecting ragged rows
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Cell>>) -> Result<Self> {
        for (idx, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(Error::RowWidthMismatch {
                    row: idx,
                    expected: columns.len(),
                    actual: row.len(),
                });
            }
        }

        Ok(Self { columns, rows })
    }

    /// Create an empty table with the given schema
    pub fn empty(columns: Vec<String>) -> Result<Self> {
        Self::new(columns, Vec::new())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Resolve a column name to its position.
    ///
    /// Fails if no column or more than one column carries the name.
    pub fn column_index(&self, name: &str) -> Result<usize> {
        let mut matches = self
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| *c == name)
            .map(|(idx, _)| idx);

        let idx = matches
            .next()
            .ok_or_else(|| Error::ColumnNotFound(name.to_string()))?;
        if matches.next().is_some() {
            return Err(Error::AmbiguousColumn(name.to_string()));
        }
        Ok(idx)
    }

    /// Iterate over the values of one column, in row order
    pub fn column(&self, name: &str) -> Result<impl Iterator<Item = &Cell> + '_> {
        let idx = self.column_index(name)?;
        Ok(self.rows.iter().map(move |row| &row[idx]))
    }

    /// The first `n` rows, with the same schema
    pub fn head(&self, n: usize) -> TabularResult {
        Self {
            columns: self.columns.clone(),
            rows: self.rows.iter().take(n).cloned().collect(),
        }
    }

    /// Copy out the rows at `indices`, in the order given.
    ///
    /// Out-of-range indices are ignored.
    pub fn select_rows(&self, indices: &[usize]) -> TabularResult {
        Self {
            columns: self.columns.clone(),
            rows: indices
                .iter()
                .filter_map(|&idx| self.rows.get(idx).cloned())
                .collect(),
        }
    }
}

impl fmt::Display for TabularResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<Vec<String>> = self
            .rows
            .iter()
            .map(|row| row.iter().map(|c| c.to_string()).collect())
            .collect();

        let widths: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .map(|(idx, name)| {
                rendered
                    .iter()
                    .map(|row| row[idx].len())
                    .chain(std::iter::once(name.len()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        let header: Vec<String> = self
            .columns
            .iter()
            .zip(&widths)
            .map(|(name, w)| format!("{:<w$}", name, w = *w))
            .collect();
        writeln!(f, "{}", header.join(" | ").trim_end())?;

        for row in &rendered {
            let line: Vec<String> = row
                .iter()
                .zip(&widths)
                .map(|(value, w)| format!("{:<w$}", value, w = *w))
                .collect();
            writeln!(f, "{}", line.join(" | ").trim_end())?;
        }

        write!(f, "({} rows)", self.rows.len())
    }
}
