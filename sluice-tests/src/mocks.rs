//! In-memory warehouse for pipeline tests
//!
//! `MockWarehouse` implements `WarehouseService` and understands exactly
//! the statement forms rendered by `sluice_core::sql`. Statements run at
//! submission time; the job then reports "transient unavailable" for a
//! configurable number of polls before its terminal status, so the poller
//! sees the same submit-then-poll shape as a real warehouse.
//!
//! Failures can be scripted per statement pattern, either as a rejection at
//! submission or as a FAILED status at poll time.

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use sluice_core::{Cell, ColumnSpec, ColumnType, TableDefinition, TabularResult};
use sluice_runtime::warehouse::{
    ColumnMetadata, JobHandle, PollResponse, RawResult, WarehouseError, WarehouseService,
    WarehouseTarget, WireField,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

lazy_static! {
    static ref SCHEMA_PROBE: Regex = Regex::new(
        r"^SELECT 1 FROM information_schema\.schemata WHERE schema_name = '([^']*)'$"
    )
    .unwrap();
    static ref TABLE_PROBE: Regex = Regex::new(
        r"^SELECT 1 FROM information_schema\.tables WHERE table_schema = '([^']*)' AND table_name = '([^']*)'$"
    )
    .unwrap();
    static ref CREATE_SCHEMA: Regex = Regex::new(r"^CREATE SCHEMA (\w+)$").unwrap();
    static ref CREATE_AGGREGATE: Regex = Regex::new(
        r"^CREATE TABLE IF NOT EXISTS (\w+\.\w+) AS SELECT (.+) FROM (\w+\.\w+) GROUP BY (.+)$"
    )
    .unwrap();
    static ref CREATE_TABLE: Regex =
        Regex::new(r"^CREATE TABLE IF NOT EXISTS (\w+\.\w+) \((.+)\)$").unwrap();
    static ref TRUNCATE: Regex = Regex::new(r"^TRUNCATE TABLE (\w+\.\w+)$").unwrap();
    static ref INSERT_SELECT: Regex = Regex::new(
        r"^INSERT INTO (\w+\.\w+) \(([^)]+)\) SELECT (.+) FROM (\w+\.\w+)$"
    )
    .unwrap();
    static ref SELECT_ALL: Regex = Regex::new(r"^SELECT \* FROM (\w+\.\w+)$").unwrap();
    static ref COUNT_ROWS: Regex =
        Regex::new(r"^SELECT COUNT\(\*\) AS (\w+) FROM (\w+\.\w+)$").unwrap();
    static ref COPY: Regex = Regex::new(
        r"^COPY (\w+\.\w+) FROM '([^']*)' IAM_ROLE '([^']*)'(?: REGION '([^']*)')? DELIMITER '\|' IGNOREHEADER 1$"
    )
    .unwrap();
    static ref SUM_ITEM: Regex = Regex::new(r"^SUM\((\w+)\) AS (\w+)$").unwrap();
}

/// Collapse runs of whitespace so patterns see one canonical form
fn normalize(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn split_list(list: &str) -> Vec<String> {
    list.split(',').map(|s| s.trim().to_string()).collect()
}

#[derive(Debug, Clone)]
struct MockTable {
    columns: Vec<ColumnSpec>,
    rows: Vec<Vec<Cell>>,
}

impl MockTable {
    fn index_of(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == column)
    }

    fn to_result(&self) -> Result<TabularResult, String> {
        TabularResult::new(
            self.columns.iter().map(|c| c.name.clone()).collect(),
            self.rows.clone(),
        )
        .map_err(|e| e.to_string())
    }
}

struct Job {
    outcome: Result<Option<TabularResult>, String>,
    remaining_unavailable: u32,
}

struct Rule {
    pattern: Regex,
    reason: String,
}

#[derive(Default)]
struct MockState {
    schemas: BTreeSet<String>,
    tables: HashMap<String, MockTable>,
    blobs: HashMap<String, String>,
    jobs: HashMap<String, Job>,
    statements: Vec<String>,
    transient_polls: u32,
    rejections: Vec<Rule>,
    failures: Vec<Rule>,
    polls: u32,
}

/// In-memory warehouse with scripted latency and failures
pub struct MockWarehouse {
    state: Mutex<MockState>,
}

impl Default for MockWarehouse {
    fn default() -> Self {
        Self::new()
    }
}

impl MockWarehouse {
    /// A warehouse containing only the `public` schema
    pub fn new() -> Self {
        let mut state = MockState::default();
        state.schemas.insert("public".to_string());
        Self {
            state: Mutex::new(state),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().expect("mock warehouse lock poisoned")
    }

    /// Polls that answer "transient unavailable" before each job's terminal status
    pub fn set_transient_polls(&self, polls: u32) {
        self.state().transient_polls = polls;
    }

    /// Reject statements matching `pattern` at submission
    pub fn reject_statements_matching(&self, pattern: &str, reason: &str) {
        self.state().rejections.push(Rule {
            pattern: Regex::new(pattern).expect("valid rejection pattern"),
            reason: reason.to_string(),
        });
    }

    /// Report FAILED for statements matching `pattern`; they are not executed
    pub fn fail_statements_matching(&self, pattern: &str, reason: &str) {
        self.state().failures.push(Rule {
            pattern: Regex::new(pattern).expect("valid failure pattern"),
            reason: reason.to_string(),
        });
    }

    /// Make a file available to COPY statements
    pub fn put_blob(&self, path: &str, contents: &str) {
        self.state()
            .blobs
            .insert(path.to_string(), contents.to_string());
    }

    pub fn create_schema(&self, schema: &str) {
        self.state().schemas.insert(schema.to_string());
    }

    /// Create a table (and its schema) holding `rows`
    pub fn seed_table(&self, table: &TableDefinition, rows: Vec<Vec<Cell>>) {
        let mut state = self.state();
        state.schemas.insert(table.schema.clone());
        state.tables.insert(
            table.qualified_name(),
            MockTable {
                columns: table.columns.clone(),
                rows,
            },
        );
    }

    pub fn has_schema(&self, schema: &str) -> bool {
        self.state().schemas.contains(schema)
    }

    pub fn has_table(&self, qualified_name: &str) -> bool {
        self.state().tables.contains_key(qualified_name)
    }

    /// Current contents of a table
    pub fn table(&self, qualified_name: &str) -> Option<TabularResult> {
        self.state()
            .tables
            .get(qualified_name)
            .and_then(|t| t.to_result().ok())
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state().tables.keys().cloned().collect();
        names.sort();
        names
    }

    /// Every submitted statement, in submission order
    pub fn statements(&self) -> Vec<String> {
        self.state().statements.clone()
    }

    /// Number of submitted statements matching `pattern`
    pub fn count_statements(&self, pattern: &str) -> usize {
        let re = Regex::new(pattern).expect("valid statement pattern");
        self.state()
            .statements
            .iter()
            .filter(|s| re.is_match(s))
            .count()
    }

    pub fn poll_count(&self) -> u32 {
        self.state().polls
    }
}

impl MockState {
    fn execute(&mut self, sql: &str) -> Result<Option<TabularResult>, String> {
        if let Some(c) = SCHEMA_PROBE.captures(sql) {
            return probe_result(self.schemas.contains(&c[1]));
        }
        if let Some(c) = TABLE_PROBE.captures(sql) {
            let name = format!("{}.{}", &c[1], &c[2]);
            return probe_result(self.tables.contains_key(&name));
        }
        if let Some(c) = CREATE_SCHEMA.captures(sql) {
            if !self.schemas.insert(c[1].to_string()) {
                return Err(format!("schema \"{}\" already exists", &c[1]));
            }
            return Ok(None);
        }
        if let Some(c) = CREATE_AGGREGATE.captures(sql) {
            return self.create_aggregate(&c[1], &c[2], &c[3], &c[4]).map(|_| None);
        }
        if let Some(c) = CREATE_TABLE.captures(sql) {
            return self.create_table(&c[1], &c[2]).map(|_| None);
        }
        if let Some(c) = TRUNCATE.captures(sql) {
            self.table_mut(&c[1])?.rows.clear();
            return Ok(None);
        }
        if let Some(c) = INSERT_SELECT.captures(sql) {
            return self.insert_select(&c[1], &c[2], &c[3], &c[4]).map(|_| None);
        }
        if let Some(c) = SELECT_ALL.captures(sql) {
            return self.table_ref(&c[1])?.to_result().map(Some);
        }
        if let Some(c) = COUNT_ROWS.captures(sql) {
            let count = self.table_ref(&c[2])?.rows.len() as i64;
            return TabularResult::new(vec![c[1].to_string()], vec![vec![Cell::Integer(count)]])
                .map(Some)
                .map_err(|e| e.to_string());
        }
        if let Some(c) = COPY.captures(sql) {
            return self.copy(&c[1], &c[2]).map(|_| None);
        }
        Err(format!("syntax error: unsupported statement `{}`", sql))
    }

    fn table_ref(&self, name: &str) -> Result<&MockTable, String> {
        self.tables
            .get(name)
            .ok_or_else(|| format!("relation \"{}\" does not exist", name))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut MockTable, String> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| format!("relation \"{}\" does not exist", name))
    }

    fn require_schema(&self, qualified: &str) -> Result<(), String> {
        let schema = qualified.split('.').next().unwrap_or_default();
        if self.schemas.contains(schema) {
            Ok(())
        } else {
            Err(format!("schema \"{}\" does not exist", schema))
        }
    }

    fn create_table(&mut self, name: &str, column_list: &str) -> Result<(), String> {
        self.require_schema(name)?;
        if self.tables.contains_key(name) {
            return Ok(());
        }

        let columns = split_list(column_list)
            .into_iter()
            .map(|item| {
                let (column, type_name) = item
                    .split_once(' ')
                    .ok_or_else(|| format!("column definition `{}` has no type", item))?;
                Ok(ColumnSpec::new(column, parse_type(type_name)?))
            })
            .collect::<Result<Vec<_>, String>>()?;

        self.tables.insert(
            name.to_string(),
            MockTable {
                columns,
                rows: Vec::new(),
            },
        );
        Ok(())
    }

    fn create_aggregate(
        &mut self,
        name: &str,
        select_list: &str,
        source: &str,
        group_list: &str,
    ) -> Result<(), String> {
        self.require_schema(name)?;
        if self.tables.contains_key(name) {
            return Ok(());
        }

        let src = self.table_ref(source)?;
        let group_by = split_list(group_list);
        let group_idx = group_by
            .iter()
            .map(|c| {
                src.index_of(c)
                    .ok_or_else(|| format!("column \"{}\" does not exist", c))
            })
            .collect::<Result<Vec<_>, String>>()?;

        let mut columns = Vec::new();
        let mut sums = Vec::new();
        for item in split_list(select_list) {
            if let Some(c) = SUM_ITEM.captures(&item) {
                let idx = src
                    .index_of(&c[1])
                    .ok_or_else(|| format!("column \"{}\" does not exist", &c[1]))?;
                let column_type = match src.columns[idx].column_type {
                    ColumnType::Integer | ColumnType::BigInt => ColumnType::BigInt,
                    _ => ColumnType::Double,
                };
                columns.push(ColumnSpec::new(&c[2], column_type));
                sums.push(idx);
            } else {
                let pos = group_by
                    .iter()
                    .position(|g| *g == item)
                    .ok_or_else(|| format!("column \"{}\" must appear in GROUP BY", item))?;
                columns.push(src.columns[group_idx[pos]].clone());
            }
        }

        // Groups keep first-seen order
        let mut groups: Vec<(Vec<Cell>, Vec<Vec<&Cell>>)> = Vec::new();
        for row in &src.rows {
            let key: Vec<Cell> = group_idx.iter().map(|&i| row[i].clone()).collect();
            let values: Vec<&Cell> = sums.iter().map(|&i| &row[i]).collect();
            match groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, members)) => members.push(values),
                None => groups.push((key, vec![values])),
            }
        }

        let rows = groups
            .into_iter()
            .map(|(key, members)| {
                let mut row = key;
                for s in 0..sums.len() {
                    row.push(sum_cells(members.iter().map(|m| m[s])));
                }
                row
            })
            .collect();

        self.tables
            .insert(name.to_string(), MockTable { columns, rows });
        Ok(())
    }

    fn insert_select(
        &mut self,
        target: &str,
        target_list: &str,
        select_list: &str,
        source: &str,
    ) -> Result<(), String> {
        let target_columns = split_list(target_list);
        let select_columns = split_list(select_list);
        if target_columns.len() != select_columns.len() {
            return Err("INSERT has more target columns than expressions".to_string());
        }

        let src = self.table_ref(source)?;
        let src_idx = select_columns
            .iter()
            .map(|c| {
                src.index_of(c)
                    .ok_or_else(|| format!("column \"{}\" does not exist", c))
            })
            .collect::<Result<Vec<_>, String>>()?;
        let projected: Vec<Vec<Cell>> = src
            .rows
            .iter()
            .map(|row| src_idx.iter().map(|&i| row[i].clone()).collect())
            .collect();

        let dst = self.table_mut(target)?;
        let dst_idx = target_columns
            .iter()
            .map(|c| {
                dst.index_of(c)
                    .ok_or_else(|| format!("column \"{}\" of relation \"{}\" does not exist", c, target))
            })
            .collect::<Result<Vec<_>, String>>()?;

        for values in projected {
            let mut row = vec![Cell::Null; dst.columns.len()];
            for (value, &idx) in values.into_iter().zip(&dst_idx) {
                row[idx] = value;
            }
            dst.rows.push(row);
        }
        Ok(())
    }

    fn copy(&mut self, target: &str, path: &str) -> Result<(), String> {
        let contents = self
            .blobs
            .get(path)
            .cloned()
            .ok_or_else(|| format!("S3ServiceException: The specified key does not exist: {}", path))?;
        let dst = self.table_mut(target)?;

        let mut lines = contents.lines().filter(|l| !l.trim().is_empty());
        let header: Vec<&str> = lines
            .next()
            .ok_or_else(|| format!("{} has no header line", path))?
            .split('|')
            .map(str::trim)
            .collect();

        let positions: Vec<Option<usize>> = dst
            .columns
            .iter()
            .map(|c| header.iter().position(|h| *h == c.name))
            .collect();

        let mut loaded = Vec::new();
        for (line_no, line) in lines.enumerate() {
            let fields: Vec<&str> = line.split('|').collect();
            if fields.len() != header.len() {
                return Err(format!(
                    "Load into {} failed: line {} has {} fields, expected {}",
                    target,
                    line_no + 2,
                    fields.len(),
                    header.len()
                ));
            }
            let row = dst
                .columns
                .iter()
                .zip(&positions)
                .map(|(column, pos)| match pos {
                    Some(i) => parse_field(fields[*i], column.column_type),
                    None => Ok(Cell::Null),
                })
                .collect::<Result<Vec<_>, String>>()?;
            loaded.push(row);
        }

        dst.rows.extend(loaded);
        Ok(())
    }
}

fn probe_result(exists: bool) -> Result<Option<TabularResult>, String> {
    let rows = if exists {
        vec![vec![Cell::Integer(1)]]
    } else {
        Vec::new()
    };
    TabularResult::new(vec!["?column?".to_string()], rows)
        .map(Some)
        .map_err(|e| e.to_string())
}

fn parse_type(name: &str) -> Result<ColumnType, String> {
    match name {
        "VARCHAR" => Ok(ColumnType::Varchar),
        "INTEGER" => Ok(ColumnType::Integer),
        "BIGINT" => Ok(ColumnType::BigInt),
        "DOUBLE PRECISION" => Ok(ColumnType::Double),
        other => Err(format!("type \"{}\" does not exist", other)),
    }
}

fn parse_field(raw: &str, column_type: ColumnType) -> Result<Cell, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Cell::Null);
    }
    match column_type {
        ColumnType::Varchar => Ok(Cell::from(raw)),
        ColumnType::Integer | ColumnType::BigInt => raw
            .parse::<i64>()
            .map(Cell::Integer)
            .map_err(|_| format!("invalid integer \"{}\"", raw)),
        ColumnType::Double => raw
            .parse::<f64>()
            .map(Cell::Double)
            .map_err(|_| format!("invalid double \"{}\"", raw)),
    }
}

/// SUM over cells: integers stay integers, any double makes a double, nulls are skipped
fn sum_cells<'a>(cells: impl Iterator<Item = &'a Cell>) -> Cell {
    let mut int_sum: i64 = 0;
    let mut float_sum: f64 = 0.0;
    let mut seen = false;
    let mut any_double = false;

    for cell in cells {
        match cell {
            Cell::Integer(v) => {
                int_sum += v;
                float_sum += *v as f64;
                seen = true;
            }
            Cell::Double(v) => {
                float_sum += v;
                any_double = true;
                seen = true;
            }
            Cell::String(s) => {
                if let Ok(v) = s.parse::<f64>() {
                    float_sum += v;
                    any_double = true;
                    seen = true;
                }
            }
            Cell::Null => {}
        }
    }

    match (seen, any_double) {
        (false, _) => Cell::Null,
        (true, true) => Cell::Double(float_sum),
        (true, false) => Cell::Integer(int_sum),
    }
}

fn to_raw(table: &TabularResult) -> RawResult {
    RawResult {
        column_metadata: table
            .columns()
            .iter()
            .map(|c| ColumnMetadata::new(c.as_str()))
            .collect(),
        records: table
            .rows()
            .iter()
            .map(|row| row.iter().map(WireField::from).collect())
            .collect(),
    }
}

#[async_trait]
impl WarehouseService for MockWarehouse {
    async fn submit_statement(
        &self,
        _target: &WarehouseTarget,
        sql: &str,
    ) -> Result<JobHandle, WarehouseError> {
        let sql = normalize(sql);
        let mut state = self.state();
        state.statements.push(sql.clone());

        if let Some(rule) = state.rejections.iter().find(|r| r.pattern.is_match(&sql)) {
            return Err(WarehouseError::Rejected(rule.reason.clone()));
        }

        let failure = state
            .failures
            .iter()
            .find(|r| r.pattern.is_match(&sql))
            .map(|r| r.reason.clone());
        let outcome = match failure {
            Some(reason) => Err(reason),
            None => state.execute(&sql),
        };
        if let Err(reason) = &outcome {
            tracing::debug!(statement = %sql, reason = %reason, "Mock statement will fail");
        }

        let id = Uuid::new_v4().to_string();
        let remaining_unavailable = state.transient_polls;
        state.jobs.insert(
            id.clone(),
            Job {
                outcome,
                remaining_unavailable,
            },
        );
        Ok(JobHandle::new(id))
    }

    async fn poll_status(
        &self,
        _target: &WarehouseTarget,
        handle: &JobHandle,
    ) -> Result<PollResponse, WarehouseError> {
        let mut state = self.state();
        state.polls += 1;

        let job = state
            .jobs
            .get_mut(handle.as_str())
            .ok_or_else(|| WarehouseError::NotFound(format!("statement {}", handle)))?;

        if job.remaining_unavailable > 0 {
            job.remaining_unavailable -= 1;
            return Ok(PollResponse::TransientUnavailable);
        }
        Ok(match &job.outcome {
            Ok(_) => PollResponse::status(sluice_runtime::JobStatus::Finished),
            Err(reason) => PollResponse::failed(reason.clone()),
        })
    }

    async fn fetch_result(
        &self,
        _target: &WarehouseTarget,
        handle: &JobHandle,
    ) -> Result<RawResult, WarehouseError> {
        let state = self.state();
        let job = state
            .jobs
            .get(handle.as_str())
            .ok_or_else(|| WarehouseError::NotFound(format!("statement {}", handle)))?;

        if job.remaining_unavailable > 0 {
            return Err(WarehouseError::Transient(format!(
                "result of {} is not available yet",
                handle
            )));
        }
        match &job.outcome {
            Ok(Some(table)) => Ok(to_raw(table)),
            Ok(None) => Ok(RawResult::default()),
            Err(reason) => Err(WarehouseError::NotFound(format!(
                "statement {} failed and has no result: {}",
                handle, reason
            ))),
        }
    }
}
