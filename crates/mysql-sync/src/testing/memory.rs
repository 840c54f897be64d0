//! In-memory [`Database`] for exercising replication without a server.
//!
//! Tables are column lists parsed from `CREATE TABLE` text plus a vector of
//! rows. Writes with a conflict key merge on that key the way
//! `INSERT ... ON DUPLICATE KEY UPDATE` does; writes without one append.
//! Writes naming a generated column are rejected, as MySQL does. Generated
//! values themselves are never computed and stay NULL.

use crate::database::{Database, Row};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use mysql_async::Value;
use mysql_types::{
    parse_create_table_columns, render_create_table, with_if_not_exists, AddColumnOp,
    ColumnDefinition, ConflictKey, IndexColumn, Position,
};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct MemoryTable {
    columns: Vec<ColumnDefinition>,
    indexes: Vec<IndexColumn>,
    rows: Vec<Row>,
}

impl MemoryTable {
    fn position(&self, column: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(column))
    }

    fn positions(&self, table: &str, columns: &[String]) -> Result<Vec<usize>> {
        columns
            .iter()
            .map(|c| {
                self.position(c)
                    .ok_or_else(|| anyhow!("Unknown column '{c}' in '{table}'"))
            })
            .collect()
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: BTreeMap<String, MemoryTable>,
    statements: Vec<String>,
    writes: usize,
    failing: HashSet<String>,
    ignore_creates: bool,
    closed: bool,
}

impl MemoryState {
    fn table(&self, name: &str) -> Result<&MemoryTable> {
        self.tables
            .get(name)
            .ok_or_else(|| anyhow!("Table '{name}' doesn't exist"))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut MemoryTable> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| anyhow!("Table '{name}' doesn't exist"))
    }
}

/// Shared handle to an in-memory database. Clones see the same data.
#[derive(Debug, Clone)]
pub struct MemoryDatabase {
    label: String,
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryDatabase {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            state: Arc::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        // A panic in another test thread must not hide this test's result.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create `table` from `ddl` without recording a statement.
    pub fn add_table(&self, table: &str, ddl: &str, indexes: Vec<IndexColumn>) -> Result<()> {
        let columns = parse_create_table_columns(ddl)?;
        if columns.is_empty() {
            bail!("No columns found in DDL for '{table}'");
        }
        self.lock().tables.insert(
            table.to_string(),
            MemoryTable {
                columns,
                indexes,
                rows: Vec::new(),
            },
        );
        Ok(())
    }

    /// Append full-width rows to `table`.
    pub fn insert_rows(&self, table: &str, rows: Vec<Row>) -> Result<()> {
        let mut state = self.lock();
        let t = state.table_mut(table)?;
        if let Some(bad) = rows.iter().find(|r| r.len() != t.columns.len()) {
            bail!(
                "Row has {} values but '{}' has {} columns",
                bad.len(),
                table,
                t.columns.len()
            );
        }
        t.rows.extend(rows);
        Ok(())
    }

    /// Mutate every row of `table` in place.
    pub fn update_rows(&self, table: &str, mut f: impl FnMut(&mut Row)) -> Result<()> {
        let mut state = self.lock();
        state.table_mut(table)?.rows.iter_mut().for_each(|r| f(r));
        Ok(())
    }

    /// Rows of `table` in storage order.
    pub fn rows(&self, table: &str) -> Result<Vec<Row>> {
        Ok(self.lock().table(table)?.rows.clone())
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.lock().tables.contains_key(table)
    }

    /// DDL statements received through [`Database`] calls, in order.
    pub fn statements(&self) -> Vec<String> {
        self.lock().statements.clone()
    }

    /// Number of `write_rows` calls received.
    pub fn write_count(&self) -> usize {
        self.lock().writes
    }

    /// Make every later write to `table` fail.
    pub fn fail_writes_to(&self, table: &str) {
        self.lock().failing.insert(table.to_string());
    }

    /// Accept `CREATE TABLE` statements without creating anything, like a
    /// server that folds table names to lower case.
    pub fn ignore_creates(&self) {
        self.lock().ignore_creates = true;
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

/// Total order over the value shapes tests use; mixed shapes fall back to
/// their debug text.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::NULL, Value::NULL) => Ordering::Equal,
        (Value::NULL, _) => Ordering::Less,
        (_, Value::NULL) => Ordering::Greater,
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::UInt(x), Value::UInt(y)) => x.cmp(y),
        (Value::Int(x), Value::UInt(y)) => i128::from(*x).cmp(&i128::from(*y)),
        (Value::UInt(x), Value::Int(y)) => i128::from(*x).cmp(&i128::from(*y)),
        (Value::Double(x), Value::Double(y)) => x.total_cmp(y),
        (Value::Float(x), Value::Float(y)) => x.total_cmp(y),
        (Value::Bytes(x), Value::Bytes(y)) => x.cmp(y),
        _ => format!("{a:?}").cmp(&format!("{b:?}")),
    }
}

fn key_of(row: &Row, positions: &[usize]) -> String {
    positions
        .iter()
        .map(|&p| format!("{:?}", row[p]))
        .collect::<Vec<_>>()
        .join("\u{1f}")
}

#[async_trait]
impl Database for MemoryDatabase {
    fn label(&self) -> &str {
        &self.label
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        Ok(self.lock().tables.keys().cloned().collect())
    }

    async fn show_create_table(&self, table: &str) -> Result<String> {
        let state = self.lock();
        Ok(render_create_table(table, &state.table(table)?.columns))
    }

    async fn index_columns(&self, table: &str) -> Result<Vec<IndexColumn>> {
        Ok(self.lock().table(table)?.indexes.clone())
    }

    async fn column_names(&self, table: &str) -> Result<Vec<String>> {
        Ok(self
            .lock()
            .tables
            .get(table)
            .map(|t| t.columns.iter().map(|c| c.name.clone()).collect())
            .unwrap_or_default())
    }

    async fn insertable_columns(&self, table: &str) -> Result<Vec<String>> {
        Ok(self
            .lock()
            .table(table)?
            .columns
            .iter()
            .filter(|c| !c.is_generated())
            .map(|c| c.name.clone())
            .collect())
    }

    async fn count_rows(&self, table: &str) -> Result<u64> {
        Ok(self.lock().table(table)?.rows.len() as u64)
    }

    async fn fetch_page(
        &self,
        table: &str,
        columns: &[String],
        anchor: &str,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Row>> {
        let state = self.lock();
        let t = state.table(table)?;
        let projection = t.positions(table, columns)?;
        let anchor = t
            .position(anchor)
            .ok_or_else(|| anyhow!("Unknown column '{anchor}' in '{table}'"))?;

        let mut sorted: Vec<&Row> = t.rows.iter().collect();
        sorted.sort_by(|a, b| compare_values(&a[anchor], &b[anchor]));

        Ok(sorted
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .map(|row| projection.iter().map(|&p| row[p].clone()).collect())
            .collect())
    }

    async fn create_table_if_missing(&self, table: &str, create_stmt: &str) -> Result<()> {
        let mut state = self.lock();
        state.statements.push(with_if_not_exists(create_stmt));
        if state.ignore_creates || state.tables.contains_key(table) {
            return Ok(());
        }
        let columns = parse_create_table_columns(create_stmt)?;
        state.tables.insert(
            table.to_string(),
            MemoryTable {
                columns,
                ..MemoryTable::default()
            },
        );
        Ok(())
    }

    async fn add_column(&self, table: &str, op: &AddColumnOp) -> Result<()> {
        let mut state = self.lock();
        let t = state.table_mut(table)?;
        if t.position(&op.column.name).is_some() {
            bail!("Duplicate column name '{}'", op.column.name);
        }
        let at = match &op.position {
            Position::First => 0,
            Position::After(anchor) => {
                t.position(anchor)
                    .ok_or_else(|| anyhow!("Unknown column '{anchor}' in '{table}'"))?
                    + 1
            }
        };
        t.columns.insert(at, op.column.clone());
        for row in &mut t.rows {
            row.insert(at, Value::NULL);
        }
        state.statements.push(op.to_sql(table));
        Ok(())
    }

    async fn write_rows(
        &self,
        table: &str,
        columns: &[String],
        rows: &[Row],
        key: &ConflictKey,
    ) -> Result<()> {
        let mut state = self.lock();
        state.writes += 1;
        if state.failing.contains(table) {
            bail!("Simulated write failure for '{table}'");
        }

        let t = state.table_mut(table)?;
        let targets = t.positions(table, columns)?;
        if let Some(&generated) = targets.iter().find(|&&p| t.columns[p].is_generated()) {
            bail!(
                "The value specified for generated column '{}' in table '{}' is not allowed",
                t.columns[generated].name,
                table
            );
        }
        let key_positions = t.positions(table, key.columns())?;
        let width = t.columns.len();

        let mut existing: HashMap<String, usize> = if key.is_empty() {
            HashMap::new()
        } else {
            t.rows
                .iter()
                .enumerate()
                .map(|(idx, row)| (key_of(row, &key_positions), idx))
                .collect()
        };

        for incoming in rows {
            let mut full = vec![Value::NULL; width];
            for (value, &target) in incoming.iter().zip(&targets) {
                full[target] = value.clone();
            }

            if key.is_empty() {
                t.rows.push(full);
                continue;
            }

            let k = key_of(&full, &key_positions);
            match existing.get(&k) {
                Some(&idx) => {
                    for &target in &targets {
                        if !key_positions.contains(&target) {
                            t.rows[idx][target] = full[target].clone();
                        }
                    }
                }
                None => {
                    existing.insert(k, t.rows.len());
                    t.rows.push(full);
                }
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.lock().closed = true;
        Ok(())
    }
}
