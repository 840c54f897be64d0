//! The database operations replication is built on.

use anyhow::Result;
use async_trait::async_trait;
use mysql_async::Value;
use mysql_types::{AddColumnOp, ConflictKey, IndexColumn};

/// A row, aligned with the column projection it was fetched with.
pub type Row = Vec<Value>;

/// Catalog reads, page reads and writes against one MySQL database.
///
/// The replicator only ever issues one call at a time and awaits it before
/// issuing the next.
#[async_trait]
pub trait Database: Send + Sync {
    /// Short name for log lines ("source", "destination").
    fn label(&self) -> &str;

    /// Base tables of the current schema, in name order.
    async fn list_tables(&self) -> Result<Vec<String>>;

    /// Native `CREATE TABLE` text for `table`.
    async fn show_create_table(&self, table: &str) -> Result<String>;

    /// `SHOW INDEX` rows for `table`, in catalog order.
    async fn index_columns(&self, table: &str) -> Result<Vec<IndexColumn>>;

    /// Column names in ordinal order. Empty when the table doesn't exist.
    async fn column_names(&self, table: &str) -> Result<Vec<String>>;

    /// Columns that accept explicit values, in ordinal order. Generated
    /// columns are left out.
    async fn insertable_columns(&self, table: &str) -> Result<Vec<String>>;

    async fn count_rows(&self, table: &str) -> Result<u64>;

    /// Rows `[offset, offset + limit)` of `columns`, ascending by `anchor`.
    async fn fetch_page(
        &self,
        table: &str,
        columns: &[String],
        anchor: &str,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Row>>;

    /// Run `create_stmt` as `CREATE TABLE IF NOT EXISTS`.
    async fn create_table_if_missing(&self, table: &str, create_stmt: &str) -> Result<()>;

    async fn add_column(&self, table: &str, op: &AddColumnOp) -> Result<()>;

    /// Insert `rows` in one statement, merging on `key` when it is non-empty.
    async fn write_rows(
        &self,
        table: &str,
        columns: &[String],
        rows: &[Row],
        key: &ConflictKey,
    ) -> Result<()>;

    /// Release the underlying connections.
    async fn close(&self) -> Result<()>;
}
