//! MySQL client utilities
//!
//! Connection pools and the mysql_async implementation of [`Database`].

use crate::config::sanitize_connection_string;
use crate::database::{Database, Row};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, OptsBuilder, Params, Pool, PoolConstraints, PoolOpts};
use mysql_types::{
    count_rows_sql, insert_sql, quote_identifier, select_page_sql, with_if_not_exists,
    AddColumnOp, ConflictKey, IndexColumn,
};
use tracing::{debug, info};

/// Pool bounds used for both ends of a run.
const POOL_MIN_CONNECTIONS: usize = 2;
const POOL_MAX_CONNECTIONS: usize = 10;

/// Session setup for destination connections. Tables are created and filled
/// in name order, not dependency order.
const DESTINATION_SETUP: &[&str] = &["SET SESSION foreign_key_checks = 0"];

/// Connection options for a pool whose sessions all run `setup`.
///
/// `setup` runs on every new connection and again each time the pool resets a
/// returned one. `init` would only run once per physical connection.
pub fn mysql_pool_opts(connection_string: &str, setup: &[&str]) -> Result<Opts> {
    let opts = Opts::from_url(connection_string).map_err(|e| {
        anyhow!(
            "Invalid MySQL connection string '{}': {}",
            sanitize_connection_string(connection_string),
            e
        )
    })?;
    let constraints = PoolConstraints::new(POOL_MIN_CONNECTIONS, POOL_MAX_CONNECTIONS)
        .unwrap_or_default();
    let builder = OptsBuilder::from_opts(opts)
        .pool_opts(PoolOpts::default().with_constraints(constraints))
        .setup(setup.to_vec());
    Ok(builder.into())
}

/// Create a new MySQL connection pool
pub fn new_mysql_pool(connection_string: &str, setup: &[&str]) -> Result<Pool> {
    Ok(Pool::new(mysql_pool_opts(connection_string, setup)?))
}

/// A MySQL database reached through a connection pool.
pub struct MySqlDatabase {
    pool: Pool,
    label: String,
}

impl MySqlDatabase {
    /// Connect to the database that rows are read from.
    pub async fn connect_source(uri: &str) -> Result<Self> {
        Self::connect("source", uri, &[]).await
    }

    /// Connect to the database that rows are written to.
    pub async fn connect_destination(uri: &str) -> Result<Self> {
        Self::connect("destination", uri, DESTINATION_SETUP).await
    }

    async fn connect(label: &str, uri: &str, setup: &[&str]) -> Result<Self> {
        let pool = new_mysql_pool(uri, setup)?;
        let db = Self {
            pool,
            label: label.to_string(),
        };

        // Fail fast on bad credentials or a URI without a database name.
        let mut conn = db.conn().await.map_err(|e| {
            anyhow!(
                "Failed to connect to {} MySQL at '{}': {:#}",
                label,
                sanitize_connection_string(uri),
                e
            )
        })?;
        let current_db: Option<Option<String>> = conn.query_first("SELECT DATABASE()").await?;
        let Some(database) = current_db.flatten() else {
            drop(conn);
            db.close().await?;
            return Err(anyhow!(
                "No database selected in {} connection string '{}'",
                label,
                sanitize_connection_string(uri)
            ));
        };

        info!(
            "Connected to {} database '{}' at {}",
            label,
            database,
            sanitize_connection_string(uri)
        );
        Ok(db)
    }

    async fn conn(&self) -> Result<Conn> {
        self.pool
            .get_conn()
            .await
            .with_context(|| format!("Failed to get {} connection from pool", self.label))
    }
}

/// Typed value of a named column in a `SHOW INDEX` row.
fn index_field<T: FromValue>(row: &mysql_async::Row, name: &str) -> Result<T> {
    row.get_opt::<T, _>(name)
        .ok_or_else(|| anyhow!("SHOW INDEX result has no '{name}' column"))?
        .map_err(|e| anyhow!("Unexpected '{name}' value in SHOW INDEX result: {e}"))
}

#[async_trait]
impl Database for MySqlDatabase {
    fn label(&self) -> &str {
        &self.label
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        let query = "
            SELECT TABLE_NAME
            FROM information_schema.TABLES
            WHERE TABLE_SCHEMA = DATABASE()
            AND TABLE_TYPE = 'BASE TABLE'
            ORDER BY TABLE_NAME";

        let mut conn = self.conn().await?;
        let tables: Vec<String> = conn.query(query).await?;
        Ok(tables)
    }

    async fn show_create_table(&self, table: &str) -> Result<String> {
        let mut conn = self.conn().await?;
        let row: Option<(String, String)> = conn
            .query_first(format!("SHOW CREATE TABLE {}", quote_identifier(table)))
            .await?;
        row.map(|(_, ddl)| ddl)
            .ok_or_else(|| anyhow!("SHOW CREATE TABLE returned nothing for '{table}'"))
    }

    async fn index_columns(&self, table: &str) -> Result<Vec<IndexColumn>> {
        let mut conn = self.conn().await?;
        let rows: Vec<mysql_async::Row> = conn
            .query(format!("SHOW INDEX FROM {}", quote_identifier(table)))
            .await?;

        rows.iter()
            .map(|row| -> Result<IndexColumn> {
                let non_unique: i64 = index_field(row, "Non_unique")?;
                Ok(IndexColumn {
                    key_name: index_field(row, "Key_name")?,
                    non_unique: non_unique != 0,
                    seq_in_index: index_field(row, "Seq_in_index")?,
                    column_name: index_field(row, "Column_name")?,
                })
            })
            .collect()
    }

    async fn column_names(&self, table: &str) -> Result<Vec<String>> {
        let query = "
            SELECT COLUMN_NAME
            FROM information_schema.COLUMNS
            WHERE TABLE_SCHEMA = DATABASE()
            AND TABLE_NAME = ?
            ORDER BY ORDINAL_POSITION";

        let mut conn = self.conn().await?;
        let columns: Vec<String> = conn.exec(query, (table,)).await?;
        Ok(columns)
    }

    async fn insertable_columns(&self, table: &str) -> Result<Vec<String>> {
        // EXTRA is "VIRTUAL GENERATED" or "STORED GENERATED" for generated
        // columns; "DEFAULT_GENERATED" only marks an expression default.
        let query = "
            SELECT COLUMN_NAME
            FROM information_schema.COLUMNS
            WHERE TABLE_SCHEMA = DATABASE()
            AND TABLE_NAME = ?
            AND EXTRA NOT LIKE '%VIRTUAL GENERATED%'
            AND EXTRA NOT LIKE '%STORED GENERATED%'
            ORDER BY ORDINAL_POSITION";

        let mut conn = self.conn().await?;
        let columns: Vec<String> = conn.exec(query, (table,)).await?;
        Ok(columns)
    }

    async fn count_rows(&self, table: &str) -> Result<u64> {
        let mut conn = self.conn().await?;
        let count: Option<u64> = conn.query_first(count_rows_sql(table)).await?;
        Ok(count.unwrap_or(0))
    }

    async fn fetch_page(
        &self,
        table: &str,
        columns: &[String],
        anchor: &str,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Row>> {
        let query = select_page_sql(table, columns, anchor, offset, limit);
        debug!("{} query: {}", self.label, query);

        // Text protocol: temporal values come back as strings and are
        // written back unchanged.
        let mut conn = self.conn().await?;
        let rows: Vec<mysql_async::Row> = conn.query(query).await?;
        Ok(rows.into_iter().map(mysql_async::Row::unwrap).collect())
    }

    async fn create_table_if_missing(&self, table: &str, create_stmt: &str) -> Result<()> {
        let stmt = with_if_not_exists(create_stmt);
        debug!("Ensuring table '{}' exists on {}", table, self.label);

        let mut conn = self.conn().await?;
        conn.query_drop(stmt).await?;
        Ok(())
    }

    async fn add_column(&self, table: &str, op: &AddColumnOp) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.query_drop(op.to_sql(table)).await?;
        Ok(())
    }

    async fn write_rows(
        &self,
        table: &str,
        columns: &[String],
        rows: &[Row],
        key: &ConflictKey,
    ) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let sql = insert_sql(table, columns, rows.len(), key);
        let params: Vec<mysql_async::Value> = rows.iter().flatten().cloned().collect();

        let mut conn = self.conn().await?;
        conn.exec_drop(sql, Params::Positional(params)).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pool.clone().disconnect().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_setup_survives_pool_reset() {
        let opts =
            mysql_pool_opts("mysql://root:pw@localhost:3306/dst", DESTINATION_SETUP).unwrap();
        assert_eq!(opts.setup(), ["SET SESSION foreign_key_checks = 0".to_string()]);
        assert!(opts.init().is_empty());

        let constraints = opts.pool_opts().constraints();
        assert_eq!(constraints.min(), POOL_MIN_CONNECTIONS);
        assert_eq!(constraints.max(), POOL_MAX_CONNECTIONS);
    }
}
