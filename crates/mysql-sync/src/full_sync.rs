//! Full replication run.
//!
//! For every source table that isn't excluded:
//!
//! ```text
//! SHOW CREATE TABLE → CREATE TABLE IF NOT EXISTS → ADD COLUMN plan → conflict key → row copy
//! ```
//!
//! Tables are processed one after another. Every step is either additive
//! (schema) or idempotent per conflict key (rows), so an interrupted run is
//! resumed by simply running again.

use crate::client::MySqlDatabase;
use crate::config::ReplicationConfig;
use crate::database::Database;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::replicate::copy_table_rows;
use crate::schema::{apply_plan, reconcile_table_columns};
use anyhow::{bail, Context, Result};
use mysql_types::select_conflict_key;
use tracing::{error, info};

/// Outcome of one table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableReport {
    pub columns_added: usize,
    pub rows: u64,
}

/// Outcome of a whole run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Tables that completed
    pub tables: usize,
    pub rows_copied: u64,
    pub columns_added: usize,
    /// Tables that failed (only populated with `continue_on_error`)
    pub failed_tables: Vec<String>,
}

/// Replicates one MySQL database into another.
pub struct Replicator<S, D> {
    source: S,
    destination: D,
    config: ReplicationConfig,
}

impl Replicator<MySqlDatabase, MySqlDatabase> {
    /// Validate `config` and open both connection pools.
    pub async fn connect(config: ReplicationConfig) -> Result<Self> {
        config.validate()?;

        let source = MySqlDatabase::connect_source(&config.source_uri).await?;
        let destination = match MySqlDatabase::connect_destination(&config.destination_uri).await
        {
            Ok(destination) => destination,
            Err(e) => {
                let _ = source.close().await;
                return Err(e);
            }
        };

        Ok(Self::new(source, destination, config))
    }
}

impl<S: Database, D: Database> Replicator<S, D> {
    pub fn new(source: S, destination: D, config: ReplicationConfig) -> Self {
        Self {
            source,
            destination,
            config,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn destination(&self) -> &D {
        &self.destination
    }

    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    /// Source tables minus the exclusion list, in catalog order.
    pub async fn tables(&self) -> Result<Vec<String>> {
        let tables = self
            .source
            .list_tables()
            .await
            .context("Failed to list source tables")?;
        Ok(tables
            .into_iter()
            .filter(|t| !self.config.is_excluded(t))
            .collect())
    }

    /// Replicate every non-excluded table.
    pub async fn run(&self, sink: &mut dyn ProgressSink) -> Result<RunSummary> {
        if !self.config.exclude_tables.is_empty() {
            let excluded: Vec<&str> = self
                .config
                .exclude_tables
                .iter()
                .map(String::as_str)
                .collect();
            info!("Excluding tables: {}", excluded.join(", "));
        }
        if self.config.dry_run {
            info!("Dry-run mode: the destination will not be modified");
        }

        let tables = self.tables().await?;
        info!("Found {} tables to replicate", tables.len());

        let mut summary = RunSummary::default();
        for table in &tables {
            match self.sync_table(table, sink).await {
                Ok(report) => {
                    summary.tables += 1;
                    summary.rows_copied += report.rows;
                    summary.columns_added += report.columns_added;
                }
                Err(e) if self.config.continue_on_error => {
                    error!("Failed to replicate table '{}': {:#}", table, e);
                    sink.report(ProgressEvent::TableFailed {
                        table: table.clone(),
                        error: format!("{e:#}"),
                    });
                    summary.failed_tables.push(table.clone());
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            "Replication finished: {} tables, {} rows, {} columns added",
            summary.tables, summary.rows_copied, summary.columns_added
        );
        Ok(summary)
    }

    /// Reconcile the schema of `table` and copy its rows.
    pub async fn sync_table(
        &self,
        table: &str,
        sink: &mut dyn ProgressSink,
    ) -> Result<TableReport> {
        info!("Replicating table: {}", table);

        let create_stmt = self
            .source
            .show_create_table(table)
            .await
            .with_context(|| format!("Failed to read CREATE TABLE for '{table}'"))?;

        if !self.config.dry_run {
            self.destination
                .create_table_if_missing(table, &create_stmt)
                .await
                .with_context(|| format!("Failed to create table '{table}' on destination"))?;
        }

        let existing = self
            .destination
            .column_names(table)
            .await
            .with_context(|| format!("Failed to read destination columns of '{table}'"))?;

        let plan = match (existing.is_empty(), self.config.dry_run) {
            // Not created in dry-run: it would be created whole.
            (true, true) => {
                info!("Table '{}' would be created on destination", table);
                Vec::new()
            }
            (true, false) => bail!(
                "Table '{table}' not found on destination after CREATE TABLE IF NOT EXISTS \
                 (check lower_case_table_names on both servers)"
            ),
            (false, _) => reconcile_table_columns(table, &create_stmt, &existing),
        };
        let columns_added = apply_plan(&self.destination, table, &plan, self.config.dry_run)
            .await?;

        let indexes = self
            .source
            .index_columns(table)
            .await
            .with_context(|| format!("Failed to read indexes of '{table}'"))?;
        let key = select_conflict_key(&indexes);

        let rows = copy_table_rows(
            &self.source,
            &self.destination,
            table,
            &key,
            &self.config,
            sink,
        )
        .await?;

        sink.report(ProgressEvent::TableFinished {
            table: table.to_string(),
            rows,
        });

        Ok(TableReport {
            columns_added,
            rows,
        })
    }

    /// Release both connections. Both are attempted even if one fails.
    pub async fn close(&self) -> Result<()> {
        let source = self.source.close().await;
        let destination = self.destination.close().await;
        source.context("Failed to close source connection")?;
        destination.context("Failed to close destination connection")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_exclude_list;
    use crate::testing::MemoryDatabase;
    use mysql_async::Value;
    use mysql_types::IndexColumn;

    const USERS_DDL: &str = "CREATE TABLE `users` (
  `id` int NOT NULL,
  `name` varchar(50) DEFAULT NULL,
  PRIMARY KEY (`id`)
) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4";

    fn config() -> ReplicationConfig {
        ReplicationConfig::new("mysql://h/src", "mysql://h/dst")
    }

    fn user_rows(count: i64) -> Vec<Vec<Value>> {
        (1..=count)
            .map(|i| vec![Value::Int(i), Value::Bytes(format!("user {i}").into_bytes())])
            .collect()
    }

    fn add_simple_table(db: &MemoryDatabase, table: &str, rows: i64) {
        let ddl = format!("CREATE TABLE `{table}` (`id` int NOT NULL, PRIMARY KEY (`id`))");
        db.add_table(table, &ddl, vec![IndexColumn::new("PRIMARY", false, 1, "id")])
            .unwrap();
        db.insert_rows(table, (1..=rows).map(|i| vec![Value::Int(i)]).collect())
            .unwrap();
    }

    fn alters(db: &MemoryDatabase) -> Vec<String> {
        db.statements()
            .into_iter()
            .filter(|s| s.starts_with("ALTER TABLE"))
            .collect()
    }

    #[tokio::test]
    async fn test_users_end_to_end_and_rerun() {
        let source = MemoryDatabase::new("source");
        source
            .add_table(
                "users",
                USERS_DDL,
                vec![IndexColumn::new("PRIMARY", false, 1, "id")],
            )
            .unwrap();
        source.insert_rows("users", user_rows(12_000)).unwrap();
        let destination = MemoryDatabase::new("destination");

        let replicator = Replicator::new(source.clone(), destination.clone(), config());
        let mut events: Vec<ProgressEvent> = Vec::new();
        let summary = replicator.run(&mut events).await.unwrap();

        assert_eq!(summary.tables, 1);
        assert_eq!(summary.rows_copied, 12_000);
        assert_eq!(summary.columns_added, 0);
        assert_eq!(
            destination.column_names("users").await.unwrap(),
            vec!["id".to_string(), "name".to_string()]
        );
        assert_eq!(destination.rows("users").unwrap(), source.rows("users").unwrap());
        assert_eq!(
            events[0],
            ProgressEvent::TableStarted {
                table: "users".into(),
                total: 12_000,
                conflict_key: vec!["id".into()],
            }
        );
        let processed: Vec<u64> = events
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::RowsCopied { processed, .. } => Some(*processed),
                _ => None,
            })
            .collect();
        assert_eq!(processed, vec![5_000, 10_000, 12_000]);

        let summary = replicator.run(&mut Vec::<ProgressEvent>::new()).await.unwrap();
        assert_eq!(summary.columns_added, 0);
        assert_eq!(destination.count_rows("users").await.unwrap(), 12_000);
        assert_eq!(destination.rows("users").unwrap(), source.rows("users").unwrap());
        assert!(alters(&destination).is_empty());
    }

    #[tokio::test]
    async fn test_excluded_tables_are_skipped() {
        let source = MemoryDatabase::new("source");
        for table in ["users", "logs", "audit_trail", "orders"] {
            add_simple_table(&source, table, 3);
        }
        let destination = MemoryDatabase::new("destination");

        let mut config = config();
        config.exclude_tables = parse_exclude_list("logs, audit_trail");
        let replicator = Replicator::new(source, destination.clone(), config);

        assert_eq!(
            replicator.tables().await.unwrap(),
            vec!["orders".to_string(), "users".to_string()]
        );
        let summary = replicator.run(&mut Vec::<ProgressEvent>::new()).await.unwrap();
        assert_eq!(summary.tables, 2);
        assert_eq!(
            destination.list_tables().await.unwrap(),
            vec!["orders".to_string(), "users".to_string()]
        );
    }

    #[tokio::test]
    async fn test_new_source_columns_are_added_in_place() {
        let source = MemoryDatabase::new("source");
        source
            .add_table(
                "items",
                "CREATE TABLE `items` (`a` int NOT NULL, `b` int, `c` int, `d` int)",
                vec![IndexColumn::new("PRIMARY", false, 1, "a")],
            )
            .unwrap();
        source
            .insert_rows(
                "items",
                vec![vec![Value::Int(1), Value::Int(2), Value::Int(3), Value::Int(4)]],
            )
            .unwrap();

        let destination = MemoryDatabase::new("destination");
        destination
            .add_table("items", "CREATE TABLE `items` (`a` int NOT NULL, `c` int)", vec![])
            .unwrap();
        destination
            .insert_rows("items", vec![vec![Value::Int(9), Value::Int(9)]])
            .unwrap();

        let replicator = Replicator::new(source, destination.clone(), config());
        let summary = replicator.run(&mut Vec::<ProgressEvent>::new()).await.unwrap();

        assert_eq!(summary.columns_added, 2);
        assert_eq!(
            alters(&destination),
            vec![
                "ALTER TABLE `items` ADD COLUMN `b` int AFTER `a`",
                "ALTER TABLE `items` ADD COLUMN `d` int AFTER `c`",
            ]
        );
        assert_eq!(
            destination.column_names("items").await.unwrap(),
            vec!["a", "b", "c", "d"]
        );
        // Pre-existing destination rows are kept, never deleted.
        assert_eq!(
            destination.rows("items").unwrap(),
            vec![
                vec![Value::Int(9), Value::NULL, Value::Int(9), Value::NULL],
                vec![Value::Int(1), Value::Int(2), Value::Int(3), Value::Int(4)],
            ]
        );

        replicator.run(&mut Vec::<ProgressEvent>::new()).await.unwrap();
        assert_eq!(alters(&destination).len(), 2);
    }

    #[tokio::test]
    async fn test_unique_index_key_and_keyless_tables() {
        let source = MemoryDatabase::new("source");
        source
            .add_table(
                "contacts",
                "CREATE TABLE `contacts` (`email` varchar(255) NOT NULL, `name` text)",
                vec![IndexColumn::new("ux_email", false, 1, "email")],
            )
            .unwrap();
        source
            .insert_rows(
                "contacts",
                vec![
                    vec![Value::Bytes(b"a@x".to_vec()), Value::Bytes(b"A".to_vec())],
                    vec![Value::Bytes(b"b@x".to_vec()), Value::Bytes(b"B".to_vec())],
                ],
            )
            .unwrap();
        source
            .add_table("hits", "CREATE TABLE `hits` (`path` text)", vec![])
            .unwrap();
        source
            .insert_rows("hits", vec![vec![Value::Bytes(b"/".to_vec())]; 3])
            .unwrap();

        let destination = MemoryDatabase::new("destination");
        let replicator = Replicator::new(source, destination.clone(), config());

        let mut events: Vec<ProgressEvent> = Vec::new();
        for _ in 0..2 {
            replicator.run(&mut events).await.unwrap();
        }

        assert_eq!(destination.count_rows("contacts").await.unwrap(), 2);
        assert_eq!(destination.count_rows("hits").await.unwrap(), 6);
        assert!(events.contains(&ProgressEvent::TableStarted {
            table: "contacts".into(),
            total: 2,
            conflict_key: vec!["email".into()],
        }));
        assert!(events.contains(&ProgressEvent::TableStarted {
            table: "hits".into(),
            total: 3,
            conflict_key: vec![],
        }));
    }

    #[tokio::test]
    async fn test_failure_stops_run_by_default() {
        let source = MemoryDatabase::new("source");
        add_simple_table(&source, "a_table", 2);
        add_simple_table(&source, "b_table", 2);
        let destination = MemoryDatabase::new("destination");
        destination.fail_writes_to("a_table");

        let replicator = Replicator::new(source, destination.clone(), config());
        let err = replicator.run(&mut Vec::<ProgressEvent>::new()).await.unwrap_err();

        assert!(format!("{err:#}").contains("a_table"));
        assert!(!destination.has_table("b_table"));
    }

    #[tokio::test]
    async fn test_continue_on_error_moves_to_next_table() {
        let source = MemoryDatabase::new("source");
        add_simple_table(&source, "a_table", 2);
        add_simple_table(&source, "b_table", 2);
        let destination = MemoryDatabase::new("destination");
        destination.fail_writes_to("a_table");

        let mut config = config();
        config.continue_on_error = true;
        let replicator = Replicator::new(source, destination.clone(), config);

        let mut events: Vec<ProgressEvent> = Vec::new();
        let summary = replicator.run(&mut events).await.unwrap();

        assert_eq!(summary.failed_tables, vec!["a_table".to_string()]);
        assert_eq!(summary.tables, 1);
        assert_eq!(destination.count_rows("b_table").await.unwrap(), 2);
        assert!(events
            .iter()
            .any(|e| matches!(e, ProgressEvent::TableFailed { table, .. } if table == "a_table")));
    }

    #[tokio::test]
    async fn test_dry_run_changes_nothing() {
        let source = MemoryDatabase::new("source");
        add_simple_table(&source, "users", 4);
        let destination = MemoryDatabase::new("destination");

        let mut config = config();
        config.dry_run = true;
        let replicator = Replicator::new(source, destination.clone(), config);
        let summary = replicator.run(&mut Vec::<ProgressEvent>::new()).await.unwrap();

        assert_eq!(summary.rows_copied, 4);
        assert!(!destination.has_table("users"));
        assert!(destination.statements().is_empty());
        assert_eq!(destination.write_count(), 0);
    }

    #[tokio::test]
    async fn test_table_missing_after_create_fails() {
        let source = MemoryDatabase::new("source");
        add_simple_table(&source, "Users", 2);
        let destination = MemoryDatabase::new("destination");
        destination.ignore_creates();

        let replicator = Replicator::new(source, destination.clone(), config());
        let err = replicator
            .run(&mut Vec::<ProgressEvent>::new())
            .await
            .unwrap_err();

        assert!(format!("{err:#}").contains("'Users' not found on destination"));
        assert_eq!(destination.write_count(), 0);
    }

    #[tokio::test]
    async fn test_close_releases_both_ends() {
        let source = MemoryDatabase::new("source");
        let destination = MemoryDatabase::new("destination");
        let replicator = Replicator::new(source.clone(), destination.clone(), config());

        replicator.close().await.unwrap();
        assert!(source.is_closed());
        assert!(destination.is_closed());
    }
}
