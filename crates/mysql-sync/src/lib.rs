//! MySQL to MySQL replication for mysql-mirror
//!
//! Mirrors table schemas (missing tables and missing columns) and copies rows
//! with paginated reads and chunked upserts. Runs are one-shot and resumable:
//! schema changes are purely additive and row writes are idempotent per
//! conflict key, so re-running after an interruption converges.

mod client;
pub mod config;
mod database;
mod full_sync;
pub mod progress;
mod replicate;
mod schema;
pub mod testing;

pub use client::{mysql_pool_opts, new_mysql_pool, MySqlDatabase};
pub use config::{
    parse_exclude_list, sanitize_connection_string, ReplicationConfig, DEFAULT_PAGE_SIZE,
    DEFAULT_WRITE_CHUNK_SIZE,
};
pub use database::{Database, Row};
pub use full_sync::{Replicator, RunSummary, TableReport};
pub use progress::{JsonProgress, LogProgress, ProgressEvent, ProgressSink};
pub use replicate::copy_table_rows;
pub use schema::{apply_plan, reconcile_table_columns};
