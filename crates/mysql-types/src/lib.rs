//! MySQL schema and statement logic for mysql-mirror.
//!
//! Everything in this crate is pure: it works on DDL text and catalog
//! metadata and renders SQL, but never talks to a server.
//!
//! # Structure
//!
//! - `ddl`: split a `CREATE TABLE` statement into column clauses
//! - `reconcile`: plan the `ADD COLUMN` operations a destination table needs
//! - `keys`: choose the conflict key from `SHOW INDEX` metadata
//! - `dml`: render paging SELECTs and (upsert) INSERTs
//!
//! # Example
//!
//! ```
//! use mysql_types::{parse_create_table_columns, plan_add_columns, Position};
//!
//! let ddl = "CREATE TABLE `t` (`a` int, `b` int, `c` int, PRIMARY KEY (`a`))";
//! let columns = parse_create_table_columns(ddl).unwrap();
//! let plan = plan_add_columns(&columns, ["a", "c"]);
//! assert_eq!(plan.len(), 1);
//! assert_eq!(plan[0].position, Position::After("a".to_string()));
//! ```

pub mod ddl;
pub mod dml;
pub mod keys;
pub mod reconcile;

pub use ddl::{
    parse_create_table_columns, quote_identifier, render_create_table, with_if_not_exists,
    ColumnDefinition, DdlError,
};
pub use dml::{count_rows_sql, insert_sql, max_rows_per_statement, select_page_sql};
pub use keys::{select_conflict_key, ConflictKey, IndexColumn};
pub use reconcile::{plan_add_columns, AddColumnOp, Position, ReconciliationPlan};
