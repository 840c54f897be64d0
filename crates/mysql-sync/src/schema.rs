//! Destination schema reconciliation
//!
//! Brings a destination table's columns in line with the source table's
//! `CREATE TABLE` definition. Only additions are ever made.

use crate::database::Database;
use anyhow::{Context, Result};
use mysql_types::{parse_create_table_columns, plan_add_columns, ReconciliationPlan};
use tracing::{info, warn};

/// Plan the column additions `table` needs on the destination.
///
/// A source statement that can't be parsed yields an empty plan: the table
/// itself is still created from the verbatim DDL, only column-level
/// reconciliation is skipped.
pub fn reconcile_table_columns(
    table: &str,
    create_stmt: &str,
    existing: &[String],
) -> ReconciliationPlan {
    match parse_create_table_columns(create_stmt) {
        Ok(columns) => plan_add_columns(&columns, existing),
        Err(e) => {
            warn!(
                "Skipping column reconciliation for '{}': could not parse CREATE TABLE: {}",
                table, e
            );
            Vec::new()
        }
    }
}

/// Apply `plan` to `table` on `destination`, strictly in order.
///
/// Returns the number of columns added (0 in dry-run mode).
pub async fn apply_plan<D: Database + ?Sized>(
    destination: &D,
    table: &str,
    plan: &ReconciliationPlan,
    dry_run: bool,
) -> Result<usize> {
    for op in plan {
        if dry_run {
            info!("Dry-run: would execute: {}", op.to_sql(table));
            continue;
        }
        info!("Executing: {}", op.to_sql(table));
        destination
            .add_column(table, op)
            .await
            .with_context(|| format!("Failed to add column '{}' to '{}'", op.column.name, table))?;
    }
    Ok(if dry_run { 0 } else { plan.len() })
}
