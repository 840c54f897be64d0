//! Additive schema reconciliation.
//!
//! Computes the `ALTER TABLE ... ADD COLUMN` operations that bring a
//! destination table's column set up to the source's, placing every new column
//! at the same relative position it has in the source.

use crate::ddl::{quote_identifier, ColumnDefinition};
use std::collections::HashSet;
use std::fmt;

/// Where a new column is placed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Position {
    First,
    After(String),
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Position::First => f.write_str("FIRST"),
            Position::After(column) => write!(f, "AFTER {}", quote_identifier(column)),
        }
    }
}

/// A single column addition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddColumnOp {
    pub column: ColumnDefinition,
    pub position: Position,
}

impl AddColumnOp {
    /// Render as an `ALTER TABLE` statement against `table`.
    pub fn to_sql(&self, table: &str) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            quote_identifier(table),
            self.column.definition,
            self.position
        )
    }
}

/// Ordered column additions. Ops must be applied in order: an op may anchor
/// on a column added by an earlier op of the same plan.
pub type ReconciliationPlan = Vec<AddColumnOp>;

/// Plan the columns of `source` missing from `existing`.
///
/// Names are compared ASCII case-insensitively, matching MySQL's column name
/// semantics. Columns already present are never touched, so a plan computed
/// against a converged table is empty.
pub fn plan_add_columns<I, S>(source: &[ColumnDefinition], existing: I) -> ReconciliationPlan
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut present: HashSet<String> = existing
        .into_iter()
        .map(|name| name.as_ref().to_ascii_lowercase())
        .collect();
    let mut plan = Vec::new();

    for (idx, column) in source.iter().enumerate() {
        let key = column.name.to_ascii_lowercase();
        if present.contains(&key) {
            continue;
        }

        let position = source[..idx]
            .iter()
            .rev()
            .find(|prev| present.contains(&prev.name.to_ascii_lowercase()))
            .map(|prev| Position::After(prev.name.clone()))
            .unwrap_or(Position::First);

        plan.push(AddColumnOp {
            column: column.clone(),
            position,
        });
        present.insert(key);
    }

    plan
}
