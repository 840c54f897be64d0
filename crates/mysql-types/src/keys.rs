//! Conflict key selection from MySQL index metadata.

use std::fmt;

/// Name MySQL reports for the primary key in `SHOW INDEX`.
pub const PRIMARY_KEY_NAME: &str = "PRIMARY";

/// One row of `SHOW INDEX FROM <table>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexColumn {
    pub key_name: String,
    pub non_unique: bool,
    /// 1-based position of the column within the index.
    pub seq_in_index: u32,
    /// `None` for functional key parts (MySQL 8.0.13+).
    pub column_name: Option<String>,
}

impl IndexColumn {
    pub fn new(key_name: &str, non_unique: bool, seq_in_index: u32, column_name: &str) -> Self {
        Self {
            key_name: key_name.to_string(),
            non_unique,
            seq_in_index,
            column_name: Some(column_name.to_string()),
        }
    }
}

/// Columns identifying "the same row" for upserts. Empty means append-only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConflictKey(Vec<String>);

impl ConflictKey {
    pub fn new(columns: Vec<String>) -> Self {
        Self(columns)
    }

    pub fn columns(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, column: &str) -> bool {
        self.0.iter().any(|c| c.eq_ignore_ascii_case(column))
    }
}

impl fmt::Display for ConflictKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("none")
        } else {
            f.write_str(&self.0.join(","))
        }
    }
}

/// Pick the conflict key for a table.
///
/// The primary key wins when present. Otherwise the first unique index in
/// catalog order is used, which is not necessarily the alphabetically first
/// one. Its columns are ordered by their position inside the index. Unique
/// indexes with functional key parts are skipped since they do not name
/// columns.
pub fn select_conflict_key(indexes: &[IndexColumn]) -> ConflictKey {
    let primary: Vec<&IndexColumn> = indexes
        .iter()
        .filter(|ix| ix.key_name == PRIMARY_KEY_NAME)
        .collect();
    if let Some(columns) = ordered_columns(primary) {
        if !columns.is_empty() {
            return ConflictKey(columns);
        }
    }

    // Group by key name, preserving first-seen order.
    let mut unique: Vec<(&str, Vec<&IndexColumn>)> = Vec::new();
    for ix in indexes
        .iter()
        .filter(|ix| !ix.non_unique && ix.key_name != PRIMARY_KEY_NAME)
    {
        match unique.iter_mut().find(|(name, _)| *name == ix.key_name) {
            Some((_, parts)) => parts.push(ix),
            None => unique.push((ix.key_name.as_str(), vec![ix])),
        }
    }

    unique
        .into_iter()
        .find_map(|(_, parts)| ordered_columns(parts))
        .map(ConflictKey)
        .unwrap_or_default()
}

/// Column names sorted by `seq_in_index`; `None` if any part is functional.
fn ordered_columns(mut parts: Vec<&IndexColumn>) -> Option<Vec<String>> {
    parts.sort_by_key(|ix| ix.seq_in_index);
    parts.into_iter().map(|ix| ix.column_name.clone()).collect()
}
