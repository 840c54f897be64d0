//! MySQL statement rendering for the row copy path.

use crate::ddl::quote_identifier;
use crate::keys::ConflictKey;

/// Upper bound on `?` placeholders in one prepared statement.
pub const MAX_PLACEHOLDERS: usize = 65_535;

/// Rows per INSERT so that `rows * column_count` stays within
/// [`MAX_PLACEHOLDERS`]. Never returns less than 1.
pub fn max_rows_per_statement(column_count: usize, requested: usize) -> usize {
    let cap = MAX_PLACEHOLDERS / column_count.max(1);
    requested.min(cap).max(1)
}

fn column_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| quote_identifier(c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Alias given to the incoming row of an upsert.
const ROW_ALIAS: &str = "incoming";

/// Multi-row INSERT with positional placeholders.
///
/// With a non-empty `key`, every non-key column is refreshed from the incoming
/// row on a duplicate key, using a row alias
/// (`... AS incoming ON DUPLICATE KEY UPDATE c = incoming.c`, MySQL 8.0.19+).
/// When all columns belong to the key a no-op assignment keeps the statement
/// valid.
pub fn insert_sql(table: &str, columns: &[String], row_count: usize, key: &ConflictKey) -> String {
    let row = format!("({})", vec!["?"; columns.len()].join(", "));
    let values = vec![row.as_str(); row_count].join(", ");

    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES {}",
        quote_identifier(table),
        column_list(columns),
        values
    );

    if key.is_empty() {
        return sql;
    }

    let mut updates: Vec<String> = columns
        .iter()
        .filter(|c| !key.contains(c))
        .map(|c| {
            let quoted = quote_identifier(c);
            format!("{quoted} = {ROW_ALIAS}.{quoted}")
        })
        .collect();
    if updates.is_empty() {
        let quoted = quote_identifier(&key.columns()[0]);
        updates.push(format!("{quoted} = {quoted}"));
    }

    sql.push_str(&format!(" AS {ROW_ALIAS} ON DUPLICATE KEY UPDATE "));
    sql.push_str(&updates.join(", "));
    sql
}

/// One page of `columns`, sorted ascending by `anchor`.
pub fn select_page_sql(
    table: &str,
    columns: &[String],
    anchor: &str,
    offset: u64,
    limit: u64,
) -> String {
    format!(
        "SELECT {} FROM {} ORDER BY {} ASC LIMIT {} OFFSET {}",
        column_list(columns),
        quote_identifier(table),
        quote_identifier(anchor),
        limit,
        offset
    )
}

pub fn count_rows_sql(table: &str) -> String {
    format!("SELECT COUNT(*) FROM {}", quote_identifier(table))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_plain_insert_without_key() {
        let sql = insert_sql("logs", &strings(&["at", "msg"]), 2, &ConflictKey::default());
        assert_eq!(sql, "INSERT INTO `logs` (`at`, `msg`) VALUES (?, ?), (?, ?)");
    }

    #[test]
    fn test_upsert_updates_non_key_columns() {
        let key = ConflictKey::new(strings(&["id"]));
        let sql = insert_sql("users", &strings(&["id", "name", "email"]), 1, &key);
        assert_eq!(
            sql,
            "INSERT INTO `users` (`id`, `name`, `email`) VALUES (?, ?, ?) AS incoming \
             ON DUPLICATE KEY UPDATE `name` = incoming.`name`, `email` = incoming.`email`"
        );
    }

    #[test]
    fn test_upsert_with_only_key_columns() {
        let key = ConflictKey::new(strings(&["a", "b"]));
        let sql = insert_sql("pairs", &strings(&["a", "b"]), 1, &key);
        assert_eq!(
            sql,
            "INSERT INTO `pairs` (`a`, `b`) VALUES (?, ?) AS incoming \
             ON DUPLICATE KEY UPDATE `a` = `a`"
        );
    }

    #[test]
    fn test_select_page_sql() {
        assert_eq!(
            select_page_sql("users", &strings(&["id", "name"]), "id", 10_000, 5_000),
            "SELECT `id`, `name` FROM `users` ORDER BY `id` ASC LIMIT 5000 OFFSET 10000"
        );
        assert_eq!(count_rows_sql("users"), "SELECT COUNT(*) FROM `users`");
    }

    #[test]
    fn test_rows_per_statement_respects_placeholder_limit() {
        assert_eq!(max_rows_per_statement(3, 2_000), 2_000);
        assert_eq!(max_rows_per_statement(40, 2_000), 1_638);
        assert_eq!(max_rows_per_statement(100_000, 2_000), 1);
        assert_eq!(max_rows_per_statement(0, 2_000), 2_000);
    }
}
