//! Batched row copy for a single table.
//!
//! Pages are read from the source with `ORDER BY <anchor> LIMIT/OFFSET`, where
//! the anchor is the first column that accepts explicit values (generated
//! columns are never copied), and written to the destination in
//! smaller chunks. With a conflict key every chunk is an upsert, so re-running
//! a copy converges instead of duplicating rows. Without one, rows are
//! appended.

use crate::config::ReplicationConfig;
use crate::database::Database;
use crate::progress::{ProgressEvent, ProgressSink};
use anyhow::{Context, Result};
use mysql_types::{max_rows_per_statement, ConflictKey};
use tracing::{debug, warn};

/// Copy every row of `table` from `source` to `destination`.
///
/// Returns the number of rows read from the source.
pub async fn copy_table_rows<S, D>(
    source: &S,
    destination: &D,
    table: &str,
    key: &ConflictKey,
    config: &ReplicationConfig,
    sink: &mut dyn ProgressSink,
) -> Result<u64>
where
    S: Database + ?Sized,
    D: Database + ?Sized,
{
    let columns = source
        .insertable_columns(table)
        .await
        .with_context(|| format!("Failed to read columns of '{table}'"))?;
    let Some(anchor) = columns.first() else {
        warn!("Table '{}' has no insertable columns on the source, skipping rows", table);
        return Ok(0);
    };

    let total = source
        .count_rows(table)
        .await
        .with_context(|| format!("Failed to count rows of '{table}'"))?;

    sink.report(ProgressEvent::TableStarted {
        table: table.to_string(),
        total,
        conflict_key: key.columns().to_vec(),
    });

    let page_size = config.page_size.max(1);
    let chunk_size = max_rows_per_statement(columns.len(), config.write_chunk_size);
    let mut copied = 0u64;
    let mut offset = 0u64;

    while offset < total {
        let page = source
            .fetch_page(table, &columns, anchor, offset, page_size)
            .await
            .with_context(|| format!("Failed to fetch rows {offset}.. of '{table}'"))?;
        debug!(
            "Fetched {} rows from '{}' at offset {}",
            page.len(),
            table,
            offset
        );

        if config.dry_run {
            debug!("Dry-run: would write {} rows into '{}'", page.len(), table);
        } else {
            for chunk in page.chunks(chunk_size) {
                destination
                    .write_rows(table, &columns, chunk, key)
                    .await
                    .with_context(|| {
                        format!("Failed to write {} rows into '{table}'", chunk.len())
                    })?;
            }
        }
        copied += page.len() as u64;

        let processed = (offset + page_size).min(total);
        sink.report(ProgressEvent::RowsCopied {
            table: table.to_string(),
            processed,
            total,
        });
        offset += page_size;
    }

    Ok(copied)
}
