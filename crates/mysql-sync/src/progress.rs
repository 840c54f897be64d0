//! Progress events emitted while a run is in flight.

use serde::Serialize;
use std::io::Write;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, info, warn};

/// One step of a replication run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// Emitted before any row of `table` is copied.
    TableStarted {
        table: String,
        total: u64,
        conflict_key: Vec<String>,
    },
    /// Emitted after each page; `processed` is cumulative.
    RowsCopied {
        table: String,
        processed: u64,
        total: u64,
    },
    TableFinished {
        table: String,
        rows: u64,
    },
    /// Only emitted when the run continues past failing tables.
    TableFailed {
        table: String,
        error: String,
    },
}

/// Receives progress events from the replicator.
pub trait ProgressSink: Send {
    fn report(&mut self, event: ProgressEvent);
}

impl ProgressSink for Vec<ProgressEvent> {
    fn report(&mut self, event: ProgressEvent) {
        self.push(event);
    }
}

impl ProgressSink for UnboundedSender<ProgressEvent> {
    fn report(&mut self, event: ProgressEvent) {
        // A dropped receiver just means nobody is watching.
        let _ = self.send(event);
    }
}

/// Logs progress through `tracing`.
#[derive(Debug, Default)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn report(&mut self, event: ProgressEvent) {
        match event {
            ProgressEvent::TableStarted {
                table,
                total,
                conflict_key,
            } => {
                let key = if conflict_key.is_empty() {
                    "none".to_string()
                } else {
                    conflict_key.join(",")
                };
                info!("[{table}] total rows: {total} (conflict key: {key})");
            }
            ProgressEvent::RowsCopied {
                table,
                processed,
                total,
            } => {
                let percent = if total == 0 {
                    100
                } else {
                    processed * 100 / total
                };
                info!("[{table}] {percent}% | {processed}/{total} rows");
            }
            ProgressEvent::TableFinished { table, rows } => {
                info!("[{table}] done, {rows} rows copied");
            }
            ProgressEvent::TableFailed { table, error } => {
                error!("[{table}] failed: {error}");
            }
        }
    }
}

/// Writes each event as one JSON line.
pub struct JsonProgress<W> {
    out: W,
}

impl<W: Write + Send> JsonProgress<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl JsonProgress<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> ProgressSink for JsonProgress<W> {
    fn report(&mut self, event: ProgressEvent) {
        let written = serde_json::to_string(&event)
            .map_err(std::io::Error::from)
            .and_then(|line| writeln!(self.out, "{line}"))
            .and_then(|_| self.out.flush());
        if let Err(e) = written {
            warn!("Failed to write progress event: {}", e);
        }
    }
}
