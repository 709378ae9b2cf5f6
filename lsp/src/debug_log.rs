//! Debug side-channel for raw frames and lifecycle events.
//!
//! This is separate from `tracing`: when enabled, every frame body sent to or
//! received from the server is appended verbatim, one line per event, each
//! prefixed with a local `HH:MM:SS` timestamp.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::{NonBlocking, NonBlockingBuilder, WorkerGuard};

/// Sink for debug events. Passed explicitly to the session that owns it.
pub trait DebugLog: Send {
    fn record(&mut self, event: &str);
}

/// Discards everything. The default when debug logging is off.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDebugLog;

impl DebugLog for NoDebugLog {
    fn record(&mut self, _event: &str) {}
}

/// Appends timestamped events to a file.
///
/// Writes are handed to a worker thread, so recording never blocks the
/// runtime. Dropping the log flushes what is queued and closes the file.
pub struct FileDebugLog {
    writer: NonBlocking,
    _guard: WorkerGuard,
}

impl FileDebugLog {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening debug log {}", path.display()))?;
        // Block instead of dropping lines when the queue is full.
        let (writer, guard) = NonBlockingBuilder::default().lossy(false).finish(file);
        Ok(Self {
            writer,
            _guard: guard,
        })
    }
}

impl DebugLog for FileDebugLog {
    fn record(&mut self, event: &str) {
        let line = timestamped(event);
        if let Err(e) = self.writer.write_all(line.as_bytes()) {
            tracing::warn!("Failed to write debug log: {e}");
        }
    }
}

fn timestamped(event: &str) -> String {
    format!("{} {event}\n", chrono::Local::now().format("%H:%M:%S"))
}
