//! Logger for recording simulation events as JSON lines
//!
//! Every client operation, snapshot and deadlock report can be written to a log
//! file, one JSON object per line. Writes happen on a background thread fed by
//! a channel so that logging never stretches the lock manager's critical
//! section. Log files are flushed on demand and when the logger is dropped.

use crate::core::types::{ClientId, DeadlockInfo, Events, ResourceId, SnapshotId};
use anyhow::{Context, Result};
use chrono::Utc;
use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Structure for a single log entry
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct LogEntry {
    /// Type of event that occurred
    pub event: Events,
    /// Client that performed the action
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<ClientId>,
    /// Resource that was involved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<ResourceId>,
    /// Snapshot the event belongs to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<SnapshotId>,
    /// Deadlock cycle, for `Deadlock` events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cycle: Option<Vec<ClientId>>,
    /// Absolute timestamp of when the event occurred (seconds since Unix Epoch)
    pub timestamp: f64,
}

impl LogEntry {
    fn new(event: Events) -> Self {
        let now = Utc::now();
        LogEntry {
            event,
            client_id: None,
            resource_id: None,
            snapshot_id: None,
            cycle: None,
            timestamp: now.timestamp() as f64 + now.timestamp_subsec_micros() as f64 / 1_000_000.0,
        }
    }
}

/// Commands for controlling the async logger thread
#[derive(Debug)]
enum LoggerCommand {
    /// Write a log entry to the file
    Entry(LogEntry),
    /// Flush all pending entries to disk and signal completion
    Flush(Sender<()>),
}

/// Event logger backed by a file and a background writer thread
pub struct EventLogger {
    sender: Sender<LoggerCommand>,
    flushing: Arc<AtomicBool>,
    path: PathBuf,
}

impl Drop for EventLogger {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            eprintln!("Warning: Failed to flush logs during EventLogger drop: {e:?}");
        }
    }
}

impl EventLogger {
    /// Create a new logger that writes to the specified file asynchronously
    ///
    /// # Arguments
    /// * `path` - Path to the log file. If the filename contains "{timestamp}",
    ///   it will be replaced with the current timestamp.
    ///
    /// # Errors
    /// Returns an error if the parent directory or the file cannot be created,
    /// or the writer thread cannot be spawned.
    pub fn with_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_buf = path.as_ref().to_path_buf();

        #[allow(clippy::literal_string_with_formatting_args)]
        let file_path = if path_buf.to_string_lossy().contains("{timestamp}") {
            let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
            PathBuf::from(
                path_buf
                    .to_string_lossy()
                    .replace("{timestamp}", &timestamp.to_string()),
            )
        } else {
            path_buf
        };

        if let Some(parent) = file_path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&file_path)
            .with_context(|| format!("Failed to open log file {}", file_path.display()))?;

        let (tx, rx) = unbounded::<LoggerCommand>();
        thread::Builder::new()
            .name("event-logger".into())
            .spawn(move || async_logger_thread(file, rx))
            .context("Failed to spawn logger thread")?;

        Ok(EventLogger {
            sender: tx,
            flushing: Arc::new(AtomicBool::new(false)),
            path: file_path,
        })
    }

    /// Path of the file being written, with any placeholder resolved
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn send(&self, entry: LogEntry) {
        if let Err(e) = self.sender.send(LoggerCommand::Entry(entry)) {
            eprintln!("Failed to send log entry: {e:?}");
        }
    }

    /// Log a client event (spawn, exit)
    pub fn log_client_event(&self, client_id: ClientId, event: Events) {
        let mut entry = LogEntry::new(event);
        entry.client_id = Some(client_id);
        self.send(entry);
    }

    /// Log a client-resource interaction (read, attempt, blocked, acquired, released)
    pub fn log_interaction_event(&self, client_id: ClientId, resource_id: ResourceId, event: Events) {
        let mut entry = LogEntry::new(event);
        entry.client_id = Some(client_id);
        entry.resource_id = Some(resource_id);
        self.send(entry);
    }

    /// Log a completed snapshot capture
    pub fn log_snapshot(&self, snapshot_id: SnapshotId) {
        let mut entry = LogEntry::new(Events::Snapshot);
        entry.snapshot_id = Some(snapshot_id);
        self.send(entry);
    }

    /// Log the terminal deadlock record
    pub fn log_deadlock(&self, info: &DeadlockInfo) {
        let mut entry = LogEntry::new(Events::Deadlock);
        entry.snapshot_id = Some(info.snapshot_id);
        entry.cycle = Some(info.client_cycle.clone());
        self.send(entry);
    }

    /// Force flush all pending log entries to disk
    ///
    /// Blocks until the writer thread has drained everything queued before
    /// this call.
    ///
    /// # Errors
    /// Returns an error if the writer thread is gone or does not answer in time.
    pub fn flush(&self) -> Result<()> {
        // Another thread is already flushing
        if self
            .flushing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }

        let result = (|| {
            let (flush_tx, flush_rx) = bounded(1);
            self.sender
                .send(LoggerCommand::Flush(flush_tx))
                .context("Logger thread is gone")?;
            flush_rx
                .recv_timeout(FLUSH_TIMEOUT)
                .map_err(|_| anyhow::anyhow!("Flush operation timed out"))
        })();

        self.flushing.store(false, Ordering::SeqCst);
        result
    }
}

/// Writer loop: drains commands until every sender is dropped
fn async_logger_thread(file: File, rx: Receiver<LoggerCommand>) {
    let mut writer = BufWriter::new(file);

    while let Ok(cmd) = rx.recv() {
        match cmd {
            LoggerCommand::Entry(entry) => {
                if let Ok(json) = serde_json::to_string(&entry)
                    && let Err(e) = writeln!(writer, "{json}")
                {
                    eprintln!("Logger write error: {e:?}");
                }
            }
            LoggerCommand::Flush(responder) => {
                if let Err(e) = writer.flush() {
                    eprintln!("Logger flush error: {e:?}");
                }
                let _ = responder.send(());
            }
        }
    }

    if let Err(e) = writer.flush() {
        eprintln!("Logger final flush error: {e:?}");
    }
}
