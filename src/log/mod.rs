//! Structured execution log: JSON lines per host run.
//!
//! Every `tether serve` run writes a `.jsonl` file capturing the supervision
//! timeline: worker launches, forwarded commands, shutdown requests, client
//! binding changes, and how the worker ended. Each line is a self-contained
//! JSON object with a timestamp and the run id, so logs from several runs
//! can be concatenated and still grepped apart.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::debug;

use crate::worker::WorkerExit;

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// A structured event in the execution log.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    /// RFC 3339, UTC.
    pub timestamp: String,
    pub run_id: String,
    #[serde(flatten)]
    pub event: LogEvent,
}

/// All event types that can appear in the execution log.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum LogEvent {
    /// The host came up and is accepting requests.
    ServiceStarted { pid: u32, socket: Option<String> },
    /// A worker was launched.
    WorkerLaunched {
        work_dir: String,
        arguments: Vec<String>,
    },
    /// A start request arrived while a worker was already running.
    StartIgnored { arguments: Vec<String> },
    /// A command was handed to the worker's queue.
    CommandForwarded { command: String },
    /// A command arrived with no worker to receive it.
    CommandDropped { command: String },
    /// The first shutdown command of this worker lifetime.
    ShutdownRequested { command: String },
    /// A client bound to the host.
    ClientBound { clients: usize },
    /// A client went away.
    ClientUnbound { clients: usize },
    /// The worker returned.
    WorkerExited { code: i32 },
    /// The worker's working directory could not be resolved.
    WorkDirUnavailable { path: String, reason: String },
    /// The worker ignored shutdown; the host is being killed.
    ForcedTermination { timeout_millis: u64 },
    /// The host is exiting.
    ServiceStopped { reason: String },
}

impl From<&WorkerExit> for LogEvent {
    fn from(exit: &WorkerExit) -> Self {
        match exit {
            WorkerExit::Exited { code } => LogEvent::WorkerExited { code: *code },
            WorkerExit::WorkDirUnavailable { path, reason } => LogEvent::WorkDirUnavailable {
                path: path.display().to_string(),
                reason: reason.clone(),
            },
        }
    }
}

/// Writer for JSON lines execution logs.
pub struct ExecutionLog {
    writer: Mutex<BufWriter<File>>,
    run_id: String,
    path: PathBuf,
}

impl ExecutionLog {
    /// Open (append) the log at `path`, creating parent directories.
    pub fn new(path: &Path, run_id: &str) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create log directory: {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open log file: {}", path.display()))?;

        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
            run_id: run_id.to_string(),
            path: path.to_path_buf(),
        })
    }

    /// Open `<dir>/<run_id>.jsonl`.
    pub fn for_run(dir: &Path, run_id: &str) -> Result<Self> {
        Self::new(&dir.join(format!("{run_id}.jsonl")), run_id)
    }

    pub fn log(&self, event: LogEvent) -> Result<()> {
        let entry = LogEntry {
            timestamp: now_rfc3339(),
            run_id: self.run_id.clone(),
            event,
        };

        let json = serde_json::to_string(&entry).context("failed to serialize log entry")?;

        debug!(event = %json, "execution log");

        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(writer, "{json}").context("failed to write log entry")?;
        writer.flush().context("failed to flush log")?;

        Ok(())
    }

    /// Log, reporting failures at debug level only.
    pub fn record(&self, event: LogEvent) {
        if let Err(e) = self.log(event) {
            debug!(error = %e, path = %self.path.display(), "execution log write failed");
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
