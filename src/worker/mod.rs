//! Worker entry points.
//!
//! The worker is opaque to the supervisor: it is launched with a working
//! directory and an argument list, blocks until it finishes, and returns an
//! integer exit code. Commands reach it through a separate, non-blocking
//! queue entry point. The supervisor never looks inside.

pub mod process;

use std::path::{Path, PathBuf};

pub use process::ProcessWorker;

/// The two entry points a server worker exposes.
pub trait Worker: Send + Sync {
    /// Run the worker to completion on the calling thread.
    ///
    /// `work_dir` already exists and already holds whatever data files the
    /// worker needs; nothing here provisions it.
    fn run(&self, work_dir: &Path, arguments: &[String]) -> i32;

    /// Add one command to the worker's own execution queue. Never blocks on
    /// the worker's progress.
    fn enqueue_command(&self, command: &str);

    /// Best-effort hard stop, used only when the worker ignored a shutdown
    /// command past the stop timeout.
    fn abort(&self) {}
}

/// How a launch ended, as reported by the worker runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    /// The worker ran and returned this code.
    Exited { code: i32 },
    /// The working directory could not be resolved; the worker never ran.
    WorkDirUnavailable { path: PathBuf, reason: String },
}
