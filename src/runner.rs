//! Worker runner: the one thread that blocks.
//!
//! Each launch gets a dedicated thread that resolves the working directory,
//! calls [`Worker::run`], and posts the outcome to the supervisor's mailbox
//! as [`ControlMessage::WorkerCompleted`]. The runner never touches
//! supervisor state directly; completion is handled on the control loop.
//!
//! A separate one-shot "finished" signal lets the supervisor wait for the
//! worker with a deadline during teardown, without going through the
//! mailbox it is itself draining.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::mailbox::{ControlMessage, MailboxSender};
use crate::worker::{Worker, WorkerExit};

#[derive(Debug, Error)]
pub enum WorkDirError {
    #[error("working directory {} cannot be resolved", .path.display())]
    Unresolvable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("working directory {} is not a directory", .0.display())]
    NotADirectory(PathBuf),
}

/// Resolve the worker's working directory to an absolute path.
///
/// Only checks that the directory exists; whether it holds the worker's data
/// files is the worker's business.
pub fn resolve_work_dir(path: &Path) -> Result<PathBuf, WorkDirError> {
    let resolved = path
        .canonicalize()
        .map_err(|source| WorkDirError::Unresolvable {
            path: path.to_path_buf(),
            source,
        })?;
    if !resolved.is_dir() {
        return Err(WorkDirError::NotADirectory(resolved));
    }
    Ok(resolved)
}

/// Handle to a running worker thread.
#[derive(Debug)]
pub struct RunnerHandle {
    join: JoinHandle<()>,
    finished: mpsc::Receiver<()>,
}

impl RunnerHandle {
    /// Wait up to `timeout` for the worker to return. `true` if it has.
    pub fn wait_finished(&self, timeout: Duration) -> bool {
        match self.finished.recv_timeout(timeout) {
            Ok(()) => true,
            // Sender dropped: the thread is gone (already signalled, or panicked).
            Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) => false,
        }
    }

    /// Reap the thread. Only call once the worker has reported completion.
    pub fn join(self) {
        if self.join.join().is_err() {
            warn!("worker runner thread panicked");
        }
    }
}

/// Launch `worker` on its own thread.
///
/// Exactly one [`ControlMessage::WorkerCompleted`] is posted to `completion`
/// per successful spawn, including when the working directory is unusable.
pub fn spawn(
    worker: Arc<dyn Worker>,
    work_dir: PathBuf,
    arguments: Vec<String>,
    completion: MailboxSender,
) -> io::Result<RunnerHandle> {
    let (finished_tx, finished) = mpsc::channel();

    let join = thread::Builder::new()
        .name("worker-runner".to_string())
        .spawn(move || {
            let exit = match resolve_work_dir(&work_dir) {
                Ok(dir) => {
                    info!(work_dir = %dir.display(), args = ?arguments, "running worker");
                    let code = worker.run(&dir, &arguments);
                    info!(code, "worker returned");
                    WorkerExit::Exited { code }
                }
                Err(e) => {
                    warn!(error = %e, "worker launch aborted");
                    WorkerExit::WorkDirUnavailable {
                        path: work_dir.clone(),
                        reason: error_chain(&e),
                    }
                }
            };

            let _ = finished_tx.send(());
            if completion.send(ControlMessage::WorkerCompleted(exit)).is_err() {
                debug!("supervisor gone; worker completion dropped");
            }
        })?;

    Ok(RunnerHandle { join, finished })
}

fn error_chain(e: &dyn std::error::Error) -> String {
    let mut out = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}
