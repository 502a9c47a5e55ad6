//! Host termination.
//!
//! Every worker lifetime ends with the hosting process exiting, so the next
//! start runs in a fresh process image with no state left over from the last
//! run. The [`Terminator`] seam exists so the control loop can be driven in
//! tests without the test process exiting.

use std::fmt;
use std::path::PathBuf;

use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The worker returned on its own.
    WorkerExited { code: i32 },
    /// The worker never ran: its working directory was unusable.
    WorkDirUnavailable,
    /// The runner thread could not be started.
    RunnerUnavailable,
    /// The worker ignored the shutdown command past the stop timeout.
    ShutdownTimeout,
}

impl Termination {
    /// Exit status of the host process.
    pub fn exit_status(self) -> i32 {
        match self {
            Self::WorkerExited { code } => code,
            Self::WorkDirUnavailable | Self::RunnerUnavailable | Self::ShutdownTimeout => 1,
        }
    }

    pub fn is_forced(self) -> bool {
        self == Self::ShutdownTimeout
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WorkerExited { code } => write!(f, "worker exited with code {code}"),
            Self::WorkDirUnavailable => f.write_str("worker working directory unavailable"),
            Self::RunnerUnavailable => f.write_str("worker runner could not start"),
            Self::ShutdownTimeout => f.write_str("worker did not stop in time"),
        }
    }
}

pub trait Terminator: Send + Sync {
    fn terminate(&self, reason: Termination);
}

/// Exits the current process.
///
/// `process::exit` skips destructors, so files that would normally be removed
/// on drop (the listening socket) are registered here instead.
#[derive(Debug, Default)]
pub struct ProcessExit {
    cleanup: Vec<PathBuf>,
}

impl ProcessExit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn removing(mut self, path: impl Into<PathBuf>) -> Self {
        self.cleanup.push(path.into());
        self
    }

    fn remove_files(&self) {
        for path in &self.cleanup {
            if let Err(e) = std::fs::remove_file(path) {
                debug!(error = %e, path = %path.display(), "cleanup skipped");
            }
        }
    }
}

impl Terminator for ProcessExit {
    fn terminate(&self, reason: Termination) {
        let status = reason.exit_status();
        if reason.is_forced() {
            error!(%reason, status, "forcing host exit");
        } else {
            info!(%reason, status, "host exiting");
        }
        self.remove_files();
        std::process::exit(status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_status_mirrors_worker_code() {
        assert_eq!(Termination::WorkerExited { code: 0 }.exit_status(), 0);
        assert_eq!(Termination::WorkerExited { code: 42 }.exit_status(), 42);
        assert_eq!(Termination::WorkDirUnavailable.exit_status(), 1);
        assert_eq!(Termination::RunnerUnavailable.exit_status(), 1);
        assert_eq!(Termination::ShutdownTimeout.exit_status(), 1);
    }

    #[test]
    fn only_timeout_is_forced() {
        assert!(Termination::ShutdownTimeout.is_forced());
        assert!(!Termination::WorkerExited { code: 1 }.is_forced());
        assert!(!Termination::WorkDirUnavailable.is_forced());
    }

    #[test]
    fn cleanup_removes_registered_files_and_tolerates_missing_ones() {
        let tmp = tempfile::tempdir().unwrap();
        let present = tmp.path().join("tether.sock");
        std::fs::write(&present, "").unwrap();
        let exit = ProcessExit::new()
            .removing(&present)
            .removing(tmp.path().join("missing"));
        exit.remove_files();
        assert!(!present.exists());
    }

    #[test]
    fn display_names_the_reason() {
        assert_eq!(
            Termination::WorkerExited { code: 3 }.to_string(),
            "worker exited with code 3"
        );
        assert_eq!(
            Termination::ShutdownTimeout.to_string(),
            "worker did not stop in time"
        );
    }
}
