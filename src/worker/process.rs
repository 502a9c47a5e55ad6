//! Worker backed by a server executable run as a child process.
//!
//! Commands are written to the child's stdin, one per line, which is how
//! line-oriented server consoles take input. Commands that arrive before the
//! child is up are held and written, in order, as soon as it spawns. Output is
//! inherited so the server's own logging lands wherever the host's
//! stdout/stderr go.

use std::collections::VecDeque;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{ChildStdin, Command, ExitStatus, Stdio};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use super::Worker;

/// Exit code reported when the executable could not be spawned at all.
pub const SPAWN_FAILURE_CODE: i32 = 127;

/// Where an enqueued command goes.
enum Input {
    /// No child yet: hold commands until one spawns.
    Pending(VecDeque<String>),
    Open(ChildStdin),
}

impl Default for Input {
    fn default() -> Self {
        Input::Pending(VecDeque::new())
    }
}

pub struct ProcessWorker {
    program: PathBuf,
    input: Mutex<Input>,
    pid: Mutex<Option<u32>>,
}

impl ProcessWorker {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            input: Mutex::new(Input::default()),
            pid: Mutex::new(None),
        }
    }

    /// PID of the running child, if any.
    pub fn pid(&self) -> Option<u32> {
        *lock(&self.pid)
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Worker for ProcessWorker {
    fn run(&self, work_dir: &Path, arguments: &[String]) -> i32 {
        let spawned = Command::new(&self.program)
            .args(arguments)
            .current_dir(work_dir)
            .stdin(Stdio::piped())
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                *lock(&self.input) = Input::default();
                warn!(
                    program = %self.program.display(),
                    error = %e,
                    "failed to spawn server process"
                );
                return SPAWN_FAILURE_CODE;
            }
        };

        info!(
            program = %self.program.display(),
            pid = child.id(),
            work_dir = %work_dir.display(),
            "server process started"
        );
        {
            let mut input = lock(&self.input);
            let backlog = match std::mem::take(&mut *input) {
                Input::Pending(backlog) => backlog,
                Input::Open(_) => VecDeque::new(),
            };
            if let Some(mut stdin) = child.stdin.take() {
                for command in &backlog {
                    write_command(&mut stdin, command);
                }
                *input = Input::Open(stdin);
            }
            *lock(&self.pid) = Some(child.id());
        }

        let status = child.wait();

        // Close our end; the next run starts from an empty backlog.
        *lock(&self.input) = Input::default();
        lock(&self.pid).take();

        match status {
            Ok(status) => exit_code(status),
            Err(e) => {
                warn!(error = %e, "failed to wait for server process");
                1
            }
        }
    }

    fn enqueue_command(&self, command: &str) {
        match &mut *lock(&self.input) {
            Input::Pending(backlog) => {
                debug!(command, "server not up yet; command held");
                backlog.push_back(command.to_string());
            }
            Input::Open(stdin) => write_command(stdin, command),
        }
    }

    fn abort(&self) {
        let Some(pid) = self.pid() else {
            return;
        };
        warn!(pid, "killing unresponsive server process");
        kill(pid);
    }
}

fn write_command(stdin: &mut ChildStdin, command: &str) {
    if let Err(e) = writeln!(stdin, "{command}").and_then(|_| stdin.flush()) {
        debug!(command, error = %e, "failed to write command to server");
    }
}

#[cfg(unix)]
fn kill(pid: u32) {
    // SAFETY: kill(2) has no memory-safety preconditions; a stale pid only
    // yields ESRCH.
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGKILL) };
    if rc != 0 {
        debug!(pid, error = %std::io::Error::last_os_error(), "kill failed");
    }
}

#[cfg(not(unix))]
fn kill(pid: u32) {
    debug!(pid, "hard kill not supported on this platform");
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}
