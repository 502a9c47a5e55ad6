//! Fakes for driving the supervisor without a real server.
//!
//! Used by this crate's unit tests and by the scenario tests under `tests/`.
//! Everything here records what happened behind an `Arc<Mutex<_>>` so clones
//! handed to the supervisor and clones kept by the test see the same data.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::notification::NotificationView;
use crate::supervisor::DEFAULT_SHUTDOWN_KEYWORD;
use crate::surface::StatusSurface;
use crate::terminate::{Termination, Terminator};
use crate::worker::Worker;

/// Exit code a scripted worker returns after [`Worker::abort`].
pub const ABORTED_CODE: i32 = 137;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct Script {
    runs: Vec<(PathBuf, Vec<String>)>,
    commands: Vec<String>,
    released: bool,
    aborted: bool,
}

/// A worker that blocks in `run` until told to stop.
///
/// By default it returns its exit code as soon as the shutdown keyword shows
/// up in its queue. A [`hung`](Self::hung) worker ignores shutdown and only
/// returns on [`release`](Self::release) or [`Worker::abort`].
#[derive(Debug)]
pub struct ScriptedWorker {
    exit_code: i32,
    obeys_shutdown: bool,
    keyword: String,
    script: Mutex<Script>,
    changed: Condvar,
}

impl ScriptedWorker {
    pub fn new(exit_code: i32) -> Self {
        Self {
            exit_code,
            obeys_shutdown: true,
            keyword: DEFAULT_SHUTDOWN_KEYWORD.to_string(),
            script: Mutex::new(Script::default()),
            changed: Condvar::new(),
        }
    }

    pub fn hung(exit_code: i32) -> Self {
        Self {
            obeys_shutdown: false,
            ..Self::new(exit_code)
        }
    }

    /// Let a blocked `run` return its exit code.
    pub fn release(&self) {
        lock(&self.script).released = true;
        self.changed.notify_all();
    }

    pub fn runs(&self) -> Vec<(PathBuf, Vec<String>)> {
        lock(&self.script).runs.clone()
    }

    pub fn commands(&self) -> Vec<String> {
        lock(&self.script).commands.clone()
    }

    pub fn was_aborted(&self) -> bool {
        lock(&self.script).aborted
    }

    /// Wait until `run` has been entered at least `count` times.
    pub fn wait_for_runs(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut script = lock(&self.script);
        while script.runs.len() < count {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            script = self
                .changed
                .wait_timeout(script, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    fn should_return(&self, script: &Script) -> bool {
        script.released
            || script.aborted
            || (self.obeys_shutdown
                && script
                    .commands
                    .iter()
                    .any(|c| c.eq_ignore_ascii_case(&self.keyword)))
    }
}

impl Worker for ScriptedWorker {
    fn run(&self, work_dir: &Path, arguments: &[String]) -> i32 {
        let mut script = lock(&self.script);
        script
            .runs
            .push((work_dir.to_path_buf(), arguments.to_vec()));
        self.changed.notify_all();

        while !self.should_return(&script) {
            script = self
                .changed
                .wait(script)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if script.aborted {
            ABORTED_CODE
        } else {
            self.exit_code
        }
    }

    fn enqueue_command(&self, command: &str) {
        lock(&self.script).commands.push(command.to_string());
        self.changed.notify_all();
    }

    fn abort(&self) {
        lock(&self.script).aborted = true;
        self.changed.notify_all();
    }
}

#[derive(Debug, Default)]
struct SurfaceLog {
    posts: Vec<NotificationView>,
    alerts: Vec<String>,
    withdrawn: usize,
}

/// Status surface that remembers everything it was asked to show.
#[derive(Debug, Clone, Default)]
pub struct RecordingSurface {
    log: Arc<Mutex<SurfaceLog>>,
}

impl RecordingSurface {
    pub fn posts(&self) -> Vec<NotificationView> {
        lock(&self.log).posts.clone()
    }

    pub fn alerts(&self) -> Vec<String> {
        lock(&self.log).alerts.clone()
    }

    pub fn withdrawn(&self) -> usize {
        lock(&self.log).withdrawn
    }
}

impl StatusSurface for RecordingSurface {
    fn post(&mut self, view: &NotificationView) {
        lock(&self.log).posts.push(view.clone());
    }

    fn alert(&mut self, message: &str) {
        lock(&self.log).alerts.push(message.to_string());
    }

    fn withdraw(&mut self) {
        lock(&self.log).withdrawn += 1;
    }
}

/// Terminator that records instead of exiting.
#[derive(Debug, Clone, Default)]
pub struct RecordingTerminator {
    inner: Arc<(Mutex<Vec<Termination>>, Condvar)>,
}

impl RecordingTerminator {
    pub fn calls(&self) -> Vec<Termination> {
        lock(&self.inner.0).clone()
    }

    /// Block until the first termination, or `None` on timeout.
    pub fn wait(&self, timeout: Duration) -> Option<Termination> {
        let (calls, changed) = &*self.inner;
        let guard = lock(calls);
        let (guard, _) = changed
            .wait_timeout_while(guard, timeout, |calls| calls.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        guard.first().copied()
    }
}

impl Terminator for RecordingTerminator {
    fn terminate(&self, reason: Termination) {
        let (calls, changed) = &*self.inner;
        lock(calls).push(reason);
        changed.notify_all();
    }
}
