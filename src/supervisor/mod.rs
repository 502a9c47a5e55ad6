//! Supervisor: owns the worker and its shutdown protocol.
//!
//! All state changes happen on one control loop that drains the
//! [`Mailbox`](crate::mailbox::Mailbox) one message at a time, so nothing in
//! here needs a lock. The only other thread is the worker runner, which
//! reports back through the same mailbox.
//!
//! Shutdown protocol:
//! 1. submit the shutdown keyword to the worker (notification → Stopping)
//! 2. wait up to `stop_timeout` for the worker to return
//! 3. if it has not, abort it and terminate the host
//!
//! Whatever path the worker takes to completion, the host process exits
//! afterwards so a later start begins from a clean process image.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::log::{ExecutionLog, LogEvent};
use crate::mailbox::{ClientMessage, ControlMessage, Mailbox, MailboxSender};
use crate::notification::{Lifecycle, NotificationState};
use crate::runner::{self, RunnerHandle};
use crate::surface::StatusSurface;
use crate::terminate::{Termination, Terminator};
use crate::worker::{Worker, WorkerExit};

pub const DEFAULT_SHUTDOWN_KEYWORD: &str = "shutdown";
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_millis(2500);

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    /// Directory the worker runs in. Resolved on the runner thread.
    pub work_dir: PathBuf,
    /// Reserved command that asks the worker to shut down (case-insensitive).
    pub shutdown_keyword: String,
    /// How long `stop()` waits before forcing termination.
    pub stop_timeout: Duration,
}

impl SupervisorSettings {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            shutdown_keyword: DEFAULT_SHUTDOWN_KEYWORD.to_string(),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }

    pub fn is_shutdown(&self, command: &str) -> bool {
        command.eq_ignore_ascii_case(&self.shutdown_keyword)
    }
}

/// Shared "a worker handle exists" flag, readable from any thread.
#[derive(Debug, Clone, Default)]
pub struct WorkerPresence(Arc<AtomicBool>);

impl WorkerPresence {
    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn set(&self, running: bool) {
        self.0.store(running, Ordering::SeqCst);
    }
}

/// The live worker. Exists exactly while a launch is outstanding.
#[derive(Debug)]
pub struct WorkerHandle {
    pub working_directory: PathBuf,
    pub arguments: Vec<String>,
    runner: RunnerHandle,
    pub exit_code: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
    /// The runner thread could not be created; the host is terminating.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Nothing was running.
    Idle,
    /// The worker returned within the timeout; its completion is queued.
    Exited,
    /// The worker was aborted and the host terminated.
    ForcedTermination,
}

/// Whether the control loop keeps going after a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

pub struct Supervisor {
    settings: SupervisorSettings,
    worker: Arc<dyn Worker>,
    surface: Box<dyn StatusSurface>,
    terminator: Arc<dyn Terminator>,
    control: MailboxSender,
    presence: WorkerPresence,
    log: Option<Arc<ExecutionLog>>,
    handle: Option<WorkerHandle>,
    lifecycle: Lifecycle,
    terminated: bool,
}

impl Supervisor {
    /// `control` must feed the mailbox this supervisor will be run on; the
    /// worker runner posts its completion there.
    pub fn new(
        settings: SupervisorSettings,
        worker: Arc<dyn Worker>,
        surface: Box<dyn StatusSurface>,
        terminator: Arc<dyn Terminator>,
        control: MailboxSender,
    ) -> Self {
        Self {
            settings,
            worker,
            surface,
            terminator,
            control,
            presence: WorkerPresence::default(),
            log: None,
            handle: None,
            lifecycle: Lifecycle::new(),
            terminated: false,
        }
    }

    pub fn with_log(mut self, log: Arc<ExecutionLog>) -> Self {
        self.log = Some(log);
        self
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    pub fn presence(&self) -> WorkerPresence {
        self.presence.clone()
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn worker_handle(&self) -> Option<&WorkerHandle> {
        self.handle.as_ref()
    }

    /// Notification state of the live worker, if any.
    pub fn notification_state(&self) -> Option<NotificationState> {
        self.handle.as_ref().map(|_| self.lifecycle.state())
    }

    fn record(&self, event: LogEvent) {
        if let Some(log) = &self.log {
            log.record(event);
        }
    }

    fn terminate(&mut self, reason: Termination) {
        if self.terminated {
            debug!(%reason, "host already terminating");
            return;
        }
        self.terminated = true;
        self.record(LogEvent::ServiceStopped {
            reason: reason.to_string(),
        });
        self.terminator.terminate(reason);
    }

    /// Launch the worker unless one is already running.
    pub fn start(&mut self, arguments: Vec<String>) -> StartOutcome {
        if self.handle.is_some() {
            info!(args = ?arguments, "worker already running; start ignored");
            self.record(LogEvent::StartIgnored { arguments });
            return StartOutcome::AlreadyRunning;
        }

        self.lifecycle = Lifecycle::new();
        self.surface.post(&self.lifecycle.render());

        let work_dir = self.settings.work_dir.clone();
        let spawned = runner::spawn(
            Arc::clone(&self.worker),
            work_dir.clone(),
            arguments.clone(),
            self.control.clone(),
        );

        match spawned {
            Ok(runner) => {
                info!(work_dir = %work_dir.display(), args = ?arguments, "worker launched");
                self.record(LogEvent::WorkerLaunched {
                    work_dir: work_dir.display().to_string(),
                    arguments: arguments.clone(),
                });
                self.handle = Some(WorkerHandle {
                    working_directory: work_dir,
                    arguments,
                    runner,
                    exit_code: None,
                });
                self.presence.set(true);
                StartOutcome::Started
            }
            Err(e) => {
                error!(error = %e, "failed to start worker runner thread");
                self.surface
                    .alert(&format!("Server could not be started: {e}"));
                self.surface.withdraw();
                self.terminate(Termination::RunnerUnavailable);
                StartOutcome::Failed
            }
        }
    }

    /// Forward one command to the worker.
    ///
    /// The first shutdown command moves the notification to Stopping; later
    /// ones are still forwarded but change nothing else.
    pub fn submit_command(&mut self, command: &str) {
        if self.handle.is_none() {
            debug!(command, "no worker running; command dropped");
            self.record(LogEvent::CommandDropped {
                command: command.to_string(),
            });
            return;
        }

        if self.settings.is_shutdown(command) && self.lifecycle.begin_stopping() {
            info!("shutdown requested");
            self.surface.post(&self.lifecycle.render());
            self.record(LogEvent::ShutdownRequested {
                command: command.to_string(),
            });
        }

        self.worker.enqueue_command(command);
        self.record(LogEvent::CommandForwarded {
            command: command.to_string(),
        });
    }

    /// Handle the notification's run-command action.
    pub fn quick_reply(&mut self, text: Option<String>) {
        if let Some(text) = text {
            self.submit_command(&text);
        }
        // The host only completes an interactive action once the notification
        // is posted again, even unchanged.
        if self.handle.is_some() && !self.lifecycle.is_stopping() {
            self.surface.post(&self.lifecycle.render());
        }
    }

    /// The runner reported that the worker returned (or never started).
    pub fn on_worker_completed(&mut self, exit: WorkerExit) -> Flow {
        let Some(mut handle) = self.handle.take() else {
            debug!(?exit, "completion without a live worker; ignored");
            return Flow::Continue;
        };
        self.presence.set(false);
        self.record(LogEvent::from(&exit));

        let reason = match &exit {
            WorkerExit::Exited { code } => {
                handle.exit_code = Some(*code);
                if *code != 0 {
                    warn!(code, "worker exited abnormally");
                    self.surface
                        .alert(&format!("Server exited with code {code}"));
                } else {
                    info!("worker exited cleanly");
                }
                Termination::WorkerExited { code: *code }
            }
            WorkerExit::WorkDirUnavailable { path, reason } => {
                error!(path = %path.display(), reason, "worker working directory unavailable");
                self.surface.alert(&format!(
                    "Server files are inaccessible ({}): {reason}",
                    path.display()
                ));
                Termination::WorkDirUnavailable
            }
        };

        handle.runner.join();
        self.surface.withdraw();
        self.terminate(reason);
        Flow::Exit
    }

    /// Lifecycle-driven teardown with a bounded wait.
    ///
    /// Blocks the control loop for at most `stop_timeout`.
    pub fn stop(&mut self) -> StopOutcome {
        let keyword = self.settings.shutdown_keyword.clone();
        self.submit_command(&keyword);

        let Some(handle) = self.handle.as_ref() else {
            return StopOutcome::Idle;
        };

        if handle.runner.wait_finished(self.settings.stop_timeout) {
            debug!("worker stopped within timeout");
            return StopOutcome::Exited;
        }

        let timeout_millis = self.settings.stop_timeout.as_millis() as u64;
        warn!(
            timeout_millis,
            "worker ignored shutdown; forcing termination"
        );
        self.worker.abort();
        self.record(LogEvent::ForcedTermination { timeout_millis });
        self.surface.withdraw();
        self.terminate(Termination::ShutdownTimeout);
        StopOutcome::ForcedTermination
    }

    /// Process one mailbox message.
    pub fn handle_message(&mut self, message: ControlMessage) -> Flow {
        match message {
            ControlMessage::Client(ClientMessage::Start { arguments }) => {
                match self.start(arguments) {
                    StartOutcome::Failed => Flow::Exit,
                    StartOutcome::Started | StartOutcome::AlreadyRunning => Flow::Continue,
                }
            }
            ControlMessage::Client(ClientMessage::Execute { command }) => {
                self.submit_command(&command);
                Flow::Continue
            }
            ControlMessage::Client(ClientMessage::QuickReply { text }) => {
                self.quick_reply(text);
                Flow::Continue
            }
            ControlMessage::Unbound => {
                info!("last client unbound; stopping worker");
                let keyword = self.settings.shutdown_keyword.clone();
                self.submit_command(&keyword);
                Flow::Continue
            }
            ControlMessage::WorkerCompleted(exit) => self.on_worker_completed(exit),
            ControlMessage::Destroy => match self.stop() {
                StopOutcome::Idle => {
                    self.record(LogEvent::ServiceStopped {
                        reason: "destroyed while idle".to_string(),
                    });
                    self.surface.withdraw();
                    Flow::Exit
                }
                // Completion is already queued behind us.
                StopOutcome::Exited => Flow::Continue,
                StopOutcome::ForcedTermination => Flow::Exit,
            },
        }
    }

    /// Drain `mailbox` until the host is done.
    pub fn run(mut self, mailbox: Mailbox) {
        info!("supervisor control loop started");
        while let Some(message) = mailbox.recv() {
            if self.handle_message(message) == Flow::Exit {
                break;
            }
        }
        debug!("supervisor control loop finished");
    }
}
