//! In-process host: the supervisor's control loop plus client bookkeeping.
//!
//! [`Service::spawn`] moves a [`Supervisor`] onto its own `supervisor-control`
//! thread. Clients reach it through a [`LocalLink`]; each binding is a
//! [`LocalChannel`] that counts as a connected client until dropped. When the
//! count falls back to zero the supervisor receives
//! [`ControlMessage::Unbound`] and shuts the worker down.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::connection::{CommandChannel, ServiceLink};
use crate::log::{ExecutionLog, LogEvent};
use crate::mailbox::{ChannelError, ClientMessage, ControlMessage, MailboxSender, mailbox};
use crate::supervisor::{Supervisor, SupervisorSettings, WorkerPresence};
use crate::surface::StatusSurface;
use crate::terminate::Terminator;
use crate::worker::Worker;

/// Everything needed to build a host.
pub struct ServiceParts {
    pub settings: SupervisorSettings,
    pub worker: Arc<dyn Worker>,
    pub surface: Box<dyn StatusSurface>,
    pub terminator: Arc<dyn Terminator>,
    pub log: Option<Arc<ExecutionLog>>,
}

#[derive(Debug, Default)]
struct Bindings {
    clients: Mutex<usize>,
}

impl Bindings {
    fn clients(&self) -> MutexGuard<'_, usize> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cloneable handle used by clients in this process (and by the IPC server).
#[derive(Clone)]
pub struct LocalLink {
    control: MailboxSender,
    presence: WorkerPresence,
    bindings: Arc<Bindings>,
    log: Option<Arc<ExecutionLog>>,
}

impl LocalLink {
    pub fn bound_clients(&self) -> usize {
        *self.bindings.clients()
    }

    pub fn is_worker_running(&self) -> bool {
        self.presence.is_running()
    }

    fn record(&self, event: LogEvent) {
        if let Some(log) = &self.log {
            log.record(event);
        }
    }
}

impl ServiceLink for LocalLink {
    type Channel = LocalChannel;

    fn connect(&self) -> Result<LocalChannel, ChannelError> {
        let mut clients = self.bindings.clients();
        *clients += 1;
        info!(clients = *clients, "client bound");
        self.record(LogEvent::ClientBound { clients: *clients });
        Ok(LocalChannel { link: self.clone() })
    }

    fn is_running(&self) -> Result<bool, ChannelError> {
        Ok(self.presence.is_running())
    }

    fn deliver(&self, message: ClientMessage) -> Result<(), ChannelError> {
        self.control.send(message)
    }
}

/// A bound client. Dropping it unbinds.
pub struct LocalChannel {
    link: LocalLink,
}

impl CommandChannel for LocalChannel {
    fn send(&mut self, message: ClientMessage) -> Result<(), ChannelError> {
        self.link.control.send(message)
    }
}

impl Drop for LocalChannel {
    fn drop(&mut self) {
        let mut clients = self.link.bindings.clients();
        *clients = clients.saturating_sub(1);
        info!(clients = *clients, "client unbound");
        self.link
            .record(LogEvent::ClientUnbound { clients: *clients });
        if *clients == 0 && self.link.control.send(ControlMessage::Unbound).is_err() {
            debug!("supervisor gone; unbind not delivered");
        }
    }
}

pub struct Service {
    link: LocalLink,
    control_thread: Option<JoinHandle<()>>,
}

impl Service {
    /// Start the control loop.
    pub fn spawn(parts: ServiceParts) -> Result<Self> {
        let (control, mailbox) = mailbox();

        let mut supervisor = Supervisor::new(
            parts.settings,
            parts.worker,
            parts.surface,
            parts.terminator,
            control.clone(),
        );
        if let Some(log) = &parts.log {
            supervisor = supervisor.with_log(Arc::clone(log));
        }
        let presence = supervisor.presence();

        let control_thread = thread::Builder::new()
            .name("supervisor-control".to_string())
            .spawn(move || supervisor.run(mailbox))
            .context("failed to spawn supervisor control thread")?;

        Ok(Self {
            link: LocalLink {
                control,
                presence,
                bindings: Arc::new(Bindings::default()),
                log: parts.log,
            },
            control_thread: Some(control_thread),
        })
    }

    pub fn link(&self) -> LocalLink {
        self.link.clone()
    }

    pub fn sender(&self) -> MailboxSender {
        self.link.control.clone()
    }

    /// `queryIsRunning`: a worker handle exists, bound clients or not.
    pub fn is_running(&self) -> bool {
        self.link.presence.is_running()
    }

    pub fn bound_clients(&self) -> usize {
        self.link.bound_clients()
    }

    /// Ask the control loop to run the bounded shutdown protocol.
    pub fn destroy(&self) {
        if self.link.control.send(ControlMessage::Destroy).is_err() {
            debug!("supervisor already gone");
        }
    }

    /// Block until the control loop has finished.
    pub fn join(mut self) {
        if let Some(handle) = self.control_thread.take() {
            if handle.join().is_err() {
                warn!("supervisor control thread panicked");
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.control_thread
            .as_ref()
            .is_none_or(|handle| handle.is_finished())
    }
}
