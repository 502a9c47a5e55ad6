//! Connection monitor: a client's view of its binding to the host.
//!
//! The connection state and every send on the bound channel sit behind one
//! mutex, so a send can never race a concurrent unbind tearing the channel
//! down. A send that fails is treated as the end of that channel: the state
//! resets to unbound and the failure goes no further.
//!
//! "Is the worker running" is answered by the host itself (a worker handle
//! exists), not by this monitor's binding: a worker keeps running while no
//! client is bound.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::mailbox::{ChannelError, ClientMessage};

/// A bound, message-carrying connection to the host.
pub trait CommandChannel: Send {
    fn send(&mut self, message: ClientMessage) -> Result<(), ChannelError>;
}

/// How a client reaches a host.
pub trait ServiceLink: Send + Sync {
    type Channel: CommandChannel;

    /// Bind: open a channel that counts as a connected client until dropped.
    fn connect(&self) -> Result<Self::Channel, ChannelError>;

    /// Does the host currently have a worker handle?
    fn is_running(&self) -> Result<bool, ChannelError>;

    /// Deliver one message without binding.
    fn deliver(&self, message: ClientMessage) -> Result<(), ChannelError>;
}

struct ConnectionState<C> {
    channel: Option<C>,
}

impl<C> ConnectionState<C> {
    fn bound(&self) -> bool {
        self.channel.is_some()
    }
}

pub struct ConnectionMonitor<L: ServiceLink> {
    link: L,
    state: Mutex<ConnectionState<L::Channel>>,
}

impl<L: ServiceLink> ConnectionMonitor<L> {
    pub fn new(link: L) -> Self {
        Self {
            link,
            state: Mutex::new(ConnectionState { channel: None }),
        }
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    fn state(&self) -> MutexGuard<'_, ConnectionState<L::Channel>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bind to the host. Rebinding replaces (and releases) any old channel.
    pub fn bind(&self) -> Result<(), ChannelError> {
        let mut state = self.state();
        let channel = self.link.connect()?;
        if state.channel.replace(channel).is_some() {
            debug!("replaced existing binding");
        }
        info!("bound to host");
        Ok(())
    }

    /// Release the binding. Returns whether one was held.
    pub fn unbind(&self) -> bool {
        let released = self.state().channel.take();
        if released.is_some() {
            info!("unbound from host");
        }
        released.is_some()
    }

    pub fn is_bound(&self) -> bool {
        self.state().bound()
    }

    /// Send over the bound channel. `false` if unbound or the channel broke.
    pub fn try_send(&self, message: ClientMessage) -> bool {
        let mut state = self.state();
        let Some(channel) = state.channel.as_mut() else {
            debug!(?message, "not bound; message dropped");
            return false;
        };
        match channel.send(message) {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "command channel broken; resetting connection");
                state.channel = None;
                false
            }
        }
    }

    pub fn request_start(&self, arguments: Vec<String>) -> bool {
        self.try_send(ClientMessage::Start { arguments })
    }

    pub fn request_command(&self, command: impl Into<String>) -> bool {
        self.try_send(ClientMessage::Execute {
            command: command.into(),
        })
    }

    /// Guarded "is the worker running" query. An unreachable host counts as
    /// not running.
    pub fn query_is_running(&self) -> bool {
        let _state = self.state();
        match self.link.is_running() {
            Ok(running) => running,
            Err(e) => {
                debug!(error = %e, "host unreachable");
                false
            }
        }
    }
}
