//! Command mailbox: the supervisor's inbound message queue.
//!
//! Every event that can act on the worker (client requests, quick replies,
//! unbinding, worker completion, host teardown) is a [`ControlMessage`]
//! delivered here and processed one at a time by the supervisor's control
//! loop. Messages from a single sender arrive in the order sent; there is no
//! ordering between senders and no persistence. Once the supervisor is gone,
//! sends fail with [`ChannelError::Closed`] and the message is dropped.

use std::sync::mpsc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::worker::WorkerExit;

/// Requests a client can submit, locally or across the process boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Launch the worker with these arguments (no-op if already running).
    Start { arguments: Vec<String> },
    /// Forward one command into the worker's queue.
    Execute { command: String },
    /// Payload of the notification's run-command action.
    QuickReply { text: Option<String> },
}

/// Everything the supervisor's control loop can receive.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    Client(ClientMessage),
    /// The last bound client went away.
    Unbound,
    /// Posted by the worker runner exactly once per launch.
    WorkerCompleted(WorkerExit),
    /// Host teardown: run the bounded shutdown protocol.
    Destroy,
}

impl From<ClientMessage> for ControlMessage {
    fn from(message: ClientMessage) -> Self {
        ControlMessage::Client(message)
    }
}

/// Failure to deliver a message over a command channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("command channel closed")]
    Closed,
    #[error("command channel I/O failed")]
    Io(#[from] std::io::Error),
    #[error("malformed message on command channel: {0}")]
    Protocol(String),
    #[error("request rejected: {0}")]
    Rejected(String),
}

/// Create a connected sender/receiver pair.
pub fn mailbox() -> (MailboxSender, Mailbox) {
    let (tx, rx) = mpsc::channel();
    (MailboxSender { tx }, Mailbox { rx })
}

/// Cloneable sending half. Safe to move into any thread.
#[derive(Debug, Clone)]
pub struct MailboxSender {
    tx: mpsc::Sender<ControlMessage>,
}

impl MailboxSender {
    pub fn send(&self, message: impl Into<ControlMessage>) -> Result<(), ChannelError> {
        self.tx
            .send(message.into())
            .map_err(|_| ChannelError::Closed)
    }
}

/// Receiving half, owned by the supervisor's control loop.
#[derive(Debug)]
pub struct Mailbox {
    rx: mpsc::Receiver<ControlMessage>,
}

impl Mailbox {
    /// Block until the next message. `None` once every sender is gone.
    pub fn recv(&self) -> Option<ControlMessage> {
        self.rx.recv().ok()
    }
}
