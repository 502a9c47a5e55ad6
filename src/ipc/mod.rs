//! Cross-process command channel over a Unix domain socket.
//!
//! Wire format: one JSON object per line in each direction, tagged by
//! `"type"`. Every request gets exactly one response.
//!
//! ```text
//! → {"type":"bind"}                          ← {"type":"ok"}
//! → {"type":"start","arguments":["--port","8303"]}
//! → {"type":"execute","command":"status"}
//! → {"type":"quick_reply","text":"echo hi"}
//! → {"type":"is_running"}                    ← {"type":"running","running":true}
//!                                            ← {"type":"error","message":"..."}
//! ```
//!
//! A connection is unbound until it sends `bind`. Requests on an unbound
//! connection are one-shot deliveries; on a bound one they go through the
//! binding, and closing a bound connection unbinds it.

pub mod client;
pub mod server;

use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::mailbox::{ChannelError, ClientMessage};

pub use client::{IpcChannel, IpcLink};
pub use server::IpcServer;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    Bind,
    IsRunning,
    Start { arguments: Vec<String> },
    Execute { command: String },
    QuickReply { text: Option<String> },
}

impl From<ClientMessage> for Request {
    fn from(message: ClientMessage) -> Self {
        match message {
            ClientMessage::Start { arguments } => Request::Start { arguments },
            ClientMessage::Execute { command } => Request::Execute { command },
            ClientMessage::QuickReply { text } => Request::QuickReply { text },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Ok,
    Running { running: bool },
    Error { message: String },
}

fn write_line<W: Write, T: Serialize>(writer: &mut W, message: &T) -> Result<(), ChannelError> {
    let json = serde_json::to_string(message).map_err(|e| ChannelError::Protocol(e.to_string()))?;
    writeln!(writer, "{json}")?;
    writer.flush()?;
    Ok(())
}
