//! Host side of the socket: accepts clients and feeds the local link.

use std::io::{self, BufRead, BufReader, ErrorKind, Read};
use std::os::unix::fs::FileTypeExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::{debug, info, warn};

use super::{Request, Response, write_line};
use crate::connection::{CommandChannel, ServiceLink};
use crate::mailbox::{ChannelError, ClientMessage};
use crate::service::{LocalChannel, LocalLink};

const ACCEPT_POLL: Duration = Duration::from_millis(50);
/// Longest request line accepted, newline excluded.
const MAX_REQUEST_LINE: usize = 64 * 1024;

pub struct IpcServer {
    listener: UnixListener,
    path: PathBuf,
}

impl IpcServer {
    /// Listen on `path`.
    ///
    /// A leftover socket file nobody answers on is replaced. A live one means
    /// another host owns it, and anything that is not a socket is left
    /// alone; both are errors.
    pub fn bind(path: &Path) -> Result<Self> {
        if let Ok(meta) = std::fs::symlink_metadata(path) {
            if !meta.file_type().is_socket() {
                bail!("{} exists and is not a socket", path.display());
            }
            if UnixStream::connect(path).is_ok() {
                bail!("another host is already listening on {}", path.display());
            }
            debug!(path = %path.display(), "removing stale socket");
            std::fs::remove_file(path)
                .with_context(|| format!("failed to remove stale socket {}", path.display()))?;
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create socket directory {}", parent.display()))?;
        }

        let listener = UnixListener::bind(path)
            .with_context(|| format!("failed to listen on {}", path.display()))?;
        listener
            .set_nonblocking(true)
            .context("failed to make listener non-blocking")?;

        info!(socket = %path.display(), "listening for clients");
        Ok(Self {
            listener,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept clients until `stop` is set. Each client gets its own thread.
    pub fn serve(&self, link: &LocalLink, stop: &AtomicBool) -> Result<()> {
        while !stop.load(Ordering::Relaxed) {
            match self.listener.accept() {
                Ok((stream, _)) => {
                    stream
                        .set_nonblocking(false)
                        .context("failed to configure client socket")?;
                    let link = link.clone();
                    thread::Builder::new()
                        .name("ipc-client".to_string())
                        .spawn(move || {
                            if let Err(e) = handle_connection(stream, &link) {
                                debug!(error = %e, "client connection ended with error");
                            }
                        })
                        .context("failed to spawn client thread")?;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e).context("failed to accept client"),
            }
        }
        debug!("listener stopped");
        Ok(())
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            debug!(error = %e, path = %self.path.display(), "socket cleanup failed");
        }
    }
}

/// Serve one client until it hangs up. Dropping a held binding on return is
/// the unbind.
fn handle_connection(stream: UnixStream, link: &LocalLink) -> Result<(), ChannelError> {
    let mut writer = stream.try_clone()?;
    let mut reader = BufReader::new(stream);
    let mut binding: Option<LocalChannel> = None;

    while let Some(line) = next_line(&mut reader)? {
        let response = match line {
            Line::Text(text) if text.trim().is_empty() => continue,
            Line::Text(text) => match serde_json::from_str::<Request>(&text) {
                Ok(request) => respond(request, link, &mut binding),
                Err(e) => {
                    warn!(error = %e, "malformed request from client");
                    Response::Error {
                        message: format!("malformed request: {e}"),
                    }
                }
            },
            Line::NotUtf8 => {
                warn!("request from client is not UTF-8");
                Response::Error {
                    message: "malformed request: not valid UTF-8".to_string(),
                }
            }
            Line::TooLong => {
                warn!(limit = MAX_REQUEST_LINE, "oversized request from client");
                Response::Error {
                    message: format!("request longer than {MAX_REQUEST_LINE} bytes"),
                }
            }
        };
        write_line(&mut writer, &response)?;
    }

    if binding.is_some() {
        debug!("bound client hung up");
    }
    Ok(())
}

enum Line {
    Text(String),
    NotUtf8,
    TooLong,
}

/// Read one request line without buffering more than the limit. `None` at
/// end of stream.
fn next_line(reader: &mut impl BufRead) -> io::Result<Option<Line>> {
    let mut buf = Vec::new();
    let read = reader
        .by_ref()
        .take(MAX_REQUEST_LINE as u64 + 1)
        .read_until(b'\n', &mut buf)?;
    if read == 0 {
        return Ok(None);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
    } else if buf.len() > MAX_REQUEST_LINE {
        skip_line(reader)?;
        return Ok(Some(Line::TooLong));
    }
    Ok(Some(match String::from_utf8(buf) {
        Ok(text) => Line::Text(text),
        Err(_) => Line::NotUtf8,
    }))
}

/// Discard input up to and including the next newline.
fn skip_line(reader: &mut impl BufRead) -> io::Result<()> {
    loop {
        let available = reader.fill_buf()?;
        if available.is_empty() {
            return Ok(());
        }
        match available.iter().position(|b| *b == b'\n') {
            Some(end) => {
                reader.consume(end + 1);
                return Ok(());
            }
            None => {
                let len = available.len();
                reader.consume(len);
            }
        }
    }
}

fn respond(request: Request, link: &LocalLink, binding: &mut Option<LocalChannel>) -> Response {
    match request {
        Request::Bind => {
            if binding.is_none() {
                match link.connect() {
                    Ok(channel) => *binding = Some(channel),
                    Err(e) => return error_response(&e),
                }
            }
            Response::Ok
        }
        Request::IsRunning => match link.is_running() {
            Ok(running) => Response::Running { running },
            Err(e) => error_response(&e),
        },
        Request::Start { arguments } => submit(ClientMessage::Start { arguments }, link, binding),
        Request::Execute { command } => submit(ClientMessage::Execute { command }, link, binding),
        Request::QuickReply { text } => submit(ClientMessage::QuickReply { text }, link, binding),
    }
}

fn submit(
    message: ClientMessage,
    link: &LocalLink,
    binding: &mut Option<LocalChannel>,
) -> Response {
    let sent = match binding.as_mut() {
        Some(channel) => channel.send(message),
        None => link.deliver(message),
    };
    match sent {
        Ok(()) => Response::Ok,
        Err(e) => error_response(&e),
    }
}

fn error_response(e: &ChannelError) -> Response {
    Response::Error {
        message: e.to_string(),
    }
}
