//! What the CLI does on the client side of the socket.
//!
//! Everything except host spawning is generic over [`ServiceLink`], so the
//! same code drives an in-process [`LocalLink`](crate::service::LocalLink)
//! in tests and an [`IpcLink`] against a real host.

use std::fs::OpenOptions;
use std::io::BufRead;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use tracing::{debug, info, warn};

use crate::connection::{ConnectionMonitor, ServiceLink};
use crate::ipc::IpcLink;
use crate::mailbox::ClientMessage;
use crate::notification::NotificationAction;

pub const HOST_STARTUP_TIMEOUT: Duration = Duration::from_secs(5);
const LISTEN_POLL: Duration = Duration::from_millis(50);

/// Poll until a host answers on the socket. `false` on timeout.
pub fn wait_for_listener(link: &IpcLink, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if link.is_listening() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(LISTEN_POLL);
    }
}

/// Make sure a host is listening, spawning `<this exe> serve` in the
/// background if needed. Returns whether a host was spawned.
pub fn ensure_host(link: &IpcLink, root: &Path, service_log: &Path) -> Result<bool> {
    if link.is_listening() {
        debug!(socket = %link.socket().display(), "host already listening");
        return Ok(false);
    }

    if let Some(parent) = service_log.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create log directory {}", parent.display()))?;
    }
    let stdout_log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(service_log)
        .with_context(|| format!("failed to open {}", service_log.display()))?;
    let stderr_log = stdout_log.try_clone()?;

    let exe = std::env::current_exe().context("failed to locate the tether executable")?;
    let child = Command::new(exe)
        .arg("serve")
        .current_dir(root)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout_log))
        .stderr(Stdio::from(stderr_log))
        .spawn()
        .context("failed to spawn background host")?;
    info!(pid = child.id(), log = %service_log.display(), "spawned background host");

    if !wait_for_listener(link, HOST_STARTUP_TIMEOUT) {
        bail!(
            "host did not start listening on {} within {}s (see {})",
            link.socket().display(),
            HOST_STARTUP_TIMEOUT.as_secs(),
            service_log.display()
        );
    }
    Ok(true)
}

/// One-shot start request.
pub fn start<L: ServiceLink>(link: &L, arguments: Vec<String>) -> Result<()> {
    link.deliver(ClientMessage::Start { arguments })
        .context("start request was not delivered")
}

/// One-shot command.
pub fn exec<L: ServiceLink>(link: &L, command: &str) -> Result<()> {
    link.deliver(ClientMessage::Execute {
        command: command.to_string(),
    })
    .context("command was not delivered")
}

/// Deliver the payload a notification action would carry.
pub fn action<L: ServiceLink>(
    link: &L,
    action: NotificationAction,
    shutdown_keyword: &str,
    reply: Option<String>,
) -> Result<()> {
    link.deliver(action.payload(shutdown_keyword, reply))
        .with_context(|| format!("'{}' action was not delivered", action.label()))
}

pub fn status<L: ServiceLink>(link: L) -> bool {
    ConnectionMonitor::new(link).query_is_running()
}

/// Bind, optionally request a start, then forward each non-empty input line
/// as a command until input ends or the binding breaks. Returns how many
/// commands were forwarded. The binding is released on return, which shuts
/// the server down once no other client is bound.
pub fn attach<L: ServiceLink>(
    monitor: &ConnectionMonitor<L>,
    start_with: Option<Vec<String>>,
    input: impl BufRead,
) -> Result<usize> {
    monitor.bind().context("failed to bind to host")?;

    if let Some(arguments) = start_with {
        if !monitor.request_start(arguments) {
            monitor.unbind();
            bail!("start request was not delivered");
        }
    }

    let mut forwarded = 0;
    for line in input.lines() {
        let line = line.context("failed to read input")?;
        let command = line.trim();
        if command.is_empty() {
            continue;
        }
        if !monitor.request_command(command) {
            warn!("connection to host lost");
            break;
        }
        forwarded += 1;
    }

    monitor.unbind();
    Ok(forwarded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{Service, ServiceParts};
    use crate::supervisor::SupervisorSettings;
    use crate::terminate::Termination;
    use crate::testkit::{RecordingSurface, RecordingTerminator, ScriptedWorker};
    use std::io::Cursor;
    use std::sync::Arc;

    struct Host {
        service: Service,
        worker: Arc<ScriptedWorker>,
        terminator: RecordingTerminator,
        _tmp: tempfile::TempDir,
    }

    fn host() -> Host {
        let tmp = tempfile::tempdir().unwrap();
        let worker = Arc::new(ScriptedWorker::new(0));
        let terminator = RecordingTerminator::default();
        let service = Service::spawn(ServiceParts {
            settings: SupervisorSettings::new(tmp.path()),
            worker: worker.clone(),
            surface: Box::new(RecordingSurface::default()),
            terminator: Arc::new(terminator.clone()),
            log: None,
        })
        .unwrap();
        Host {
            service,
            worker,
            terminator,
            _tmp: tmp,
        }
    }

    #[test]
    fn attach_forwards_lines_then_unbinds() {
        let h = host();
        let monitor = ConnectionMonitor::new(h.service.link());
        let input = Cursor::new("status\n\n  say hi  \n");

        let forwarded = attach(&monitor, Some(vec!["-q".into()]), input).unwrap();
        assert_eq!(forwarded, 2);
        assert!(!monitor.is_bound());

        assert_eq!(
            h.terminator.wait(Duration::from_secs(5)),
            Some(Termination::WorkerExited { code: 0 })
        );
        assert_eq!(h.worker.runs()[0].1, vec!["-q".to_string()]);
        assert_eq!(h.worker.commands(), vec!["status", "say hi", "shutdown"]);
        h.service.join();
    }

    #[test]
    fn stop_action_sends_shutdown_keyword() {
        let h = host();
        let link = h.service.link();
        start(&link, vec![]).unwrap();
        assert!(h.worker.wait_for_runs(1, Duration::from_secs(5)));
        let deadline = Instant::now() + Duration::from_secs(5);
        while !status(link.clone()) {
            assert!(Instant::now() < deadline, "worker never reported running");
            thread::sleep(Duration::from_millis(5));
        }

        action(&link, NotificationAction::Stop, "shutdown", None).unwrap();
        assert_eq!(
            h.terminator.wait(Duration::from_secs(5)),
            Some(Termination::WorkerExited { code: 0 })
        );
        assert_eq!(h.worker.commands(), vec!["shutdown"]);
        assert!(!status(link));
        h.service.join();
    }

    #[test]
    fn exec_before_start_is_dropped() {
        let h = host();
        let link = h.service.link();
        exec(&link, "status").unwrap();
        start(&link, vec![]).unwrap();
        assert!(h.worker.wait_for_runs(1, Duration::from_secs(5)));
        exec(&link, "shutdown").unwrap();
        h.terminator.wait(Duration::from_secs(5));
        assert_eq!(h.worker.commands(), vec!["shutdown"]);
        h.service.join();
    }

    #[test]
    fn delivery_to_a_stopped_host_is_an_error() {
        let h = host();
        let link = h.service.link();
        h.service.destroy();
        h.service.join();
        let err = exec(&link, "status").unwrap_err();
        assert!(format!("{err:#}").contains("not delivered"));
    }

    #[test]
    fn no_listener_times_out() {
        let tmp = tempfile::tempdir().unwrap();
        let link = IpcLink::new(tmp.path().join("nobody.sock"));
        assert!(!wait_for_listener(&link, Duration::from_millis(120)));
    }
}
