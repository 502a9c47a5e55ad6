//! Client side of the socket: a [`ServiceLink`] for another process.

use std::io::{BufRead, BufReader};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};

use super::{Request, Response, write_line};
use crate::connection::{CommandChannel, ServiceLink};
use crate::mailbox::{ChannelError, ClientMessage};

#[derive(Debug, Clone)]
pub struct IpcLink {
    socket: PathBuf,
}

impl IpcLink {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
        }
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    /// Whether a host answers on the socket right now.
    pub fn is_listening(&self) -> bool {
        UnixStream::connect(&self.socket).is_ok()
    }

    fn open(&self) -> Result<IpcChannel, ChannelError> {
        let stream = UnixStream::connect(&self.socket)?;
        IpcChannel::new(stream)
    }
}

impl ServiceLink for IpcLink {
    type Channel = IpcChannel;

    fn connect(&self) -> Result<IpcChannel, ChannelError> {
        let mut channel = self.open()?;
        channel.expect_ok(&Request::Bind)?;
        Ok(channel)
    }

    fn is_running(&self) -> Result<bool, ChannelError> {
        match self.open()?.roundtrip(&Request::IsRunning)? {
            Response::Running { running } => Ok(running),
            Response::Error { message } => Err(ChannelError::Rejected(message)),
            other => Err(unexpected(&other)),
        }
    }

    fn deliver(&self, message: ClientMessage) -> Result<(), ChannelError> {
        self.open()?.expect_ok(&message.into())
    }
}

/// One open socket connection. Bound if it has sent `bind`; closing it
/// unbinds.
pub struct IpcChannel {
    reader: BufReader<UnixStream>,
    writer: UnixStream,
}

impl IpcChannel {
    fn new(stream: UnixStream) -> Result<Self, ChannelError> {
        let writer = stream.try_clone()?;
        Ok(Self {
            reader: BufReader::new(stream),
            writer,
        })
    }

    fn roundtrip(&mut self, request: &Request) -> Result<Response, ChannelError> {
        write_line(&mut self.writer, request)?;
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Err(ChannelError::Closed);
        }
        serde_json::from_str(&line).map_err(|e| ChannelError::Protocol(e.to_string()))
    }

    fn expect_ok(&mut self, request: &Request) -> Result<(), ChannelError> {
        match self.roundtrip(request)? {
            Response::Ok => Ok(()),
            Response::Error { message } => Err(ChannelError::Rejected(message)),
            other => Err(unexpected(&other)),
        }
    }
}

impl CommandChannel for IpcChannel {
    fn send(&mut self, message: ClientMessage) -> Result<(), ChannelError> {
        self.expect_ok(&message.into())
    }
}

fn unexpected(response: &Response) -> ChannelError {
    ChannelError::Protocol(format!("unexpected response: {response:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionMonitor;
    use crate::ipc::IpcServer;
    use crate::service::{Service, ServiceParts};
    use crate::supervisor::SupervisorSettings;
    use crate::terminate::Termination;
    use crate::testkit::{RecordingSurface, RecordingTerminator, ScriptedWorker};
    use std::io::Write;
    use std::os::unix::net::UnixListener;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread::{self, JoinHandle};
    use std::time::{Duration, Instant};

    struct Host {
        socket: PathBuf,
        service: Option<Service>,
        worker: Arc<ScriptedWorker>,
        terminator: RecordingTerminator,
        stop: Arc<AtomicBool>,
        listener: Option<JoinHandle<()>>,
        _tmp: tempfile::TempDir,
    }

    impl Host {
        fn start(worker: ScriptedWorker) -> Self {
            let tmp = tempfile::tempdir().unwrap();
            let socket = tmp.path().join("tether.sock");
            let worker = Arc::new(worker);
            let terminator = RecordingTerminator::default();
            let service = Service::spawn(ServiceParts {
                settings: SupervisorSettings::new(tmp.path()),
                worker: worker.clone(),
                surface: Box::new(RecordingSurface::default()),
                terminator: Arc::new(terminator.clone()),
                log: None,
            })
            .unwrap();

            let server = IpcServer::bind(&socket).unwrap();
            let stop = Arc::new(AtomicBool::new(false));
            let listener = {
                let link = service.link();
                let stop = Arc::clone(&stop);
                thread::spawn(move || server.serve(&link, &stop).unwrap())
            };
            Self {
                socket,
                service: Some(service),
                worker,
                terminator,
                stop,
                listener: Some(listener),
                _tmp: tmp,
            }
        }

        fn link(&self) -> IpcLink {
            IpcLink::new(&self.socket)
        }
    }

    impl Drop for Host {
        fn drop(&mut self) {
            self.worker.release();
            self.stop.store(true, Ordering::Relaxed);
            if let Some(listener) = self.listener.take() {
                let _ = listener.join();
            }
            if let Some(service) = self.service.take() {
                service.destroy();
                service.join();
            }
        }
    }

    fn eventually(mut check: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if check() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn one_shot_start_and_running_query() {
        let host = Host::start(ScriptedWorker::new(0));
        let link = host.link();
        assert!(link.is_listening());
        assert!(!link.is_running().unwrap());

        link.deliver(ClientMessage::Start {
            arguments: vec!["--port".into(), "8303".into()],
        })
        .unwrap();
        assert!(host.worker.wait_for_runs(1, Duration::from_secs(5)));
        assert!(eventually(|| link.is_running().unwrap()));
        assert_eq!(
            host.worker.runs()[0].1,
            vec!["--port".to_string(), "8303".to_string()]
        );
    }

    #[test]
    fn bound_client_hanging_up_shuts_worker_down() {
        let host = Host::start(ScriptedWorker::new(0));
        let monitor = ConnectionMonitor::new(host.link());
        monitor.bind().unwrap();
        assert!(monitor.request_start(vec![]));
        assert!(host.worker.wait_for_runs(1, Duration::from_secs(5)));
        assert!(monitor.request_command("say hi"));

        assert!(monitor.unbind());
        assert_eq!(
            host.terminator.wait(Duration::from_secs(5)),
            Some(Termination::WorkerExited { code: 0 })
        );
        assert_eq!(host.worker.commands(), vec!["say hi", "shutdown"]);
    }

    #[test]
    fn one_shot_delivery_does_not_bind() {
        let host = Host::start(ScriptedWorker::new(0));
        let link = host.link();
        link.deliver(ClientMessage::Start { arguments: vec![] })
            .unwrap();
        assert!(host.worker.wait_for_runs(1, Duration::from_secs(5)));
        link.deliver(ClientMessage::Execute {
            command: "status".into(),
        })
        .unwrap();

        assert!(eventually(|| host.worker.commands() == vec!["status"]));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(host.worker.commands(), vec!["status"]);
        assert!(host.terminator.calls().is_empty());
    }

    #[test]
    fn malformed_line_gets_error_response() {
        let host = Host::start(ScriptedWorker::new(0));
        let mut stream = UnixStream::connect(&host.socket).unwrap();
        stream.write_all(b"{\"type\":\"explode\"}\n").unwrap();
        let mut line = String::new();
        BufReader::new(stream.try_clone().unwrap())
            .read_line(&mut line)
            .unwrap();
        let response: Response = serde_json::from_str(&line).unwrap();
        assert!(matches!(response, Response::Error { message } if message.contains("malformed")));
    }

    #[test]
    fn bad_bytes_on_bound_connection_keep_the_binding() {
        let host = Host::start(ScriptedWorker::new(0));
        host.link()
            .deliver(ClientMessage::Start { arguments: vec![] })
            .unwrap();
        assert!(host.worker.wait_for_runs(1, Duration::from_secs(5)));

        let mut stream = UnixStream::connect(&host.socket).unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut reply = |stream: &mut UnixStream, bytes: &[u8]| {
            stream.write_all(bytes).unwrap();
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            serde_json::from_str::<Response>(&line).unwrap()
        };

        assert_eq!(reply(&mut stream, b"{\"type\":\"bind\"}\n"), Response::Ok);
        let response = reply(&mut stream, b"\xff\xfe\n");
        assert!(matches!(response, Response::Error { message } if message.contains("UTF-8")));
        let mut oversized = vec![b' '; 70 * 1024];
        oversized.push(b'\n');
        assert!(matches!(reply(&mut stream, &oversized), Response::Error { .. }));

        // Still bound: no shutdown went out on our behalf.
        thread::sleep(Duration::from_millis(50));
        assert!(host.worker.commands().is_empty());
        assert!(host.terminator.calls().is_empty());
        assert_eq!(
            reply(&mut stream, b"{\"type\":\"execute\",\"command\":\"status\"}\n"),
            Response::Ok
        );
        assert!(eventually(|| host.worker.commands() == vec!["status"]));
    }

    #[test]
    fn unreachable_host_reads_as_not_running() {
        let tmp = tempfile::tempdir().unwrap();
        let monitor = ConnectionMonitor::new(IpcLink::new(tmp.path().join("nobody.sock")));
        assert!(!monitor.link().is_listening());
        assert!(!monitor.query_is_running());
        assert!(monitor.bind().is_err());
        assert!(!monitor.is_bound());
    }

    #[test]
    fn stale_socket_is_replaced() {
        let tmp = tempfile::tempdir().unwrap();
        let socket = tmp.path().join("tether.sock");
        drop(UnixListener::bind(&socket).unwrap());
        assert!(socket.exists());

        let server = IpcServer::bind(&socket).unwrap();
        assert_eq!(server.path(), socket.as_path());
        drop(server);
        assert!(!socket.exists());
    }

    #[test]
    fn regular_file_at_socket_path_is_left_alone() {
        let tmp = tempfile::tempdir().unwrap();
        let socket = tmp.path().join("tether.sock");
        std::fs::write(&socket, "notes").unwrap();

        let err = IpcServer::bind(&socket).err().unwrap();
        assert!(err.to_string().contains("not a socket"));
        assert_eq!(std::fs::read_to_string(&socket).unwrap(), "notes");
    }

    #[test]
    fn live_socket_refuses_second_host() {
        let tmp = tempfile::tempdir().unwrap();
        let socket = tmp.path().join("tether.sock");
        let _first = IpcServer::bind(&socket).unwrap();
        let err = IpcServer::bind(&socket).err().unwrap();
        assert!(err.to_string().contains("already listening"));
    }
}
