use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use tether_cli::cli::{Cli, Command};
use tether_cli::config::{self, TetherConfig};
use tether_cli::paths;

#[cfg(unix)]
mod host {
    use std::io;
    use std::path::Path;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    use anyhow::{Context, Result, bail};
    use tracing::{debug, info, warn};
    use uuid::Uuid;

    use tether_cli::cli::{ActionCommand, Command};
    use tether_cli::client;
    use tether_cli::config::TetherConfig;
    use tether_cli::connection::ConnectionMonitor;
    use tether_cli::ipc::{IpcLink, IpcServer};
    use tether_cli::log::{ExecutionLog, LogEvent};
    use tether_cli::mailbox::ControlMessage;
    use tether_cli::notification::NotificationAction;
    use tether_cli::paths;
    use tether_cli::service::{Service, ServiceParts};
    use tether_cli::surface::{self, ConsoleSurface, StatusFileSurface, Surfaces};
    use tether_cli::terminate::ProcessExit;
    use tether_cli::worker::ProcessWorker;

    /// Run the host in the foreground until the worker is gone.
    pub fn serve(config: &TetherConfig, root: &Path) -> Result<()> {
        let run_id = Uuid::new_v4().to_string();
        let socket = config.socket_path(root);
        let server = IpcServer::bind(&socket)?;
        let log = Arc::new(ExecutionLog::for_run(&config.log_dir(root), &run_id)?);

        let mut surfaces = Surfaces::new().with(ConsoleSurface);
        if config.service.status_file {
            surfaces = surfaces.with(StatusFileSurface::new(&paths::status_path(root), &run_id)?);
        }
        let program = config.program_path(root);
        info!(run_id = %run_id, program = %program.display(), "starting host");

        log.record(LogEvent::ServiceStarted {
            pid: std::process::id(),
            socket: Some(socket.display().to_string()),
        });
        let service = Service::spawn(ServiceParts {
            settings: config.supervisor_settings(root),
            worker: Arc::new(ProcessWorker::new(program)),
            surface: Box::new(surfaces),
            terminator: Arc::new(ProcessExit::new().removing(&socket)),
            log: Some(Arc::clone(&log)),
        })?;

        let control = service.sender();
        ctrlc::set_handler(move || {
            if control.send(ControlMessage::Destroy).is_err() {
                debug!("interrupt after supervisor exit");
            }
        })
        .context("failed to install signal handler")?;

        let stop = Arc::new(AtomicBool::new(false));
        let listener = {
            let link = service.link();
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name("ipc-listener".to_string())
                .spawn(move || server.serve(&link, &stop))
                .context("failed to spawn listener thread")?
        };

        service.join();
        stop.store(true, Ordering::Relaxed);
        match listener.join() {
            Ok(result) => result?,
            Err(_) => bail!("listener thread panicked"),
        }
        info!(log = %log.path().display(), "host stopped");
        Ok(())
    }

    pub fn run(command: Command, config: &TetherConfig, root: &Path) -> Result<()> {
        let link = IpcLink::new(config.socket_path(root));
        let keyword = config.shutdown.keyword.as_str();

        match command {
            Command::Serve => serve(config, root)?,
            Command::Start { attach, args } => {
                let service_log = paths::service_log_path(&config.log_dir(root));
                if client::ensure_host(&link, root, &service_log)? {
                    println!("\x1b[36m[tether]\x1b[0m host started in background");
                    println!("\x1b[36m[tether]\x1b[0m host log: {}", service_log.display());
                }
                let args = if args.is_empty() {
                    config.server.args.clone()
                } else {
                    args
                };
                if attach {
                    attach_stdin(link, Some(args))?;
                } else {
                    client::start(&link, args)?;
                    println!("\x1b[36m[tether]\x1b[0m start requested");
                }
            }
            Command::Exec { command } => client::exec(&link, &command)?,
            Command::Action { action } => match action {
                ActionCommand::Stop => {
                    client::action(&link, NotificationAction::Stop, keyword, None)?
                }
                ActionCommand::Run { text } => {
                    client::action(&link, NotificationAction::RunCommand, keyword, text)?
                }
            },
            Command::Attach => attach_stdin(link, None)?,
            Command::Status => {
                if !link.is_listening() {
                    println!("stopped (no host listening on {})", link.socket().display());
                    if let Some(alert) = surface::read_last_alert(&paths::status_path(root)) {
                        println!("last alert: {alert}");
                    }
                } else if client::status(link) {
                    println!("running");
                } else {
                    println!("idle (host up, no server running)");
                }
            }
            Command::Config { .. } | Command::Completions { .. } => {
                bail!("not a host command")
            }
        }
        Ok(())
    }

    fn attach_stdin(link: IpcLink, start_with: Option<Vec<String>>) -> Result<()> {
        let monitor = ConnectionMonitor::new(link);
        eprintln!("\x1b[36m[tether]\x1b[0m attached; each line is sent as a command, EOF detaches");
        let forwarded = client::attach(&monitor, start_with, io::stdin().lock())?;
        if forwarded == 0 {
            warn!("detached without sending any commands");
        }
        eprintln!("\x1b[36m[tether]\x1b[0m detached after {forwarded} command(s)");
        Ok(())
    }
}

#[cfg(not(unix))]
mod host {
    use std::path::Path;

    use anyhow::{Result, bail};

    use tether_cli::cli::Command;
    use tether_cli::config::TetherConfig;

    pub fn run(_command: Command, _config: &TetherConfig, _root: &Path) -> Result<()> {
        bail!("the tether host requires Unix domain sockets")
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let is_config_command = matches!(&cli.command, Command::Config { .. });

    let filter = match cli.verbose {
        0 if is_config_command => "tether=warn",
        0 => "tether=info",
        1 => "tether=debug",
        _ => "tether=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let cwd = std::env::current_dir().context("failed to get current directory (was it deleted?)")?;
    let (config, config_path) = TetherConfig::load(&cwd)?;
    let root = paths::project_root(config_path.as_deref(), &cwd);

    if !is_config_command || cli.verbose > 0 {
        match config_path {
            Some(ref p) => info!("loaded config from {}", p.display()),
            None => info!("no .tether/config.toml found, using defaults"),
        }
    }

    match cli.command {
        Command::Config { json } => {
            if json {
                println!("{}", config::render_json(&config, config_path.as_deref())?);
            } else {
                print!("{}", config::render_human(&config, config_path.as_deref()));
            }
        }
        Command::Completions { shell } => tether_cli::shell_completion::print(shell)?,
        command => host::run(command, &config, &root)?,
    }

    Ok(())
}
