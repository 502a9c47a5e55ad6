use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::paths;
use crate::supervisor::{DEFAULT_SHUTDOWN_KEYWORD, SupervisorSettings};

const CONFIG_FILENAME: &str = "config.toml";

fn default_program() -> String {
    "server".to_string()
}

fn default_work_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_keyword() -> String {
    DEFAULT_SHUTDOWN_KEYWORD.to_string()
}

fn default_timeout_millis() -> u64 {
    2500
}

fn default_socket() -> PathBuf {
    Path::new(paths::TETHER_DIR).join(paths::SOCKET_FILENAME)
}

fn default_status_file() -> bool {
    true
}

fn default_log_dir() -> PathBuf {
    Path::new(paths::TETHER_DIR).join(paths::LOG_DIRNAME)
}

/// The server executable and how it is launched.
///
/// ```toml
/// [server]
/// program = "./bin/server"
/// work_dir = "data"
/// args = ["--port", "8303"]
/// ```
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_program")]
    pub program: String,
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    /// Used when `tether start` is given no arguments.
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            work_dir: default_work_dir(),
            args: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ShutdownConfig {
    #[serde(default = "default_keyword")]
    pub keyword: String,
    #[serde(default = "default_timeout_millis")]
    pub timeout_millis: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            keyword: default_keyword(),
            timeout_millis: default_timeout_millis(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_socket")]
    pub socket: PathBuf,
    #[serde(default = "default_status_file")]
    pub status_file: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            socket: default_socket(),
            status_file: default_status_file(),
            log_dir: default_log_dir(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct TetherConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
    #[serde(default)]
    pub service: ServiceConfig,
}

impl TetherConfig {
    /// Search upward from `start` for a `.tether/config.toml` file and load it.
    /// Returns the default config if no file is found.
    pub fn load(start: &Path) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = Self::find_config_file(start) {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let config: TetherConfig = toml::from_str(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            Ok((config, Some(path)))
        } else {
            Ok((TetherConfig::default(), None))
        }
    }

    fn find_config_file(start: &Path) -> Option<PathBuf> {
        let mut dir = start.to_path_buf();
        loop {
            let candidate = dir.join(paths::TETHER_DIR).join(CONFIG_FILENAME);
            if candidate.is_file() {
                return Some(candidate);
            }
            if !dir.pop() {
                return None;
            }
        }
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown.timeout_millis)
    }

    /// Supervisor settings with relative paths anchored at `root`.
    pub fn supervisor_settings(&self, root: &Path) -> SupervisorSettings {
        SupervisorSettings {
            work_dir: root.join(&self.server.work_dir),
            shutdown_keyword: self.shutdown.keyword.clone(),
            stop_timeout: self.stop_timeout(),
        }
    }

    pub fn socket_path(&self, root: &Path) -> PathBuf {
        root.join(&self.service.socket)
    }

    pub fn log_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.service.log_dir)
    }

    /// A bare program name is looked up on `PATH`; anything with a separator
    /// is taken relative to `root`.
    pub fn program_path(&self, root: &Path) -> PathBuf {
        let program = Path::new(&self.server.program);
        if program.components().count() > 1 {
            root.join(program)
        } else {
            program.to_path_buf()
        }
    }
}

fn config_source_label(config_path: Option<&Path>) -> String {
    config_path
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(defaults: no .tether/config.toml found)".to_string())
}

fn push_kv(output: &mut String, key: &str, value: impl std::fmt::Display) {
    output.push_str(&format!("  {key:<20} {value}\n"));
}

/// Human-readable `tether config` output.
pub fn render_human(config: &TetherConfig, config_path: Option<&Path>) -> String {
    let mut output = String::new();
    output.push_str("Server\n");
    push_kv(&mut output, "program", &config.server.program);
    push_kv(&mut output, "work_dir", config.server.work_dir.display());
    if config.server.args.is_empty() {
        push_kv(&mut output, "args", "(none)");
    } else {
        push_kv(&mut output, "args", config.server.args.join(", "));
    }
    output.push('\n');

    output.push_str("Shutdown\n");
    push_kv(&mut output, "keyword", &config.shutdown.keyword);
    push_kv(
        &mut output,
        "timeout",
        format!("{}ms", config.shutdown.timeout_millis),
    );
    output.push('\n');

    output.push_str("Service\n");
    push_kv(&mut output, "socket", config.service.socket.display());
    push_kv(&mut output, "status_file", config.service.status_file);
    push_kv(&mut output, "log_dir", config.service.log_dir.display());
    output.push('\n');

    output.push_str("Source Path\n");
    push_kv(&mut output, "path", config_source_label(config_path));

    output
}

/// `tether config --json` output.
pub fn render_json(config: &TetherConfig, config_path: Option<&Path>) -> Result<String> {
    let payload = serde_json::json!({
        "server": {
            "program": &config.server.program,
            "work_dir": config.server.work_dir.display().to_string(),
            "args": &config.server.args
        },
        "shutdown": {
            "keyword": &config.shutdown.keyword,
            "timeout_millis": config.shutdown.timeout_millis
        },
        "service": {
            "socket": config.service.socket.display().to_string(),
            "status_file": config.service.status_file,
            "log_dir": config.service.log_dir.display().to_string()
        },
        "source_path": config_source_label(config_path)
    });

    serde_json::to_string_pretty(&payload).context("failed to serialize config to JSON")
}
