use std::path::{Path, PathBuf};

pub const TETHER_DIR: &str = ".tether";
pub const SOCKET_FILENAME: &str = "tether.sock";
pub const LOG_DIRNAME: &str = "logs";
pub const STATUS_FILENAME: &str = "status.json";
pub const SERVICE_LOG_FILENAME: &str = "service.log";

/// Resolve the project root for a run.
///
/// When a config file was found at `<root>/.tether/config.toml` the root is
/// the directory holding `.tether/`, so commands behave the same from any
/// subdirectory. Without one, `cwd` is the root.
pub fn project_root(config_path: Option<&Path>, cwd: &Path) -> PathBuf {
    config_path
        .and_then(Path::parent)
        .filter(|dir| dir.file_name().is_some_and(|name| name == TETHER_DIR))
        .and_then(Path::parent)
        .map(Path::to_path_buf)
        .unwrap_or_else(|| cwd.to_path_buf())
}

pub fn status_path(root: &Path) -> PathBuf {
    root.join(TETHER_DIR).join(STATUS_FILENAME)
}

/// Where a detached host's stdout and stderr go.
pub fn service_log_path(log_dir: &Path) -> PathBuf {
    log_dir.join(SERVICE_LOG_FILENAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_parent_of_tether_dir() {
        let root = project_root(
            Some(Path::new("/srv/game/.tether/config.toml")),
            Path::new("/srv/game/maps/deep"),
        );
        assert_eq!(root, PathBuf::from("/srv/game"));
    }

    #[test]
    fn falls_back_to_cwd_without_config() {
        let root = project_root(None, Path::new("/srv/game/maps"));
        assert_eq!(root, PathBuf::from("/srv/game/maps"));
    }

    #[test]
    fn ignores_config_outside_tether_dir() {
        let root = project_root(
            Some(Path::new("/srv/other/config.toml")),
            Path::new("/srv/game"),
        );
        assert_eq!(root, PathBuf::from("/srv/game"));
    }

    #[test]
    fn status_and_service_log_locations() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(
            status_path(tmp.path()),
            tmp.path().join(".tether").join("status.json")
        );
        assert_eq!(
            service_log_path(&tmp.path().join("logs")),
            tmp.path().join("logs").join("service.log")
        );
    }
}
