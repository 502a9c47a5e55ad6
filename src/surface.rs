//! Status surfaces: where the lifecycle notification and user-visible
//! alerts are rendered.
//!
//! A surface is a pure renderer: it shows whatever view it is handed and
//! keeps no lifecycle state of its own. Rendering is best effort; a surface
//! that cannot draw logs at debug level and carries on.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::debug;

use crate::notification::{NotificationState, NotificationView};

pub trait StatusSurface: Send {
    /// Show (or replace) the persistent notification.
    fn post(&mut self, view: &NotificationView);

    /// Raise a transient, user-visible notice.
    fn alert(&mut self, message: &str);

    /// Remove the persistent notification.
    fn withdraw(&mut self) {}
}

/// Coloured status lines on stderr.
#[derive(Debug, Default)]
pub struct ConsoleSurface;

impl StatusSurface for ConsoleSurface {
    fn post(&mut self, view: &NotificationView) {
        let actions = if view.actions.is_empty() {
            String::new()
        } else {
            let labels: Vec<_> = view.actions.iter().map(|a| a.label()).collect();
            format!(" [{}]", labels.join(" | "))
        };
        let colour = match view.state {
            NotificationState::Running => "36",
            NotificationState::Stopping => "33",
        };
        eprintln!("\x1b[{colour}m[tether]\x1b[0m {}{actions}", view.title);
    }

    fn alert(&mut self, message: &str) {
        eprintln!("\x1b[31m[tether]\x1b[0m {message}");
    }
}

#[derive(Debug, Serialize)]
struct StatusSnapshot<'a> {
    run_id: &'a str,
    updated_at: String,
    notification: Option<&'a NotificationView>,
    last_alert: Option<&'a str>,
}

/// JSON snapshot of the current notification, rewritten on every change.
///
/// Clients that are not bound (a shell prompt, a status bar script) read
/// this file instead of asking the host.
pub struct StatusFileSurface {
    path: PathBuf,
    run_id: String,
    view: Option<NotificationView>,
    last_alert: Option<String>,
}

impl StatusFileSurface {
    pub fn new(path: &Path, run_id: &str) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create status directory: {}", parent.display())
            })?;
        }
        Ok(Self {
            path: path.to_path_buf(),
            run_id: run_id.to_string(),
            view: None,
            last_alert: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<()> {
        let snapshot = StatusSnapshot {
            run_id: &self.run_id,
            updated_at: chrono::Utc::now().to_rfc3339(),
            notification: self.view.as_ref(),
            last_alert: self.last_alert.as_deref(),
        };
        let json =
            serde_json::to_string_pretty(&snapshot).context("failed to serialize status")?;

        let tmp = self.path.with_extension("json.tmp");
        let mut file = std::fs::File::create(&tmp)
            .with_context(|| format!("failed to create {}", tmp.display()))?;
        writeln!(file, "{json}").context("failed to write status")?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }

    fn flush_or_log(&self) {
        if let Err(e) = self.flush() {
            debug!(error = %e, path = %self.path.display(), "status file update failed");
        }
    }
}

/// The alert left behind in a status file, if any.
///
/// A host that died on an abnormal exit leaves only this behind.
pub fn read_last_alert(path: &Path) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    let json: serde_json::Value = serde_json::from_str(&content).ok()?;
    json.get("last_alert")?.as_str().map(str::to_string)
}

impl StatusSurface for StatusFileSurface {
    fn post(&mut self, view: &NotificationView) {
        self.view = Some(view.clone());
        self.flush_or_log();
    }

    fn alert(&mut self, message: &str) {
        self.last_alert = Some(message.to_string());
        self.flush_or_log();
    }

    /// Clears the notification. A raised alert outlives it, so the file is
    /// only removed when there is nothing left to report.
    fn withdraw(&mut self) {
        self.view = None;
        if self.last_alert.is_some() {
            self.flush_or_log();
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            debug!(error = %e, path = %self.path.display(), "status file removal failed");
        }
    }
}

/// Fan-out to several surfaces.
#[derive(Default)]
pub struct Surfaces {
    inner: Vec<Box<dyn StatusSurface>>,
}

impl Surfaces {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, surface: impl StatusSurface + 'static) -> Self {
        self.inner.push(Box::new(surface));
        self
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl StatusSurface for Surfaces {
    fn post(&mut self, view: &NotificationView) {
        for s in &mut self.inner {
            s.post(view);
        }
    }

    fn alert(&mut self, message: &str) {
        for s in &mut self.inner {
            s.alert(message);
        }
    }

    fn withdraw(&mut self) {
        for s in &mut self.inner {
            s.withdraw();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::Lifecycle;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Counting(Arc<Mutex<(usize, usize, usize)>>);

    impl StatusSurface for Counting {
        fn post(&mut self, _view: &NotificationView) {
            self.0.lock().unwrap().0 += 1;
        }
        fn alert(&mut self, _message: &str) {
            self.0.lock().unwrap().1 += 1;
        }
        fn withdraw(&mut self) {
            self.0.lock().unwrap().2 += 1;
        }
    }

    #[test]
    fn status_file_tracks_current_view() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(".tether").join("status.json");
        let mut surface = StatusFileSurface::new(&path, "run-1").unwrap();

        let mut lifecycle = Lifecycle::new();
        surface.post(&lifecycle.render());
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["run_id"], "run-1");
        assert_eq!(json["notification"]["state"], "running");
        assert!(json["last_alert"].is_null());

        lifecycle.begin_stopping();
        surface.post(&lifecycle.render());
        surface.alert("Server exited with code 3");
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["notification"]["state"], "stopping");
        assert_eq!(json["notification"]["actions"].as_array().unwrap().len(), 0);
        assert_eq!(json["last_alert"], "Server exited with code 3");
    }

    #[test]
    fn status_file_removed_on_withdraw() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("status.json");
        let mut surface = StatusFileSurface::new(&path, "run-2").unwrap();
        surface.post(&Lifecycle::new().render());
        assert!(path.is_file());

        surface.withdraw();
        assert!(!path.exists());
        // Withdrawing twice is harmless.
        surface.withdraw();
    }

    #[test]
    fn alert_survives_withdraw() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("status.json");
        let mut surface = StatusFileSurface::new(&path, "run-3").unwrap();
        surface.post(&Lifecycle::new().render());
        surface.alert("Server exited with code 3");
        surface.withdraw();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(json["notification"].is_null());
        assert_eq!(json["last_alert"], "Server exited with code 3");
        assert_eq!(json["run_id"], "run-3");
        assert_eq!(
            read_last_alert(&path).as_deref(),
            Some("Server exited with code 3")
        );
    }

    #[test]
    fn last_alert_absent_without_file_or_alert() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("status.json");
        assert_eq!(read_last_alert(&path), None);

        let mut surface = StatusFileSurface::new(&path, "run-4").unwrap();
        surface.post(&Lifecycle::new().render());
        assert_eq!(read_last_alert(&path), None);
    }

    #[test]
    fn fan_out_reaches_every_surface() {
        let a = Counting::default();
        let b = Counting::default();
        let mut surfaces = Surfaces::new().with(a.clone()).with(b.clone());
        assert_eq!(surfaces.len(), 2);

        surfaces.post(&Lifecycle::new().render());
        surfaces.alert("hello");
        surfaces.withdraw();

        assert_eq!(*a.0.lock().unwrap(), (1, 1, 1));
        assert_eq!(*b.0.lock().unwrap(), (1, 1, 1));
    }
}
