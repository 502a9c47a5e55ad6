//! Lifecycle notification state machine.
//!
//! ```text
//! RUNNING  { stop, run-command (quick reply) }
//!    │ first accepted shutdown command
//!    ▼
//! STOPPING { }                       (terminal)
//! ```
//!
//! [`Lifecycle::render`] is the only thing that decides what the status
//! surface shows. Surfaces re-render on every transition and whenever an
//! interactive action needs acknowledging.

use serde::Serialize;

use crate::mailbox::ClientMessage;

/// Label shown next to the quick-reply text field.
pub const QUICK_REPLY_LABEL: &str = "Run command";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationState {
    Running,
    Stopping,
}

/// Interactive actions attached to the Running notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationAction {
    /// Stop the server. No input.
    Stop,
    /// Run an arbitrary command typed into the quick-reply field.
    RunCommand,
}

impl NotificationAction {
    pub fn label(self) -> &'static str {
        match self {
            Self::Stop => "Stop",
            Self::RunCommand => QUICK_REPLY_LABEL,
        }
    }

    /// Turn an action firing into the message it submits.
    ///
    /// `reply` is the quick-reply text, ignored for [`Self::Stop`].
    pub fn payload(self, shutdown_keyword: &str, reply: Option<String>) -> ClientMessage {
        match self {
            Self::Stop => ClientMessage::Execute {
                command: shutdown_keyword.to_string(),
            },
            Self::RunCommand => ClientMessage::QuickReply { text: reply },
        }
    }
}

/// What the status surface displays. Pure data; built by [`Lifecycle::render`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationView {
    pub state: NotificationState,
    pub title: &'static str,
    /// Cannot be swiped away by the user.
    pub ongoing: bool,
    pub actions: Vec<NotificationAction>,
    pub quick_reply_label: Option<&'static str>,
    /// Action fired when the user dismisses the notification anyway.
    pub dismiss_action: Option<NotificationAction>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lifecycle {
    state: NotificationState,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    /// A fresh worker lifetime starts Running.
    pub fn new() -> Self {
        Self {
            state: NotificationState::Running,
        }
    }

    pub fn state(&self) -> NotificationState {
        self.state
    }

    pub fn is_stopping(&self) -> bool {
        self.state == NotificationState::Stopping
    }

    /// Move to Stopping. Returns `true` only on the actual transition.
    pub fn begin_stopping(&mut self) -> bool {
        if self.is_stopping() {
            return false;
        }
        self.state = NotificationState::Stopping;
        true
    }

    pub fn render(&self) -> NotificationView {
        match self.state {
            NotificationState::Running => NotificationView {
                state: NotificationState::Running,
                title: "Server running",
                ongoing: true,
                actions: vec![NotificationAction::Stop, NotificationAction::RunCommand],
                quick_reply_label: Some(QUICK_REPLY_LABEL),
                dismiss_action: Some(NotificationAction::Stop),
            },
            NotificationState::Stopping => NotificationView {
                state: NotificationState::Stopping,
                title: "Server stopping",
                ongoing: true,
                actions: vec![],
                quick_reply_label: None,
                dismiss_action: None,
            },
        }
    }
}
