//! User-facing notifications.
//!
//! The editor integration implements [`Notifier`] to show popups; the CLI and
//! tests use [`LogNotifier`] or their own recorder.

use async_trait::async_trait;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

/// A follow-up the user can pick from a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserAction {
    RestartServer,
    ReloadIde,
}

impl UserAction {
    pub fn label(&self) -> &'static str {
        match self {
            UserAction::RestartServer => "Restart Server",
            UserAction::ReloadIde => "Reload Now",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
    pub action: Option<UserAction>,
}

impl Notification {
    pub fn info(message: impl Into<String>) -> Self {
        Self::new(NotificationLevel::Info, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(NotificationLevel::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(NotificationLevel::Error, message)
    }

    fn new(level: NotificationLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            action: None,
        }
    }

    pub fn with_action(mut self, action: UserAction) -> Self {
        self.action = Some(action);
        self
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.action {
            Some(action) => write!(f, "{} [{}]", self.message, action.label()),
            None => f.write_str(&self.message),
        }
    }
}

/// Milestones of a toolchain update, for integrations that track them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    UpdateStarted,
    UpdateFinished,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);

    /// Show a notification and wait for the user's choice, if any.
    async fn prompt(&self, notification: Notification) -> Option<UserAction> {
        self.notify(notification);
        None
    }

    fn event(&self, _event: LifecycleEvent) {}
}

/// Writes notifications to the log and never answers prompts.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn notify(&self, notification: Notification) {
        match notification.level {
            NotificationLevel::Info => tracing::info!("{}", notification),
            NotificationLevel::Warning => tracing::warn!("{}", notification),
            NotificationLevel::Error => tracing::error!("{}", notification),
        }
    }

    fn event(&self, event: LifecycleEvent) {
        tracing::debug!("lifecycle event: {:?}", event);
    }
}
