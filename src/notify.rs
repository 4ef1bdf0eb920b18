//! Notification and accessibility sinks.
//!
//! Both are fire-and-forget: the core never waits on or checks delivery.

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
  Success,
  Error,
  Loading,
}

/// User-facing toast message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
  pub level: NotificationLevel,
  pub message: String,
}

impl Notification {
  pub fn success(message: impl Into<String>) -> Self {
    Self {
      level: NotificationLevel::Success,
      message: message.into(),
    }
  }

  pub fn error(message: impl Into<String>) -> Self {
    Self {
      level: NotificationLevel::Error,
      message: message.into(),
    }
  }

  pub fn loading(message: impl Into<String>) -> Self {
    Self {
      level: NotificationLevel::Loading,
      message: message.into(),
    }
  }
}

/// Sink for success/error/loading messages
pub trait Notifier: Send + Sync {
  fn notify(&self, notification: Notification);
}

/// Assistive-technology live region
pub trait Announcer: Send + Sync {
  fn announce(&self, message: &str);
}

/// Writes notifications and announcements to the log only.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
  fn notify(&self, notification: Notification) {
    match notification.level {
      NotificationLevel::Success => info!(text = %notification.message, "notification"),
      NotificationLevel::Error => warn!(text = %notification.message, "notification"),
      NotificationLevel::Loading => debug!(text = %notification.message, "notification"),
    }
  }
}

impl Announcer for TracingNotifier {
  fn announce(&self, message: &str) {
    info!(target: "boardsync::a11y", text = message, "announcement");
  }
}

/// Messages forwarded to the UI thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiMessage {
  Notification(Notification),
  Announcement(String),
}

/// Forwards notifications and announcements over an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  tx: mpsc::UnboundedSender<UiMessage>,
}

impl ChannelNotifier {
  pub fn new() -> (Self, mpsc::UnboundedReceiver<UiMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Self { tx }, rx)
  }
}

impl Notifier for ChannelNotifier {
  fn notify(&self, notification: Notification) {
    // Ignore send errors - the UI may already be gone
    let _ = self.tx.send(UiMessage::Notification(notification));
  }
}

impl Announcer for ChannelNotifier {
  fn announce(&self, message: &str) {
    let _ = self.tx.send(UiMessage::Announcement(message.to_string()));
  }
}
