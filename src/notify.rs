//! Transient, dismissible operator notifications.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

/// How long a notification stays visible.
pub const DEFAULT_NOTIFICATION_TTL: Duration = Duration::from_secs(5);

/// Label of the dismiss action.
pub const DISMISS_ACTION: &str = "Dismiss";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub message: String,
    pub action: &'static str,
    pub raised_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl Notification {
    pub fn new(message: impl Into<String>, ttl: Duration) -> Self {
        Self {
            message: message.into(),
            action: DISMISS_ACTION,
            raised_at: Utc::now(),
            ttl,
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.raised_at + chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::zero())
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }
}

/// Sink for notifications raised by the lifecycle controller.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

impl Notifier for mpsc::UnboundedSender<Notification> {
    fn notify(&self, notification: Notification) {
        // A closed receiver means nobody is watching any more.
        let _ = self.send(notification);
    }
}

impl<T: Notifier + ?Sized> Notifier for Arc<T> {
    fn notify(&self, notification: Notification) {
        (**self).notify(notification)
    }
}

/// Notifications currently on screen. Each one drops off once its TTL has
/// passed or when it is dismissed.
#[derive(Debug, Default)]
pub struct NotificationBoard {
    shown: Mutex<Vec<Notification>>,
}

impl NotificationBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifications still visible at `now`, oldest first. Expired ones are
    /// removed.
    pub fn active(&self, now: DateTime<Utc>) -> Vec<Notification> {
        let mut shown = self.shown.lock().unwrap_or_else(|p| p.into_inner());
        shown.retain(|n| !n.is_expired(now));
        shown.clone()
    }

    /// Dismiss everything on the board.
    pub fn dismiss_all(&self) {
        self.shown.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }
}

impl Notifier for NotificationBoard {
    fn notify(&self, notification: Notification) {
        self.shown
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(notification);
    }
}
