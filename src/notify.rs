use chrono::{DateTime, Local};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const TOAST_CAPACITY: usize = 5;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum NotificationKind {
    Error,
    Success,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub message: String,
}

impl Notification {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: NotificationKind::Error,
            message: message.into(),
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self {
            kind: NotificationKind::Success,
            message: message.into(),
        }
    }
}

/// Fire-and-forget outlet for user-visible outcomes.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification);
}

#[derive(Debug, Clone)]
pub struct Toast {
    pub notification: Notification,
    pub raised_at: DateTime<Local>,
    expires_at: Instant,
}

/// Bounded toast queue shown in the footer; oldest toasts fall off first.
#[derive(Debug)]
pub struct Toasts {
    entries: Mutex<VecDeque<Toast>>,
    ttl: Duration,
}

impl Toasts {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            ttl,
        }
    }

    pub fn active(&self) -> Vec<Toast> {
        self.entries
            .lock()
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn latest(&self) -> Option<Toast> {
        self.entries
            .lock()
            .ok()
            .and_then(|entries| entries.back().cloned())
    }

    /// Drops expired toasts; returns whether anything changed.
    pub fn prune(&self, now: Instant) -> bool {
        let Ok(mut entries) = self.entries.lock() else {
            return false;
        };
        let before = entries.len();
        entries.retain(|toast| toast.expires_at > now);
        entries.len() != before
    }

    pub fn dismiss_all(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }
}

impl NotificationSink for Toasts {
    fn notify(&self, notification: Notification) {
        match notification.kind {
            NotificationKind::Error => warn!(message = %notification.message, "notify"),
            NotificationKind::Success => info!(message = %notification.message, "notify"),
        }
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        entries.push_back(Toast {
            notification,
            raised_at: Local::now(),
            expires_at: Instant::now() + self.ttl,
        });
        while entries.len() > TOAST_CAPACITY {
            entries.pop_front();
        }
    }
}
