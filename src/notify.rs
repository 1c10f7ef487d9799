//! One-line user-visible notifications.
//!
//! Connection outcomes, fatal hardware errors and captions reach the user
//! through a [`Notifier`]. Everything else stays in the developer log.

use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Success,
    Info,
    Error,
    /// A recognised utterance from the caption sidecar.
    Caption,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
}

/// Sink for user-visible notifications.
pub trait Notifier: Send + Sync {
    fn notify(&self, level: NotificationLevel, message: &str);

    fn success(&self, message: &str) {
        self.notify(NotificationLevel::Success, message);
    }

    fn info(&self, message: &str) {
        self.notify(NotificationLevel::Info, message);
    }

    fn error(&self, message: &str) {
        self.notify(NotificationLevel::Error, message);
    }

    fn caption(&self, text: &str) {
        self.notify(NotificationLevel::Caption, text);
    }
}

/// Writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, level: NotificationLevel, message: &str) {
        match level {
            NotificationLevel::Success => tracing::info!(target: "eva_voice::notify", "✓ {}", message),
            NotificationLevel::Info => tracing::info!(target: "eva_voice::notify", "{}", message),
            NotificationLevel::Error => tracing::error!(target: "eva_voice::notify", "{}", message),
            NotificationLevel::Caption => {
                tracing::info!(target: "eva_voice::notify", "Você: {}", message)
            }
        }
    }
}

/// Collects notifications in memory.
#[derive(Debug, Clone, Default)]
pub struct CollectingNotifier {
    items: Arc<Mutex<Vec<Notification>>>,
}

impl CollectingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<Notification> {
        self.items.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn of_level(&self, level: NotificationLevel) -> Vec<String> {
        self.all()
            .into_iter()
            .filter(|n| n.level == level)
            .map(|n| n.message)
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut items) = self.items.lock() {
            items.clear();
        }
    }
}

impl Notifier for CollectingNotifier {
    fn notify(&self, level: NotificationLevel, message: &str) {
        if let Ok(mut items) = self.items.lock() {
            items.push(Notification {
                level,
                message: message.to_string(),
            });
        }
    }
}
