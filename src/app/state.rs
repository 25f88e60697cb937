use std::time::{Duration, Instant};

use docbatch::notify::{Notification, Severity};

/// A notification on screen, with its deadline if it auto-dismisses.
#[derive(Debug, Clone)]
pub struct Toast {
    pub severity: Severity,
    pub message: String,
    expires_at: Option<Instant>,
}

#[derive(Debug, Default)]
pub struct UiState {
    pub toasts: Vec<Toast>,
    pub show_details: bool,
    pub error_message: Option<String>,
}

impl UiState {
    pub fn push(&mut self, notification: Notification, now: Instant) {
        self.toasts.push(Toast {
            severity: notification.severity,
            message: notification.message,
            expires_at: notification.auto_dismiss.map(|d| now + d),
        });
    }

    /// Drops expired toasts. Returns how long until the next one expires.
    pub fn expire(&mut self, now: Instant) -> Option<Duration> {
        self.toasts.retain(|t| t.expires_at.map_or(true, |at| at > now));
        self.toasts
            .iter()
            .filter_map(|t| t.expires_at)
            .min()
            .map(|at| at.saturating_duration_since(now))
    }

    pub fn dismiss(&mut self, index: usize) {
        if index < self.toasts.len() {
            self.toasts.remove(index);
        }
    }

    pub fn clear(&mut self) {
        self.toasts.clear();
        self.error_message = None;
    }
}
