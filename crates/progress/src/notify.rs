//! User-visible notices raised by the controller.

use serde::Serialize;
use tracing::{error, info};

/// Severity of a notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NoticeLevel {
    /// An operation went through
    Success,
    /// An operation failed and can be retried
    Error,
}

/// A message meant for the person filling in the form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    /// Severity
    pub level: NoticeLevel,
    /// Human-readable text
    pub message: String,
}

impl Notice {
    /// Success notice.
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Success,
            message: message.into(),
        }
    }

    /// Error notice.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

/// Sink for notices, typically a toast or banner in the UI.
pub trait Notifier: Send + Sync {
    /// Deliver a notice.
    fn notify(&self, notice: &Notice);
}

/// Notifier that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notice: &Notice) {
        match notice.level {
            NoticeLevel::Success => info!(text = %notice.message, "notice"),
            NoticeLevel::Error => error!(text = %notice.message, "notice"),
        }
    }
}
