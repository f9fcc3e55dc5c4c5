use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};

/// One user-facing log line
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LogEntry {
    pub message: String,
    pub displayed: bool,
}

/// Ordered log shared between the trading core and the UI
///
/// The core appends; the UI drains entries it has not shown yet.
#[derive(Debug, Clone, Default)]
pub struct ActivityLog {
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl ActivityLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message (also emitted through tracing at debug level)
    pub fn push(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!("{}", message);
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(LogEntry {
                message,
                displayed: false,
            });
    }

    /// Return messages not yet displayed and mark them displayed
    pub fn drain_new(&self) -> Vec<String> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .iter_mut()
            .filter(|e| !e.displayed)
            .map(|e| {
                e.displayed = true;
                e.message.clone()
            })
            .collect()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
