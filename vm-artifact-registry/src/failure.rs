//! Reporting of failures that are handled but must not go unnoticed.
//!
//! Mirror errors, internal storage faults and rollback problems are reported to a
//! [`FailureSink`] with their full context, while callers only see a generic error.

use std::sync::Mutex;
use tracing::error;

pub trait FailureSink: Send + Sync {
    /// `context` names the operation and path, `message` describes what went wrong.
    fn report(&self, context: &str, message: &str);
}

/// Sink that logs through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingFailureSink;

impl FailureSink for TracingFailureSink {
    fn report(&self, context: &str, message: &str) {
        error!(context = %context, "{message}");
    }
}

/// Sink that keeps every report in memory.
#[derive(Debug, Default)]
pub struct RecordingFailureSink {
    reports: Mutex<Vec<(String, String)>>,
}

impl RecordingFailureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<(String, String)> {
        match self.reports.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.reports().is_empty()
    }
}

impl FailureSink for RecordingFailureSink {
    fn report(&self, context: &str, message: &str) {
        let entry = (context.to_string(), message.to_string());
        match self.reports.lock() {
            Ok(mut guard) => guard.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
    }
}
