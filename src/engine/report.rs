//! Error reporting for the engine loop.
//!
//! The engine never lets a recoverable error escape; it hands it to an
//! [`ErrorReporter`] and keeps going.

use crate::error::EngineError;
use std::sync::{Arc, Mutex};

/// Receives errors the engine recovered from (or gave up on).
pub trait ErrorReporter: Send + Sync {
    /// Reports an error from an engine component.
    fn report(&self, component: &str, error: &EngineError);
}

/// Reporter that writes to the log at a level matching the error's severity.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, component: &str, error: &EngineError) {
        if error.is_defect() || error.is_fatal() {
            tracing::error!(component, %error, "engine error");
        } else if matches!(error, EngineError::DuplicateChapter { .. }) {
            tracing::info!(component, %error, "ignored");
        } else {
            tracing::warn!(component, %error, "recovered");
        }
    }
}

/// Reporter that keeps `(component, message)` pairs. Clones share the log.
#[derive(Debug, Clone, Default)]
pub struct CollectingReporter {
    reports: Arc<Mutex<Vec<(String, String)>>>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<(String, String)> {
        self.reports
            .lock()
            .map(|reports| reports.clone())
            .unwrap_or_default()
    }
}

impl ErrorReporter for CollectingReporter {
    fn report(&self, component: &str, error: &EngineError) {
        if let Ok(mut reports) = self.reports.lock() {
            reports.push((component.to_string(), error.to_string()));
        }
    }
}
