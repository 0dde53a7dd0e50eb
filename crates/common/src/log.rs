//! Structured per-test log trail

use serde::{Deserialize, Serialize};

/// Severity of a [`TestLog`] entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Info,
    Error,
    Debug,
}

/// A single timestamped log entry. Entries are never edited once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestLog {
    #[serde(rename = "type")]
    pub kind: LogKind,
    pub message: String,
    pub timestamp: String,
}

impl TestLog {
    pub fn new(kind: LogKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Append-only collector of [`TestLog`] entries.
///
/// Every entry is mirrored to `tracing` at the matching level so a run can
/// be followed from the process log as well as from the returned trail.
#[derive(Debug, Clone, Default)]
pub struct TestLogger {
    entries: Vec<TestLog>,
}

impl TestLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn info(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("{}", message);
        self.entries.push(TestLog::new(LogKind::Info, message));
    }

    pub fn error(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!("{}", message);
        self.entries.push(TestLog::new(LogKind::Error, message));
    }

    pub fn debug(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!("{}", message);
        self.entries.push(TestLog::new(LogKind::Debug, message));
    }

    /// Append entries produced elsewhere, keeping their order
    pub fn extend(&mut self, logs: impl IntoIterator<Item = TestLog>) {
        self.entries.extend(logs);
    }

    pub fn entries(&self) -> &[TestLog] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<TestLog> {
        self.entries
    }
}
