//! Audit trail of lifecycle events.
//!
//! Sinks are fire-and-forget: they never return errors and never block the
//! caller on anything slower than a local append.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

/// Kinds of audited events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum AuditKind {
    Create,
    CreateFailed,
    Destroy,
    Start,
    Stop,
    Reset,
    Reconfigure,
    GcRemove,
    Restart,
}

/// Receives audit events.
pub(crate) trait AuditSink: Send + Sync {
    fn log_event(&self, kind: AuditKind, name: &str, detail: &str);
}

#[derive(Debug, Serialize)]
struct AuditLine<'a> {
    ts: DateTime<Utc>,
    kind: AuditKind,
    name: &'a str,
    detail: &'a str,
}

/// Appends one JSON object per event to `<state>/audit.jsonl`.
#[derive(Debug)]
pub(crate) struct JsonlAuditSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlAuditSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn append(&self, line: &AuditLine<'_>) -> std::io::Result<()> {
        let mut json = serde_json::to_string(line)?;
        json.push('\n');
        let _guard = self.lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(json.as_bytes())
    }
}

impl AuditSink for JsonlAuditSink {
    fn log_event(&self, kind: AuditKind, name: &str, detail: &str) {
        let line = AuditLine {
            ts: Utc::now(),
            kind,
            name,
            detail,
        };
        if let Err(e) = self.append(&line) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to write audit event");
        }
    }
}

/// Emits audit events as tracing events and keeps them in memory.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct TracingAuditSink {
    events: Mutex<Vec<(AuditKind, String)>>,
}

#[cfg(test)]
impl TracingAuditSink {
    /// Events seen so far, oldest first.
    pub fn events(&self) -> Vec<(AuditKind, String)> {
        self.events.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl AuditSink for TracingAuditSink {
    fn log_event(&self, kind: AuditKind, name: &str, detail: &str) {
        tracing::info!(event = "audit", ?kind, sandbox = %name, detail = %detail);
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push((kind, name.to_string()));
    }
}
