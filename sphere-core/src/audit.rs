//! Audit trail
//!
//! Every pipeline step records what it did into an [`AuditRecorder`]. The
//! recorder is the only shared mutable state of a run: runners append to it
//! concurrently, and it stamps each entry while holding its lock so that the
//! list order is the order in which things actually happened.

use chrono::{DateTime, SubsecRound, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{error, info, warn};

/// Step names used across the pipeline
pub mod step {
    pub const ANALYSIS_STARTED: &str = "ANALYSIS_STARTED";
    pub const LLM_PROVIDER: &str = "LLM_PROVIDER";
    pub const PERSONA_LOADED: &str = "PERSONA_LOADED";
    pub const AGENT_START: &str = "AGENT_START";
    pub const AGENT_COMPLETE: &str = "AGENT_COMPLETE";
    pub const AGENT_FAILED: &str = "AGENT_FAILED";
    pub const AGENT_TIMEOUT: &str = "AGENT_TIMEOUT";
    pub const SYNTHESIS_START: &str = "SYNTHESIS_START";
    pub const SYNTHESIS_COMPLETE: &str = "SYNTHESIS_COMPLETE";
    pub const SYNTHESIS_FALLBACK: &str = "SYNTHESIS_FALLBACK";
    pub const ANALYSIS_COMPLETE: &str = "ANALYSIS_COMPLETE";
    pub const ANALYSIS_CANCELLED: &str = "ANALYSIS_CANCELLED";
    pub const ERROR: &str = "ERROR";
}

/// Severity of an audit entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warn,
    Error,
}

impl Severity {
    pub fn label(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INFO" => Ok(Severity::Info),
            "WARN" => Ok(Severity::Warn),
            "ERROR" => Ok(Severity::Error),
            other => Err(format!("unknown severity '{}'", other)),
        }
    }
}

/// An event waiting to be stamped by the recorder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEvent {
    pub step: String,
    pub message: String,
    pub severity: Severity,
}

impl AuditEvent {
    pub fn new(severity: Severity, step: &str, message: impl Into<String>) -> Self {
        Self {
            step: step.to_string(),
            message: message.into(),
            severity,
        }
    }
}

/// One timestamped record of a pipeline step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// UTC occurrence time, microsecond precision
    pub timestamp: DateTime<Utc>,
    pub step: String,
    pub message: String,
    pub severity: Severity,
}

/// Append-only, lock-serialized audit log for one run
#[derive(Debug, Default)]
pub struct AuditRecorder {
    entries: Mutex<Vec<AuditEntry>>,
}

impl AuditRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp and append an event, returning the stored entry.
    ///
    /// The timestamp is taken under the lock and never goes backwards, even
    /// if the wall clock does.
    pub fn append(&self, event: AuditEvent) -> AuditEntry {
        let mut entries = self.entries.lock();

        let now = Utc::now().trunc_subsecs(6);
        let timestamp = match entries.last() {
            Some(last) if last.timestamp > now => last.timestamp,
            _ => now,
        };

        let entry = AuditEntry {
            timestamp,
            step: event.step,
            message: event.message,
            severity: event.severity,
        };

        match entry.severity {
            Severity::Info => info!(step = %entry.step, "{}", entry.message),
            Severity::Warn => warn!(step = %entry.step, "{}", entry.message),
            Severity::Error => error!(step = %entry.step, "{}", entry.message),
        }

        entries.push(entry.clone());
        entry
    }

    pub fn info(&self, step: &str, message: impl Into<String>) -> AuditEntry {
        self.append(AuditEvent::new(Severity::Info, step, message))
    }

    pub fn warn(&self, step: &str, message: impl Into<String>) -> AuditEntry {
        self.append(AuditEvent::new(Severity::Warn, step, message))
    }

    pub fn error(&self, step: &str, message: impl Into<String>) -> AuditEntry {
        self.append(AuditEvent::new(Severity::Error, step, message))
    }

    /// Snapshot of all entries in occurrence order
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
