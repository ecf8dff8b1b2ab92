//! Move journal and status sink ports.
//!
//! The pipeline core records two kinds of facts for humans and auditors:
//!
//! - **Move journal**: one entry per physical file landing in its canonical
//!   location (`when_moved`, `src`, `dest`, `md5`, `size`). Append-only and
//!   durable before the landing is reported.
//! - **Status events**: operational events (`START`, `STATUS`, `PROGRESS`,
//!   `FAIL`) tagged with the component that produced them. Best-effort; a
//!   sink that cannot record an event logs the failure and moves on.
//!
//! Implementations in this crate:
//!
//! | Type | Journal | Status |
//! |---|---|---|
//! | [`JsonlMoveJournal`] / [`JsonlStatusSink`] | NDJSON file, fsync per entry | NDJSON file |
//! | [`MemoryJournal`] / [`MemoryStatusSink`] | in-process `Vec` | in-process `Vec` |
//! | [`TracingStatusSink`] | - | `tracing` events |
//! | [`FanoutStatusSink`] | - | forwards to several sinks |

mod ndjson;
mod sinks;

pub use ndjson::{read_move_journal, read_status_log, JsonlMoveJournal, JsonlStatusSink};
pub use sinks::{FanoutStatusSink, MemoryJournal, MemoryStatusSink, TracingStatusSink};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Current schema version for NDJSON envelopes.
pub const SCHEMA_VERSION: u32 = 1;

/// Errors that can occur while writing or reading journals.
#[derive(Error, Debug)]
pub enum JournalError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to acquire lock")]
    LockError,

    #[error("Journal backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, JournalError>;

/// One physical move of a file into its canonical destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveJournalEntry {
    pub when_moved: DateTime<Utc>,
    pub src: PathBuf,
    pub dest: PathBuf,
    /// Lowercase hex MD5 of the landed file.
    pub md5: String,
    pub size: u64,
}

/// Status event classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StatusEventId {
    Start,
    Status,
    Progress,
    Fail,
}

impl StatusEventId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "START",
            Self::Status => "STATUS",
            Self::Progress => "PROGRESS",
            Self::Fail => "FAIL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "START" => Some(Self::Start),
            "STATUS" => Some(Self::Status),
            "PROGRESS" => Some(Self::Progress),
            "FAIL" => Some(Self::Fail),
            _ => None,
        }
    }
}

impl fmt::Display for StatusEventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An operational event for humans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub at: DateTime<Utc>,
    pub component: String,
    pub event_id: StatusEventId,
    pub summary: String,
    pub description: String,
}

impl StatusEvent {
    pub fn new(
        component: impl Into<String>,
        event_id: StatusEventId,
        summary: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            at: Utc::now(),
            component: component.into(),
            event_id,
            summary: summary.into(),
            description: description.into(),
        }
    }
}

/// Records each physical move for audit.
///
/// `append` must not return before the entry is durable: callers report the
/// file as landed only after it succeeds.
pub trait MoveJournal: Send + Sync {
    fn append(&self, entry: &MoveJournalEntry) -> Result<()>;
}

/// Records operational events.
///
/// Implementations are best-effort and must not propagate failures to the
/// caller; a failed write is logged and dropped.
pub trait StatusSink: Send + Sync {
    fn record(&self, component: &str, event_id: StatusEventId, summary: &str, description: &str);
}

impl<T: MoveJournal + ?Sized> MoveJournal for std::sync::Arc<T> {
    fn append(&self, entry: &MoveJournalEntry) -> Result<()> {
        (**self).append(entry)
    }
}

impl<T: StatusSink + ?Sized> StatusSink for std::sync::Arc<T> {
    fn record(&self, component: &str, event_id: StatusEventId, summary: &str, description: &str) {
        (**self).record(component, event_id, summary, description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_event_id_roundtrip() {
        for id in [
            StatusEventId::Start,
            StatusEventId::Status,
            StatusEventId::Progress,
            StatusEventId::Fail,
        ] {
            assert_eq!(StatusEventId::parse(id.as_str()), Some(id));
            let json = serde_json::to_string(&id).unwrap();
            assert_eq!(json, format!("\"{}\"", id.as_str()));
        }
        assert_eq!(StatusEventId::parse("start"), None);
    }
}
