//! Dropbox ingest and routing.
//!
//! A dropped file moves through
//! `ARRIVED → UNSTABLE → STABLE → CLASSIFIED → (DECOMPRESSED)? → DEDUPED → LANDED → JOURNALED`,
//! or ends `QUARANTINED` in the invalid-files bin. The router is the only
//! reader of a dropbox; each destination is written by one router instance.

pub mod router;
pub mod rules;

pub use router::{find_side_dir, Router, SweepSummary};
pub use rules::{RoutingRule, RULES};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// What to do when the destination of a file is already occupied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DuplicatePolicy {
    /// Delete the existing destination, then move
    Overwrite,
    /// Move the existing destination into the dupe bin, then move
    OverwriteArchive,
    /// Delete the source; nothing lands
    Remove,
    /// Move the source into the dupe bin; nothing lands
    Archive,
    /// Move as usual
    Ignore,
    /// Land under the next free version
    UpVersion,
}

impl DuplicatePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Overwrite => "OVERWRITE",
            Self::OverwriteArchive => "OVERWRITE_ARCHIVE",
            Self::Remove => "REMOVE",
            Self::Archive => "ARCHIVE",
            Self::Ignore => "IGNORE",
            Self::UpVersion => "UP_VERSION",
        }
    }
}

impl fmt::Display for DuplicatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A duplicate policy's verdict, with the destination it compared against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyDecision {
    pub policy: DuplicatePolicy,
    pub matched: Option<PathBuf>,
}

/// Terminal state of one routed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteState {
    /// Landed at its destination and journaled
    Journaled,
    /// Moved to the invalid-files bin
    Quarantined,
    /// Deleted as a byte-identical duplicate
    Removed,
    /// Moved to the dupe bin
    Archived,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteOutcome {
    /// Policy applied; `None` when no policy was consulted
    pub policy: Option<DuplicatePolicy>,
    pub state: RouteState,
    /// Where the file ended up (landing, dupe bin or invalid bin)
    pub dest: Option<PathBuf>,
}
