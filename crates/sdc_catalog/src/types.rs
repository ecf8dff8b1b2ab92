//! Record types stored in the catalog.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

// ============================================================================
// File kinds
// ============================================================================

/// Classification of a catalogued file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileKind {
    Science,
    Ancillary,
    Metadata,
    Quicklook,
    Spice,
    L0,
    Kp,
    Label,
    SepAnc,
    Euv,
    Radio,
}

impl FileKind {
    pub const ALL: [FileKind; 11] = [
        FileKind::Science,
        FileKind::Ancillary,
        FileKind::Metadata,
        FileKind::Quicklook,
        FileKind::Spice,
        FileKind::L0,
        FileKind::Kp,
        FileKind::Label,
        FileKind::SepAnc,
        FileKind::Euv,
        FileKind::Radio,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Science => "science",
            Self::Ancillary => "ancillary",
            Self::Metadata => "metadata",
            Self::Quicklook => "quicklook",
            Self::Spice => "spice",
            Self::L0 => "l0",
            Self::Kp => "kp",
            Self::Label => "label",
            Self::SepAnc => "sep-anc",
            Self::Euv => "euv",
            Self::Radio => "radio",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.as_str() == s)
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Total order key for a (version, revision) pair: `v * 1000 + (r or 0)`.
pub fn absolute_version(version: u32, revision: Option<u32>) -> i64 {
    i64::from(version) * 1000 + i64::from(revision.unwrap_or(0))
}

// ============================================================================
// File records
// ============================================================================

/// One catalog row per physical file on disk.
///
/// `(directory_path, file_name)` is unique. `file_root` is the file name with
/// version, revision and extensions removed; rows sharing a `file_root` and
/// `file_extension` form a version family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Row id, `None` until inserted
    pub id: Option<i64>,
    pub kind: FileKind,
    pub instrument: Option<String>,
    pub level: Option<String>,
    pub descriptor: Option<String>,
    pub plan: Option<String>,
    pub orbit: Option<u32>,
    pub mode: Option<String>,
    pub data_type: Option<String>,
    pub file_name: String,
    pub directory_path: String,
    pub file_root: String,
    /// Primary extension without the compression suffix (`cdf` for `x.cdf.gz`)
    pub file_extension: String,
    pub file_size: u64,
    pub timetag: DateTime<Utc>,
    pub version: Option<u32>,
    pub revision: Option<u32>,
    pub absolute_version: Option<i64>,
    pub mod_date: DateTime<Utc>,
    pub released: bool,
}

impl FileRecord {
    /// Full path of the file on disk.
    pub fn path(&self) -> PathBuf {
        Path::new(&self.directory_path).join(&self.file_name)
    }

    /// Set version and revision, keeping `absolute_version` consistent.
    pub fn set_version(&mut self, version: Option<u32>, revision: Option<u32>) {
        self.version = version;
        self.revision = revision;
        self.absolute_version = version.map(|v| absolute_version(v, revision));
    }

    /// Key used by inventory comparisons: `(file_root, (version, revision))`
    /// with the root ASCII-lowercased, ordered like [`SortKey::FileRootFolded`].
    ///
    /// [`SortKey::FileRootFolded`]: crate::SortKey::FileRootFolded
    pub fn family_key(&self) -> (String, (u32, u32)) {
        (
            self.file_root.to_ascii_lowercase(),
            (self.version.unwrap_or(0), self.revision.unwrap_or(0)),
        )
    }
}

/// Result of a catalog upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted(i64),
    Updated(i64),
}

impl UpsertOutcome {
    pub fn id(&self) -> i64 {
        match self {
            Self::Inserted(id) | Self::Updated(id) => *id,
        }
    }
}

// ============================================================================
// Archive results
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GenerationResult {
    Success,
    Failure,
}

impl GenerationResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SUCCESS" => Some(Self::Success),
            "FAILURE" => Some(Self::Failure),
            _ => None,
        }
    }
}

/// Outcome of one archive bundle generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveResult {
    pub id: Option<i64>,
    pub generation_time: DateTime<Utc>,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub command_line: String,
    /// Serialized selector configuration used for the run
    pub configuration_blob: String,
    pub dry_run: bool,
    pub result_directory: String,
    pub bundle_file_name: Option<String>,
    pub manifest_file_name: Option<String>,
    pub checksum_file_name: Option<String>,
    pub result_version: u32,
    pub generation_result: GenerationResult,
    pub pds_status: Option<String>,
    pub notes: String,
}

// ============================================================================
// Mission timelines
// ============================================================================

/// A science/orbit event on the mission timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissionEvent {
    pub id: Option<i64>,
    pub event_type: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub orbit_number: Option<u32>,
    pub description: String,
}

/// A spacecraft operations event (maneuver, safe mode, comm pass, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpsEvent {
    pub id: Option<i64>,
    pub event_type: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub subsystem: Option<String>,
    pub description: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_kind_roundtrip() {
        for kind in FileKind::ALL {
            assert_eq!(FileKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(FileKind::parse("sep-anc"), Some(FileKind::SepAnc));
        assert_eq!(FileKind::parse("bogus"), None);
    }

    #[test]
    fn test_absolute_version_law() {
        assert_eq!(absolute_version(1, Some(3)), 1003);
        assert_eq!(absolute_version(2, None), 2000);
        assert_eq!(absolute_version(0, Some(0)), 0);
        assert!(absolute_version(2, Some(0)) > absolute_version(1, Some(999)));
    }
}
