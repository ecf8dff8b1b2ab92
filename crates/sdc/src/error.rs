//! Error types for the pipeline core

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Pipeline error type
#[derive(Error, Debug)]
pub enum SdcError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Catalog error: {0}")]
    Catalog(#[from] sdc_catalog::CatalogError),

    #[error("Journal error: {0}")]
    Journal(#[from] sdc_journal::JournalError),

    #[error("Walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Pattern error: {0}")]
    Pattern(String),

    #[error("Destination root does not exist: {}", .0.display())]
    MissingDestinationRoot(PathBuf),

    #[error("No routing destination for {}", .0.display())]
    NoDestination(PathBuf),

    #[error("Unknown instrument: {0}")]
    UnknownInstrument(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Could not move {} back after {cause}: {rollback}", .dest.display())]
    RollbackFailed {
        dest: PathBuf,
        cause: Box<SdcError>,
        rollback: Box<SdcError>,
    },
}

impl From<regex::Error> for SdcError {
    fn from(err: regex::Error) -> Self {
        Self::Pattern(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, SdcError>;

/// A failure tied to one file; recorded, never fatal to the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFailure {
    pub path: PathBuf,
    pub message: String,
}

impl FileFailure {
    pub fn new(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        Self {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

/// Run `op`, retrying once if the first attempt fails.
///
/// Used for catalog calls issued on behalf of a single file; the caller
/// reports a second failure and skips the file.
pub fn retry_once<T, E, F>(what: &str, mut op: F) -> std::result::Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> std::result::Result<T, E>,
{
    match op() {
        Ok(value) => Ok(value),
        Err(err) => {
            tracing::warn!(error = %err, "{} failed, retrying once", what);
            op()
        }
    }
}
