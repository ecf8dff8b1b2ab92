//! File metadata catalog for the SDC pipeline.
//!
//! One row per physical file on disk, keyed by `(directory_path, file_name)`.
//! Downstream consumers (bundler, release site, web) query the catalog rather
//! than walking the filesystem.
//!
//! The catalog also stores the move journal, status events, archive results
//! and the mission/ops event timelines, so a single SQLite file can serve as
//! every port the pipeline core needs.

pub mod cursor;
pub mod error;
pub mod events;
pub mod query;
mod schema;
pub mod store;
pub mod types;

pub use cursor::RecordCursor;
pub use error::{CatalogError, Result};
pub use events::EventTimeline;
pub use query::{glob_to_like_pattern, FileQuery, OrderBy, SortKey, DEFAULT_BATCH_SIZE};
pub use store::{Catalog, RecordStream, SqliteCatalog};
pub use types::{
    absolute_version, ArchiveResult, FileKind, FileRecord, GenerationResult, MissionEvent,
    OpsEvent, UpsertOutcome,
};
