//! Catalog indexer.
//!
//! Two ways to keep the catalog honest: a full sweep that reconciles disk
//! with the catalog ([`Indexer::reindex`]), and an event worker that applies
//! per-file notifications as they arrive ([`EventIndexer`]).

pub mod events;
pub mod sweep;

pub use events::{apply, EventIndexer, EventOutcome, IndexEvent};
pub use sweep::{Indexer, ReindexReport};
