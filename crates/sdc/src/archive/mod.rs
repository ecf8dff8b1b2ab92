//! PDS archive bundling.
//!
//! A run selects one instrument's files for a time window from the catalog
//! (optionally gated by an external inventory), assigns each a LIDVID from
//! the instrument's templates, and writes a gzip tarball with a transfer
//! manifest and an MD5 checksum manifest. Every run is recorded as an
//! [`sdc_catalog::ArchiveResult`].

pub mod bundle;
pub mod config;
pub mod events_csv;
pub mod inventory;
pub mod lid;
pub mod runner;
pub mod selector;

pub use bundle::{next_version, ArtifactNames, BundleOutput, BundlePlan, BundleWriter};
pub use config::{InstrumentArchiveConfig, LidParts, LidRule};
pub use events_csv::write_event_csvs;
pub use inventory::{load_inventory, parse_inventory, InventoryEntry};
pub use lid::{lid, lidvid, LidTable};
pub use runner::{ArchiveRequest, ArchiveRunner, BundleRun};
pub use selector::{select, CatalogGenerator, InventoryGenerator, Selection};
