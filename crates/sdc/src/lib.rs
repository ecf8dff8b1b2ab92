//! MAVEN SDC file pipeline.
//!
//! Files dropped by upstream producers are classified by name, moved into
//! the canonical data tree, journaled and cataloged. The catalog is then
//! used to assemble PDS archive bundles.
//!
//! - [`naming`]: file name grammar, classification and composition
//! - [`dropbox`]: the router that drains staging directories
//! - [`indexer`]: catalog reconciliation by sweep or by file events
//! - [`archive`]: selection, LID assignment and bundle writing

pub mod archive;
pub mod cancel;
pub mod config;
pub mod dropbox;
pub mod error;
pub mod fsops;
pub mod indexer;
pub mod naming;

pub use cancel::CancelToken;
pub use config::{ArchiveConfig, IndexerConfig, PipelineConfig, PortsConfig, RouterConfig};
pub use dropbox::{DuplicatePolicy, RouteOutcome, RouteState, Router, SweepSummary};
pub use error::{FileFailure, Result, SdcError};
pub use indexer::{EventIndexer, IndexEvent, Indexer, ReindexReport};
pub use naming::{classify, compose_name, Classification, NameFields};
