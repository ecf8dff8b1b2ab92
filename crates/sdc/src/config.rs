//! Configuration for the pipeline

use crate::archive::config::{InstrumentArchiveConfig, LidRule};
use crate::dropbox::DuplicatePolicy;
use crate::error::{Result, SdcError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration, built once at start-up and passed by reference.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub router: RouterConfig,

    #[serde(default)]
    pub indexer: IndexerConfig,

    #[serde(default)]
    pub archive: ArchiveConfig,

    #[serde(default)]
    pub ports: PortsConfig,
}

/// Dropbox router settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Root of the canonical data tree
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,

    /// Staging directories swept by `route_all`
    #[serde(default)]
    pub dropbox_roots: Vec<PathBuf>,

    /// Files younger than this are left for the next pass
    #[serde(default = "default_age_limit")]
    pub age_limit_seconds: u64,

    #[serde(default = "default_invalid_dir_name")]
    pub invalid_dir_name: String,

    #[serde(default = "default_dupe_dir_name")]
    pub dupe_dir_name: String,

    /// How many ancestors of a dropbox root are searched for the
    /// invalid/dupe directories
    #[serde(default = "default_side_dir_search_depth")]
    pub side_dir_search_depth: usize,

    /// Rule name → disposition for a destination holding different bytes
    #[serde(default)]
    pub conflict_overrides: BTreeMap<String, DuplicatePolicy>,
}

/// Catalog indexer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    #[serde(default)]
    pub sweep_roots: Vec<PathBuf>,

    /// Capacity of the bounded event queue
    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,
}

/// Archive bundler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Bundles land in `<output_root>/<instrument>/`
    #[serde(default = "default_archive_root")]
    pub output_root: PathBuf,

    #[serde(default)]
    pub instrument_config: BTreeMap<String, InstrumentArchiveConfig>,

    #[serde(default)]
    pub instrument_lid_templates: BTreeMap<String, Vec<LidRule>>,

    #[serde(default = "default_all_key")]
    pub all_key: String,

    #[serde(default = "default_ancillary_key")]
    pub ancillary_key: String,

    #[serde(default = "default_event_key")]
    pub event_key: String,

    /// Keep files without a LID in the bundle (they are still reported)
    #[serde(default = "default_true")]
    pub bundle_without_lid: bool,

    /// Flag bundled files as released after a successful run
    #[serde(default)]
    pub mark_released: bool,
}

/// Where the ports write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortsConfig {
    #[serde(default = "default_catalog_dsn")]
    pub catalog_dsn: String,

    /// NDJSON status log; status events also go to the catalog and tracing
    #[serde(default)]
    pub status_log: Option<PathBuf>,

    /// NDJSON move journal; the catalog journal table is used when unset
    #[serde(default)]
    pub move_journal: Option<PathBuf>,
}

fn default_data_root() -> PathBuf {
    PathBuf::from("/maven/data/sci")
}

fn default_age_limit() -> u64 {
    300
}

fn default_invalid_dir_name() -> String {
    "misnamed_files".to_string()
}

fn default_dupe_dir_name() -> String {
    "dupes".to_string()
}

fn default_side_dir_search_depth() -> usize {
    3
}

fn default_event_queue_capacity() -> usize {
    1024
}

fn default_archive_root() -> PathBuf {
    PathBuf::from("/maven/data/arc")
}

fn default_all_key() -> String {
    "all".to_string()
}

fn default_ancillary_key() -> String {
    "anc".to_string()
}

fn default_event_key() -> String {
    "events".to_string()
}

fn default_true() -> bool {
    true
}

fn default_catalog_dsn() -> String {
    format!(
        "sqlite:{}",
        sdc_logging::sdc_home().join("catalog.sqlite3").display()
    )
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            data_root: default_data_root(),
            dropbox_roots: Vec::new(),
            age_limit_seconds: default_age_limit(),
            invalid_dir_name: default_invalid_dir_name(),
            dupe_dir_name: default_dupe_dir_name(),
            side_dir_search_depth: default_side_dir_search_depth(),
            conflict_overrides: BTreeMap::new(),
        }
    }
}

impl RouterConfig {
    pub fn age_limit(&self) -> Duration {
        Duration::from_secs(self.age_limit_seconds)
    }
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            sweep_roots: Vec::new(),
            event_queue_capacity: default_event_queue_capacity(),
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            output_root: default_archive_root(),
            instrument_config: BTreeMap::new(),
            instrument_lid_templates: BTreeMap::new(),
            all_key: default_all_key(),
            ancillary_key: default_ancillary_key(),
            event_key: default_event_key(),
            bundle_without_lid: true,
            mark_released: false,
        }
    }
}

impl Default for PortsConfig {
    fn default() -> Self {
        Self {
            catalog_dsn: default_catalog_dsn(),
            status_log: None,
            move_journal: None,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: PipelineConfig =
            toml::from_str(&content).map_err(|e| SdcError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| SdcError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject settings no run could succeed with.
    pub fn validate(&self) -> Result<()> {
        if self.router.invalid_dir_name.is_empty() || self.router.dupe_dir_name.is_empty() {
            return Err(SdcError::Config(
                "router.invalid_dir_name and router.dupe_dir_name must be set".to_string(),
            ));
        }
        if self.router.invalid_dir_name.contains('/') || self.router.dupe_dir_name.contains('/') {
            return Err(SdcError::Config(
                "router side directory names must be plain names".to_string(),
            ));
        }
        if self.indexer.event_queue_capacity == 0 {
            return Err(SdcError::Config(
                "indexer.event_queue_capacity must be positive".to_string(),
            ));
        }
        for rule in self.router.conflict_overrides.keys() {
            if !crate::dropbox::rules::RULES.iter().any(|r| r.name == rule) {
                return Err(SdcError::Config(format!(
                    "conflict override for unknown rule '{}'",
                    rule
                )));
            }
        }
        for (name, rules) in &self.archive.instrument_lid_templates {
            for rule in rules {
                rule.compile().map_err(|e| {
                    SdcError::Config(format!("LID template for '{}': {}", name, e))
                })?;
            }
        }
        Ok(())
    }
}
