//! Per-instrument archive selection and LID template configuration.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

fn default_true() -> bool {
    true
}

/// Selector parameters for one instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentArchiveConfig {
    pub instrument: String,

    #[serde(default)]
    pub levels: Vec<String>,

    #[serde(default)]
    pub plans: Vec<String>,

    /// Level 0 groupings; matched against the descriptor column
    #[serde(default)]
    pub groupings: Vec<String>,

    #[serde(default)]
    pub descriptors: Vec<String>,

    /// Data file extensions; labels are selected separately
    #[serde(default)]
    pub extensions: Vec<String>,

    /// Shell-style file name filter, e.g. `mvn_swe_l2_svy*`
    #[serde(default)]
    pub file_name_glob: Option<String>,

    #[serde(default)]
    pub version: Option<u32>,

    #[serde(default)]
    pub revision: Option<u32>,

    /// Only the latest version of each family
    #[serde(default = "default_true")]
    pub latest: bool,

    /// Gate the selection on an external inventory
    #[serde(default)]
    pub use_inventory: bool,

    #[serde(default)]
    pub inventory_path: Option<PathBuf>,

    /// Inventory revisions are one behind the files being delivered
    #[serde(default)]
    pub uprev_inventory: bool,

    #[serde(default)]
    pub label_version: Option<u32>,

    #[serde(default)]
    pub label_revision: Option<u32>,

    /// Labels for this instrument carry no version; they pair as `v1 r0`
    #[serde(default)]
    pub unversioned_labels: bool,

    #[serde(default = "default_true")]
    pub include_labels: bool,
}

impl InstrumentArchiveConfig {
    pub fn new(instrument: impl Into<String>) -> Self {
        Self {
            instrument: instrument.into(),
            levels: Vec::new(),
            plans: Vec::new(),
            groupings: Vec::new(),
            descriptors: Vec::new(),
            extensions: Vec::new(),
            file_name_glob: None,
            version: None,
            revision: None,
            latest: true,
            use_inventory: false,
            inventory_path: None,
            uprev_inventory: false,
            label_version: None,
            label_revision: None,
            unversioned_labels: false,
            include_labels: true,
        }
    }
}

/// Maps file names to LID components.
///
/// `bundle_id`, `collection_id` and `product_id` may reference named captures
/// of `file_pattern` as `$name` or `${name}`. Without a `product_id` the
/// product is the file's family root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LidRule {
    pub file_pattern: String,
    pub bundle_id: String,
    pub collection_id: String,
    #[serde(default)]
    pub product_id: Option<String>,
}

impl LidRule {
    pub fn compile(&self) -> Result<CompiledLidRule, regex::Error> {
        Ok(CompiledLidRule {
            regex: Regex::new(&self.file_pattern)?,
            rule: self.clone(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct CompiledLidRule {
    regex: Regex,
    rule: LidRule,
}

/// LID components produced by a matching rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LidParts {
    pub bundle_id: String,
    pub collection_id: String,
    pub product_id: String,
}

impl CompiledLidRule {
    /// Components for `file_name`, or `None` when the pattern does not match.
    pub fn parts(&self, file_name: &str, file_root: &str) -> Option<LidParts> {
        let caps = self.regex.captures(file_name)?;
        let expand = |template: &str| {
            let mut out = String::new();
            caps.expand(template, &mut out);
            out.to_lowercase()
        };
        Some(LidParts {
            bundle_id: expand(&self.rule.bundle_id),
            collection_id: expand(&self.rule.collection_id),
            product_id: match &self.rule.product_id {
                Some(template) => expand(template),
                None => file_root.to_lowercase(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instrument_defaults_from_toml() {
        let config: InstrumentArchiveConfig = toml::from_str(r#"instrument = "swe""#).unwrap();
        assert_eq!(config, InstrumentArchiveConfig::new("swe"));
        assert!(config.latest);
        assert!(config.include_labels);
    }

    #[test]
    fn test_lid_rule_expands_captures() {
        let rule = LidRule {
            file_pattern: r"^mvn_swe_(?P<level>l[0-9])_(?P<desc>[a-z0-9]+)_".to_string(),
            bundle_id: "maven.swea.calibrated".to_string(),
            collection_id: "data.${desc}".to_string(),
            product_id: None,
        }
        .compile()
        .unwrap();

        let parts = rule
            .parts("mvn_swe_l2_svy3d_20140320_v01_r03.cdf", "mvn_swe_l2_svy3d_20140320")
            .unwrap();
        assert_eq!(parts.collection_id, "data.svy3d");
        assert_eq!(parts.product_id, "mvn_swe_l2_svy3d_20140320");
        assert!(rule.parts("mvn_mag_l2_x_20140320_v01_r01.sts", "x").is_none());
    }

    #[test]
    fn test_bad_pattern_fails_compile() {
        let rule = LidRule {
            file_pattern: "(".to_string(),
            bundle_id: String::new(),
            collection_id: String::new(),
            product_id: None,
        };
        assert!(rule.compile().is_err());
    }
}
