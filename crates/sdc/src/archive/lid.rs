//! PDS logical identifiers.

use super::config::{CompiledLidRule, LidParts, LidRule};
use crate::error::{Result, SdcError};
use sdc_catalog::FileRecord;

pub const LID_PREFIX: &str = "urn:nasa:pds";

/// `urn:nasa:pds:<bundle>:<collection>:<product>`
pub fn lid(parts: &LidParts) -> String {
    format!(
        "{}:{}:{}:{}",
        LID_PREFIX, parts.bundle_id, parts.collection_id, parts.product_id
    )
}

/// `urn:nasa:pds:<bundle>:<collection>:<product>::<major>.<minor>`
pub fn lidvid(parts: &LidParts, major: u32, minor: u32) -> String {
    format!("{}::{}.{}", lid(parts), major, minor)
}

/// Compiled LID templates for one instrument, tried in order.
#[derive(Debug, Clone, Default)]
pub struct LidTable {
    rules: Vec<CompiledLidRule>,
}

impl LidTable {
    pub fn new(rules: &[LidRule]) -> Result<Self> {
        let rules = rules
            .iter()
            .map(|rule| {
                rule.compile().map_err(|e| {
                    SdcError::Config(format!("LID pattern '{}': {}", rule.file_pattern, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// LIDVID for a cataloged file; the record's version and revision become
    /// the major and minor parts.
    pub fn lidvid_for(&self, record: &FileRecord) -> Option<String> {
        let parts = self
            .rules
            .iter()
            .find_map(|rule| rule.parts(&record.file_name, &record.file_root))?;
        Some(lidvid(
            &parts,
            record.version.unwrap_or(1),
            record.revision.unwrap_or(0),
        ))
    }
}
