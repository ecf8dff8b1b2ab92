//! The routing rule table.
//!
//! Rules are tried in order; the first whose pattern matches a file name
//! routes it. Each rule is plain data: a pattern plus destination, rename,
//! copy-target and duplicate-policy functions.

use super::{DuplicatePolicy, PolicyDecision};
use crate::error::Result;
use crate::fsops;
use crate::naming::{compose_name, iuvs_collection, kernel_kind, patterns, NameFields, NamePattern};
use once_cell::sync::Lazy;
use std::path::{Path, PathBuf};

/// Where a rule sends a file: `base` must already exist, `dynamic` (relative
/// to `base`) is created on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub base: PathBuf,
    pub dynamic: Option<PathBuf>,
}

impl Destination {
    pub fn dir(&self) -> PathBuf {
        match &self.dynamic {
            Some(dynamic) => self.base.join(dynamic),
            None => self.base.clone(),
        }
    }
}

pub type DestinationFn = fn(&Path, &NameFields) -> Option<Destination>;
pub type RenameFn = fn(&NameFields, &str) -> Option<String>;
pub type CopyTargetFn = fn(&Path, &NameFields) -> Option<PathBuf>;
pub type DuplicatePolicyFn = fn(&Path, &Path, DuplicatePolicy) -> Result<PolicyDecision>;

pub struct RoutingRule {
    pub name: &'static str,
    pub pattern: &'static Lazy<NamePattern>,
    pub destination: DestinationFn,
    pub rename: Option<RenameFn>,
    pub copy_target: Option<CopyTargetFn>,
    pub duplicate_policy: Option<DuplicatePolicyFn>,
    /// Disposition for a destination holding different bytes
    pub on_conflict: DuplicatePolicy,
    pub decompress_before_move: bool,
}

impl RoutingRule {
    pub fn matches(&self, name: &str) -> bool {
        self.pattern.matches(name)
    }
}

/// First rule matching `name`.
pub fn find_rule<'a>(rules: &'a [RoutingRule], name: &str) -> Option<&'a RoutingRule> {
    rules.iter().find(|rule| rule.matches(name))
}

// ============================================================================
// Duplicate policies
// ============================================================================

/// Free destination → IGNORE; identical bytes → REMOVE; otherwise the
/// rule's conflict disposition.
pub fn standard_policy(src: &Path, dest: &Path, on_conflict: DuplicatePolicy) -> Result<PolicyDecision> {
    if !dest.exists() {
        return Ok(PolicyDecision {
            policy: DuplicatePolicy::Ignore,
            matched: None,
        });
    }
    let policy = if fsops::files_are_same(src, dest)? {
        DuplicatePolicy::Remove
    } else {
        on_conflict
    };
    Ok(PolicyDecision {
        policy,
        matched: Some(dest.to_path_buf()),
    })
}

// ============================================================================
// Destinations
// ============================================================================

fn year_month(fields: &NameFields) -> Option<PathBuf> {
    let t = fields.timetag?;
    Some(PathBuf::from(t.format("%Y").to_string()).join(t.format("%m").to_string()))
}

fn science_destination(root: &Path, fields: &NameFields) -> Option<Destination> {
    let inst = fields.instrument.as_deref()?;
    if inst == "iuv" {
        return iuvs_destination(root, fields);
    }
    Some(Destination {
        base: root.join(inst),
        dynamic: Some(PathBuf::from(fields.level.as_deref()?).join(year_month(fields)?)),
    })
}

fn iuvs_destination(root: &Path, fields: &NameFields) -> Option<Destination> {
    let collection = iuvs_collection(fields.descriptor.as_deref()?);
    Some(Destination {
        base: root.join("iuv"),
        dynamic: Some(
            PathBuf::from(fields.level.as_deref()?)
                .join(collection)
                .join(year_month(fields)?),
        ),
    })
}

fn kp_destination(root: &Path, fields: &NameFields) -> Option<Destination> {
    Some(Destination {
        base: root.join("kp"),
        dynamic: Some(PathBuf::from(fields.plan.as_deref()?).join(year_month(fields)?)),
    })
}

fn l0_destination(root: &Path, fields: &NameFields) -> Option<Destination> {
    Some(Destination {
        base: root.join(fields.instrument.as_deref()?),
        dynamic: Some(PathBuf::from("l0").join(year_month(fields)?)),
    })
}

fn quicklook_destination(root: &Path, fields: &NameFields) -> Option<Destination> {
    Some(Destination {
        base: root.join(fields.instrument.as_deref()?),
        dynamic: Some(PathBuf::from("ql").join(year_month(fields)?)),
    })
}

fn sep_anc_destination(root: &Path, fields: &NameFields) -> Option<Destination> {
    Some(Destination {
        base: root.join("sep"),
        dynamic: Some(PathBuf::from("anc").join(year_month(fields)?)),
    })
}

fn radio_destination(root: &Path, fields: &NameFields) -> Option<Destination> {
    Some(Destination {
        base: root.join("anc").join("rse"),
        dynamic: Some(PathBuf::from(fields.level.as_deref()?)),
    })
}

fn metadata_destination(root: &Path, fields: &NameFields) -> Option<Destination> {
    Some(Destination {
        base: root.join(fields.instrument.as_deref()?).join("metadata"),
        dynamic: None,
    })
}

fn ancillary_destination(root: &Path, fields: &NameFields) -> Option<Destination> {
    let year = fields.timetag?.format("%Y").to_string();
    Some(Destination {
        base: root.join("anc"),
        dynamic: Some(PathBuf::from(fields.plan.as_deref()?).join(year)),
    })
}

fn spice_destination(root: &Path, fields: &NameFields) -> Option<Destination> {
    Some(Destination {
        base: root.join("anc").join("spice"),
        dynamic: Some(PathBuf::from(kernel_kind(&fields.extension)?)),
    })
}

// ============================================================================
// Renames and copy targets
// ============================================================================

/// Level 0 files always land versioned; unversioned drops become `_v001`.
/// The landed name is uncompressed since the rule decompresses first.
fn l0_rename(fields: &NameFields, name: &str) -> Option<String> {
    if fields.version.is_some() && !fields.compressed {
        return Some(name.to_string());
    }
    let mut versioned = fields.clone();
    versioned.version = Some(versioned.version.unwrap_or(1));
    versioned.compressed = false;
    compose_name(&versioned)
}

fn quicklook_copy_target(root: &Path, fields: &NameFields) -> Option<PathBuf> {
    Some(root.join("ql").join("latest").join(fields.instrument.as_deref()?))
}

// ============================================================================
// Table
// ============================================================================

static IUVS: Lazy<NamePattern> = Lazy::new(|| {
    patterns::SCIENCE
        .clone()
        .refine("inst", "^iuv$")
        .expect("built-in refinement pattern must compile")
});

/// Routing rules, in match order.
pub static RULES: Lazy<Vec<RoutingRule>> = Lazy::new(|| {
    vec![
        RoutingRule {
            name: "label",
            pattern: &patterns::LABEL,
            destination: science_destination,
            rename: None,
            copy_target: None,
            duplicate_policy: Some(standard_policy),
            on_conflict: DuplicatePolicy::OverwriteArchive,
            decompress_before_move: false,
        },
        RoutingRule {
            name: "kp",
            pattern: &patterns::KP,
            destination: kp_destination,
            rename: None,
            copy_target: None,
            duplicate_policy: Some(standard_policy),
            on_conflict: DuplicatePolicy::OverwriteArchive,
            decompress_before_move: false,
        },
        RoutingRule {
            name: "l0",
            pattern: &patterns::L0,
            destination: l0_destination,
            rename: Some(l0_rename),
            copy_target: None,
            duplicate_policy: Some(standard_policy),
            on_conflict: DuplicatePolicy::UpVersion,
            decompress_before_move: true,
        },
        RoutingRule {
            name: "quicklook",
            pattern: &patterns::QUICKLOOK,
            destination: quicklook_destination,
            rename: None,
            copy_target: Some(quicklook_copy_target),
            duplicate_policy: Some(standard_policy),
            on_conflict: DuplicatePolicy::Overwrite,
            decompress_before_move: false,
        },
        RoutingRule {
            name: "sep_anc",
            pattern: &patterns::SEP_ANC,
            destination: sep_anc_destination,
            rename: None,
            copy_target: None,
            duplicate_policy: Some(standard_policy),
            on_conflict: DuplicatePolicy::Archive,
            decompress_before_move: false,
        },
        RoutingRule {
            name: "euv",
            pattern: &patterns::EUV,
            destination: science_destination,
            rename: None,
            copy_target: None,
            duplicate_policy: Some(standard_policy),
            on_conflict: DuplicatePolicy::OverwriteArchive,
            decompress_before_move: false,
        },
        RoutingRule {
            name: "radio",
            pattern: &patterns::RADIO,
            destination: radio_destination,
            rename: None,
            copy_target: None,
            duplicate_policy: Some(standard_policy),
            on_conflict: DuplicatePolicy::Archive,
            decompress_before_move: false,
        },
        RoutingRule {
            name: "metadata",
            pattern: &patterns::METADATA,
            destination: metadata_destination,
            rename: None,
            copy_target: None,
            duplicate_policy: Some(standard_policy),
            on_conflict: DuplicatePolicy::Archive,
            decompress_before_move: false,
        },
        RoutingRule {
            name: "iuvs",
            pattern: &IUVS,
            destination: iuvs_destination,
            rename: None,
            copy_target: None,
            duplicate_policy: Some(standard_policy),
            on_conflict: DuplicatePolicy::OverwriteArchive,
            decompress_before_move: false,
        },
        RoutingRule {
            name: "science",
            pattern: &patterns::SCIENCE,
            destination: science_destination,
            rename: None,
            copy_target: None,
            duplicate_policy: Some(standard_policy),
            on_conflict: DuplicatePolicy::OverwriteArchive,
            decompress_before_move: false,
        },
        RoutingRule {
            name: "ancillary",
            pattern: &patterns::ANCILLARY,
            destination: ancillary_destination,
            rename: None,
            copy_target: None,
            duplicate_policy: Some(standard_policy),
            on_conflict: DuplicatePolicy::Archive,
            decompress_before_move: false,
        },
        RoutingRule {
            name: "spice",
            pattern: &patterns::SPICE,
            destination: spice_destination,
            rename: None,
            copy_target: None,
            duplicate_policy: Some(standard_policy),
            on_conflict: DuplicatePolicy::Archive,
            decompress_before_move: false,
        },
    ]
});
