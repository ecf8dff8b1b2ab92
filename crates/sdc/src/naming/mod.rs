//! Filename classification.
//!
//! A pure function from a file name to its kind and parsed fields. The
//! registry is an ordered list of `(kind, pattern, builder)` entries; the
//! first entry whose pattern (and refinements) match wins. Names nothing
//! matches are not errors: callers route them to the invalid-files bin.

pub mod patterns;

pub use patterns::{
    extract, match_names, to_clock, to_number, to_text, FieldValue, NamePattern, Transform,
};

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Timelike, Utc};
use once_cell::sync::Lazy;
use regex::Captures;
use sdc_catalog::{absolute_version, FileKind, FileRecord};

/// Fields parsed from a file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameFields {
    pub kind: FileKind,
    pub instrument: Option<String>,
    pub level: Option<String>,
    pub descriptor: Option<String>,
    pub plan: Option<String>,
    pub orbit: Option<u32>,
    pub mode: Option<String>,
    pub data_type: Option<String>,
    /// Content time; `None` for undated names
    pub timetag: Option<DateTime<Utc>>,
    /// End of the covered span, for names that carry one
    pub end_timetag: Option<DateTime<Utc>>,
    pub version: Option<u32>,
    pub revision: Option<u32>,
    /// Primary extension, without the compression suffix
    pub extension: String,
    pub compressed: bool,
}

impl NameFields {
    fn new(kind: FileKind, extension: &str) -> Self {
        Self {
            kind,
            instrument: None,
            level: None,
            descriptor: None,
            plan: None,
            orbit: None,
            mode: None,
            data_type: None,
            timetag: None,
            end_timetag: None,
            version: None,
            revision: None,
            extension: extension.to_string(),
            compressed: false,
        }
    }
}

/// A classified name: its fields plus the family root (name minus
/// version, revision and extensions).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub fields: NameFields,
    pub file_root: String,
}

type Builder = fn(&Captures<'_>) -> Option<NameFields>;

struct Classifier {
    kind: FileKind,
    pattern: &'static Lazy<NamePattern>,
    build: Builder,
}

/// Registration order is match priority.
static REGISTRY: Lazy<Vec<Classifier>> = Lazy::new(|| {
    vec![
        Classifier { kind: FileKind::Label, pattern: &patterns::LABEL, build: build_label },
        Classifier { kind: FileKind::Kp, pattern: &patterns::KP, build: build_kp },
        Classifier { kind: FileKind::L0, pattern: &patterns::L0, build: build_l0 },
        Classifier { kind: FileKind::Quicklook, pattern: &patterns::QUICKLOOK, build: build_quicklook },
        Classifier { kind: FileKind::SepAnc, pattern: &patterns::SEP_ANC, build: build_science },
        Classifier { kind: FileKind::Euv, pattern: &patterns::EUV, build: build_science },
        Classifier { kind: FileKind::Radio, pattern: &patterns::RADIO, build: build_science },
        Classifier { kind: FileKind::Metadata, pattern: &patterns::METADATA, build: build_metadata },
        Classifier { kind: FileKind::Science, pattern: &patterns::SCIENCE, build: build_science },
        Classifier { kind: FileKind::Ancillary, pattern: &patterns::ANCILLARY, build: build_ancillary },
        Classifier { kind: FileKind::Spice, pattern: &patterns::SPICE, build: build_spice },
    ]
});

/// Classify a bare file name. Returns `None` when no registered pattern
/// matches or a matched date is not a real calendar date.
pub fn classify(name: &str) -> Option<Classification> {
    REGISTRY.iter().find_map(|entry| {
        let caps = entry.pattern.captures(name)?;
        let mut fields = (entry.build)(&caps)?;
        fields.kind = entry.kind;
        let file_root = caps.name("root")?.as_str().to_string();
        Some(Classification { fields, file_root })
    })
}

/// Pattern registered for `kind`.
pub fn pattern_for(kind: FileKind) -> Option<&'static NamePattern> {
    REGISTRY
        .iter()
        .find(|entry| entry.kind == kind)
        .map(|entry| &**entry.pattern)
}

// ============================================================================
// Builders
// ============================================================================

fn text(caps: &Captures<'_>, group: &str) -> Option<String> {
    caps.name(group)
        .map(|m| m.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn number(caps: &Captures<'_>, group: &str) -> Option<u32> {
    caps.name(group).and_then(|m| to_number(m.as_str()).as_number())
}

/// Date group plus optional `time` group. `Err` when present but invalid.
fn date_time(caps: &Captures<'_>) -> Result<Option<DateTime<Utc>>, ()> {
    let Some(date) = caps.name("date") else {
        return Ok(None);
    };
    let (h, m, s) = match caps.name("time").map(|t| to_clock(t.as_str())) {
        None => (0, 0, 0),
        Some(FieldValue::Clock(h, m, s)) => (h, m, s),
        Some(_) => return Err(()),
    };
    parse_yyyymmdd(date.as_str())
        .and_then(|d| d.and_hms_opt(h, m, s))
        .map(|naive| Some(Utc.from_utc_datetime(&naive)))
        .ok_or(())
}

pub(crate) fn parse_yyyymmdd(raw: &str) -> Option<NaiveDate> {
    if raw.len() != 8 {
        return None;
    }
    let year = raw[0..4].parse().ok()?;
    let month = raw[4..6].parse().ok()?;
    let day = raw[6..8].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

fn year_doy(yy: &str, doy: &str) -> Option<DateTime<Utc>> {
    let year = 2000 + yy.parse::<i32>().ok()?;
    let ordinal = doy.parse::<u32>().ok()?;
    let date = NaiveDate::from_yo_opt(year, ordinal)?;
    Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
}

fn extension(caps: &Captures<'_>) -> Option<String> {
    text(caps, "ext")
}

fn build_science(caps: &Captures<'_>) -> Option<NameFields> {
    let mut fields = NameFields::new(FileKind::Science, &extension(caps)?);
    fields.instrument = text(caps, "inst");
    fields.level = text(caps, "level");
    fields.descriptor = text(caps, "desc");
    fields.timetag = date_time(caps).ok()?;
    fields.version = number(caps, "version");
    fields.revision = number(caps, "revision");
    fields.compressed = caps.name("gz").is_some();
    if fields.instrument.as_deref() == Some("iuv") {
        apply_iuvs_descriptor(&mut fields);
    }
    Some(fields)
}

/// IUVS descriptors encode `<collection>[-orbitNNNNN][-<channel>]`.
fn apply_iuvs_descriptor(fields: &mut NameFields) {
    let Some(desc) = fields.descriptor.as_deref() else {
        return;
    };
    for part in desc.split('-') {
        if let Some(orbit) = part.strip_prefix("orbit") {
            if let Ok(orbit) = orbit.parse() {
                fields.orbit = Some(orbit);
            }
        } else if matches!(part, "muv" | "fuv" | "ech") {
            fields.mode = Some(part.to_string());
        }
    }
}

/// Collection of an IUVS descriptor: the text before the first `-`.
pub fn iuvs_collection(descriptor: &str) -> &str {
    descriptor.split('-').next().unwrap_or(descriptor)
}

fn build_label(caps: &Captures<'_>) -> Option<NameFields> {
    let mut fields = build_science(caps)?;
    fields.kind = FileKind::Label;
    Some(fields)
}

fn build_kp(caps: &Captures<'_>) -> Option<NameFields> {
    let mut fields = NameFields::new(FileKind::Kp, &extension(caps)?);
    fields.instrument = Some("kp".to_string());
    fields.level = Some("kp".to_string());
    fields.plan = text(caps, "plan");
    fields.descriptor = text(caps, "desc");
    fields.timetag = date_time(caps).ok()?;
    fields.version = number(caps, "version");
    fields.revision = number(caps, "revision");
    fields.compressed = caps.name("gz").is_some();
    Some(fields)
}

fn build_l0(caps: &Captures<'_>) -> Option<NameFields> {
    let mut fields = NameFields::new(FileKind::L0, &extension(caps)?);
    fields.instrument = text(caps, "inst");
    fields.level = Some("l0".to_string());
    fields.descriptor = text(caps, "grouping");
    fields.timetag = date_time(caps).ok()?;
    fields.version = number(caps, "version");
    fields.compressed = caps.name("gz").is_some();
    Some(fields)
}

fn build_quicklook(caps: &Captures<'_>) -> Option<NameFields> {
    let mut fields = NameFields::new(FileKind::Quicklook, &extension(caps)?);
    fields.instrument = text(caps, "inst");
    fields.level = text(caps, "level");
    fields.descriptor = text(caps, "desc");
    fields.orbit = number(caps, "orbit");
    fields.timetag = date_time(caps).ok()?;
    Some(fields)
}

fn build_metadata(caps: &Captures<'_>) -> Option<NameFields> {
    let mut fields = NameFields::new(FileKind::Metadata, &extension(caps)?);
    fields.instrument = text(caps, "inst");
    fields.descriptor = text(caps, "desc");
    fields.timetag = date_time(caps).ok()?;
    Some(fields)
}

fn build_ancillary(caps: &Captures<'_>) -> Option<NameFields> {
    let mut fields = NameFields::new(FileKind::Ancillary, &extension(caps)?);
    fields.plan = text(caps, "source");
    fields.descriptor = text(caps, "desc");
    fields.timetag = Some(year_doy(caps.name("yy")?.as_str(), caps.name("doy")?.as_str())?);
    fields.end_timetag = match (caps.name("end_yy"), caps.name("end_doy")) {
        (Some(yy), Some(doy)) => Some(year_doy(yy.as_str(), doy.as_str())?),
        _ => None,
    };
    fields.version = number(caps, "version");
    Some(fields)
}

/// SPICE kernel kind directory for a kernel extension.
pub fn kernel_kind(ext: &str) -> Option<&'static str> {
    match ext {
        "tls" => Some("lsk"),
        "tsc" => Some("sclk"),
        "tpc" => Some("pck"),
        "bsp" => Some("spk"),
        "bc" => Some("ck"),
        "ti" => Some("ik"),
        "tf" => Some("fk"),
        _ => None,
    }
}

fn build_spice(caps: &Captures<'_>) -> Option<NameFields> {
    let ext = extension(caps)?;
    let mut fields = NameFields::new(FileKind::Spice, &ext);
    fields.descriptor = text(caps, "root");
    fields.data_type = kernel_kind(&ext).map(str::to_string);
    fields.version = number(caps, "version");
    Some(fields)
}

// ============================================================================
// Composition
// ============================================================================

fn date_part(t: &DateTime<Utc>) -> String {
    t.format("%Y%m%d").to_string()
}

/// `_YYYYMMDD[Thhmmss]`, the clock only when it is not midnight.
fn date_time_part(t: &DateTime<Utc>) -> String {
    if t.num_seconds_from_midnight() == 0 {
        format!("_{}", date_part(t))
    } else {
        format!("_{}T{}", date_part(t), t.format("%H%M%S"))
    }
}

fn yydoy(t: &DateTime<Utc>) -> String {
    format!("{:02}{:03}", t.year() % 100, t.ordinal())
}

fn opt_segment(value: &Option<String>) -> String {
    value
        .as_deref()
        .map(|v| format!("_{}", v))
        .unwrap_or_default()
}

fn gz(fields: &NameFields) -> &'static str {
    if fields.compressed {
        ".gz"
    } else {
        ""
    }
}

/// Build the canonical name for `fields`. Inverse of [`classify`] on fields:
/// `classify(&compose_name(f)?)?.fields == f` for every `f` produced by
/// `classify`. Returns `None` when a field the grammar requires is missing.
pub fn compose_name(fields: &NameFields) -> Option<String> {
    let f = fields;
    let name = match f.kind {
        FileKind::Science | FileKind::SepAnc | FileKind::Euv | FileKind::Radio => format!(
            "mvn_{}_{}{}{}_v{:02}_r{:02}.{}{}",
            f.instrument.as_deref()?,
            f.level.as_deref()?,
            opt_segment(&f.descriptor),
            date_time_part(f.timetag.as_ref()?),
            f.version?,
            f.revision?,
            f.extension,
            gz(f),
        ),
        FileKind::Label => {
            let version = match (f.version, f.revision) {
                (Some(v), Some(r)) => format!("_v{:02}_r{:02}", v, r),
                _ => String::new(),
            };
            format!(
                "mvn_{}_{}{}{}{}.{}",
                f.instrument.as_deref()?,
                f.level.as_deref()?,
                opt_segment(&f.descriptor),
                date_time_part(f.timetag.as_ref()?),
                version,
                f.extension,
            )
        }
        FileKind::Kp => format!(
            "mvn_kp_{}{}{}_v{:02}_r{:02}.{}{}",
            f.plan.as_deref()?,
            opt_segment(&f.descriptor),
            date_time_part(f.timetag.as_ref()?),
            f.version?,
            f.revision?,
            f.extension,
            gz(f),
        ),
        FileKind::L0 => format!(
            "mvn_{}_{}_l0_{}{}.{}{}",
            f.instrument.as_deref()?,
            f.descriptor.as_deref()?,
            date_part(f.timetag.as_ref()?),
            f.version.map(|v| format!("_v{:03}", v)).unwrap_or_default(),
            f.extension,
            gz(f),
        ),
        FileKind::Quicklook => format!(
            "mvn_{}_{}{}_{}{}.{}",
            f.instrument.as_deref()?,
            f.level.as_deref()?,
            opt_segment(&f.descriptor),
            date_part(f.timetag.as_ref()?),
            f.orbit.map(|o| format!("_{:05}", o)).unwrap_or_default(),
            f.extension,
        ),
        FileKind::Metadata => format!(
            "mvn_{}_metadata{}{}.{}",
            f.instrument.as_deref()?,
            opt_segment(&f.descriptor),
            f.timetag
                .as_ref()
                .map(|t| format!("_{}", date_part(t)))
                .unwrap_or_default(),
            f.extension,
        ),
        FileKind::Ancillary => format!(
            "{}_{}_{}{}{}.{}",
            f.plan.as_deref()?,
            f.descriptor.as_deref()?,
            yydoy(f.timetag.as_ref()?),
            f.end_timetag
                .as_ref()
                .map(|t| format!("_{}", yydoy(t)))
                .unwrap_or_default(),
            f.version.map(|v| format!("_v{}", v)).unwrap_or_default(),
            f.extension,
        ),
        FileKind::Spice => format!(
            "{}{}.{}",
            f.descriptor.as_deref()?,
            f.version.map(|v| format!(".{}", v)).unwrap_or_default(),
            f.extension,
        ),
    };
    Some(name)
}

// ============================================================================
// Catalog records
// ============================================================================

/// Build the catalog row for a classified file.
///
/// Undated names take their timetag from `mtime`. Unversioned labels are
/// recorded as version 1, revision 0 so they pair with `v01_r00` products.
pub fn compose_record(
    classification: &Classification,
    directory_path: &str,
    file_name: &str,
    file_size: u64,
    mtime: DateTime<Utc>,
) -> FileRecord {
    let f = &classification.fields;
    let (version, revision) = match (f.kind, f.version, f.revision) {
        (FileKind::Label, None, _) => (Some(1), Some(0)),
        (_, version, revision) => (version, revision),
    };
    FileRecord {
        id: None,
        kind: f.kind,
        instrument: f.instrument.clone(),
        level: f.level.clone(),
        descriptor: f.descriptor.clone(),
        plan: f.plan.clone(),
        orbit: f.orbit,
        mode: f.mode.clone(),
        data_type: f.data_type.clone(),
        file_name: file_name.to_string(),
        directory_path: directory_path.to_string(),
        file_root: classification.file_root.clone(),
        file_extension: f.extension.clone(),
        file_size,
        timetag: f.timetag.unwrap_or(mtime),
        version,
        revision,
        absolute_version: version.map(|v| absolute_version(v, revision)),
        mod_date: mtime,
        released: false,
    }
}
