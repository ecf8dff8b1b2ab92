//! PDS inventory manifests.
//!
//! An inventory is a line-oriented list of product LIDVIDs:
//!
//! ```text
//! P,urn:nasa:pds:maven.swea.calibrated:data.svy_3d:mvn_swe_l2_svy3d_20140320::1.3
//! P,urn:nasa:pds:maven.swea.calibrated:data.svy_3d:mvn_swe_l2_svy3d_20140321_v01_r03
//! ```
//!
//! The second form is the legacy one, with the version folded into the
//! product name. Unparseable lines are logged and skipped.

use crate::error::Result;
use crate::naming::{extract, parse_yyyymmdd, to_clock, FieldValue};
use chrono::{DateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, warn};

const PRODUCT_RECORD: &str = "P";
const URN_PREFIX: &str = "urn:nasa:pds:";

static LEGACY_VERSION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<base>.+)_v(?P<version>\d+)_r(?P<revision>\d+)$").expect("legacy inventory pattern")
});
static DATE_WITH_CLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"_(?P<date>\d{8})[tT](?P<time>\d{6})").expect("inventory date pattern"));
static DATE_ONLY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"_(?P<date>\d{8})(?:[_.]|$)").expect("inventory date pattern"));

/// One product listed in an inventory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryEntry {
    /// Product name without version, ASCII-lowercased like every PDS LID.
    /// Compared against a catalog `file_root` folded the same way.
    pub base: String,
    pub version: u32,
    pub revision: u32,
    /// Start of the product's content, from the date in its name
    pub start_date: Option<DateTime<Utc>>,
    /// The LIDVID as listed
    pub lidvid: String,
}

impl InventoryEntry {
    pub fn key(&self) -> (&str, (u32, u32)) {
        (self.base.as_str(), (self.version, self.revision))
    }

    pub fn in_window(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start_date
            .map(|date| date >= start && date < end)
            .unwrap_or(false)
    }
}

/// Start date encoded in a product name: `YYYYMMDDtHHMMSS` when present,
/// else `YYYYMMDD` at midnight UTC.
pub fn start_date(base: &str) -> Option<DateTime<Utc>> {
    let values = extract(
        &[&*DATE_WITH_CLOCK, &*DATE_ONLY],
        base,
        &["date", "time"],
        &[("time", to_clock)],
    )?;
    let date = parse_yyyymmdd(values[0].1.as_text()?)?;
    let (h, m, s) = match values[1].1 {
        FieldValue::Clock(h, m, s) => (h, m, s),
        _ => (0, 0, 0),
    };
    Some(Utc.from_utc_datetime(&date.and_hms_opt(h, m, s)?))
}

/// Parse one inventory line. `Ok(None)` for blank lines and non-product
/// records; `Err` carries a description of what is wrong with the line.
pub fn parse_line(line: &str) -> std::result::Result<Option<InventoryEntry>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let (record_type, urn) = line
        .split_once(',')
        .ok_or_else(|| "missing record type".to_string())?;
    if record_type.trim() != PRODUCT_RECORD {
        return Ok(None);
    }
    let urn = urn.trim();
    if !urn.starts_with(URN_PREFIX) {
        return Err(format!("not a PDS URN: {}", urn));
    }

    let (base, version, revision) = match urn.split_once("::") {
        Some((lid, vid)) => {
            let base = lid.rsplit(':').next().unwrap_or(lid);
            let (major, minor) = vid
                .split_once('.')
                .ok_or_else(|| format!("bad version id '{}'", vid))?;
            let major = major.parse::<u32>().map_err(|_| format!("bad major version '{}'", major))?;
            let minor = minor.parse::<u32>().map_err(|_| format!("bad minor version '{}'", minor))?;
            (base.to_string(), major, minor)
        }
        None => {
            let product = urn.rsplit(':').next().unwrap_or(urn);
            let caps = LEGACY_VERSION
                .captures(product)
                .ok_or_else(|| format!("no version in '{}'", product))?;
            let number = |group: &str| {
                caps[group]
                    .parse::<u32>()
                    .map_err(|_| format!("bad {} in '{}'", group, product))
            };
            (caps["base"].to_string(), number("version")?, number("revision")?)
        }
    };
    if base.is_empty() {
        return Err("empty product name".to_string());
    }

    let base = base.to_ascii_lowercase();
    Ok(Some(InventoryEntry {
        start_date: start_date(&base),
        base,
        version,
        revision,
        lidvid: urn.to_string(),
    }))
}

/// Read every product entry from `reader`, sorted by `(base, version,
/// revision)`. With `uprev`, each revision is incremented by one.
pub fn parse_inventory<R: BufRead>(reader: R, uprev: bool) -> Result<Vec<InventoryEntry>> {
    let mut entries = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        match parse_line(&line) {
            Ok(Some(mut entry)) => {
                if uprev {
                    entry.revision += 1;
                }
                entries.push(entry);
            }
            Ok(None) => {}
            Err(reason) => warn!(line = index + 1, reason = %reason, "Skipping inventory line"),
        }
    }
    entries.sort_by(|a, b| a.key().cmp(&b.key()));
    entries.dedup_by(|a, b| a.key() == b.key());
    debug!(entries = entries.len(), uprev, "Parsed inventory");
    Ok(entries)
}

pub fn load_inventory(path: &Path, uprev: bool) -> Result<Vec<InventoryEntry>> {
    parse_inventory(BufReader::new(File::open(path)?), uprev)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_parse_current_and_legacy_lines() {
        let entry = parse_line("P,urn:nasa:pds:maven.swea.calibrated:data.svy_3d:mvn_swe_l2_svy3d_20140320::1.3")
            .unwrap()
            .unwrap();
        assert_eq!(entry.key(), ("mvn_swe_l2_svy3d_20140320", (1, 3)));
        assert_eq!(
            entry.start_date,
            Some(Utc.with_ymd_and_hms(2014, 3, 20, 0, 0, 0).unwrap())
        );

        let legacy = parse_line("P,urn:nasa:pds:maven.iuvs:data:mvn_iuv_l1b_apoapse_20141018t120326_v02_r01")
            .unwrap()
            .unwrap();
        assert_eq!(legacy.key(), ("mvn_iuv_l1b_apoapse_20141018t120326", (2, 1)));
        assert_eq!(
            legacy.start_date,
            Some(Utc.with_ymd_and_hms(2014, 10, 18, 12, 3, 26).unwrap())
        );
    }

    #[test]
    fn test_base_is_lowercased() {
        let entry = parse_line("P,urn:nasa:pds:maven.iuvs:data:mvn_iuv_l1b_periapse-orbit00109-muv_20141018T120326::2.1")
            .unwrap()
            .unwrap();
        assert_eq!(entry.base, "mvn_iuv_l1b_periapse-orbit00109-muv_20141018t120326");
        assert_eq!(
            entry.start_date,
            Some(Utc.with_ymd_and_hms(2014, 10, 18, 12, 3, 26).unwrap())
        );
    }

    #[test]
    fn test_skips_and_errors() {
        assert_eq!(parse_line("   "), Ok(None));
        assert_eq!(parse_line("S,urn:nasa:pds:x:y:z::1.0"), Ok(None));
        assert!(parse_line("P,not-a-urn").is_err());
        assert!(parse_line("P,urn:nasa:pds:a:b:c::x.0").is_err());
        assert!(parse_line("P,urn:nasa:pds:a:b:c").is_err());
    }

    #[test]
    fn test_inventory_sorted_with_uprev() {
        let text = "\
P,urn:nasa:pds:b:c:mvn_swe_l2_b_20140321::1.0
garbage line
P,urn:nasa:pds:b:c:mvn_swe_l2_a_20140320::1.2
P,urn:nasa:pds:b:c:mvn_swe_l2_a_20140320::1.2
";
        let entries = parse_inventory(Cursor::new(text), true).unwrap();
        let keys: Vec<_> = entries.iter().map(|e| e.key()).collect();
        assert_eq!(
            keys,
            vec![
                ("mvn_swe_l2_a_20140320", (1, 3)),
                ("mvn_swe_l2_b_20140321", (1, 1)),
            ]
        );
    }

    #[test]
    fn test_start_date_window() {
        let entry = parse_line("P,urn:nasa:pds:b:c:mvn_swe_l2_a_20140320::1.0").unwrap().unwrap();
        let start = Utc.with_ymd_and_hms(2014, 3, 20, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2014, 3, 21, 0, 0, 0).unwrap();
        assert!(entry.in_window(start, end));
        assert!(!entry.in_window(end, end + chrono::Duration::days(1)));
    }
}
