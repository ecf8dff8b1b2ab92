//! Archive file selection.
//!
//! Two generators yield the cataloged files that make up one instrument's
//! bundle for a time window:
//!
//! - [`CatalogGenerator`] runs the configured catalog query (optionally
//!   latest-per-family) and chains a companion query for XML labels.
//! - [`InventoryGenerator`] merge-joins a sorted inventory against a catalog
//!   stream ordered by `(file_root, absolute_version)`, yielding the rows the
//!   inventory lists and reporting listed products the catalog lacks. Roots
//!   are compared with ASCII case folded, since LIDs are lowercase while file
//!   names may carry an uppercase `T` in their clock stamps.
//!
//! Both stream from the catalog; neither materializes the catalog.

use super::config::InstrumentArchiveConfig;
use super::inventory::{load_inventory, InventoryEntry};
use crate::cancel::CancelToken;
use crate::error::{Result, SdcError};
use chrono::{DateTime, Utc};
use sdc_catalog::{glob_to_like_pattern, Catalog, FileQuery, FileRecord, RecordStream, SortKey};
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::iter::Peekable;
use tracing::debug;

const LABEL_EXTENSION: &str = "xml";

/// A stream of selected catalog rows.
pub type Selection<'a> = Box<dyn Iterator<Item = Result<FileRecord>> + 'a>;

/// Query for the instrument's data files in `[start, end)`.
pub fn data_query(config: &InstrumentArchiveConfig, start: DateTime<Utc>, end: DateTime<Utc>) -> FileQuery {
    let mut query = FileQuery::new()
        .instrument(&config.instrument)
        .timetag_between(start, end)
        .levels(config.levels.iter().cloned())
        .plans(config.plans.iter().cloned())
        .descriptors(config.descriptors.iter().chain(&config.groupings).cloned());
    query = if config.extensions.is_empty() {
        query.exclude_extensions([LABEL_EXTENSION])
    } else {
        query.extensions(config.extensions.iter().cloned())
    };
    if let Some(glob) = &config.file_name_glob {
        query = query.file_name_like(glob_to_like_pattern(glob));
    }
    if let Some(version) = config.version {
        query = query.version(version);
    }
    if let Some(revision) = config.revision {
        query = query.revision(revision);
    }
    query
}

/// Query for the instrument's XML labels in `[start, end)`.
pub fn label_query(config: &InstrumentArchiveConfig, start: DateTime<Utc>, end: DateTime<Utc>) -> FileQuery {
    let mut query = FileQuery::new()
        .instrument(&config.instrument)
        .timetag_between(start, end)
        .levels(config.levels.iter().cloned())
        .descriptors(config.descriptors.iter().cloned())
        .extensions([LABEL_EXTENSION]);
    let (version, revision) = if config.unversioned_labels {
        (Some(1), Some(0))
    } else {
        (config.label_version, config.label_revision)
    };
    if let Some(version) = version {
        query = query.version(version);
    }
    if let Some(revision) = revision {
        query = query.revision(revision);
    }
    if config.latest {
        query = query.latest();
    }
    query.order_by(SortKey::Timetag).order_by(SortKey::FileName)
}

/// Stops a selection at the first check after cancellation.
struct Cancellable<I> {
    inner: I,
    cancel: CancelToken,
    stopped: bool,
}

impl<I: Iterator<Item = Result<FileRecord>>> Iterator for Cancellable<I> {
    type Item = Result<FileRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.stopped {
            return None;
        }
        if self.cancel.is_cancelled() {
            self.stopped = true;
            return Some(Err(SdcError::Cancelled));
        }
        self.inner.next()
    }
}

fn rows(stream: RecordStream) -> impl Iterator<Item = Result<FileRecord>> {
    stream.map(|row| row.map_err(SdcError::from))
}

/// Data query, optionally latest per family, followed by the label query.
pub struct CatalogGenerator<'a> {
    inner: Cancellable<Selection<'a>>,
}

impl<'a> CatalogGenerator<'a> {
    pub fn new(
        catalog: &'a dyn Catalog,
        config: &InstrumentArchiveConfig,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        cancel: CancelToken,
    ) -> Result<Self> {
        let mut query = data_query(config, start, end)
            .order_by(SortKey::Timetag)
            .order_by(SortKey::FileName);
        if config.latest {
            query = query.latest();
        }
        let data = rows(catalog.query(&query)?);
        let selection: Selection<'a> = if config.include_labels {
            Box::new(data.chain(rows(catalog.query(&label_query(config, start, end))?)))
        } else {
            Box::new(data)
        };
        Ok(Self {
            inner: Cancellable {
                inner: selection,
                cancel,
                stopped: false,
            },
        })
    }
}

impl Iterator for CatalogGenerator<'_> {
    type Item = Result<FileRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

/// Merge-join of an inventory with the catalog.
pub struct InventoryGenerator<'a> {
    catalog: &'a dyn Catalog,
    config: &'a InstrumentArchiveConfig,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    inventory: Peekable<std::vec::IntoIter<InventoryEntry>>,
    rows: Peekable<RecordStream>,
    /// The inventory entry at the head has matched at least one row
    head_matched: bool,
    pending: VecDeque<FileRecord>,
    last_label: Option<(String, u32, u32)>,
    on_missing: &'a mut dyn FnMut(&InventoryEntry),
    cancel: CancelToken,
    done: bool,
}

impl<'a> InventoryGenerator<'a> {
    /// `inventory` must be sorted by key, as [`load_inventory`] returns it.
    pub fn new(
        catalog: &'a dyn Catalog,
        config: &'a InstrumentArchiveConfig,
        inventory: Vec<InventoryEntry>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        on_missing: &'a mut dyn FnMut(&InventoryEntry),
        cancel: CancelToken,
    ) -> Result<Self> {
        let query = data_query(config, start, end)
            .order_by(SortKey::FileRootFolded)
            .order_by(SortKey::AbsoluteVersion);
        Ok(Self {
            catalog,
            config,
            start,
            end,
            inventory: inventory.into_iter().peekable(),
            rows: catalog.query(&query)?.peekable(),
            head_matched: false,
            pending: VecDeque::new(),
            last_label: None,
            on_missing,
            cancel,
            done: false,
        })
    }

    /// Drop the head inventory entry, reporting it if nothing matched it.
    fn advance_inventory(&mut self) {
        if let Some(entry) = self.inventory.next() {
            if !self.head_matched && entry.in_window(self.start, self.end) {
                debug!(base = %entry.base, version = entry.version, revision = entry.revision, "Inventory entry missing from catalog");
                (self.on_missing)(&entry);
            }
        }
        self.head_matched = false;
    }

    fn companion_label(&mut self, row: &FileRecord) -> Result<Option<FileRecord>> {
        if !self.config.include_labels {
            return Ok(None);
        }
        let (version, revision) = if self.config.unversioned_labels {
            (1, 0)
        } else {
            (
                self.config.label_version.or(row.version).unwrap_or(1),
                self.config.label_revision.or(row.revision).unwrap_or(0),
            )
        };
        let key = (row.file_root.clone(), version, revision);
        if self.last_label.as_ref() == Some(&key) {
            return Ok(None);
        }
        let query = FileQuery::new()
            .file_root(&row.file_root)
            .extensions([LABEL_EXTENSION])
            .version(version)
            .revision(revision)
            .order_by(SortKey::FileName)
            .limit(1);
        let label = self.catalog.query(&query)?.next().transpose()?;
        self.last_label = Some(key);
        Ok(label)
    }
}

impl Iterator for InventoryGenerator<'_> {
    type Item = Result<FileRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.pending.pop_front() {
                return Some(Ok(record));
            }
            if self.done {
                return None;
            }
            if self.cancel.is_cancelled() {
                self.done = true;
                return Some(Err(SdcError::Cancelled));
            }

            if self.inventory.peek().is_none() {
                self.done = true;
                continue;
            }
            if matches!(self.rows.peek(), Some(Err(_))) {
                if let Some(Err(err)) = self.rows.next() {
                    return Some(Err(err.into()));
                }
            }
            // An exhausted catalog sorts after every inventory entry.
            let order = match (self.inventory.peek(), self.rows.peek()) {
                (Some(entry), Some(Ok(row))) => {
                    let (root, version) = row.family_key();
                    (root.as_str(), version).cmp(&entry.key())
                }
                _ => Ordering::Greater,
            };

            match order {
                Ordering::Less => {
                    self.rows.next();
                }
                Ordering::Greater => self.advance_inventory(),
                // Inventory keys are unique, so holding the entry while the
                // catalog advances yields every row sharing its key before
                // the entry is dropped on the next `Greater`.
                Ordering::Equal => {
                    let Some(Ok(row)) = self.rows.next() else {
                        continue;
                    };
                    self.head_matched = true;
                    match self.companion_label(&row) {
                        Ok(Some(label)) => self.pending.push_back(label),
                        Ok(None) => {}
                        Err(err) => return Some(Err(err)),
                    }
                    return Some(Ok(row));
                }
            }
        }
    }
}

/// Pick the generator the configuration asks for. Inventory entries missing
/// from the catalog are passed to `on_missing`.
pub fn select<'a>(
    catalog: &'a dyn Catalog,
    config: &'a InstrumentArchiveConfig,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    on_missing: &'a mut dyn FnMut(&InventoryEntry),
    cancel: CancelToken,
) -> Result<Selection<'a>> {
    if !config.use_inventory {
        return Ok(Box::new(CatalogGenerator::new(catalog, config, start, end, cancel)?));
    }
    let path = config.inventory_path.as_deref().ok_or_else(|| {
        SdcError::Config(format!(
            "instrument '{}' uses an inventory but has no inventory_path",
            config.instrument
        ))
    })?;
    let inventory = load_inventory(path, config.uprev_inventory)?;
    Ok(Box::new(InventoryGenerator::new(
        catalog, config, inventory, start, end, on_missing, cancel,
    )?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::inventory::parse_inventory;
    use crate::naming::{classify, compose_record};
    use chrono::TimeZone;
    use sdc_catalog::SqliteCatalog;
    use std::io::Cursor;

    fn add(catalog: &SqliteCatalog, name: &str) {
        let mtime = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let record = compose_record(&classify(name).unwrap(), "/data/swe", name, 1, mtime);
        catalog.upsert(&record).unwrap();
    }

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        (
            Utc.with_ymd_and_hms(2014, 3, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2014, 4, 1, 0, 0, 0).unwrap(),
        )
    }

    fn names(selection: impl Iterator<Item = Result<FileRecord>>) -> Vec<String> {
        selection.map(|r| r.unwrap().file_name).collect()
    }

    #[test]
    fn test_catalog_generator_latest_with_labels() {
        let catalog = SqliteCatalog::open_in_memory().unwrap();
        add(&catalog, "mvn_swe_l2_svy3d_20140320_v01_r00.cdf");
        add(&catalog, "mvn_swe_l2_svy3d_20140320_v02_r00.cdf");
        add(&catalog, "mvn_swe_l2_svy3d_20140320_v02_r00.xml");
        add(&catalog, "mvn_swe_l2_svy3d_20140420_v01_r00.cdf");
        let config = InstrumentArchiveConfig::new("swe");
        let (start, end) = window();

        let selected = names(CatalogGenerator::new(&catalog, &config, start, end, CancelToken::new()).unwrap());
        assert_eq!(
            selected,
            vec![
                "mvn_swe_l2_svy3d_20140320_v02_r00.cdf",
                "mvn_swe_l2_svy3d_20140320_v02_r00.xml",
            ]
        );
    }

    #[test]
    fn test_inventory_merge_join() {
        let catalog = SqliteCatalog::open_in_memory().unwrap();
        add(&catalog, "mvn_swe_l2_svy3d_20140320_v01_r00.cdf");
        add(&catalog, "mvn_swe_l2_svy3d_20140320_v01_r01.cdf");
        add(&catalog, "mvn_swe_l2_svy3d_20140321_v01_r00.cdf");
        add(&catalog, "mvn_swe_l2_svy3d_20140321.xml");
        add(&catalog, "mvn_swe_l2_svy3d_20140325_v01_r00.cdf");
        let inventory = parse_inventory(
            Cursor::new(
                "P,urn:nasa:pds:b:c:mvn_swe_l2_svy3d_20140320::1.0\n\
                 P,urn:nasa:pds:b:c:mvn_swe_l2_svy3d_20140321::1.0\n\
                 P,urn:nasa:pds:b:c:mvn_swe_l2_svy3d_20140322::1.0\n\
                 P,urn:nasa:pds:b:c:mvn_swe_l2_svy3d_20140501::1.0\n",
            ),
            false,
        )
        .unwrap();
        let mut config = InstrumentArchiveConfig::new("swe");
        config.unversioned_labels = true;
        let (start, end) = window();

        let mut missing = Vec::new();
        let mut on_missing = |entry: &InventoryEntry| missing.push(entry.base.clone());
        let generator = InventoryGenerator::new(
            &catalog,
            &config,
            inventory,
            start,
            end,
            &mut on_missing,
            CancelToken::new(),
        )
        .unwrap();
        let selected = names(generator);
        assert_eq!(
            selected,
            vec![
                "mvn_swe_l2_svy3d_20140320_v01_r00.cdf",
                "mvn_swe_l2_svy3d_20140321_v01_r00.cdf",
                "mvn_swe_l2_svy3d_20140321.xml",
            ]
        );
        assert_eq!(missing, vec!["mvn_swe_l2_svy3d_20140322"]);
    }

    fn inventory_join(
        catalog: &SqliteCatalog,
        config: &InstrumentArchiveConfig,
        text: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> (Vec<String>, Vec<String>) {
        let inventory = parse_inventory(Cursor::new(text), false).unwrap();
        let mut missing = Vec::new();
        let mut on_missing = |entry: &InventoryEntry| missing.push(entry.lidvid.clone());
        let generator = InventoryGenerator::new(
            catalog,
            config,
            inventory,
            start,
            end,
            &mut on_missing,
            CancelToken::new(),
        )
        .unwrap();
        let selected = names(generator);
        (selected, missing)
    }

    #[test]
    fn test_inventory_matches_uppercase_clock_stamp() {
        let catalog = SqliteCatalog::open_in_memory().unwrap();
        add(&catalog, "mvn_iuv_l1b_periapse-orbit00109-muv_20141018T120326_v02_r01.fits.gz");
        add(&catalog, "mvn_iuv_l1b_periapse-orbit00110-muv_20141018T163112_v02_r01.fits.gz");
        let config = InstrumentArchiveConfig::new("iuv");
        let start = Utc.with_ymd_and_hms(2014, 10, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2014, 11, 1, 0, 0, 0).unwrap();

        let (selected, missing) = inventory_join(
            &catalog,
            &config,
            "P,urn:nasa:pds:maven.iuvs.calibrated:data.periapse:mvn_iuv_l1b_periapse-orbit00109-muv_20141018t120326::2.1
             P,urn:nasa:pds:maven.iuvs.calibrated:data.periapse:mvn_iuv_l1b_periapse-orbit00110-muv_20141018t163112::2.1
",
            start,
            end,
        );
        assert_eq!(
            selected,
            vec![
                "mvn_iuv_l1b_periapse-orbit00109-muv_20141018T120326_v02_r01.fits.gz",
                "mvn_iuv_l1b_periapse-orbit00110-muv_20141018T163112_v02_r01.fits.gz",
            ]
        );
        assert!(missing.is_empty());
    }

    #[test]
    fn test_inventory_yields_every_row_sharing_a_key() {
        let catalog = SqliteCatalog::open_in_memory().unwrap();
        let mtime = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let name = "mvn_swe_l2_svy3d_20140320_v01_r00.cdf";
        for dir in ["/data/swe/a", "/data/swe/b"] {
            let record = compose_record(&classify(name).unwrap(), dir, name, 1, mtime);
            catalog.upsert(&record).unwrap();
        }
        add(&catalog, "mvn_swe_l2_svy3d_20140321_v01_r00.cdf");
        let config = InstrumentArchiveConfig::new("swe");
        let (start, end) = window();

        let (selected, missing) = inventory_join(
            &catalog,
            &config,
            "P,urn:nasa:pds:b:c:mvn_swe_l2_svy3d_20140320::1.0
             P,urn:nasa:pds:b:c:mvn_swe_l2_svy3d_20140321::1.0
",
            start,
            end,
        );
        assert_eq!(selected, vec![name, name, "mvn_swe_l2_svy3d_20140321_v01_r00.cdf"]);
        assert!(missing.is_empty());
    }

    #[test]
    fn test_select_requires_inventory_path() {
        let catalog = SqliteCatalog::open_in_memory().unwrap();
        let mut config = InstrumentArchiveConfig::new("swe");
        config.use_inventory = true;
        let (start, end) = window();
        let mut ignore = |_: &InventoryEntry| {};
        assert!(matches!(
            select(&catalog, &config, start, end, &mut ignore, CancelToken::new()),
            Err(SdcError::Config(_))
        ));
    }

    #[test]
    fn test_cancelled_selection_stops() {
        let catalog = SqliteCatalog::open_in_memory().unwrap();
        add(&catalog, "mvn_swe_l2_svy3d_20140320_v01_r00.cdf");
        let config = InstrumentArchiveConfig::new("swe");
        let (start, end) = window();
        let cancel = CancelToken::new();
        cancel.cancel();

        let mut generator = CatalogGenerator::new(&catalog, &config, start, end, cancel).unwrap();
        assert!(matches!(generator.next(), Some(Err(SdcError::Cancelled))));
        assert!(generator.next().is_none());
    }
}
