//! Full-sweep reconciliation of disk against the catalog.
//!
//! For each root the disk walk runs on its own thread and a second thread
//! pages through the catalog rows under the same root. Both stream through
//! bounded channels in one shared order (see [`merge_order`]) and the two
//! listings are merge-joined by `(directory_path, file_name)`, so memory
//! stays flat however many files a root holds.

use crate::cancel::CancelToken;
use crate::error::{retry_once, FileFailure, Result, SdcError};
use crate::fsops;
use crate::naming::{classify, compose_record};
use chrono::{DateTime, Utc};
use sdc_catalog::{Catalog, FileQuery, SortKey};
use sdc_journal::{StatusEventId, StatusSink};
use std::cmp::Ordering;
use std::iter;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::SystemTime;
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

const COMPONENT: &str = "indexer";

/// Entries in flight between each producer thread and the merge.
const WALK_QUEUE_DEPTH: usize = 1024;

type PathKey = (String, String);

/// Size and mtime of one file, as compared during reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStat {
    size: u64,
    mtime_millis: i64,
}

enum WalkItem {
    File(PathKey, FileStat),
    Failed(FileFailure),
}

/// Order shared by the walk and the catalog stream: directories compared
/// with a trailing `/` (`SortKey::DirectoryTree`), then file names, all
/// bytewise.
fn merge_order(a: &PathKey, b: &PathKey) -> Ordering {
    let tree = |dir: &str| dir.bytes().chain(iter::once(b'/')).collect::<Vec<u8>>();
    tree(&a.0).cmp(&tree(&b.0)).then_with(|| a.1.cmp(&b.1))
}

/// Sibling order that makes a depth-first walk yield [`merge_order`]: files
/// first, by name, then directories by name with a trailing `/`.
fn walk_order(a: &DirEntry, b: &DirEntry) -> Ordering {
    let key = |entry: &DirEntry| {
        let is_dir = entry.file_type().is_dir();
        let mut name = entry.file_name().as_encoded_bytes().to_vec();
        if is_dir {
            name.push(b'/');
        }
        (is_dir, name)
    };
    key(a).cmp(&key(b))
}

/// Counts from one reindex pass.
#[derive(Debug, Clone, Default)]
pub struct ReindexReport {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    pub unchanged: usize,
    /// On disk but not a recognized name; never cataloged
    pub unclassified: usize,
    pub failures: Vec<FileFailure>,
    pub cancelled: bool,
}

impl ReindexReport {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    /// True when the pass changed (or, in a dry run, would change) nothing.
    pub fn is_noop(&self) -> bool {
        self.inserted == 0 && self.updated == 0 && self.deleted == 0
    }

    fn absorb(&mut self, other: ReindexReport) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.deleted += other.deleted;
        self.unchanged += other.unchanged;
        self.unclassified += other.unclassified;
        self.failures.extend(other.failures);
        self.cancelled |= other.cancelled;
    }
}

/// The walk side of the merge. Walk failures arrive in walk order, so once
/// one is seen every catalog row still ahead may belong to a directory that
/// was not listed.
struct DiskListing {
    rx: mpsc::Receiver<WalkItem>,
    failures: Vec<FileFailure>,
}

impl DiskListing {
    fn next_file(&mut self) -> Option<(PathKey, FileStat)> {
        loop {
            match self.rx.recv().ok()? {
                WalkItem::File(key, stat) => return Some((key, stat)),
                WalkItem::Failed(failure) => self.failures.push(failure),
            }
        }
    }

    fn complete_so_far(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Keeps the catalog in step with the files under a set of roots.
pub struct Indexer {
    catalog: Arc<dyn Catalog>,
    status: Arc<dyn StatusSink>,
}

impl Indexer {
    pub fn new(catalog: Arc<dyn Catalog>, status: Arc<dyn StatusSink>) -> Self {
        Self { catalog, status }
    }

    /// Reconcile every root in turn. A dry run logs the operations it would
    /// perform without touching the catalog.
    pub fn reindex(&self, roots: &[PathBuf], dry_run: bool, cancel: &CancelToken) -> Result<ReindexReport> {
        let mut report = ReindexReport::default();
        for root in roots {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            report.absorb(self.reindex_root(root, dry_run, cancel)?);
        }
        Ok(report)
    }

    pub fn reindex_root(&self, root: &Path, dry_run: bool, cancel: &CancelToken) -> Result<ReindexReport> {
        if !root.is_dir() {
            return Err(SdcError::InvalidState(format!(
                "sweep root {} is not a directory",
                root.display()
            )));
        }
        self.status.record(
            COMPONENT,
            StatusEventId::Start,
            &format!("Reindexing {}", root.display()),
            if dry_run { "dry run" } else { "" },
        );

        let report = thread::scope(|scope| {
            let (walk_tx, walk_rx) = mpsc::sync_channel::<WalkItem>(WALK_QUEUE_DEPTH);
            let (row_tx, row_rx) = mpsc::sync_channel::<Result<(PathKey, FileStat)>>(WALK_QUEUE_DEPTH);
            let walker = scope.spawn(move || walk_root(root, walk_tx, cancel));
            let catalog_reader = scope.spawn(move || self.stream_cataloged(root, row_tx));

            let listing = DiskListing {
                rx: walk_rx,
                failures: Vec::new(),
            };
            // Consumes both receivers, so producers blocked on a full
            // channel wake up and exit before the joins below.
            let report = self.merge(root, listing, row_rx, dry_run, cancel);

            walker
                .join()
                .map_err(|_| SdcError::InvalidState("Walk task panicked".to_string()))?;
            catalog_reader
                .join()
                .map_err(|_| SdcError::InvalidState("Catalog reader panicked".to_string()))?;
            report
        })?;

        info!(
            root = %root.display(),
            dry_run,
            inserted = report.inserted,
            updated = report.updated,
            deleted = report.deleted,
            unchanged = report.unchanged,
            unclassified = report.unclassified,
            failed = report.failed(),
            "Reindex finished"
        );
        self.status.record(
            COMPONENT,
            StatusEventId::Status,
            &format!("Reindexed {}", root.display()),
            &format!(
                "inserted={} updated={} deleted={} unchanged={} unclassified={} failed={}{}",
                report.inserted,
                report.updated,
                report.deleted,
                report.unchanged,
                report.unclassified,
                report.failed(),
                if dry_run { " (dry run)" } else { "" },
            ),
        );
        Ok(report)
    }

    /// Merge-join the walk with the catalog rows under `root`.
    ///
    /// Rows missing from disk are deleted only while the walk has been
    /// complete up to them, and never after cancellation.
    fn merge(
        &self,
        root: &Path,
        mut listing: DiskListing,
        rows: mpsc::Receiver<Result<(PathKey, FileStat)>>,
        dry_run: bool,
        cancel: &CancelToken,
    ) -> Result<ReindexReport> {
        let mut report = ReindexReport::default();
        let mut held_back = 0usize;
        let next_row = || rows.recv().ok().transpose();

        let mut disk = listing.next_file();
        let mut row = next_row()?;
        loop {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let order = match (&disk, &row) {
                (None, None) => break,
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some((on_disk, _)), Some((cataloged, _))) => merge_order(on_disk, cataloged),
            };
            match order {
                Ordering::Less => {
                    if let Some((key, stat)) = disk.take() {
                        self.upsert(root, &key, &stat, dry_run, true, &mut report);
                    }
                    disk = listing.next_file();
                }
                Ordering::Greater => {
                    if let Some((key, _)) = row.take() {
                        if listing.complete_so_far() {
                            self.delete(&key, dry_run, &mut report);
                        } else {
                            held_back += 1;
                        }
                    }
                    row = next_row()?;
                }
                Ordering::Equal => {
                    if let (Some((key, stat)), Some((_, known))) = (disk.take(), row.take()) {
                        if known == stat {
                            report.unchanged += 1;
                        } else {
                            self.upsert(root, &key, &stat, dry_run, false, &mut report);
                        }
                    }
                    disk = listing.next_file();
                    row = next_row()?;
                }
            }
        }

        if held_back > 0 {
            warn!(root = %root.display(), held_back, "Skipping deletions after an incomplete walk");
        }
        // Failures reported after the merge stopped early still count.
        while let Ok(item) = listing.rx.try_recv() {
            if let WalkItem::Failed(failure) = item {
                listing.failures.push(failure);
            }
        }
        let mut failures = listing.failures;
        failures.append(&mut report.failures);
        report.failures = failures;
        Ok(report)
    }

    /// Stream size and mtime of every cataloged file under `root` in
    /// [`merge_order`]. A catalog error is sent and ends the stream.
    fn stream_cataloged(&self, root: &Path, tx: mpsc::SyncSender<Result<(PathKey, FileStat)>>) {
        let query = FileQuery::new()
            .under_directory(root)
            .order_by(SortKey::DirectoryTree)
            .order_by(SortKey::FileName);
        let rows = match self.catalog.query(&query) {
            Ok(rows) => rows,
            Err(err) => {
                let _ = tx.send(Err(err.into()));
                return;
            }
        };
        for record in rows {
            let item = record.map_err(SdcError::from).map(|record| {
                let stat = FileStat {
                    size: record.file_size,
                    mtime_millis: record.mod_date.timestamp_millis(),
                };
                ((record.directory_path, record.file_name), stat)
            });
            let failed = item.is_err();
            if tx.send(item).is_err() || failed {
                break;
            }
        }
    }

    fn upsert(
        &self,
        root: &Path,
        key: &PathKey,
        stat: &FileStat,
        dry_run: bool,
        is_new: bool,
        report: &mut ReindexReport,
    ) {
        let (dir, name) = key;
        let Some(classification) = classify(name) else {
            debug!(root = %root.display(), dir = %dir, name = %name, "Unclassified file not cataloged");
            report.unclassified += 1;
            return;
        };
        let verb = if is_new { "insert" } else { "update" };
        if dry_run {
            info!(dir = %dir, name = %name, "Would {}", verb);
        } else {
            let mtime = DateTime::<Utc>::from_timestamp_millis(stat.mtime_millis).unwrap_or_else(Utc::now);
            let record = compose_record(&classification, dir, name, stat.size, mtime);
            if let Err(err) = retry_once("catalog upsert", || self.catalog.upsert(&record)) {
                self.record_failure(Path::new(dir).join(name), verb, err.into(), report);
                return;
            }
            debug!(dir = %dir, name = %name, "Catalog {}", verb);
        }
        if is_new {
            report.inserted += 1;
        } else {
            report.updated += 1;
        }
    }

    fn delete(&self, key: &PathKey, dry_run: bool, report: &mut ReindexReport) {
        let (dir, name) = key;
        if dry_run {
            info!(dir = %dir, name = %name, "Would delete");
        } else if let Err(err) = retry_once("catalog delete", || self.catalog.delete_by_path(dir, name)) {
            self.record_failure(Path::new(dir).join(name), "delete", err.into(), report);
            return;
        }
        report.deleted += 1;
    }

    fn record_failure(&self, path: PathBuf, verb: &str, err: SdcError, report: &mut ReindexReport) {
        warn!(path = %path.display(), error = %err, "Catalog {} failed", verb);
        self.status.record(
            COMPONENT,
            StatusEventId::Fail,
            &format!("Catalog {} failed for {}", verb, path.display()),
            &err.to_string(),
        );
        report.failures.push(FileFailure::new(path, err));
    }
}

pub(crate) fn mtime_millis(modified: SystemTime) -> i64 {
    DateTime::<Utc>::from(modified).timestamp_millis()
}

/// Walk `root` in [`merge_order`], sending one item per regular file and
/// one per walk failure.
fn walk_root(root: &Path, tx: mpsc::SyncSender<WalkItem>, cancel: &CancelToken) {
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by(walk_order)
        .into_iter()
        .filter_entry(|entry| !entry.file_name().to_string_lossy().starts_with(".sdc-"));
    for entry in walker {
        if cancel.is_cancelled() {
            break;
        }
        let item = match entry {
            Ok(entry) => {
                if !entry.file_type().is_file() {
                    continue;
                }
                let Some(key) = fsops::dir_and_name(entry.path()) else {
                    warn!(path = %entry.path().display(), "Skipping non UTF-8 path");
                    continue;
                };
                match entry.metadata() {
                    Ok(meta) => match meta.modified() {
                        Ok(modified) => WalkItem::File(
                            key,
                            FileStat {
                                size: meta.len(),
                                mtime_millis: mtime_millis(modified),
                            },
                        ),
                        Err(err) => WalkItem::Failed(FileFailure::new(entry.path(), err)),
                    },
                    // Vanished between readdir and stat; a later pass settles it.
                    Err(err) => {
                        debug!(path = %entry.path().display(), error = %err, "Stat failed");
                        continue;
                    }
                }
            }
            Err(err) => {
                let path = err.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
                warn!(path = %path.display(), error = %err, "Walk error");
                WalkItem::Failed(FileFailure::new(path, err))
            }
        };
        if tx.send(item).is_err() {
            break;
        }
    }
}
