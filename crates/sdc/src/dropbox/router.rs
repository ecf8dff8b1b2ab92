//! Dropbox router: moves stable, classified files to their canonical place.

use super::rules::{find_rule, RoutingRule, RULES};
use super::{DuplicatePolicy, RouteOutcome, RouteState};
use crate::cancel::CancelToken;
use crate::config::RouterConfig;
use crate::error::{retry_once, FileFailure, Result, SdcError};
use crate::fsops;
use crate::naming::{classify, compose_name, compose_record, NameFields};
use chrono::{DateTime, Utc};
use sdc_catalog::Catalog;
use sdc_journal::{MoveJournal, MoveJournalEntry, StatusEventId, StatusSink};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

const COMPONENT: &str = "router";

/// Versions above this cannot be written by any versioned grammar.
const MAX_VERSION: u32 = 999;

/// Outcome of one `route_tree` pass over a dropbox root.
#[derive(Debug, Clone, Default)]
pub struct SweepSummary {
    pub root: PathBuf,
    /// Files per applied duplicate policy
    pub by_policy: BTreeMap<DuplicatePolicy, usize>,
    pub landed: usize,
    pub removed: usize,
    pub archived: usize,
    pub quarantined: usize,
    /// Files left for a later pass (too young or held open)
    pub skipped_unstable: usize,
    pub failures: Vec<FileFailure>,
    pub cancelled: bool,
}

impl SweepSummary {
    fn tally(&mut self, outcome: &RouteOutcome) {
        if let Some(policy) = outcome.policy {
            *self.by_policy.entry(policy).or_default() += 1;
        }
        match outcome.state {
            RouteState::Journaled => self.landed += 1,
            RouteState::Removed => self.removed += 1,
            RouteState::Archived => self.archived += 1,
            RouteState::Quarantined => self.quarantined += 1,
        }
    }

    /// One line per policy, e.g. `IGNORE=3 REMOVE=1`.
    pub fn policy_line(&self) -> String {
        self.by_policy
            .iter()
            .map(|(policy, count)| format!("{}={}", policy, count))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Locate a side directory (invalid or dupe bin) for `dropbox_root`.
///
/// Looks for `name` in the root and up to `depth` of its ancestors; falls back
/// to `data_root/name`. The directory is not created here.
pub fn find_side_dir(dropbox_root: &Path, name: &str, depth: usize, data_root: &Path) -> PathBuf {
    dropbox_root
        .ancestors()
        .take(depth + 1)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_dir())
        .unwrap_or_else(|| data_root.join(name))
}

pub struct Router<'a> {
    config: &'a RouterConfig,
    rules: &'a [RoutingRule],
    journal: Arc<dyn MoveJournal>,
    status: Arc<dyn StatusSink>,
    catalog: Option<Arc<dyn Catalog>>,
}

impl<'a> Router<'a> {
    pub fn new(
        config: &'a RouterConfig,
        journal: Arc<dyn MoveJournal>,
        status: Arc<dyn StatusSink>,
    ) -> Self {
        Self {
            config,
            rules: &RULES,
            journal,
            status,
            catalog: None,
        }
    }

    /// Also upsert a catalog row for every landed file.
    pub fn with_catalog(mut self, catalog: Arc<dyn Catalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn with_rules(mut self, rules: &'a [RoutingRule]) -> Self {
        self.rules = rules;
        self
    }

    fn on_conflict(&self, rule: &RoutingRule) -> DuplicatePolicy {
        self.config
            .conflict_overrides
            .get(rule.name)
            .copied()
            .unwrap_or(rule.on_conflict)
    }

    /// Route one file that is already known to be stable.
    ///
    /// Per-file problems that leave the file in place (missing destination
    /// root, I/O failure, journal failure) are returned as errors.
    pub fn move_valid(&self, src: &Path, invalid_dir: &Path, dupe_dir: &Path) -> Result<RouteOutcome> {
        let Some(name) = src.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            return self.quarantine(src, invalid_dir, "file name is not valid UTF-8");
        };
        let Some(mut rule) = find_rule(self.rules, &name) else {
            return self.quarantine(src, invalid_dir, "no routing rule matches");
        };

        let mut src = src.to_path_buf();
        let mut name = name;
        if rule.decompress_before_move && name.ends_with(".gz") && fsops::is_gzip(&src)? {
            src = fsops::unzip_in_place(&src)?;
            name = name.trim_end_matches(".gz").to_string();
            rule = match find_rule(self.rules, &name) {
                Some(rule) => rule,
                None => {
                    return self.quarantine(&src, invalid_dir, "no routing rule matches after decompression")
                }
            };
        }

        let Some(classification) = classify(&name) else {
            return self.quarantine(&src, invalid_dir, "name fields are not valid");
        };
        let fields = classification.fields;
        let Some(destination) = (rule.destination)(&self.config.data_root, &fields) else {
            return self.quarantine(&src, invalid_dir, "rule computes no destination");
        };
        if !destination.base.is_dir() {
            return Err(SdcError::MissingDestinationRoot(destination.base));
        }
        let dest_dir = destination.dir();
        if destination.dynamic.is_some() {
            fsops::create_dir_0755(&dest_dir)?;
        }

        let file_name = rule
            .rename
            .and_then(|rename| rename(&fields, &name))
            .unwrap_or_else(|| name.clone());
        let dest = dest_dir.join(&file_name);

        let Some(check) = rule.duplicate_policy else {
            return self.land(rule, &src, &dest, None);
        };
        let decision = check(&src, &dest, self.on_conflict(rule))?;
        debug!(
            src = %src.display(),
            dest = %dest.display(),
            policy = %decision.policy,
            rule = rule.name,
            "Duplicate policy decided"
        );

        match decision.policy {
            DuplicatePolicy::Ignore => self.land(rule, &src, &dest, Some(decision.policy)),
            DuplicatePolicy::Remove => {
                fs::remove_file(&src)?;
                info!(src = %src.display(), dest = %dest.display(), "Removed identical duplicate");
                Ok(RouteOutcome {
                    policy: Some(DuplicatePolicy::Remove),
                    state: RouteState::Removed,
                    dest: decision.matched,
                })
            }
            DuplicatePolicy::Overwrite => {
                if dest.exists() {
                    fs::remove_file(&dest)?;
                }
                self.land(rule, &src, &dest, Some(decision.policy))
            }
            DuplicatePolicy::OverwriteArchive => {
                if dest.exists() {
                    fsops::create_dir_0755(dupe_dir)?;
                    let parked = fsops::unique_path(dupe_dir, &file_name);
                    fsops::move_file(&dest, &parked)?;
                    info!(old = %dest.display(), parked = %parked.display(), "Archived replaced file");
                }
                self.land(rule, &src, &dest, Some(decision.policy))
            }
            DuplicatePolicy::Archive => {
                fsops::create_dir_0755(dupe_dir)?;
                let parked = fsops::unique_path(dupe_dir, &name);
                fsops::move_file(&src, &parked)?;
                fsops::ensure_world_readable(&parked)?;
                info!(src = %src.display(), parked = %parked.display(), "Archived conflicting file");
                Ok(RouteOutcome {
                    policy: Some(DuplicatePolicy::Archive),
                    state: RouteState::Archived,
                    dest: Some(parked),
                })
            }
            DuplicatePolicy::UpVersion => match next_free_version(&src, &dest)? {
                Some(free) => self.land(rule, &src, &free, Some(decision.policy)),
                None => {
                    fs::remove_file(&src)?;
                    info!(src = %src.display(), "Removed duplicate of an existing version");
                    Ok(RouteOutcome {
                        policy: Some(DuplicatePolicy::Remove),
                        state: RouteState::Removed,
                        dest: decision.matched,
                    })
                }
            },
        }
    }

    /// Move, normalize permissions, journal, copy, catalog.
    ///
    /// A file that cannot be journaled after the move is moved back to `src`,
    /// so a destination exists only with its journal entry.
    fn land(
        &self,
        rule: &RoutingRule,
        src: &Path,
        dest: &Path,
        policy: Option<DuplicatePolicy>,
    ) -> Result<RouteOutcome> {
        fsops::move_file(src, dest)?;
        let (metadata, entry) = match self.journal_move(src, dest) {
            Ok(journaled) => journaled,
            Err(err) => return Err(self.roll_back(src, dest, err)),
        };
        info!(
            src = %src.display(),
            dest = %dest.display(),
            md5 = %entry.md5,
            size = entry.size,
            rule = rule.name,
            "Landed file"
        );

        let file_name = dest
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let classification = classify(&file_name);

        if let (Some(copy_target), Some(c)) = (rule.copy_target, classification.as_ref()) {
            if let Some(dir) = copy_target(&self.config.data_root, &c.fields) {
                if let Err(err) = self.copy_to(dest, &dir, &file_name) {
                    warn!(dest = %dest.display(), target = %dir.display(), error = %err, "Copy target failed");
                    self.status.record(
                        COMPONENT,
                        StatusEventId::Fail,
                        &format!("Copy of {} failed", file_name),
                        &err.to_string(),
                    );
                }
            }
        }

        if let (Some(catalog), Some(c)) = (self.catalog.as_ref(), classification.as_ref()) {
            let mtime: DateTime<Utc> = metadata.modified()?.into();
            let dir = dest.parent().map(|p| p.to_string_lossy().into_owned()).unwrap_or_default();
            let record = compose_record(c, &dir, &file_name, metadata.len(), mtime);
            if let Err(err) = retry_once("catalog upsert", || catalog.upsert(&record)) {
                warn!(dest = %dest.display(), error = %err, "Catalog upsert failed");
                self.status.record(
                    COMPONENT,
                    StatusEventId::Fail,
                    &format!("Catalog upsert of {} failed", file_name),
                    &err.to_string(),
                );
            }
        }

        self.status.record(
            COMPONENT,
            StatusEventId::Progress,
            &format!("Landed {}", file_name),
            &dest.display().to_string(),
        );
        Ok(RouteOutcome {
            policy,
            state: RouteState::Journaled,
            dest: Some(dest.to_path_buf()),
        })
    }

    fn journal_move(&self, src: &Path, dest: &Path) -> Result<(fs::Metadata, MoveJournalEntry)> {
        fsops::ensure_world_readable(dest)?;
        let metadata = fs::metadata(dest)?;
        let entry = MoveJournalEntry {
            when_moved: Utc::now(),
            src: src.to_path_buf(),
            dest: dest.to_path_buf(),
            md5: fsops::md5_file(dest)?,
            size: metadata.len(),
        };
        self.journal.append(&entry)?;
        Ok((metadata, entry))
    }

    /// Undo a move whose journaling failed. Returns the error to report.
    fn roll_back(&self, src: &Path, dest: &Path, cause: SdcError) -> SdcError {
        match fsops::move_file(dest, src) {
            Ok(()) => {
                warn!(src = %src.display(), dest = %dest.display(), error = %cause, "Move rolled back");
                cause
            }
            Err(rollback) => {
                error!(
                    src = %src.display(),
                    dest = %dest.display(),
                    error = %cause,
                    rollback_error = %rollback,
                    "Move could not be rolled back"
                );
                SdcError::RollbackFailed {
                    dest: dest.to_path_buf(),
                    cause: Box::new(cause),
                    rollback: Box::new(rollback),
                }
            }
        }
    }

    fn copy_to(&self, landed: &Path, dir: &Path, file_name: &str) -> Result<()> {
        fsops::create_dir_0755(dir)?;
        let target = dir.join(file_name);
        fsops::copy_file(landed, &target)?;
        fsops::ensure_world_readable(&target)?;
        Ok(())
    }

    /// Move an unroutable file into the invalid-files bin.
    fn quarantine(&self, src: &Path, invalid_dir: &Path, reason: &str) -> Result<RouteOutcome> {
        fsops::create_dir_0755(invalid_dir)?;
        let name = src
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let target = fsops::unique_path(invalid_dir, &name);
        fsops::move_file(src, &target)?;
        fsops::ensure_world_readable(&target)?;
        warn!(src = %src.display(), target = %target.display(), reason, "Quarantined file");
        self.status.record(
            COMPONENT,
            StatusEventId::Fail,
            &format!("Invalid file name {}", name),
            &format!("{}: moved {} to {}", reason, src.display(), target.display()),
        );
        Ok(RouteOutcome {
            policy: None,
            state: RouteState::Quarantined,
            dest: Some(target),
        })
    }

    /// Sweep one dropbox root.
    pub fn route_tree(&self, root: &Path, cancel: &CancelToken) -> Result<SweepSummary> {
        if !root.is_dir() {
            return Err(SdcError::InvalidState(format!(
                "dropbox root {} is not a directory",
                root.display()
            )));
        }
        let invalid_dir = find_side_dir(
            root,
            &self.config.invalid_dir_name,
            self.config.side_dir_search_depth,
            &self.config.data_root,
        );
        let dupe_dir = find_side_dir(
            root,
            &self.config.dupe_dir_name,
            self.config.side_dir_search_depth,
            &self.config.data_root,
        );
        self.status.record(
            COMPONENT,
            StatusEventId::Start,
            &format!("Sweeping {}", root.display()),
            "",
        );

        let mut summary = SweepSummary {
            root: root.to_path_buf(),
            ..SweepSummary::default()
        };
        let side_names = [self.config.invalid_dir_name.as_str(), self.config.dupe_dir_name.as_str()];
        let walker = WalkDir::new(root).follow_links(false).into_iter().filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            if entry.depth() > 0 && entry.file_type().is_dir() && side_names.contains(&&*name) {
                return false;
            }
            !name.starts_with(".sdc-")
        });

        let age_limit = self.config.age_limit();
        let mut valid = Vec::new();
        let mut invalid = Vec::new();
        for entry in walker {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    let path = err.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
                    warn!(path = %path.display(), error = %err, "Walk error");
                    summary.failures.push(FileFailure::new(path, err));
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.into_path();
            match fsops::file_is_stable(&path, age_limit) {
                Ok(true) => {}
                Ok(false) => {
                    debug!(path = %path.display(), "File not yet stable");
                    summary.skipped_unstable += 1;
                    continue;
                }
                Err(err) => {
                    summary.failures.push(FileFailure::new(&path, err));
                    continue;
                }
            }
            let routable = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| find_rule(self.rules, n).is_some())
                .unwrap_or(false);
            if routable {
                valid.push(path);
            } else {
                invalid.push(path);
            }
        }

        for path in invalid {
            match self.quarantine(&path, &invalid_dir, "no routing rule matches") {
                Ok(outcome) => summary.tally(&outcome),
                Err(err) => self.record_failure(&mut summary, &path, err),
            }
        }
        for path in valid {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            match self.move_valid(&path, &invalid_dir, &dupe_dir) {
                Ok(outcome) => summary.tally(&outcome),
                Err(err) => self.record_failure(&mut summary, &path, err),
            }
        }

        info!(
            root = %root.display(),
            landed = summary.landed,
            removed = summary.removed,
            archived = summary.archived,
            quarantined = summary.quarantined,
            skipped = summary.skipped_unstable,
            failed = summary.failures.len(),
            cancelled = summary.cancelled,
            "Sweep finished"
        );
        self.status.record(
            COMPONENT,
            StatusEventId::Status,
            &format!("Swept {}", root.display()),
            &format!(
                "{} quarantined={} skipped={} failed={}{}",
                summary.policy_line(),
                summary.quarantined,
                summary.skipped_unstable,
                summary.failures.len(),
                if summary.cancelled { " (cancelled)" } else { "" },
            ),
        );
        Ok(summary)
    }

    fn record_failure(&self, summary: &mut SweepSummary, path: &Path, err: SdcError) {
        warn!(path = %path.display(), error = %err, "Failed to route file");
        self.status.record(
            COMPONENT,
            StatusEventId::Fail,
            &format!("Failed to route {}", path.display()),
            &err.to_string(),
        );
        summary.failures.push(FileFailure::new(path, err));
    }

    /// Sweep every configured dropbox root, stopping at the first root that
    /// cannot be swept.
    pub fn route_all(&self, cancel: &CancelToken) -> Result<Vec<SweepSummary>> {
        let mut summaries = Vec::with_capacity(self.config.dropbox_roots.len());
        for root in &self.config.dropbox_roots {
            cancel.check()?;
            summaries.push(self.route_tree(root, cancel)?);
        }
        Ok(summaries)
    }
}

/// Next version of `dest`'s name with no file behind it.
///
/// `None` when a version on the way holds the same bytes as `src`.
fn next_free_version(src: &Path, dest: &Path) -> Result<Option<PathBuf>> {
    let dir = dest.parent().unwrap_or_else(|| Path::new("."));
    let name = dest.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    let mut fields: NameFields = classify(name)
        .map(|c| c.fields)
        .ok_or_else(|| SdcError::InvalidState(format!("cannot up-version {}", name)))?;

    let mut candidate = dest.to_path_buf();
    while candidate.exists() {
        if fsops::files_are_same(src, &candidate)? {
            return Ok(None);
        }
        let version = fields.version.unwrap_or(1) + 1;
        if version > MAX_VERSION {
            return Err(SdcError::InvalidState(format!("no free version for {}", name)));
        }
        fields.version = Some(version);
        let next = compose_name(&fields)
            .ok_or_else(|| SdcError::InvalidState(format!("cannot up-version {}", name)))?;
        candidate = dir.join(next);
    }
    Ok(Some(candidate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdc_catalog::{FileQuery, SqliteCatalog};
    use sdc_journal::{JournalError, MemoryJournal, MemoryStatusSink};
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    struct Fixture {
        _tmp: TempDir,
        config: RouterConfig,
        journal: Arc<MemoryJournal>,
        status: Arc<MemoryStatusSink>,
        catalog: Arc<SqliteCatalog>,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = TempDir::new().unwrap();
            let data_root = tmp.path().join("root");
            let drop = tmp.path().join("drop");
            for inst in ["swe", "ngi"] {
                fs::create_dir_all(data_root.join(inst)).unwrap();
            }
            fs::create_dir_all(&drop).unwrap();
            let config = RouterConfig {
                data_root,
                dropbox_roots: vec![drop],
                age_limit_seconds: 60,
                ..RouterConfig::default()
            };
            Self {
                _tmp: tmp,
                config,
                journal: Arc::new(MemoryJournal::new()),
                status: Arc::new(MemoryStatusSink::new()),
                catalog: Arc::new(SqliteCatalog::open_in_memory().unwrap()),
            }
        }

        fn router(&self) -> Router<'_> {
            Router::new(&self.config, self.journal.clone(), self.status.clone())
                .with_catalog(self.catalog.clone())
        }

        fn drop_dir(&self) -> PathBuf {
            self.config.dropbox_roots[0].clone()
        }

        fn drop_file(&self, name: &str, bytes: &[u8]) -> PathBuf {
            let path = self.drop_dir().join(name);
            fs::write(&path, bytes).unwrap();
            let old = SystemTime::now() - Duration::from_secs(3600);
            filetime::set_file_mtime(&path, filetime::FileTime::from_system_time(old)).unwrap();
            path
        }

        fn sweep(&self) -> SweepSummary {
            self.router().route_tree(&self.drop_dir(), &CancelToken::new()).unwrap()
        }
    }

    #[test]
    fn test_sweep_lands_science_file() {
        let fx = Fixture::new();
        let name = "mvn_swe_l2_svy3d_20140320_v01_r03.cdf";
        let src = fx.drop_file(name, &[7u8; 1024]);

        let summary = fx.sweep();
        let dest = fx.config.data_root.join("swe/l2/2014/03").join(name);
        assert_eq!(summary.landed, 1);
        assert_eq!(summary.by_policy.get(&DuplicatePolicy::Ignore), Some(&1));
        assert!(dest.exists());
        assert!(!src.exists());

        let entries = fx.journal.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].dest, dest);
        assert_eq!(entries[0].md5, fsops::md5_file(&dest).unwrap());

        let dir = dest.parent().unwrap().to_string_lossy().into_owned();
        let record = fx.catalog.get(&dir, name).unwrap().unwrap();
        assert_eq!(record.absolute_version, Some(1003));
        assert_eq!(fx.status.events_with_id(StatusEventId::Status).len(), 1);
    }

    struct FailingJournal;

    impl MoveJournal for FailingJournal {
        fn append(&self, _entry: &MoveJournalEntry) -> sdc_journal::Result<()> {
            Err(JournalError::Backend("disk full".to_string()))
        }
    }

    #[test]
    fn test_journal_failure_moves_file_back() {
        let fx = Fixture::new();
        let name = "mvn_swe_l2_svy3d_20140320_v01_r03.cdf";
        let src = fx.drop_file(name, b"payload");
        let router = Router::new(&fx.config, Arc::new(FailingJournal), fx.status.clone())
            .with_catalog(fx.catalog.clone());

        let summary = router.route_tree(&fx.drop_dir(), &CancelToken::new()).unwrap();
        assert_eq!(summary.landed, 0);
        assert_eq!(summary.failures.len(), 1);
        assert!(summary.failures[0].message.contains("disk full"));
        assert!(src.exists());
        assert!(!fx.config.data_root.join("swe/l2/2014/03").join(name).exists());
        assert_eq!(fx.catalog.count(&FileQuery::new()).unwrap(), 0);

        let summary = fx.sweep();
        assert_eq!(summary.landed, 1);
        assert_eq!(fx.journal.entries().len(), 1);
    }

    #[test]
    fn test_invalid_name_is_quarantined() {
        let fx = Fixture::new();
        fx.drop_file("thisFileClearlyDoesntFitTheBill.junk", b"junk");

        let summary = fx.sweep();
        assert_eq!(summary.quarantined, 1);
        assert!(fx
            .config
            .data_root
            .join("misnamed_files/thisFileClearlyDoesntFitTheBill.junk")
            .exists());
        assert_eq!(fx.status.events_with_id(StatusEventId::Fail).len(), 1);
        assert!(fx.journal.is_empty());
        assert_eq!(fx.catalog.count(&FileQuery::new()).unwrap(), 0);
    }

    #[test]
    fn test_identical_duplicate_is_removed() {
        let fx = Fixture::new();
        let name = "mvn_swe_l2_svy3d_20140320_v01_r03.cdf";
        let dest_dir = fx.config.data_root.join("swe/l2/2014/03");
        fs::create_dir_all(&dest_dir).unwrap();
        fs::write(dest_dir.join(name), b"same").unwrap();
        let src = fx.drop_file(name, b"same");

        let summary = fx.sweep();
        assert_eq!(summary.removed, 1);
        assert!(!src.exists());
        assert!(fx.journal.is_empty());
    }

    #[test]
    fn test_conflict_archives_old_destination() {
        let fx = Fixture::new();
        let name = "mvn_swe_l2_svy3d_20140320_v01_r03.cdf";
        let dest_dir = fx.config.data_root.join("swe/l2/2014/03");
        fs::create_dir_all(&dest_dir).unwrap();
        fs::write(dest_dir.join(name), b"old").unwrap();
        fx.drop_file(name, b"new");

        let summary = fx.sweep();
        assert_eq!(summary.by_policy.get(&DuplicatePolicy::OverwriteArchive), Some(&1));
        assert_eq!(fs::read(dest_dir.join(name)).unwrap(), b"new");
        assert_eq!(fs::read(fx.config.data_root.join("dupes").join(name)).unwrap(), b"old");
    }

    #[test]
    fn test_conflict_override_by_rule_name() {
        let mut fx = Fixture::new();
        fx.config
            .conflict_overrides
            .insert("science".to_string(), DuplicatePolicy::Archive);
        let name = "mvn_swe_l2_svy3d_20140320_v01_r03.cdf";
        let dest_dir = fx.config.data_root.join("swe/l2/2014/03");
        fs::create_dir_all(&dest_dir).unwrap();
        fs::write(dest_dir.join(name), b"old").unwrap();
        fx.drop_file(name, b"new");

        let summary = fx.sweep();
        assert_eq!(summary.archived, 1);
        assert_eq!(fs::read(dest_dir.join(name)).unwrap(), b"old");
        assert_eq!(fs::read(fx.config.data_root.join("dupes").join(name)).unwrap(), b"new");
    }

    #[test]
    fn test_up_version_finds_free_slot() {
        let fx = Fixture::new();
        let dest_dir = fx.config.data_root.join("ngi/l0/2012/11");
        fs::create_dir_all(&dest_dir).unwrap();
        fs::write(dest_dir.join("mvn_ngi_grp_l0_20121109_v001.dat"), b"one").unwrap();
        fs::write(dest_dir.join("mvn_ngi_grp_l0_20121109_v002.dat"), b"two").unwrap();
        fx.drop_file("mvn_ngi_grp_l0_20121109.dat", b"three");

        fx.sweep();
        assert_eq!(
            fs::read(dest_dir.join("mvn_ngi_grp_l0_20121109_v003.dat")).unwrap(),
            b"three"
        );

        fx.drop_file("mvn_ngi_grp_l0_20121109.dat", b"two");
        let summary = fx.sweep();
        assert_eq!(summary.removed, 1);
        assert!(!dest_dir.join("mvn_ngi_grp_l0_20121109_v004.dat").exists());
    }

    #[test]
    fn test_missing_base_dir_is_a_file_error() {
        let fx = Fixture::new();
        let src = fx.drop_file("mvn_mag_l2_ss1s_20140320_v01_r01.sts", b"mag");

        let summary = fx.sweep();
        assert_eq!(summary.failures.len(), 1);
        assert!(src.exists());
        assert!(!fx.config.data_root.join("mag").exists());
    }

    #[test]
    fn test_quicklook_copied_to_latest() {
        let fx = Fixture::new();
        let name = "mvn_swe_ql_3d_20140320_00123.png";
        fx.drop_file(name, b"png");

        fx.sweep();
        assert!(fx.config.data_root.join("swe/ql/2014/03").join(name).exists());
        assert!(fx.config.data_root.join("ql/latest/swe").join(name).exists());
    }

    #[test]
    fn test_young_files_wait() {
        let fx = Fixture::new();
        let path = fx.drop_dir().join("mvn_swe_l2_svy3d_20140320_v01_r03.cdf");
        fs::write(&path, b"fresh").unwrap();

        let summary = fx.sweep();
        assert_eq!(summary.skipped_unstable, 1);
        assert!(path.exists());
    }

    #[test]
    fn test_find_side_dir_searches_upward() {
        let tmp = TempDir::new().unwrap();
        let deep = tmp.path().join("a/b/c");
        fs::create_dir_all(&deep).unwrap();
        fs::create_dir_all(tmp.path().join("a/dupes")).unwrap();
        let fallback = tmp.path().join("data");

        assert_eq!(find_side_dir(&deep, "dupes", 3, &fallback), tmp.path().join("a/dupes"));
        assert_eq!(find_side_dir(&deep, "dupes", 1, &fallback), fallback.join("dupes"));
    }

    #[test]
    fn test_route_all_stops_when_cancelled() {
        let fx = Fixture::new();
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(matches!(
            fx.router().route_all(&cancel),
            Err(SdcError::Cancelled)
        ));
    }
}
