//! Archive runs: select, assign LIDs, bundle, record.

use super::bundle::{next_version, ArtifactNames, BundleOutput, BundlePlan, BundleWriter};
use super::config::InstrumentArchiveConfig;
use super::events_csv::write_event_csvs;
use super::inventory::InventoryEntry;
use super::lid::LidTable;
use super::selector::select;
use crate::cancel::CancelToken;
use crate::config::ArchiveConfig;
use crate::error::{Result, SdcError};
use chrono::{DateTime, Utc};
use sdc_catalog::{Catalog, EventTimeline, FileKind, FileQuery, FileRecord, SortKey};
use sdc_journal::{StatusEventId, StatusSink};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

const COMPONENT: &str = "archive";

/// One archive invocation.
#[derive(Debug, Clone)]
pub struct ArchiveRequest {
    /// Instrument name or one of the special keys
    pub key: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub dry_run: bool,
    /// Recorded with the result row
    pub command_line: String,
}

/// Outcome for one bundle prefix.
#[derive(Debug, Clone, Default)]
pub struct BundleRun {
    pub prefix: String,
    pub selected: usize,
    /// LIDVIDs listed in the inventory but absent from the catalog
    pub missing: Vec<String>,
    /// Selected files no LID template matched
    pub without_lid: Vec<String>,
    /// `None` when nothing was selected
    pub output: Option<BundleOutput>,
    pub released: u64,
}

pub struct ArchiveRunner<'a> {
    config: &'a ArchiveConfig,
    catalog: Arc<dyn Catalog>,
    status: Arc<dyn StatusSink>,
    timeline: Option<Arc<dyn EventTimeline>>,
}

impl<'a> ArchiveRunner<'a> {
    pub fn new(config: &'a ArchiveConfig, catalog: Arc<dyn Catalog>, status: Arc<dyn StatusSink>) -> Self {
        Self {
            config,
            catalog,
            status,
            timeline: None,
        }
    }

    pub fn with_timeline(mut self, timeline: Arc<dyn EventTimeline>) -> Self {
        self.timeline = Some(timeline);
        self
    }

    pub fn run(&self, request: &ArchiveRequest, cancel: &CancelToken) -> Result<Vec<BundleRun>> {
        if request.end <= request.start {
            return Err(SdcError::Config(format!(
                "archive window is empty: {} .. {}",
                request.start, request.end
            )));
        }
        self.status.record(
            COMPONENT,
            StatusEventId::Start,
            &format!("Archive {} started", request.key),
            &format!("{} .. {} dry_run={}", request.start, request.end, request.dry_run),
        );

        let key = request.key.as_str();
        let runs = if key == self.config.all_key {
            let mut runs = Vec::with_capacity(self.config.instrument_config.len());
            for (name, instrument) in &self.config.instrument_config {
                cancel.check()?;
                runs.push(self.run_instrument(name, instrument, request, cancel)?);
            }
            runs
        } else if key == self.config.ancillary_key {
            vec![self.run_ancillary(request, cancel)?]
        } else if key == self.config.event_key {
            vec![self.run_events(request, cancel)?]
        } else {
            let instrument = self
                .config
                .instrument_config
                .get(key)
                .ok_or_else(|| SdcError::UnknownInstrument(key.to_string()))?;
            vec![self.run_instrument(key, instrument, request, cancel)?]
        };
        Ok(runs)
    }

    fn lid_table(&self, key: &str) -> Result<LidTable> {
        match self.config.instrument_lid_templates.get(key) {
            Some(rules) => LidTable::new(rules),
            None => Ok(LidTable::default()),
        }
    }

    fn run_instrument(
        &self,
        name: &str,
        instrument: &InstrumentArchiveConfig,
        request: &ArchiveRequest,
        cancel: &CancelToken,
    ) -> Result<BundleRun> {
        let lids = self.lid_table(name)?;
        let mut missing: Vec<InventoryEntry> = Vec::new();
        let records = {
            let mut on_missing = |entry: &InventoryEntry| missing.push(entry.clone());
            let selection = select(
                self.catalog.as_ref(),
                instrument,
                request.start,
                request.end,
                &mut on_missing,
                cancel.clone(),
            )?;
            selection.collect::<Result<Vec<_>>>()?
        };

        for entry in &missing {
            warn!(instrument = name, lidvid = %entry.lidvid, "Inventory product missing from catalog");
            self.status.record(
                COMPONENT,
                StatusEventId::Status,
                &format!("{}: inventory product missing from catalog", name),
                &entry.lidvid,
            );
        }

        let blob = serde_json::to_string(instrument)?;
        let mut run = self.bundle_records(name, records, &lids, blob, request, cancel)?;
        run.missing = missing.into_iter().map(|e| e.lidvid).collect();
        Ok(run)
    }

    fn run_ancillary(&self, request: &ArchiveRequest, cancel: &CancelToken) -> Result<BundleRun> {
        let key = self.config.ancillary_key.as_str();
        let lids = self.lid_table(key)?;
        let query = FileQuery::new()
            .kinds([FileKind::Ancillary, FileKind::Spice])
            .timetag_between(request.start, request.end)
            .order_by(SortKey::Timetag)
            .order_by(SortKey::FileName);
        let mut records = Vec::new();
        for row in self.catalog.query(&query)? {
            cancel.check()?;
            records.push(row?);
        }
        let blob = serde_json::json!({ "key": key, "kinds": ["ancillary", "spice"] }).to_string();
        self.bundle_records(key, records, &lids, blob, request, cancel)
    }

    fn run_events(&self, request: &ArchiveRequest, cancel: &CancelToken) -> Result<BundleRun> {
        let key = self.config.event_key.as_str();
        let timeline = self
            .timeline
            .as_ref()
            .ok_or_else(|| SdcError::Config("no event timeline available".to_string()))?;
        let target_dir = self.config.output_root.join(key);
        let files = write_event_csvs(timeline.as_ref(), &target_dir, request.start, request.end)?;
        let blob = serde_json::json!({ "key": key }).to_string();

        let mut run = BundleRun {
            prefix: key.to_string(),
            selected: files.len(),
            ..BundleRun::default()
        };
        run.output = Some(self.write_bundle(key, files, Vec::new(), blob, request, cancel)?);
        Ok(run)
    }

    /// Assign LIDs and bundle; files without one are kept or dropped per
    /// `bundle_without_lid`.
    fn bundle_records(
        &self,
        prefix: &str,
        records: Vec<FileRecord>,
        lids: &LidTable,
        blob: String,
        request: &ArchiveRequest,
        cancel: &CancelToken,
    ) -> Result<BundleRun> {
        let mut run = BundleRun {
            prefix: prefix.to_string(),
            selected: records.len(),
            ..BundleRun::default()
        };
        if records.is_empty() {
            info!(prefix, "Nothing selected");
            self.status.record(
                COMPONENT,
                StatusEventId::Status,
                &format!("{}: no files selected", prefix),
                &format!("{} .. {}", request.start, request.end),
            );
            return Ok(run);
        }

        let mut files = Vec::with_capacity(records.len());
        let mut pairs = Vec::with_capacity(records.len());
        let mut names = Vec::with_capacity(records.len());
        for record in &records {
            let path = record.path();
            match lids.lidvid_for(record) {
                Some(lidvid) => pairs.push((lidvid, path.clone())),
                None => {
                    warn!(prefix, file = %record.file_name, "No LID for file");
                    run.without_lid.push(record.file_name.clone());
                    if !self.config.bundle_without_lid {
                        continue;
                    }
                }
            }
            files.push(path);
            names.push(record.file_name.clone());
        }
        if !run.without_lid.is_empty() {
            self.status.record(
                COMPONENT,
                StatusEventId::Status,
                &format!("{}: {} files have no LID", prefix, run.without_lid.len()),
                &run.without_lid.join("\n"),
            );
        }
        if files.is_empty() {
            return Ok(run);
        }

        let output = self.write_bundle(prefix, files, pairs, blob, request, cancel)?;
        if !request.dry_run && self.config.mark_released {
            run.released = self.catalog.mark_released(&names)?;
        }
        run.output = Some(output);
        Ok(run)
    }

    fn write_bundle(
        &self,
        prefix: &str,
        files: Vec<PathBuf>,
        lidvid_pairs: Vec<(String, PathBuf)>,
        configuration_blob: String,
        request: &ArchiveRequest,
        cancel: &CancelToken,
    ) -> Result<BundleOutput> {
        let target_dir = self.config.output_root.join(prefix);
        let version = next_version(&target_dir, prefix, request.start, request.end)?;
        let plan = BundlePlan {
            names: ArtifactNames::new(prefix, request.start, request.end, version),
            target_dir,
            window_start: request.start,
            window_end: request.end,
            files,
            lidvid_pairs,
            version,
            command_line: request.command_line.clone(),
            configuration_blob,
            dry_run: request.dry_run,
        };

        match BundleWriter::new(self.catalog.as_ref()).write(&plan, cancel) {
            Ok(output) => {
                self.status.record(
                    COMPONENT,
                    StatusEventId::Status,
                    &format!("{}: bundled {} files", prefix, output.file_count),
                    &plan.target_dir.join(&plan.names.manifest).display().to_string(),
                );
                Ok(output)
            }
            Err(err) => {
                self.status.record(
                    COMPONENT,
                    StatusEventId::Fail,
                    &format!("{}: bundle failed", prefix),
                    &err.to_string(),
                );
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::config::LidRule;
    use crate::naming::{classify, compose_record};
    use chrono::TimeZone;
    use sdc_catalog::{MissionEvent, SqliteCatalog};
    use sdc_journal::MemoryStatusSink;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        _tmp: TempDir,
        data_dir: PathBuf,
        config: ArchiveConfig,
        catalog: Arc<SqliteCatalog>,
        status: Arc<MemoryStatusSink>,
    }

    fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let data_dir = tmp.path().join("data/swe");
        fs::create_dir_all(&data_dir).unwrap();
        let mut config = ArchiveConfig::default();
        config.output_root = tmp.path().join("out");
        config.instrument_config.insert("swe".to_string(), InstrumentArchiveConfig::new("swe"));
        config.instrument_lid_templates.insert(
            "swe".to_string(),
            vec![LidRule {
                file_pattern: r"^mvn_swe_l2_(?P<desc>[a-z0-9]+)_\d{8}_v\d+_r\d+\.cdf$".to_string(),
                bundle_id: "maven.swea.calibrated".to_string(),
                collection_id: "data.$desc".to_string(),
                product_id: None,
            }],
        );
        Fixture {
            _tmp: tmp,
            data_dir,
            config,
            catalog: Arc::new(SqliteCatalog::open_in_memory().unwrap()),
            status: Arc::new(MemoryStatusSink::new()),
        }
    }

    impl Fixture {
        fn add(&self, name: &str) {
            let path = self.data_dir.join(name);
            fs::write(&path, name.as_bytes()).unwrap();
            let mtime = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
            let record = compose_record(
                &classify(name).unwrap(),
                &self.data_dir.to_string_lossy(),
                name,
                name.len() as u64,
                mtime,
            );
            self.catalog.upsert(&record).unwrap();
        }

        fn runner(&self) -> ArchiveRunner<'_> {
            ArchiveRunner::new(&self.config, self.catalog.clone(), self.status.clone())
                .with_timeline(self.catalog.clone())
        }
    }

    fn request(key: &str, dry_run: bool) -> ArchiveRequest {
        ArchiveRequest {
            key: key.to_string(),
            start: Utc.with_ymd_and_hms(2014, 3, 1, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2014, 4, 1, 0, 0, 0).unwrap(),
            dry_run,
            command_line: format!("sdc archive {}", key),
        }
    }

    #[test]
    fn test_instrument_run_marks_released() {
        let mut fx = fixture();
        fx.config.mark_released = true;
        fx.add("mvn_swe_l2_svy3d_20140320_v01_r01.cdf");
        fx.add("mvn_swe_l2_svy3d_20140320_v01_r02.cdf");

        let runs = fx.runner().run(&request("swe", false), &CancelToken::new()).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].selected, 1);
        assert_eq!(runs[0].released, 1);
        let output = runs[0].output.as_ref().unwrap();
        assert!(output.bundle_path.as_ref().unwrap().exists());
        let manifest = fs::read_to_string(&output.manifest_path).unwrap();
        assert_eq!(
            manifest.trim_end(),
            "urn:nasa:pds:maven.swea.calibrated:data.svy3d:mvn_swe_l2_svy3d_20140320::1.2  mvn_swe_l2_svy3d_20140320_v01_r02.cdf"
        );
        let released = fx
            .catalog
            .count(&FileQuery::new().instrument("swe").released(true))
            .unwrap();
        assert_eq!(released, 1);
    }

    #[test]
    fn test_unknown_instrument() {
        let fx = fixture();
        let err = fx.runner().run(&request("xyz", false), &CancelToken::new()).unwrap_err();
        assert!(matches!(err, SdcError::UnknownInstrument(ref k) if k == "xyz"));
    }

    #[test]
    fn test_empty_selection_reports_status() {
        let fx = fixture();
        let runs = fx.runner().run(&request("swe", false), &CancelToken::new()).unwrap();
        assert!(runs[0].output.is_none());
        assert_eq!(fx.status.events_with_id(StatusEventId::Status).len(), 1);
    }

    #[test]
    fn test_files_without_lid_dropped_when_configured() {
        let mut fx = fixture();
        fx.config.bundle_without_lid = false;
        fx.add("mvn_swe_l2_svy3d_20140320_v01_r01.cdf");
        fx.add("mvn_swe_l2_svy3d_20140321_v01_r01.sts");

        let runs = fx.runner().run(&request("swe", true), &CancelToken::new()).unwrap();
        assert_eq!(runs[0].without_lid, vec!["mvn_swe_l2_svy3d_20140321_v01_r01.sts".to_string()]);
        assert_eq!(runs[0].output.as_ref().unwrap().file_count, 1);
        assert_eq!(runs[0].released, 0);
    }

    #[test]
    fn test_event_key_bundles_csvs() {
        let fx = fixture();
        fx.catalog
            .insert_mission_event(&MissionEvent {
                id: None,
                event_type: "periapsis".to_string(),
                start: Utc.with_ymd_and_hms(2014, 3, 2, 0, 0, 0).unwrap(),
                end: Utc.with_ymd_and_hms(2014, 3, 2, 1, 0, 0).unwrap(),
                orbit_number: Some(7),
                description: "orbit 7".to_string(),
            })
            .unwrap();

        let runs = fx.runner().run(&request("events", false), &CancelToken::new()).unwrap();
        assert_eq!(runs[0].selected, 2);
        let output = runs[0].output.as_ref().unwrap();
        assert_eq!(output.file_count, 2);
        assert!(output.bundle_path.as_ref().unwrap().starts_with(fx.config.output_root.join("events")));
    }

    #[test]
    fn test_inverted_window_rejected() {
        let fx = fixture();
        let mut req = request("swe", false);
        std::mem::swap(&mut req.start, &mut req.end);
        assert!(matches!(
            fx.runner().run(&req, &CancelToken::new()),
            Err(SdcError::Config(_))
        ));
    }
}
