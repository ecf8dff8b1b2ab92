//! Bundle writer: tarball, transfer manifest, checksum manifest, result row.

use crate::cancel::CancelToken;
use crate::error::{Result, SdcError};
use crate::fsops;
use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use sdc_catalog::{ArchiveResult, Catalog, GenerationResult};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// Timestamp format used in artifact names.
pub const ARTIFACT_TIME_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

/// File names of the three artifacts of one bundle run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactNames {
    pub bundle: String,
    pub manifest: String,
    pub checksum: String,
}

fn artifact_stems(prefix: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> [String; 3] {
    let span = format!(
        "{}_{}",
        start.format(ARTIFACT_TIME_FORMAT),
        end.format(ARTIFACT_TIME_FORMAT)
    );
    [
        format!("{}-pds_bundle_{}.tgz", prefix, span),
        format!("transfer_{}_{}.txt", prefix, span),
        format!("checksum_{}_{}.txt", prefix, span),
    ]
}

impl ArtifactNames {
    /// `<prefix>-pds_bundle_<start>_<end>.tgz`, `transfer_<prefix>_...txt`
    /// and `checksum_<prefix>_...txt`, each suffixed with `.<version>` when a
    /// version is given.
    pub fn new(prefix: &str, start: DateTime<Utc>, end: DateTime<Utc>, version: Option<u32>) -> Self {
        let suffix = version.map(|v| format!(".{}", v)).unwrap_or_default();
        let [bundle, manifest, checksum] = artifact_stems(prefix, start, end);
        Self {
            bundle: bundle + &suffix,
            manifest: manifest + &suffix,
            checksum: checksum + &suffix,
        }
    }
}

/// Version for the next run over the same window: one past the largest
/// existing suffix (an unsuffixed artifact counts as 0), or `None` when no
/// artifact for the window exists yet.
pub fn next_version(
    target_dir: &Path,
    prefix: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Option<u32>> {
    if !target_dir.is_dir() {
        return Ok(None);
    }
    let stems = artifact_stems(prefix, start, end);
    let mut largest: Option<u32> = None;
    for entry in fs::read_dir(target_dir)? {
        let name = entry?.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        for stem in &stems {
            let Some(rest) = name.strip_prefix(stem.as_str()) else {
                continue;
            };
            let version = if rest.is_empty() {
                Some(0)
            } else {
                rest.strip_prefix('.').and_then(|v| v.parse::<u32>().ok())
            };
            if let Some(version) = version {
                largest = Some(largest.map_or(version, |l| l.max(version)));
            }
        }
    }
    Ok(largest.map(|v| v + 1))
}

/// Everything one bundle run needs.
#[derive(Debug, Clone)]
pub struct BundlePlan {
    pub target_dir: PathBuf,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    /// Files to bundle, in order
    pub files: Vec<PathBuf>,
    /// `(LIDVID, file)` pairs for the transfer manifest
    pub lidvid_pairs: Vec<(String, PathBuf)>,
    pub names: ArtifactNames,
    pub version: Option<u32>,
    pub command_line: String,
    pub configuration_blob: String,
    pub dry_run: bool,
}

/// What a successful run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleOutput {
    /// `None` on a dry run
    pub bundle_path: Option<PathBuf>,
    pub manifest_path: PathBuf,
    pub checksum_path: PathBuf,
    pub file_count: usize,
    pub result_id: i64,
}

/// Name a file takes inside the bundle. Entries are flat, so two inputs
/// with the same entry name cannot share a bundle.
fn entry_name(path: &Path, decompressed: bool) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if decompressed {
        name.strip_suffix(".gz").map(str::to_string).unwrap_or(name)
    } else {
        name
    }
}

/// One line per LIDVID: the LID left-aligned to the widest one, two spaces,
/// then the path of the bundled file.
pub fn transfer_manifest(pairs: &[(String, String)]) -> String {
    let width = pairs.iter().map(|(lid, _)| lid.len()).max().unwrap_or(0);
    pairs
        .iter()
        .map(|(lid, name)| format!("{:<width$}  {}\n", lid, name, width = width))
        .collect()
}

/// `<md5>  <path>` lines.
pub fn checksum_manifest(digests: &[(String, PathBuf)]) -> String {
    digests
        .iter()
        .map(|(md5, path)| format!("{}  {}\n", md5, path.display()))
        .collect()
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    out.write_all(contents.as_bytes())?;
    out.flush()?;
    Ok(())
}

pub struct BundleWriter<'a> {
    catalog: &'a dyn Catalog,
}

impl<'a> BundleWriter<'a> {
    pub fn new(catalog: &'a dyn Catalog) -> Self {
        Self { catalog }
    }

    /// Write the artifacts and record the run. A failed run is recorded as
    /// `FAILURE` with the error in its notes, then the error is returned.
    /// Output left behind by a failed run is not cleaned up.
    pub fn write(&self, plan: &BundlePlan, cancel: &CancelToken) -> Result<BundleOutput> {
        match self.write_artifacts(plan, cancel) {
            Ok((bundle_path, manifest_path, checksum_path, file_count)) => {
                let result_id = self.catalog.record_archive_result(&self.result(
                    plan,
                    GenerationResult::Success,
                    format!("{} files", file_count),
                ))?;
                info!(
                    target_dir = %plan.target_dir.display(),
                    files = file_count,
                    dry_run = plan.dry_run,
                    "Bundle written"
                );
                Ok(BundleOutput {
                    bundle_path,
                    manifest_path,
                    checksum_path,
                    file_count,
                    result_id,
                })
            }
            Err(err) => {
                error!(target_dir = %plan.target_dir.display(), error = %err, "Bundle failed");
                let notes = format!("bundle failed: {}\n{:?}", err, err);
                if let Err(record_err) =
                    self.catalog
                        .record_archive_result(&self.result(plan, GenerationResult::Failure, notes))
                {
                    error!(error = %record_err, "Failed to record bundle failure");
                }
                Err(err)
            }
        }
    }

    fn result(&self, plan: &BundlePlan, outcome: GenerationResult, notes: String) -> ArchiveResult {
        ArchiveResult {
            id: None,
            generation_time: Utc::now(),
            window_start: plan.window_start,
            window_end: plan.window_end,
            command_line: plan.command_line.clone(),
            configuration_blob: plan.configuration_blob.clone(),
            dry_run: plan.dry_run,
            result_directory: plan.target_dir.to_string_lossy().into_owned(),
            bundle_file_name: (!plan.dry_run).then(|| plan.names.bundle.clone()),
            manifest_file_name: Some(plan.names.manifest.clone()),
            checksum_file_name: Some(plan.names.checksum.clone()),
            result_version: plan.version.unwrap_or(0),
            generation_result: outcome,
            pds_status: None,
            notes,
        }
    }

    fn write_artifacts(
        &self,
        plan: &BundlePlan,
        cancel: &CancelToken,
    ) -> Result<(Option<PathBuf>, PathBuf, PathBuf, usize)> {
        fsops::create_dir_0755(&plan.target_dir)?;
        let bundle_path = plan.target_dir.join(&plan.names.bundle);

        let mut archive = if plan.dry_run {
            None
        } else {
            let tmp = tempfile::Builder::new()
                .prefix(".sdc-bundle-")
                .tempfile_in(&plan.target_dir)?;
            let encoder = GzEncoder::new(BufWriter::new(tmp.reopen()?), Compression::default());
            Some((tmp, tar::Builder::new(encoder)))
        };

        let mut listed_paths: HashMap<&Path, PathBuf> = HashMap::new();
        let mut sources: HashMap<String, &Path> = HashMap::new();
        let mut digests = Vec::with_capacity(plan.files.len());
        for path in &plan.files {
            cancel.check()?;
            if !path.is_file() {
                return Err(SdcError::InvalidState(format!(
                    "bundle input {} is not a regular file",
                    path.display()
                )));
            }
            let compressed = fsops::is_gzip(path)?;
            let name = entry_name(path, compressed);
            if let Some(previous) = sources.insert(name.clone(), path) {
                return Err(SdcError::InvalidState(format!(
                    "bundle entry {} would come from both {} and {}",
                    name,
                    previous.display(),
                    path.display()
                )));
            }
            let listed = path.with_file_name(&name);

            let md5 = if compressed {
                let unpacked = tempfile::Builder::new()
                    .prefix(".sdc-unzip-")
                    .tempfile_in(&plan.target_dir)?;
                fsops::gunzip_to(path, unpacked.path())?;
                let md5 = fsops::md5_file(unpacked.path())?;
                if let Some((_, builder)) = archive.as_mut() {
                    builder.append_path_with_name(unpacked.path(), &name)?;
                }
                md5
            } else {
                if let Some((_, builder)) = archive.as_mut() {
                    builder.append_path_with_name(path, &name)?;
                }
                fsops::md5_file(path)?
            };
            if archive.is_none() {
                info!(file = %path.display(), entry = %name, "Would add to bundle");
            } else {
                debug!(file = %path.display(), entry = %name, "Added to bundle");
            }
            listed_paths.insert(path, listed.clone());
            digests.push((md5, listed));
        }

        if let Some((tmp, builder)) = archive.take() {
            let encoder = builder.into_inner()?;
            let mut out = encoder.finish()?;
            out.flush()?;
            out.get_ref().sync_all()?;
            drop(out);
            tmp.persist(&bundle_path).map_err(|err| err.error)?;
            fsops::ensure_world_readable(&bundle_path)?;
        }

        let pairs: Vec<(String, String)> = plan
            .lidvid_pairs
            .iter()
            .map(|(lid, path)| {
                let listed = listed_paths.get(path.as_path()).unwrap_or(path);
                (lid.clone(), listed.display().to_string())
            })
            .collect();
        let manifest_path = plan.target_dir.join(&plan.names.manifest);
        write_text(&manifest_path, &transfer_manifest(&pairs))?;
        let checksum_path = plan.target_dir.join(&plan.names.checksum);
        write_text(&checksum_path, &checksum_manifest(&digests))?;

        let bundle_path = (!plan.dry_run).then_some(bundle_path);
        Ok((bundle_path, manifest_path, checksum_path, plan.files.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use flate2::read::GzDecoder;
    use sdc_catalog::SqliteCatalog;
    use std::io::Read;
    use tempfile::TempDir;

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        (
            Utc.with_ymd_and_hms(2014, 3, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2014, 4, 1, 0, 0, 0).unwrap(),
        )
    }

    fn plan(tmp: &TempDir, files: Vec<PathBuf>, dry_run: bool) -> BundlePlan {
        let (start, end) = window();
        let target_dir = tmp.path().join("arc/swe");
        let version = next_version(&target_dir, "swe", start, end).unwrap();
        BundlePlan {
            target_dir,
            window_start: start,
            window_end: end,
            lidvid_pairs: files
                .iter()
                .enumerate()
                .map(|(i, f)| (format!("urn:nasa:pds:b:c:p{}::1.{}", i, i * 10), f.clone()))
                .collect(),
            files,
            names: ArtifactNames::new("swe", start, end, version),
            version,
            command_line: "sdc archive swe".to_string(),
            configuration_blob: "{}".to_string(),
            dry_run,
        }
    }

    #[test]
    fn test_artifact_names() {
        let (start, end) = window();
        let names = ArtifactNames::new("swe", start, end, None);
        assert_eq!(
            names.bundle,
            "swe-pds_bundle_2014-03-01-00-00-00_2014-04-01-00-00-00.tgz"
        );
        assert_eq!(
            ArtifactNames::new("swe", start, end, Some(2)).checksum,
            "checksum_swe_2014-03-01-00-00-00_2014-04-01-00-00-00.txt.2"
        );
    }

    #[test]
    fn test_transfer_manifest_pads_to_widest_lid() {
        let text = transfer_manifest(&[
            ("urn:a::1.0".to_string(), "a.cdf".to_string()),
            ("urn:bbbb::1.0".to_string(), "b.cdf".to_string()),
        ]);
        assert_eq!(text, "urn:a::1.0     a.cdf\nurn:bbbb::1.0  b.cdf\n");
    }

    #[test]
    fn test_bundle_round_trip_and_versioning() {
        let tmp = TempDir::new().unwrap();
        let plain = tmp.path().join("mvn_swe_l2_svy3d_20140320_v01_r00.cdf");
        fs::write(&plain, b"plain bytes").unwrap();
        let gz = tmp.path().join("mvn_swe_l2_svy3d_20140321_v01_r00.cdf.gz");
        let mut encoder = GzEncoder::new(File::create(&gz).unwrap(), Compression::default());
        encoder.write_all(b"zipped bytes").unwrap();
        encoder.finish().unwrap();

        let catalog = SqliteCatalog::open_in_memory().unwrap();
        let writer = BundleWriter::new(&catalog);
        let first = plan(&tmp, vec![plain.clone(), gz.clone()], false);
        let output = writer.write(&first, &CancelToken::new()).unwrap();
        assert_eq!(output.file_count, 2);

        let mut archive = tar::Archive::new(GzDecoder::new(File::open(output.bundle_path.unwrap()).unwrap()));
        let mut unpacked = Vec::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let name = entry.path().unwrap().to_string_lossy().into_owned();
            let mut bytes = Vec::new();
            entry.read_to_end(&mut bytes).unwrap();
            unpacked.push((name, format!("{:x}", md5::compute(&bytes))));
        }
        assert_eq!(
            unpacked,
            vec![
                ("mvn_swe_l2_svy3d_20140320_v01_r00.cdf".to_string(), format!("{:x}", md5::compute(b"plain bytes"))),
                ("mvn_swe_l2_svy3d_20140321_v01_r00.cdf".to_string(), format!("{:x}", md5::compute(b"zipped bytes"))),
            ]
        );

        let checksums = fs::read_to_string(&output.checksum_path).unwrap();
        for ((_, md5), line) in unpacked.iter().zip(checksums.lines()) {
            assert!(line.starts_with(&format!("{}  ", md5)));
        }
        let manifest = fs::read_to_string(&output.manifest_path).unwrap();
        let listed_gz = tmp.path().join("mvn_swe_l2_svy3d_20140321_v01_r00.cdf");
        assert!(manifest.contains(&format!("urn:nasa:pds:b:c:p1::1.10  {}\n", listed_gz.display())));
        assert!(!tmp.path().join("arc/swe").read_dir().unwrap().flatten().any(|e| e
            .file_name()
            .to_string_lossy()
            .starts_with(".sdc-")));

        let second = plan(&tmp, vec![plain], false);
        assert_eq!(second.version, Some(1));
        assert!(second.names.bundle.ends_with(".tgz.1"));
        let results = catalog.archive_results().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].generation_result, GenerationResult::Success);
    }

    #[test]
    fn test_dry_run_writes_manifests_only() {
        let tmp = TempDir::new().unwrap();
        let plain = tmp.path().join("a.cdf");
        fs::write(&plain, b"x").unwrap();
        let catalog = SqliteCatalog::open_in_memory().unwrap();

        let output = BundleWriter::new(&catalog)
            .write(&plan(&tmp, vec![plain], true), &CancelToken::new())
            .unwrap();
        assert_eq!(output.bundle_path, None);
        assert!(output.manifest_path.exists());
        assert!(output.checksum_path.exists());
        assert!(catalog.archive_results().unwrap()[0].dry_run);
    }

    #[test]
    fn test_same_entry_name_from_two_directories_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let name = "mvn_swe_l2_svy3d_20140320_v01_r00.cdf";
        let mut files = Vec::new();
        for dir in ["a", "b"] {
            fs::create_dir_all(tmp.path().join(dir)).unwrap();
            let path = tmp.path().join(dir).join(name);
            fs::write(&path, dir.as_bytes()).unwrap();
            files.push(path);
        }
        let catalog = SqliteCatalog::open_in_memory().unwrap();

        let bundle = plan(&tmp, files, false);
        let result = BundleWriter::new(&catalog).write(&bundle, &CancelToken::new());
        assert!(matches!(result, Err(SdcError::InvalidState(_))));
        assert!(!bundle.target_dir.join(&bundle.names.bundle).exists());
        let results = catalog.archive_results().unwrap();
        assert_eq!(results[0].generation_result, GenerationResult::Failure);
    }

    #[test]
    fn test_failure_is_recorded_and_returned() {
        let tmp = TempDir::new().unwrap();
        let catalog = SqliteCatalog::open_in_memory().unwrap();
        let missing = tmp.path().join("missing.cdf");

        let result = BundleWriter::new(&catalog).write(&plan(&tmp, vec![missing], false), &CancelToken::new());
        assert!(result.is_err());
        let results = catalog.archive_results().unwrap();
        assert_eq!(results[0].generation_result, GenerationResult::Failure);
        assert!(results[0].notes.contains("missing.cdf"));
    }
}
