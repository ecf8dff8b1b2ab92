//! SDC Test Utilities
//!
//! Temporary mission trees for router, indexer and archive tests.
//!
//! ```rust,ignore
//! use sdc_test_utils::TestTree;
//!
//! let tree = TestTree::new()?;
//! let drop = tree.mkdir("drop")?;
//! // Old enough to pass the router's stability check
//! tree.write_aged("drop/mvn_swe_l2_svy3d_20140320_v01_r03.cdf", &[0u8; 64], 3600)?;
//! ```

use anyhow::{Context, Result};
use filetime::FileTime;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

/// Default age for files that must look settled, in seconds.
pub const SETTLED_AGE_SECS: u64 = 3600;

/// A temporary directory tree, removed on drop.
pub struct TestTree {
    dir: TempDir,
}

impl TestTree {
    pub fn new() -> Result<Self> {
        Ok(Self {
            dir: TempDir::new().context("Failed to create temp dir")?,
        })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn path(&self, rel: impl AsRef<Path>) -> PathBuf {
        self.dir.path().join(rel)
    }

    pub fn mkdir(&self, rel: impl AsRef<Path>) -> Result<PathBuf> {
        let path = self.path(rel);
        fs::create_dir_all(&path).with_context(|| format!("Failed to create {}", path.display()))?;
        Ok(path)
    }

    /// Write `bytes` to `rel`, creating parent directories.
    pub fn write(&self, rel: impl AsRef<Path>, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.path(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, bytes).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }

    /// Write a file whose mtime is `age_secs` in the past.
    pub fn write_aged(&self, rel: impl AsRef<Path>, bytes: &[u8], age_secs: u64) -> Result<PathBuf> {
        let path = self.write(rel, bytes)?;
        age(&path, age_secs)?;
        Ok(path)
    }

    /// Write `bytes` gzip-compressed, aged like [`TestTree::write_aged`].
    pub fn write_gz(&self, rel: impl AsRef<Path>, bytes: &[u8], age_secs: u64) -> Result<PathBuf> {
        let path = self.write(rel, &gzip(bytes)?)?;
        age(&path, age_secs)?;
        Ok(path)
    }

    pub fn read(&self, rel: impl AsRef<Path>) -> Result<Vec<u8>> {
        let path = self.path(rel);
        fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))
    }

    /// Relative paths of every regular file under `rel`, sorted.
    pub fn files_under(&self, rel: impl AsRef<Path>) -> Result<Vec<String>> {
        let base = self.path(rel);
        let mut found = Vec::new();
        collect_files(&base, &base, &mut found)?;
        found.sort();
        Ok(found)
    }
}

fn collect_files(base: &Path, dir: &Path, found: &mut Vec<String>) -> Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(base, &path, found)?;
        } else if let Ok(rel) = path.strip_prefix(base) {
            found.push(rel.to_string_lossy().into_owned());
        }
    }
    Ok(())
}

/// Push `path`'s mtime `age_secs` into the past.
pub fn age(path: &Path, age_secs: u64) -> Result<()> {
    let when = SystemTime::now() - Duration::from_secs(age_secs);
    filetime::set_file_mtime(path, FileTime::from_system_time(when))
        .with_context(|| format!("Failed to set mtime of {}", path.display()))
}

pub fn gzip(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    Ok(encoder.finish()?)
}

/// Deterministic filler of `len` bytes; different seeds give different bytes.
pub fn payload(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

pub fn md5_hex(bytes: &[u8]) -> String {
    format!("{:x}", md5::compute(bytes))
}
