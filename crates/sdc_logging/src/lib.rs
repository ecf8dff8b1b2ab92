//! Logging for the `sdc` binary.
//!
//! Every command writes its own log file under `$SDC_HOME/logs`:
//! `route.log`, `reindex.log`, `archive-<key>.log`, `release.log`. A file
//! that grows past its size limit is renamed to `<stem>.<UTC stamp>.log`
//! and only the newest rolled files are kept. All events of one invocation
//! are emitted inside a `run` span carrying the command, its scope and a
//! run id, so runs that share a file can be told apart.

use anyhow::{Context, Result};
use chrono::Utc;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::Span;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "sdc=info,sdc_catalog=info,sdc_journal=info";
const VERBOSE_LOG_FILTER: &str = "sdc=debug,sdc_catalog=debug,sdc_journal=debug";
const DEFAULT_MAX_BYTES: u64 = 10 * 1024 * 1024;
const DEFAULT_KEEP: usize = 5;
const ROLL_STAMP_FORMAT: &str = "%Y%m%dT%H%M%S%.3f";

/// Where and how one command logs.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub command: String,
    /// Narrows the log file to one target of the command, e.g. an archive key
    pub scope: Option<String>,
    /// Debug output on stderr
    pub verbose: bool,
    /// Overrides `$SDC_HOME/logs`
    pub log_dir: Option<PathBuf>,
    /// Size at which the live file is rolled
    pub max_bytes: u64,
    /// Rolled files kept per stem
    pub keep: usize,
}

impl LogConfig {
    pub fn for_command(command: &str) -> Self {
        Self {
            command: command.to_string(),
            scope: None,
            verbose: false,
            log_dir: None,
            max_bytes: DEFAULT_MAX_BYTES,
            keep: DEFAULT_KEEP,
        }
    }

    pub fn scoped(mut self, scope: &str) -> Self {
        self.scope = Some(scope.to_string());
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    /// `<command>` or `<command>-<scope>`, safe as a file name.
    pub fn file_stem(&self) -> String {
        let stem = match &self.scope {
            Some(scope) => format!("{}-{}", self.command, scope),
            None => self.command.clone(),
        };
        stem.chars()
            .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '_' })
            .collect()
    }
}

/// The installed log of one invocation.
pub struct RunLog {
    /// Live log file
    pub path: PathBuf,
    pub run_id: String,
    span: Span,
}

impl RunLog {
    /// Span every event of the run should be emitted in.
    pub fn span(&self) -> &Span {
        &self.span
    }
}

/// Install the global subscriber: the command's log file plus stderr.
pub fn init_logging(config: &LogConfig) -> Result<RunLog> {
    let log_dir = match &config.log_dir {
        Some(dir) => dir.clone(),
        None => logs_dir(),
    };
    let stem = config.file_stem();
    let file = RotatingFile::open(&log_dir, &stem, config.max_bytes, config.keep)
        .with_context(|| format!("Failed to open log file {} in {}", stem, log_dir.display()))?;
    let path = file.live_path();

    let file_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let console_filter = if config.verbose {
        EnvFilter::new(VERBOSE_LOG_FILTER)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_filter(console_filter),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    let run_id = format!("{}-{}", Utc::now().format("%Y%m%dT%H%M%S"), std::process::id());
    let span = tracing::info_span!(
        "run",
        command = %config.command,
        scope = config.scope.as_deref().unwrap_or(""),
        run = %run_id,
    );
    Ok(RunLog { path, run_id, span })
}

/// Pipeline home directory: `$SDC_HOME` or `~/.maven_sdc`.
pub fn sdc_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("SDC_HOME") {
        return PathBuf::from(override_path);
    }
    dirs::home_dir()
        .map(|home| home.join(".maven_sdc"))
        .unwrap_or_else(|| PathBuf::from(".maven_sdc"))
}

pub fn logs_dir() -> PathBuf {
    sdc_home().join("logs")
}

/// Append-only log file that rolls over by size.
struct RotatingFile {
    dir: PathBuf,
    stem: String,
    max_bytes: u64,
    keep: usize,
    file: File,
    written: u64,
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

impl RotatingFile {
    fn open(dir: &Path, stem: &str, max_bytes: u64, keep: usize) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.log", stem));
        let file = open_append(&path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            dir: dir.to_path_buf(),
            stem: stem.to_string(),
            max_bytes: max_bytes.max(1),
            keep,
            file,
            written,
        })
    }

    fn live_path(&self) -> PathBuf {
        self.dir.join(format!("{}.log", self.stem))
    }

    fn roll(&mut self) -> io::Result<()> {
        self.file.flush()?;
        let stamp = Utc::now().format(ROLL_STAMP_FORMAT);
        let rolled = self.dir.join(format!("{}.{}.log", self.stem, stamp));
        fs::rename(self.live_path(), rolled)?;
        self.file = open_append(&self.live_path())?;
        self.written = 0;
        self.prune()
    }

    /// Rolled files of this stem, oldest first.
    fn rolled_files(&self) -> io::Result<Vec<PathBuf>> {
        let prefix = format!("{}.", self.stem);
        let mut rolled = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let stamp = name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(".log"))
                .unwrap_or_default();
            let is_stamp = !stamp.is_empty()
                && stamp.chars().all(|c| c.is_ascii_digit() || c == 'T' || c == '.');
            if is_stamp {
                rolled.push(path);
            }
        }
        rolled.sort();
        Ok(rolled)
    }

    fn prune(&self) -> io::Result<()> {
        let rolled = self.rolled_files()?;
        let excess = rolled.len().saturating_sub(self.keep);
        for old in &rolled[..excess] {
            fs::remove_file(old)?;
        }
        Ok(())
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.max_bytes {
            self.roll()?;
        }
        self.file.write_all(buf)?;
        self.written += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}
