//! `sdc`: batch front-end for the MAVEN SDC file pipeline.
//!
//! ```text
//! sdc route                       drain every configured dropbox once
//! sdc reindex [--dry-run]         reconcile the catalog with the sweep roots
//! sdc archive <key> --start --end bundle one instrument (or all/anc/events)
//! sdc release <names>... | --clear
//! ```
//!
//! Exit codes: 0 success, 1 failure, 2 configuration error.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use sdc::archive::{ArchiveRequest, ArchiveRunner};
use sdc::{CancelToken, Indexer, PipelineConfig, Router, SdcError};
use sdc_catalog::{Catalog, SqliteCatalog};
use sdc_journal::{FanoutStatusSink, JsonlMoveJournal, JsonlStatusSink, MoveJournal, StatusSink, TracingStatusSink};
use sdc_logging::{init_logging, LogConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

const EXIT_FAILURE: u8 = 1;
const EXIT_CONFIG: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "sdc", about = "MAVEN SDC file pipeline")]
struct Cli {
    /// Pipeline configuration (TOML); defaults apply when omitted
    #[arg(short, long, global = true, env = "SDC_CONFIG")]
    config: Option<PathBuf>,

    /// Debug logging on stderr
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Route every stable file in the configured dropboxes
    Route,

    /// Reconcile the catalog with the files under the sweep roots
    Reindex {
        /// Report changes without touching the catalog
        #[arg(long)]
        dry_run: bool,

        /// Roots to sweep instead of the configured ones
        roots: Vec<PathBuf>,
    },

    /// Build an archive bundle for an instrument or special key
    Archive {
        /// Instrument name, or the configured all/ancillary/event key
        key: String,

        /// Window start, RFC 3339 or YYYY-MM-DD
        #[arg(long, value_parser = parse_time)]
        start: DateTime<Utc>,

        /// Window end (exclusive)
        #[arg(long, value_parser = parse_time)]
        end: DateTime<Utc>,

        /// Write manifests only
        #[arg(long)]
        dry_run: bool,
    },

    /// Flag files as publicly released
    Release {
        /// File names to flag
        names: Vec<String>,

        /// Read additional names, one per line
        #[arg(long)]
        from_file: Option<PathBuf>,

        /// Clear every released flag instead
        #[arg(long, conflicts_with_all = ["names", "from_file"])]
        clear: bool,
    },
}

fn parse_time(raw: &str) -> std::result::Result<DateTime<Utc>, String> {
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Ok(t.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|t| t.and_utc())
        .ok_or_else(|| format!("expected RFC 3339 or YYYY-MM-DD, got '{}'", raw))
}

/// Ports shared by every command.
struct Ports {
    catalog: Arc<SqliteCatalog>,
    status: Arc<dyn StatusSink>,
    journal: Arc<dyn MoveJournal>,
}

fn open_ports(config: &PipelineConfig) -> Result<Ports> {
    let catalog = Arc::new(
        SqliteCatalog::from_dsn(&config.ports.catalog_dsn)
            .with_context(|| format!("Failed to open catalog {}", config.ports.catalog_dsn))?,
    );

    let mut status = FanoutStatusSink::new()
        .with(Arc::new(TracingStatusSink))
        .with(catalog.clone());
    if let Some(path) = &config.ports.status_log {
        let sink = JsonlStatusSink::open(path)
            .with_context(|| format!("Failed to open status log {}", path.display()))?;
        status = status.with(Arc::new(sink));
    }

    let journal: Arc<dyn MoveJournal> = match &config.ports.move_journal {
        Some(path) => Arc::new(
            JsonlMoveJournal::open(path)
                .with_context(|| format!("Failed to open move journal {}", path.display()))?,
        ),
        None => catalog.clone(),
    };

    Ok(Ports {
        catalog,
        status: Arc::new(status),
        journal,
    })
}

fn load_config(path: Option<&PathBuf>) -> sdc::Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::load(path),
        None => {
            let config = PipelineConfig::default();
            config.validate()?;
            Ok(config)
        }
    }
}

fn install_cancel_handler() -> CancelToken {
    let cancel = CancelToken::new();
    let flag = cancel.clone();
    if let Err(err) = ctrlc::set_handler(move || {
        info!("Received Ctrl+C, finishing the current file");
        flag.cancel();
    }) {
        warn!("Failed to install Ctrl+C handler: {}", err);
    }
    cancel
}

fn run_command(command: Commands, config: &PipelineConfig) -> Result<()> {
    let ports = open_ports(config)?;
    let cancel = install_cancel_handler();

    match command {
        Commands::Route => {
            let router = Router::new(&config.router, ports.journal.clone(), ports.status.clone())
                .with_catalog(ports.catalog.clone());
            let summaries = router.route_all(&cancel).context("Dropbox sweep failed")?;
            for summary in &summaries {
                println!(
                    "{}: landed={} removed={} archived={} quarantined={} unstable={} failed={} [{}]",
                    summary.root.display(),
                    summary.landed,
                    summary.removed,
                    summary.archived,
                    summary.quarantined,
                    summary.skipped_unstable,
                    summary.failures.len(),
                    summary.policy_line()
                );
            }
        }
        Commands::Reindex { dry_run, roots } => {
            let roots = if roots.is_empty() {
                config.indexer.sweep_roots.clone()
            } else {
                roots
            };
            let indexer = Indexer::new(ports.catalog.clone(), ports.status.clone());
            let report = indexer.reindex(&roots, dry_run, &cancel).context("Reindex failed")?;
            println!(
                "inserted={} updated={} deleted={} unchanged={} unclassified={} failed={}{}",
                report.inserted,
                report.updated,
                report.deleted,
                report.unchanged,
                report.unclassified,
                report.failed(),
                if dry_run { " (dry run)" } else { "" }
            );
            for failure in &report.failures {
                eprintln!("{}: {}", failure.path.display(), failure.message);
            }
        }
        Commands::Archive {
            key,
            start,
            end,
            dry_run,
        } => {
            let request = ArchiveRequest {
                key,
                start,
                end,
                dry_run,
                command_line: std::env::args().collect::<Vec<_>>().join(" "),
            };
            let runner = ArchiveRunner::new(&config.archive, ports.catalog.clone(), ports.status.clone())
                .with_timeline(ports.catalog.clone());
            let runs = runner.run(&request, &cancel).context("Archive run failed")?;
            for run in &runs {
                match &run.output {
                    Some(output) => println!(
                        "{}: {} files -> {}",
                        run.prefix,
                        output.file_count,
                        output
                            .bundle_path
                            .as_ref()
                            .unwrap_or(&output.manifest_path)
                            .display()
                    ),
                    None => println!("{}: nothing selected", run.prefix),
                }
                for lidvid in &run.missing {
                    println!("  missing: {}", lidvid);
                }
            }
        }
        Commands::Release {
            mut names,
            from_file,
            clear,
        } => {
            if clear {
                let cleared = ports.catalog.clear_released()?;
                println!("cleared {} released flags", cleared);
                return Ok(());
            }
            if let Some(path) = from_file {
                let text = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                names.extend(
                    text.lines()
                        .map(str::trim)
                        .filter(|l| !l.is_empty())
                        .map(str::to_string),
                );
            }
            let marked = ports.catalog.mark_released(&names)?;
            println!("marked {} of {} names released", marked, names.len());
        }
    }
    Ok(())
}

fn is_config_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<SdcError>(),
            Some(SdcError::Config(_)) | Some(SdcError::UnknownInstrument(_))
        )
    })
}

/// One log file per command; archive runs also split by key.
fn log_config(cli: &Cli) -> LogConfig {
    let config = match &cli.command {
        Commands::Route => LogConfig::for_command("route"),
        Commands::Reindex { .. } => LogConfig::for_command("reindex"),
        Commands::Archive { key, .. } => LogConfig::for_command("archive").scoped(key),
        Commands::Release { .. } => LogConfig::for_command("release"),
    };
    config.verbose(cli.verbose)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let run_log = match init_logging(&log_config(&cli)) {
        Ok(run_log) => Some(run_log),
        Err(err) => {
            eprintln!("Warning: failed to initialize logging: {:?}", err);
            None
        }
    };
    let _run = run_log.as_ref().map(|run_log| run_log.span().clone().entered());
    let log_hint = || {
        if let Some(run_log) = &run_log {
            eprintln!("See {} (run {})", run_log.path.display(), run_log.run_id);
        }
    };

    let config = match load_config(cli.config.as_ref()) {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "Invalid configuration");
            eprintln!("Configuration error: {}", err);
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    match run_command(cli.command, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) if is_config_error(&err) => {
            eprintln!("Configuration error: {:?}", err);
            ExitCode::from(EXIT_CONFIG)
        }
        Err(err) => {
            error!(error = %err, "Command failed");
            eprintln!("{:?}", err);
            log_hint();
            ExitCode::from(EXIT_FAILURE)
        }
    }
}
