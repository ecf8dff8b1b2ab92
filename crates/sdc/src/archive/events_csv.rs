//! Mission and ops event timelines as CSV.

use crate::archive::bundle::ARTIFACT_TIME_FORMAT;
use crate::error::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use sdc_catalog::{EventTimeline, MissionEvent, OpsEvent};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Serialize)]
struct MissionEventRow<'a> {
    event_type: &'a str,
    start: String,
    end: String,
    orbit_number: Option<u32>,
    description: &'a str,
}

#[derive(Debug, Serialize)]
struct OpsEventRow<'a> {
    event_type: &'a str,
    start: String,
    end: String,
    subsystem: Option<&'a str>,
    description: &'a str,
}

fn iso(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn write_rows<T: Serialize>(path: &Path, mut rows: Vec<(String, T)>) -> Result<usize> {
    // ISO-8601 UTC strings sort chronologically
    rows.sort_by(|a, b| a.0.cmp(&b.0));
    let mut writer = csv::Writer::from_path(path)?;
    for (_, row) in &rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(rows.len())
}

/// `serialize` only emits headers along with the first row.
fn write_header_only(path: &Path, headers: &[&str]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(headers)?;
    writer.flush()?;
    Ok(())
}

pub fn write_mission_events(path: &Path, events: &[MissionEvent]) -> Result<usize> {
    if events.is_empty() {
        write_header_only(path, &["event_type", "start", "end", "orbit_number", "description"])?;
        return Ok(0);
    }
    let rows = events
        .iter()
        .map(|e| {
            let start = iso(e.start);
            let row = MissionEventRow {
                event_type: &e.event_type,
                start: start.clone(),
                end: iso(e.end),
                orbit_number: e.orbit_number,
                description: &e.description,
            };
            (start, row)
        })
        .collect();
    write_rows(path, rows)
}

pub fn write_ops_events(path: &Path, events: &[OpsEvent]) -> Result<usize> {
    if events.is_empty() {
        write_header_only(path, &["event_type", "start", "end", "subsystem", "description"])?;
        return Ok(0);
    }
    let rows = events
        .iter()
        .map(|e| {
            let start = iso(e.start);
            let row = OpsEventRow {
                event_type: &e.event_type,
                start: start.clone(),
                end: iso(e.end),
                subsystem: e.subsystem.as_deref(),
                description: &e.description,
            };
            (start, row)
        })
        .collect();
    write_rows(path, rows)
}

/// Write `mission_events_<start>_<end>.csv` and `ops_events_<start>_<end>.csv`
/// into `dir`, returning both paths.
pub fn write_event_csvs(
    timeline: &dyn EventTimeline,
    dir: &Path,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<PathBuf>> {
    crate::fsops::create_dir_0755(dir)?;
    let span = format!(
        "{}_{}",
        start.format(ARTIFACT_TIME_FORMAT),
        end.format(ARTIFACT_TIME_FORMAT)
    );

    let mission_path = dir.join(format!("mission_events_{}.csv", span));
    let mission = write_mission_events(&mission_path, &timeline.events_overlapping(start, end)?)?;
    let ops_path = dir.join(format!("ops_events_{}.csv", span));
    let ops = write_ops_events(&ops_path, &timeline.ops_events_overlapping(start, end)?)?;

    info!(mission, ops, dir = %dir.display(), "Wrote event timelines");
    Ok(vec![mission_path, ops_path])
}
