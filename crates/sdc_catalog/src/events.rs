//! Mission and operations event timelines.

use crate::error::{CatalogError, Result};
use crate::store::{millis_to_datetime, SqliteCatalog};
use crate::types::{MissionEvent, OpsEvent};
use chrono::{DateTime, Utc};
use rusqlite::params;

/// Read-only queries over mission event timelines.
///
/// An event overlaps `[t0, t1)` when it starts before `t1` and ends at or
/// after `t0`. Results are ordered by start time.
pub trait EventTimeline: Send + Sync {
    fn events_overlapping(&self, t0: DateTime<Utc>, t1: DateTime<Utc>) -> Result<Vec<MissionEvent>>;

    fn ops_events_overlapping(&self, t0: DateTime<Utc>, t1: DateTime<Utc>) -> Result<Vec<OpsEvent>>;
}

impl SqliteCatalog {
    pub fn insert_mission_event(&self, event: &MissionEvent) -> Result<i64> {
        let conn = self.connection();
        let conn = conn.lock().map_err(|_| CatalogError::LockPoisoned)?;
        conn.execute(
            "INSERT INTO mission_events (event_type, start_time, end_time, orbit_number, description) \
             VALUES (?, ?, ?, ?, ?)",
            params![
                event.event_type,
                event.start.timestamp_millis(),
                event.end.timestamp_millis(),
                event.orbit_number,
                event.description,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn insert_ops_event(&self, event: &OpsEvent) -> Result<i64> {
        let conn = self.connection();
        let conn = conn.lock().map_err(|_| CatalogError::LockPoisoned)?;
        conn.execute(
            "INSERT INTO ops_events (event_type, start_time, end_time, subsystem, description) \
             VALUES (?, ?, ?, ?, ?)",
            params![
                event.event_type,
                event.start.timestamp_millis(),
                event.end.timestamp_millis(),
                event.subsystem,
                event.description,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }
}

impl EventTimeline for SqliteCatalog {
    fn events_overlapping(&self, t0: DateTime<Utc>, t1: DateTime<Utc>) -> Result<Vec<MissionEvent>> {
        let conn = self.connection();
        let conn = conn.lock().map_err(|_| CatalogError::LockPoisoned)?;
        let mut stmt = conn.prepare(
            "SELECT id, event_type, start_time, end_time, orbit_number, description \
             FROM mission_events WHERE start_time < ? AND end_time >= ? \
             ORDER BY start_time, id",
        )?;
        let rows = stmt.query_map(params![t1.timestamp_millis(), t0.timestamp_millis()], |row| {
            Ok(MissionEvent {
                id: Some(row.get(0)?),
                event_type: row.get(1)?,
                start: millis_to_datetime(row.get(2)?),
                end: millis_to_datetime(row.get(3)?),
                orbit_number: row.get(4)?,
                description: row.get(5)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    fn ops_events_overlapping(&self, t0: DateTime<Utc>, t1: DateTime<Utc>) -> Result<Vec<OpsEvent>> {
        let conn = self.connection();
        let conn = conn.lock().map_err(|_| CatalogError::LockPoisoned)?;
        let mut stmt = conn.prepare(
            "SELECT id, event_type, start_time, end_time, subsystem, description \
             FROM ops_events WHERE start_time < ? AND end_time >= ? \
             ORDER BY start_time, id",
        )?;
        let rows = stmt.query_map(params![t1.timestamp_millis(), t0.timestamp_millis()], |row| {
            Ok(OpsEvent {
                id: Some(row.get(0)?),
                event_type: row.get(1)?,
                start: millis_to_datetime(row.get(2)?),
                end: millis_to_datetime(row.get(3)?),
                subsystem: row.get(4)?,
                description: row.get(5)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }
}
