//! NDJSON-backed journal and status log.
//!
//! Every line is an [`Envelope`] carrying a schema version, a per-writer
//! monotonically increasing sequence number and the record itself.

use crate::{
    JournalError, MoveJournal, MoveJournalEntry, Result, StatusEvent, StatusEventId, StatusSink,
    SCHEMA_VERSION,
};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
struct Envelope<T> {
    schema_version: u32,
    record_id: String,
    seq: u64,
    written_at: DateTime<Utc>,
    record: T,
}

/// Append-only NDJSON writer shared by the journal and the status log.
struct NdjsonWriter {
    path: PathBuf,
    file: Mutex<File>,
    seq: AtomicU64,
    sync_each: bool,
}

impl NdjsonWriter {
    fn open(path: &Path, sync_each: bool) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            seq: AtomicU64::new(0),
            sync_each,
        })
    }

    fn write<T: Serialize>(&self, record: &T) -> Result<()> {
        let envelope = Envelope {
            schema_version: SCHEMA_VERSION,
            record_id: Uuid::new_v4().to_string(),
            seq: self.seq.fetch_add(1, Ordering::SeqCst),
            written_at: Utc::now(),
            record,
        };
        let mut line = serde_json::to_string(&envelope)?;
        line.push('\n');

        let mut file = self.file.lock().map_err(|_| JournalError::LockError)?;
        file.write_all(line.as_bytes())?;
        file.flush()?;
        if self.sync_each {
            file.sync_data()?;
        }
        Ok(())
    }
}

/// Move journal persisted as NDJSON; each append is fsynced.
pub struct JsonlMoveJournal {
    writer: NdjsonWriter,
}

impl JsonlMoveJournal {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            writer: NdjsonWriter::open(path, true)?,
        })
    }

    pub fn path(&self) -> &Path {
        &self.writer.path
    }
}

impl MoveJournal for JsonlMoveJournal {
    fn append(&self, entry: &MoveJournalEntry) -> Result<()> {
        self.writer.write(entry)
    }
}

/// Status log persisted as NDJSON.
pub struct JsonlStatusSink {
    writer: NdjsonWriter,
}

impl JsonlStatusSink {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            writer: NdjsonWriter::open(path, false)?,
        })
    }
}

impl StatusSink for JsonlStatusSink {
    fn record(&self, component: &str, event_id: StatusEventId, summary: &str, description: &str) {
        let event = StatusEvent::new(component, event_id, summary, description);
        if let Err(err) = self.writer.write(&event) {
            warn!(
                path = %self.writer.path.display(),
                error = %err,
                "Failed to record status event"
            );
        }
    }
}

fn read_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let envelope: Envelope<T> = serde_json::from_str(&line)?;
        records.push(envelope.record);
    }
    Ok(records)
}

/// Read every entry of an NDJSON move journal in write order.
pub fn read_move_journal(path: &Path) -> Result<Vec<MoveJournalEntry>> {
    read_records(path)
}

/// Read every event of an NDJSON status log in write order.
pub fn read_status_log(path: &Path) -> Result<Vec<StatusEvent>> {
    read_records(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn entry(name: &str) -> MoveJournalEntry {
        MoveJournalEntry {
            when_moved: Utc::now(),
            src: PathBuf::from(format!("/drop/{}", name)),
            dest: PathBuf::from(format!("/data/{}", name)),
            md5: "d41d8cd98f00b204e9800998ecf8427e".to_string(),
            size: 0,
        }
    }

    #[test]
    fn test_journal_appends_in_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("moves.ndjson");

        let journal = JsonlMoveJournal::open(&path).unwrap();
        journal.append(&entry("a.cdf")).unwrap();
        journal.append(&entry("b.cdf")).unwrap();

        let entries = read_move_journal(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].dest, PathBuf::from("/data/a.cdf"));
        assert_eq!(entries[1].dest, PathBuf::from("/data/b.cdf"));

        let contents = fs::read_to_string(&path).unwrap();
        for (i, line) in contents.lines().enumerate() {
            let envelope: Envelope<MoveJournalEntry> = serde_json::from_str(line).unwrap();
            assert_eq!(envelope.seq, i as u64);
            assert_eq!(envelope.schema_version, SCHEMA_VERSION);
        }
        assert!(contents.ends_with('\n'));
    }

    #[test]
    fn test_journal_reopen_appends() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("moves.ndjson");

        JsonlMoveJournal::open(&path)
            .unwrap()
            .append(&entry("a.cdf"))
            .unwrap();
        JsonlMoveJournal::open(&path)
            .unwrap()
            .append(&entry("b.cdf"))
            .unwrap();

        assert_eq!(read_move_journal(&path).unwrap().len(), 2);
    }

    #[test]
    fn test_status_log_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("status.ndjson");

        let sink = JsonlStatusSink::open(&path).unwrap();
        sink.record("dropbox", StatusEventId::Start, "sweep started", "/drop");
        sink.record("dropbox", StatusEventId::Fail, "invalid name", "junk.txt");

        let events = read_status_log(&path).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_id, StatusEventId::Start);
        assert_eq!(events[1].event_id, StatusEventId::Fail);
        assert_eq!(events[1].description, "junk.txt");
    }
}
