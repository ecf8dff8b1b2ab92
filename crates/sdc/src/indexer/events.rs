//! Event-driven catalog updates.
//!
//! A filesystem watcher (outside this crate) turns close-after-write and
//! unlink notifications into [`IndexEvent`]s and feeds them to the worker
//! through a bounded queue. Events are applied in arrival order; errors go
//! back on an outbound queue and never stop the worker.

use super::sweep::mtime_millis;
use crate::error::{retry_once, FileFailure, Result, SdcError};
use crate::fsops;
use crate::naming::{classify, compose_record};
use chrono::{DateTime, Utc};
use sdc_catalog::{Catalog, UpsertOutcome};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexEvent {
    /// A writer closed the file
    Closed { path: PathBuf, at: DateTime<Utc> },
    /// The file was unlinked or moved away
    Removed { path: PathBuf, at: DateTime<Utc> },
}

impl IndexEvent {
    pub fn path(&self) -> &Path {
        match self {
            Self::Closed { path, .. } | Self::Removed { path, .. } => path,
        }
    }
}

/// What applying one event did to the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    Upserted(UpsertOutcome),
    /// `true` when a row was deleted
    Deleted(bool),
    /// Name not recognized; nothing cataloged
    Unclassified,
}

/// Apply one event to the catalog.
///
/// `Closed` re-reads the file's current state: a file that no longer exists is
/// treated as removed.
pub fn apply(catalog: &dyn Catalog, event: &IndexEvent) -> Result<EventOutcome> {
    let path = event.path();
    let (dir, name) = fsops::dir_and_name(path)
        .ok_or_else(|| SdcError::InvalidState(format!("unusable event path {}", path.display())))?;

    if let IndexEvent::Closed { .. } = event {
        match fs::metadata(path) {
            Ok(meta) => {
                let Some(classification) = classify(&name) else {
                    debug!(path = %path.display(), "Unclassified file not cataloged");
                    return Ok(EventOutcome::Unclassified);
                };
                let mtime = DateTime::from_timestamp_millis(mtime_millis(meta.modified()?))
                    .unwrap_or_else(Utc::now);
                let record = compose_record(&classification, &dir, &name, meta.len(), mtime);
                let outcome = retry_once("catalog upsert", || catalog.upsert(&record))?;
                return Ok(EventOutcome::Upserted(outcome));
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "Closed file already gone");
            }
            Err(err) => return Err(err.into()),
        }
    }
    let deleted = retry_once("catalog delete", || catalog.delete_by_path(&dir, &name))?;
    Ok(EventOutcome::Deleted(deleted))
}

/// Handle to a running event worker.
pub struct EventIndexer {
    sender: SyncSender<IndexEvent>,
    errors: Receiver<FileFailure>,
    handle: JoinHandle<usize>,
}

impl EventIndexer {
    /// Start a worker thread draining a queue of `capacity` events.
    pub fn spawn(catalog: Arc<dyn Catalog>, capacity: usize) -> Result<Self> {
        let (sender, inbound) = mpsc::sync_channel::<IndexEvent>(capacity.max(1));
        let (error_tx, errors) = mpsc::channel::<FileFailure>();
        let handle = thread::Builder::new()
            .name("sdc-event-indexer".to_string())
            .spawn(move || {
                let mut applied = 0usize;
                while let Ok(event) = inbound.recv() {
                    match apply(catalog.as_ref(), &event) {
                        Ok(outcome) => {
                            applied += 1;
                            debug!(path = %event.path().display(), ?outcome, "Applied event");
                        }
                        Err(err) => {
                            warn!(path = %event.path().display(), error = %err, "Event failed");
                            let _ = error_tx.send(FileFailure::new(event.path(), err));
                        }
                    }
                }
                info!(applied, "Event indexer stopped");
                applied
            })?;
        Ok(Self {
            sender,
            errors,
            handle,
        })
    }

    /// Queue an event, blocking while the queue is full.
    pub fn send(&self, event: IndexEvent) -> Result<()> {
        self.sender
            .send(event)
            .map_err(|_| SdcError::InvalidState("event indexer has stopped".to_string()))
    }

    /// A sender for another producer thread.
    pub fn sender(&self) -> SyncSender<IndexEvent> {
        self.sender.clone()
    }

    /// Errors reported so far, without blocking.
    pub fn drain_errors(&self) -> Vec<FileFailure> {
        self.errors.try_iter().collect()
    }

    /// Close the queue, wait for queued events to be applied, and return the
    /// number applied successfully together with any unread errors.
    pub fn shutdown(self) -> Result<(usize, Vec<FileFailure>)> {
        let Self {
            sender,
            errors,
            handle,
        } = self;
        drop(sender);
        let applied = handle
            .join()
            .map_err(|_| SdcError::InvalidState("Event indexer panicked".to_string()))?;
        Ok((applied, errors.try_iter().collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdc_catalog::{FileQuery, SqliteCatalog};
    use tempfile::TempDir;

    fn closed(path: &Path) -> IndexEvent {
        IndexEvent::Closed {
            path: path.to_path_buf(),
            at: Utc::now(),
        }
    }

    fn removed(path: &Path) -> IndexEvent {
        IndexEvent::Removed {
            path: path.to_path_buf(),
            at: Utc::now(),
        }
    }

    #[test]
    fn test_apply_closed_then_removed() {
        let tmp = TempDir::new().unwrap();
        let catalog = SqliteCatalog::open_in_memory().unwrap();
        let path = tmp.path().join("mvn_swe_l2_svy3d_20140320_v01_r03.cdf");
        fs::write(&path, b"abc").unwrap();

        assert!(matches!(
            apply(&catalog, &closed(&path)).unwrap(),
            EventOutcome::Upserted(UpsertOutcome::Inserted(_))
        ));
        assert!(matches!(
            apply(&catalog, &closed(&path)).unwrap(),
            EventOutcome::Upserted(UpsertOutcome::Updated(_))
        ));

        fs::remove_file(&path).unwrap();
        assert_eq!(apply(&catalog, &removed(&path)).unwrap(), EventOutcome::Deleted(true));
        assert_eq!(apply(&catalog, &removed(&path)).unwrap(), EventOutcome::Deleted(false));
    }

    #[test]
    fn test_apply_unclassified_and_vanished() {
        let tmp = TempDir::new().unwrap();
        let catalog = SqliteCatalog::open_in_memory().unwrap();
        let junk = tmp.path().join("notes.junk");
        fs::write(&junk, b"x").unwrap();
        assert_eq!(apply(&catalog, &closed(&junk)).unwrap(), EventOutcome::Unclassified);

        let gone = tmp.path().join("mvn_swe_l2_svy3d_20140320_v01_r03.cdf");
        assert_eq!(apply(&catalog, &closed(&gone)).unwrap(), EventOutcome::Deleted(false));
    }

    #[test]
    fn test_worker_applies_queue_in_order() {
        let tmp = TempDir::new().unwrap();
        let catalog = Arc::new(SqliteCatalog::open_in_memory().unwrap());
        let worker = EventIndexer::spawn(catalog.clone(), 2).unwrap();

        let mut paths = Vec::new();
        for day in 20..25 {
            let path = tmp.path().join(format!("mvn_swe_l2_svy3d_201403{}_v01_r00.cdf", day));
            fs::write(&path, b"x").unwrap();
            worker.send(closed(&path)).unwrap();
            paths.push(path);
        }
        worker.send(removed(&paths[0])).unwrap();

        let (applied, errors) = worker.shutdown().unwrap();
        assert_eq!(applied, 6);
        assert!(errors.is_empty());
        assert_eq!(catalog.count(&FileQuery::new()).unwrap(), 4);
    }
}
