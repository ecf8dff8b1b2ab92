//! In-process and composite sinks.

use crate::{
    JournalError, MoveJournal, MoveJournalEntry, Result, StatusEvent, StatusEventId, StatusSink,
};
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

/// Journal that keeps entries in memory. Used by tests and dry runs.
#[derive(Default)]
pub struct MemoryJournal {
    entries: Mutex<Vec<MoveJournalEntry>>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<MoveJournalEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MoveJournal for MemoryJournal {
    fn append(&self, entry: &MoveJournalEntry) -> Result<()> {
        self.entries
            .lock()
            .map_err(|_| JournalError::LockError)?
            .push(entry.clone());
        Ok(())
    }
}

/// Status sink that keeps events in memory.
#[derive(Default)]
pub struct MemoryStatusSink {
    events: Mutex<Vec<StatusEvent>>,
}

impl MemoryStatusSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StatusEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Events with the given id, in record order.
    pub fn events_with_id(&self, event_id: StatusEventId) -> Vec<StatusEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.event_id == event_id)
            .collect()
    }
}

impl StatusSink for MemoryStatusSink {
    fn record(&self, component: &str, event_id: StatusEventId, summary: &str, description: &str) {
        if let Ok(mut events) = self.events.lock() {
            events.push(StatusEvent::new(component, event_id, summary, description));
        }
    }
}

/// Status sink that only emits `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingStatusSink;

impl StatusSink for TracingStatusSink {
    fn record(&self, component: &str, event_id: StatusEventId, summary: &str, description: &str) {
        match event_id {
            StatusEventId::Fail => {
                error!(component, event = %event_id, description, "{}", summary)
            }
            StatusEventId::Progress => {
                info!(component, event = %event_id, "{}", summary)
            }
            _ => info!(component, event = %event_id, description, "{}", summary),
        }
    }
}

/// Forwards every event to each inner sink.
#[derive(Default, Clone)]
pub struct FanoutStatusSink {
    sinks: Vec<Arc<dyn StatusSink>>,
}

impl FanoutStatusSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl StatusSink for FanoutStatusSink {
    fn record(&self, component: &str, event_id: StatusEventId, summary: &str, description: &str) {
        if self.sinks.is_empty() {
            warn!(component, event = %event_id, "No status sinks configured; dropping event");
            return;
        }
        for sink in &self.sinks {
            sink.record(component, event_id, summary, description);
        }
    }
}
