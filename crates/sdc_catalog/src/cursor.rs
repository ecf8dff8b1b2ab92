//! Paged streaming cursor over catalog rows.

use crate::error::{CatalogError, Result};
use crate::query::SelectPlan;
use crate::store::record_from_row;
use crate::types::FileRecord;
use rusqlite::types::Value;
use rusqlite::Connection;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Iterator over query results fetched one page at a time.
///
/// The connection lock is only held while a page is being read, so writers
/// interleave with long scans. Each page resumes after the order key of the
/// last row handed out, so every row present for the whole scan is yielded
/// exactly once.
pub struct RecordCursor {
    conn: Arc<Mutex<Connection>>,
    plan: SelectPlan,
    batch_size: usize,
    remaining: Option<u64>,
    /// Order column values of the last row fetched
    after: Option<Vec<Value>>,
    buffer: VecDeque<FileRecord>,
    exhausted: bool,
}

impl RecordCursor {
    pub(crate) fn new(
        conn: Arc<Mutex<Connection>>,
        plan: SelectPlan,
        batch_size: usize,
        limit: Option<u64>,
    ) -> Self {
        Self {
            conn,
            plan,
            batch_size: batch_size.max(1),
            remaining: limit,
            after: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    fn fetch_page(&mut self) -> Result<()> {
        let page = match self.remaining {
            Some(0) => {
                self.exhausted = true;
                return Ok(());
            }
            Some(remaining) => remaining.min(self.batch_size as u64),
            None => self.batch_size as u64,
        };

        let (sql, mut params) = self.plan.page_sql(self.after.as_deref());
        params.push(Value::Integer(page as i64));

        let conn = self.conn.lock().map_err(|_| CatalogError::LockPoisoned)?;
        let mut stmt = conn.prepare_cached(&sql)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(params.iter()))?;
        let mut fetched = 0u64;
        let mut last = None;
        while let Some(row) = rows.next()? {
            self.buffer.push_back(record_from_row(row)?);
            last = Some(
                self.plan
                    .order
                    .iter()
                    .map(|term| row.get::<_, Value>(term.column))
                    .collect::<rusqlite::Result<Vec<_>>>()?,
            );
            fetched += 1;
        }

        if last.is_some() {
            self.after = last;
        }
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= fetched;
        }
        if fetched < page {
            self.exhausted = true;
        }
        Ok(())
    }
}

impl Iterator for RecordCursor {
    type Item = Result<FileRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(err) = self.fetch_page() {
                self.exhausted = true;
                return Some(Err(err));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}
