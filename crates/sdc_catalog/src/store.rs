//! Catalog trait and its SQLite implementation.

use crate::cursor::RecordCursor;
use crate::error::{CatalogError, Result};
use crate::query::FileQuery;
use crate::schema::schema_sql;
use crate::types::{
    ArchiveResult, FileKind, FileRecord, GenerationResult, UpsertOutcome,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use sdc_journal::{
    JournalError, MoveJournal, MoveJournalEntry, StatusEvent, StatusEventId, StatusSink,
};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

/// Streamed query results.
pub type RecordStream = Box<dyn Iterator<Item = Result<FileRecord>> + Send>;

/// Chunk size for `IN (...)` lists, below SQLite's bound parameter limit.
const IN_CHUNK: usize = 500;

/// Durable table of file metadata.
///
/// Every mutating call is one short transaction holding one logical change.
pub trait Catalog: Send + Sync {
    /// Insert the record, or update the row already at `(directory_path, file_name)`.
    fn upsert(&self, record: &FileRecord) -> Result<UpsertOutcome>;

    /// Delete the row for `dir/name`. Returns false when no row existed.
    fn delete_by_path(&self, dir: &str, name: &str) -> Result<bool>;

    fn exists(&self, dir: &str, name: &str) -> Result<bool>;

    fn get(&self, dir: &str, name: &str) -> Result<Option<FileRecord>>;

    /// Stream rows matching `query`, `query.batch_size` rows per page.
    fn query(&self, query: &FileQuery) -> Result<RecordStream>;

    /// Latest row of every family matched by `query`.
    fn latest(&self, query: &FileQuery) -> Result<RecordStream> {
        self.query(&query.clone().latest())
    }

    fn count(&self, query: &FileQuery) -> Result<u64>;

    /// Set `released` on every row whose file name is in `names`.
    fn mark_released(&self, names: &[String]) -> Result<u64>;

    fn clear_released(&self) -> Result<u64>;

    fn record_archive_result(&self, result: &ArchiveResult) -> Result<i64>;
}

/// Convert milliseconds since epoch to DateTime
pub(crate) fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

/// Map a `file_metadata` row (selected with `*`) to a record.
pub(crate) fn record_from_row(row: &Row<'_>) -> Result<FileRecord> {
    let kind_raw: String = row.get("kind")?;
    let kind = FileKind::parse(&kind_raw)
        .ok_or_else(|| CatalogError::invalid_input(format!("Invalid file kind: {}", kind_raw)))?;

    Ok(FileRecord {
        id: Some(row.get("id")?),
        kind,
        instrument: row.get("instrument")?,
        level: row.get("level")?,
        descriptor: row.get("descriptor")?,
        plan: row.get("plan")?,
        orbit: row.get("orbit")?,
        mode: row.get("mode")?,
        data_type: row.get("data_type")?,
        file_name: row.get("file_name")?,
        directory_path: row.get("directory_path")?,
        file_root: row.get("file_root")?,
        file_extension: row.get("file_extension")?,
        file_size: row.get::<_, i64>("file_size")?.max(0) as u64,
        timetag: millis_to_datetime(row.get("timetag")?),
        version: row.get("version")?,
        revision: row.get("revision")?,
        absolute_version: row.get("absolute_version")?,
        mod_date: millis_to_datetime(row.get("mod_date")?),
        released: row.get::<_, i64>("released")? != 0,
    })
}

fn archive_result_from_row(row: &Row<'_>) -> Result<ArchiveResult> {
    let result_raw: String = row.get("generation_result")?;
    let generation_result = GenerationResult::parse(&result_raw).ok_or_else(|| {
        CatalogError::invalid_input(format!("Invalid generation result: {}", result_raw))
    })?;
    Ok(ArchiveResult {
        id: Some(row.get("id")?),
        generation_time: millis_to_datetime(row.get("generation_time")?),
        window_start: millis_to_datetime(row.get("window_start")?),
        window_end: millis_to_datetime(row.get("window_end")?),
        command_line: row.get("command_line")?,
        configuration_blob: row.get("configuration_blob")?,
        dry_run: row.get::<_, i64>("dry_run")? != 0,
        result_directory: row.get("result_directory")?,
        bundle_file_name: row.get("bundle_file_name")?,
        manifest_file_name: row.get("manifest_file_name")?,
        checksum_file_name: row.get("checksum_file_name")?,
        result_version: row.get("result_version")?,
        generation_result,
        pds_status: row.get("pds_status")?,
        notes: row.get("notes")?,
    })
}

/// SQLite-backed catalog.
///
/// Cloning is cheap; clones share one connection.
#[derive(Clone)]
pub struct SqliteCatalog {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCatalog {
    /// Open or create a catalog file.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        debug!(path = %path.display(), journal_mode = %mode, "Opened catalog");
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::init(conn)
    }

    /// Create an in-memory catalog (for testing).
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    /// Open from a DSN: `sqlite::memory:`, `sqlite:<path>` or a bare path.
    pub fn from_dsn(dsn: &str) -> Result<Self> {
        let dsn = dsn.trim();
        if dsn.is_empty() {
            return Err(CatalogError::invalid_input("empty catalog DSN"));
        }
        if dsn == "sqlite::memory:" || dsn == ":memory:" {
            return Self::open_in_memory();
        }
        let path = dsn
            .strip_prefix("sqlite://")
            .or_else(|| dsn.strip_prefix("sqlite:"))
            .unwrap_or(dsn);
        if path.contains("://") {
            return Err(CatalogError::invalid_input(format!(
                "unsupported catalog DSN: {}",
                dsn
            )));
        }
        Self::open(Path::new(path))
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(&schema_sql())?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| CatalogError::LockPoisoned)
    }

    // ========================================================================
    // Archive results, audit tables
    // ========================================================================

    /// All archive results, oldest first.
    pub fn archive_results(&self) -> Result<Vec<ArchiveResult>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT * FROM archive_results ORDER BY id")?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(archive_result_from_row(row)?);
        }
        Ok(out)
    }

    pub fn move_journal_entries(&self) -> Result<Vec<MoveJournalEntry>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT when_moved, src, dest, md5, size FROM move_journal ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(MoveJournalEntry {
                when_moved: millis_to_datetime(row.get(0)?),
                src: PathBuf::from(row.get::<_, String>(1)?),
                dest: PathBuf::from(row.get::<_, String>(2)?),
                md5: row.get(3)?,
                size: row.get::<_, i64>(4)?.max(0) as u64,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn status_events(&self) -> Result<Vec<StatusEvent>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT created_at, component, event_id, summary, description \
             FROM status_events ORDER BY id",
        )?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let raw: String = row.get(2)?;
            let event_id = StatusEventId::parse(&raw)
                .ok_or_else(|| CatalogError::invalid_input(format!("Invalid event id: {}", raw)))?;
            out.push(StatusEvent {
                at: millis_to_datetime(row.get(0)?),
                component: row.get(1)?,
                event_id,
                summary: row.get(3)?,
                description: row.get(4)?,
            });
        }
        Ok(out)
    }

    pub(crate) fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }
}

impl Catalog for SqliteCatalog {
    fn upsert(&self, record: &FileRecord) -> Result<UpsertOutcome> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM file_metadata WHERE directory_path = ? AND file_name = ?",
                params![record.directory_path, record.file_name],
                |row| row.get(0),
            )
            .optional()?;

        let outcome = match existing {
            None => {
                tx.execute(
                    r#"
                    INSERT INTO file_metadata (
                        kind, instrument, level, descriptor, plan, orbit, mode, data_type,
                        file_name, directory_path, file_root, file_extension, file_size,
                        timetag, version, revision, absolute_version, mod_date, released
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                    params![
                        record.kind.as_str(),
                        record.instrument,
                        record.level,
                        record.descriptor,
                        record.plan,
                        record.orbit,
                        record.mode,
                        record.data_type,
                        record.file_name,
                        record.directory_path,
                        record.file_root,
                        record.file_extension,
                        record.file_size as i64,
                        record.timetag.timestamp_millis(),
                        record.version,
                        record.revision,
                        record.absolute_version,
                        record.mod_date.timestamp_millis(),
                        record.released as i64,
                    ],
                )?;
                UpsertOutcome::Inserted(tx.last_insert_rowid())
            }
            Some(id) => {
                tx.execute(
                    r#"
                    UPDATE file_metadata SET
                        kind = ?, instrument = ?, level = ?, descriptor = ?, plan = ?,
                        orbit = ?, mode = ?, data_type = ?, file_root = ?, file_extension = ?,
                        file_size = ?, timetag = ?, version = ?, revision = ?,
                        absolute_version = ?, mod_date = ?
                    WHERE id = ?
                    "#,
                    params![
                        record.kind.as_str(),
                        record.instrument,
                        record.level,
                        record.descriptor,
                        record.plan,
                        record.orbit,
                        record.mode,
                        record.data_type,
                        record.file_root,
                        record.file_extension,
                        record.file_size as i64,
                        record.timetag.timestamp_millis(),
                        record.version,
                        record.revision,
                        record.absolute_version,
                        record.mod_date.timestamp_millis(),
                        id,
                    ],
                )?;
                UpsertOutcome::Updated(id)
            }
        };

        tx.commit()?;
        Ok(outcome)
    }

    fn delete_by_path(&self, dir: &str, name: &str) -> Result<bool> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM file_metadata WHERE directory_path = ? AND file_name = ?",
            params![dir, name],
        )?;
        Ok(deleted > 0)
    }

    fn exists(&self, dir: &str, name: &str) -> Result<bool> {
        let conn = self.lock()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM file_metadata WHERE directory_path = ? AND file_name = ?",
                params![dir, name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn get(&self, dir: &str, name: &str) -> Result<Option<FileRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            "SELECT * FROM file_metadata WHERE directory_path = ? AND file_name = ?",
        )?;
        let mut rows = stmt.query(params![dir, name])?;
        match rows.next()? {
            Some(row) => Ok(Some(record_from_row(row)?)),
            None => Ok(None),
        }
    }

    fn query(&self, query: &FileQuery) -> Result<RecordStream> {
        Ok(Box::new(RecordCursor::new(
            self.connection(),
            query.to_plan(),
            query.batch_size,
            query.limit,
        )))
    }

    fn count(&self, query: &FileQuery) -> Result<u64> {
        let (sql, params) = query.to_sql();
        let sql = match query.limit {
            Some(limit) => format!("SELECT COUNT(*) FROM ({} LIMIT {})", sql, limit),
            None => format!("SELECT COUNT(*) FROM ({})", sql),
        };
        let conn = self.lock()?;
        let count: i64 =
            conn.query_row(&sql, rusqlite::params_from_iter(params.iter()), |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    fn mark_released(&self, names: &[String]) -> Result<u64> {
        if names.is_empty() {
            return Ok(0);
        }
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut updated = 0u64;
        for chunk in names.chunks(IN_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "UPDATE file_metadata SET released = 1 WHERE file_name IN ({})",
                placeholders
            );
            updated += tx.execute(&sql, rusqlite::params_from_iter(chunk.iter()))? as u64;
        }
        tx.commit()?;
        Ok(updated)
    }

    fn clear_released(&self) -> Result<u64> {
        let conn = self.lock()?;
        let cleared = conn.execute("UPDATE file_metadata SET released = 0 WHERE released = 1", [])?;
        Ok(cleared as u64)
    }

    fn record_archive_result(&self, result: &ArchiveResult) -> Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO archive_results (
                generation_time, window_start, window_end, command_line, configuration_blob,
                dry_run, result_directory, bundle_file_name, manifest_file_name,
                checksum_file_name, result_version, generation_result, pds_status, notes
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                result.generation_time.timestamp_millis(),
                result.window_start.timestamp_millis(),
                result.window_end.timestamp_millis(),
                result.command_line,
                result.configuration_blob,
                result.dry_run as i64,
                result.result_directory,
                result.bundle_file_name,
                result.manifest_file_name,
                result.checksum_file_name,
                result.result_version,
                result.generation_result.as_str(),
                result.pds_status,
                result.notes,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }
}

// ============================================================================
// Ports backed by the catalog
// ============================================================================

impl MoveJournal for SqliteCatalog {
    fn append(&self, entry: &MoveJournalEntry) -> sdc_journal::Result<()> {
        let conn = self.lock().map_err(|_| JournalError::LockError)?;
        conn.execute(
            "INSERT INTO move_journal (when_moved, src, dest, md5, size) VALUES (?, ?, ?, ?, ?)",
            params![
                entry.when_moved.timestamp_millis(),
                entry.src.to_string_lossy(),
                entry.dest.to_string_lossy(),
                entry.md5,
                entry.size as i64,
            ],
        )
        .map_err(|err| JournalError::Backend(err.to_string()))?;
        Ok(())
    }
}

impl StatusSink for SqliteCatalog {
    fn record(&self, component: &str, event_id: StatusEventId, summary: &str, description: &str) {
        let result = self.lock().and_then(|conn| {
            conn.execute(
                "INSERT INTO status_events (created_at, component, event_id, summary, description) \
                 VALUES (?, ?, ?, ?, ?)",
                params![
                    Utc::now().timestamp_millis(),
                    component,
                    event_id.as_str(),
                    summary,
                    description,
                ],
            )
            .map_err(CatalogError::from)
        });
        if let Err(err) = result {
            warn!(component, event_id = %event_id, error = %err, "Failed to record status event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::SortKey;
    use crate::types::absolute_version;
    use chrono::TimeZone;

    fn record(dir: &str, name: &str, root: &str, version: u32, revision: u32) -> FileRecord {
        FileRecord {
            id: None,
            kind: FileKind::Science,
            instrument: Some("swe".to_string()),
            level: Some("l2".to_string()),
            descriptor: Some("svy3d".to_string()),
            plan: None,
            orbit: None,
            mode: None,
            data_type: None,
            file_name: name.to_string(),
            directory_path: dir.to_string(),
            file_root: root.to_string(),
            file_extension: "cdf".to_string(),
            file_size: 10,
            timetag: Utc.with_ymd_and_hms(2014, 3, 20, 0, 0, 0).unwrap(),
            version: Some(version),
            revision: Some(revision),
            absolute_version: Some(absolute_version(version, Some(revision))),
            mod_date: Utc.with_ymd_and_hms(2014, 3, 21, 0, 0, 0).unwrap(),
            released: false,
        }
    }

    #[test]
    fn test_upsert_insert_then_update() {
        let catalog = SqliteCatalog::open_in_memory().unwrap();
        let mut rec = record("/d", "a_v01_r00.cdf", "a", 1, 0);

        let first = catalog.upsert(&rec).unwrap();
        assert!(matches!(first, UpsertOutcome::Inserted(_)));

        rec.file_size = 99;
        let second = catalog.upsert(&rec).unwrap();
        assert_eq!(second, UpsertOutcome::Updated(first.id()));

        let stored = catalog.get("/d", "a_v01_r00.cdf").unwrap().unwrap();
        assert_eq!(stored.file_size, 99);
        assert_eq!(stored.timetag, rec.timetag);
        assert_eq!(stored.absolute_version, Some(1000));
    }

    #[test]
    fn test_delete_and_exists() {
        let catalog = SqliteCatalog::open_in_memory().unwrap();
        catalog.upsert(&record("/d", "a_v01_r00.cdf", "a", 1, 0)).unwrap();
        assert!(catalog.exists("/d", "a_v01_r00.cdf").unwrap());
        assert!(catalog.delete_by_path("/d", "a_v01_r00.cdf").unwrap());
        assert!(!catalog.delete_by_path("/d", "a_v01_r00.cdf").unwrap());
        assert!(!catalog.exists("/d", "a_v01_r00.cdf").unwrap());
    }

    #[test]
    fn test_latest_skips_version_zero() {
        let catalog = SqliteCatalog::open_in_memory().unwrap();
        for (v, r) in [(1, 0), (1, 1), (2, 0), (0, 0)] {
            let name = format!("fam_v{:02}_r{:02}.cdf", v, r);
            catalog.upsert(&record("/d", &name, "fam", v, r)).unwrap();
        }
        catalog.upsert(&record("/d", "solo_v00_r00.cdf", "solo", 0, 0)).unwrap();

        let latest: Vec<FileRecord> = catalog
            .latest(&FileQuery::new())
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].file_name, "fam_v02_r00.cdf");
    }

    #[test]
    fn test_query_pages_through_all_rows() {
        let catalog = SqliteCatalog::open_in_memory().unwrap();
        for i in 0..47 {
            let name = format!("f{:03}_v01_r00.cdf", i);
            catalog.upsert(&record("/d", &name, &format!("f{:03}", i), 1, 0)).unwrap();
        }
        let query = FileQuery::new().yield_per(10);
        let names: Vec<String> = catalog
            .query(&query)
            .unwrap()
            .map(|r| r.unwrap().file_name)
            .collect();
        assert_eq!(names.len(), 47);
        assert_eq!(catalog.count(&query).unwrap(), 47);
        assert_eq!(catalog.count(&query.limit(5)).unwrap(), 5);
    }

    #[test]
    fn test_mark_and_clear_released() {
        let catalog = SqliteCatalog::open_in_memory().unwrap();
        catalog.upsert(&record("/d", "a_v01_r00.cdf", "a", 1, 0)).unwrap();
        catalog.upsert(&record("/d", "b_v01_r00.cdf", "b", 1, 0)).unwrap();

        let marked = catalog.mark_released(&["a_v01_r00.cdf".to_string()]).unwrap();
        assert_eq!(marked, 1);
        assert_eq!(catalog.count(&FileQuery::new().released(true)).unwrap(), 1);

        assert_eq!(catalog.clear_released().unwrap(), 1);
        assert_eq!(catalog.count(&FileQuery::new().released(true)).unwrap(), 0);
    }

    #[test]
    fn test_upsert_keeps_released_flag() {
        let catalog = SqliteCatalog::open_in_memory().unwrap();
        let mut rec = record("/d", "a_v01_r00.cdf", "a", 1, 0);
        catalog.upsert(&rec).unwrap();
        catalog.mark_released(&["a_v01_r00.cdf".to_string()]).unwrap();

        rec.file_size = 42;
        assert!(!rec.released);
        catalog.upsert(&rec).unwrap();

        let stored = catalog.get("/d", "a_v01_r00.cdf").unwrap().unwrap();
        assert_eq!(stored.file_size, 42);
        assert!(stored.released);
    }

    fn roots(catalog: &SqliteCatalog, from: u32, to: u32) {
        for i in from..to {
            let root = format!("f{:02}", i);
            catalog
                .upsert(&record("/d", &format!("{}_v01_r00.cdf", root), &root, 1, 0))
                .unwrap();
        }
    }

    #[test]
    fn test_stream_survives_insert_behind_reader() {
        let catalog = SqliteCatalog::open_in_memory().unwrap();
        roots(&catalog, 10, 50);
        let query = FileQuery::new().order_by(SortKey::FileRoot).yield_per(20);
        let mut stream = catalog.query(&query).unwrap();

        let mut seen: Vec<String> = stream.by_ref().take(20).map(|r| r.unwrap().file_root).collect();
        catalog.upsert(&record("/d", "a00_v01_r00.cdf", "a00", 1, 0)).unwrap();
        seen.extend(stream.map(|r| r.unwrap().file_root));

        let expected: Vec<String> = (10..50).map(|i| format!("f{:02}", i)).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_stream_survives_delete_behind_reader() {
        let catalog = SqliteCatalog::open_in_memory().unwrap();
        roots(&catalog, 10, 30);
        let query = FileQuery::new().order_by(SortKey::FileRoot).yield_per(5);
        let mut stream = catalog.query(&query).unwrap();

        let mut seen: Vec<String> = stream.by_ref().take(5).map(|r| r.unwrap().file_root).collect();
        for i in 10..13 {
            catalog.delete_by_path("/d", &format!("f{}_v01_r00.cdf", i)).unwrap();
        }
        seen.extend(stream.map(|r| r.unwrap().file_root));

        let expected: Vec<String> = (10..30).map(|i| format!("f{:02}", i)).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_latest_pages_with_descending_key() {
        let catalog = SqliteCatalog::open_in_memory().unwrap();
        for i in 0..9 {
            let root = format!("r{}", i);
            for v in 1..=3 {
                let name = format!("{}_v{:02}_r00.cdf", root, v);
                catalog.upsert(&record("/d", &name, &root, v, 0)).unwrap();
            }
        }
        let query = FileQuery::new()
            .order_by_desc(SortKey::FileRoot)
            .yield_per(2);
        let names: Vec<String> = catalog
            .latest(&query)
            .unwrap()
            .map(|r| r.unwrap().file_name)
            .collect();
        let expected: Vec<String> = (0..9).rev().map(|i| format!("r{}_v03_r00.cdf", i)).collect();
        assert_eq!(names, expected);
    }

    #[test]
    fn test_folded_root_order_ignores_case() {
        let catalog = SqliteCatalog::open_in_memory().unwrap();
        for root in ["b_20141018t1", "a_20141018T1", "B_20141018T0"] {
            let name = format!("{}_v01_r00.cdf", root);
            catalog.upsert(&record("/d", &name, root, 1, 0)).unwrap();
        }
        let query = FileQuery::new().order_by(SortKey::FileRootFolded).yield_per(1);
        let order: Vec<String> = catalog
            .query(&query)
            .unwrap()
            .map(|r| r.unwrap().file_root)
            .collect();
        assert_eq!(order, vec!["a_20141018T1", "B_20141018T0", "b_20141018t1"]);
    }

    #[test]
    fn test_catalog_ports() {
        let catalog = SqliteCatalog::open_in_memory().unwrap();
        catalog
            .append(&MoveJournalEntry {
                when_moved: Utc::now(),
                src: PathBuf::from("/drop/a"),
                dest: PathBuf::from("/data/a"),
                md5: "d41d8cd98f00b204e9800998ecf8427e".to_string(),
                size: 0,
            })
            .unwrap();
        catalog.record("router", StatusEventId::Fail, "bad name", "x.junk");

        assert_eq!(catalog.move_journal_entries().unwrap().len(), 1);
        let events = catalog.status_events().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_id, StatusEventId::Fail);
    }

    #[test]
    fn test_from_dsn_rejects_network_urls() {
        assert!(SqliteCatalog::from_dsn("postgres://host/db").is_err());
        assert!(SqliteCatalog::from_dsn("sqlite::memory:").is_ok());
    }
}
