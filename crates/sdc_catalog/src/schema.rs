//! Catalog schema.
//!
//! All timestamps are stored as INTEGER milliseconds since the Unix epoch.

use crate::types::FileKind;

const SCHEMA_SQL_TEMPLATE: &str = r#"
-- One row per physical file on disk
CREATE TABLE IF NOT EXISTS file_metadata (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL CHECK (kind IN (__FILE_KIND_VALUES__)),
    instrument TEXT,
    level TEXT,
    descriptor TEXT,
    plan TEXT,
    orbit INTEGER,
    mode TEXT,
    data_type TEXT,
    file_name TEXT NOT NULL,
    directory_path TEXT NOT NULL,
    file_root TEXT NOT NULL,
    file_extension TEXT NOT NULL,
    file_size INTEGER NOT NULL,
    timetag INTEGER NOT NULL,
    version INTEGER,
    revision INTEGER,
    absolute_version INTEGER,
    mod_date INTEGER NOT NULL,
    released INTEGER NOT NULL DEFAULT 0,
    UNIQUE(directory_path, file_name)
);

CREATE INDEX IF NOT EXISTS idx_file_metadata_family
    ON file_metadata(file_root, file_extension, absolute_version);
CREATE INDEX IF NOT EXISTS idx_file_metadata_instrument_time
    ON file_metadata(instrument, timetag);
CREATE INDEX IF NOT EXISTS idx_file_metadata_kind
    ON file_metadata(kind);
CREATE INDEX IF NOT EXISTS idx_file_metadata_name
    ON file_metadata(file_name);

-- Append-only audit of physical moves
CREATE TABLE IF NOT EXISTS move_journal (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    when_moved INTEGER NOT NULL,
    src TEXT NOT NULL,
    dest TEXT NOT NULL,
    md5 TEXT NOT NULL,
    size INTEGER NOT NULL
);

-- Operational events for humans
CREATE TABLE IF NOT EXISTS status_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    created_at INTEGER NOT NULL,
    component TEXT NOT NULL,
    event_id TEXT NOT NULL CHECK (event_id IN ('START', 'STATUS', 'PROGRESS', 'FAIL')),
    summary TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT ''
);

-- Archive bundle generations
CREATE TABLE IF NOT EXISTS archive_results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    generation_time INTEGER NOT NULL,
    window_start INTEGER NOT NULL,
    window_end INTEGER NOT NULL,
    command_line TEXT NOT NULL,
    configuration_blob TEXT NOT NULL,
    dry_run INTEGER NOT NULL,
    result_directory TEXT NOT NULL,
    bundle_file_name TEXT,
    manifest_file_name TEXT,
    checksum_file_name TEXT,
    result_version INTEGER NOT NULL,
    generation_result TEXT NOT NULL CHECK (generation_result IN ('SUCCESS', 'FAILURE')),
    pds_status TEXT,
    notes TEXT NOT NULL DEFAULT ''
);

-- Mission timelines (read model for event CSVs)
CREATE TABLE IF NOT EXISTS mission_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    event_type TEXT NOT NULL,
    start_time INTEGER NOT NULL,
    end_time INTEGER NOT NULL,
    orbit_number INTEGER,
    description TEXT NOT NULL DEFAULT ''
);
CREATE INDEX IF NOT EXISTS idx_mission_events_start ON mission_events(start_time);

CREATE TABLE IF NOT EXISTS ops_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    event_type TEXT NOT NULL,
    start_time INTEGER NOT NULL,
    end_time INTEGER NOT NULL,
    subsystem TEXT,
    description TEXT NOT NULL DEFAULT ''
);
CREATE INDEX IF NOT EXISTS idx_ops_events_start ON ops_events(start_time);
"#;

fn sql_list(values: impl IntoIterator<Item = &'static str>) -> String {
    values
        .into_iter()
        .map(|value| format!("'{}'", value))
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) fn schema_sql() -> String {
    SCHEMA_SQL_TEMPLATE.replace(
        "__FILE_KIND_VALUES__",
        &sql_list(FileKind::ALL.iter().map(|kind| kind.as_str())),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_lists_every_kind() {
        let sql = schema_sql();
        assert!(!sql.contains("__FILE_KIND_VALUES__"));
        for kind in FileKind::ALL {
            assert!(sql.contains(&format!("'{}'", kind.as_str())));
        }
    }
}
