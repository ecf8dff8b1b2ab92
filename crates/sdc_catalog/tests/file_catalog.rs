//! File-backed catalog behavior: reopen, window queries, directory scoping.

use chrono::{TimeZone, Utc};
use sdc_catalog::{
    absolute_version, glob_to_like_pattern, Catalog, FileKind, FileQuery, FileRecord, SortKey,
    SqliteCatalog,
};
use std::path::Path;
use tempfile::TempDir;

fn science(dir: &str, day: u32, version: u32, revision: u32) -> FileRecord {
    let root = format!("mvn_swe_l2_svy3d_201403{:02}", day);
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
        file_name: format!("{}_v{:02}_r{:02}.cdf", root, version, revision),
        directory_path: dir.to_string(),
        file_root: root,
        file_extension: "cdf".to_string(),
        file_size: 64,
        timetag: Utc.with_ymd_and_hms(2014, 3, day, 0, 0, 0).unwrap(),
        version: Some(version),
        revision: Some(revision),
        absolute_version: Some(absolute_version(version, Some(revision))),
        mod_date: Utc::now(),
        released: false,
    }
}

#[test]
fn test_catalog_survives_reopen() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("catalog.db");
    {
        let catalog = SqliteCatalog::open(&path).unwrap();
        catalog.upsert(&science("/data/swe/l2/2014/03", 20, 1, 3)).unwrap();
    }
    let catalog = SqliteCatalog::from_dsn(&format!("sqlite:{}", path.display())).unwrap();
    let row = catalog
        .get("/data/swe/l2/2014/03", "mvn_swe_l2_svy3d_20140320_v01_r03.cdf")
        .unwrap()
        .unwrap();
    assert_eq!(row.absolute_version, Some(1003));
    assert_eq!(row.kind, FileKind::Science);
}

#[test]
fn test_window_and_name_filters() {
    let catalog = SqliteCatalog::open_in_memory().unwrap();
    for day in [18, 19, 20, 21] {
        catalog.upsert(&science("/data/swe/l2/2014/03", day, 1, 0)).unwrap();
    }

    let window = FileQuery::new()
        .instrument("swe")
        .timetag_between(
            Utc.with_ymd_and_hms(2014, 3, 19, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2014, 3, 21, 0, 0, 0).unwrap(),
        )
        .order_by(SortKey::Timetag);
    let names: Vec<String> = catalog
        .query(&window)
        .unwrap()
        .map(|r| r.unwrap().file_name)
        .collect();
    assert_eq!(
        names,
        vec![
            "mvn_swe_l2_svy3d_20140319_v01_r00.cdf".to_string(),
            "mvn_swe_l2_svy3d_20140320_v01_r00.cdf".to_string(),
        ]
    );

    let like = FileQuery::new().file_name_like(glob_to_like_pattern("*_20140321_*"));
    assert_eq!(catalog.count(&like).unwrap(), 1);

    let excluded = FileQuery::new().exclude_extensions(["cdf"]);
    assert_eq!(catalog.count(&excluded).unwrap(), 0);
}

#[test]
fn test_under_directory_does_not_match_siblings() {
    let catalog = SqliteCatalog::open_in_memory().unwrap();
    catalog.upsert(&science("/data/swe", 20, 1, 0)).unwrap();
    catalog.upsert(&science("/data/swe/l2", 21, 1, 0)).unwrap();
    catalog.upsert(&science("/data/swex", 22, 1, 0)).unwrap();

    let scoped = FileQuery::new().under_directory(Path::new("/data/swe"));
    assert_eq!(catalog.count(&scoped).unwrap(), 2);
}

#[test]
fn test_latest_per_family_with_ordering() {
    let catalog = SqliteCatalog::open_in_memory().unwrap();
    for (day, v, r) in [(20, 1, 0), (20, 1, 1), (21, 1, 0), (21, 2, 0), (22, 0, 0)] {
        catalog.upsert(&science("/d", day, v, r)).unwrap();
    }
    let latest: Vec<FileRecord> = catalog
        .latest(&FileQuery::new().order_by(SortKey::FileRoot))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    let names: Vec<&str> = latest.iter().map(|r| r.file_name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "mvn_swe_l2_svy3d_20140320_v01_r01.cdf",
            "mvn_swe_l2_svy3d_20140321_v02_r00.cdf",
        ]
    );
}
