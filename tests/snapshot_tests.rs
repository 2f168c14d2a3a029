//! Integration tests for day-bucketed restore points.

use std::sync::Arc;

use rewind::storage::{FileSystem, LocalFileSystem};
use rewind::timestamp::{truncate_day, NANOS_PER_DAY, NANOS_PER_HOUR};
use rewind::{Config, DatabaseKey, RestorePoint, RewindError, SnapshotLogger};
use tempfile::TempDir;

const DAY: i64 = 19_700 * NANOS_PER_DAY;

fn setup() -> (TempDir, Config, DatabaseKey) {
    let temp = TempDir::new().expect("create temp dir");
    let config = Config::new(temp.path());
    let key = DatabaseKey::new("db", "main").expect("key");
    (temp, config, key)
}

fn logger(config: &Config, key: &DatabaseKey) -> SnapshotLogger {
    let fs: Arc<dyn FileSystem> = Arc::new(LocalFileSystem::new());
    SnapshotLogger::new(fs, config, key.clone())
}

#[test]
fn test_one_day_collects_every_restore_point() {
    let (_temp, config, key) = setup();
    let snapshots = logger(&config, &key);

    let n = 50;
    for i in 0..n {
        snapshots.log(DAY + i * 1_000, i as u32 + 1).expect("log");
    }

    let listed = snapshots.get_snapshots_with_restore_points().expect("list");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].timestamp(), DAY);

    let points = listed[0].restore_points().expect("restore points");
    assert_eq!(points.total, n as usize);
    assert_eq!(points.start, DAY);
    assert_eq!(points.end, DAY + (n - 1) * 1_000);
}

#[test]
fn test_separate_days_get_separate_snapshots() {
    let (_temp, config, key) = setup();
    let snapshots = logger(&config, &key);

    snapshots.log(DAY + NANOS_PER_HOUR, 1).expect("log");
    snapshots.log(DAY + NANOS_PER_DAY - 1, 2).expect("log");
    snapshots.log(DAY + NANOS_PER_DAY, 3).expect("log");
    snapshots.log(DAY + 3 * NANOS_PER_DAY + 7, 4).expect("log");

    assert_eq!(
        snapshots.day_buckets().expect("buckets"),
        vec![DAY, DAY + NANOS_PER_DAY, DAY + 3 * NANOS_PER_DAY]
    );

    let first = snapshots.get_snapshot(DAY + 5).expect("snapshot");
    assert_eq!(first.restore_points().expect("points").total, 2);
    let second = snapshots.get_snapshot(DAY + NANOS_PER_DAY).expect("snapshot");
    assert_eq!(second.restore_points().expect("points").total, 1);

    let missing = snapshots.get_snapshot(DAY + 2 * NANOS_PER_DAY).unwrap_err();
    assert!(missing.is_not_found());
}

#[test]
fn test_duplicate_timestamp_resolves_deterministically() {
    let (_temp, config, key) = setup();
    let ts = DAY + 42;
    {
        let snapshots = logger(&config, &key);
        snapshots.log(ts, 5).expect("log");
        snapshots.log(ts, 7).expect("log");
        snapshots.close();
    }

    // A fresh logger reads the records back from disk.
    let snapshots = logger(&config, &key);
    let snapshot = snapshots.get_snapshot(ts).expect("snapshot");
    for _ in 0..3 {
        assert_eq!(
            snapshot.get_restore_point(ts).expect("point"),
            RestorePoint::new(ts, 7)
        );
    }
    assert_eq!(
        snapshots.restore_point_at_or_before(ts + 1).expect("point"),
        RestorePoint::new(ts, 7)
    );
    assert_eq!(snapshot.restore_points().expect("points").total, 1);
}

#[test]
fn test_restore_point_lookup_crosses_days() {
    let (_temp, config, key) = setup();
    let snapshots = logger(&config, &key);

    snapshots.log(DAY + 10, 3).expect("log");
    snapshots.log(DAY + 20, 4).expect("log");

    let later = DAY + 5 * NANOS_PER_DAY;
    assert_eq!(truncate_day(later), later);
    assert_eq!(
        snapshots.restore_point_at_or_before(later).expect("point"),
        RestorePoint::new(DAY + 20, 4)
    );
    assert_eq!(
        snapshots.restore_point_at_or_before(DAY + 15).expect("point"),
        RestorePoint::new(DAY + 10, 3)
    );

    let err = snapshots.restore_point_at_or_before(DAY + 9).unwrap_err();
    assert!(matches!(err, RewindError::RestorePointNotFound { timestamp } if timestamp == DAY + 9));
}
