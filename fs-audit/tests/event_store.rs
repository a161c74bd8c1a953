use std::sync::{Arc, Barrier};
use std::thread;

use fs_audit::{Action, DatabaseError, EventStore};
use tempfile::TempDir;

#[test]
fn concurrent_first_access_is_classified_once() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(EventStore::open(dir.path().join("security.db")).unwrap());

    let workers = 8;
    let barrier = Arc::new(Barrier::new(workers));
    let handles: Vec<_> = (0..workers)
        .map(|_| {
            let store = store.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                store.record("alice", Action::Modified, "/srv/shared.txt").unwrap()
            })
        })
        .collect();

    let results: Vec<bool> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results.iter().filter(|&&s| s).count(), 1);

    let record = store.access_record("/srv/shared.txt", "alice").unwrap().unwrap();
    assert_eq!(record.hit_count, workers as i64);

    let stats = store.statistics().unwrap();
    assert_eq!(stats.total_events, workers as i64);
    assert_eq!(stats.suspicious_events, 1);
}

#[test]
fn separate_handles_on_one_file_share_the_ledger() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("security.db");

    let workers = 4;
    let barrier = Arc::new(Barrier::new(workers));
    let handles: Vec<_> = (0..workers)
        .map(|_| {
            let path = path.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let store = EventStore::open(&path).unwrap();
                barrier.wait();
                (0..5)
                    .map(|_| store.record("bob", Action::Created, "/srv/a").unwrap())
                    .filter(|&s| s)
                    .count()
            })
        })
        .collect();

    let first_accesses: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(first_accesses, 1);

    let store = EventStore::open_existing(&path).unwrap();
    assert_eq!(store.access_record("/srv/a", "bob").unwrap().unwrap().hit_count, 20);
}

#[test]
fn events_survive_reopening() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("security.db");

    {
        let store = EventStore::open(&path).unwrap();
        assert!(store.record("u", Action::Created, "/a").unwrap());
    }

    let store = EventStore::open_existing(&path).unwrap();
    assert!(!store.record("u", Action::Modified, "/a").unwrap());
    assert_eq!(store.statistics().unwrap().total_events, 2);
}

#[test]
fn missing_database_is_storage_unavailable() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("absent.db");

    match EventStore::open_existing(&path) {
        Err(DatabaseError::StorageUnavailable { path: reported, .. }) => {
            assert!(reported.ends_with("absent.db"));
        }
        other => panic!("expected StorageUnavailable, got {other:?}"),
    }
    assert!(!path.exists());
}

#[test]
fn unopenable_location_is_storage_unavailable() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("no/such/dir/security.db");

    let err = EventStore::open(&path).unwrap_err();
    assert!(matches!(err, DatabaseError::StorageUnavailable { .. }));
    assert!(err.to_string().contains("security.db"));
}
