//! Integration tests for the dead-letter store

use std::sync::Arc;
use std::thread;

use bulk_fetcher::dead_letter::{DeadLetterError, DeadLetterStore, HEADER};
use tempfile::TempDir;

#[test]
fn test_append_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let store = DeadLetterStore::new(dir.path());

    assert_eq!(store.append("daily", &["600000.SH"], "20240115").unwrap(), 1);
    assert_eq!(store.append("daily", &["600000.SH"], "20240115").unwrap(), 0);

    let read = store.read("20240115").unwrap();
    assert_eq!(read["daily"], vec!["600000.SH"]);

    let content = std::fs::read_to_string(dir.path().join("20240115.csv")).unwrap();
    let mut lines = content.lines();
    assert_eq!(lines.next().unwrap(), HEADER.join(","));
    assert_eq!(lines.count(), 1);
}

#[test]
fn test_same_key_in_other_category_is_distinct() {
    let dir = TempDir::new().unwrap();
    let store = DeadLetterStore::new(dir.path());

    assert_eq!(store.append("daily", &["000001.SZ"], "20240115").unwrap(), 1);
    assert_eq!(store.append("weekly", &["000001.SZ"], "20240115").unwrap(), 1);
    assert_eq!(store.read("20240115").unwrap().len(), 2);
}

#[test]
fn test_invalid_date_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let store = DeadLetterStore::new(dir.path().join("dlq"));

    for bad in ["2024-01-15", "240115", "20241315", "2024011a"] {
        assert!(
            matches!(store.append("daily", &["X"], bad), Err(DeadLetterError::FormatError(_))),
            "expected FormatError for {bad}"
        );
    }
    assert!(!dir.path().join("dlq").exists());
}

#[test]
fn test_concurrent_writers_never_duplicate() {
    let dir = TempDir::new().unwrap();
    let keys: Vec<String> = (0..20).map(|i| format!("{:06}.SZ", i)).collect();

    // Separate store instances share only the file lock
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let path = dir.path().to_path_buf();
            let keys = keys.clone();
            thread::spawn(move || {
                let store = DeadLetterStore::new(path);
                keys.iter()
                    .map(|key| store.append("daily", &[key.as_str()], "20240115").unwrap())
                    .sum::<usize>()
            })
        })
        .collect();
    let written: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(written, 20);

    let store = DeadLetterStore::new(dir.path());
    assert_eq!(store.entries("20240115").unwrap().len(), 20);
}

#[test]
fn test_shared_store_across_threads() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(DeadLetterStore::new(dir.path()));

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let store = store.clone();
            thread::spawn(move || {
                for i in 0..10 {
                    store.record("daily", &format!("K{}", (t * 10 + i) % 15)).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let dates = store.list_dates().unwrap();
    assert_eq!(dates.len(), 1);
    assert_eq!(store.read(&dates[0]).unwrap()["daily"].len(), 15);
}

#[test]
fn test_list_dates_ignores_foreign_files() {
    let dir = TempDir::new().unwrap();
    let store = DeadLetterStore::new(dir.path());
    store.append("daily", &["A"], "20240116").unwrap();
    store.append("daily", &["A"], "20240115").unwrap();
    std::fs::write(dir.path().join("notes.csv"), "x").unwrap();
    std::fs::write(dir.path().join("20240117.txt"), "x").unwrap();

    assert_eq!(store.list_dates().unwrap(), vec!["20240115", "20240116"]);
}
