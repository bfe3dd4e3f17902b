//! Tests for StorageManager
//!
//! These tests verify:
//! - Opening/creating storage directories
//! - Flushing MemTable to runs and publishing the manifest
//! - Querying across multiple runs, newest first
//! - Tombstone handling across runs
//! - Full compaction
//! - Persistence (restart and reload runs from the manifest)

use std::fs;
use std::path::PathBuf;

use stratakv::entry::Entry;
use stratakv::memtable::MemTable;
use stratakv::storage::{Manifest, StorageManager};
use stratakv::StrataError;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_storage() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().to_path_buf();
    (temp_dir, path)
}

fn create_memtable_with_entries(entries: &[(&[u8], &[u8])]) -> MemTable {
    let memtable = MemTable::new(1024 * 1024);
    for (key, value) in entries {
        memtable.put(key.to_vec(), value.to_vec());
    }
    memtable
}

fn value(v: &[u8]) -> Option<Entry> {
    Some(Entry::Value(v.to_vec()))
}

// =============================================================================
// Open/Create Tests
// =============================================================================

#[test]
fn test_open_creates_directory() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("new_storage");

    assert!(!path.exists());

    let _manager = StorageManager::open(&path, Some(0.01)).unwrap();

    assert!(path.is_dir());
}

#[test]
fn test_open_empty_directory() {
    let (_temp, path) = setup_temp_storage();

    let manager = StorageManager::open(&path, Some(0.01)).unwrap();

    assert_eq!(manager.run_count(), 0);
    assert_eq!(manager.next_run_id(), 1);
    assert_eq!(manager.recovery_report().runs_opened, 0);
}

#[test]
fn test_open_existing_directory() {
    let (_temp, path) = setup_temp_storage();

    {
        let manager = StorageManager::open(&path, Some(0.01)).unwrap();
        manager
            .flush(&create_memtable_with_entries(&[(b"k1", b"v1")]))
            .unwrap();
        manager
            .flush(&create_memtable_with_entries(&[(b"k2", b"v2")]))
            .unwrap();
        assert_eq!(manager.run_ids(), vec![1, 2]);
    }

    let manager = StorageManager::open(&path, Some(0.01)).unwrap();

    assert_eq!(manager.run_ids(), vec![1, 2]);
    assert_eq!(manager.next_run_id(), 3);
    assert_eq!(manager.get(b"k1").unwrap(), value(b"v1"));
    assert_eq!(manager.get(b"k2").unwrap(), value(b"v2"));
}

// =============================================================================
// Flush Tests
// =============================================================================

#[test]
fn test_flush_writes_run_and_manifest() {
    let (_temp, path) = setup_temp_storage();
    let manager = StorageManager::open(&path, Some(0.01)).unwrap();

    let run = manager
        .flush(&create_memtable_with_entries(&[(b"a", b"1"), (b"b", b"2")]))
        .unwrap();

    assert!(run.path.exists());
    assert_eq!(run.entry_count(), 2);
    assert_eq!(Manifest::load(&path).unwrap().runs(), &[1]);
}

#[test]
fn test_flush_empty_memtable_fails() {
    let (_temp, path) = setup_temp_storage();
    let manager = StorageManager::open(&path, Some(0.01)).unwrap();

    let result = manager.flush(&MemTable::new(1024));

    assert!(matches!(result, Err(StrataError::Storage(_))));
    assert_eq!(manager.run_count(), 0);
}

#[test]
fn test_flush_persists_tombstones() {
    let (_temp, path) = setup_temp_storage();
    let manager = StorageManager::open(&path, Some(0.01)).unwrap();

    let memtable = MemTable::new(1024);
    memtable.put(b"kept".to_vec(), b"v".to_vec());
    memtable.delete(b"gone".to_vec());
    manager.flush(&memtable).unwrap();

    assert_eq!(manager.get(b"kept").unwrap(), value(b"v"));
    assert_eq!(manager.get(b"gone").unwrap(), Some(Entry::Tombstone));
    assert_eq!(manager.get(b"never").unwrap(), None);
}

// =============================================================================
// Multi-Run Query Tests
// =============================================================================

#[test]
fn test_newer_run_wins() {
    let (_temp, path) = setup_temp_storage();
    let manager = StorageManager::open(&path, Some(0.01)).unwrap();

    manager
        .flush(&create_memtable_with_entries(&[(b"key", b"old"), (b"other", b"x")]))
        .unwrap();
    manager
        .flush(&create_memtable_with_entries(&[(b"key", b"new")]))
        .unwrap();

    assert_eq!(manager.get(b"key").unwrap(), value(b"new"));
    assert_eq!(manager.get(b"other").unwrap(), value(b"x"));
}

#[test]
fn test_tombstone_in_newer_run_shadows_value() {
    let (_temp, path) = setup_temp_storage();
    let manager = StorageManager::open(&path, None).unwrap();

    manager
        .flush(&create_memtable_with_entries(&[(b"key", b"value")]))
        .unwrap();
    let memtable = MemTable::new(1024);
    memtable.delete(b"key".to_vec());
    manager.flush(&memtable).unwrap();

    assert_eq!(manager.get(b"key").unwrap(), Some(Entry::Tombstone));
}

// =============================================================================
// Compaction Tests
// =============================================================================

#[test]
fn test_compact_merges_runs() {
    let (_temp, path) = setup_temp_storage();
    let manager = StorageManager::open(&path, Some(0.01)).unwrap();

    manager
        .flush(&create_memtable_with_entries(&[(b"a", b"1"), (b"b", b"1"), (b"c", b"1")]))
        .unwrap();
    let second = MemTable::new(1024);
    second.put(b"b".to_vec(), b"2".to_vec());
    second.delete(b"c".to_vec());
    manager.flush(&second).unwrap();

    let old_paths: Vec<PathBuf> = manager
        .snapshot()
        .iter()
        .map(|r| r.path().to_path_buf())
        .collect();

    let outcome = manager.compact().unwrap();

    assert_eq!(outcome.inputs, vec![1, 2]);
    let output = outcome.output.unwrap();
    assert_eq!(output.entry_count(), 2);
    assert_eq!(manager.run_ids(), vec![3]);
    assert_eq!(Manifest::load(&path).unwrap().runs(), &[3]);

    assert_eq!(manager.get(b"a").unwrap(), value(b"1"));
    assert_eq!(manager.get(b"b").unwrap(), value(b"2"));
    // Tombstone dropped along with the value it shadowed
    assert_eq!(manager.get(b"c").unwrap(), None);

    for path in old_paths {
        assert!(!path.exists(), "{} should be deleted", path.display());
    }
}

#[test]
fn test_compact_with_no_runs() {
    let (_temp, path) = setup_temp_storage();
    let manager = StorageManager::open(&path, Some(0.01)).unwrap();

    let outcome = manager.compact().unwrap();

    assert!(outcome.inputs.is_empty());
    assert!(outcome.output.is_none());
}

#[test]
fn test_compact_everything_deleted_leaves_no_runs() {
    let (_temp, path) = setup_temp_storage();
    let manager = StorageManager::open(&path, Some(0.01)).unwrap();

    manager
        .flush(&create_memtable_with_entries(&[(b"a", b"1")]))
        .unwrap();
    let deletes = MemTable::new(1024);
    deletes.delete(b"a".to_vec());
    manager.flush(&deletes).unwrap();

    let outcome = manager.compact().unwrap();

    assert_eq!(outcome.inputs, vec![1, 2]);
    assert!(outcome.output.is_none());
    assert_eq!(manager.run_count(), 0);
    assert!(Manifest::load(&path).unwrap().is_empty());

    let leftover_runs = fs::read_dir(&path)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".sst"))
        .count();
    assert_eq!(leftover_runs, 0);
}

#[test]
fn test_snapshot_survives_compaction() {
    let (_temp, path) = setup_temp_storage();
    let manager = StorageManager::open(&path, Some(0.01)).unwrap();

    manager
        .flush(&create_memtable_with_entries(&[(b"a", b"1")]))
        .unwrap();
    manager
        .flush(&create_memtable_with_entries(&[(b"b", b"2")]))
        .unwrap();

    let pinned = manager.snapshot();
    manager.compact().unwrap();

    // Obsolete runs stay readable while a snapshot holds them
    assert_eq!(pinned.len(), 2);
    assert!(pinned.iter().all(|r| r.is_obsolete() && r.path().exists()));
    assert_eq!(
        StorageManager::get_from(&pinned, b"a").unwrap(),
        value(b"1")
    );

    let paths: Vec<PathBuf> = pinned.iter().map(|r| r.path().to_path_buf()).collect();
    drop(pinned);
    assert!(paths.iter().all(|p| !p.exists()));
}

#[test]
fn test_flush_after_compaction_is_newest() {
    let (_temp, path) = setup_temp_storage();
    let manager = StorageManager::open(&path, Some(0.01)).unwrap();

    manager
        .flush(&create_memtable_with_entries(&[(b"k", b"1")]))
        .unwrap();
    manager.compact().unwrap();
    manager
        .flush(&create_memtable_with_entries(&[(b"k", b"2")]))
        .unwrap();

    assert_eq!(manager.run_ids(), vec![2, 3]);
    assert_eq!(manager.get(b"k").unwrap(), value(b"2"));
}
