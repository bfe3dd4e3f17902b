//! MemTable Tests
//!
//! Tests verify:
//! - Basic CRUD operations
//! - Size tracking (signed deltas on overwrite)
//! - Tombstone handling
//! - Sorted iteration and range bounds
//! - Reads pinned to a sequence
//! - Concurrent readers during writes

use std::sync::Arc;
use std::thread;

use stratakv::entry::{Entry, TOMBSTONE_SIZE};
use stratakv::memtable::MemTable;

const LIMIT: usize = 1024 * 1024;

fn value(v: &[u8]) -> Entry {
    Entry::Value(v.to_vec())
}

// =============================================================================
// Basic Operations Tests
// =============================================================================

#[test]
fn test_new_memtable_is_empty() {
    let memtable = MemTable::new(LIMIT);
    assert_eq!(memtable.entry_count(), 0);
    assert_eq!(memtable.size(), 0);
    assert!(memtable.is_empty());
    assert!(!memtable.is_full());
}

#[test]
fn test_put_and_get() {
    let memtable = MemTable::new(LIMIT);

    memtable.put(b"key1".to_vec(), b"value1".to_vec());

    assert_eq!(memtable.get(b"key1"), Some(value(b"value1")));
}

#[test]
fn test_get_nonexistent_key() {
    let memtable = MemTable::new(LIMIT);
    assert_eq!(memtable.get(b"nonexistent"), None);
}

#[test]
fn test_put_overwrites_existing() {
    let memtable = MemTable::new(LIMIT);

    memtable.put(b"key1".to_vec(), b"value1".to_vec());
    memtable.put(b"key1".to_vec(), b"value2".to_vec());

    assert_eq!(memtable.entry_count(), 1);
    assert_eq!(memtable.get(b"key1"), Some(value(b"value2")));
}

#[test]
fn test_empty_key_and_value_are_valid() {
    let memtable = MemTable::new(LIMIT);

    memtable.put(Vec::new(), Vec::new());

    assert_eq!(memtable.get(b""), Some(value(b"")));
    assert_eq!(memtable.entry_count(), 1);
}

// =============================================================================
// Delete / Tombstone Tests
// =============================================================================

#[test]
fn test_delete_creates_tombstone() {
    let memtable = MemTable::new(LIMIT);

    memtable.put(b"key1".to_vec(), b"value1".to_vec());
    memtable.delete(b"key1".to_vec());

    assert_eq!(memtable.get(b"key1"), Some(Entry::Tombstone));
    assert_eq!(memtable.entry_count(), 1);
}

#[test]
fn test_delete_nonexistent_key_records_tombstone() {
    let memtable = MemTable::new(LIMIT);

    memtable.delete(b"ghost".to_vec());

    // Must shadow older layers even though this layer never saw a value
    assert_eq!(memtable.get(b"ghost"), Some(Entry::Tombstone));
    assert_eq!(memtable.entry_count(), 1);
}

#[test]
fn test_put_after_delete() {
    let memtable = MemTable::new(LIMIT);

    memtable.put(b"key1".to_vec(), b"value1".to_vec());
    memtable.delete(b"key1".to_vec());
    memtable.put(b"key1".to_vec(), b"value2".to_vec());

    assert_eq!(memtable.get(b"key1"), Some(value(b"value2")));
}

// =============================================================================
// Size Tracking Tests
// =============================================================================

#[test]
fn test_size_tracking_put() {
    let memtable = MemTable::new(LIMIT);

    memtable.put(b"key".to_vec(), b"value".to_vec());

    assert_eq!(memtable.size(), b"key".len() + b"value".len());
}

#[test]
fn test_size_tracking_overwrite_grows_and_shrinks() {
    let memtable = MemTable::new(LIMIT);

    memtable.put(b"key".to_vec(), b"short".to_vec());
    assert_eq!(memtable.size(), 3 + 5);

    memtable.put(b"key".to_vec(), b"much_longer_value".to_vec());
    assert_eq!(memtable.size(), 3 + 17);

    memtable.put(b"key".to_vec(), b"x".to_vec());
    assert_eq!(memtable.size(), 3 + 1);
}

#[test]
fn test_size_tracking_delete() {
    let memtable = MemTable::new(LIMIT);

    memtable.put(b"key".to_vec(), b"value".to_vec());
    memtable.delete(b"key".to_vec());

    assert_eq!(memtable.size(), b"key".len() + TOMBSTONE_SIZE);
}

#[test]
fn test_size_tracks_many_overwrites_exactly() {
    let memtable = MemTable::new(LIMIT);

    for round in 0..5 {
        for i in 0..20 {
            let key = format!("k{:02}", i).into_bytes();
            if (i + round) % 3 == 0 {
                memtable.delete(key);
            } else {
                memtable.put(key, vec![b'v'; i + round]);
            }
        }
    }

    let expected: usize = memtable
        .iter()
        .map(|(k, e)| k.len() + e.charged_size())
        .sum();
    assert_eq!(memtable.size(), expected);
    assert_eq!(memtable.entry_count(), 20);
}

#[test]
fn test_upsert_reports_full_at_limit() {
    let memtable = MemTable::new(16);

    assert!(!memtable.put(b"a".to_vec(), vec![0; 10]));
    assert!(memtable.put(b"b".to_vec(), vec![0; 4]));
    assert!(memtable.is_full());
    assert_eq!(memtable.size_limit(), 16);
}

#[test]
fn test_payload_size_counts_tombstones_as_keys() {
    let memtable = MemTable::new(LIMIT);

    memtable.put(b"ab".to_vec(), b"cde".to_vec());
    memtable.delete(b"xyz".to_vec());

    // On disk a tombstone stores no value bytes
    assert_eq!(memtable.payload_size(), 2 + 3 + 3);
}

// =============================================================================
// Iteration Tests
// =============================================================================

#[test]
fn test_iter_empty() {
    let memtable = MemTable::new(LIMIT);
    assert_eq!(memtable.iter().count(), 0);
}

#[test]
fn test_iter_sorted_order() {
    let memtable = MemTable::new(LIMIT);

    memtable.put(b"cherry".to_vec(), b"3".to_vec());
    memtable.put(b"apple".to_vec(), b"1".to_vec());
    memtable.put(b"banana".to_vec(), b"2".to_vec());

    let keys: Vec<Vec<u8>> = memtable.iter().map(|(k, _)| k).collect();

    assert_eq!(
        keys,
        vec![b"apple".to_vec(), b"banana".to_vec(), b"cherry".to_vec()]
    );
}

#[test]
fn test_iter_orders_bytes_unsigned() {
    let memtable = MemTable::new(LIMIT);

    memtable.put(vec![0xff], b"high".to_vec());
    memtable.put(vec![0x01], b"low".to_vec());
    memtable.put(vec![0x01, 0x00], b"longer".to_vec());

    let keys: Vec<Vec<u8>> = memtable.iter().map(|(k, _)| k).collect();
    assert_eq!(keys, vec![vec![0x01], vec![0x01, 0x00], vec![0xff]]);
}

#[test]
fn test_iter_includes_tombstones() {
    let memtable = MemTable::new(LIMIT);

    memtable.put(b"key1".to_vec(), b"value1".to_vec());
    memtable.delete(b"key2".to_vec());
    memtable.put(b"key3".to_vec(), b"value3".to_vec());

    let entries: Vec<(Vec<u8>, Entry)> = memtable.iter().collect();

    assert_eq!(entries.len(), 3);
    assert_eq!(entries[1], (b"key2".to_vec(), Entry::Tombstone));
}

#[test]
fn test_range_is_half_open() {
    let memtable = MemTable::new(LIMIT);
    for k in [b"a", b"b", b"c", b"d"] {
        memtable.put(k.to_vec(), k.to_vec());
    }

    let keys: Vec<Vec<u8>> = memtable
        .range(Some(b"b".as_slice()), Some(b"d".as_slice()))
        .map(|(k, _)| k)
        .collect();

    assert_eq!(keys, vec![b"b".to_vec(), b"c".to_vec()]);
}

#[test]
fn test_range_open_bounds() {
    let memtable = MemTable::new(LIMIT);
    for k in [b"a", b"b", b"c"] {
        memtable.put(k.to_vec(), k.to_vec());
    }

    assert_eq!(memtable.range(None, Some(b"b".as_slice())).count(), 1);
    assert_eq!(memtable.range(Some(b"b".as_slice()), None).count(), 2);
    assert_eq!(memtable.range(None, None).count(), 3);
}

#[test]
fn test_range_empty_and_inverted_bounds() {
    let memtable = MemTable::new(LIMIT);
    for k in [b"a", b"b", b"c"] {
        memtable.put(k.to_vec(), k.to_vec());
    }

    assert_eq!(memtable.range(Some(b"b".as_slice()), Some(b"b".as_slice())).count(), 0);
    assert_eq!(memtable.range(Some(b"c".as_slice()), Some(b"a".as_slice())).count(), 0);
}

// =============================================================================
// Sequence Tests
// =============================================================================

#[test]
fn test_sequence_advances_per_upsert() {
    let memtable = MemTable::new(LIMIT);
    assert_eq!(memtable.sequence(), 0);

    memtable.put(b"a".to_vec(), b"1".to_vec());
    memtable.put(b"a".to_vec(), b"2".to_vec());
    memtable.delete(b"b".to_vec());

    assert_eq!(memtable.sequence(), 3);
}

#[test]
fn test_get_at_sees_version_current_at_sequence() {
    let memtable = MemTable::new(LIMIT);

    memtable.put(b"k".to_vec(), b"v1".to_vec());
    let first = memtable.sequence();
    memtable.delete(b"k".to_vec());
    let deleted = memtable.sequence();
    memtable.put(b"k".to_vec(), b"v3".to_vec());

    assert_eq!(memtable.get_at(b"k", 0), None);
    assert_eq!(memtable.get_at(b"k", first), Some(value(b"v1")));
    assert_eq!(memtable.get_at(b"k", deleted), Some(Entry::Tombstone));
    assert_eq!(memtable.get(b"k"), Some(value(b"v3")));
}

#[test]
fn test_scan_ignores_writes_after_its_sequence() {
    let memtable = Arc::new(MemTable::new(LIMIT));
    memtable.put(b"a".to_vec(), b"1".to_vec());
    memtable.put(b"c".to_vec(), b"1".to_vec());

    let scan = memtable.scan(None, None, memtable.sequence());
    memtable.put(b"a".to_vec(), b"2".to_vec());
    memtable.put(b"b".to_vec(), b"2".to_vec());
    memtable.delete(b"c".to_vec());

    let entries: Vec<(Vec<u8>, Entry)> = scan.collect();
    assert_eq!(
        entries,
        vec![(b"a".to_vec(), value(b"1")), (b"c".to_vec(), value(b"1"))]
    );
}

#[test]
fn test_scan_respects_bounds() {
    let memtable = Arc::new(MemTable::new(LIMIT));
    for k in [b"a", b"b", b"c", b"d"] {
        memtable.put(k.to_vec(), k.to_vec());
    }
    memtable.put(b"b".to_vec(), b"newer".to_vec());

    let keys: Vec<Vec<u8>> = memtable
        .scan(Some(b"b".as_slice()), Some(b"d".as_slice()), memtable.sequence())
        .map(|(k, _)| k)
        .collect();

    // One entry per key, however many versions it has
    assert_eq!(keys, vec![b"b".to_vec(), b"c".to_vec()]);
}

#[test]
fn test_overwrites_fill_table_through_retained_versions() {
    let memtable = MemTable::new(64);

    let mut full = false;
    for _ in 0..20 {
        full = memtable.put(b"k".to_vec(), vec![0; 7]);
        if full {
            break;
        }
    }

    // Live size stays at one entry; old versions still count toward full
    assert!(full);
    assert_eq!(memtable.size(), 8);
    assert!(memtable.retained_size() >= 128);
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_concurrent_reads_during_writes() {
    let memtable = Arc::new(MemTable::new(LIMIT));
    for i in 0..100 {
        memtable.put(format!("key{:03}", i).into_bytes(), b"initial".to_vec());
    }

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let memtable = Arc::clone(&memtable);
            thread::spawn(move || {
                for _ in 0..50 {
                    // Every key is always present with some value
                    for i in 0..100 {
                        let key = format!("key{:03}", i).into_bytes();
                        assert!(matches!(memtable.get(&key), Some(Entry::Value(_))));
                    }
                    let keys: Vec<Vec<u8>> = memtable.iter().map(|(k, _)| k).collect();
                    assert_eq!(keys.len(), 100);
                    assert!(keys.windows(2).all(|w| w[0] < w[1]));
                }
            })
        })
        .collect();

    // Single writer, as the engine guarantees
    for round in 0..20 {
        for i in 0..100 {
            memtable.put(
                format!("key{:03}", i).into_bytes(),
                format!("round{}", round).into_bytes(),
            );
        }
    }

    for handle in readers {
        handle.join().unwrap();
    }

    assert_eq!(memtable.entry_count(), 100);
    assert_eq!(memtable.get(b"key042"), Some(value(b"round19")));
}
