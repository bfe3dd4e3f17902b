//! MemTable implementation
//!
//! Multi-version skip list with atomic size accounting.
//!
//! Every upsert inserts a new node `(key, seq)` and then publishes `seq`.
//! Nodes are never replaced or removed while the table is alive, so a reader
//! that resolves a key at some published sequence always finds the version
//! that was current at that point, however many writes land meanwhile.

use std::cmp::Ordering;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use crossbeam_skiplist::SkipMap;

use crate::entry::Entry;
use crate::key;

/// Superseded versions may hold at most this many times the size limit
/// before the table reports full
const RETAINED_FACTOR: usize = 2;

/// Skip-list key: user key ascending, then sequence descending, so the
/// newest version of a key comes first
#[derive(Debug, Clone, PartialEq, Eq)]
struct VersionKey {
    key: Vec<u8>,
    seq: u64,
}

impl Ord for VersionKey {
    fn cmp(&self, other: &Self) -> Ordering {
        key::compare(&self.key, &other.key).then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for VersionKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// In-memory table for recent writes
///
/// Byte size is the sum of key lengths plus each key's current charged size
/// (value length, or `TOMBSTONE_SIZE` for a tombstone). Superseded versions
/// are not part of it; they are tracked separately as retained bytes.
pub struct MemTable {
    data: SkipMap<VersionKey, Entry>,
    /// Highest published sequence; 0 means nothing written yet
    seq: AtomicU64,
    size: AtomicUsize,
    /// Bytes of every version held, superseded ones included
    retained: AtomicUsize,
    entry_count: AtomicUsize,
    size_limit: usize,
}

impl MemTable {
    /// Create a new empty MemTable that reports full at `size_limit` bytes
    pub fn new(size_limit: usize) -> Self {
        Self {
            data: SkipMap::new(),
            seq: AtomicU64::new(0),
            size: AtomicUsize::new(0),
            retained: AtomicUsize::new(0),
            entry_count: AtomicUsize::new(0),
            size_limit,
        }
    }

    /// Sequence of the newest published write; readers pass it back to
    /// `get_at`/`scan` to pin a view
    pub fn sequence(&self) -> u64 {
        self.seq.load(AtomicOrdering::Acquire)
    }

    /// Get the newest entry for a key
    ///
    /// - `None`: the key is not in this layer, older layers must be consulted
    /// - `Some(Entry::Tombstone)`: deleted here, older layers must not be consulted
    pub fn get(&self, key: &[u8]) -> Option<Entry> {
        self.get_at(key, self.sequence())
    }

    /// Get the entry for a key as of sequence `upto`
    pub fn get_at(&self, key: &[u8], upto: u64) -> Option<Entry> {
        let probe = VersionKey {
            key: key.to_vec(),
            seq: upto,
        };
        let found = self.data.lower_bound(Bound::Included(&probe))?;
        (found.key().key == key).then(|| found.value().clone())
    }

    /// Insert a new version of `key`
    ///
    /// Callers must serialize upserts; readers may run concurrently.
    /// Returns true once the table is full.
    pub fn upsert(&self, key: Vec<u8>, entry: Entry) -> bool {
        let previous_seq = self.seq.load(AtomicOrdering::Acquire);
        let added = key.len() + entry.charged_size();

        match self.get_at(&key, previous_seq) {
            Some(previous) => {
                let removed = key.len() + previous.charged_size();
                if added >= removed {
                    self.size.fetch_add(added - removed, AtomicOrdering::SeqCst);
                } else {
                    self.size.fetch_sub(removed - added, AtomicOrdering::SeqCst);
                }
            }
            None => {
                self.size.fetch_add(added, AtomicOrdering::SeqCst);
                self.entry_count.fetch_add(1, AtomicOrdering::SeqCst);
            }
        }
        self.retained.fetch_add(added, AtomicOrdering::SeqCst);

        let seq = previous_seq + 1;
        self.data.insert(VersionKey { key, seq }, entry);
        self.seq.store(seq, AtomicOrdering::Release);

        self.is_full()
    }

    /// Put a key-value pair
    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) -> bool {
        self.upsert(key, Entry::Value(value))
    }

    /// Delete a key (inserts tombstone)
    pub fn delete(&self, key: Vec<u8>) -> bool {
        self.upsert(key, Entry::Tombstone)
    }

    /// Charged size of the current version of every key
    pub fn size(&self) -> usize {
        self.size.load(AtomicOrdering::SeqCst)
    }

    /// Bytes held in memory, superseded versions included
    pub fn retained_size(&self) -> usize {
        self.retained.load(AtomicOrdering::SeqCst)
    }

    pub fn size_limit(&self) -> usize {
        self.size_limit
    }

    /// Number of distinct keys, tombstones included
    pub fn entry_count(&self) -> usize {
        self.entry_count.load(AtomicOrdering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Size reached the limit, or overwrites piled up enough old versions
    pub fn is_full(&self) -> bool {
        self.size() >= self.size_limit
            || self.retained_size() >= self.size_limit.saturating_mul(RETAINED_FACTOR)
    }

    /// Sum of key and value bytes as they will be laid out in a run's data block
    pub fn payload_size(&self) -> u64 {
        self.iter()
            .map(|(k, e)| (k.len() + e.payload_size()) as u64)
            .sum()
    }

    /// Iterate over the newest entry of every key in sorted order (for flush)
    pub fn iter(&self) -> MemTableIterator<'_> {
        self.range(None, None)
    }

    /// Lazy ascending iterator over `[from, to)` as of the current sequence;
    /// `None` bounds are open
    pub fn range(&self, from: Option<&[u8]>, to: Option<&[u8]>) -> MemTableIterator<'_> {
        MemTableIterator {
            table: self,
            cursor: Cursor::new(from, to, self.sequence()),
        }
    }

    /// Owned lazy iterator over `[from, to)` that only sees writes up to
    /// sequence `upto`
    pub fn scan(self: &Arc<Self>, from: Option<&[u8]>, to: Option<&[u8]>, upto: u64) -> MemTableScan {
        MemTableScan {
            table: Arc::clone(self),
            cursor: Cursor::new(from, to, upto),
        }
    }
}

/// Resumable position of a scan over one snapshot
struct Cursor {
    next: Bound<VersionKey>,
    to: Option<Vec<u8>>,
    upto: u64,
    done: bool,
}

impl Cursor {
    fn new(from: Option<&[u8]>, to: Option<&[u8]>, upto: u64) -> Self {
        let next = match from {
            // u64::MAX sorts before every real version of the key
            Some(k) => Bound::Included(VersionKey {
                key: k.to_vec(),
                seq: u64::MAX,
            }),
            None => Bound::Unbounded,
        };
        // Inverted bounds select nothing
        let done = matches!((from, to), (Some(f), Some(t)) if key::compare(f, t) != Ordering::Less);

        Self {
            next,
            to: to.map(<[u8]>::to_vec),
            upto,
            done,
        }
    }

    fn advance(&mut self, data: &SkipMap<VersionKey, Entry>) -> Option<(Vec<u8>, Entry)> {
        if self.done {
            return None;
        }

        let mut node = data.lower_bound(self.next.as_ref());
        while let Some(current) = node {
            let version = current.key();
            if let Some(to) = &self.to {
                if key::compare(&version.key, to) != Ordering::Less {
                    break;
                }
            }
            if version.seq <= self.upto {
                // Seq 0 is never written, so this skips every older version
                self.next = Bound::Excluded(VersionKey {
                    key: version.key.clone(),
                    seq: 0,
                });
                return Some((version.key.clone(), current.value().clone()));
            }
            node = current.next();
        }

        self.done = true;
        None
    }
}

/// Iterator over MemTable entries
pub struct MemTableIterator<'a> {
    table: &'a MemTable,
    cursor: Cursor,
}

impl Iterator for MemTableIterator<'_> {
    type Item = (Vec<u8>, Entry);

    fn next(&mut self) -> Option<Self::Item> {
        self.cursor.advance(&self.table.data)
    }
}

/// Iterator over a pinned view of a MemTable that keeps the table alive
pub struct MemTableScan {
    table: Arc<MemTable>,
    cursor: Cursor,
}

impl Iterator for MemTableScan {
    type Item = (Vec<u8>, Entry);

    fn next(&mut self) -> Option<Self::Item> {
        self.cursor.advance(&self.table.data)
    }
}
