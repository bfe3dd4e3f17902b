//! Merge Reader
//!
//! K-way merge over memtable scans and run iterators producing one
//! ascending, de-duplicated stream.
//!
//! Each source carries a recency rank (its position in the source list,
//! oldest first). The heap orders by key ascending, then rank descending, so
//! for a key present in several layers the freshest one surfaces first. The
//! whole group of equal keys is advanced together; shadowed versions are
//! dropped and never reappear later in the scan.

use std::cmp::Ordering;
use std::collections::binary_heap::{BinaryHeap, PeekMut};

use crate::entry::Entry;
use crate::error::Result;
use crate::key;
use crate::memtable::MemTableScan;
use crate::storage::sstable::SSTableIterator;

/// One input of the merge
pub enum Source {
    /// A memtable pinned at a sequence
    MemTable(MemTableScan),
    /// A run scan
    Run(SSTableIterator),
}

impl Source {
    fn advance(&mut self) -> Option<Result<(Vec<u8>, Entry)>> {
        match self {
            Source::MemTable(scan) => scan.next().map(Ok),
            Source::Run(iter) => iter.next(),
        }
    }
}

/// What to do with the winning entry when it is a tombstone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    /// Emit tombstones (partial merges that still shadow older data)
    KeepTombstones,
    /// Drop tombstones (range scans, full compaction)
    SkipTombstones,
}

struct HeapItem {
    key: Vec<u8>,
    entry: Entry,
    rank: usize,
    source: Source,
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapItem {}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapItem {
    // BinaryHeap is a max-heap: the smallest key, then the highest rank, is "greatest"
    fn cmp(&self, other: &Self) -> Ordering {
        key::compare(&other.key, &self.key).then_with(|| self.rank.cmp(&other.rank))
    }
}

/// Merged iterator over several sources
pub struct MergeIterator {
    heap: BinaryHeap<HeapItem>,
    policy: MergePolicy,
    failed: bool,
}

impl MergeIterator {
    /// Build a merge over `sources`, ordered oldest first
    pub fn new(sources: Vec<Source>, policy: MergePolicy) -> Result<Self> {
        let mut heap = BinaryHeap::with_capacity(sources.len());

        for (rank, mut source) in sources.into_iter().enumerate() {
            if let Some(item) = source.advance() {
                let (key, entry) = item?;
                heap.push(HeapItem {
                    key,
                    entry,
                    rank,
                    source,
                });
            }
        }

        Ok(Self {
            heap,
            policy,
            failed: false,
        })
    }

    /// Pull the next entry of `source` into the heap
    fn refill(&mut self, mut source: Source, rank: usize) -> Result<()> {
        if let Some(item) = source.advance() {
            let (key, entry) = item?;
            self.heap.push(HeapItem {
                key,
                entry,
                rank,
                source,
            });
        }
        Ok(())
    }

    fn next_entry(&mut self) -> Result<Option<(Vec<u8>, Entry)>> {
        loop {
            let HeapItem {
                key,
                entry,
                rank,
                source,
            } = match self.heap.pop() {
                Some(item) => item,
                None => return Ok(None),
            };

            // Advance every older source positioned on the same key
            loop {
                let shadowed = match self.heap.peek_mut() {
                    Some(top) if key::compare(&top.key, &key) == Ordering::Equal => {
                        PeekMut::pop(top)
                    }
                    _ => break,
                };
                self.refill(shadowed.source, shadowed.rank)?;
            }

            self.refill(source, rank)?;

            if entry.is_tombstone() && self.policy == MergePolicy::SkipTombstones {
                continue;
            }
            return Ok(Some((key, entry)));
        }
    }
}

impl Iterator for MergeIterator {
    type Item = Result<(Vec<u8>, Entry)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        match self.next_entry() {
            Ok(item) => item.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Count entries and data block bytes a merge will produce
pub fn measure<I>(entries: I) -> Result<(u64, u64)>
where
    I: IntoIterator<Item = Result<(Vec<u8>, Entry)>>,
{
    let mut count = 0u64;
    let mut payload = 0u64;
    for item in entries {
        let (key, entry) = item?;
        count += 1;
        payload += (key.len() + entry.payload_size()) as u64;
    }
    Ok((count, payload))
}
