//! SSTable Iterator
//!
//! Sequential iteration over a contiguous span of index positions.

use std::sync::Arc;

use crate::entry::Entry;
use crate::error::Result;

use super::reader::SSTableReader;

/// Iterator over run entries in sorted key order
///
/// Holds its own handle to the reader, so a run stays open (and on disk)
/// for as long as a scan needs it.
pub struct SSTableIterator {
    reader: Arc<SSTableReader>,
    /// Next index position to decode
    position: usize,
    /// Stop before this position
    end: usize,
}

impl SSTableIterator {
    pub(super) fn new(reader: Arc<SSTableReader>, start: usize, end: usize) -> Self {
        Self {
            reader,
            position: start,
            end,
        }
    }

    /// Run this iterator reads from
    pub fn reader(&self) -> &Arc<SSTableReader> {
        &self.reader
    }

    /// Entries left before the end bound
    pub fn remaining(&self) -> usize {
        self.end - self.position
    }
}

impl Iterator for SSTableIterator {
    /// (key, entry); tombstones are yielded as `Entry::Tombstone`
    type Item = Result<(Vec<u8>, Entry)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.end {
            return None;
        }

        let item = self.reader.entry_at(self.position);
        // Stop after an error instead of yielding it forever
        self.position = if item.is_ok() { self.position + 1 } else { self.end };
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.remaining();
        (remaining, Some(remaining))
    }
}
