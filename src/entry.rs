//! Entry definitions
//!
//! The in-memory form of a stored value. On disk a tombstone is the high bit
//! of the index record's value offset; that encoding never leaves
//! `storage::sstable`.

/// Bytes charged to the memtable size counter for a tombstone
pub const TOMBSTONE_SIZE: usize = 1;

/// A value or a deletion marker for a key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    /// A live value
    Value(Vec<u8>),

    /// A tombstone (deleted key)
    Tombstone,
}

impl Entry {
    pub fn is_tombstone(&self) -> bool {
        matches!(self, Entry::Tombstone)
    }

    /// Size charged against the memtable limit (key bytes not included)
    pub fn charged_size(&self) -> usize {
        match self {
            Entry::Value(v) => v.len(),
            Entry::Tombstone => TOMBSTONE_SIZE,
        }
    }

    /// Bytes this entry occupies in a run's data block (key bytes not included)
    pub fn payload_size(&self) -> usize {
        match self {
            Entry::Value(v) => v.len(),
            Entry::Tombstone => 0,
        }
    }

    pub fn value(&self) -> Option<&[u8]> {
        match self {
            Entry::Value(v) => Some(v),
            Entry::Tombstone => None,
        }
    }

    pub fn into_value(self) -> Option<Vec<u8>> {
        match self {
            Entry::Value(v) => Some(v),
            Entry::Tombstone => None,
        }
    }
}
