//! SSTable Module
//!
//! Sorted run - immutable on-disk sorted key-value storage.
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Header (32 bytes)                                       │
//! │   Magic: "SKVR" (4) | Version: u16 (2) | Flags: u16 (2) │
//! │   FilterLen: u64 (8) | EntryCount: u64 (8)              │
//! │   CRC32 of filter + index: u32 (4) | Reserved (4)       │
//! ├─────────────────────────────────────────────────────────┤
//! │ Filter Block (FilterLen bytes, absent if FilterLen = 0) │
//! │   [NumHashes: u32][NumBits: u64][bit array]             │
//! ├─────────────────────────────────────────────────────────┤
//! │ Index Block (EntryCount * 16 bytes)                     │
//! │   [KeyOffset: u64][ValueOffset: u64]                    │
//! │   ... one record per entry ...                          │
//! │   (high bit of ValueOffset set = tombstone)             │
//! ├─────────────────────────────────────────────────────────┤
//! │ Data Block (variable)                                   │
//! │   [Key][Value][Key][Value]...                           │
//! │   (offsets relative to the start of the data block)     │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Entry `i` spans `KeyOffset[i] .. KeyOffset[i + 1]` (or the end of the
//! file for the last entry): the key ends where the value starts, a
//! tombstone has an empty value.

mod builder;
mod iterator;
mod reader;

use std::path::{Path, PathBuf};

pub use builder::SSTableBuilder;
pub use iterator::SSTableIterator;
pub use reader::{SSTableReader, Search};

// =============================================================================
// Shared Constants (used by builder, reader, iterator)
// =============================================================================

/// Magic bytes identifying a StrataKV run file
pub(crate) const MAGIC: &[u8; 4] = b"SKVR";

/// Current run format version
pub(crate) const VERSION: u16 = 1;

/// Header size in bytes
pub(crate) const HEADER_SIZE: u64 = 32;

/// Size of one index record: KeyOffset (8) + ValueOffset (8)
pub(crate) const INDEX_RECORD_SIZE: u64 = 16;

/// High bit of the value offset marks a tombstone
pub(crate) const TOMBSTONE_BIT: u64 = 1 << 63;

/// Header flag: a filter block is present
pub(crate) const FLAG_HAS_FILTER: u16 = 0x1;

/// Extension appended to files that are still being written
pub const TEMP_EXTENSION: &str = "tmp";

/// Path a run is written to before it is renamed into place
pub fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(TEMP_EXTENSION);
    PathBuf::from(name)
}

// =============================================================================
// SSTable Metadata
// =============================================================================

/// Metadata returned when a run has been written
#[derive(Debug, Clone)]
pub struct SSTable {
    /// Path to the run file
    pub path: PathBuf,
    /// Number of entries (tombstones included)
    pub entry_count: u64,
    /// Smallest key
    pub min_key: Vec<u8>,
    /// Largest key
    pub max_key: Vec<u8>,
    /// File size in bytes
    pub file_size: u64,
    /// Whether a bloom filter block was written
    pub has_filter: bool,
}

impl SSTable {
    /// Get the number of entries
    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }
}
