//! Storage Module
//!
//! Persistent storage layer: immutable sorted runs plus the manifest that
//! lists them.
//!
//! ## Responsibilities
//! - Persist sealed memtables as sorted runs
//! - Point lookups (bloom filter, then binary search) and range scans
//! - Merge runs and memtables into one freshness-resolved stream
//! - Full compaction into a single run
//! - Crash-safe run set changes through the manifest
//!
//! ## Directory Layout
//! ```text
//! {data_dir}/
//!   ├── MANIFEST          one run id per line, oldest first
//!   ├── run_000001.sst
//!   ├── run_000004.sst
//!   └── *.tmp             interrupted writes, removed on open
//! ```

pub mod bloom;
pub mod manifest;
pub mod merge;
mod manager;
mod sstable;

pub use bloom::BloomFilter;
pub use manager::{CompactionOutcome, RecoveryReport, RunSet, StorageManager};
pub use manifest::{Manifest, PublishError};
pub use merge::{MergeIterator, MergePolicy, Source};
pub use sstable::{temp_path, SSTable, SSTableBuilder, SSTableIterator, SSTableReader, Search};
