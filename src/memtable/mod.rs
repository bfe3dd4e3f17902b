//! MemTable Module
//!
//! In-memory data structure for recent writes.
//!
//! ## Responsibilities
//! - Fast reads and writes in memory
//! - Concurrent readers alongside a single logical writer stream
//! - Track size for flush triggers
//! - Ordered iteration for run creation and range scans
//!
//! ## Data Structure Choice
//! Using `crossbeam_skiplist::SkipMap`:
//! - Ordered keys (required for run generation)
//! - Lock-free reads, so `get`/`range` never wait on a writer
//! - One node per version: an overwrite adds a node instead of replacing
//!   one, so a reader pinned to a sequence never loses its entry
//! - Sealing (live -> flushing) is an engine-level state swap, not a
//!   property of the table itself

mod table;

pub use table::{MemTable, MemTableIterator, MemTableScan};
