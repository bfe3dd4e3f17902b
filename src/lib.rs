//! # StrataKV
//!
//! An embedded, ordered key-value store built as a log-structured merge
//! engine over byte-string keys and values:
//! - Skip-list MemTable with byte-size accounting
//! - Immutable sorted runs with a binary-searchable index
//! - Per-run bloom filters for point lookups
//! - K-way merge reader resolving freshness across layers
//! - Background flush and full compaction with an atomic manifest
//!
//! There is no write-ahead log: data still in a memtable is lost if the
//! process dies before `Engine::close()` or an explicit flush.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Engine                              │
//! │      upsert / get / range / flush / compact / close          │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │  MemTable   │  seal    │  MemTable   │
//!   │   (live)    │ ───────▶ │ (flushing)  │
//!   └─────────────┘          └──────┬──────┘
//!                                   │ flush worker
//!                                   ▼
//!                           ┌─────────────┐   compaction
//!                           │   Storage   │ ◀──────────── worker
//!                           │ runs + MANIFEST
//!                           └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod key;
pub mod entry;
pub mod memtable;
pub mod storage;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{StrataError, Result};
pub use config::Config;
pub use engine::{Engine, RangeIter};
pub use entry::Entry;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of StrataKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
