//! Storage Manager
//!
//! Manages the set of runs and the manifest that names them.
//!
//! ## Responsibilities
//! - Recover the run set on startup (manifest first, then clean the directory)
//! - Search runs newest → oldest for point reads
//! - Write sealed memtables to new runs
//! - Merge all runs into one during compaction
//! - Publish every run-set change through an atomic manifest swap

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::entry::Entry;
use crate::error::Result;
use crate::memtable::MemTable;
use crate::StrataError;

use super::manifest::{Manifest, PublishError, MANIFEST_FILENAME};
use super::merge::{self, MergeIterator, MergePolicy, Source};
use super::sstable::{SSTable, SSTableBuilder, SSTableReader, TEMP_EXTENSION};

/// Runs ordered oldest → newest, mirroring the manifest
pub type RunSet = Arc<Vec<Arc<SSTableReader>>>;

/// What a compaction did
#[derive(Debug, Clone)]
pub struct CompactionOutcome {
    /// Runs merged away
    pub inputs: Vec<u64>,
    /// The merged run, `None` when every entry was deleted
    pub output: Option<SSTable>,
}

/// What `open` found and cleaned up
#[derive(Debug, Default, Clone)]
pub struct RecoveryReport {
    pub runs_opened: usize,
    pub temp_files_removed: usize,
    pub orphan_runs_removed: usize,
}

/// Manages the storage layer
///
/// ## Concurrency:
/// - `runs`: RwLock around an immutable snapshot, swapped whole on change
/// - `manifest_lock`: serializes publishes, the single synchronization point
///   between flush and compaction
/// - `compaction_lock`: at most one compaction in flight
/// - `next_run_id`: Atomic counter (lock-free)
pub struct StorageManager {
    /// Directory where runs and the manifest live
    data_dir: PathBuf,

    /// Open run readers, oldest → newest
    runs: RwLock<RunSet>,

    manifest_lock: Mutex<()>,

    compaction_lock: Mutex<()>,

    /// Next ID for creating new runs (atomic, lock-free)
    next_run_id: AtomicU64,

    /// Bloom filter target for new runs
    false_positive_rate: Option<f64>,

    recovery: RecoveryReport,
}

impl StorageManager {
    /// Open or create storage in the given directory
    ///
    /// On startup:
    /// 1. Create directory if it doesn't exist
    /// 2. Load the manifest (the only authority on which runs are live)
    /// 3. Remove temp files and runs the manifest does not name
    /// 4. Open a reader for every manifest entry, in manifest order
    pub fn open(path: &Path, false_positive_rate: Option<f64>) -> Result<Self> {
        fs::create_dir_all(path)?;

        let manifest = Manifest::load(path)?;
        let mut report = RecoveryReport::default();
        let mut max_id = manifest.runs().iter().copied().max().unwrap_or(0);

        for entry in fs::read_dir(path)? {
            let entry = entry?;
            let file_path = entry.path();

            if !file_path.is_file() {
                continue;
            }

            if file_path.extension().is_some_and(|ext| ext == TEMP_EXTENSION) {
                // Interrupted run write or manifest publish
                if let Some(id) = Self::parse_run_id(&file_path) {
                    max_id = max_id.max(id);
                }
                tracing::info!(file = %file_path.display(), "Removing interrupted temp file");
                fs::remove_file(&file_path)?;
                report.temp_files_removed += 1;
                continue;
            }

            if let Some(id) = Self::parse_run_id(&file_path) {
                max_id = max_id.max(id);
                if !manifest.contains(id) {
                    // Fully written but never published, or superseded by a compaction
                    tracing::info!(run_id = id, "Removing run not referenced by manifest");
                    fs::remove_file(&file_path)?;
                    report.orphan_runs_removed += 1;
                }
            }
        }

        let mut runs = Vec::with_capacity(manifest.len());
        for &id in manifest.runs() {
            let run_path = Self::run_path_with_dir(path, id);
            if !run_path.exists() {
                return Err(StrataError::Corruption(format!(
                    "Manifest references missing run {}",
                    run_path.display()
                )));
            }
            runs.push(Arc::new(SSTableReader::open(&run_path, id)?));
        }
        report.runs_opened = runs.len();

        tracing::info!(
            runs = report.runs_opened,
            temp_removed = report.temp_files_removed,
            orphans_removed = report.orphan_runs_removed,
            "Storage recovered"
        );

        Ok(Self {
            data_dir: path.to_path_buf(),
            runs: RwLock::new(Arc::new(runs)),
            manifest_lock: Mutex::new(()),
            compaction_lock: Mutex::new(()),
            next_run_id: AtomicU64::new(max_id + 1),
            false_positive_rate,
            recovery: report,
        })
    }

    /// Current runs, oldest → newest. The snapshot keeps its files open.
    pub fn snapshot(&self) -> RunSet {
        Arc::clone(&self.runs.read())
    }

    /// Get an entry by key (searches all runs newest → oldest)
    ///
    /// Returns:
    /// - `Ok(Some(Entry::Value(_)))`: key found with value
    /// - `Ok(Some(Entry::Tombstone))`: newest version is a deletion
    /// - `Ok(None)`: key in no run
    pub fn get(&self, key: &[u8]) -> Result<Option<Entry>> {
        Self::get_from(&self.snapshot(), key)
    }

    /// Point lookup against an existing snapshot
    pub fn get_from(runs: &[Arc<SSTableReader>], key: &[u8]) -> Result<Option<Entry>> {
        for reader in runs.iter().rev() {
            // Range + bloom check happens inside get()
            if let Some(entry) = reader.get(key)? {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    /// Flush a sealed MemTable to a new run
    ///
    /// Writes the run under a temp name, renames it into place, publishes a
    /// manifest that appends it, then installs the reader. If anything fails
    /// before the manifest rename, the run set is unchanged and the memtable
    /// can be flushed again. If only the directory sync after the rename
    /// fails, the run is installed and kept but the error is still returned.
    pub fn flush(&self, memtable: &MemTable) -> Result<SSTable> {
        if memtable.is_empty() {
            return Err(StrataError::Storage(
                "Cannot flush empty MemTable".to_string(),
            ));
        }

        let id = self.next_run_id.fetch_add(1, Ordering::SeqCst);
        let path = self.run_path(id);

        let metadata = SSTableBuilder::write_run(
            &path,
            memtable.iter().map(Ok),
            memtable.entry_count() as u64,
            memtable.payload_size(),
            self.false_positive_rate,
        )?;

        let reader = match SSTableReader::open(&path, id) {
            Ok(reader) => Arc::new(reader),
            Err(e) => {
                let _ = fs::remove_file(&path);
                return Err(e);
            }
        };

        let published = self.publish(|current| {
            let mut next = current.to_vec();
            next.push(Arc::clone(&reader));
            next
        });
        match published {
            Ok(()) => {}
            Err(PublishError::NotReplaced(e)) => {
                reader.mark_obsolete();
                return Err(e);
            }
            Err(PublishError::Unsynced(e)) => {
                tracing::error!(run_id = id, error = %e, "Flushed run published but directory sync failed");
                return Err(e);
            }
        }

        tracing::info!(
            run_id = id,
            entries = metadata.entry_count,
            bytes = metadata.file_size,
            "Flushed memtable to run"
        );

        Ok(metadata)
    }

    /// Merge every current run into one, dropping tombstones and shadowed
    /// versions
    ///
    /// Runs flushed while the merge is in progress are newer than every
    /// input and keep their place after the output.
    pub fn compact(&self) -> Result<CompactionOutcome> {
        let _compaction = self.compaction_lock.lock();

        let inputs = self.snapshot();
        let input_ids: Vec<u64> = inputs.iter().map(|r| r.id()).collect();

        if inputs.is_empty() {
            return Ok(CompactionOutcome {
                inputs: input_ids,
                output: None,
            });
        }

        tracing::info!(runs = ?input_ids, "Compaction started");

        // The inputs are the oldest layers, nothing below them needs shadowing
        let (entry_count, payload_size) = merge::measure(Self::merge_runs(&inputs)?)?;

        let (output, reader) = if entry_count == 0 {
            (None, None)
        } else {
            let id = self.next_run_id.fetch_add(1, Ordering::SeqCst);
            let path = self.run_path(id);
            let metadata = SSTableBuilder::write_run(
                &path,
                Self::merge_runs(&inputs)?,
                entry_count,
                payload_size,
                self.false_positive_rate,
            )?;
            let reader = match SSTableReader::open(&path, id) {
                Ok(reader) => Arc::new(reader),
                Err(e) => {
                    let _ = fs::remove_file(&path);
                    return Err(e);
                }
            };
            (Some(metadata), Some(reader))
        };

        let publish_result = self.publish(|current| {
            let mut next = Vec::with_capacity(current.len());
            let mut placed = false;
            for run in current {
                if input_ids.contains(&run.id()) {
                    if !placed {
                        next.extend(reader.iter().cloned());
                        placed = true;
                    }
                } else {
                    next.push(Arc::clone(run));
                }
            }
            if !placed {
                // Inputs are always the oldest layers
                next.splice(0..0, reader.iter().cloned());
            }
            next
        });

        match publish_result {
            Ok(()) => {}
            Err(PublishError::NotReplaced(e)) => {
                if let Some(reader) = &reader {
                    reader.mark_obsolete();
                }
                return Err(e);
            }
            Err(PublishError::Unsynced(e)) => {
                // The old manifest may still be what survives a crash, so
                // its runs stay on disk; the next open removes them
                tracing::error!(error = %e, "Compaction published but directory sync failed");
                return Err(e);
            }
        }

        for run in inputs.iter() {
            run.mark_obsolete();
        }

        tracing::info!(
            inputs = input_ids.len(),
            output_run = reader.as_ref().map(|r| r.id()),
            entries = entry_count,
            "Compaction finished"
        );

        Ok(CompactionOutcome {
            inputs: input_ids,
            output,
        })
    }

    /// Get the number of runs
    pub fn run_count(&self) -> usize {
        self.runs.read().len()
    }

    /// Ids of the current runs, oldest → newest
    pub fn run_ids(&self) -> Vec<u64> {
        self.runs.read().iter().map(|r| r.id()).collect()
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Get the next run ID (for testing/debugging)
    pub fn next_run_id(&self) -> u64 {
        self.next_run_id.load(Ordering::SeqCst)
    }

    /// What `open` recovered and cleaned up
    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.recovery
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Tombstone-free merge over `runs`
    fn merge_runs(runs: &[Arc<SSTableReader>]) -> Result<MergeIterator> {
        let sources = runs.iter().map(|r| Source::Run(r.iter())).collect();
        MergeIterator::new(sources, MergePolicy::SkipTombstones)
    }

    /// Compute the next run set from the current one, persist it as the
    /// manifest and install it
    ///
    /// The run set is installed whenever the manifest rename happened, even
    /// if the directory sync after it failed.
    fn publish<F>(&self, change: F) -> std::result::Result<(), PublishError>
    where
        F: FnOnce(&[Arc<SSTableReader>]) -> Vec<Arc<SSTableReader>>,
    {
        let _manifest = self.manifest_lock.lock();

        let current = self.snapshot();
        let next = change(&current);

        let result = Manifest::new(next.iter().map(|r| r.id()).collect()).publish(&self.data_dir);
        if !matches!(result, Err(PublishError::NotReplaced(_))) {
            *self.runs.write() = Arc::new(next);
        }

        result
    }

    /// Generate the file path for a run with given ID
    fn run_path(&self, id: u64) -> PathBuf {
        Self::run_path_with_dir(&self.data_dir, id)
    }

    /// Generate run path given a directory and ID
    pub fn run_path_with_dir(dir: &Path, id: u64) -> PathBuf {
        dir.join(format!("run_{:06}.sst", id))
    }

    /// Parse run ID from filename
    /// "run_000042.sst" → Some(42), "run_000042.sst.tmp" → Some(42)
    fn parse_run_id(path: &Path) -> Option<u64> {
        let name = path.file_name()?.to_str()?;
        if name == MANIFEST_FILENAME {
            return None;
        }
        let rest = name.strip_prefix("run_")?;
        let id_str = rest.strip_suffix(".sst").or_else(|| rest.strip_suffix(".sst.tmp"))?;
        id_str.parse().ok()
    }
}
