//! Engine Module
//!
//! The core storage engine that coordinates all components.
//!
//! ## Responsibilities
//! - Route writes to the live MemTable and reads across every layer
//! - Seal full memtables and hand them to the background flusher
//! - Apply backpressure while a flush is outstanding
//! - Run compactions on request or when runs pile up
//! - Flush remaining data on close
//!
//! ## Durability
//! There is no write-ahead log. Writes are durable once the memtable that
//! holds them has been flushed; anything still in memory is lost if the
//! process dies without `close()`.

use std::mem;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use parking_lot::{Condvar, Mutex, RwLock};

use crate::config::Config;
use crate::entry::Entry;
use crate::error::{Result, StrataError};
use crate::memtable::MemTable;
use crate::storage::{CompactionOutcome, MergeIterator, MergePolicy, RunSet, Source, StorageManager};

/// The memtables visible to readers
struct LsmState {
    /// Accepts writes
    live: Arc<MemTable>,
    /// Sealed, waiting to become a run; still served to readers
    flushing: Option<Arc<MemTable>>,
}

/// Every layer as of one instant
struct Snapshot {
    live: Arc<MemTable>,
    /// Writes to `live` after this sequence are invisible
    live_seq: u64,
    flushing: Option<Arc<MemTable>>,
    runs: RunSet,
}

/// State shared between the engine handle and its worker threads
struct Inner {
    config: Config,

    state: RwLock<LsmState>,

    /// Persistent storage manager (runs + manifest)
    storage: StorageManager,

    /// Serializes upserts into the live memtable
    write_lock: Mutex<()>,

    /// At most one flush in flight
    flush_lock: Mutex<()>,

    /// Writers stalled on a full memtable wait here for a flush to finish
    stall_lock: Mutex<()>,
    flush_done: Condvar,

    /// Nudges for the background workers (dropped on shutdown)
    flush_tx: Mutex<Option<Sender<()>>>,
    compact_tx: Mutex<Option<Sender<()>>>,

    closed: AtomicBool,
}

/// The main storage engine
///
/// ## Concurrency Model
///
/// - **Writes** (upsert/put/delete): serialized by `write_lock`, touch only
///   memory. Sealing swaps the live memtable under the state write lock.
/// - **Reads** (get/range): take a snapshot of live + flushing memtables, the
///   live memtable's sequence and the run set under the state read lock,
///   then proceed without locks.
/// - **Flush**: one background worker; explicit `flush()` runs on the caller
///   thread. `flush_lock` keeps them from overlapping.
/// - **Compaction**: one background worker; explicit `compact()` runs on the
///   caller thread. The storage manager serializes them.
///
/// ## Backpressure
/// If the live memtable is full while the previous one is still flushing,
/// a writer waits up to `write_stall_timeout_ms` and then fails with
/// `StrataError::WriteStall` without applying the write.
pub struct Engine {
    inner: Arc<Inner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    /// Open or create an engine with the given config
    ///
    /// On startup:
    /// 1. Validate config
    /// 2. Recover the run set from the manifest (cleaning leftovers)
    /// 3. Start the flush and compaction workers
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;

        let storage = StorageManager::open(&config.data_dir, config.bloom_false_positive_rate)?;

        let (flush_tx, flush_rx) = channel::bounded(1);
        let (compact_tx, compact_rx) = channel::bounded(1);

        let inner = Arc::new(Inner {
            state: RwLock::new(LsmState {
                live: Arc::new(MemTable::new(config.memtable_size_limit)),
                flushing: None,
            }),
            storage,
            write_lock: Mutex::new(()),
            flush_lock: Mutex::new(()),
            stall_lock: Mutex::new(()),
            flush_done: Condvar::new(),
            flush_tx: Mutex::new(Some(flush_tx)),
            compact_tx: Mutex::new(Some(compact_tx)),
            closed: AtomicBool::new(false),
            config,
        });

        let workers = vec![
            Self::spawn_worker("stratakv-flush", Arc::clone(&inner), flush_rx, Inner::flush_worker)?,
            Self::spawn_worker(
                "stratakv-compact",
                Arc::clone(&inner),
                compact_rx,
                Inner::compaction_worker,
            )?,
        ];

        tracing::info!(
            data_dir = %inner.config.data_dir.display(),
            runs = inner.storage.run_count(),
            memtable_limit = inner.config.memtable_size_limit,
            "Engine opened"
        );

        let engine = Self {
            inner,
            workers: Mutex::new(workers),
        };
        engine.inner.maybe_schedule_compaction();

        Ok(engine)
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        Self::open(Config::builder().data_dir(path).build())
    }

    fn spawn_worker(
        name: &str,
        inner: Arc<Inner>,
        rx: Receiver<()>,
        work: fn(&Inner, Receiver<()>),
    ) -> Result<JoinHandle<()>> {
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || work(&inner, rx))?;
        Ok(handle)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Get a value by key; deleted and missing keys both return `None`
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.get_entry(key)?.and_then(Entry::into_value))
    }

    /// Get the newest entry for a key, tombstones included
    ///
    /// Search order:
    /// 1. Live MemTable
    /// 2. Flushing MemTable
    /// 3. Runs (newest to oldest)
    pub fn get_entry(&self, key: &[u8]) -> Result<Option<Entry>> {
        self.inner.ensure_open()?;
        let snapshot = self.inner.snapshot();

        if let Some(entry) = snapshot.live.get_at(key, snapshot.live_seq) {
            return Ok(Some(entry));
        }
        if let Some(entry) = snapshot.flushing.as_ref().and_then(|m| m.get(key)) {
            return Ok(Some(entry));
        }

        StorageManager::get_from(&snapshot.runs, key)
    }

    /// Ascending scan over `[from, to)`, deleted keys omitted
    ///
    /// The live memtable is read lazily at the sequence captured when the
    /// call is made and the run set is pinned, so writes issued after that
    /// point are not observed.
    pub fn range(&self, from: Option<&[u8]>, to: Option<&[u8]>) -> Result<RangeIter> {
        self.inner.ensure_open()?;
        let snapshot = self.inner.snapshot();

        // Sources oldest first: runs, then flushing, then live
        let mut sources = Vec::with_capacity(snapshot.runs.len() + 2);
        for run in snapshot.runs.iter() {
            sources.push(Source::Run(run.range(from, to)?));
        }
        if let Some(flushing) = &snapshot.flushing {
            sources.push(Source::MemTable(flushing.scan(from, to, flushing.sequence())));
        }
        sources.push(Source::MemTable(snapshot.live.scan(from, to, snapshot.live_seq)));

        Ok(RangeIter {
            inner: MergeIterator::new(sources, MergePolicy::SkipTombstones)?,
        })
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Insert or replace an entry
    ///
    /// Steps:
    /// 1. Acquire write lock
    /// 2. Wait (bounded) if the memtable is full and a flush is outstanding
    /// 3. Write to MemTable
    /// 4. Seal and schedule a flush if the limit was reached
    pub fn upsert(&self, key: &[u8], entry: Entry) -> Result<()> {
        self.inner.ensure_open()?;
        let _write_guard = self.inner.write_lock.lock();

        self.inner.wait_for_capacity()?;

        let full = {
            let state = self.inner.state.read();
            state.live.upsert(key.to_vec(), entry)
        };

        if full && self.inner.seal() {
            self.inner.schedule_flush();
        }

        Ok(())
    }

    /// Put a key-value pair
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.upsert(key, Entry::Value(value.to_vec()))
    }

    /// Delete a key (writes a tombstone)
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.upsert(key, Entry::Tombstone)
    }

    // =========================================================================
    // Flush & Compaction
    // =========================================================================

    /// Flush memtables to disk (public API)
    ///
    /// Finishes any outstanding flush, then seals and flushes the live
    /// memtable regardless of its size. Errors leave the data in memory.
    pub fn flush(&self) -> Result<()> {
        self.inner.ensure_open()?;
        self.inner.flush_all()
    }

    /// Merge the whole data set into a single run, dropping deleted keys
    ///
    /// The live memtable is flushed first so its entries take part.
    pub fn compact(&self) -> Result<CompactionOutcome> {
        self.inner.ensure_open()?;
        self.inner.flush_all()?;
        self.inner.storage.compact()
    }

    /// Close the engine gracefully
    ///
    /// Stops the workers and flushes any pending data
    pub fn close(self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // Disconnecting the channels ends the worker loops
        self.inner.flush_tx.lock().take();
        self.inner.compact_tx.lock().take();
        self.inner.wake_stalled_writers();

        let mut panicked = None;
        for handle in mem::take(&mut *self.workers.lock()) {
            let name = handle.thread().name().unwrap_or("worker").to_string();
            if handle.join().is_err() {
                tracing::error!(worker = %name, "Background worker panicked");
                panicked.get_or_insert(name);
            }
        }

        let result = self.inner.flush_all();
        match &result {
            Ok(()) => tracing::info!(runs = self.inner.storage.run_count(), "Engine closed"),
            Err(e) => tracing::error!(error = %e, "Final flush failed, unflushed writes are lost"),
        }
        result?;

        match panicked {
            Some(name) => Err(StrataError::Background(format!("{} panicked", name))),
            None => Ok(()),
        }
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.inner.config.data_dir
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the live memtable size
    pub fn memtable_size(&self) -> usize {
        self.inner.state.read().live.size()
    }

    /// Get the live memtable entry count
    pub fn memtable_entry_count(&self) -> usize {
        self.inner.state.read().live.entry_count()
    }

    /// Whether a sealed memtable is waiting to be flushed
    pub fn flush_pending(&self) -> bool {
        self.inner.state.read().flushing.is_some()
    }

    /// Get the number of runs
    pub fn run_count(&self) -> usize {
        self.inner.storage.run_count()
    }

    /// Ids of the current runs, oldest → newest
    pub fn run_ids(&self) -> Vec<u64> {
        self.inner.storage.run_ids()
    }

    /// Current runs, oldest → newest
    pub fn runs(&self) -> RunSet {
        self.inner.storage.snapshot()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::error!(error = %e, "Engine shutdown on drop failed");
        }
    }
}

impl Inner {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StrataError::Closed);
        }
        Ok(())
    }

    /// Consistent view of every layer
    fn snapshot(&self) -> Snapshot {
        let state = self.state.read();
        Snapshot {
            live: Arc::clone(&state.live),
            live_seq: state.live.sequence(),
            flushing: state.flushing.clone(),
            runs: self.storage.snapshot(),
        }
    }

    /// Swap the live memtable for an empty one if nothing is flushing
    ///
    /// Returns true if a memtable was sealed.
    fn seal(&self) -> bool {
        let mut state = self.state.write();
        if state.flushing.is_some() || state.live.is_empty() {
            return false;
        }

        let fresh = Arc::new(MemTable::new(self.config.memtable_size_limit));
        let sealed = mem::replace(&mut state.live, fresh);
        tracing::debug!(
            entries = sealed.entry_count(),
            bytes = sealed.size(),
            "Sealed memtable"
        );
        state.flushing = Some(sealed);
        true
    }

    /// Block (bounded) while the live memtable is full and a flush is outstanding
    fn wait_for_capacity(&self) -> Result<()> {
        let started = Instant::now();
        let deadline = started + Duration::from_millis(self.config.write_stall_timeout_ms);
        let mut guard = self.stall_lock.lock();

        loop {
            let (full, flushing) = {
                let state = self.state.read();
                (state.live.is_full(), state.flushing.is_some())
            };

            if !full {
                return Ok(());
            }
            if !flushing {
                // Previous seal was refused while a flush was running
                if self.seal() {
                    self.schedule_flush();
                }
                return Ok(());
            }
            self.ensure_open()?;

            if self.flush_done.wait_until(&mut guard, deadline).timed_out() {
                let still_blocked = {
                    let state = self.state.read();
                    state.live.is_full() && state.flushing.is_some()
                };
                if still_blocked {
                    let waited_ms = started.elapsed().as_millis() as u64;
                    tracing::warn!(waited_ms, "Write stalled on outstanding flush");
                    return Err(StrataError::WriteStall { waited_ms });
                }
            }
        }
    }

    fn wake_stalled_writers(&self) {
        let _guard = self.stall_lock.lock();
        self.flush_done.notify_all();
    }

    /// Write the flushing memtable, if any, to a run
    ///
    /// Returns true if a memtable was flushed.
    fn flush_sealed(&self) -> Result<bool> {
        let _flush_guard = self.flush_lock.lock();

        let flushing = self.state.read().flushing.clone();
        let flushing = match flushing {
            Some(memtable) => memtable,
            None => return Ok(false),
        };

        // Run is installed before the memtable is dropped, so readers always
        // find the data in at least one layer
        self.storage.flush(&flushing)?;
        self.state.write().flushing = None;

        self.wake_stalled_writers();
        self.maybe_schedule_compaction();
        Ok(true)
    }

    /// Flush the outstanding memtable and then the live one
    fn flush_all(&self) -> Result<()> {
        self.flush_sealed()?;
        if self.seal() {
            self.flush_sealed()?;
        }
        Ok(())
    }

    fn schedule_flush(&self) {
        Self::nudge(&self.flush_tx);
    }

    fn maybe_schedule_compaction(&self) {
        let trigger = self.config.compaction_trigger;
        if trigger > 0 && self.storage.run_count() >= trigger {
            Self::nudge(&self.compact_tx);
        }
    }

    /// Wake a worker; a nudge already queued covers this one
    fn nudge(tx: &Mutex<Option<Sender<()>>>) {
        if let Some(tx) = tx.lock().as_ref() {
            match tx.try_send(()) {
                Ok(()) | Err(TrySendError::Full(())) => {}
                Err(TrySendError::Disconnected(())) => {
                    tracing::warn!("Background worker is gone");
                }
            }
        }
    }

    /// Background flush loop: flush until nothing sealed remains, retrying
    /// failures after a backoff
    fn flush_worker(&self, rx: Receiver<()>) {
        let backoff = Duration::from_millis(self.config.flush_retry_backoff_ms);

        while rx.recv().is_ok() {
            loop {
                if self.closed.load(Ordering::SeqCst) {
                    return;
                }
                match self.flush_sealed() {
                    Ok(true) => {
                        // Writers may have filled the new memtable meanwhile
                        let live_full = self.state.read().live.is_full();
                        if !(live_full && self.seal()) {
                            break;
                        }
                    }
                    Ok(false) => break,
                    Err(e) => {
                        tracing::error!(error = %e, retry_in_ms = backoff.as_millis() as u64, "Background flush failed");
                        thread::sleep(backoff);
                    }
                }
            }
        }

        tracing::debug!("Flush worker stopped");
    }

    /// Background compaction loop
    fn compaction_worker(&self, rx: Receiver<()>) {
        while rx.recv().is_ok() {
            if self.closed.load(Ordering::SeqCst) {
                break;
            }
            if let Err(e) = self.storage.compact() {
                tracing::error!(error = %e, "Background compaction failed");
            }
        }

        tracing::debug!("Compaction worker stopped");
    }
}

/// Iterator returned by `Engine::range`
///
/// Yields live `(key, value)` pairs in ascending key order.
pub struct RangeIter {
    inner: MergeIterator,
}

impl Iterator for RangeIter {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.inner.next()? {
                Ok((key, Entry::Value(value))) => return Some(Ok((key, value))),
                // The merge already drops tombstones
                Ok((_, Entry::Tombstone)) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
