//! Configuration for StrataKV
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::error::{Result, StrataError};

/// Main configuration for a StrataKV instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── MANIFEST         (ordered list of live run ids)
    ///     └── run_000001.sst   (sorted runs)
    pub data_dir: PathBuf,

    /// Target false positive rate of per-run bloom filters.
    /// `None` writes runs without a filter block.
    pub bloom_false_positive_rate: Option<f64>,

    // -------------------------------------------------------------------------
    // MemTable Configuration
    // -------------------------------------------------------------------------
    /// Max size of memtable before it is sealed and flushed (in bytes)
    pub memtable_size_limit: usize,

    /// How long a writer waits for an outstanding flush when the live
    /// memtable is already full (milliseconds)
    pub write_stall_timeout_ms: u64,

    // -------------------------------------------------------------------------
    // Background Work Configuration
    // -------------------------------------------------------------------------
    /// Delay between retries of a failed background flush (milliseconds)
    pub flush_retry_backoff_ms: u64,

    /// Number of runs that triggers a background compaction (0 = manual only)
    pub compaction_trigger: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./stratakv_data"),
            bloom_false_positive_rate: Some(0.01),
            memtable_size_limit: 4 * 1024 * 1024, // 4 MB
            write_stall_timeout_ms: 1000,
            flush_retry_backoff_ms: 100,
            compaction_trigger: 8,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.memtable_size_limit == 0 {
            return Err(StrataError::Config(
                "memtable_size_limit must be greater than zero".to_string(),
            ));
        }

        if let Some(rate) = self.bloom_false_positive_rate {
            if !(rate > 0.0 && rate < 1.0) {
                return Err(StrataError::Config(format!(
                    "bloom_false_positive_rate must be in (0, 1), got {}",
                    rate
                )));
            }
        }

        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the bloom filter false positive rate (`None` disables filters)
    pub fn bloom_false_positive_rate(mut self, rate: Option<f64>) -> Self {
        self.config.bloom_false_positive_rate = rate;
        self
    }

    /// Set the memtable size limit (in bytes)
    pub fn memtable_size_limit(mut self, size: usize) -> Self {
        self.config.memtable_size_limit = size;
        self
    }

    /// Set the bounded wait applied to writers while a flush is outstanding
    pub fn write_stall_timeout_ms(mut self, ms: u64) -> Self {
        self.config.write_stall_timeout_ms = ms;
        self
    }

    /// Set the delay between background flush retries
    pub fn flush_retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.flush_retry_backoff_ms = ms;
        self
    }

    /// Set the run count that triggers background compaction (0 disables it)
    pub fn compaction_trigger(mut self, runs: usize) -> Self {
        self.config.compaction_trigger = runs;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
