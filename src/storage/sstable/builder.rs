//! SSTable Builder
//!
//! Writes sorted, deduplicated entries to a new run file.
//!
//! The entry count and payload size are known up front, so the builder sizes
//! the file exactly, streams the data block at its final offset and writes
//! the header, filter and index blocks once every key has been seen. The
//! file lives under a temporary name until `finish()` has synced it.

use std::cmp::Ordering;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytes::{BufMut, BytesMut};

use crate::entry::Entry;
use crate::error::Result;
use crate::key;
use crate::storage::bloom::BloomFilter;
use crate::StrataError;

use super::{
    temp_path, SSTable, FLAG_HAS_FILTER, HEADER_SIZE, INDEX_RECORD_SIZE, MAGIC, TOMBSTONE_BIT,
    VERSION,
};

/// Builder for creating a new run from sorted entries
pub struct SSTableBuilder {
    /// Final file path
    path: PathBuf,
    /// Path written to until `finish()`
    tmp_path: PathBuf,
    /// Buffered writer positioned inside the data block
    writer: Option<BufWriter<File>>,
    /// Index records: (key offset, value offset | tombstone bit)
    index: Vec<(u64, u64)>,
    /// Filter filled as keys arrive
    filter: Option<BloomFilter>,
    /// Declared entry count and data block size
    expected_count: u64,
    payload_size: u64,
    /// Progress
    entry_count: u64,
    data_offset: u64,
    min_key: Option<Vec<u8>>,
    last_key: Option<Vec<u8>>,
    finished: bool,
}

impl SSTableBuilder {
    /// Create a builder for exactly `entry_count` entries whose keys and
    /// values total `payload_size` bytes.
    ///
    /// `false_positive_rate = None` writes the run without a filter block.
    pub fn new(
        path: &Path,
        entry_count: u64,
        payload_size: u64,
        false_positive_rate: Option<f64>,
    ) -> Result<Self> {
        let tmp_path = temp_path(path);

        let filter =
            false_positive_rate.map(|rate| BloomFilter::with_rate(entry_count as usize, rate));
        let filter_len = filter.as_ref().map_or(0, |f| f.encoded_len() as u64);
        let data_start = HEADER_SIZE + filter_len + entry_count * INDEX_RECORD_SIZE;

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;

        file.set_len(data_start + payload_size)?;
        file.seek(SeekFrom::Start(data_start))?;

        Ok(Self {
            path: path.to_path_buf(),
            tmp_path,
            writer: Some(BufWriter::new(file)),
            index: Vec::with_capacity(entry_count as usize),
            filter,
            expected_count: entry_count,
            payload_size,
            entry_count: 0,
            data_offset: 0,
            min_key: None,
            last_key: None,
            finished: false,
        })
    }

    /// Add a key-value pair (must be called in strictly ascending key order)
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.write_entry(key, Some(value))
    }

    /// Add a tombstone (must be called in strictly ascending key order)
    pub fn add_tombstone(&mut self, key: &[u8]) -> Result<()> {
        self.write_entry(key, None)
    }

    /// Add an entry of either kind
    pub fn add_entry(&mut self, key: &[u8], entry: &Entry) -> Result<()> {
        self.write_entry(key, entry.value())
    }

    /// Internal: write an entry (value=None means tombstone)
    fn write_entry(&mut self, key: &[u8], value: Option<&[u8]>) -> Result<()> {
        if let Some(last) = &self.last_key {
            if key::compare(last, key) != Ordering::Less {
                return Err(StrataError::Storage(format!(
                    "Run keys out of order: {:?} after {:?}",
                    String::from_utf8_lossy(key),
                    String::from_utf8_lossy(last)
                )));
            }
        }

        let value_len = value.map_or(0, |v| v.len() as u64);
        if self.entry_count == self.expected_count
            || self.data_offset + key.len() as u64 + value_len > self.payload_size
        {
            return Err(StrataError::Storage(format!(
                "Run exceeds declared size of {} entries / {} bytes",
                self.expected_count, self.payload_size
            )));
        }

        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| StrataError::Storage("Run builder already finished".to_string()))?;

        let key_offset = self.data_offset;
        let value_offset = key_offset + key.len() as u64;

        writer.write_all(key)?;
        if let Some(v) = value {
            writer.write_all(v)?;
        }

        let encoded_value_offset = match value {
            Some(_) => value_offset,
            None => value_offset | TOMBSTONE_BIT,
        };
        self.index.push((key_offset, encoded_value_offset));

        if let Some(filter) = self.filter.as_mut() {
            filter.insert(key);
        }
        if self.min_key.is_none() {
            self.min_key = Some(key.to_vec());
        }
        self.last_key = Some(key.to_vec());

        self.data_offset = value_offset + value_len;
        self.entry_count += 1;

        Ok(())
    }

    /// Finish building: write header, filter and index, sync, and move the
    /// file to its final name
    pub fn finish(mut self) -> Result<SSTable> {
        if self.entry_count != self.expected_count || self.data_offset != self.payload_size {
            return Err(StrataError::Storage(format!(
                "Run incomplete: wrote {} of {} entries, {} of {} bytes",
                self.entry_count, self.expected_count, self.data_offset, self.payload_size
            )));
        }

        let writer = self
            .writer
            .take()
            .ok_or_else(|| StrataError::Storage("Run builder already finished".to_string()))?;
        let mut file = writer.into_inner().map_err(|e| {
            StrataError::Storage(format!("Failed to flush run data block: {}", e))
        })?;

        // Filter + index, covered by the header checksum
        let mut blocks = BytesMut::with_capacity(self.index.len() * INDEX_RECORD_SIZE as usize);
        if let Some(filter) = &self.filter {
            filter.encode(&mut blocks);
        }
        let filter_len = blocks.len() as u64;
        for (key_offset, value_offset) in &self.index {
            blocks.put_u64_le(*key_offset);
            blocks.put_u64_le(*value_offset);
        }
        let crc = crc32fast::hash(&blocks);

        let mut header = BytesMut::with_capacity(HEADER_SIZE as usize);
        header.put_slice(MAGIC);
        header.put_u16_le(VERSION);
        header.put_u16_le(if self.filter.is_some() { FLAG_HAS_FILTER } else { 0 });
        header.put_u64_le(filter_len);
        header.put_u64_le(self.entry_count);
        header.put_u32_le(crc);
        header.put_u32_le(0);

        file.seek(SeekFrom::Start(0))?;
        file.write_all(&header)?;
        file.write_all(&blocks)?;
        file.sync_all()?;

        let file_size = file.metadata()?.len();
        drop(file);

        fs::rename(&self.tmp_path, &self.path)?;
        self.finished = true;

        Ok(SSTable {
            path: self.path.clone(),
            entry_count: self.entry_count,
            min_key: self.min_key.take().unwrap_or_default(),
            max_key: self.last_key.take().unwrap_or_default(),
            file_size,
            has_filter: self.filter.is_some(),
        })
    }

    /// Write a complete run from an already sorted, deduplicated stream
    pub fn write_run<I>(
        path: &Path,
        entries: I,
        entry_count: u64,
        payload_size: u64,
        false_positive_rate: Option<f64>,
    ) -> Result<SSTable>
    where
        I: IntoIterator<Item = Result<(Vec<u8>, Entry)>>,
    {
        let mut builder = Self::new(path, entry_count, payload_size, false_positive_rate)?;
        for item in entries {
            let (key, entry) = item?;
            builder.add_entry(&key, &entry)?;
        }
        builder.finish()
    }
}

impl Drop for SSTableBuilder {
    fn drop(&mut self) {
        if !self.finished {
            drop(self.writer.take());
            let _ = fs::remove_file(&self.tmp_path);
        }
    }
}
