//! SSTable Reader
//!
//! Opens run files and serves point lookups by binary search over the index
//! block. The index and filter are held in memory; keys and values are read
//! from the data block on demand.

use std::cmp::Ordering;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use bytes::Buf;

use crate::entry::Entry;
use crate::error::Result;
use crate::key;
use crate::storage::bloom::BloomFilter;
use crate::StrataError;

use super::iterator::SSTableIterator;
use super::{FLAG_HAS_FILTER, HEADER_SIZE, INDEX_RECORD_SIZE, MAGIC, TOMBSTONE_BIT, VERSION};

/// Outcome of a binary search over the index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Search {
    /// Key found at this position
    Found(usize),
    /// Key absent; this is the position of the first larger key
    NotFound(usize),
}

impl Search {
    /// Position usable as an inclusive lower / exclusive upper range bound
    pub fn position(self) -> usize {
        match self {
            Search::Found(i) | Search::NotFound(i) => i,
        }
    }
}

/// Decoded index record
#[derive(Debug, Clone, Copy)]
struct IndexRecord {
    key_offset: u64,
    value_offset: u64,
    tombstone: bool,
}

/// Reader for run files
///
/// Shared between threads behind an `Arc`. Data reads are positional, so
/// concurrent readers never contend on a file cursor.
/// A reader marked obsolete deletes its file when the last handle drops.
pub struct SSTableReader {
    /// Run identifier (from the file name)
    id: u64,
    path: PathBuf,
    file: File,
    index: Vec<IndexRecord>,
    filter: Option<BloomFilter>,
    /// Absolute offset of the data block
    data_start: u64,
    /// Length of the data block
    data_len: u64,
    file_size: u64,
    min_key: Vec<u8>,
    max_key: Vec<u8>,
    obsolete: AtomicBool,
}

impl SSTableReader {
    /// Open a run file and validate its header, checksum and index
    pub fn open(path: &Path, id: u64) -> Result<Self> {
        let mut file = File::open(path)?;
        let file_size = file.metadata()?.len();

        if file_size < HEADER_SIZE {
            return Err(StrataError::Corruption(format!(
                "Run {} is shorter than its header ({} bytes)",
                path.display(),
                file_size
            )));
        }

        let mut header = [0u8; HEADER_SIZE as usize];
        file.read_exact(&mut header)?;
        let mut h = &header[..];

        let mut magic = [0u8; 4];
        h.copy_to_slice(&mut magic);
        if &magic != MAGIC {
            return Err(StrataError::Corruption(format!(
                "Invalid run magic in {}: {:?}",
                path.display(),
                magic
            )));
        }

        let version = h.get_u16_le();
        if version != VERSION {
            return Err(StrataError::Corruption(format!(
                "Unsupported run version {} in {}",
                version,
                path.display()
            )));
        }

        let flags = h.get_u16_le();
        let filter_len = h.get_u64_le();
        let entry_count = h.get_u64_le();
        let stored_crc = h.get_u32_le();

        if (flags & FLAG_HAS_FILTER == 0) != (filter_len == 0) {
            return Err(StrataError::Corruption(format!(
                "Run {} filter flag disagrees with filter length {}",
                path.display(),
                filter_len
            )));
        }

        let blocks_len = entry_count
            .checked_mul(INDEX_RECORD_SIZE)
            .and_then(|index_len| index_len.checked_add(filter_len))
            .filter(|len| HEADER_SIZE + len <= file_size)
            .ok_or_else(|| {
                StrataError::Corruption(format!(
                    "Run {} truncated: {} entries and {} filter bytes do not fit in {} bytes",
                    path.display(),
                    entry_count,
                    filter_len,
                    file_size
                ))
            })?;

        let mut blocks = vec![0u8; blocks_len as usize];
        file.read_exact(&mut blocks)?;

        if crc32fast::hash(&blocks) != stored_crc {
            return Err(StrataError::Corruption(format!(
                "Run {} checksum mismatch",
                path.display()
            )));
        }

        let filter = if filter_len > 0 {
            Some(BloomFilter::decode(&blocks[..filter_len as usize])?)
        } else {
            None
        };

        let data_start = HEADER_SIZE + blocks_len;
        let data_len = file_size - data_start;

        let mut raw = &blocks[filter_len as usize..];
        let mut index = Vec::with_capacity(entry_count as usize);
        for _ in 0..entry_count {
            let key_offset = raw.get_u64_le();
            let encoded = raw.get_u64_le();
            index.push(IndexRecord {
                key_offset,
                value_offset: encoded & !TOMBSTONE_BIT,
                tombstone: encoded & TOMBSTONE_BIT != 0,
            });
        }

        // Entries are contiguous: key, value, next key, with no gaps
        for (i, record) in index.iter().enumerate() {
            let value_end = index.get(i + 1).map_or(data_len, |next| next.key_offset);
            let expected_start = if i == 0 { 0 } else { index[i - 1].key_offset };
            if (i == 0 && record.key_offset != 0)
                || record.key_offset < expected_start
                || record.value_offset < record.key_offset
                || record.value_offset > value_end
                || (record.tombstone && record.value_offset != value_end)
            {
                return Err(StrataError::Corruption(format!(
                    "Run {} has an inconsistent index record at position {}",
                    path.display(),
                    i
                )));
            }
        }

        let mut reader = Self {
            id,
            path: path.to_path_buf(),
            file,
            index,
            filter,
            data_start,
            data_len,
            file_size,
            min_key: Vec::new(),
            max_key: Vec::new(),
            obsolete: AtomicBool::new(false),
        };

        if let Some(last) = reader.index.len().checked_sub(1) {
            reader.min_key = reader.key_at(0)?;
            reader.max_key = reader.key_at(last)?;
        }

        Ok(reader)
    }

    /// Binary search for `key` over the index
    pub fn search(&self, key: &[u8]) -> Result<Search> {
        let mut low = 0usize;
        let mut high = self.index.len();

        while low < high {
            let mid = low + (high - low) / 2;
            let probe = self.key_at(mid)?;
            match key::compare(&probe, key) {
                Ordering::Less => low = mid + 1,
                Ordering::Greater => high = mid,
                Ordering::Equal => return Ok(Search::Found(mid)),
            }
        }

        Ok(Search::NotFound(low))
    }

    /// Get an entry by key
    ///
    /// Returns:
    /// - `Ok(Some(Entry::Value(_)))`: key found with value
    /// - `Ok(Some(Entry::Tombstone))`: key deleted in this run
    /// - `Ok(None)`: key not in this run
    pub fn get(&self, key: &[u8]) -> Result<Option<Entry>> {
        if !self.might_contain(key) {
            return Ok(None);
        }

        match self.search(key)? {
            Search::Found(i) => Ok(Some(self.entry_at(i)?.1)),
            Search::NotFound(_) => Ok(None),
        }
    }

    /// Quick check before a point lookup: key range, then bloom filter.
    /// False means the key is definitely absent.
    pub fn might_contain(&self, key: &[u8]) -> bool {
        if self.index.is_empty()
            || key::compare(key, &self.min_key) == Ordering::Less
            || key::compare(key, &self.max_key) == Ordering::Greater
        {
            return false;
        }

        self.filter.as_ref().map_or(true, |f| f.might_contain(key))
    }

    /// Key stored at index position `i`
    pub fn key_at(&self, i: usize) -> Result<Vec<u8>> {
        let record = self.record(i)?;
        self.read_data(record.key_offset, record.value_offset)
    }

    /// Key and entry stored at index position `i`
    pub fn entry_at(&self, i: usize) -> Result<(Vec<u8>, Entry)> {
        let record = self.record(i)?;
        let value_end = self.value_end(i);

        let mut bytes = self.read_data(record.key_offset, value_end)?;
        let key_len = (record.value_offset - record.key_offset) as usize;

        let entry = if record.tombstone {
            bytes.truncate(key_len);
            Entry::Tombstone
        } else {
            Entry::Value(bytes.split_off(key_len))
        };

        Ok((bytes, entry))
    }

    /// Iterate over `[from, to)`; `None` bounds are open
    pub fn range(
        self: &Arc<Self>,
        from: Option<&[u8]>,
        to: Option<&[u8]>,
    ) -> Result<SSTableIterator> {
        let start = match from {
            Some(k) => self.search(k)?.position(),
            None => 0,
        };
        let end = match to {
            Some(k) => self.search(k)?.position(),
            None => self.index.len(),
        };

        Ok(SSTableIterator::new(Arc::clone(self), start, end.max(start)))
    }

    /// Iterate over all entries (for compaction, debugging)
    pub fn iter(self: &Arc<Self>) -> SSTableIterator {
        SSTableIterator::new(Arc::clone(self), 0, self.index.len())
    }

    /// Delete the file once the last handle to this reader is dropped
    pub fn mark_obsolete(&self) {
        self.obsolete.store(true, AtomicOrdering::SeqCst);
    }

    pub fn is_obsolete(&self) -> bool {
        self.obsolete.load(AtomicOrdering::SeqCst)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get entry count
    pub fn entry_count(&self) -> u64 {
        self.index.len() as u64
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn has_filter(&self) -> bool {
        self.filter.is_some()
    }

    /// Get the minimum key in this run
    pub fn min_key(&self) -> Option<&[u8]> {
        (!self.index.is_empty()).then_some(self.min_key.as_slice())
    }

    /// Get the maximum key in this run
    pub fn max_key(&self) -> Option<&[u8]> {
        (!self.index.is_empty()).then_some(self.max_key.as_slice())
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn record(&self, i: usize) -> Result<IndexRecord> {
        self.index.get(i).copied().ok_or_else(|| {
            StrataError::Storage(format!(
                "Index position {} out of bounds for run {} ({} entries)",
                i,
                self.id,
                self.index.len()
            ))
        })
    }

    /// End of the value at position `i`: next key's start, or end of data
    fn value_end(&self, i: usize) -> u64 {
        self.index
            .get(i + 1)
            .map_or(self.data_len, |next| next.key_offset)
    }

    /// Read `[start, end)` of the data block
    fn read_data(&self, start: u64, end: u64) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; (end - start) as usize];
        read_exact_at(&self.file, &mut buf, self.data_start + start)?;
        Ok(buf)
    }
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => {
                let rest = buf;
                buf = &mut rest[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

impl Drop for SSTableReader {
    fn drop(&mut self) {
        if self.is_obsolete() {
            match fs::remove_file(&self.path) {
                Ok(()) => tracing::debug!(run_id = self.id, "Deleted obsolete run"),
                Err(e) => tracing::warn!(run_id = self.id, error = %e, "Failed to delete obsolete run"),
            }
        }
    }
}
