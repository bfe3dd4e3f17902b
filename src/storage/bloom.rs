//! Bloom filter for skipping runs during point lookups.
//!
//! Built once from a run's final key set and stored in the run's filter
//! block. A negative answer is definitive; a positive answer only means the
//! run has to be searched.
//!
//! Sizing for `n` keys at false positive rate `p`:
//! - bits:   m = -n * ln(p) / (ln 2)^2
//! - probes: k = (m / n) * ln 2
//!
//! Probe positions use double hashing, `h_i = h1 + i * h2 mod m`, with h1
//! and h2 taken from xxh64 under two seeds.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{Result, StrataError};

/// Encoded header: num_hashes (4) + num_bits (8)
const HEADER_LEN: usize = 12;

/// Upper bound on probes per key
const MAX_HASHES: u32 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BloomFilter {
    bits: Vec<u8>,
    num_bits: u64,
    num_hashes: u32,
}

impl BloomFilter {
    /// Create an empty filter sized for `expected_keys` at the given false positive rate
    pub fn with_rate(expected_keys: usize, false_positive_rate: f64) -> Self {
        let n = expected_keys.max(1) as f64;
        let ln2 = std::f64::consts::LN_2;

        let num_bits = ((-n * false_positive_rate.ln()) / (ln2 * ln2)).ceil().max(64.0) as u64;
        let num_hashes = (((num_bits as f64 / n) * ln2).round() as u32).clamp(1, MAX_HASHES);

        Self {
            bits: vec![0u8; num_bits.div_ceil(8) as usize],
            num_bits,
            num_hashes,
        }
    }

    /// Build a filter over a complete key set
    pub fn from_keys<'a, I>(keys: I, expected_keys: usize, false_positive_rate: f64) -> Self
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let mut filter = Self::with_rate(expected_keys, false_positive_rate);
        for key in keys {
            filter.insert(key);
        }
        filter
    }

    pub fn insert(&mut self, key: &[u8]) {
        let (h1, h2) = Self::hash(key);
        for i in 0..self.num_hashes {
            let pos = self.bit_position(h1, h2, i);
            self.bits[(pos >> 3) as usize] |= 1 << (pos & 7);
        }
    }

    /// False means the key was never inserted
    pub fn might_contain(&self, key: &[u8]) -> bool {
        let (h1, h2) = Self::hash(key);
        (0..self.num_hashes).all(|i| {
            let pos = self.bit_position(h1, h2, i);
            self.bits[(pos >> 3) as usize] & (1 << (pos & 7)) != 0
        })
    }

    #[inline]
    fn hash(key: &[u8]) -> (u64, u64) {
        let h1 = xxhash_rust::xxh64::xxh64(key, 0);
        // An even h2 would revisit a subset of positions when m is even
        let h2 = xxhash_rust::xxh64::xxh64(key, 0x9e37_79b9) | 1;
        (h1, h2)
    }

    #[inline]
    fn bit_position(&self, h1: u64, h2: u64, i: u32) -> u64 {
        h1.wrapping_add((i as u64).wrapping_mul(h2)) % self.num_bits
    }

    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    /// Size of the encoded filter in bytes
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.bits.len()
    }

    /// Encode as `[num_hashes u32][num_bits u64][bits]`
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.num_hashes);
        buf.put_u64_le(self.num_bits);
        buf.put_slice(&self.bits);
    }

    pub fn decode(mut data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(StrataError::Corruption(format!(
                "Bloom filter block too short: {} bytes",
                data.len()
            )));
        }

        let num_hashes = data.get_u32_le();
        let num_bits = data.get_u64_le();
        let expected = num_bits.div_ceil(8) as usize;

        if num_bits == 0 || num_hashes == 0 || num_hashes > MAX_HASHES || data.len() != expected {
            return Err(StrataError::Corruption(format!(
                "Bloom filter header inconsistent: bits={} hashes={} payload={}",
                num_bits,
                num_hashes,
                data.len()
            )));
        }

        Ok(Self {
            bits: data.to_vec(),
            num_bits,
            num_hashes,
        })
    }
}
