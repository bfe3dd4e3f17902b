//! Key Ordering
//!
//! Byte-wise lexicographic comparison used everywhere keys are ordered:
//! the memtable, the run index binary search and the merge heap.
//!
//! Rules:
//! - scan from byte 0, the first differing byte decides (compared unsigned)
//! - if one key is a strict prefix of the other, the shorter key sorts first
//! - identical sequences are equal
//!
//! This is the same order as `Ord for [u8]`, which the memtable's skip list
//! relies on. Keeping an explicit function makes the contract visible at the
//! call sites that decode keys from disk.

use std::cmp::Ordering;

/// Compare two keys
#[inline]
pub fn compare(a: &[u8], b: &[u8]) -> Ordering {
    let common = a.len().min(b.len());

    for i in 0..common {
        match a[i].cmp(&b[i]) {
            Ordering::Equal => continue,
            other => return other,
        }
    }

    a.len().cmp(&b.len())
}
