//! Fixed-length bitmaps over the offsets of one segment.
//!
//! Bit `i` lives in byte `i / 8` at position `i % 8` (least significant bit
//! first). A set bit marks the offset as present.

// Offsets are u16 by construction; bit indices derived from them always fit.
#![allow(clippy::cast_possible_truncation)]

use serde::{Deserialize, Serialize};

/// Number of bits per byte.
const BITS_PER_BYTE: usize = 8;

/// A bitmap covering one segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Bitmap {
    bytes: Vec<u8>,
}

impl Bitmap {
    /// Create an empty bitmap of `len_bytes` bytes.
    #[must_use]
    pub fn new(len_bytes: usize) -> Self {
        Self {
            bytes: vec![0; len_bytes],
        }
    }

    /// Create a bitmap of `len_bytes` bytes with the given offsets set.
    #[must_use]
    pub fn from_offsets(len_bytes: usize, offsets: impl IntoIterator<Item = u16>) -> Self {
        let mut bitmap = Self::new(len_bytes);
        for offset in offsets {
            bitmap.set(offset);
        }
        bitmap
    }

    /// The underlying bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Number of offsets the bitmap can hold.
    #[must_use]
    pub fn bit_len(&self) -> usize {
        self.bytes.len() * BITS_PER_BYTE
    }

    /// Whether `offset` is set.
    #[must_use]
    pub fn get(&self, offset: u16) -> bool {
        self.bit(usize::from(offset))
    }

    /// Set `offset`. Returns whether the bit changed.
    pub fn set(&mut self, offset: u16) -> bool {
        let (byte, mask) = locate(usize::from(offset));
        match self.bytes.get_mut(byte) {
            Some(bits) if *bits & mask == 0 => {
                *bits |= mask;
                true
            }
            _ => false,
        }
    }

    /// Clear `offset`. Returns whether the bit changed.
    pub fn clear(&mut self, offset: u16) -> bool {
        let (byte, mask) = locate(usize::from(offset));
        match self.bytes.get_mut(byte) {
            Some(bits) if *bits & mask != 0 => {
                *bits &= !mask;
                true
            }
            _ => false,
        }
    }

    /// Number of set bits.
    #[must_use]
    pub fn count(&self) -> usize {
        self.bytes.iter().map(|b| b.count_ones() as usize).sum()
    }

    /// Whether no bit is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.iter().all(|b| *b == 0)
    }

    /// Lowest set offset.
    #[must_use]
    pub fn first(&self) -> Option<u16> {
        self.next_set_from(0)
    }

    /// Highest set offset.
    #[must_use]
    pub fn last(&self) -> Option<u16> {
        self.prev_set_from(self.bit_len().checked_sub(1)?)
    }

    /// Lowest set offset strictly above `offset`.
    #[must_use]
    pub fn next_after(&self, offset: u16) -> Option<u16> {
        self.next_set_from(usize::from(offset) + 1)
    }

    /// Highest set offset strictly below `offset`.
    #[must_use]
    pub fn prev_before(&self, offset: u16) -> Option<u16> {
        self.prev_set_from(usize::from(offset).checked_sub(1)?)
    }

    /// Lowest unset offset at or above `from`.
    #[must_use]
    pub fn first_zero_from(&self, from: u16) -> Option<u16> {
        (usize::from(from)..self.bit_len())
            .find(|i| !self.bit(*i))
            .map(|i| i as u16)
    }

    /// Number of set bits strictly below `offset`.
    #[must_use]
    pub fn rank(&self, offset: u16) -> usize {
        let offset = usize::from(offset);
        let whole = offset / BITS_PER_BYTE;
        let mut count: usize = self.bytes[..whole.min(self.bytes.len())]
            .iter()
            .map(|b| b.count_ones() as usize)
            .sum();
        if whole < self.bytes.len() {
            let mask = (1u16 << (offset % BITS_PER_BYTE)) - 1;
            count += (self.bytes[whole] & mask as u8).count_ones() as usize;
        }
        count
    }

    /// The `n`th set offset (0-based), in ascending order.
    #[must_use]
    pub fn nth(&self, n: usize) -> Option<u16> {
        let mut remaining = n;
        for (byte_index, byte) in self.bytes.iter().enumerate() {
            let ones = byte.count_ones() as usize;
            if remaining >= ones {
                remaining -= ones;
                continue;
            }
            for bit in 0..BITS_PER_BYTE {
                if byte & (1 << bit) != 0 {
                    if remaining == 0 {
                        return Some((byte_index * BITS_PER_BYTE + bit) as u16);
                    }
                    remaining -= 1;
                }
            }
        }
        None
    }

    /// Set offsets in ascending order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = u16> + '_ {
        (0..self.bit_len())
            .filter(|i| self.bit(*i))
            .map(|i| i as u16)
    }

    /// Clear every offset below `offset`.
    pub fn clear_below(&mut self, offset: u16) {
        let offset = usize::from(offset).min(self.bit_len());
        let whole = offset / BITS_PER_BYTE;
        for byte in &mut self.bytes[..whole] {
            *byte = 0;
        }
        for i in whole * BITS_PER_BYTE..offset {
            self.clear(i as u16);
        }
    }

    /// Clear every offset above `offset`.
    pub fn clear_above(&mut self, offset: u16) {
        let start = usize::from(offset) + 1;
        if start >= self.bit_len() {
            return;
        }
        let first_whole = start.div_ceil(BITS_PER_BYTE);
        for i in start..(first_whole * BITS_PER_BYTE).min(self.bit_len()) {
            self.clear(i as u16);
        }
        for byte in &mut self.bytes[first_whole..] {
            *byte = 0;
        }
    }

    /// Set every offset set in `other`.
    pub fn union_with(&mut self, other: &Self) {
        for (a, b) in self.bytes.iter_mut().zip(&other.bytes) {
            *a |= *b;
        }
    }

    /// Keep only offsets also set in `other`.
    pub fn intersect_with(&mut self, other: &Self) {
        for (i, a) in self.bytes.iter_mut().enumerate() {
            *a &= other.bytes.get(i).copied().unwrap_or(0);
        }
    }

    /// Clear every offset set in `other`.
    pub fn difference_with(&mut self, other: &Self) {
        for (a, b) in self.bytes.iter_mut().zip(&other.bytes) {
            *a &= !*b;
        }
    }

    /// Whether bit `i` is set; bits past the end read as unset.
    fn bit(&self, i: usize) -> bool {
        let (byte, mask) = locate(i);
        self.bytes.get(byte).is_some_and(|bits| bits & mask != 0)
    }

    fn next_set_from(&self, from: usize) -> Option<u16> {
        (from..self.bit_len())
            .find(|i| self.bit(*i))
            .map(|i| i as u16)
    }

    fn prev_set_from(&self, from: usize) -> Option<u16> {
        (0..=from.min(self.bit_len().checked_sub(1)?))
            .rev()
            .find(|i| self.bit(*i))
            .map(|i| i as u16)
    }
}

/// Byte index and mask of bit `i`.
const fn locate(i: usize) -> (usize, u8) {
    (i / BITS_PER_BYTE, 1 << (i % BITS_PER_BYTE))
}
