//! Chunk-level admission: the coarse first tier of filtering.
//!
//! Every chunk carries a small bloom filter over the filter values of the
//! messages inside it. A subscriber with a value set probes that index to
//! decide whether to fetch and decompress the chunk at all. The index may
//! admit a chunk that contains no matching message (false positive, bounded
//! by sizing), but it never skips a chunk that does (no false negatives).

use crate::codec::fnv1a64;
use crate::constants::{FILTER_INDEX_BYTES, FILTER_INDEX_HASHES};
use crate::types::FilterValue;

use super::ChunkMeta;

/// Fixed-size bloom filter over a chunk's filter values.
///
/// 512 bits, two seeded FNV-1a hash probes. For the expected load of a
/// handful of distinct values per chunk the false positive rate stays well
/// under 1%. Producer and consumer must compute identical bit positions, so
/// the hash is the pinned [`fnv1a64`], not `std`'s default hasher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterIndex {
    bits: [u8; FILTER_INDEX_BYTES],
}

impl FilterIndex {
    /// An empty index matching nothing.
    pub fn empty() -> Self {
        Self {
            bits: [0u8; FILTER_INDEX_BYTES],
        }
    }

    /// Record one filter value.
    pub fn insert(&mut self, value: &FilterValue) {
        for position in Self::probe(value) {
            self.bits[position / 8] |= 1 << (position % 8);
        }
    }

    /// Whether the chunk may contain this value. `false` is definitive.
    pub fn may_contain(&self, value: &FilterValue) -> bool {
        Self::probe(value)
            .into_iter()
            .all(|position| self.bits[position / 8] & (1 << (position % 8)) != 0)
    }

    /// Raw bytes for the chunk header.
    pub fn as_bytes(&self) -> &[u8; FILTER_INDEX_BYTES] {
        &self.bits
    }

    /// Rebuild from chunk header bytes.
    pub fn from_bytes(bits: [u8; FILTER_INDEX_BYTES]) -> Self {
        Self { bits }
    }

    fn probe(value: &FilterValue) -> [usize; FILTER_INDEX_HASHES] {
        let total_bits = FILTER_INDEX_BYTES * 8;
        let mut positions = [0usize; FILTER_INDEX_HASHES];
        for (seed, slot) in positions.iter_mut().enumerate() {
            *slot = (fnv1a64(seed as u64 + 1, value.as_str().as_bytes()) as usize) % total_bits;
        }
        positions
    }
}

impl Default for FilterIndex {
    fn default() -> Self {
        Self::empty()
    }
}

/// The value set a subscriber filters on.
///
/// An empty set means the subscriber wants everything and admission always
/// passes. Unfiltered (wildcard-tagged) chunks are always admitted; they may
/// contain matching messages and skipping them would lose data.
#[derive(Debug, Clone, Default)]
pub struct FilterSet {
    values: Vec<FilterValue>,
}

impl FilterSet {
    /// A set that admits every chunk.
    pub fn all() -> Self {
        Self::default()
    }

    /// Build a set from the given values.
    pub fn of<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<FilterValue>,
    {
        Self {
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether this set filters at all.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The values in the set.
    pub fn values(&self) -> &[FilterValue] {
        &self.values
    }

    /// First-tier admission decision for one chunk.
    pub fn admits(&self, meta: &ChunkMeta) -> bool {
        if self.values.is_empty() || meta.unfiltered {
            return true;
        }
        self.values
            .iter()
            .any(|value| meta.filter_index.may_contain(value))
    }
}
