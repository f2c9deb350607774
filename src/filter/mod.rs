//! Two-tier consumer-side filtering.
//!
//! Tier one is chunk admission ([`admission`]): a probabilistic index in the
//! chunk header lets a subscriber skip whole chunks without fetching their
//! bodies. Tier two is per-message evaluation ([`predicate`]): messages from
//! admitted chunks are checked against an exact attribute predicate. Tier
//! one is an optimization only; correctness comes from tier two.

pub mod admission;
pub mod predicate;

pub use admission::{FilterIndex, FilterSet};
pub use predicate::Predicate;

/// The filtering-relevant slice of a chunk header, probed during admission
/// before the body is touched.
#[derive(Debug, Clone, Copy)]
pub struct ChunkMeta {
    /// Probabilistic index over the chunk's filter values.
    pub filter_index: FilterIndex,
    /// Set when the chunk was wildcard-tagged; such chunks bypass the index
    /// entirely because their contents are unknown to it.
    pub unfiltered: bool,
}
