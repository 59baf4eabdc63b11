//! Per-entry metadata word.
//!
//! Every stored entry carries a flat `u32` flag word. The storage engine owns
//! the low bits for its own bookkeeping; segments own the eviction-control
//! bits at the top of the word:
//!
//! ```text
//! 31      30      29      28 ...................... 1      0
//! +-------+-------+-------+---------------------------+------+
//! | rsvd  |PINNED |VETOED |      engine reserved      |PRESNT|
//! +-------+-------+-------+---------------------------+------+
//! ```
//!
//! Segment updates are always masked so engine bits are preserved.

/// Set by the storage engine on every live record.
pub const PRESENT: u32 = 1 << 0;

/// Entry was vetoed for eviction by the configured predicate at write time.
pub const VETOED: u32 = 1 << 29;

/// Entry was explicitly pinned at write time.
pub const PINNED: u32 = 1 << 30;

/// Bits a segment may set or clear. Everything else belongs to the engine.
pub const SEGMENT_MASK: u32 = VETOED | PINNED;

/// Bits reserved for the storage engine.
pub const ENGINE_MASK: u32 = !SEGMENT_MASK;

/// Returns true if an entry with this metadata may be evicted.
///
/// Both `VETOED` and `PINNED` suppress eviction.
#[inline]
pub fn evictable(metadata: u32) -> bool {
    metadata & SEGMENT_MASK == 0
}

/// Merge `bits` into `current` under `mask`, leaving unmasked bits untouched.
#[inline]
pub fn merge(current: u32, mask: u32, bits: u32) -> u32 {
    (current & !mask) | (bits & mask)
}
