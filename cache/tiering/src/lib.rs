//! Two-level cache tiering with segment-level eviction control.
//!
//! This crate manages cache entries across a fast volatile tier and a larger,
//! optionally file-backed tier. Each tier is hash-partitioned into segments;
//! each segment stores entries with a metadata word whose veto and pin bits
//! govern eviction.
//!
//! # Architecture
//!
//! ```text
//! +-----------------------------------------------+
//! |              CompoundCachingTier              |
//! |                                               |
//! |  +-----------------------------------------+  |
//! |  | higher: SegmentedTier (heap)            |  |
//! |  |  Segment | Segment | ... | Segment      |  |
//! |  +-----------------------------------------+  |
//! |      miss |              ^ evict/demote     |
//! |           v              |                  |
//! |  +-----------------------------------------+  |
//! |  | lower: SegmentedTier (heap or mmap)     |  |
//! |  |  Segment | Segment | ... | Segment      |  |
//! |  +-----------------------------------------+  |
//! +-----------------------------------------------+
//!
//! Segment = Mutex<StorageEngine> + codecs + veto + eviction listener
//! StorageEngine = PagedStorageEngine<PageSource>
//! ```
//!
//! # Example
//!
//! ```ignore
//! use cache_tiering::{CachingTier, CompoundCachingTier, SegmentedTierBuilder, SyncMode};
//! use std::sync::Arc;
//!
//! let higher = SegmentedTierBuilder::<String, String>::new()
//!     .max_size(16 * 1024 * 1024)
//!     .build_heap()?;
//! let lower = SegmentedTierBuilder::<String, String>::new()
//!     .max_size(1024 * 1024 * 1024)
//!     .persistence("/var/cache/tiering", SyncMode::Async)
//!     .build_persistent()?;
//!
//! let cache = CompoundCachingTier::new(Arc::new(higher), Arc::new(lower));
//! cache.set_invalidation_listener(Arc::new(|key: &String, value: String| {
//!     println!("{key} left the cache");
//! }));
//!
//! let value = cache.get_or_compute_if_absent(&"key".to_string(), |key| {
//!     Ok(Some(format!("computed for {key}")))
//! })?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod config;
pub mod error;
pub mod logging;
pub mod metadata;
pub mod metrics;
pub mod provider;
pub mod segment;
pub mod storage;
mod sync;
pub mod tier;

pub use codec::{Codec, SerializationProvider};
pub use config::{CacheConfig, LogFormat, LoggingConfig, PersistenceConfig, SyncMode, TierConfig};
pub use error::{TierError, TierResult};
pub use metadata::{PINNED, VETOED};
pub use metrics::{CompoundSnapshot, SegmentSnapshot};
pub use provider::{
    CachingTierProvider, CompoundCachingTierProvider, HeapTierProvider, PersistentTierProvider,
    ResourceType,
};
pub use segment::{
    Compute, EvictionListener, EvictionVeto, HeapSegment, Mapping, PersistentSegment, Segment,
    SegmentBuilder,
};
pub use storage::{
    HeapPageSource, MappedPageSource, PageSource, PagedStorageEngine, SlotId, StorageEngine,
};
pub use tier::{
    CachingTier, CompoundCachingTier, HeapTier, HigherCachingTier, InvalidationListener,
    LowerCachingTier, PersistentTier, SegmentedTier, SegmentedTierBuilder, TierSegment,
};
