//! Hash-partitioned tier over segments.
//!
//! [`SegmentedTier`] spreads keys over a fixed set of independently locked
//! segments and implements both tier roles:
//!
//! - as a [`HigherCachingTier`], `get_or_compute_if_absent` runs the source
//!   under the owning segment's lock, giving single-flight per key
//! - as a [`LowerCachingTier`], replaced and expired values are reported to
//!   the invalidation listener
//!
//! Capacity evictions inside any segment are reported to the invalidation
//! listener in both roles.

use crate::codec::SerializationProvider;
use crate::config::{SyncMode, TierConfig};
use crate::error::{TierError, TierResult};
use crate::metrics::{SegmentCounters, SegmentSnapshot};
use crate::segment::{
    Compute, EvictionVeto, HeapSegment, Mapping, PersistentSegment, Segment, SegmentBuilder,
    current_time_secs,
};
use crate::storage::StorageEngine;
use crate::tier::{
    CachingTier, HigherCachingTier, InvalidationListener, ListenerSlot, LowerCachingTier,
};
use std::hash::{BuildHasher, Hash};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Operations a tier needs from each of its segments.
pub trait TierSegment<K, V>: Send + Sync {
    /// See [`Segment::compute`].
    fn compute<R, F>(&self, key: &K, f: F) -> TierResult<R>
    where
        F: FnOnce(Option<Mapping<V>>) -> TierResult<(Compute<V>, R)>;

    /// See [`Segment::get`].
    fn get(&self, key: &K) -> TierResult<Option<V>>;

    /// See [`Segment::drain`].
    fn drain(&self) -> TierResult<Vec<(K, V)>>;

    /// See [`Segment::clear`].
    fn clear(&self);

    /// See [`Segment::len`].
    fn len(&self) -> usize;

    /// See [`Segment::counters`].
    fn counters(&self) -> &SegmentCounters;

    /// See [`Segment::flush`].
    fn flush(&self) -> TierResult<()>;

    /// See [`Segment::destroy`].
    fn destroy(self) -> TierResult<()>
    where
        Self: Sized;
}

impl<K: 'static, V: 'static, E: StorageEngine> TierSegment<K, V> for Segment<K, V, E> {
    fn compute<R, F>(&self, key: &K, f: F) -> TierResult<R>
    where
        F: FnOnce(Option<Mapping<V>>) -> TierResult<(Compute<V>, R)>,
    {
        Segment::compute(self, key, f)
    }

    fn get(&self, key: &K) -> TierResult<Option<V>> {
        Segment::get(self, key)
    }

    fn drain(&self) -> TierResult<Vec<(K, V)>> {
        Segment::drain(self)
    }

    fn clear(&self) {
        Segment::clear(self)
    }

    fn len(&self) -> usize {
        Segment::len(self)
    }

    fn counters(&self) -> &SegmentCounters {
        Segment::counters(self)
    }

    fn flush(&self) -> TierResult<()> {
        Segment::flush(self)
    }

    fn destroy(self) -> TierResult<()> {
        Segment::destroy(self)
    }
}

impl<K: 'static, V: 'static> TierSegment<K, V> for PersistentSegment<K, V> {
    fn compute<R, F>(&self, key: &K, f: F) -> TierResult<R>
    where
        F: FnOnce(Option<Mapping<V>>) -> TierResult<(Compute<V>, R)>,
    {
        PersistentSegment::compute(self, key, f)
    }

    fn get(&self, key: &K) -> TierResult<Option<V>> {
        PersistentSegment::get(self, key)
    }

    fn drain(&self) -> TierResult<Vec<(K, V)>> {
        PersistentSegment::drain(self)
    }

    fn clear(&self) {
        PersistentSegment::clear(self)
    }

    fn len(&self) -> usize {
        PersistentSegment::len(self)
    }

    fn counters(&self) -> &SegmentCounters {
        self.inner().counters()
    }

    fn flush(&self) -> TierResult<()> {
        PersistentSegment::flush(self)
    }

    fn destroy(self) -> TierResult<()> {
        PersistentSegment::destroy(self)
    }
}

/// Tier over heap segments.
pub type HeapTier<K, V> = SegmentedTier<K, V, HeapSegment<K, V>>;

/// Tier over file-backed segments.
pub type PersistentTier<K, V> = SegmentedTier<K, V, PersistentSegment<K, V>>;

/// A tier hash-partitioned over segments.
pub struct SegmentedTier<K, V, S> {
    segments: Box<[S]>,
    hasher: ahash::RandomState,
    listener: ListenerSlot<K, V>,
}

impl<K, V, S> SegmentedTier<K, V, S>
where
    K: Hash + 'static,
    V: Clone + 'static,
    S: TierSegment<K, V>,
{
    #[inline]
    fn segment_for(&self, key: &K) -> &S {
        let hash = BuildHasher::hash_one(&self.hasher, key);
        &self.segments[(hash % self.segments.len() as u64) as usize]
    }

    /// See [`CachingTier::get_or_compute_if_absent`].
    ///
    /// Expired entries are dropped and recomputed.
    pub fn get_or_compute_if_absent<F>(&self, key: &K, source: F) -> TierResult<Option<V>>
    where
        F: FnOnce(&K) -> TierResult<Option<V>>,
    {
        self.segment_for(key).compute(key, |current| {
            let now = current_time_secs();
            let stale = match current {
                Some(mapping) if !mapping.is_expired(now) => {
                    return Ok((Compute::Keep, Some(mapping.value)));
                }
                other => other.is_some(),
            };

            match source(key)? {
                Some(value) => Ok((Compute::Put(value.clone()), Some(value))),
                None if stale => Ok((Compute::Remove, None)),
                None => Ok((Compute::Keep, None)),
            }
        })
    }

    /// See [`HigherCachingTier::silent_invalidate`].
    pub fn silent_invalidate<F>(&self, key: &K, f: F) -> TierResult<()>
    where
        F: FnOnce(Option<V>) -> TierResult<()>,
    {
        self.segment_for(key).compute(key, |current| {
            let now = current_time_secs();
            let live = current
                .filter(|mapping| !mapping.is_expired(now))
                .map(|mapping| mapping.value);
            f(live)?;
            Ok((Compute::Remove, ()))
        })
    }

    /// See [`HigherCachingTier::silent_invalidate_all`].
    pub fn silent_invalidate_all<F>(&self, mut f: F) -> TierResult<()>
    where
        F: FnMut(&K, Option<V>) -> TierResult<()>,
    {
        let mut result = Ok(());
        for segment in self.segments.iter() {
            match segment.drain() {
                Ok(entries) => {
                    for (key, value) in entries {
                        keep_first_error(&mut result, f(&key, Some(value)));
                    }
                }
                Err(e) => keep_first_error(&mut result, Err(e)),
            }
        }
        result
    }

    /// See [`LowerCachingTier::install_mapping`].
    pub fn install_mapping<F>(&self, key: &K, source: F) -> TierResult<Option<V>>
    where
        F: FnOnce(&K) -> Option<V>,
    {
        let (replaced, installed) = self.segment_for(key).compute(key, |current| {
            let replaced = current.map(|mapping| mapping.value);
            let action = match source(key) {
                Some(value) => {
                    let installed = value.clone();
                    return Ok((Compute::Put(value), (replaced, Some(installed))));
                }
                None if replaced.is_some() => Compute::Remove,
                None => Compute::Keep,
            };
            Ok((action, (replaced, None)))
        })?;

        if let Some(value) = replaced {
            self.listener.notify(key, value);
        }
        Ok(installed)
    }

    /// See [`LowerCachingTier::get_and_remove`].
    pub fn get_and_remove(&self, key: &K) -> TierResult<Option<V>> {
        let (live, stale) = self.segment_for(key).compute(key, |current| {
            let now = current_time_secs();
            match current {
                None => Ok((Compute::Keep, (None, None))),
                Some(mapping) if mapping.is_expired(now) => {
                    Ok((Compute::Remove, (None, Some(mapping.value))))
                }
                Some(mapping) => Ok((Compute::Remove, (Some(mapping.value), None))),
            }
        })?;

        if let Some(value) = stale {
            debug!("expired entry found in lower tier");
            self.listener.notify(key, value);
        }
        Ok(live)
    }

    /// Remove `key`, notifying the invalidation listener if a value was held.
    pub fn invalidate(&self, key: &K) -> TierResult<()> {
        let removed = self
            .segment_for(key)
            .compute(key, |current| Ok((Compute::Remove, current.map(|m| m.value))))?;
        if let Some(value) = removed {
            self.listener.notify(key, value);
        }
        Ok(())
    }

    /// Remove every entry, notifying the invalidation listener for each.
    ///
    /// Expired entries are dropped without notification.
    pub fn invalidate_all(&self) -> TierResult<()> {
        let mut result = Ok(());
        for segment in self.segments.iter() {
            match segment.drain() {
                Ok(entries) => {
                    for (key, value) in entries {
                        self.listener.notify(&key, value);
                    }
                }
                Err(e) => keep_first_error(&mut result, Err(e)),
            }
        }
        result
    }

    /// Remove every entry without notification.
    pub fn clear(&self) -> TierResult<()> {
        for segment in self.segments.iter() {
            segment.clear();
        }
        Ok(())
    }

    /// Replace the invalidation listener.
    pub fn set_invalidation_listener(&self, listener: Arc<dyn InvalidationListener<K, V>>) {
        self.listener.set(listener);
    }

    /// Read the live value for `key` without computing or removing anything.
    pub fn peek(&self, key: &K) -> TierResult<Option<V>> {
        self.segment_for(key).get(key)
    }

    /// Number of stored entries across all segments.
    pub fn len(&self) -> usize {
        self.segments.iter().map(|segment| segment.len()).sum()
    }

    /// True if no entries are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of segments.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Counters summed across all segments.
    pub fn counters(&self) -> SegmentSnapshot {
        self.segments
            .iter()
            .map(|segment| segment.counters().snapshot())
            .fold(SegmentSnapshot::default(), |acc, snapshot| acc + snapshot)
    }

    /// Flush every segment.
    pub fn flush(&self) -> TierResult<()> {
        let mut result = Ok(());
        for segment in self.segments.iter() {
            keep_first_error(&mut result, segment.flush());
        }
        result
    }

    /// Destroy every segment.
    ///
    /// All segments are destroyed even if one fails; the first error is
    /// returned.
    pub fn destroy(self) -> TierResult<()> {
        let mut result = Ok(());
        for segment in self.segments.into_vec() {
            keep_first_error(&mut result, segment.destroy());
        }
        result
    }
}

fn keep_first_error(result: &mut TierResult<()>, next: TierResult<()>) {
    if result.is_ok()
        && let Err(e) = next
    {
        *result = Err(e);
    }
}

impl<K, V, S> CachingTier<K, V> for SegmentedTier<K, V, S>
where
    K: Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    S: TierSegment<K, V>,
{
    fn get_or_compute_if_absent<F>(&self, key: &K, source: F) -> TierResult<Option<V>>
    where
        F: FnOnce(&K) -> TierResult<Option<V>>,
    {
        SegmentedTier::get_or_compute_if_absent(self, key, source)
    }

    fn invalidate(&self, key: &K) -> TierResult<()> {
        SegmentedTier::invalidate(self, key)
    }

    fn invalidate_all(&self) -> TierResult<()> {
        SegmentedTier::invalidate_all(self)
    }

    fn clear(&self) -> TierResult<()> {
        SegmentedTier::clear(self)
    }

    fn set_invalidation_listener(&self, listener: Arc<dyn InvalidationListener<K, V>>) {
        SegmentedTier::set_invalidation_listener(self, listener)
    }
}

impl<K, V, S> HigherCachingTier<K, V> for SegmentedTier<K, V, S>
where
    K: Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    S: TierSegment<K, V>,
{
    fn silent_invalidate<F>(&self, key: &K, f: F) -> TierResult<()>
    where
        F: FnOnce(Option<V>) -> TierResult<()>,
    {
        SegmentedTier::silent_invalidate(self, key, f)
    }

    fn silent_invalidate_all<F>(&self, f: F) -> TierResult<()>
    where
        F: FnMut(&K, Option<V>) -> TierResult<()>,
    {
        SegmentedTier::silent_invalidate_all(self, f)
    }
}

impl<K, V, S> LowerCachingTier<K, V> for SegmentedTier<K, V, S>
where
    K: Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    S: TierSegment<K, V>,
{
    fn install_mapping<F>(&self, key: &K, source: F) -> TierResult<Option<V>>
    where
        F: FnOnce(&K) -> Option<V>,
    {
        SegmentedTier::install_mapping(self, key, source)
    }

    fn get_and_remove(&self, key: &K) -> TierResult<Option<V>> {
        SegmentedTier::get_and_remove(self, key)
    }

    fn invalidate(&self, key: &K) -> TierResult<()> {
        SegmentedTier::invalidate(self, key)
    }

    fn invalidate_all(&self) -> TierResult<()> {
        SegmentedTier::invalidate_all(self)
    }

    fn clear(&self) -> TierResult<()> {
        SegmentedTier::clear(self)
    }

    fn set_invalidation_listener(&self, listener: Arc<dyn InvalidationListener<K, V>>) {
        SegmentedTier::set_invalidation_listener(self, listener)
    }
}

/// Builder for [`SegmentedTier`].
pub struct SegmentedTierBuilder<K, V> {
    segments: usize,
    max_size: usize,
    persistence: Option<(PathBuf, SyncMode)>,
    segment: SegmentBuilder<K, V>,
}

impl<K, V> Default for SegmentedTierBuilder<K, V>
where
    K: Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> SegmentedTierBuilder<K, V>
where
    K: Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        let defaults = TierConfig::default();
        Self {
            segments: defaults.segments,
            max_size: defaults.max_size,
            persistence: None,
            segment: SegmentBuilder::new(),
        }
    }

    /// Apply a tier configuration: segment count, size, TTL and persistence.
    pub fn config(mut self, config: &TierConfig) -> Self {
        self.segments = config.segments;
        self.max_size = config.max_size;
        self.persistence = config
            .persistence
            .as_ref()
            .map(|p| (p.path.clone(), p.sync_mode));
        self.segment = self.segment.config(config);
        self
    }

    /// Set the number of segments.
    pub fn segments(mut self, segments: usize) -> Self {
        self.segments = segments;
        self
    }

    /// Set the total storage budget across all segments.
    pub fn max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Set the time-to-live for new entries.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.segment = self.segment.ttl(ttl);
        self
    }

    /// Set the eviction veto predicate.
    pub fn veto(mut self, veto: impl EvictionVeto<K, V> + 'static) -> Self {
        self.segment = self.segment.veto(veto);
        self
    }

    /// Resolve codecs from `provider`.
    pub fn serialization(mut self, provider: Arc<SerializationProvider>) -> Self {
        self.segment = self.segment.serialization(provider);
        self
    }

    /// Store segments as files under `dir`.
    pub fn persistence(mut self, dir: impl AsRef<Path>, sync_mode: SyncMode) -> Self {
        self.persistence = Some((dir.as_ref().to_path_buf(), sync_mode));
        self
    }

    fn segment_size(&self) -> TierResult<usize> {
        if self.segments == 0 {
            return Err(TierError::InvalidConfig(
                "segments must be at least 1".to_string(),
            ));
        }
        let size = self.max_size / self.segments;
        if size == 0 {
            return Err(TierError::InvalidConfig(format!(
                "max_size ({}) must be at least segments ({})",
                self.max_size, self.segments
            )));
        }
        Ok(size)
    }

    fn segment_builder(&self, listener: &ListenerSlot<K, V>) -> SegmentBuilder<K, V> {
        let listener = listener.clone();
        self.segment
            .clone()
            .eviction_listener(move |key: &K, value: V| {
                listener.notify(key, value);
            })
    }

    /// Build a tier over heap segments.
    pub fn build_heap(self) -> TierResult<HeapTier<K, V>> {
        let segment_size = self.segment_size()?;
        let listener = ListenerSlot::new();

        let segments = (0..self.segments)
            .map(|_| self.segment_builder(&listener).build_heap(segment_size))
            .collect::<TierResult<Vec<_>>>()?;

        debug!(segments = self.segments, segment_size, "built heap tier");

        Ok(SegmentedTier {
            segments: segments.into_boxed_slice(),
            hasher: ahash::RandomState::new(),
            listener,
        })
    }

    /// Build a tier with one file-backed segment per file under the
    /// configured persistence directory.
    pub fn build_persistent(self) -> TierResult<PersistentTier<K, V>> {
        let segment_size = self.segment_size()?;
        let Some((dir, sync_mode)) = self.persistence.clone() else {
            return Err(TierError::InvalidConfig(
                "persistent tier requires a persistence directory".to_string(),
            ));
        };
        std::fs::create_dir_all(&dir)?;
        let listener = ListenerSlot::new();

        let mut segments = Vec::with_capacity(self.segments);
        for id in 0..self.segments {
            let path = dir.join(format!("segment-{id:04}.dat"));
            match PersistentSegment::create(
                path,
                segment_size,
                sync_mode,
                self.segment_builder(&listener),
            ) {
                Ok(segment) => segments.push(segment),
                Err(e) => {
                    for segment in segments {
                        let _ = segment.destroy();
                    }
                    return Err(e);
                }
            }
        }

        debug!(
            path = %dir.display(),
            segments = self.segments,
            segment_size,
            "built persistent tier"
        );

        Ok(SegmentedTier {
            segments: segments.into_boxed_slice(),
            hasher: ahash::RandomState::new(),
            listener,
        })
    }
}
