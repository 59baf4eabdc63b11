//! Segments: the unit of locking and eviction.
//!
//! A segment owns one partition of the keyspace. It maps typed keys to
//! `(value, metadata)` pairs stored in a [`StorageEngine`], computes the
//! eviction-control bits for every write, and reports evictions to a listener.
//!
//! ```text
//! put(k, v) --> veto(k, v)? --> metadata = VETOED? | PINNED?
//!                                   |
//!                                   v
//!                  +-------------------------------+
//!                  |  Mutex<StorageEngine>         |
//!                  |   allocate --full--> sample   |
//!                  |                        evict --+--> listener(k, v)
//!                  +-------------------------------+
//! ```
//!
//! Every operation takes the segment lock; the engine itself is never
//! accessed without it. Functions passed to [`Segment::compute`] run while the
//! lock is held and must not call back into the same segment.

mod persistent;

pub use persistent::PersistentSegment;

use crate::codec::{Codec, SerializationProvider};
use crate::config::TierConfig;
use crate::error::{TierError, TierResult};
use crate::metadata::{self, PINNED, SEGMENT_MASK, VETOED};
use crate::metrics::SegmentCounters;
use crate::storage::{HeapPageSource, PagedStorageEngine, SlotId, StorageEngine};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Decides at write time whether an entry must never be evicted.
pub trait EvictionVeto<K, V>: Send + Sync {
    /// Returns true if `(key, value)` is vetoed for eviction.
    fn vetoes(&self, key: &K, value: &V) -> bool;
}

impl<K, V, F> EvictionVeto<K, V> for F
where
    F: Fn(&K, &V) -> bool + Send + Sync,
{
    fn vetoes(&self, key: &K, value: &V) -> bool {
        self(key, value)
    }
}

/// Receives every entry a segment evicts.
pub trait EvictionListener<K, V>: Send + Sync {
    /// Called once per evicted entry while the segment lock is held.
    fn on_eviction(&self, key: &K, value: V);
}

impl<K, V, F> EvictionListener<K, V> for F
where
    F: Fn(&K, V) + Send + Sync,
{
    fn on_eviction(&self, key: &K, value: V) {
        self(key, value)
    }
}

/// A decoded entry as seen by [`Segment::compute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapping<V> {
    /// The stored value.
    pub value: V,
    /// Full metadata word, engine bits included.
    pub metadata: u32,
    /// Expiration (seconds since epoch, 0 = never).
    pub expire_at: u32,
}

impl<V> Mapping<V> {
    /// Returns true if the entry has expired at `now`.
    #[inline]
    pub fn is_expired(&self, now: u32) -> bool {
        self.expire_at != 0 && now >= self.expire_at
    }
}

/// Outcome of a [`Segment::compute`] function.
#[derive(Debug)]
pub enum Compute<V> {
    /// Leave the entry as it is.
    Keep,
    /// Remove the entry if present.
    Remove,
    /// Store a new value.
    Put(V),
    /// Store a new value and pin it.
    PutPinned(V),
}

/// Segment over heap pages.
pub type HeapSegment<K, V> = Segment<K, V, PagedStorageEngine<HeapPageSource>>;

/// A single locked partition of a tier.
pub struct Segment<K, V, E> {
    engine: Mutex<E>,
    key_codec: Arc<dyn Codec<K>>,
    value_codec: Arc<dyn Codec<V>>,
    veto: Option<Arc<dyn EvictionVeto<K, V>>>,
    listener: Option<Arc<dyn EvictionListener<K, V>>>,
    ttl: Option<Duration>,
    counters: SegmentCounters,
}

impl<K: 'static, V: 'static, E: StorageEngine> Segment<K, V, E> {
    /// Store `value` under `key`, replacing any existing entry.
    ///
    /// The veto predicate is evaluated once; a vetoed entry carries `VETOED`.
    pub fn put(&self, key: &K, value: &V) -> TierResult<()> {
        let key_bytes = self.key_codec.encode(key);
        let mut engine = self.engine.lock();
        self.write(&mut engine, key, &key_bytes, value, false)
    }

    /// Store `value` under `key` and mark it `PINNED`.
    pub fn put_pinned(&self, key: &K, value: &V) -> TierResult<()> {
        let key_bytes = self.key_codec.encode(key);
        let mut engine = self.engine.lock();
        self.write(&mut engine, key, &key_bytes, value, true)
    }

    /// Read the value stored under `key`. Expired entries read as absent.
    pub fn get(&self, key: &K) -> TierResult<Option<V>> {
        let key_bytes = self.key_codec.encode(key);
        let engine = self.engine.lock();
        let Some(slot) = engine.lookup(&key_bytes) else {
            return Ok(None);
        };
        Ok(self
            .read_mapping(&*engine, slot)?
            .filter(|mapping| !mapping.is_expired(current_time_secs()))
            .map(|mapping| mapping.value))
    }

    /// Remove the entry for `key`, returning its value if it was live.
    pub fn remove(&self, key: &K) -> TierResult<Option<V>> {
        self.compute(key, |current| {
            let now = current_time_secs();
            let value = current
                .filter(|mapping| !mapping.is_expired(now))
                .map(|mapping| mapping.value);
            Ok((Compute::Remove, value))
        })
    }

    /// Atomically read, decide and write the entry for `key`.
    ///
    /// `f` receives the current mapping (expired entries included, so the
    /// caller can report them) and returns the action to apply together with
    /// a result for the caller. The segment lock is held for the whole call.
    pub fn compute<R, F>(&self, key: &K, f: F) -> TierResult<R>
    where
        F: FnOnce(Option<Mapping<V>>) -> TierResult<(Compute<V>, R)>,
    {
        let key_bytes = self.key_codec.encode(key);
        let mut engine = self.engine.lock();

        let current = match engine.lookup(&key_bytes) {
            Some(slot) => self.read_mapping(&*engine, slot)?,
            None => None,
        };
        let expired = current
            .as_ref()
            .is_some_and(|mapping| mapping.is_expired(current_time_secs()));

        let (action, result) = f(current)?;
        match action {
            Compute::Keep => {}
            Compute::Remove => {
                if let Some(slot) = engine.lookup(&key_bytes)
                    && engine.remove(slot)?
                {
                    if expired {
                        self.counters.record_expiration();
                    } else {
                        self.counters.record_removal();
                    }
                }
            }
            Compute::Put(value) => {
                self.write(&mut engine, key, &key_bytes, &value, false)?;
                if expired {
                    self.counters.record_expiration();
                }
            }
            Compute::PutPinned(value) => {
                self.write(&mut engine, key, &key_bytes, &value, true)?;
                if expired {
                    self.counters.record_expiration();
                }
            }
        }

        Ok(result)
    }

    /// Return the stored metadata bits of `key` that intersect `mask`.
    pub fn get_metadata(&self, key: &K, mask: u32) -> Option<u32> {
        let key_bytes = self.key_codec.encode(key);
        let engine = self.engine.lock();
        let slot = engine.lookup(&key_bytes)?;
        engine.read(slot).map(|entry| entry.metadata & mask)
    }

    /// Replace the segment-owned bits of `key` selected by `mask` with `bits`.
    ///
    /// Engine bits are never touched. Returns the full metadata word after the
    /// update, or `None` if `key` is absent.
    pub fn set_metadata(&self, key: &K, mask: u32, bits: u32) -> TierResult<Option<u32>> {
        let key_bytes = self.key_codec.encode(key);
        let mut engine = self.engine.lock();
        match engine.lookup(&key_bytes) {
            Some(slot) => engine.update_metadata(slot, mask & SEGMENT_MASK, bits),
            None => Ok(None),
        }
    }

    /// Returns true if an entry with `metadata` may be evicted.
    #[inline]
    pub fn evictable(&self, metadata: u32) -> bool {
        metadata::evictable(metadata)
    }

    /// Ask the storage engine to name one evictable entry.
    pub fn get_eviction_index(&self) -> Option<SlotId> {
        self.engine.lock().sample(&metadata::evictable)
    }

    /// Evict the entry in `slot`, notifying the eviction listener.
    ///
    /// The entry is removed regardless of its metadata. With `shrink` the
    /// engine compacts immediately. Returns false if the slot was empty.
    pub fn evict(&self, slot: SlotId, shrink: bool) -> TierResult<bool> {
        let mut engine = self.engine.lock();
        self.evict_locked(&mut engine, slot, shrink)
    }

    /// Remove every live entry and return them. Expired entries are dropped.
    pub fn drain(&self) -> TierResult<Vec<(K, V)>> {
        let mut engine = self.engine.lock();
        let now = current_time_secs();
        let mut drained = Vec::with_capacity(engine.len());

        for slot in engine.slots() {
            let Some(entry) = engine.read(slot) else {
                continue;
            };
            let live = entry.expire_at == 0 || now < entry.expire_at;
            if live {
                let key = self.key_codec.decode(entry.key)?;
                let value = self.value_codec.decode(entry.value)?;
                drained.push((key, value));
            }
            engine.remove(slot)?;
            if live {
                self.counters.record_removal();
            } else {
                self.counters.record_expiration();
            }
        }

        engine.shrink()?;
        Ok(drained)
    }

    /// Remove every entry without notification.
    pub fn clear(&self) {
        self.engine.lock().clear();
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.engine.lock().len()
    }

    /// True if no entries are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes occupied by stored entries.
    pub fn used(&self) -> usize {
        self.engine.lock().used()
    }

    /// Segment counters.
    pub fn counters(&self) -> &SegmentCounters {
        &self.counters
    }

    /// Time-to-live applied to new entries.
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Make stored entries durable.
    pub fn flush(&self) -> TierResult<()> {
        self.engine.lock().flush()
    }

    /// Release the storage engine and its pages.
    pub fn destroy(self) -> TierResult<()> {
        self.engine.into_inner().destroy()
    }

    fn read_mapping(&self, engine: &E, slot: SlotId) -> TierResult<Option<Mapping<V>>> {
        let Some(entry) = engine.read(slot) else {
            return Ok(None);
        };
        Ok(Some(Mapping {
            value: self.value_codec.decode(entry.value)?,
            metadata: entry.metadata,
            expire_at: entry.expire_at,
        }))
    }

    fn write(
        &self,
        engine: &mut E,
        key: &K,
        key_bytes: &[u8],
        value: &V,
        pinned: bool,
    ) -> TierResult<()> {
        let vetoed = self
            .veto
            .as_ref()
            .is_some_and(|veto| veto.vetoes(key, value));

        let mut flags = 0;
        if vetoed {
            flags |= VETOED;
        }
        if pinned {
            flags |= PINNED;
        }

        let value_bytes = self.value_codec.encode(value);
        let expire_at = self.expire_at();

        loop {
            match engine.allocate(key_bytes, &value_bytes, flags, expire_at) {
                Ok(_) => break,
                Err(TierError::OutOfMemory) => {
                    let Some(victim) = engine.sample(&metadata::evictable) else {
                        return Err(TierError::OutOfMemory);
                    };
                    self.evict_locked(engine, victim, true)?;
                }
                Err(e) => return Err(e),
            }
        }

        self.counters.record_put(vetoed, pinned);
        Ok(())
    }

    fn evict_locked(&self, engine: &mut E, slot: SlotId, shrink: bool) -> TierResult<bool> {
        let (key, value) = match engine.read(slot) {
            Some(entry) => (
                self.key_codec.decode(entry.key)?,
                self.value_codec.decode(entry.value)?,
            ),
            None => return Ok(false),
        };

        // The engine unlinks the record even if the removal cannot be made
        // durable, so the listener hears about it before any error returns.
        let removed = engine.remove(slot);
        if matches!(removed, Ok(false)) {
            return Ok(false);
        }

        self.counters.record_eviction();
        trace!(slot = slot.index(), shrink, "evicted entry");

        if let Some(listener) = &self.listener {
            listener.on_eviction(&key, value);
        }

        removed?;
        if shrink {
            engine.shrink()?;
        }
        Ok(true)
    }

    fn expire_at(&self) -> u32 {
        match self.ttl {
            Some(ttl) if !ttl.is_zero() => {
                let secs = u32::try_from(ttl.as_secs()).unwrap_or(u32::MAX).max(1);
                current_time_secs().saturating_add(secs)
            }
            _ => 0,
        }
    }
}

/// Builder for [`Segment`].
///
/// Codecs not set explicitly are resolved from the serialization provider
/// (the built-in codecs by default) when the segment is built.
pub struct SegmentBuilder<K, V> {
    key_codec: Option<Arc<dyn Codec<K>>>,
    value_codec: Option<Arc<dyn Codec<V>>>,
    serialization: Option<Arc<SerializationProvider>>,
    veto: Option<Arc<dyn EvictionVeto<K, V>>>,
    listener: Option<Arc<dyn EvictionListener<K, V>>>,
    ttl: Option<Duration>,
}

impl<K, V> Clone for SegmentBuilder<K, V> {
    fn clone(&self) -> Self {
        Self {
            key_codec: self.key_codec.clone(),
            value_codec: self.value_codec.clone(),
            serialization: self.serialization.clone(),
            veto: self.veto.clone(),
            listener: self.listener.clone(),
            ttl: self.ttl,
        }
    }
}

impl<K: 'static, V: 'static> Default for SegmentBuilder<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: 'static, V: 'static> SegmentBuilder<K, V> {
    /// Create a new builder with no veto, no listener and no TTL.
    pub fn new() -> Self {
        Self {
            key_codec: None,
            value_codec: None,
            serialization: None,
            veto: None,
            listener: None,
            ttl: None,
        }
    }

    /// Apply the TTL of a tier configuration.
    pub fn config(mut self, config: &TierConfig) -> Self {
        self.ttl = config.ttl();
        self
    }

    /// Set the key codec.
    pub fn key_codec(mut self, codec: Arc<dyn Codec<K>>) -> Self {
        self.key_codec = Some(codec);
        self
    }

    /// Set the value codec.
    pub fn value_codec(mut self, codec: Arc<dyn Codec<V>>) -> Self {
        self.value_codec = Some(codec);
        self
    }

    /// Resolve codecs not set explicitly from `provider`.
    pub fn serialization(mut self, provider: Arc<SerializationProvider>) -> Self {
        self.serialization = Some(provider);
        self
    }

    /// Set the eviction veto predicate.
    pub fn veto(mut self, veto: impl EvictionVeto<K, V> + 'static) -> Self {
        self.veto = Some(Arc::new(veto));
        self
    }

    /// Set the eviction listener.
    pub fn eviction_listener(mut self, listener: impl EvictionListener<K, V> + 'static) -> Self {
        self.listener = Some(Arc::new(listener));
        self
    }

    /// Set a shared eviction listener.
    pub fn shared_eviction_listener(mut self, listener: Arc<dyn EvictionListener<K, V>>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Set the time-to-live for new entries.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Resolve the key and value codecs.
    ///
    /// Fails with [`TierError::UnsupportedType`] if either type has no codec.
    pub fn resolve_codecs(&self) -> TierResult<(Arc<dyn Codec<K>>, Arc<dyn Codec<V>>)> {
        let default_provider;
        let provider = match &self.serialization {
            Some(provider) => provider.as_ref(),
            None => {
                default_provider = SerializationProvider::default();
                &default_provider
            }
        };

        let key_codec = match &self.key_codec {
            Some(codec) => codec.clone(),
            None => provider.codec::<K>()?,
        };
        let value_codec = match &self.value_codec {
            Some(codec) => codec.clone(),
            None => provider.codec::<V>()?,
        };
        Ok((key_codec, value_codec))
    }

    /// Build a segment over `engine`.
    pub fn build<E: StorageEngine>(self, engine: E) -> TierResult<Segment<K, V, E>> {
        let (key_codec, value_codec) = self.resolve_codecs()?;
        Ok(Segment {
            engine: Mutex::new(engine),
            key_codec,
            value_codec,
            veto: self.veto,
            listener: self.listener,
            ttl: self.ttl,
            counters: SegmentCounters::new(),
        })
    }

    /// Build a segment over `max_size` bytes of heap pages.
    pub fn build_heap(self, max_size: usize) -> TierResult<HeapSegment<K, V>> {
        let engine = PagedStorageEngine::new(HeapPageSource::new(max_size), max_size)?;
        self.build(engine)
    }
}

/// Get current time as seconds since Unix epoch.
#[inline]
pub(crate) fn current_time_secs() -> u32 {
    clocksource::coarse::UnixInstant::now()
        .duration_since(clocksource::coarse::UnixInstant::EPOCH)
        .as_secs() as u32
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use crate::metadata::PRESENT;

    type Evicted = Arc<Mutex<Vec<(String, String)>>>;

    fn create_test_segment(size: usize) -> (HeapSegment<String, String>, Evicted) {
        let evicted: Evicted = Arc::new(Mutex::new(Vec::new()));
        let sink = evicted.clone();
        let segment = SegmentBuilder::<String, String>::new()
            .veto(|key: &String, _: &String| key.starts_with("veto"))
            .eviction_listener(move |key: &String, value: String| {
                sink.lock().push((key.clone(), value));
            })
            .build_heap(size)
            .expect("Failed to build segment");
        (segment, evicted)
    }

    fn s(value: &str) -> String {
        value.to_string()
    }

    #[test]
    fn test_put_get_remove() {
        let (segment, _) = create_test_segment(4096);
        segment.put(&s("key"), &s("value")).unwrap();
        assert_eq!(segment.get(&s("key")).unwrap(), Some(s("value")));
        assert_eq!(segment.len(), 1);

        segment.put(&s("key"), &s("other")).unwrap();
        assert_eq!(segment.get(&s("key")).unwrap(), Some(s("other")));
        assert_eq!(segment.len(), 1);

        assert_eq!(segment.remove(&s("key")).unwrap(), Some(s("other")));
        assert_eq!(segment.get(&s("key")).unwrap(), None);
        assert!(segment.is_empty());
        assert_eq!(segment.counters().snapshot().removals, 1);
    }

    #[test]
    fn test_vetoed_put_sets_metadata() {
        let (segment, _) = create_test_segment(4096);
        segment.put(&s("veto-me"), &s("value")).unwrap();
        segment.put(&s("plain"), &s("value")).unwrap();

        assert_eq!(segment.get_metadata(&s("veto-me"), VETOED), Some(VETOED));
        assert_eq!(segment.get_metadata(&s("plain"), VETOED), Some(0));
        assert_eq!(segment.get_metadata(&s("missing"), VETOED), None);

        let snapshot = segment.counters().snapshot();
        assert_eq!(snapshot.puts, 2);
        assert_eq!(snapshot.vetoed, 1);
    }

    #[test]
    fn test_put_pinned_sets_both_bits() {
        let (segment, _) = create_test_segment(4096);
        segment.put_pinned(&s("veto-pinned"), &s("value")).unwrap();
        segment.put_pinned(&s("pinned"), &s("value")).unwrap();

        assert_eq!(segment.get_metadata(&s("veto-pinned"), VETOED), Some(VETOED));
        assert_eq!(
            segment.get_metadata(&s("veto-pinned"), SEGMENT_MASK),
            Some(VETOED | PINNED)
        );
        assert_eq!(segment.get_metadata(&s("pinned"), SEGMENT_MASK), Some(PINNED));
    }

    #[test]
    fn test_evictable() {
        let (segment, _) = create_test_segment(4096);
        assert!(segment.evictable(1));
        assert!(!segment.evictable(VETOED | 1));
        assert!(!segment.evictable(PINNED | 1));

        segment.put(&s("plain"), &s("value")).unwrap();
        let metadata = segment.get_metadata(&s("plain"), u32::MAX).unwrap();
        assert!(segment.evictable(metadata));

        segment.put(&s("veto"), &s("value")).unwrap();
        let metadata = segment.get_metadata(&s("veto"), u32::MAX).unwrap();
        assert!(!segment.evictable(metadata));
    }

    #[test]
    fn test_evict_notifies_listener_once() {
        let (segment, evicted) = create_test_segment(4096);
        segment.put(&s("key"), &s("value")).unwrap();

        let slot = segment.get_eviction_index().expect("no candidate");
        assert!(segment.evict(slot, false).unwrap());
        assert!(!segment.evict(slot, false).unwrap());

        assert_eq!(*evicted.lock(), vec![(s("key"), s("value"))]);
        assert_eq!(segment.get(&s("key")).unwrap(), None);
        assert_eq!(segment.counters().snapshot().evictions, 1);
    }

    #[test]
    fn test_eviction_index_skips_protected_entries() {
        let (segment, _) = create_test_segment(4096);
        segment.put(&s("veto"), &s("value")).unwrap();
        segment.put_pinned(&s("pinned"), &s("value")).unwrap();
        assert!(segment.get_eviction_index().is_none());

        segment.put(&s("plain"), &s("value")).unwrap();
        let slot = segment.get_eviction_index().expect("no candidate");
        segment.evict(slot, true).unwrap();
        assert_eq!(segment.get(&s("plain")).unwrap(), None);
        assert_eq!(segment.len(), 2);
    }

    #[test]
    fn test_full_segment_evicts_to_make_room() {
        // Each record is 16 header + 4 key + 16 value = 40 bytes.
        let (segment, evicted) = create_test_segment(128);
        for i in 0..3 {
            segment.put(&format!("k{i:03}"), &"x".repeat(16)).unwrap();
        }
        assert_eq!(segment.len(), 3);

        segment.put(&s("k003"), &"y".repeat(16)).unwrap();
        assert_eq!(segment.len(), 3);
        assert_eq!(evicted.lock().len(), 1);
        assert_eq!(segment.get(&s("k003")).unwrap(), Some("y".repeat(16)));
    }

    #[test]
    fn test_full_segment_of_protected_entries() {
        let (segment, evicted) = create_test_segment(128);
        for i in 0..3 {
            segment.put_pinned(&format!("k{i:03}"), &"x".repeat(16)).unwrap();
        }
        assert!(matches!(
            segment.put(&s("k003"), &"y".repeat(16)),
            Err(TierError::OutOfMemory)
        ));
        assert!(evicted.lock().is_empty());
        assert!(matches!(
            segment.put(&s("big"), &"z".repeat(512)),
            Err(TierError::EntryTooLarge { .. })
        ));
    }

    #[test]
    fn test_failed_overwrite_keeps_old_value() {
        let (segment, evicted) = create_test_segment(128);
        for i in 0..3 {
            segment.put_pinned(&format!("k{i:03}"), &"x".repeat(16)).unwrap();
        }

        // 48 bytes with nothing evictable.
        assert!(matches!(
            segment.put_pinned(&s("k000"), &"y".repeat(24)),
            Err(TierError::OutOfMemory)
        ));

        assert_eq!(segment.get(&s("k000")).unwrap(), Some("x".repeat(16)));
        assert_eq!(segment.get_metadata(&s("k000"), PINNED), Some(PINNED));
        assert_eq!(segment.len(), 3);
        assert!(evicted.lock().is_empty());
    }

    #[test]
    fn test_evict_with_shrink_notifies_then_compacts() {
        let (segment, evicted) = create_test_segment(4096);
        segment.put(&s("a"), &s("1")).unwrap();
        segment.put_pinned(&s("b"), &s("2")).unwrap();

        let slot = segment.get_eviction_index().expect("no candidate");
        assert!(segment.evict(slot, true).unwrap());

        assert_eq!(*evicted.lock(), vec![(s("a"), s("1"))]);
        assert_eq!(segment.get(&s("b")).unwrap(), Some(s("2")));
        assert_eq!(segment.used(), crate::storage::record_size(1, 1));
    }

    #[test]
    fn test_evict_notifies_even_if_removal_is_not_durable() {
        use crate::storage::FailingPageSource;
        use std::sync::atomic::Ordering;

        let evicted: Evicted = Arc::new(Mutex::new(Vec::new()));
        let sink = evicted.clone();
        let (pages, fail) = FailingPageSource::new(4096);
        let segment = SegmentBuilder::<String, String>::new()
            .eviction_listener(move |key: &String, value: String| {
                sink.lock().push((key.clone(), value));
            })
            .build(PagedStorageEngine::new(pages, 4096).unwrap())
            .unwrap();
        segment.put(&s("key"), &s("value")).unwrap();

        fail.store(true, Ordering::Relaxed);
        let slot = segment.get_eviction_index().expect("no candidate");
        assert!(matches!(segment.evict(slot, true), Err(TierError::Io(_))));

        assert_eq!(*evicted.lock(), vec![(s("key"), s("value"))]);
        assert!(segment.is_empty());
        assert_eq!(segment.counters().snapshot().evictions, 1);
    }

    #[test]
    fn test_set_metadata_only_touches_segment_bits() {
        let (segment, _) = create_test_segment(4096);
        segment.put(&s("key"), &s("value")).unwrap();

        let updated = segment
            .set_metadata(&s("key"), PINNED | PRESENT, PINNED)
            .unwrap();
        assert_eq!(updated, Some(PINNED | PRESENT));
        assert_eq!(segment.get_metadata(&s("key"), PINNED), Some(PINNED));

        assert_eq!(segment.set_metadata(&s("missing"), PINNED, 0).unwrap(), None);
    }

    #[test]
    fn test_compute_is_atomic_read_modify_write() {
        let (segment, _) = create_test_segment(4096);

        let computed = segment
            .compute(&s("key"), |current| {
                assert!(current.is_none());
                Ok((Compute::Put(s("one")), 1))
            })
            .unwrap();
        assert_eq!(computed, 1);

        let seen = segment
            .compute(&s("key"), |current| {
                let value = current.map(|m| m.value);
                Ok((Compute::Keep, value))
            })
            .unwrap();
        assert_eq!(seen, Some(s("one")));

        segment
            .compute(&s("key"), |_| Ok((Compute::PutPinned(s("two")), ())))
            .unwrap();
        assert_eq!(segment.get_metadata(&s("key"), PINNED), Some(PINNED));

        let result: TierResult<()> = segment.compute(&s("key"), |_| Err(TierError::OutOfMemory));
        assert!(result.is_err());
        assert_eq!(segment.get(&s("key")).unwrap(), Some(s("two")));
    }

    #[test]
    fn test_drain_and_clear() {
        let (segment, evicted) = create_test_segment(4096);
        segment.put(&s("a"), &s("1")).unwrap();
        segment.put(&s("b"), &s("2")).unwrap();

        let mut drained = segment.drain().unwrap();
        drained.sort();
        assert_eq!(drained, vec![(s("a"), s("1")), (s("b"), s("2"))]);
        assert!(segment.is_empty());
        assert!(evicted.lock().is_empty());

        segment.put(&s("c"), &s("3")).unwrap();
        segment.clear();
        assert!(segment.is_empty());
        assert_eq!(segment.used(), 0);
    }

    #[test]
    fn test_mapping_expiry() {
        let mapping = Mapping {
            value: (),
            metadata: 0,
            expire_at: 100,
        };
        assert!(!mapping.is_expired(99));
        assert!(mapping.is_expired(100));

        let forever = Mapping {
            value: (),
            metadata: 0,
            expire_at: 0,
        };
        assert!(!forever.is_expired(u32::MAX));
    }

    #[test]
    fn test_ttl_sets_expiry() {
        let segment = SegmentBuilder::<String, String>::new()
            .ttl(Duration::from_secs(60))
            .build_heap(4096)
            .unwrap();
        segment.put(&s("key"), &s("value")).unwrap();
        let expire_at = segment
            .compute(&s("key"), |current| Ok((Compute::Keep, current.map(|m| m.expire_at))))
            .unwrap()
            .unwrap();
        assert!(expire_at >= current_time_secs() + 59);
        assert_eq!(segment.ttl(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_unsupported_type_fails_at_build() {
        #[derive(Debug)]
        struct Opaque;

        let result = SegmentBuilder::<Opaque, String>::new().build_heap(4096);
        assert!(matches!(result, Err(TierError::UnsupportedType(_))));
    }

    #[test]
    fn test_destroy() {
        let (segment, _) = create_test_segment(4096);
        segment.put(&s("key"), &s("value")).unwrap();
        segment.destroy().unwrap();
    }
}
