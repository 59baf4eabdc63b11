//! Caching tier contracts.
//!
//! A cache is assembled from two tiers:
//!
//! ```text
//!            get_or_compute_if_absent / invalidate
//!                          |
//!                          v
//!        +----------------------------------+
//!        |       HigherCachingTier          |  fast, volatile, single-flight
//!        +----------------------------------+
//!           | miss: get_and_remove   ^ evicted: install_mapping (demotion)
//!           v                        |
//!        +----------------------------------+
//!        |       LowerCachingTier           |  larger, possibly durable
//!        +----------------------------------+
//! ```
//!
//! [`CompoundCachingTier`] coordinates the pair; [`SegmentedTier`] is the
//! concrete implementation of both roles.

mod compound;
mod segmented;

pub use compound::CompoundCachingTier;
pub use segmented::{HeapTier, PersistentTier, SegmentedTier, SegmentedTierBuilder, TierSegment};

use crate::error::TierResult;
use parking_lot::RwLock;
use std::sync::Arc;

/// Receives entries that leave a tier.
pub trait InvalidationListener<K, V>: Send + Sync {
    /// Called once per entry that left the tier.
    fn on_invalidation(&self, key: &K, value: V);
}

impl<K, V, F> InvalidationListener<K, V> for F
where
    F: Fn(&K, V) + Send + Sync,
{
    fn on_invalidation(&self, key: &K, value: V) {
        self(key, value)
    }
}

/// A tier that can serve as a whole cache level.
///
/// # Thread Safety
///
/// Tiers must be `Send + Sync`; all operations take `&self`.
pub trait CachingTier<K, V>: Send + Sync {
    /// Get the value for `key`, computing it on a miss.
    ///
    /// `source` runs at most once per miss window for a given key; concurrent
    /// callers for the same key wait for it and observe its result.
    ///
    /// # Returns
    /// * `Ok(Some(value))` - The cached or freshly computed value
    /// * `Ok(None)` - Miss, and `source` produced nothing
    fn get_or_compute_if_absent<F>(&self, key: &K, source: F) -> TierResult<Option<V>>
    where
        F: FnOnce(&K) -> TierResult<Option<V>>;

    /// Remove `key`, notifying the invalidation listener if a value was held.
    fn invalidate(&self, key: &K) -> TierResult<()>;

    /// Remove every entry, notifying the listener for each.
    fn invalidate_all(&self) -> TierResult<()>;

    /// Remove every entry without notification.
    fn clear(&self) -> TierResult<()>;

    /// Replace the invalidation listener.
    fn set_invalidation_listener(&self, listener: Arc<dyn InvalidationListener<K, V>>);
}

/// The first-checked tier of a two-level cache.
pub trait HigherCachingTier<K, V>: CachingTier<K, V> {
    /// Remove `key` without notifying the invalidation listener.
    ///
    /// `f` receives the removed value (or `None`) while the key is still
    /// locked, so the caller decides what happens to it.
    fn silent_invalidate<F>(&self, key: &K, f: F) -> TierResult<()>
    where
        F: FnOnce(Option<V>) -> TierResult<()>;

    /// Remove every entry without notification, handing each to `f`.
    ///
    /// `f` is called for every entry even if an earlier call failed; the first
    /// error is returned.
    fn silent_invalidate_all<F>(&self, f: F) -> TierResult<()>
    where
        F: FnMut(&K, Option<V>) -> TierResult<()>;
}

/// The second-checked tier of a two-level cache.
pub trait LowerCachingTier<K, V>: Send + Sync {
    /// Install the value produced by `source` under `key`.
    ///
    /// A value replaced by the installation is reported to the invalidation
    /// listener. `None` from `source` removes the mapping.
    ///
    /// # Returns
    /// The installed value.
    fn install_mapping<F>(&self, key: &K, source: F) -> TierResult<Option<V>>
    where
        F: FnOnce(&K) -> Option<V>;

    /// Remove and return the live value for `key`.
    ///
    /// A value found to be expired is removed, reported to the invalidation
    /// listener, and not returned.
    fn get_and_remove(&self, key: &K) -> TierResult<Option<V>>;

    /// Remove `key`, notifying the invalidation listener if a value was held.
    fn invalidate(&self, key: &K) -> TierResult<()>;

    /// Remove every entry, notifying the listener for each.
    fn invalidate_all(&self) -> TierResult<()>;

    /// Remove every entry without notification.
    fn clear(&self) -> TierResult<()>;

    /// Replace the invalidation listener.
    fn set_invalidation_listener(&self, listener: Arc<dyn InvalidationListener<K, V>>);
}

/// Shared, replaceable listener reference.
///
/// Clones share the same slot, so a listener registered after construction is
/// seen by every holder.
pub(crate) struct ListenerSlot<K, V> {
    inner: Arc<RwLock<Option<Arc<dyn InvalidationListener<K, V>>>>>,
}

impl<K, V> Clone for ListenerSlot<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K, V> ListenerSlot<K, V> {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(None)),
        }
    }

    pub(crate) fn set(&self, listener: Arc<dyn InvalidationListener<K, V>>) {
        *self.inner.write() = Some(listener);
    }

    /// Deliver one event. Returns false if no listener is registered.
    pub(crate) fn notify(&self, key: &K, value: V) -> bool {
        // Clone out so the callback runs without the slot lock held.
        let listener = self.inner.read().clone();
        match listener {
            Some(listener) => {
                listener.on_invalidation(key, value);
                true
            }
            None => false,
        }
    }
}
