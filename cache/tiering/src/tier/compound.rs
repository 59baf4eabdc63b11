//! Two-level tier coordination.
//!
//! [`CompoundCachingTier`] presents a higher and a lower tier as one
//! [`CachingTier`]:
//!
//! - a miss in the higher tier is resolved from the lower tier first
//!   (promotion), and only then from the caller's source
//! - a value the higher tier evicts is demoted into the lower tier
//! - a value that leaves both tiers is reported to the external listener
//!   exactly once
//!
//! There is no atomicity across the tier boundary. A concurrent `invalidate`
//! racing a `get_or_compute_if_absent` can briefly leave a key absent from
//! both tiers, or present in both.

use crate::error::TierResult;
use crate::metrics::{CompoundCounters, CompoundSnapshot};
use crate::tier::{
    CachingTier, HigherCachingTier, InvalidationListener, ListenerSlot, LowerCachingTier,
};
use std::sync::Arc;
use tracing::warn;

/// Receives higher-tier evictions and demotes them into the lower tier.
struct HigherTierAdapter<K, V, L> {
    lower: Arc<L>,
    listener: ListenerSlot<K, V>,
    counters: Arc<CompoundCounters>,
}

impl<K, V, L> InvalidationListener<K, V> for HigherTierAdapter<K, V, L>
where
    K: Send + Sync,
    V: Clone + Send + Sync,
    L: LowerCachingTier<K, V>,
{
    fn on_invalidation(&self, key: &K, value: V) {
        let demoted = value.clone();
        if let Err(e) = self.lower.install_mapping(key, move |_| Some(demoted)) {
            warn!(error = %e, "failed to demote value into lower tier");
            self.counters.record_failed_demotion();
            if self.listener.notify(key, value) {
                self.counters.record_notification();
            }
        }
    }
}

/// Forwards lower-tier invalidations to the external listener.
struct LowerTierAdapter<K, V> {
    listener: ListenerSlot<K, V>,
    counters: Arc<CompoundCounters>,
}

impl<K, V> InvalidationListener<K, V> for LowerTierAdapter<K, V>
where
    K: Send + Sync,
    V: Send + Sync,
{
    fn on_invalidation(&self, key: &K, value: V) {
        if self.listener.notify(key, value) {
            self.counters.record_notification();
        }
    }
}

/// A higher and a lower tier acting as one.
///
/// Both tiers are shared; whoever assembled them keeps ownership.
pub struct CompoundCachingTier<K, V, H, L> {
    higher: Arc<H>,
    lower: Arc<L>,
    listener: ListenerSlot<K, V>,
    counters: Arc<CompoundCounters>,
}

impl<K, V, H, L> CompoundCachingTier<K, V, H, L>
where
    K: Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    H: HigherCachingTier<K, V>,
    L: LowerCachingTier<K, V> + 'static,
{
    /// Compose `higher` over `lower`, wiring the internal listeners of both.
    pub fn new(higher: Arc<H>, lower: Arc<L>) -> Self {
        let listener = ListenerSlot::new();
        let counters = Arc::new(CompoundCounters::new());

        higher.set_invalidation_listener(Arc::new(HigherTierAdapter {
            lower: lower.clone(),
            listener: listener.clone(),
            counters: counters.clone(),
        }));
        lower.set_invalidation_listener(Arc::new(LowerTierAdapter {
            listener: listener.clone(),
            counters: counters.clone(),
        }));

        Self {
            higher,
            lower,
            listener,
            counters,
        }
    }

    /// The higher tier.
    pub fn higher(&self) -> &Arc<H> {
        &self.higher
    }

    /// The lower tier.
    pub fn lower(&self) -> &Arc<L> {
        &self.lower
    }

    /// Snapshot of the coordination counters.
    pub fn counters(&self) -> CompoundSnapshot {
        self.counters.snapshot()
    }

    fn notify(&self, key: &K, value: V) {
        if self.listener.notify(key, value) {
            self.counters.record_notification();
        }
    }
}

impl<K, V, H, L> CachingTier<K, V> for CompoundCachingTier<K, V, H, L>
where
    K: Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    H: HigherCachingTier<K, V>,
    L: LowerCachingTier<K, V> + 'static,
{
    fn get_or_compute_if_absent<F>(&self, key: &K, source: F) -> TierResult<Option<V>>
    where
        F: FnOnce(&K) -> TierResult<Option<V>>,
    {
        let mut promoted = None;
        let result = self.higher.get_or_compute_if_absent(key, |key| {
            if let Some(value) = self.lower.get_and_remove(key)? {
                self.counters.record_lower_hit();
                promoted = Some(value.clone());
                return Ok(Some(value));
            }
            self.counters.record_compute();
            source(key)
        });

        // The value already left the lower tier; put it back or report it.
        if result.is_err()
            && let Some(value) = promoted
        {
            self.counters.record_failed_promotion();
            let restored = value.clone();
            if let Err(e) = self.lower.install_mapping(key, move |_| Some(restored)) {
                warn!(error = %e, "failed to return unpromoted value to lower tier");
                self.notify(key, value);
            }
        }
        result
    }

    fn invalidate(&self, key: &K) -> TierResult<()> {
        self.higher.silent_invalidate(key, |removed| match removed {
            Some(value) => {
                self.notify(key, value);
                Ok(())
            }
            None => self.lower.invalidate(key),
        })
    }

    fn invalidate_all(&self) -> TierResult<()> {
        let higher = self.higher.silent_invalidate_all(|key, removed| match removed {
            Some(value) => {
                self.notify(key, value);
                Ok(())
            }
            None => self.lower.invalidate(key),
        });
        let lower = self.lower.invalidate_all();
        higher.and(lower)
    }

    fn clear(&self) -> TierResult<()> {
        let higher = self.higher.clear();
        let lower = self.lower.clear();
        higher.and(lower)
    }

    fn set_invalidation_listener(&self, listener: Arc<dyn InvalidationListener<K, V>>) {
        self.listener.set(listener);
    }
}
