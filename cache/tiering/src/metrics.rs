//! Segment and tier counters.
//!
//! - [`SegmentCounters`] - per-segment write and eviction statistics
//! - [`CompoundCounters`] - cross-tier coordination statistics
//!
//! All counters use relaxed atomics; snapshots are approximate under
//! concurrent updates.

use crate::sync::{AtomicU64, Ordering};

/// Atomic counters for a single segment.
#[derive(Debug)]
pub struct SegmentCounters {
    puts: AtomicU64,
    vetoed: AtomicU64,
    pinned: AtomicU64,
    evictions: AtomicU64,
    removals: AtomicU64,
    expirations: AtomicU64,
}

impl Default for SegmentCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl SegmentCounters {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self {
            puts: AtomicU64::new(0),
            vetoed: AtomicU64::new(0),
            pinned: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            removals: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    /// Record a completed write and the eviction-control bits it carried.
    #[inline]
    pub fn record_put(&self, vetoed: bool, pinned: bool) {
        self.puts.fetch_add(1, Ordering::Relaxed);
        if vetoed {
            self.vetoed.fetch_add(1, Ordering::Relaxed);
        }
        if pinned {
            self.pinned.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record an eviction.
    #[inline]
    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an explicit removal.
    #[inline]
    pub fn record_removal(&self) {
        self.removals.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an entry found expired.
    #[inline]
    pub fn record_expiration(&self) {
        self.expirations.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot the current values.
    pub fn snapshot(&self) -> SegmentSnapshot {
        SegmentSnapshot {
            puts: self.puts.load(Ordering::Relaxed),
            vetoed: self.vetoed.load(Ordering::Relaxed),
            pinned: self.pinned.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            removals: self.removals.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`SegmentCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SegmentSnapshot {
    /// Writes stored.
    pub puts: u64,
    /// Writes that carried the veto bit.
    pub vetoed: u64,
    /// Writes that carried the pin bit.
    pub pinned: u64,
    /// Entries evicted.
    pub evictions: u64,
    /// Entries explicitly removed.
    pub removals: u64,
    /// Entries found expired.
    pub expirations: u64,
}

impl std::ops::Add for SegmentSnapshot {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            puts: self.puts + rhs.puts,
            vetoed: self.vetoed + rhs.vetoed,
            pinned: self.pinned + rhs.pinned,
            evictions: self.evictions + rhs.evictions,
            removals: self.removals + rhs.removals,
            expirations: self.expirations + rhs.expirations,
        }
    }
}

/// Atomic counters for a compound tier.
#[derive(Debug)]
pub struct CompoundCounters {
    lower_hits: AtomicU64,
    computes: AtomicU64,
    notifications: AtomicU64,
    failed_demotions: AtomicU64,
    failed_promotions: AtomicU64,
}

impl Default for CompoundCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl CompoundCounters {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self {
            lower_hits: AtomicU64::new(0),
            computes: AtomicU64::new(0),
            notifications: AtomicU64::new(0),
            failed_demotions: AtomicU64::new(0),
            failed_promotions: AtomicU64::new(0),
        }
    }

    /// Record a higher-tier miss resolved from the lower tier.
    #[inline]
    pub fn record_lower_hit(&self) {
        self.lower_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a miss in both tiers that ran the caller's function.
    #[inline]
    pub fn record_compute(&self) {
        self.computes.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an external invalidation notification.
    #[inline]
    pub fn record_notification(&self) {
        self.notifications.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a demotion that the lower tier rejected.
    #[inline]
    pub fn record_failed_demotion(&self) {
        self.failed_demotions.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a lower-tier hit the higher tier could not store.
    #[inline]
    pub fn record_failed_promotion(&self) {
        self.failed_promotions.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot the current values.
    pub fn snapshot(&self) -> CompoundSnapshot {
        CompoundSnapshot {
            lower_hits: self.lower_hits.load(Ordering::Relaxed),
            computes: self.computes.load(Ordering::Relaxed),
            notifications: self.notifications.load(Ordering::Relaxed),
            failed_demotions: self.failed_demotions.load(Ordering::Relaxed),
            failed_promotions: self.failed_promotions.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`CompoundCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompoundSnapshot {
    /// Misses resolved from the lower tier (promotions).
    pub lower_hits: u64,
    /// Misses that ran the caller's function.
    pub computes: u64,
    /// External invalidation notifications delivered.
    pub notifications: u64,
    /// Demotions rejected by the lower tier.
    pub failed_demotions: u64,
    /// Lower-tier hits the higher tier rejected.
    pub failed_promotions: u64,
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;

    #[test]
    fn test_segment_counters() {
        let counters = SegmentCounters::new();

        counters.record_put(false, false);
        counters.record_put(true, false);
        counters.record_put(true, true);
        counters.record_eviction();
        counters.record_removal();
        counters.record_expiration();

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.puts, 3);
        assert_eq!(snapshot.vetoed, 2);
        assert_eq!(snapshot.pinned, 1);
        assert_eq!(snapshot.evictions, 1);
        assert_eq!(snapshot.removals, 1);
        assert_eq!(snapshot.expirations, 1);
    }

    #[test]
    fn test_segment_snapshot_add() {
        let a = SegmentSnapshot {
            puts: 1,
            evictions: 2,
            ..Default::default()
        };
        let b = SegmentSnapshot {
            puts: 3,
            removals: 1,
            ..Default::default()
        };
        let sum = a + b;
        assert_eq!(sum.puts, 4);
        assert_eq!(sum.evictions, 2);
        assert_eq!(sum.removals, 1);
    }

    #[test]
    fn test_compound_counters() {
        let counters = CompoundCounters::new();
        counters.record_lower_hit();
        counters.record_compute();
        counters.record_compute();
        counters.record_notification();
        counters.record_failed_demotion();
        counters.record_failed_promotion();

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.lower_hits, 1);
        assert_eq!(snapshot.computes, 2);
        assert_eq!(snapshot.notifications, 1);
        assert_eq!(snapshot.failed_demotions, 1);
        assert_eq!(snapshot.failed_promotions, 1);
    }
}
