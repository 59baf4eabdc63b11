//! Compound tier tests over real segmented tiers.
//!
//! These tests wire a heap higher tier over a heap or file-backed lower tier
//! and verify promotion, demotion and single-notification invalidation end to
//! end.

use cache_tiering::{
    CachingTier, CompoundCachingTier, HeapTier, PersistentTier, SegmentedTierBuilder, SyncMode,
    TierError,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

type Events = Arc<Mutex<Vec<(String, String)>>>;
type HeapCompound =
    CompoundCachingTier<String, String, HeapTier<String, String>, HeapTier<String, String>>;

/// Create a small single-segment higher tier that evicts quickly.
fn create_higher_tier(max_size: usize) -> HeapTier<String, String> {
    SegmentedTierBuilder::new()
        .segments(1)
        .max_size(max_size)
        .build_heap()
        .expect("Failed to create higher tier")
}

fn create_lower_tier() -> HeapTier<String, String> {
    SegmentedTierBuilder::new()
        .segments(4)
        .max_size(256 * 1024)
        .build_heap()
        .expect("Failed to create lower tier")
}

fn listen<T: CachingTier<String, String>>(cache: &T) -> Events {
    let events: Events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    cache.set_invalidation_listener(Arc::new(move |key: &String, value: String| {
        sink.lock().push((key.clone(), value));
    }));
    events
}

fn create_cache() -> (HeapCompound, Events) {
    let cache = CompoundCachingTier::new(
        Arc::new(create_higher_tier(64 * 1024)),
        Arc::new(create_lower_tier()),
    );
    let events = listen(&cache);
    (cache, events)
}

fn key(i: usize) -> String {
    format!("key-{i:03}")
}

fn value(i: usize) -> String {
    format!("{:0>32}", i)
}

// =============================================================================
// Promotion and Computation
// =============================================================================

#[test]
fn test_miss_in_both_tiers_computes_into_higher() {
    let (cache, events) = create_cache();

    let result = cache
        .get_or_compute_if_absent(&key(1), |_| Ok(Some(value(1))))
        .expect("compute failed");

    assert_eq!(result, Some(value(1)));
    assert_eq!(cache.higher().peek(&key(1)).unwrap(), Some(value(1)));
    assert!(cache.lower().is_empty());
    assert!(events.lock().is_empty());
}

#[test]
fn test_lower_tier_value_is_promoted() {
    let (cache, events) = create_cache();
    cache
        .lower()
        .install_mapping(&key(1), |_| Some(value(1)))
        .unwrap();

    let mut computed = false;
    let result = cache
        .get_or_compute_if_absent(&key(1), |_| {
            computed = true;
            Ok(Some("recomputed".to_string()))
        })
        .unwrap();

    assert_eq!(result, Some(value(1)));
    assert!(!computed);
    assert_eq!(cache.higher().peek(&key(1)).unwrap(), Some(value(1)));
    assert!(cache.lower().is_empty());
    assert!(events.lock().is_empty());
    assert_eq!(cache.counters().lower_hits, 1);
}

#[test]
fn test_compute_error_propagates() {
    let (cache, _) = create_cache();

    let result = cache.get_or_compute_if_absent(&key(1), |_| Err(TierError::OutOfMemory));

    assert!(matches!(result, Err(TierError::OutOfMemory)));
    assert!(cache.higher().is_empty());
}

// =============================================================================
// Demotion
// =============================================================================

#[test]
fn test_higher_tier_evictions_are_demoted() {
    // 56-byte records: the higher tier holds 9 of them.
    let cache = CompoundCachingTier::new(
        Arc::new(create_higher_tier(512)),
        Arc::new(create_lower_tier()),
    );
    let events = listen(&cache);

    for i in 0..50 {
        cache
            .get_or_compute_if_absent(&key(i), |_| Ok(Some(value(i))))
            .unwrap();
    }

    assert!(cache.higher().len() <= 9);
    assert_eq!(cache.higher().len() + cache.lower().len(), 50);
    assert!(events.lock().is_empty());

    // Every key is still served without recomputation.
    for i in 0..50 {
        let result = cache
            .get_or_compute_if_absent(&key(i), |_| Ok(Some("recomputed".to_string())))
            .unwrap();
        assert_eq!(result, Some(value(i)));
    }
    assert_eq!(cache.counters().computes, 50);
}

#[test]
fn test_vetoed_entries_stay_in_higher_tier() {
    let higher: HeapTier<String, String> = SegmentedTierBuilder::new()
        .segments(1)
        .max_size(512)
        .veto(|key: &String, _: &String| key == "key-000")
        .build_heap()
        .unwrap();
    let cache = CompoundCachingTier::new(Arc::new(higher), Arc::new(create_lower_tier()));

    for i in 0..50 {
        cache
            .get_or_compute_if_absent(&key(i), |_| Ok(Some(value(i))))
            .unwrap();
    }

    assert_eq!(cache.higher().peek(&key(0)).unwrap(), Some(value(0)));
    assert_eq!(cache.lower().peek(&key(0)).unwrap(), None);
    assert_eq!(cache.higher().counters().vetoed, 1);
}

#[test]
fn test_promotion_into_full_higher_tier_keeps_value() {
    // 40-byte records: three fill the higher tier, and every entry is vetoed.
    let higher: HeapTier<String, String> = SegmentedTierBuilder::new()
        .segments(1)
        .max_size(128)
        .veto(|_: &String, _: &String| true)
        .build_heap()
        .unwrap();
    let cache = CompoundCachingTier::new(Arc::new(higher), Arc::new(create_lower_tier()));
    let events = listen(&cache);

    for i in 0..3 {
        cache
            .get_or_compute_if_absent(&format!("k{i:03}"), |_| Ok(Some("x".repeat(16))))
            .unwrap();
    }
    let key = "k999".to_string();
    cache
        .lower()
        .install_mapping(&key, |_| Some("precious".to_string()))
        .unwrap();

    let result = cache.get_or_compute_if_absent(&key, |_| Ok(Some("recomputed".to_string())));

    assert!(matches!(result, Err(TierError::OutOfMemory)));
    assert_eq!(cache.higher().peek(&key).unwrap(), None);
    assert_eq!(cache.lower().peek(&key).unwrap(), Some("precious".to_string()));
    assert!(events.lock().is_empty());
    assert_eq!(cache.counters().failed_promotions, 1);
    assert_eq!(cache.counters().computes, 3);
}

// =============================================================================
// Invalidation
// =============================================================================

#[test]
fn test_invalidate_fires_once_per_value() {
    let (cache, events) = create_cache();
    cache
        .get_or_compute_if_absent(&key(1), |_| Ok(Some(value(1))))
        .unwrap();
    cache
        .lower()
        .install_mapping(&key(2), |_| Some(value(2)))
        .unwrap();

    cache.invalidate(&key(1)).unwrap();
    cache.invalidate(&key(2)).unwrap();
    cache.invalidate(&key(3)).unwrap();

    assert_eq!(
        *events.lock(),
        vec![(key(1), value(1)), (key(2), value(2))]
    );
    assert!(cache.higher().is_empty());
    assert!(cache.lower().is_empty());
    assert_eq!(cache.counters().notifications, 2);
}

#[test]
fn test_invalidate_all_and_clear() {
    let (cache, events) = create_cache();
    for i in 0..4 {
        cache
            .get_or_compute_if_absent(&key(i), |_| Ok(Some(value(i))))
            .unwrap();
    }
    for i in 4..8 {
        cache
            .lower()
            .install_mapping(&key(i), |_| Some(value(i)))
            .unwrap();
    }

    cache.invalidate_all().unwrap();

    let mut seen = events.lock().clone();
    seen.sort();
    let expected: Vec<_> = (0..8).map(|i| (key(i), value(i))).collect();
    assert_eq!(seen, expected);
    assert!(cache.higher().is_empty());
    assert!(cache.lower().is_empty());

    events.lock().clear();
    cache
        .get_or_compute_if_absent(&key(9), |_| Ok(Some(value(9))))
        .unwrap();
    cache.clear().unwrap();
    assert!(cache.higher().is_empty());
    assert!(events.lock().is_empty());
}

#[test]
fn test_expired_lower_value_is_reported_and_recomputed() {
    let lower: HeapTier<String, String> = SegmentedTierBuilder::new()
        .segments(1)
        .max_size(64 * 1024)
        .ttl(Duration::from_secs(1))
        .build_heap()
        .unwrap();
    let cache = CompoundCachingTier::new(
        Arc::new(create_higher_tier(64 * 1024)),
        Arc::new(lower),
    );
    let events = listen(&cache);

    cache
        .lower()
        .install_mapping(&key(1), |_| Some("stale".to_string()))
        .unwrap();
    std::thread::sleep(Duration::from_millis(2100));

    let mut computed = false;
    let result = cache
        .get_or_compute_if_absent(&key(1), |_| {
            computed = true;
            Ok(Some("fresh".to_string()))
        })
        .unwrap();

    assert_eq!(result, Some("fresh".to_string()));
    assert!(computed);
    assert_eq!(*events.lock(), vec![(key(1), "stale".to_string())]);
    assert!(cache.lower().is_empty());
}

// =============================================================================
// File-backed Lower Tier
// =============================================================================

#[test]
fn test_persistent_lower_tier_round_trip() {
    let dir = tempdir().expect("Failed to create temp dir");
    let lower: PersistentTier<String, String> = SegmentedTierBuilder::new()
        .segments(2)
        .max_size(128 * 1024)
        .persistence(dir.path(), SyncMode::Async)
        .build_persistent()
        .expect("Failed to create persistent tier");
    let lower = Arc::new(lower);
    let cache = CompoundCachingTier::new(Arc::new(create_higher_tier(512)), lower.clone());
    let events = listen(&cache);

    for i in 0..30 {
        cache
            .get_or_compute_if_absent(&key(i), |_| Ok(Some(value(i))))
            .unwrap();
    }
    assert!(!cache.lower().is_empty());
    cache.lower().flush().unwrap();

    for i in 0..30 {
        let result = cache
            .get_or_compute_if_absent(&key(i), |_| Ok(Some("recomputed".to_string())))
            .unwrap();
        assert_eq!(result, Some(value(i)));
    }
    assert!(events.lock().is_empty());

    drop(cache);
    let lower = Arc::try_unwrap(lower)
        .ok()
        .expect("lower tier still shared");
    lower.destroy().unwrap();
    assert!(dir.path().join("segment-0000.dat").exists());
}
