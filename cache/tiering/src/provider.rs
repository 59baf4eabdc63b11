//! Tier implementation ranking.
//!
//! An assembler holding a set of requested resource kinds asks every
//! [`CachingTierProvider`] for a rank and picks the highest. Ties are left to
//! the assembler.

use crate::config::TierConfig;
use std::collections::HashSet;
use std::fmt;

/// A kind of storage a tier can be placed on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceType {
    /// Fast, volatile process memory.
    Heap,
    /// Process memory outside the managed heap.
    OffHeap,
    /// File-backed storage.
    Disk,
    /// Any other, named resource kind.
    Other(String),
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceType::Heap => write!(f, "heap"),
            ResourceType::OffHeap => write!(f, "offheap"),
            ResourceType::Disk => write!(f, "disk"),
            ResourceType::Other(name) => write!(f, "{}", name),
        }
    }
}

static COMPOUND_RESOURCES: [ResourceType; 2] = [ResourceType::Heap, ResourceType::OffHeap];
static HEAP_RESOURCES: [ResourceType; 1] = [ResourceType::Heap];
static DISK_RESOURCES: [ResourceType; 1] = [ResourceType::Disk];

/// Scores how well a tier implementation matches requested resources.
pub trait CachingTierProvider {
    /// Resource kinds this implementation supports.
    fn supported_resource_types(&self) -> &'static [ResourceType];

    /// Count the requested resource kinds this implementation supports.
    ///
    /// Unsupported kinds contribute nothing. Tier configurations are accepted
    /// for the assembler's benefit and do not affect the rank.
    fn rank_caching_tier(
        &self,
        resource_types: &HashSet<ResourceType>,
        _service_configs: &[TierConfig],
    ) -> usize {
        let supported = self.supported_resource_types();
        resource_types
            .iter()
            .filter(|resource| supported.contains(resource))
            .count()
    }
}

/// Provider for [`CompoundCachingTier`](crate::tier::CompoundCachingTier).
#[derive(Debug, Default, Clone, Copy)]
pub struct CompoundCachingTierProvider;

impl CachingTierProvider for CompoundCachingTierProvider {
    fn supported_resource_types(&self) -> &'static [ResourceType] {
        &COMPOUND_RESOURCES
    }
}

/// Provider for a heap [`SegmentedTier`](crate::tier::SegmentedTier).
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapTierProvider;

impl CachingTierProvider for HeapTierProvider {
    fn supported_resource_types(&self) -> &'static [ResourceType] {
        &HEAP_RESOURCES
    }
}

/// Provider for a file-backed [`SegmentedTier`](crate::tier::SegmentedTier).
#[derive(Debug, Default, Clone, Copy)]
pub struct PersistentTierProvider;

impl CachingTierProvider for PersistentTierProvider {
    fn supported_resource_types(&self) -> &'static [ResourceType] {
        &DISK_RESOURCES
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn types(kinds: &[ResourceType]) -> HashSet<ResourceType> {
        kinds.iter().cloned().collect()
    }

    #[test]
    fn test_rank_caching_tier() {
        let provider = CompoundCachingTierProvider;
        assert_eq!(
            provider.rank_caching_tier(&types(&[ResourceType::Heap, ResourceType::OffHeap]), &[]),
            2
        );
        assert_eq!(
            provider.rank_caching_tier(&types(&[ResourceType::Other("unmatched".into())]), &[]),
            0
        );
    }

    #[test]
    fn test_unmatched_kinds_do_not_reduce_rank() {
        let provider = CompoundCachingTierProvider;
        let requested = types(&[
            ResourceType::Heap,
            ResourceType::Disk,
            ResourceType::Other("unmatched".into()),
        ]);
        assert_eq!(provider.rank_caching_tier(&requested, &[]), 1);
        assert_eq!(provider.rank_caching_tier(&HashSet::new(), &[]), 0);
    }

    #[test]
    fn test_highest_rank_wins() {
        let requested = types(&[ResourceType::Heap, ResourceType::OffHeap]);
        let configs = [TierConfig::default()];
        let providers: [&dyn CachingTierProvider; 3] = [
            &HeapTierProvider,
            &PersistentTierProvider,
            &CompoundCachingTierProvider,
        ];

        let ranks: Vec<usize> = providers
            .iter()
            .map(|provider| provider.rank_caching_tier(&requested, &configs))
            .collect();
        assert_eq!(ranks, vec![1, 0, 2]);
        assert_eq!(
            PersistentTierProvider.rank_caching_tier(&types(&[ResourceType::Disk]), &[]),
            1
        );
    }

    #[test]
    fn test_resource_type_display() {
        assert_eq!(ResourceType::OffHeap.to_string(), "offheap");
        assert_eq!(ResourceType::Other("pmem".into()).to_string(), "pmem");
    }
}
