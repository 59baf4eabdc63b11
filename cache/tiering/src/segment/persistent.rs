//! File-backed segment.
//!
//! [`PersistentSegment`] wraps a [`Segment`] whose storage engine sits on a
//! memory-mapped file instead of heap pages, and adds:
//! - Dirty tracking for knowing when the file needs to be synced
//! - A consuming [`destroy`](PersistentSegment::destroy) that flushes and
//!   closes the backing file
//!
//! The file is created (or truncated) when the segment is created. Reopening
//! an existing file does not recover its entries.

use crate::config::SyncMode;
use crate::error::TierResult;
use crate::segment::{Compute, Mapping, Segment, SegmentBuilder};
use crate::storage::{MappedPageSource, PagedStorageEngine, SlotId};
use crate::sync::{AtomicBool, Ordering};
use std::path::{Path, PathBuf};
use tracing::debug;

type MappedEngine = PagedStorageEngine<MappedPageSource>;

/// A segment backed by a memory-mapped file.
pub struct PersistentSegment<K, V> {
    /// The underlying segment over mapped pages.
    inner: Segment<K, V, MappedEngine>,

    /// Backing file.
    path: PathBuf,

    /// Whether this segment has been modified since the last flush.
    dirty: AtomicBool,
}

impl<K: 'static, V: 'static> PersistentSegment<K, V> {
    /// Create a segment storing at most `max_size` bytes in a file at `path`.
    ///
    /// The file is sized to `max_size` up front.
    pub fn create(
        path: impl AsRef<Path>,
        max_size: usize,
        sync_mode: SyncMode,
        builder: SegmentBuilder<K, V>,
    ) -> TierResult<Self> {
        let path = path.as_ref().to_path_buf();
        // Resolve codecs first so an unsupported type never leaves a file behind.
        builder.resolve_codecs()?;

        let pages = MappedPageSource::create(&path, max_size, sync_mode)?;
        let engine = PagedStorageEngine::new(pages, max_size)?;
        let inner = builder.build(engine)?;

        debug!(path = %path.display(), max_size, ?sync_mode, "created persistent segment");

        Ok(Self {
            inner,
            path,
            dirty: AtomicBool::new(false),
        })
    }

    /// Get a reference to the underlying segment.
    #[inline]
    pub fn inner(&self) -> &Segment<K, V, MappedEngine> {
        &self.inner
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the segment has unflushed modifications.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    #[inline]
    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    /// See [`Segment::put`].
    pub fn put(&self, key: &K, value: &V) -> TierResult<()> {
        self.mark_dirty();
        self.inner.put(key, value)
    }

    /// See [`Segment::put_pinned`].
    pub fn put_pinned(&self, key: &K, value: &V) -> TierResult<()> {
        self.mark_dirty();
        self.inner.put_pinned(key, value)
    }

    /// See [`Segment::get`].
    pub fn get(&self, key: &K) -> TierResult<Option<V>> {
        self.inner.get(key)
    }

    /// See [`Segment::remove`].
    pub fn remove(&self, key: &K) -> TierResult<Option<V>> {
        self.mark_dirty();
        self.inner.remove(key)
    }

    /// See [`Segment::compute`].
    pub fn compute<R, F>(&self, key: &K, f: F) -> TierResult<R>
    where
        F: FnOnce(Option<Mapping<V>>) -> TierResult<(Compute<V>, R)>,
    {
        self.inner.compute(key, |current| {
            let (action, result) = f(current)?;
            if !matches!(action, Compute::Keep) {
                self.mark_dirty();
            }
            Ok((action, result))
        })
    }

    /// See [`Segment::get_metadata`].
    pub fn get_metadata(&self, key: &K, mask: u32) -> Option<u32> {
        self.inner.get_metadata(key, mask)
    }

    /// See [`Segment::evictable`].
    #[inline]
    pub fn evictable(&self, metadata: u32) -> bool {
        self.inner.evictable(metadata)
    }

    /// See [`Segment::get_eviction_index`].
    pub fn get_eviction_index(&self) -> Option<SlotId> {
        self.inner.get_eviction_index()
    }

    /// See [`Segment::evict`].
    pub fn evict(&self, slot: SlotId, shrink: bool) -> TierResult<bool> {
        self.mark_dirty();
        self.inner.evict(slot, shrink)
    }

    /// See [`Segment::drain`].
    pub fn drain(&self) -> TierResult<Vec<(K, V)>> {
        self.mark_dirty();
        self.inner.drain()
    }

    /// See [`Segment::clear`].
    pub fn clear(&self) {
        self.mark_dirty();
        self.inner.clear()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// True if no entries are stored.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Flush modified pages to the file.
    ///
    /// A failed flush leaves the segment dirty.
    pub fn flush(&self) -> TierResult<()> {
        flush_if_dirty(&self.dirty, || self.inner.flush())
    }

    /// Flush and close the backing file.
    ///
    /// The file is left on disk.
    pub fn destroy(self) -> TierResult<()> {
        debug!(path = %self.path.display(), "destroying persistent segment");
        self.inner.destroy()
    }
}

/// Run `flush` if `dirty` is set, clearing the flag first so writes racing
/// the flush mark the segment dirty again.
fn flush_if_dirty<F>(dirty: &AtomicBool, flush: F) -> TierResult<()>
where
    F: FnOnce() -> TierResult<()>,
{
    if dirty.swap(false, Ordering::AcqRel)
        && let Err(e) = flush()
    {
        dirty.store(true, Ordering::Release);
        return Err(e);
    }
    Ok(())
}


#[cfg(all(test, feature = "loom"))]
mod loom_tests {
    use super::*;
    use loom::sync::Arc;
    use loom::thread;

    /// A write marking the segment dirty is never lost to a concurrent flush:
    /// either the flush observed it, or the segment is still dirty afterwards.
    #[test]
    fn test_mark_dirty_racing_flush() {
        loom::model(|| {
            let dirty = Arc::new(AtomicBool::new(false));
            let flushed = Arc::new(AtomicBool::new(false));

            let writer = {
                let dirty = dirty.clone();
                thread::spawn(move || dirty.store(true, Ordering::Release))
            };

            let flusher = {
                let dirty = dirty.clone();
                let flushed = flushed.clone();
                thread::spawn(move || {
                    flush_if_dirty(&dirty, || {
                        flushed.store(true, Ordering::Release);
                        Ok(())
                    })
                })
            };

            writer.join().unwrap();
            flusher.join().unwrap().unwrap();

            assert!(dirty.load(Ordering::Acquire) || flushed.load(Ordering::Acquire));
        });
    }
}
