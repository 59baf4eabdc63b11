//! Fixed-capacity byte regions backing a storage engine.
//!
//! - [`HeapPageSource`]: boxed byte slice, volatile
//! - [`MappedPageSource`]: memory-mapped file sized to its declared maximum

use crate::config::SyncMode;
use memmap2::{MmapMut, MmapOptions};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// A contiguous byte region with a fixed capacity.
pub trait PageSource: Send {
    /// Size of the region in bytes.
    fn capacity(&self) -> usize;

    /// The whole region.
    fn bytes(&self) -> &[u8];

    /// The whole region, mutably.
    fn bytes_mut(&mut self) -> &mut [u8];

    /// Called after `len` bytes at `offset` were modified.
    fn written(&self, _offset: usize, _len: usize) -> io::Result<()> {
        Ok(())
    }

    /// Make all modifications durable.
    fn flush(&self) -> io::Result<()> {
        Ok(())
    }

    /// Release the region and any backing resource.
    fn close(self) -> io::Result<()>
    where
        Self: Sized,
    {
        Ok(())
    }
}

/// Heap-allocated page source.
pub struct HeapPageSource {
    data: Box<[u8]>,
}

impl HeapPageSource {
    /// Allocate a zeroed region of `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
        }
    }
}

impl PageSource for HeapPageSource {
    fn capacity(&self) -> usize {
        self.data.len()
    }

    fn bytes(&self) -> &[u8] {
        &self.data
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// File-backed page source using mmap.
///
/// The file is created (or truncated) and sized to the declared capacity up
/// front. Writes are flushed according to the configured [`SyncMode`].
pub struct MappedPageSource {
    path: PathBuf,
    file: File,
    mmap: MmapMut,
    sync_mode: SyncMode,
}

impl MappedPageSource {
    /// Create a new mapped region of `capacity` bytes at `path`.
    pub fn create(path: impl AsRef<Path>, capacity: usize, sync_mode: SyncMode) -> io::Result<Self> {
        if capacity == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "mapped page source capacity must be non-zero",
            ));
        }

        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.set_len(capacity as u64)?;

        // SAFETY: the file was just created and truncated by us and stays
        // open for the lifetime of the mapping.
        let mmap = unsafe { MmapOptions::new().len(capacity).map_mut(&file)? };

        Ok(Self {
            path,
            file,
            mmap,
            sync_mode,
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Synchronization mode.
    pub fn sync_mode(&self) -> SyncMode {
        self.sync_mode
    }
}

impl PageSource for MappedPageSource {
    fn capacity(&self) -> usize {
        self.mmap.len()
    }

    fn bytes(&self) -> &[u8] {
        &self.mmap
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.mmap
    }

    fn written(&self, offset: usize, len: usize) -> io::Result<()> {
        if len == 0 {
            return Ok(());
        }
        match self.sync_mode {
            SyncMode::Sync => self.mmap.flush_range(offset, len),
            SyncMode::Async => self.mmap.flush_async_range(offset, len),
            SyncMode::None => Ok(()),
        }
    }

    fn flush(&self) -> io::Result<()> {
        self.mmap.flush()
    }

    fn close(self) -> io::Result<()> {
        self.mmap.flush()?;
        drop(self.mmap);
        self.file.sync_all()
    }
}

/// Heap pages whose write hook can be made to fail.
#[cfg(test)]
pub(crate) struct FailingPageSource {
    pages: HeapPageSource,
    fail: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

#[cfg(test)]
impl FailingPageSource {
    /// Returns the pages and the switch that makes `written` fail.
    pub(crate) fn new(capacity: usize) -> (Self, std::sync::Arc<std::sync::atomic::AtomicBool>) {
        let fail = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let pages = Self {
            pages: HeapPageSource::new(capacity),
            fail: fail.clone(),
        };
        (pages, fail)
    }
}

#[cfg(test)]
impl PageSource for FailingPageSource {
    fn capacity(&self) -> usize {
        self.pages.capacity()
    }

    fn bytes(&self) -> &[u8] {
        self.pages.bytes()
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        self.pages.bytes_mut()
    }

    fn written(&self, _offset: usize, _len: usize) -> io::Result<()> {
        if self.fail.load(std::sync::atomic::Ordering::Relaxed) {
            return Err(io::Error::other("injected write failure"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_heap_page_source() {
        let mut pages = HeapPageSource::new(4096);
        assert_eq!(pages.capacity(), 4096);
        pages.bytes_mut()[10] = 7;
        assert_eq!(pages.bytes()[10], 7);
        assert!(pages.written(0, 4096).is_ok());
        assert!(pages.close().is_ok());
    }

    #[test]
    fn test_mapped_page_source_persists_writes() {
        let dir = tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("nested").join("pages.dat");

        let mut pages =
            MappedPageSource::create(&path, 8192, SyncMode::Sync).expect("create failed");
        assert_eq!(pages.capacity(), 8192);
        assert_eq!(pages.path(), path.as_path());

        pages.bytes_mut()[..5].copy_from_slice(b"hello");
        pages.written(0, 5).expect("flush range failed");
        pages.close().expect("close failed");

        let contents = std::fs::read(&path).expect("read failed");
        assert_eq!(contents.len(), 8192);
        assert_eq!(&contents[..5], b"hello");
    }

    #[test]
    fn test_mapped_page_source_rejects_zero_capacity() {
        let dir = tempdir().expect("Failed to create temp dir");
        let result = MappedPageSource::create(dir.path().join("empty.dat"), 0, SyncMode::None);
        assert!(result.is_err());
    }
}
