//! Byte-level key/value storage over a page source.
//!
//! # Record Layout
//!
//! ```text
//! +----------------+
//! |    metadata    |  4 bytes - flag word (engine + segment bits)
//! +----------------+
//! |   expire_at    |  4 bytes - seconds since epoch (or 0 for no expiry)
//! +----------------+
//! |    key_len     |  4 bytes
//! +----------------+
//! |   value_len    |  4 bytes
//! +----------------+
//! |      key       |  key_len bytes
//! +----------------+
//! |     value      |  value_len bytes
//! +----------------+
//! |    padding     |  to 8-byte alignment
//! +----------------+
//! ```
//!
//! Records are placed first-fit into freed extents, falling back to a bump
//! pointer. Removing a record only frees its extent; [`StorageEngine::shrink`]
//! compacts live records to the front of the region.

use crate::error::{TierError, TierResult};
use crate::metadata::{self, PRESENT};
use crate::storage::page::PageSource;
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use std::collections::HashMap;

/// Size of the fixed record header.
pub const HEADER_SIZE: usize = 16;

const ALIGN: usize = 8;

/// Calculate the on-page size of a record with the given key and value lengths.
#[inline]
pub fn record_size(key_len: usize, value_len: usize) -> usize {
    (HEADER_SIZE + key_len + value_len).next_multiple_of(ALIGN)
}

/// Opaque handle naming one stored record.
///
/// Handles are only meaningful to the engine that issued them and may be
/// reused after the record is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(u32);

impl SlotId {
    /// Raw slot index.
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

/// A borrowed view of one stored record.
#[derive(Debug, Clone, Copy)]
pub struct RawEntry<'a> {
    /// Encoded key.
    pub key: &'a [u8],
    /// Encoded value.
    pub value: &'a [u8],
    /// Metadata flag word.
    pub metadata: u32,
    /// Expiration (seconds since epoch, 0 = never).
    pub expire_at: u32,
}

/// Byte-level key/value storage.
///
/// Implementations are not internally synchronized; callers serialize access.
pub trait StorageEngine: Send {
    /// Storage budget in bytes.
    fn capacity(&self) -> usize;

    /// Bytes occupied by live records.
    fn used(&self) -> usize;

    /// Number of live records.
    fn len(&self) -> usize;

    /// True if there are no live records.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Find the slot holding `key`.
    fn lookup(&self, key: &[u8]) -> Option<SlotId>;

    /// Store a record, replacing any existing record for the same key.
    ///
    /// Returns [`TierError::OutOfMemory`] if no space is available and
    /// [`TierError::EntryTooLarge`] if the record can never fit.
    /// On either error any existing record for the key is left untouched.
    fn allocate(
        &mut self,
        key: &[u8],
        value: &[u8],
        metadata: u32,
        expire_at: u32,
    ) -> TierResult<SlotId>;

    /// Read the record in `slot`.
    fn read(&self, slot: SlotId) -> Option<RawEntry<'_>>;

    /// Replace the `mask` bits of a record's metadata with `bits`.
    ///
    /// Returns the new metadata word, or `None` if the slot is empty.
    fn update_metadata(&mut self, slot: SlotId, mask: u32, bits: u32) -> TierResult<Option<u32>>;

    /// Remove the record in `slot`. Returns false if the slot was empty.
    ///
    /// The record is gone even when making the removal durable fails; that
    /// error is returned afterwards.
    fn remove(&mut self, slot: SlotId) -> TierResult<bool>;

    /// Name one live record whose metadata satisfies `eligible`.
    fn sample(&mut self, eligible: &dyn Fn(u32) -> bool) -> Option<SlotId>;

    /// All live slots.
    fn slots(&self) -> Vec<SlotId>;

    /// Compact live records and release freed space.
    fn shrink(&mut self) -> TierResult<()>;

    /// Remove every record.
    fn clear(&mut self);

    /// Make all stored records durable.
    fn flush(&self) -> TierResult<()>;

    /// Release all resources held by the engine.
    fn destroy(self) -> TierResult<()>
    where
        Self: Sized;
}

#[derive(Debug, Clone, Copy)]
struct Extent {
    offset: usize,
    len: usize,
}

/// [`StorageEngine`] storing records in a [`PageSource`].
pub struct PagedStorageEngine<P> {
    pages: P,
    max_size: usize,
    index: HashMap<Box<[u8]>, SlotId, ahash::RandomState>,
    slots: Vec<Option<Extent>>,
    free_slots: Vec<u32>,
    free_extents: Vec<Extent>,
    tail: usize,
    live_bytes: usize,
    rng: Xoshiro256PlusPlus,
}

impl<P: PageSource> PagedStorageEngine<P> {
    /// Create an engine using at most `max_size` bytes of `pages`.
    pub fn new(pages: P, max_size: usize) -> TierResult<Self> {
        Self::with_seed(pages, max_size, rand::rng().random::<u64>())
    }

    /// Create an engine with a fixed sampling seed.
    pub fn with_seed(pages: P, max_size: usize, seed: u64) -> TierResult<Self> {
        if max_size > pages.capacity() {
            return Err(TierError::InvalidConfig(format!(
                "storage budget ({}) exceeds page source capacity ({})",
                max_size,
                pages.capacity()
            )));
        }
        if max_size < record_size(0, 0) {
            return Err(TierError::InvalidConfig(format!(
                "storage budget ({}) is smaller than a record header",
                max_size
            )));
        }

        Ok(Self {
            pages,
            max_size,
            index: HashMap::with_hasher(ahash::RandomState::new()),
            slots: Vec::new(),
            free_slots: Vec::new(),
            free_extents: Vec::new(),
            tail: 0,
            live_bytes: 0,
            rng: Xoshiro256PlusPlus::seed_from_u64(seed),
        })
    }

    /// The underlying page source.
    pub fn pages(&self) -> &P {
        &self.pages
    }

    /// Offset one past the highest byte ever allocated since the last compaction.
    pub fn high_water_mark(&self) -> usize {
        self.tail
    }

    fn extent(&self, slot: SlotId) -> Option<Extent> {
        self.slots.get(slot.0 as usize).copied().flatten()
    }

    fn reserve_extent(&mut self, len: usize) -> Option<Extent> {
        if let Some(pos) = self.free_extents.iter().position(|e| e.len >= len) {
            let mut extent = self.free_extents.swap_remove(pos);
            let remainder = extent.len - len;
            if remainder >= record_size(0, 0) {
                self.free_extents.push(Extent {
                    offset: extent.offset + len,
                    len: remainder,
                });
                extent.len = len;
            }
            return Some(extent);
        }

        if self.tail + len <= self.max_size {
            let extent = Extent {
                offset: self.tail,
                len,
            };
            self.tail += len;
            return Some(extent);
        }

        None
    }

    fn release_extent(&mut self, extent: Extent) {
        if extent.offset + extent.len == self.tail {
            self.tail = extent.offset;
            // Pull the bump pointer back over any free extents now at the end.
            while let Some(pos) = self
                .free_extents
                .iter()
                .position(|e| e.offset + e.len == self.tail)
            {
                self.tail = self.free_extents.swap_remove(pos).offset;
            }
        } else {
            self.free_extents.push(extent);
        }
    }

    /// Returns true if a `len` byte record fits once `old` is released,
    /// given that no free extent or tail space fits it now.
    fn fits_after_release(&self, old: Extent, len: usize) -> bool {
        if old.len >= len {
            return true;
        }
        let mut tail = self.tail;
        if old.offset + old.len == tail {
            tail = old.offset;
            while let Some(free) = self.free_extents.iter().find(|e| e.offset + e.len == tail) {
                tail = free.offset;
            }
        }
        tail + len <= self.max_size
    }

    /// Drop the record in `slot` from the index and release its space.
    ///
    /// The cleared header is not yet durable.
    fn unlink(&mut self, slot: SlotId) -> Option<Extent> {
        let extent = self.extent(slot)?;
        let key: Box<[u8]> = self.read(slot)?.key.into();
        self.index.remove(&key);

        // Clear the header so a stale record is never mistaken for a live one.
        self.pages.bytes_mut()[extent.offset..extent.offset + HEADER_SIZE].fill(0);

        self.slots[slot.0 as usize] = None;
        self.free_slots.push(slot.0);
        self.live_bytes -= extent.len;
        self.release_extent(extent);
        Some(extent)
    }

    fn metadata_at(&self, offset: usize) -> u32 {
        read_u32(self.pages.bytes(), offset)
    }
}

impl<P: PageSource> StorageEngine for PagedStorageEngine<P> {
    fn capacity(&self) -> usize {
        self.max_size
    }

    fn used(&self) -> usize {
        self.live_bytes
    }

    fn len(&self) -> usize {
        self.index.len()
    }

    fn lookup(&self, key: &[u8]) -> Option<SlotId> {
        self.index.get(key).copied()
    }

    fn allocate(
        &mut self,
        key: &[u8],
        value: &[u8],
        metadata: u32,
        expire_at: u32,
    ) -> TierResult<SlotId> {
        let len = record_size(key.len(), value.len());
        if len > self.max_size || key.len() > u32::MAX as usize || value.len() > u32::MAX as usize
        {
            return Err(TierError::EntryTooLarge {
                size: len,
                capacity: self.max_size,
            });
        }

        // Place the new record beside the old one when possible. Otherwise
        // reuse the old record's space, but only once it is known to suffice,
        // so a failed overwrite leaves the existing entry in place.
        let existing = self.lookup(key);
        let mut released = None;
        let extent = match self.reserve_extent(len) {
            Some(extent) => extent,
            None => {
                existing
                    .and_then(|slot| self.extent(slot))
                    .filter(|old| self.fits_after_release(*old, len))
                    .ok_or(TierError::OutOfMemory)?;
                released = existing.and_then(|slot| self.unlink(slot));
                self.reserve_extent(len).ok_or(TierError::OutOfMemory)?
            }
        };

        let bytes = self.pages.bytes_mut();
        let base = extent.offset;
        write_u32(bytes, base, metadata | PRESENT);
        write_u32(bytes, base + 4, expire_at);
        write_u32(bytes, base + 8, key.len() as u32);
        write_u32(bytes, base + 12, value.len() as u32);
        let key_start = base + HEADER_SIZE;
        bytes[key_start..key_start + key.len()].copy_from_slice(key);
        let value_start = key_start + key.len();
        bytes[value_start..value_start + value.len()].copy_from_slice(value);

        if released.is_none() {
            released = existing.and_then(|slot| self.unlink(slot));
        }

        let slot = match self.free_slots.pop() {
            Some(idx) => {
                self.slots[idx as usize] = Some(extent);
                SlotId(idx)
            }
            None => {
                self.slots.push(Some(extent));
                SlotId((self.slots.len() - 1) as u32)
            }
        };
        self.index.insert(key.into(), slot);
        self.live_bytes += extent.len;

        // Bookkeeping is committed; durability failures surface after it.
        if let Some(old) = released
            && old.offset != extent.offset
        {
            self.pages.written(old.offset, HEADER_SIZE)?;
        }
        self.pages.written(extent.offset, extent.len)?;
        Ok(slot)
    }

    fn read(&self, slot: SlotId) -> Option<RawEntry<'_>> {
        let extent = self.extent(slot)?;
        let bytes = self.pages.bytes();
        let base = extent.offset;
        let key_len = read_u32(bytes, base + 8) as usize;
        let value_len = read_u32(bytes, base + 12) as usize;
        let key_start = base + HEADER_SIZE;
        let value_start = key_start + key_len;
        Some(RawEntry {
            key: &bytes[key_start..value_start],
            value: &bytes[value_start..value_start + value_len],
            metadata: read_u32(bytes, base),
            expire_at: read_u32(bytes, base + 4),
        })
    }

    fn update_metadata(&mut self, slot: SlotId, mask: u32, bits: u32) -> TierResult<Option<u32>> {
        let Some(extent) = self.extent(slot) else {
            return Ok(None);
        };
        let updated = metadata::merge(self.metadata_at(extent.offset), mask, bits);
        write_u32(self.pages.bytes_mut(), extent.offset, updated);
        self.pages.written(extent.offset, 4)?;
        Ok(Some(updated))
    }

    fn remove(&mut self, slot: SlotId) -> TierResult<bool> {
        match self.unlink(slot) {
            Some(extent) => {
                self.pages.written(extent.offset, HEADER_SIZE)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn sample(&mut self, eligible: &dyn Fn(u32) -> bool) -> Option<SlotId> {
        if self.index.is_empty() {
            return None;
        }

        let n = self.slots.len();
        let start = self.rng.random_range(0..n);
        (0..n)
            .map(|i| (start + i) % n)
            .find(|&idx| {
                self.slots[idx].is_some_and(|extent| eligible(self.metadata_at(extent.offset)))
            })
            .map(|idx| SlotId(idx as u32))
    }

    fn slots(&self) -> Vec<SlotId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, extent)| extent.is_some())
            .map(|(idx, _)| SlotId(idx as u32))
            .collect()
    }

    fn shrink(&mut self) -> TierResult<()> {
        let mut live: Vec<(usize, Extent)> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(idx, extent)| extent.map(|e| (idx, e)))
            .collect();
        live.sort_unstable_by_key(|(_, extent)| extent.offset);

        let mut cursor = 0;
        for (idx, extent) in live {
            if extent.offset != cursor {
                self.pages
                    .bytes_mut()
                    .copy_within(extent.offset..extent.offset + extent.len, cursor);
                self.slots[idx] = Some(Extent {
                    offset: cursor,
                    len: extent.len,
                });
            }
            cursor += extent.len;
        }

        self.free_extents.clear();
        let previous_tail = self.tail;
        self.tail = cursor;
        if previous_tail > cursor {
            self.pages.bytes_mut()[cursor..previous_tail].fill(0);
        }
        self.pages.written(0, previous_tail.max(cursor))?;
        Ok(())
    }

    fn clear(&mut self) {
        self.index.clear();
        self.slots.clear();
        self.free_slots.clear();
        self.free_extents.clear();
        self.tail = 0;
        self.live_bytes = 0;
    }

    fn flush(&self) -> TierResult<()> {
        self.pages.flush()?;
        Ok(())
    }

    fn destroy(self) -> TierResult<()> {
        self.pages.close()?;
        Ok(())
    }
}

#[inline]
fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(raw)
}

#[inline]
fn write_u32(bytes: &mut [u8], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}
