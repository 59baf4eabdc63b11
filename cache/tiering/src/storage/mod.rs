//! Byte storage underneath segments.
//!
//! A [`StorageEngine`] stores encoded keys and values with their metadata
//! word inside a [`PageSource`]. Segments never touch the bytes directly.

mod engine;
mod page;

pub use engine::{HEADER_SIZE, PagedStorageEngine, RawEntry, SlotId, StorageEngine, record_size};
pub use page::{HeapPageSource, MappedPageSource, PageSource};

#[cfg(test)]
pub(crate) use page::FailingPageSource;
