//! Synchronization primitives with optional loom support.
//!
//! Counters and flags use these atomics so the crate can be model checked
//! with loom while production builds use std atomics directly.

#[cfg(not(feature = "loom"))]
pub use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

#[cfg(feature = "loom")]
pub use loom::sync::atomic::{AtomicBool, AtomicU64, Ordering};
