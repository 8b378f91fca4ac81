#![doc = include_str!("../README.md")]
//!
//! ---
//!
//! # Crate layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`skiplist`] | Lock-free concurrent ordered map (`SkipList`) |
//! | [`bucket`] | Token bucket rate state (`TokenBucket`) |
//! | [`limiter`] | Identity-keyed admission control (`RateLimiter`) |
//! | [`shortener`] | The shortening service core (`Shortener`) |
//! | [`config`] | Public-field configuration structs |
//! | [`error`] | `MapError` and `ShortenerError` |
//!
//! # Guarantees at a glance
//!
//! - Map operations are individually linearisable; no operation blocks
//!   another, and every retry loop makes global progress (lock-free, not
//!   wait-free).
//! - At most one insert of a given key succeeds before a subsequent remove.
//! - Generated identifiers are exactly 8 characters over a 64-symbol
//!   alphabet; the ID space holds 64^8 entries.
//! - The log holds a prefix of committed mutations in linearisation order;
//!   replay reconstructs exactly the logged state.
//! - Compaction preserves the live set and excludes mutators, not readers.

/// Atomic (pointer, mark) pairs: the primitive under the skip list's
/// logical-deletion scheme.
mod markable;

/// Lock-free concurrent ordered map.
///
/// The authoritative index for both the shortener and the rate limiter.
pub mod skiplist;

/// Token bucket rate state.
pub mod bucket;

/// Identity-keyed admission control over the ordered map.
pub mod limiter;

/// The shortening service core: identifier assignment, translation, and the
/// append-only operation log with replay and compaction.
pub mod shortener;

/// Short-identifier alphabet and base-64 positional encoding.
pub mod id;

/// Operation-log line format and file plumbing.
mod oplog;

/// Configuration structures for the shortener and the rate limiter.
pub mod config;

/// Error types.
pub mod error;

pub use bucket::TokenBucket;
pub use config::{RateLimiterConfig, ShortenerConfig, DEFAULT_STALE_AFTER_SECS};
pub use error::{MapError, ShortenerError};
pub use limiter::RateLimiter;
pub use shortener::Shortener;
pub use skiplist::{Iter, SkipList};
