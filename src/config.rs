//! Configuration structures.
//!
//! Config structs have all public fields for simple instantiation: create the
//! struct with the fields set, hand it to the component's constructor. No
//! builders, no boilerplate.
//!
//! # Examples
//!
//! ```no_run
//! use shortener_rs::{Shortener, ShortenerConfig};
//! use std::path::PathBuf;
//!
//! let config = ShortenerConfig {
//!     log_path: PathBuf::from("/var/lib/tinyurl/log"),
//! };
//! let shortener = Shortener::open(config).unwrap();
//! ```

use std::path::PathBuf;

/// Default eviction horizon for rate-limiter buckets, in seconds.
///
/// A bucket whose last refill is older than this is removed by the next
/// [`RateLimiter::compact`](crate::RateLimiter::compact) sweep.
pub const DEFAULT_STALE_AFTER_SECS: i64 = 300;

/// Configuration for a [`Shortener`](crate::Shortener).
#[derive(Debug, Clone)]
pub struct ShortenerConfig {
    /// Path of the append-only operation log. Compaction writes its
    /// replacement into a sibling file named `newlog` in the same directory,
    /// then swaps it over the log.
    pub log_path: PathBuf,
}

impl Default for ShortenerConfig {
    /// Working-directory-relative `log`, matching the on-disk layout the
    /// service has always used.
    fn default() -> Self {
        ShortenerConfig {
            log_path: PathBuf::from("log"),
        }
    }
}

/// Configuration for a [`RateLimiter`](crate::RateLimiter).
///
/// Capacity is always twice the rate, so it is not a separate knob.
#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    /// Tokens granted per second to each identity.
    pub rate: i64,

    /// A bucket is considered stale once `now - last_refill` exceeds this
    /// many seconds; stale buckets are dropped by the compaction sweep.
    pub stale_after_secs: i64,
}

impl RateLimiterConfig {
    /// Config with the given rate and the default eviction horizon.
    pub fn with_rate(rate: i64) -> Self {
        RateLimiterConfig {
            rate,
            stale_after_secs: DEFAULT_STALE_AFTER_SECS,
        }
    }
}
