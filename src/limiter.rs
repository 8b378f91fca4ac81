//! Rate limiter: client identity -> token bucket over the ordered map.

use std::sync::Arc;

use tracing::debug;

use crate::bucket::{unix_now, TokenBucket};
use crate::config::RateLimiterConfig;
use crate::error::MapError;
use crate::skiplist::SkipList;

/// Admission control keyed by client identity.
///
/// Buckets are created lazily on the first decision for a fresh identity and
/// shared between all admitters of that identity. Admission is advisory: any
/// internal failure falls closed and denies the request.
///
/// # Example
///
/// ```
/// use shortener_rs::RateLimiter;
///
/// let limiter = RateLimiter::new(100);
/// assert!(limiter.should_serve("198.51.100.7"));
/// ```
pub struct RateLimiter {
    rate: i64,
    stale_after_secs: i64,
    buckets: SkipList<Arc<TokenBucket>>,
}

impl RateLimiter {
    /// A limiter granting `rate` tokens per second per identity, with the
    /// default eviction horizon.
    pub fn new(rate: i64) -> Self {
        Self::with_config(RateLimiterConfig::with_rate(rate))
    }

    /// A limiter built from an explicit config.
    pub fn with_config(config: RateLimiterConfig) -> Self {
        RateLimiter {
            rate: config.rate,
            stale_after_secs: config.stale_after_secs,
            buckets: SkipList::new(),
        }
    }

    /// Fetches the identity's bucket, creating one on first sight.
    ///
    /// A losing racer on the create path reuses the winner's bucket via a
    /// second lookup.
    fn fetch_bucket(&self, identity: &str) -> Result<Arc<TokenBucket>, MapError> {
        if let Some(bucket) = self.buckets.search(identity) {
            return Ok(bucket);
        }
        let bucket = Arc::new(TokenBucket::new(self.rate));
        match self.buckets.insert(identity.to_string(), Arc::clone(&bucket)) {
            Ok(()) => Ok(bucket),
            Err(MapError::KeyExists) => {
                self.buckets.search(identity).ok_or(MapError::KeyNotFound)
            }
            Err(err) => Err(err),
        }
    }

    /// Decides whether a request from `identity` may proceed.
    ///
    /// Consumes one token from the identity's bucket. Denies when the bucket
    /// is exhausted, and falls closed on any internal error.
    pub fn should_serve(&self, identity: &str) -> bool {
        match self.fetch_bucket(identity) {
            Ok(bucket) => bucket.use_token(),
            Err(_) => false,
        }
    }

    /// Sweeps out identities whose bucket has been idle past the horizon.
    pub fn compact(&self) {
        let now = unix_now();
        let mut evicted = 0usize;
        for (identity, bucket) in self.buckets.iter() {
            if bucket.is_stale(now, self.stale_after_secs)
                && self.buckets.remove(&identity).is_ok()
            {
                evicted += 1;
            }
        }
        debug!(evicted, "rate limiter bucket sweep complete");
    }

    /// Number of identities currently holding a bucket.
    pub fn tracked_identities(&self) -> usize {
        self.buckets.iter().count()
    }
}
