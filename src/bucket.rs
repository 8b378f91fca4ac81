//! Token bucket: per-identity rate state with lock-free refill and consume.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current unix time in whole seconds.
pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// A token bucket replenished linearly in time up to a fixed capacity.
///
/// Capacity is twice the per-second rate, so an idle identity can burst up to
/// two seconds of traffic. All mutation happens through CAS loops; concurrent
/// admitters of the same identity never block each other.
///
/// Invariant: `0 <= tokens <= capacity` at every linearisation point.
pub struct TokenBucket {
    capacity: i64,
    rate: i64,
    tokens: AtomicI64,
    last_refill: AtomicI64,
}

impl TokenBucket {
    /// A full bucket granting `rate` tokens per second.
    pub fn new(rate: i64) -> Self {
        TokenBucket {
            capacity: rate * 2,
            rate,
            tokens: AtomicI64::new(rate * 2),
            last_refill: AtomicI64::new(unix_now()),
        }
    }

    /// Credits tokens for the time elapsed since the last refill.
    ///
    /// Two sequential CASes commit the new token count and the new refill
    /// stamp; failure of either restarts the whole computation so the pair
    /// can never drift apart by more than one interleaving, and the token
    /// count never exceeds capacity.
    pub fn refill(&self) {
        loop {
            let tokens = self.tokens.load(Ordering::Acquire);
            let last_refill = self.last_refill.load(Ordering::Acquire);
            let now = unix_now();
            let delta = now - last_refill;
            let refreshed = (tokens + delta * self.rate).min(self.capacity);
            if self
                .tokens
                .compare_exchange(tokens, refreshed, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                continue;
            }
            if self
                .last_refill
                .compare_exchange(last_refill, now, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                continue;
            }
            return;
        }
    }

    /// Refills, then tries to consume one token.
    ///
    /// Returns `false` without decrementing once the bucket is exhausted.
    pub fn use_token(&self) -> bool {
        self.refill();
        loop {
            let tokens = self.tokens.load(Ordering::Acquire);
            if tokens <= 0 {
                return false;
            }
            if self
                .tokens
                .compare_exchange(tokens, tokens - 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return true;
            }
        }
    }

    /// Whether the bucket has sat unrefilled for longer than `horizon_secs`.
    ///
    /// Deterministic in its inputs; the rate-limiter sweep decides the
    /// horizon.
    pub fn is_stale(&self, now: i64, horizon_secs: i64) -> bool {
        now - self.last_refill.load(Ordering::Acquire) > horizon_secs
    }
}

impl std::fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucket")
            .field("capacity", &self.capacity)
            .field("rate", &self.rate)
            .field("tokens", &self.tokens.load(Ordering::Relaxed))
            .finish()
    }
}
