//! Per-policy deletion rate limiting.
//!
//! Each policy owns one token bucket keyed by its uid, with
//! `burst = tokensPerSecond` (one second of capacity). Buckets survive policy
//! mutation: a rate change on an existing entry swaps the underlying bucket
//! without dropping the pool entry, so gauges and ownership stay stable.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use tracing::debug;

use crate::config::DEFAULT_MAX_DELETIONS_PER_SECOND;
use crate::metrics;

/* ============================= LIMITER ============================= */

/// A hot-reconfigurable token bucket for a single policy.
pub struct PolicyRateLimiter {
    tokens_per_second: AtomicU32,
    bucket: RwLock<Arc<DefaultDirectRateLimiter>>,
}

impl PolicyRateLimiter {
    pub(crate) fn new(tokens_per_second: u32) -> Self {
        let rate = normalize_rate(tokens_per_second);
        Self {
            tokens_per_second: AtomicU32::new(rate),
            bucket: RwLock::new(Arc::new(build_bucket(rate))),
        }
    }

    /// Tokens issued per second; also the burst capacity.
    pub fn tokens_per_second(&self) -> u32 {
        self.tokens_per_second.load(Ordering::Relaxed)
    }

    /// Apply a (possibly changed) rate. No-op when the rate is unchanged, so
    /// accumulated burst capacity is only reset on an actual change.
    pub fn set_rate(&self, tokens_per_second: u32) {
        let rate = normalize_rate(tokens_per_second);
        if self.tokens_per_second.swap(rate, Ordering::Relaxed) != rate {
            debug!(tokens_per_second = rate, "rate_limiter_reconfigured");
            *self.bucket.write().expect("rate limiter lock") = Arc::new(build_bucket(rate));
        }
    }

    /// Block until one token is available. Cancellation is by dropping the
    /// future; this is the only suspension point in the deletion hot path.
    pub async fn acquire(&self) {
        let bucket = self.bucket.read().expect("rate limiter lock").clone();
        bucket.until_ready().await;
    }

    /// Take a token only if one is available right now.
    pub fn try_acquire(&self) -> bool {
        self.bucket
            .read()
            .expect("rate limiter lock")
            .check()
            .is_ok()
    }
}

fn normalize_rate(tokens_per_second: u32) -> u32 {
    if tokens_per_second == 0 {
        DEFAULT_MAX_DELETIONS_PER_SECOND
    } else {
        tokens_per_second
    }
}

fn build_bucket(tokens_per_second: u32) -> DefaultDirectRateLimiter {
    let rate = NonZeroU32::new(tokens_per_second).expect("rate is normalized to non-zero");
    RateLimiter::direct(Quota::per_second(rate))
}

/* ============================= POOL ============================= */

/// All live limiters, keyed by policy uid.
#[derive(Default)]
pub struct RateLimiterPool {
    limiters: RwLock<HashMap<String, Arc<PolicyRateLimiter>>>,
}

impl RateLimiterPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch or create the limiter for a policy. Hits re-apply the requested
    /// rate so spec changes take effect without rebuilding the entry.
    pub fn get_or_create(&self, uid: &str, tokens_per_second: u32) -> Arc<PolicyRateLimiter> {
        {
            let limiters = self.limiters.read().expect("rate limiter pool lock");
            if let Some(limiter) = limiters.get(uid) {
                limiter.set_rate(tokens_per_second);
                return limiter.clone();
            }
        }

        let mut limiters = self.limiters.write().expect("rate limiter pool lock");
        if let Some(limiter) = limiters.get(uid) {
            limiter.set_rate(tokens_per_second);
            return limiter.clone();
        }

        let limiter = Arc::new(PolicyRateLimiter::new(tokens_per_second));
        limiters.insert(uid.to_string(), limiter.clone());
        metrics::RATE_LIMITERS_ACTIVE.set(limiters.len() as i64);
        limiter
    }

    /// Drop a policy's limiter, if present.
    pub fn cleanup(&self, uid: &str) -> bool {
        let mut limiters = self.limiters.write().expect("rate limiter pool lock");
        let removed = limiters.remove(uid).is_some();
        metrics::RATE_LIMITERS_ACTIVE.set(limiters.len() as i64);
        removed
    }

    pub fn len(&self) -> usize {
        self.limiters.read().expect("rate limiter pool lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/* ============================= TESTS ============================= */
