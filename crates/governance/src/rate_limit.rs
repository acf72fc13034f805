//! Per-user query rate limiting.

use governor::clock::{Clock, DefaultClock};
use governor::middleware::NoOpMiddleware;
use governor::state::keyed::DashMapStateStore;
use governor::{Quota, RateLimiter};
use phi_query_core::{Error, Result};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};

/// Checks between two sweeps of idle user state.
pub const DEFAULT_CLEANUP_EVERY: u64 = 1024;

type KeyedLimiter<C> =
    RateLimiter<String, DashMapStateStore<String>, C, NoOpMiddleware<<C as Clock>::Instant>>;

/// Two keyed GCRA limiters, one per minute and one per hour, both keyed by user id.
///
/// Every `cleanup_every` checks the limiter drops users whose buckets have
/// fully refilled, so state tracks active users rather than every user seen.
pub struct QueryRateLimiter<C: Clock = DefaultClock> {
    per_minute: KeyedLimiter<C>,
    per_hour: KeyedLimiter<C>,
    checks: AtomicU64,
    cleanup_every: u64,
}

impl QueryRateLimiter {
    pub fn new(max_per_minute: u32, max_per_hour: u32) -> Result<Self> {
        Self::with_clock(max_per_minute, max_per_hour, &DefaultClock::default())
    }
}

impl<C: Clock> QueryRateLimiter<C> {
    pub fn with_clock(max_per_minute: u32, max_per_hour: u32, clock: &C) -> Result<Self> {
        let per_minute = NonZeroU32::new(max_per_minute)
            .ok_or_else(|| Error::configuration("max_queries_per_minute must be positive"))?;
        let per_hour = NonZeroU32::new(max_per_hour)
            .ok_or_else(|| Error::configuration("max_queries_per_hour must be positive"))?;

        Ok(Self {
            per_minute: RateLimiter::dashmap_with_clock(Quota::per_minute(per_minute), clock),
            per_hour: RateLimiter::dashmap_with_clock(Quota::per_hour(per_hour), clock),
            checks: AtomicU64::new(0),
            cleanup_every: DEFAULT_CLEANUP_EVERY,
        })
    }

    /// Sweep idle users every `every` checks. Zero disables the sweep.
    pub fn with_cleanup_every(mut self, every: u64) -> Self {
        self.cleanup_every = every;
        self
    }

    /// Consume one query for `user_id`.
    pub fn check(&self, user_id: &str) -> Result<()> {
        let count = self.checks.fetch_add(1, Ordering::Relaxed) + 1;
        if self.cleanup_every > 0 && count % self.cleanup_every == 0 {
            self.cleanup();
        }

        let key = user_id.to_string();

        if self.per_minute.check_key(&key).is_err() {
            tracing::warn!(user_id = user_id, window = "minute", "Query rate limit exceeded");
            return Err(Error::RateLimited(format!(
                "too many queries per minute for user {}",
                user_id
            )));
        }
        if self.per_hour.check_key(&key).is_err() {
            tracing::warn!(user_id = user_id, window = "hour", "Query rate limit exceeded");
            return Err(Error::RateLimited(format!(
                "too many queries per hour for user {}",
                user_id
            )));
        }
        Ok(())
    }

    /// Drop state for users whose buckets have fully refilled.
    pub fn cleanup(&self) {
        self.per_minute.retain_recent();
        self.per_hour.retain_recent();
        self.per_minute.shrink_to_fit();
        self.per_hour.shrink_to_fit();
        tracing::debug!(tracked_users = self.tracked_users(), "Rate limiter state pruned");
    }

    /// Users currently holding state in either window.
    pub fn tracked_users(&self) -> usize {
        self.per_minute.len().max(self.per_hour.len())
    }
}
