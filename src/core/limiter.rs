//! Token bucket used by the rate limiter and retry behaviors, built atop `governor`.
//!
//! A bucket is immutable once built: changing limit or burst means building a new
//! bucket and publishing it in a new controller generation, so a request holding the
//! previous generation keeps draining the bucket it started with.
use std::{fmt, num::NonZeroU32, sync::Arc, time::Duration};

use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};

pub type DirectRateLimiterImpl = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Burst used when a limiter is built without configuration.
pub const DEFAULT_BURST: u32 = 1;

/// Value reported in access records for an infinite limit.
pub const RATE_LIMIT_INF_VALUE: f64 = 99999.0;

#[derive(Clone)]
enum Gate {
    /// Infinite limit, every call is admitted.
    Open,
    /// Zero burst or zero rate, nothing is admitted.
    Closed,
    Governed(Arc<DirectRateLimiterImpl>),
}

/// Token bucket admitting up to `burst` immediate calls and refilling at `limit`
/// tokens per second. Cloning shares the underlying bucket.
#[derive(Clone)]
pub struct TokenBucket {
    limit: f64,
    burst: u32,
    gate: Gate,
}

impl TokenBucket {
    pub fn new(limit: f64, burst: u32) -> Self {
        let gate = if limit == f64::INFINITY {
            Gate::Open
        } else {
            match (NonZeroU32::new(burst), Self::period(limit)) {
                (Some(burst), Some(period)) => match Quota::with_period(period) {
                    Some(quota) => Gate::Governed(Arc::new(RateLimiter::direct(
                        quota.allow_burst(burst),
                    ))),
                    // Sub-nanosecond replenish interval.
                    None => Gate::Open,
                },
                _ => Gate::Closed,
            }
        };
        Self { limit, burst, gate }
    }

    /// Bucket with an infinite limit and the default burst.
    pub fn unlimited() -> Self {
        Self::new(f64::INFINITY, DEFAULT_BURST)
    }

    fn period(limit: f64) -> Option<Duration> {
        if !(limit > 0.0) {
            return None;
        }
        Duration::try_from_secs_f64(1.0 / limit).ok()
    }

    /// Take one token if available.
    pub fn allow(&self) -> bool {
        match &self.gate {
            Gate::Open => true,
            Gate::Closed => false,
            Gate::Governed(limiter) => limiter.check().is_ok(),
        }
    }

    pub fn limit(&self) -> f64 {
        self.limit
    }

    pub fn burst(&self) -> u32 {
        self.burst
    }

    pub fn is_unlimited(&self) -> bool {
        matches!(self.gate, Gate::Open)
    }

    /// Limit as reported in access records.
    pub fn reported_limit(&self) -> f64 {
        if self.limit.is_infinite() {
            RATE_LIMIT_INF_VALUE
        } else {
            self.limit
        }
    }
}

impl fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let gate = match self.gate {
            Gate::Open => "open",
            Gate::Closed => "closed",
            Gate::Governed(_) => "governed",
        };
        f.debug_struct("TokenBucket")
            .field("limit", &self.limit)
            .field("burst", &self.burst)
            .field("gate", &gate)
            .finish()
    }
}
