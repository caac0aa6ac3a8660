//! Route-scoped admission control built atop [`TokenBucket`].
//!
//! The limiter is consulted by callers only while enabled; a disabled limiter admits
//! everything by virtue of the caller skipping it. Limit and burst changes install a fresh
//! bucket in a new controller generation rather than adjusting the running one.
use std::sync::Arc;

use http::StatusCode;

use crate::core::{
    controller::Controller,
    limiter::TokenBucket,
    route::{ConfigError, RateLimiterConfig},
    signal::{Behavior, RateLimitSignal, SignalError},
    store::RouteHandle,
};

#[derive(Debug, Clone)]
pub struct RateLimiter {
    handle: RouteHandle,
    config: RateLimiterConfig,
    bucket: TokenBucket,
}

impl RateLimiter {
    pub(crate) fn new(handle: RouteHandle, config: RateLimiterConfig) -> Self {
        let bucket = TokenBucket::new(config.limit, config.burst);
        Self {
            handle,
            config,
            bucket,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Take one token from the bucket.
    pub fn allow(&self) -> bool {
        self.bucket.allow()
    }

    pub fn status_code(&self) -> StatusCode {
        self.config.status_code
    }

    pub fn limit(&self) -> f64 {
        self.config.limit
    }

    pub fn burst(&self) -> u32 {
        self.config.burst
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// `(limit, burst)` as reported in access records, `(-1, -1)` when disabled.
    pub fn state(&self) -> (f64, i64) {
        if !self.config.enabled {
            return (-1.0, -1);
        }
        (self.bucket.reported_limit(), i64::from(self.config.burst))
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.config.enabled && !(self.config.limit > 0.0) {
            return Err(ConfigError::NonPositiveLimit {
                route: self.handle.key().to_string(),
                behavior: Behavior::RateLimit,
            });
        }
        Ok(())
    }

    pub fn enable(&self) -> Option<Arc<Controller>> {
        self.set_enabled(true)
    }

    pub fn disable(&self) -> Option<Arc<Controller>> {
        self.set_enabled(false)
    }

    fn set_enabled(&self, enabled: bool) -> Option<Arc<Controller>> {
        if self.config.enabled == enabled {
            return None;
        }
        self.handle.publish(|ctrl| {
            ctrl.rate_limiter
                .as_mut()
                .is_some_and(|r| std::mem::replace(&mut r.config.enabled, enabled) != enabled)
        })
    }

    pub fn signal(&self, signal: &RateLimitSignal) -> Result<(), SignalError> {
        self.handle.publish(|ctrl| {
            ctrl.rate_limiter
                .as_mut()
                .is_some_and(|r| r.apply(signal))
        });
        Ok(())
    }

    fn apply(&mut self, signal: &RateLimitSignal) -> bool {
        let mut changed = false;
        if let Some(enabled) = signal.enabled {
            changed |= std::mem::replace(&mut self.config.enabled, enabled) != enabled;
        }
        let limit = signal.limit.unwrap_or(self.config.limit);
        let burst = signal.burst.unwrap_or(self.config.burst);
        if limit != self.config.limit || burst != self.config.burst {
            self.config.limit = limit;
            self.config.burst = burst;
            self.bucket = TokenBucket::new(limit, burst);
            changed = true;
        }
        changed
    }
}
