use std::{sync::Arc, time::Duration};

use http::StatusCode;
use rand::Rng;

use crate::core::{
    access::StatusFlag,
    controller::Controller,
    limiter::TokenBucket,
    route::{ConfigError, RetryConfig},
    signal::{RetrySignal, SignalError},
    store::RouteHandle,
};

/// Retries attempted per request beyond the first exchange.
pub const MAX_RETRY_ATTEMPTS: usize = 1;

/// Upper bound, exclusive, of the random jitter added to the retry wait.
const MAX_JITTER_MS: u64 = 1000;

/// Single bounded retry for configured status codes, gated by its own token bucket.
#[derive(Debug, Clone)]
pub struct Retry {
    handle: RouteHandle,
    config: RetryConfig,
    bucket: TokenBucket,
}

impl Retry {
    pub(crate) fn new(handle: RouteHandle, config: RetryConfig) -> Self {
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

    pub fn limit(&self) -> f64 {
        self.config.limit
    }

    pub fn burst(&self) -> u32 {
        self.config.burst
    }

    pub fn wait(&self) -> Duration {
        self.config.wait
    }

    pub fn status_codes(&self) -> &[u16] {
        &self.config.status_codes
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// `(limit, burst)` as reported in access records, `(-1, -1)` when disabled.
    pub fn state(&self) -> (f64, i64) {
        if !self.config.enabled {
            return (-1.0, -1);
        }
        (self.bucket.reported_limit(), i64::from(self.config.burst))
    }

    /// Decide without waiting whether `status` may be retried.
    ///
    /// Only a retryable status takes a token from the retry bucket; a denial is reported
    /// as [`StatusFlag::RetryRateLimited`].
    pub fn check(&self, status: StatusCode) -> (bool, Option<StatusFlag>) {
        if !self.config.enabled || !self.config.status_codes.contains(&status.as_u16()) {
            return (false, None);
        }
        if !self.bucket.allow() {
            return (false, Some(StatusFlag::RetryRateLimited));
        }
        (true, None)
    }

    /// As [`Retry::check`], then sleeps `wait` plus up to one second of jitter before
    /// reporting a retryable outcome.
    pub async fn is_retryable(&self, status: StatusCode) -> (bool, Option<StatusFlag>) {
        let (retry, flag) = self.check(status);
        if retry {
            self.backoff().await;
        }
        (retry, flag)
    }

    /// Sleep `wait` plus up to one second of jitter. No-op when `wait` is zero.
    pub async fn backoff(&self) {
        if self.config.wait.is_zero() {
            return;
        }
        let jitter = Duration::from_millis(rand::rng().random_range(0..MAX_JITTER_MS));
        tokio::time::sleep(self.config.wait + jitter).await;
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        let route = self.handle.key().to_string();
        if self.config.status_codes.is_empty() {
            return Err(ConfigError::EmptyRetryCodes(route));
        }
        if self.config.limit.is_nan() || self.config.limit < 0.0 {
            return Err(ConfigError::NegativeRetryLimit(route));
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
            ctrl.retry
                .as_mut()
                .is_some_and(|r| std::mem::replace(&mut r.config.enabled, enabled) != enabled)
        })
    }

    pub fn signal(&self, signal: &RetrySignal) -> Result<(), SignalError> {
        self.handle
            .publish(|ctrl| ctrl.retry.as_mut().is_some_and(|r| r.apply(signal)));
        Ok(())
    }

    fn apply(&mut self, signal: &RetrySignal) -> bool {
        let mut changed = false;
        if let Some(enabled) = signal.enabled {
            changed |= std::mem::replace(&mut self.config.enabled, enabled) != enabled;
        }
        if let Some(wait) = signal.wait {
            changed |= std::mem::replace(&mut self.config.wait, wait) != wait;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        route::Route,
        store::{ControllerStore, SharedStore},
    };

    fn retry(limit: f64, burst: u32, wait: Duration) -> Retry {
        Retry::new(
            RouteHandle::detached("retry-route"),
            RetryConfig::new(true, limit, burst, wait, vec![503, 504]),
        )
    }

    #[tokio::test]
    async fn test_retryable_codes() {
        let retry = retry(100.0, 10, Duration::ZERO);
        assert_eq!(
            retry.is_retryable(StatusCode::GATEWAY_TIMEOUT).await,
            (true, None)
        );
        assert_eq!(retry.is_retryable(StatusCode::OK).await, (false, None));
    }

    #[tokio::test]
    async fn test_bucket_denial_is_flagged() {
        let retry = retry(1.0, 1, Duration::ZERO);
        assert!(retry.is_retryable(StatusCode::SERVICE_UNAVAILABLE).await.0);
        assert_eq!(
            retry.is_retryable(StatusCode::SERVICE_UNAVAILABLE).await,
            (false, Some(StatusFlag::RetryRateLimited))
        );
    }

    #[test]
    fn test_non_retryable_status_keeps_token() {
        let retry = retry(0.001, 1, Duration::ZERO);
        for _ in 0..3 {
            assert_eq!(retry.check(StatusCode::OK), (false, None));
        }
        assert_eq!(retry.check(StatusCode::SERVICE_UNAVAILABLE), (true, None));
        assert_eq!(
            retry.check(StatusCode::SERVICE_UNAVAILABLE),
            (false, Some(StatusFlag::RetryRateLimited))
        );
        assert_eq!(retry.check(StatusCode::OK), (false, None));
    }

    #[tokio::test]
    async fn test_wait_adds_jitter() {
        let retry = retry(100.0, 10, Duration::from_millis(50));
        let start = std::time::Instant::now();
        assert!(retry.is_retryable(StatusCode::GATEWAY_TIMEOUT).await.0);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_millis(1500));
    }

    #[test]
    fn test_disabled_never_retries() {
        let retry = Retry::new(
            RouteHandle::detached("r"),
            RetryConfig::new(false, 100.0, 10, Duration::ZERO, vec![503]),
        );
        assert_eq!(retry.check(StatusCode::SERVICE_UNAVAILABLE), (false, None));
        assert_eq!(retry.state(), (-1.0, -1));
    }

    #[test]
    fn test_validate() {
        let empty = Retry::new(
            RouteHandle::detached("r"),
            RetryConfig::new(true, 1.0, 1, Duration::ZERO, vec![]),
        );
        assert!(matches!(
            empty.validate(),
            Err(ConfigError::EmptyRetryCodes(_))
        ));
        let negative = Retry::new(
            RouteHandle::detached("r"),
            RetryConfig::new(true, -1.0, 1, Duration::ZERO, vec![503]),
        );
        assert!(matches!(
            negative.validate(),
            Err(ConfigError::NegativeRetryLimit(_))
        ));
    }

    #[test]
    fn test_signal_updates_wait_and_bucket() {
        let store: Arc<dyn ControllerStore> = Arc::new(SharedStore::new());
        let route = Route::egress("retry-route").retry(RetryConfig::new(
            true,
            1.0,
            1,
            Duration::ZERO,
            vec![503],
        ));
        store.insert(Controller::from_route(
            &route,
            RouteHandle::new("retry-route", &store),
        ));
        let ctrl = store.get("retry-route").unwrap();
        let signal = RetrySignal {
            wait: Some(Duration::from_millis(25)),
            burst: Some(4),
            ..Default::default()
        };
        ctrl.retry().unwrap().signal(&signal).unwrap();

        let next = store.get("retry-route").unwrap();
        let next = next.retry().unwrap();
        assert_eq!(next.wait(), Duration::from_millis(25));
        assert_eq!(next.burst(), 4);
        assert_eq!(ctrl.retry().unwrap().burst(), 1);
    }
}
