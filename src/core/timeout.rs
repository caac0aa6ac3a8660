use std::{sync::Arc, time::Duration};

use http::StatusCode;

use crate::core::{
    controller::Controller,
    route::{ConfigError, TimeoutConfig},
    signal::{DURATION_KEY, PERCENTAGE_KEY, SignalError, TimeoutSignal},
    store::RouteHandle,
};

/// Deadline applied to a single exchange.
#[derive(Debug, Clone)]
pub struct Timeout {
    handle: RouteHandle,
    config: TimeoutConfig,
}

impl Timeout {
    pub(crate) fn new(handle: RouteHandle, config: TimeoutConfig) -> Self {
        Self { handle, config }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Configured duration, kept while disabled so re-enabling restores it.
    pub fn duration(&self) -> Duration {
        self.config.duration
    }

    /// Deadline to apply, or `None` when disabled or non-positive.
    pub fn deadline(&self) -> Option<Duration> {
        (self.config.enabled && !self.config.duration.is_zero()).then_some(self.config.duration)
    }

    pub fn status_code(&self) -> StatusCode {
        self.config.status_code
    }

    pub fn config(&self) -> &TimeoutConfig {
        &self.config
    }

    /// Duration in milliseconds as reported in access records, `-1` when disabled.
    pub fn timeout_ms(&self) -> i64 {
        match self.deadline() {
            Some(d) => i64::try_from(d.as_millis()).unwrap_or(i64::MAX),
            None => -1,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.config.enabled && self.config.duration.is_zero() {
            return Err(ConfigError::NonPositiveDuration(self.handle.key().to_string()));
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
            ctrl.timeout
                .as_mut()
                .is_some_and(|t| std::mem::replace(&mut t.config.enabled, enabled) != enabled)
        })
    }

    /// Apply a signal as one published change.
    pub fn signal(&self, signal: &TimeoutSignal) -> Result<(), SignalError> {
        let mut outcome = Ok(());
        self.handle.publish(|ctrl| match ctrl.timeout.as_mut() {
            Some(t) => match t.apply(signal) {
                Ok(changed) => changed,
                Err(e) => {
                    outcome = Err(e);
                    false
                }
            },
            None => false,
        });
        outcome
    }

    fn apply(&mut self, signal: &TimeoutSignal) -> Result<bool, SignalError> {
        let mut next = self.config.clone();
        if let Some(enabled) = signal.enabled {
            next.enabled = enabled;
        }
        if let Some(duration) = signal.duration {
            next.duration = duration;
        }
        if let Some(pct) = signal.percentage {
            let factor = u128::try_from(i64::from(pct) + 100).unwrap_or(0);
            let nanos = next.duration.as_nanos().saturating_mul(factor) / 100;
            if nanos == 0 {
                return Err(SignalError::InvalidValue {
                    key: PERCENTAGE_KEY,
                    value: pct.to_string(),
                    reason: "adjusted duration must be > 0".to_string(),
                });
            }
            next.duration = Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX));
        }
        if next.enabled && next.duration.is_zero() {
            return Err(SignalError::InvalidValue {
                key: DURATION_KEY,
                value: "0".to_string(),
                reason: "timeout duration must be > 0".to_string(),
            });
        }
        let changed = next != self.config;
        self.config = next;
        Ok(changed)
    }
}
