//! Runtime reconfiguration protocol.
//!
//! A signal arrives as a flat key/value set (typically URL query parameters). The
//! `behavior` discriminator is resolved to a [`Behavior`] and the remaining keys are parsed
//! into that behavior's typed signal at the boundary, so malformed values are rejected before
//! any controller state is touched.
use std::{collections::BTreeMap, fmt, str::FromStr, time::Duration};

use crate::core::{
    duration::parse_duration,
    route::Traffic,
    uri::UriParts,
};

pub const BEHAVIOR_KEY: &str = "behavior";
pub const TRAFFIC_KEY: &str = "traffic";
pub const ROUTE_KEY: &str = "route";
pub const ENABLED_KEY: &str = "enabled";
/// Short form of [`ENABLED_KEY`], still accepted.
pub const ENABLE_KEY: &str = "enable";
pub const DURATION_KEY: &str = "duration";
pub const PERCENTAGE_KEY: &str = "percentage";
pub const LIMIT_KEY: &str = "limit";
pub const BURST_KEY: &str = "burst";
pub const WAIT_KEY: &str = "wait";
pub const PATTERN_KEY: &str = "pattern";

/// Largest timeout percentage adjustment a signal may carry.
pub const MAX_PERCENTAGE: i32 = 10_000;

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum SignalError {
    #[error("invalid signal: {behavior} is not configured for route [{route}]")]
    NotConfigured { route: String, behavior: Behavior },

    #[error("invalid signal: behavior is missing")]
    MissingBehavior,

    #[error("invalid signal: behavior [{0}] is not supported")]
    UnsupportedBehavior(String),

    #[error("invalid argument: {key} value [{value}] is invalid: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid signal: route [{route}] not found in {traffic} table")]
    RouteNotFound { route: String, traffic: Traffic },

    #[error("invalid signal: traffic [{0}] is not supported")]
    InvalidTraffic(String),

    #[error("invalid signal: {0} is missing")]
    MissingKey(&'static str),

    #[error("action failed: {0}")]
    Action(String),
}

impl SignalError {
    fn invalid(key: &'static str, value: &str, reason: impl fmt::Display) -> Self {
        SignalError::InvalidValue {
            key,
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Anything that accepts reconfiguration signals.
pub trait Actuator: Send + Sync {
    fn signal(&self, params: &SignalParams) -> Result<(), SignalError>;
}

/// Flat key/value parameter set carrying one signal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignalParams(BTreeMap<String, String>);

impl SignalParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an `application/x-www-form-urlencoded` query string. For repeated keys the first
    /// value wins.
    pub fn from_query(query: &str) -> Self {
        let mut params = BTreeMap::new();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            params
                .entry(key.into_owned())
                .or_insert_with(|| value.into_owned());
        }
        Self(params)
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Value of `enabled` (or `enable`), parsed as `true`/`false`.
    pub fn enabled(&self) -> Result<Option<bool>, SignalError> {
        let Some((key, value)) = self
            .get(ENABLED_KEY)
            .map(|v| (ENABLED_KEY, v))
            .or_else(|| self.get(ENABLE_KEY).map(|v| (ENABLE_KEY, v)))
        else {
            return Ok(None);
        };
        match value.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(Some(true)),
            "false" | "0" => Ok(Some(false)),
            _ => Err(SignalError::invalid(key, value, "expected true or false")),
        }
    }

    fn duration(&self, key: &'static str) -> Result<Option<Duration>, SignalError> {
        let Some(value) = self.get(key) else {
            return Ok(None);
        };
        let duration = parse_duration(value).map_err(|e| SignalError::invalid(key, value, e))?;
        if duration.is_zero() {
            return Err(SignalError::invalid(key, value, "duration must be > 0"));
        }
        Ok(Some(duration))
    }

    fn limit(&self) -> Result<Option<f64>, SignalError> {
        let Some(value) = self.get(LIMIT_KEY) else {
            return Ok(None);
        };
        let limit: f64 = value
            .trim()
            .parse()
            .map_err(|e| SignalError::invalid(LIMIT_KEY, value, e))?;
        if !(limit > 0.0) {
            return Err(SignalError::invalid(LIMIT_KEY, value, "limit must be > 0"));
        }
        Ok(Some(limit))
    }

    fn burst(&self) -> Result<Option<u32>, SignalError> {
        let Some(value) = self.get(BURST_KEY) else {
            return Ok(None);
        };
        let burst: u32 = value
            .trim()
            .parse()
            .map_err(|e| SignalError::invalid(BURST_KEY, value, e))?;
        if burst == 0 {
            return Err(SignalError::invalid(BURST_KEY, value, "burst must be > 0"));
        }
        Ok(Some(burst))
    }

    fn percentage(&self) -> Result<Option<i32>, SignalError> {
        let Some(value) = self.get(PERCENTAGE_KEY) else {
            return Ok(None);
        };
        let pct: i32 = value
            .trim()
            .trim_end_matches('%')
            .parse()
            .map_err(|e| SignalError::invalid(PERCENTAGE_KEY, value, e))?;
        if pct <= -100 || pct > MAX_PERCENTAGE {
            return Err(SignalError::invalid(
                PERCENTAGE_KEY,
                value,
                format!("percentage must be > -100 and <= {MAX_PERCENTAGE}"),
            ));
        }
        Ok(Some(pct))
    }

    fn pattern(&self) -> Result<Option<String>, SignalError> {
        let Some(value) = self.get(PATTERN_KEY) else {
            return Ok(None);
        };
        if value.is_empty() {
            return Err(SignalError::invalid(PATTERN_KEY, value, "pattern is empty"));
        }
        UriParts::split(value).map_err(|e| SignalError::invalid(PATTERN_KEY, value, e))?;
        Ok(Some(value.to_string()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for SignalParams {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Behavior a signal is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Behavior {
    Timeout,
    RateLimit,
    Retry,
    Proxy,
    Failover,
}

impl Behavior {
    pub fn as_str(&self) -> &'static str {
        match self {
            Behavior::Timeout => "timeout",
            Behavior::RateLimit => "rate-limit",
            Behavior::Retry => "retry",
            Behavior::Proxy => "proxy",
            Behavior::Failover => "failover",
        }
    }
}

impl fmt::Display for Behavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Behavior {
    type Err = SignalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "timeout" => Ok(Behavior::Timeout),
            "rate-limit" | "ratelimit" | "rate-limiter" => Ok(Behavior::RateLimit),
            "retry" => Ok(Behavior::Retry),
            "proxy" => Ok(Behavior::Proxy),
            "failover" => Ok(Behavior::Failover),
            "" => Err(SignalError::MissingBehavior),
            other => Err(SignalError::UnsupportedBehavior(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeoutSignal {
    pub enabled: Option<bool>,
    pub duration: Option<Duration>,
    /// Signed adjustment applied to the current duration, in percent.
    pub percentage: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimitSignal {
    pub enabled: Option<bool>,
    pub limit: Option<f64>,
    pub burst: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrySignal {
    pub enabled: Option<bool>,
    pub limit: Option<f64>,
    pub burst: Option<u32>,
    pub wait: Option<Duration>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProxySignal {
    pub enabled: Option<bool>,
    pub pattern: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FailoverSignal {
    pub enabled: Option<bool>,
}

/// A parsed, validated signal for exactly one behavior.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    Timeout(TimeoutSignal),
    RateLimit(RateLimitSignal),
    Retry(RetrySignal),
    Proxy(ProxySignal),
    Failover(FailoverSignal),
}

impl Signal {
    /// Parse the signal addressed by the `behavior` key.
    pub fn parse(params: &SignalParams) -> Result<Self, SignalError> {
        let behavior: Behavior = params
            .get(BEHAVIOR_KEY)
            .ok_or(SignalError::MissingBehavior)?
            .parse()?;
        Self::parse_for(behavior, params)
    }

    /// Parse `params` as a signal for `behavior`, ignoring any `behavior` key.
    pub fn parse_for(behavior: Behavior, params: &SignalParams) -> Result<Self, SignalError> {
        let enabled = params.enabled()?;
        Ok(match behavior {
            Behavior::Timeout => Signal::Timeout(TimeoutSignal {
                enabled,
                duration: params.duration(DURATION_KEY)?,
                percentage: params.percentage()?,
            }),
            Behavior::RateLimit => Signal::RateLimit(RateLimitSignal {
                enabled,
                limit: params.limit()?,
                burst: params.burst()?,
            }),
            Behavior::Retry => Signal::Retry(RetrySignal {
                enabled,
                limit: params.limit()?,
                burst: params.burst()?,
                wait: params.duration(WAIT_KEY)?,
            }),
            Behavior::Proxy => Signal::Proxy(ProxySignal {
                enabled,
                pattern: params.pattern()?,
            }),
            Behavior::Failover => Signal::Failover(FailoverSignal { enabled }),
        })
    }

    pub fn behavior(&self) -> Behavior {
        match self {
            Signal::Timeout(_) => Behavior::Timeout,
            Signal::RateLimit(_) => Behavior::RateLimit,
            Signal::Retry(_) => Behavior::Retry,
            Signal::Proxy(_) => Behavior::Proxy,
            Signal::Failover(_) => Behavior::Failover,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_query_decodes() {
        let params =
            SignalParams::from_query("behavior=proxy&pattern=http%3A%2F%2Flocalhost%3A8081&x=1&x=2");
        assert_eq!(params.get(BEHAVIOR_KEY), Some("proxy"));
        assert_eq!(params.get(PATTERN_KEY), Some("http://localhost:8081"));
        assert_eq!(params.get("x"), Some("1"));
    }

    #[test]
    fn test_parse_timeout_signal() {
        let params = SignalParams::new()
            .with(BEHAVIOR_KEY, "timeout")
            .with(ENABLED_KEY, "false")
            .with(DURATION_KEY, "2s");
        let signal = Signal::parse(&params).unwrap();
        assert_eq!(
            signal,
            Signal::Timeout(TimeoutSignal {
                enabled: Some(false),
                duration: Some(Duration::from_secs(2)),
                percentage: None,
            })
        );
    }

    #[test]
    fn test_enable_alias_is_accepted() {
        let params = SignalParams::new().with(ENABLE_KEY, "true");
        assert_eq!(params.enabled().unwrap(), Some(true));
        let params = SignalParams::new().with(ENABLED_KEY, "yes");
        assert!(matches!(
            params.enabled(),
            Err(SignalError::InvalidValue { key: "enabled", .. })
        ));
    }

    #[test]
    fn test_missing_and_unknown_behavior() {
        assert_eq!(
            Signal::parse(&SignalParams::new()),
            Err(SignalError::MissingBehavior)
        );
        let params = SignalParams::new().with(BEHAVIOR_KEY, "circuit-breaker");
        assert_eq!(
            Signal::parse(&params),
            Err(SignalError::UnsupportedBehavior("circuit-breaker".into()))
        );
    }

    #[test]
    fn test_rejects_non_positive_values() {
        let params = SignalParams::new()
            .with(BEHAVIOR_KEY, "rate-limit")
            .with(LIMIT_KEY, "0");
        assert!(Signal::parse(&params).is_err());

        let params = SignalParams::new()
            .with(BEHAVIOR_KEY, "retry")
            .with(BURST_KEY, "0");
        assert!(Signal::parse(&params).is_err());

        let params = SignalParams::new()
            .with(BEHAVIOR_KEY, "timeout")
            .with(DURATION_KEY, "0ms");
        assert!(Signal::parse(&params).is_err());

        let params = SignalParams::new()
            .with(BEHAVIOR_KEY, "proxy")
            .with(PATTERN_KEY, "");
        assert!(Signal::parse(&params).is_err());
    }

    #[test]
    fn test_percentage_bounds() {
        let params = SignalParams::new()
            .with(BEHAVIOR_KEY, "timeout")
            .with(PERCENTAGE_KEY, &i32::MAX.to_string());
        assert!(matches!(
            Signal::parse(&params),
            Err(SignalError::InvalidValue { key: "percentage", .. })
        ));
        let params = SignalParams::new().with(PERCENTAGE_KEY, "-100");
        assert!(params.percentage().is_err());
        let params = SignalParams::new().with(PERCENTAGE_KEY, "10000%");
        assert_eq!(params.percentage().unwrap(), Some(MAX_PERCENTAGE));
    }

    #[test]
    fn test_parse_retry_signal() {
        let params = SignalParams::new()
            .with(BEHAVIOR_KEY, "retry")
            .with(LIMIT_KEY, "2.5")
            .with(BURST_KEY, "3")
            .with(WAIT_KEY, "50ms");
        let Signal::Retry(retry) = Signal::parse(&params).unwrap() else {
            panic!("expected retry signal");
        };
        assert_eq!(retry.limit, Some(2.5));
        assert_eq!(retry.burst, Some(3));
        assert_eq!(retry.wait, Some(Duration::from_millis(50)));
        assert_eq!(retry.enabled, None);
    }
}
