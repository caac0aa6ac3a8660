//! Declarative route descriptors consumed once by controller construction.
use std::{fmt, str::FromStr, sync::Arc, time::Duration};

use http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::core::{
    limiter::DEFAULT_BURST,
    signal::{Actuator, Behavior, SignalError},
};

/// Reserved name of the ingress host controller.
pub const HOST_CONTROLLER_NAME: &str = "host";
/// Reserved name of a table's default (fallback) controller.
pub const DEFAULT_CONTROLLER_NAME: &str = "*";
/// Reserved name of the nil controller returned when a matcher suppresses a lookup.
pub const NIL_CONTROLLER_NAME: &str = "!";

/// Traffic direction a table, route or record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Traffic {
    Ingress,
    #[default]
    Egress,
}

impl Traffic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Traffic::Ingress => "ingress",
            Traffic::Egress => "egress",
        }
    }
}

impl fmt::Display for Traffic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Traffic {
    type Err = SignalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ingress" => Ok(Traffic::Ingress),
            "egress" => Ok(Traffic::Egress),
            other => Err(SignalError::InvalidTraffic(other.to_string())),
        }
    }
}

/// Errors raised while validating a route for registration.
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("invalid configuration: route name is empty")]
    EmptyName,

    #[error("invalid configuration: route name is a duplicate [{0}]")]
    DuplicateName(String),

    #[error("invalid configuration: route name is reserved [{0}]")]
    ReservedName(String),

    #[error("invalid configuration: {behavior} is not valid for ingress route [{route}]")]
    IngressBehavior { route: String, behavior: Behavior },

    #[error("invalid configuration: host controller is not valid for egress traffic")]
    HostOnEgress,

    #[error("invalid configuration: timeout duration is <= 0 [{0}]")]
    NonPositiveDuration(String),

    #[error("invalid configuration: {behavior} limit is <= 0 [{route}]")]
    NonPositiveLimit { route: String, behavior: Behavior },

    #[error("invalid configuration: retry limit is < 0 [{0}]")]
    NegativeRetryLimit(String),

    #[error("invalid configuration: retry status codes are empty [{0}]")]
    EmptyRetryCodes(String),

    #[error("invalid configuration: proxy pattern is empty [{0}]")]
    EmptyProxyPattern(String),

    #[error("invalid configuration: proxy pattern [{pattern}] is invalid: {reason} [{route}]")]
    InvalidProxyPattern {
        route: String,
        pattern: String,
        reason: String,
    },

    #[error("invalid configuration: failover invoke function is missing [{0}]")]
    MissingFailoverInvoke(String),
}

/// Map a configured status code to a valid one, substituting `default` for zero or
/// out-of-range values.
pub fn normalize_status(code: u16, default: StatusCode) -> StatusCode {
    if code == 0 {
        return default;
    }
    StatusCode::from_u16(code).unwrap_or(default)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutConfig {
    pub enabled: bool,
    pub status_code: StatusCode,
    pub duration: Duration,
}

impl TimeoutConfig {
    pub fn new(enabled: bool, status_code: u16, duration: Duration) -> Self {
        Self {
            enabled,
            status_code: normalize_status(status_code, StatusCode::GATEWAY_TIMEOUT),
            duration,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RateLimiterConfig {
    pub enabled: bool,
    pub status_code: StatusCode,
    /// Tokens per second; `f64::INFINITY` disables limiting.
    pub limit: f64,
    pub burst: u32,
}

impl RateLimiterConfig {
    pub fn new(enabled: bool, status_code: u16, limit: f64, burst: u32) -> Self {
        Self {
            enabled,
            status_code: normalize_status(status_code, StatusCode::TOO_MANY_REQUESTS),
            limit,
            burst,
        }
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self::new(false, 0, f64::INFINITY, DEFAULT_BURST)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub enabled: bool,
    /// Retries admitted per second.
    pub limit: f64,
    pub burst: u32,
    /// Base backoff before a retry; jitter is added on top.
    pub wait: Duration,
    pub status_codes: Vec<u16>,
}

impl RetryConfig {
    pub fn new(enabled: bool, limit: f64, burst: u32, wait: Duration, status_codes: Vec<u16>) -> Self {
        Self {
            enabled,
            limit,
            burst,
            wait,
            status_codes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Clone, Default)]
pub struct ProxyConfig {
    pub enabled: bool,
    pub pattern: String,
    pub headers: Vec<Header>,
    /// Receives pattern changes so a dependent subsystem stays in sync.
    pub action: Option<Arc<dyn Actuator>>,
}

impl ProxyConfig {
    pub fn new(enabled: bool, pattern: impl Into<String>, headers: Vec<Header>) -> Self {
        Self {
            enabled,
            pattern: pattern.into(),
            headers,
            action: None,
        }
    }

    pub fn with_action(mut self, action: Arc<dyn Actuator>) -> Self {
        self.action = Some(action);
        self
    }
}

impl fmt::Debug for ProxyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyConfig")
            .field("enabled", &self.enabled)
            .field("pattern", &self.pattern)
            .field("headers", &self.headers)
            .field("action", &self.action.is_some())
            .finish()
    }
}

/// Callback notified with `(route name, failover)` on every invocation.
pub type FailoverInvoke = Arc<dyn Fn(&str, bool) + Send + Sync>;

#[derive(Clone, Default)]
pub struct FailoverConfig {
    pub enabled: bool,
    pub invoke: Option<FailoverInvoke>,
}

impl FailoverConfig {
    pub fn new(enabled: bool, invoke: Option<FailoverInvoke>) -> Self {
        Self { enabled, invoke }
    }
}

impl fmt::Debug for FailoverConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailoverConfig")
            .field("enabled", &self.enabled)
            .field("invoke", &self.invoke.is_some())
            .finish()
    }
}

/// A named route and the behaviors attached to it.
#[derive(Debug, Clone, Default)]
pub struct Route {
    pub name: String,
    pub traffic: Traffic,
    pub ping: bool,
    pub protocol: Option<String>,
    pub timeout: Option<TimeoutConfig>,
    pub rate_limiter: Option<RateLimiterConfig>,
    pub retry: Option<RetryConfig>,
    pub proxy: Option<ProxyConfig>,
    pub failover: Option<FailoverConfig>,
}

impl Route {
    pub fn new(name: impl Into<String>, traffic: Traffic) -> Self {
        Self {
            name: name.into(),
            traffic,
            ..Default::default()
        }
    }

    pub fn egress(name: impl Into<String>) -> Self {
        Self::new(name, Traffic::Egress)
    }

    pub fn ingress(name: impl Into<String>) -> Self {
        Self::new(name, Traffic::Ingress)
    }

    pub fn ping(mut self, ping: bool) -> Self {
        self.ping = ping;
        self
    }

    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    pub fn timeout(mut self, config: TimeoutConfig) -> Self {
        self.timeout = Some(config);
        self
    }

    pub fn rate_limiter(mut self, config: RateLimiterConfig) -> Self {
        self.rate_limiter = Some(config);
        self
    }

    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.retry = Some(config);
        self
    }

    pub fn proxy(mut self, config: ProxyConfig) -> Self {
        self.proxy = Some(config);
        self
    }

    pub fn failover(mut self, config: FailoverConfig) -> Self {
        self.failover = Some(config);
        self
    }

    /// True when at least one behavior is attached.
    pub fn is_configured(&self) -> bool {
        self.timeout.is_some()
            || self.rate_limiter.is_some()
            || self.retry.is_some()
            || self.proxy.is_some()
            || self.failover.is_some()
    }
}
