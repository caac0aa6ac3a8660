//! Route file data structures.
//!
//! These types map directly to YAML (also JSON / TOML) route files. Duration-valued fields
//! are literals such as `"500ms"`, `"2s"` or `"1m"`; a bare integer is read as seconds.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    adapters::signal_handler::DEFAULT_SIGNAL_PATH,
    config::validation::{ValidationError, ValidationResult},
    core::{
        duration::parse_duration,
        limiter::DEFAULT_BURST,
        route::{
            DEFAULT_CONTROLLER_NAME, FailoverConfig, FailoverInvoke, Header, ProxyConfig,
            RateLimiterConfig, RetryConfig, Route, TimeoutConfig, Traffic,
        },
    },
};

/// Route file name of the ingress table's default controller.
pub const DEFAULT_INGRESS_NAME: &str = "default-ingress";
/// Route file name of the egress table's default controller.
pub const DEFAULT_EGRESS_NAME: &str = "default-egress";

fn default_listen_addr() -> String {
    "127.0.0.1:8090".to_string()
}

fn default_signal_path() -> String {
    DEFAULT_SIGNAL_PATH.to_string()
}

fn default_true() -> bool {
    true
}

fn default_burst() -> u32 {
    DEFAULT_BURST
}

/// Top-level route file.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ControlConfig {
    /// Address the signal endpoints listen on (`serve` command).
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Base path of the signal endpoints.
    #[serde(default = "default_signal_path")]
    pub signal_path: String,
    /// Resolve unknown route names to the table's default controller.
    #[serde(default = "default_true")]
    pub allow_default_fallback: bool,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            signal_path: default_signal_path(),
            allow_default_fallback: true,
            routes: Vec::new(),
        }
    }
}

impl ControlConfig {
    /// Build every route, collecting all conversion errors.
    pub fn to_routes(
        &self,
        invoke: Option<&FailoverInvoke>,
    ) -> Result<Vec<Route>, Vec<ValidationError>> {
        let mut routes = Vec::with_capacity(self.routes.len());
        let mut errors = Vec::new();
        for config in &self.routes {
            match config.to_route(invoke) {
                Ok(route) => routes.push(route),
                Err(mut e) => errors.append(&mut e),
            }
        }
        if errors.is_empty() {
            Ok(routes)
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RouteConfig {
    pub name: String,
    #[serde(default)]
    pub traffic: Traffic,
    #[serde(default)]
    pub ping: bool,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub timeout: Option<TimeoutSection>,
    #[serde(default)]
    pub rate_limiter: Option<RateLimiterSection>,
    #[serde(default)]
    pub retry: Option<RetrySection>,
    #[serde(default)]
    pub proxy: Option<ProxySection>,
    #[serde(default)]
    pub failover: Option<FailoverSection>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TimeoutSection {
    #[serde(default)]
    pub enabled: bool,
    /// `0` selects the default (504).
    #[serde(default)]
    pub status_code: u16,
    pub duration: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RateLimiterSection {
    #[serde(default)]
    pub enabled: bool,
    /// `0` selects the default (429).
    #[serde(default)]
    pub status_code: u16,
    /// Requests per second; absent means unlimited.
    #[serde(default)]
    pub limit: Option<f64>,
    #[serde(default = "default_burst")]
    pub burst: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RetrySection {
    #[serde(default)]
    pub enabled: bool,
    /// Retries per second; absent means unlimited.
    #[serde(default)]
    pub limit: Option<f64>,
    #[serde(default = "default_burst")]
    pub burst: u32,
    #[serde(default)]
    pub wait: String,
    #[serde(default)]
    pub status_codes: Vec<u16>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProxySection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub pattern: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FailoverSection {
    #[serde(default)]
    pub enabled: bool,
}

impl RouteConfig {
    /// Name the route is registered under: the reserved default names map to `*`.
    pub fn registered_name(&self) -> &str {
        match (self.name.as_str(), self.traffic) {
            (DEFAULT_INGRESS_NAME, Traffic::Ingress) | (DEFAULT_EGRESS_NAME, Traffic::Egress) => {
                DEFAULT_CONTROLLER_NAME
            }
            (name, _) => name,
        }
    }

    fn duration(&self, field: &str, literal: &str) -> ValidationResult<std::time::Duration> {
        parse_duration(literal).map_err(|e| ValidationError::InvalidField {
            field: format!("route '{}' {field}", self.name),
            message: e.to_string(),
        })
    }

    /// Convert to a core [`Route`]. `invoke` is attached to a declared failover section.
    pub fn to_route(
        &self,
        invoke: Option<&FailoverInvoke>,
    ) -> Result<Route, Vec<ValidationError>> {
        let mut errors = Vec::new();
        let mut route = Route::new(self.registered_name(), self.traffic).ping(self.ping);
        if let Some(protocol) = &self.protocol {
            route = route.protocol(protocol.clone());
        }

        if let Some(t) = &self.timeout {
            match self.duration("timeout duration", &t.duration) {
                Ok(duration) => {
                    route = route.timeout(TimeoutConfig::new(t.enabled, t.status_code, duration));
                }
                Err(e) => errors.push(e),
            }
        }

        if let Some(r) = &self.rate_limiter {
            route = route.rate_limiter(RateLimiterConfig::new(
                r.enabled,
                r.status_code,
                r.limit.unwrap_or(f64::INFINITY),
                r.burst,
            ));
        }

        if let Some(r) = &self.retry {
            match self.duration("retry wait", &r.wait) {
                Ok(wait) => {
                    route = route.retry(RetryConfig::new(
                        r.enabled,
                        r.limit.unwrap_or(f64::INFINITY),
                        r.burst,
                        wait,
                        r.status_codes.clone(),
                    ));
                }
                Err(e) => errors.push(e),
            }
        }

        if let Some(p) = &self.proxy {
            let headers = p
                .headers
                .iter()
                .map(|(name, value)| Header::new(name, value))
                .collect();
            route = route.proxy(ProxyConfig::new(p.enabled, p.pattern.clone(), headers));
        }

        if let Some(f) = &self.failover {
            route = route.failover(FailoverConfig::new(f.enabled, invoke.cloned()));
        }

        if errors.is_empty() {
            Ok(route)
        } else {
            Err(errors)
        }
    }
}
