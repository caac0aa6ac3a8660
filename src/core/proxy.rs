use std::sync::Arc;

use http::Uri;

use crate::core::{
    controller::Controller,
    route::{ConfigError, Header, ProxyConfig},
    signal::{Actuator, ENABLED_KEY, PATTERN_KEY, ProxySignal, SignalError, SignalParams},
    store::RouteHandle,
    uri::UriParts,
};

/// URL rewriting redirect.
///
/// The configured pattern is a URI template whose present parts override the request URI:
/// `http:` swaps only the scheme, `http://host` also the authority, and a full URL replaces
/// everything.
#[derive(Debug, Clone)]
pub struct Proxy {
    handle: RouteHandle,
    config: ProxyConfig,
}

impl Proxy {
    pub(crate) fn new(handle: RouteHandle, config: ProxyConfig) -> Self {
        Self { handle, config }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn pattern(&self) -> &str {
        &self.config.pattern
    }

    pub fn headers(&self) -> &[Header] {
        &self.config.headers
    }

    pub fn action(&self) -> Option<&Arc<dyn Actuator>> {
        self.config.action.as_ref()
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if !self.config.enabled {
            return Ok(());
        }
        validate_pattern(self.handle.key(), &self.config.pattern)
    }

    /// Merge the pattern into `uri`. Returns `uri` unchanged when there is no pattern or the
    /// merged result is not a valid URI.
    pub fn build_url(&self, uri: &Uri) -> Uri {
        if self.config.pattern.is_empty() {
            return uri.clone();
        }
        let Ok(pattern) = UriParts::split(&self.config.pattern) else {
            return uri.clone();
        };

        let mut merged = format!("{}://", pattern.scheme);
        if pattern.authority.is_empty() {
            if let Some(authority) = uri.authority() {
                merged.push_str(authority.as_str());
            }
        } else {
            merged.push_str(pattern.authority);
        }
        if pattern.path.is_empty() {
            merged.push_str(uri.path());
        } else {
            merged.push_str(pattern.path);
        }
        if !pattern.query.is_empty() {
            merged.push('?');
            merged.push_str(pattern.query);
        } else if let Some(query) = uri.query().filter(|q| !q.is_empty()) {
            merged.push('?');
            merged.push_str(query);
        }

        merged.parse().unwrap_or_else(|_| uri.clone())
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
            ctrl.proxy
                .as_mut()
                .is_some_and(|p| std::mem::replace(&mut p.config.enabled, enabled) != enabled)
        })
    }

    /// Attach or replace the delegate notified of pattern changes.
    pub fn set_action(&self, action: Arc<dyn Actuator>) -> Option<Arc<Controller>> {
        self.handle.publish(|ctrl| match ctrl.proxy.as_mut() {
            Some(p) => {
                p.config.action = Some(action);
                true
            }
            None => false,
        })
    }

    /// Apply a signal. A pattern change is published locally and then forwarded to the action
    /// delegate; a delegate failure is returned but the local change stands.
    pub fn signal(&self, signal: &ProxySignal) -> Result<(), SignalError> {
        if let Some(pattern) = &signal.pattern {
            validate_pattern(self.handle.key(), pattern).map_err(|e| {
                SignalError::InvalidValue {
                    key: PATTERN_KEY,
                    value: pattern.clone(),
                    reason: e.to_string(),
                }
            })?;
        }

        let mut forward = None;
        let mut outcome = Ok(());
        self.handle.publish(|ctrl| {
            let Some(p) = ctrl.proxy.as_mut() else {
                return false;
            };
            let enabled = signal.enabled.unwrap_or(p.config.enabled);
            // An enabled proxy always carries a usable pattern.
            if enabled && signal.pattern.is_none() {
                if let Err(e) = validate_pattern(self.handle.key(), &p.config.pattern) {
                    outcome = Err(SignalError::InvalidValue {
                        key: ENABLED_KEY,
                        value: enabled.to_string(),
                        reason: e.to_string(),
                    });
                    return false;
                }
            }
            let mut changed = std::mem::replace(&mut p.config.enabled, enabled) != enabled;
            if let Some(pattern) = signal.pattern.as_ref().filter(|v| **v != p.config.pattern) {
                p.config.pattern = pattern.clone();
                forward = p.config.action.clone().map(|action| (action, pattern.clone()));
                changed = true;
            }
            changed
        });
        outcome?;

        // The delegate runs outside the store's write section.
        match forward {
            Some((action, pattern)) => action.signal(&SignalParams::new().with(PATTERN_KEY, pattern)),
            None => Ok(()),
        }
    }
}

fn validate_pattern(route: &str, pattern: &str) -> Result<(), ConfigError> {
    if pattern.is_empty() {
        return Err(ConfigError::EmptyProxyPattern(route.to_string()));
    }
    UriParts::split(pattern)
        .map(|_| ())
        .map_err(|e| ConfigError::InvalidProxyPattern {
            route: route.to_string(),
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })
}
