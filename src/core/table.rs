//! Route tables and the application-owned registry holding one per traffic direction.
//!
//! Every table always holds a host controller and a default controller under reserved keys,
//! plus a detached nil controller returned when a matcher suppresses a lookup. Registered
//! routes live alongside them in a copy-on-write [`ControllerStore`].
use std::{fmt, sync::Arc};

use arc_swap::ArcSwap;
use http::{HeaderMap, Method, Request, Uri, Version, header, request::Parts};
use tracing::{debug, info, warn};

use crate::{
    core::{
        controller::{Controller, REQUEST_ID_HEADER},
        route::{
            ConfigError, DEFAULT_CONTROLLER_NAME, HOST_CONTROLLER_NAME, NIL_CONTROLLER_NAME, Route,
            Traffic,
        },
        signal::{Actuator, SignalError, SignalParams},
        store::{ControllerStore, RouteHandle, SharedStore},
    },
    ports::access_log::AccessLogSink,
};

/// Borrowed view of the parts of a request that matchers and access records need.
#[derive(Debug, Clone, Copy)]
pub struct RequestHead<'a> {
    pub method: &'a Method,
    pub uri: &'a Uri,
    pub version: Version,
    pub headers: &'a HeaderMap,
}

impl<'a> RequestHead<'a> {
    /// Host from the URI, else from the `Host` header.
    pub fn host(&self) -> Option<&'a str> {
        self.uri.host().or_else(|| {
            self.headers
                .get(header::HOST)
                .and_then(|v| v.to_str().ok())
                .map(|h| h.split(':').next().unwrap_or(h))
        })
    }

    pub fn request_id(&self) -> Option<&'a str> {
        self.headers
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
    }
}

impl<'a, B> From<&'a Request<B>> for RequestHead<'a> {
    fn from(req: &'a Request<B>) -> Self {
        Self {
            method: req.method(),
            uri: req.uri(),
            version: req.version(),
            headers: req.headers(),
        }
    }
}

impl<'a> From<&'a Parts> for RequestHead<'a> {
    fn from(parts: &'a Parts) -> Self {
        Self {
            method: &parts.method,
            uri: &parts.uri,
            version: parts.version,
            headers: &parts.headers,
        }
    }
}

/// Outcome of a matcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteMatch {
    /// Use the named route, or the default controller if it is not registered.
    Route(String),
    /// Use the default controller.
    Default,
    /// Use the nil controller; nothing is applied or logged.
    Suppress,
}

pub type HttpMatcher = Arc<dyn Fn(&RequestHead<'_>) -> RouteMatch + Send + Sync>;
pub type UriMatcher = Arc<dyn Fn(&str, &Method) -> RouteMatch + Send + Sync>;

struct Matchers {
    http: HttpMatcher,
    uri: UriMatcher,
}

impl Default for Matchers {
    fn default() -> Self {
        Self {
            http: Arc::new(|_: &RequestHead<'_>| RouteMatch::Default),
            uri: Arc::new(|_: &str, _: &Method| RouteMatch::Default),
        }
    }
}

fn is_reserved(name: &str) -> bool {
    matches!(
        name,
        HOST_CONTROLLER_NAME | DEFAULT_CONTROLLER_NAME | NIL_CONTROLLER_NAME
    )
}

fn check_name(name: &str) -> Result<(), ConfigError> {
    if name.is_empty() {
        return Err(ConfigError::EmptyName);
    }
    if is_reserved(name) {
        return Err(ConfigError::ReservedName(name.to_string()));
    }
    Ok(())
}

/// Controllers for one traffic direction.
pub struct Table {
    traffic: Traffic,
    allow_default: bool,
    store: Arc<dyn ControllerStore>,
    matchers: ArcSwap<Matchers>,
    nil: Arc<Controller>,
}

impl Table {
    pub fn new(traffic: Traffic, allow_default: bool) -> Self {
        let store: Arc<dyn ControllerStore> = Arc::new(SharedStore::new());
        for name in [HOST_CONTROLLER_NAME, DEFAULT_CONTROLLER_NAME] {
            store.insert(Controller::from_route(
                &Route::new(name, traffic),
                RouteHandle::new(name, &store),
            ));
        }
        Self {
            traffic,
            allow_default,
            store,
            matchers: ArcSwap::from_pointee(Matchers::default()),
            nil: Arc::new(Controller::nil()),
        }
    }

    pub fn egress() -> Self {
        Self::new(Traffic::Egress, true)
    }

    pub fn ingress() -> Self {
        Self::new(Traffic::Ingress, true)
    }

    pub fn traffic(&self) -> Traffic {
        self.traffic
    }

    pub fn allows_default(&self) -> bool {
        self.allow_default
    }

    /// Build the controller for `route` and collect its validation errors without
    /// installing it.
    pub fn check(&self, route: &Route) -> Vec<ConfigError> {
        if let Err(e) = check_name(&route.name) {
            return vec![e];
        }
        Controller::from_route(route, RouteHandle::detached(&route.name)).validate(self.traffic)
    }

    fn build(&self, route: &Route) -> Result<Controller, Vec<ConfigError>> {
        let ctrl = Controller::from_route(route, RouteHandle::new(&route.name, &self.store));
        let errors = ctrl.validate(self.traffic);
        if errors.is_empty() {
            Ok(ctrl)
        } else {
            warn!(route = %route.name, traffic = %self.traffic, ?errors, "route rejected");
            Err(errors)
        }
    }

    /// Register a new route. Nothing is installed if any validation fails or the name is
    /// already registered.
    pub fn add_controller(&self, route: Route) -> Result<(), Vec<ConfigError>> {
        check_name(&route.name).map_err(|e| vec![e])?;
        let ctrl = self.build(&route)?;
        if !self.store.insert(ctrl) {
            return Err(vec![ConfigError::DuplicateName(route.name)]);
        }
        info!(route = %route.name, traffic = %self.traffic, "controller registered");
        Ok(())
    }

    /// Register `route`, replacing any existing controller of the same name.
    pub fn replace_controller(&self, route: Route) -> Result<(), Vec<ConfigError>> {
        check_name(&route.name).map_err(|e| vec![e])?;
        let ctrl = self.build(&route)?;
        if self.store.upsert(ctrl).is_some() {
            info!(route = %route.name, traffic = %self.traffic, "controller replaced");
        } else {
            info!(route = %route.name, traffic = %self.traffic, "controller registered");
        }
        Ok(())
    }

    /// Replace the default controller. The route's name is ignored.
    pub fn set_default_controller(&self, mut route: Route) -> Result<(), Vec<ConfigError>> {
        route.name = DEFAULT_CONTROLLER_NAME.to_string();
        let ctrl = self.build(&route)?;
        self.store.upsert(ctrl);
        info!(traffic = %self.traffic, "default controller set");
        Ok(())
    }

    /// Replace the host controller. Only valid on an ingress table. The route's name is
    /// ignored.
    pub fn set_host_controller(&self, mut route: Route) -> Result<(), Vec<ConfigError>> {
        if self.traffic == Traffic::Egress {
            return Err(vec![ConfigError::HostOnEgress]);
        }
        route.name = HOST_CONTROLLER_NAME.to_string();
        let ctrl = self.build(&route)?;
        self.store.upsert(ctrl);
        info!(traffic = %self.traffic, "host controller set");
        Ok(())
    }

    /// Remove a registered route. The host and default controllers cannot be removed.
    pub fn remove(&self, name: &str) -> bool {
        if is_reserved(name) {
            return false;
        }
        let removed = self.store.remove(name).is_some();
        if removed {
            info!(route = %name, traffic = %self.traffic, "controller removed");
        }
        removed
    }

    /// Number of registered routes, excluding host and default.
    pub fn count(&self) -> usize {
        self.store.len().saturating_sub(2)
    }

    pub fn contains(&self, name: &str) -> bool {
        !is_reserved(name) && self.store.get(name).is_some()
    }

    /// Registered route names, excluding host and default.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .store
            .names()
            .into_iter()
            .filter(|n| !is_reserved(n))
            .collect();
        names.sort();
        names
    }

    /// Exact lookup, including the reserved `host` and `*` keys.
    pub fn get(&self, name: &str) -> Option<Arc<Controller>> {
        self.store.get(name)
    }

    pub fn host(&self) -> Arc<Controller> {
        self.store
            .get(HOST_CONTROLLER_NAME)
            .unwrap_or_else(|| Arc::clone(&self.nil))
    }

    pub fn default_controller(&self) -> Arc<Controller> {
        self.store
            .get(DEFAULT_CONTROLLER_NAME)
            .unwrap_or_else(|| Arc::clone(&self.nil))
    }

    pub fn nil(&self) -> Arc<Controller> {
        Arc::clone(&self.nil)
    }

    /// Look up a route by name; an unknown name yields the default controller when the
    /// table allows default fallback, else `None`.
    pub fn lookup_by_name(&self, name: &str) -> Option<Arc<Controller>> {
        if name.is_empty() {
            return None;
        }
        self.store
            .get(name)
            .or_else(|| self.allow_default.then(|| self.default_controller()))
    }

    fn resolve(&self, found: RouteMatch) -> Arc<Controller> {
        match found {
            RouteMatch::Suppress => self.nil(),
            RouteMatch::Default => self.default_controller(),
            RouteMatch::Route(name) => self
                .lookup_by_name(&name)
                .unwrap_or_else(|| self.default_controller()),
        }
    }

    pub fn lookup_http(&self, req: &RequestHead<'_>) -> Arc<Controller> {
        let matcher = Arc::clone(&self.matchers.load().http);
        let ctrl = self.resolve(matcher(req));
        debug!(route = %ctrl.name(), traffic = %self.traffic, "resolved request");
        ctrl
    }

    pub fn lookup_uri(&self, uri: &str, method: &Method) -> Arc<Controller> {
        let matcher = Arc::clone(&self.matchers.load().uri);
        self.resolve(matcher(uri, method))
    }

    pub fn set_http_matcher<F>(&self, matcher: F)
    where
        F: Fn(&RequestHead<'_>) -> RouteMatch + Send + Sync + 'static,
    {
        let http: HttpMatcher = Arc::new(matcher);
        self.matchers.rcu(|current| Matchers {
            http: Arc::clone(&http),
            uri: Arc::clone(&current.uri),
        });
    }

    pub fn set_uri_matcher<F>(&self, matcher: F)
    where
        F: Fn(&str, &Method) -> RouteMatch + Send + Sync + 'static,
    {
        let uri: UriMatcher = Arc::new(matcher);
        self.matchers.rcu(|current| Matchers {
            http: Arc::clone(&current.http),
            uri: Arc::clone(&uri),
        });
    }

    /// Attach a proxy action delegate to a registered route.
    pub fn set_action(&self, name: &str, action: Arc<dyn Actuator>) -> Result<(), SignalError> {
        let ctrl = self.store.get(name).ok_or_else(|| SignalError::RouteNotFound {
            route: name.to_string(),
            traffic: self.traffic,
        })?;
        let proxy = ctrl.proxy().ok_or_else(|| SignalError::NotConfigured {
            route: name.to_string(),
            behavior: crate::core::signal::Behavior::Proxy,
        })?;
        proxy.set_action(action);
        Ok(())
    }

    /// Route a signal to the named controller. Unknown names are an error; there is no
    /// default fallback for signals.
    pub fn signal(&self, name: &str, params: &SignalParams) -> Result<(), SignalError> {
        let ctrl = self.store.get(name).ok_or_else(|| SignalError::RouteNotFound {
            route: name.to_string(),
            traffic: self.traffic,
        })?;
        match ctrl.signal(params) {
            Ok(()) => {
                info!(route = %name, traffic = %self.traffic, ?params, "signal applied");
                Ok(())
            }
            Err(e) => {
                warn!(route = %name, traffic = %self.traffic, error = %e, "signal rejected");
                Err(e)
            }
        }
    }
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("traffic", &self.traffic)
            .field("allow_default", &self.allow_default)
            .field("routes", &self.names())
            .finish()
    }
}

/// One egress and one ingress table plus the sink their records go to. Owned by the
/// application and shared by handle with the interception and signal layers.
#[derive(Clone)]
pub struct Registry {
    egress: Arc<Table>,
    ingress: Arc<Table>,
    access_log: Arc<dyn AccessLogSink>,
}

impl Registry {
    pub fn new(allow_default: bool, access_log: Arc<dyn AccessLogSink>) -> Self {
        Self {
            egress: Arc::new(Table::new(Traffic::Egress, allow_default)),
            ingress: Arc::new(Table::new(Traffic::Ingress, allow_default)),
            access_log,
        }
    }

    pub fn egress(&self) -> &Arc<Table> {
        &self.egress
    }

    pub fn ingress(&self) -> &Arc<Table> {
        &self.ingress
    }

    pub fn table(&self, traffic: Traffic) -> &Arc<Table> {
        match traffic {
            Traffic::Egress => &self.egress,
            Traffic::Ingress => &self.ingress,
        }
    }

    pub fn access_log(&self) -> &Arc<dyn AccessLogSink> {
        &self.access_log
    }

    /// Register a route in the table of its traffic direction. The reserved names `host`
    /// and `*` set that table's host and default controllers.
    pub fn register(&self, route: Route) -> Result<(), Vec<ConfigError>> {
        let table = self.table(route.traffic);
        match route.name.as_str() {
            HOST_CONTROLLER_NAME => table.set_host_controller(route),
            DEFAULT_CONTROLLER_NAME => table.set_default_controller(route),
            _ => table.add_controller(route),
        }
    }

    /// Bring both tables in line with `routes`: every route is registered or replaced and
    /// registered routes missing from `routes` are removed. Nothing changes unless every
    /// route validates.
    pub fn reload(&self, routes: Vec<Route>) -> Result<(), Vec<ConfigError>> {
        let mut errors = Vec::new();
        for route in &routes {
            let table = self.table(route.traffic);
            match route.name.as_str() {
                HOST_CONTROLLER_NAME if route.traffic == Traffic::Egress => {
                    errors.push(ConfigError::HostOnEgress);
                }
                HOST_CONTROLLER_NAME | DEFAULT_CONTROLLER_NAME => errors.extend(
                    Controller::from_route(route, RouteHandle::detached(&route.name))
                        .validate(route.traffic),
                ),
                _ => errors.extend(table.check(route)),
            }
        }
        if !errors.is_empty() {
            return Err(errors);
        }

        for table in [&self.egress, &self.ingress] {
            for name in table.names() {
                let kept = routes
                    .iter()
                    .any(|r| r.traffic == table.traffic() && r.name == name);
                if !kept {
                    table.remove(&name);
                }
            }
        }
        for route in routes {
            let table = self.table(route.traffic);
            match route.name.as_str() {
                HOST_CONTROLLER_NAME => table.set_host_controller(route)?,
                DEFAULT_CONTROLLER_NAME => table.set_default_controller(route)?,
                _ => table.replace_controller(route)?,
            }
        }
        Ok(())
    }

    /// Route a signal to `route` in the `traffic` table.
    pub fn signal(
        &self,
        traffic: Traffic,
        route: &str,
        params: &SignalParams,
    ) -> Result<(), SignalError> {
        self.table(traffic).signal(route, params)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("egress", &self.egress)
            .field("ingress", &self.ingress)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        adapters::access_log::MemoryAccessLog,
        core::{
            route::{ProxyConfig, RateLimiterConfig, RetryConfig, TimeoutConfig},
            signal::{BEHAVIOR_KEY, ENABLED_KEY},
        },
    };

    fn timeout_route(name: &str) -> Route {
        Route::egress(name).timeout(TimeoutConfig::new(true, 504, Duration::from_millis(500)))
    }

    #[test]
    fn test_add_duplicate_leaves_count_unchanged() {
        let table = Table::egress();
        table.add_controller(timeout_route("google-search")).unwrap();
        assert_eq!(table.count(), 1);

        let errors = table.add_controller(timeout_route("google-search")).unwrap_err();
        assert_eq!(
            errors,
            vec![ConfigError::DuplicateName("google-search".into())]
        );
        assert_eq!(table.count(), 1);
    }

    #[test]
    fn test_add_rejects_empty_reserved_and_invalid() {
        let table = Table::egress();
        assert_eq!(
            table.add_controller(Route::egress("")).unwrap_err(),
            vec![ConfigError::EmptyName]
        );
        assert_eq!(
            table.add_controller(Route::egress("*")).unwrap_err(),
            vec![ConfigError::ReservedName("*".into())]
        );
        let invalid = Route::egress("bad")
            .timeout(TimeoutConfig::new(true, 0, Duration::ZERO))
            .retry(RetryConfig::new(true, 1.0, 1, Duration::ZERO, vec![]));
        assert_eq!(table.add_controller(invalid).unwrap_err().len(), 2);
        assert_eq!(table.count(), 0);
    }

    #[test]
    fn test_host_controller_only_on_ingress() {
        let egress = Table::egress();
        assert_eq!(
            egress
                .set_host_controller(Route::egress("anything"))
                .unwrap_err(),
            vec![ConfigError::HostOnEgress]
        );

        let ingress = Table::ingress();
        ingress
            .set_host_controller(
                Route::ingress("ignored").rate_limiter(RateLimiterConfig::new(true, 0, 10.0, 5)),
            )
            .unwrap();
        let host = ingress.host();
        assert_eq!(host.name(), HOST_CONTROLLER_NAME);
        assert!(host.rate_limiter().unwrap().is_enabled());
        assert_eq!(ingress.count(), 0);
    }

    #[test]
    fn test_lookup_fallbacks() {
        let table = Table::egress();
        table.add_controller(timeout_route("known")).unwrap();
        assert_eq!(table.lookup_by_name("known").unwrap().name(), "known");
        assert_eq!(
            table.lookup_by_name("unknown").unwrap().name(),
            DEFAULT_CONTROLLER_NAME
        );
        assert!(table.lookup_by_name("").is_none());

        let strict = Table::new(Traffic::Egress, false);
        assert!(strict.lookup_by_name("unknown").is_none());
    }

    #[test]
    fn test_uri_matcher_resolution() {
        let table = Table::egress();
        table.add_controller(timeout_route("postgres")).unwrap();
        table.set_uri_matcher(|uri, _| {
            if uri.starts_with("urn:postgres") {
                RouteMatch::Route("postgres".into())
            } else if uri.contains("access-log") {
                RouteMatch::Suppress
            } else {
                RouteMatch::Default
            }
        });
        assert_eq!(
            table.lookup_uri("urn:postgres:query", &Method::GET).name(),
            "postgres"
        );
        assert!(
            table
                .lookup_uri("http://collector/access-log", &Method::POST)
                .is_nil()
        );
        assert_eq!(
            table.lookup_uri("http://other", &Method::GET).name(),
            DEFAULT_CONTROLLER_NAME
        );
    }

    #[test]
    fn test_http_matcher_by_host() {
        let table = Table::egress();
        table.add_controller(timeout_route("google")).unwrap();
        table.set_http_matcher(|req| match req.host() {
            Some("www.google.com") => RouteMatch::Route("google".into()),
            _ => RouteMatch::Default,
        });
        let req = Request::get("https://www.google.com/search").body(()).unwrap();
        assert_eq!(table.lookup_http(&RequestHead::from(&req)).name(), "google");
    }

    #[test]
    fn test_signal_unknown_route() {
        let table = Table::egress();
        let params = SignalParams::new()
            .with(BEHAVIOR_KEY, "timeout")
            .with(ENABLED_KEY, "false");
        assert!(matches!(
            table.signal("missing", &params),
            Err(SignalError::RouteNotFound { .. })
        ));
    }

    #[test]
    fn test_set_action_requires_proxy() {
        struct Noop;
        impl Actuator for Noop {
            fn signal(&self, _: &SignalParams) -> Result<(), SignalError> {
                Ok(())
            }
        }
        let table = Table::egress();
        table.add_controller(timeout_route("plain")).unwrap();
        table
            .add_controller(
                Route::egress("proxied").proxy(ProxyConfig::new(true, "http://localhost", vec![])),
            )
            .unwrap();
        assert!(matches!(
            table.set_action("plain", Arc::new(Noop)),
            Err(SignalError::NotConfigured { .. })
        ));
        table.set_action("proxied", Arc::new(Noop)).unwrap();
        assert!(table.get("proxied").unwrap().proxy().unwrap().action().is_some());
    }

    #[test]
    fn test_registry_reload_replaces_and_removes() {
        let registry = Registry::new(true, Arc::new(MemoryAccessLog::new()));
        registry.register(timeout_route("keep")).unwrap();
        registry.register(timeout_route("drop")).unwrap();
        let before = registry.egress().get("keep").unwrap();

        registry
            .reload(vec![Route::egress("keep").timeout(TimeoutConfig::new(
                true,
                504,
                Duration::from_secs(3),
            ))])
            .unwrap();

        assert_eq!(registry.egress().names(), vec!["keep".to_string()]);
        let after = registry.egress().get("keep").unwrap();
        assert_eq!(after.timeout().unwrap().duration(), Duration::from_secs(3));
        assert_eq!(
            before.timeout().unwrap().duration(),
            Duration::from_millis(500)
        );
    }

    #[test]
    fn test_registry_reload_is_all_or_nothing() {
        let registry = Registry::new(true, Arc::new(MemoryAccessLog::new()));
        registry.register(timeout_route("keep")).unwrap();
        let result = registry.reload(vec![
            timeout_route("new"),
            Route::ingress("bad").retry(RetryConfig::new(true, 1.0, 1, Duration::ZERO, vec![503])),
        ]);
        assert!(result.is_err());
        assert_eq!(registry.egress().names(), vec!["keep".to_string()]);
    }
}
