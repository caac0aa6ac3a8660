//! The per-route policy aggregate.
//!
//! A [`Controller`] is an immutable snapshot: reconfiguring one of its behaviors publishes a
//! successor into the owning store, and the snapshot a request obtained at lookup time stays
//! valid, unchanged, for that request's whole lifetime.
use std::time::Duration;

use chrono::{DateTime, Utc};
use http::{HeaderMap, HeaderValue, StatusCode, header::HeaderName};

use crate::{
    core::{
        access::{AccessRecord, EGRESS_TRAFFIC, INGRESS_TRAFFIC, PING_TRAFFIC, StatusFlag},
        failover::Failover,
        proxy::Proxy,
        rate_limiter::RateLimiter,
        retry::Retry,
        route::{ConfigError, HOST_CONTROLLER_NAME, NIL_CONTROLLER_NAME, Route, Traffic},
        signal::{Actuator, Behavior, Signal, SignalError, SignalParams},
        store::RouteHandle,
        table::RequestHead,
        timeout::Timeout,
        uri::parse_uri,
    },
    ports::access_log::AccessLogSink,
};

/// Header stamped with the name of the route that handled a request.
pub const FROM_ROUTE_HEADER: HeaderName = HeaderName::from_static("from-route");
/// Header carrying the request id; generated when absent.
pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

#[derive(Debug, Clone)]
pub struct Controller {
    name: String,
    ping: bool,
    protocol: Option<String>,
    pub(crate) generation: u64,
    pub(crate) timeout: Option<Timeout>,
    pub(crate) rate_limiter: Option<RateLimiter>,
    pub(crate) retry: Option<Retry>,
    pub(crate) proxy: Option<Proxy>,
    pub(crate) failover: Option<Failover>,
}

impl Controller {
    /// Build a controller whose behaviors publish through `handle`.
    pub fn from_route(route: &Route, handle: RouteHandle) -> Self {
        Self {
            name: route.name.clone(),
            ping: route.ping,
            protocol: route.protocol.clone(),
            generation: 0,
            timeout: route
                .timeout
                .clone()
                .map(|c| Timeout::new(handle.clone(), c)),
            rate_limiter: route
                .rate_limiter
                .clone()
                .map(|c| RateLimiter::new(handle.clone(), c)),
            retry: route.retry.clone().map(|c| Retry::new(handle.clone(), c)),
            proxy: route.proxy.clone().map(|c| Proxy::new(handle.clone(), c)),
            failover: route
                .failover
                .clone()
                .map(|c| Failover::new(handle.clone(), c)),
        }
    }

    /// Controller returned when a matcher suppresses a lookup: no behaviors, never logs.
    pub fn nil() -> Self {
        Self::from_route(
            &Route::egress(NIL_CONTROLLER_NAME),
            RouteHandle::detached(NIL_CONTROLLER_NAME),
        )
    }

    /// Collect every configuration error, including the behavior restrictions of `traffic`.
    pub fn validate(&self, traffic: Traffic) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        if self.name.is_empty() {
            errors.push(ConfigError::EmptyName);
        }
        let checks = [
            self.timeout.as_ref().map(Timeout::validate),
            self.rate_limiter.as_ref().map(RateLimiter::validate),
            self.retry.as_ref().map(Retry::validate),
            self.proxy.as_ref().map(Proxy::validate),
            self.failover.as_ref().map(Failover::validate),
        ];
        errors.extend(checks.into_iter().flatten().filter_map(Result::err));

        if traffic == Traffic::Ingress {
            let host = self.name == HOST_CONTROLLER_NAME;
            let forbidden = [
                (self.retry.is_some(), Behavior::Retry),
                (self.proxy.is_some(), Behavior::Proxy),
                (self.failover.is_some(), Behavior::Failover),
                (host && self.timeout.is_some(), Behavior::Timeout),
                (!host && self.rate_limiter.is_some(), Behavior::RateLimit),
            ];
            errors.extend(forbidden.into_iter().filter(|(present, _)| *present).map(
                |(_, behavior)| ConfigError::IngressBehavior {
                    route: self.name.clone(),
                    behavior,
                },
            ));
        }
        errors
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_nil(&self) -> bool {
        self.name == NIL_CONTROLLER_NAME
    }

    pub fn ping(&self) -> bool {
        self.ping
    }

    pub fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    /// Publication counter assigned by the store; increases with every replacement.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn timeout(&self) -> Option<&Timeout> {
        self.timeout.as_ref()
    }

    pub fn rate_limiter(&self) -> Option<&RateLimiter> {
        self.rate_limiter.as_ref()
    }

    pub fn retry(&self) -> Option<&Retry> {
        self.retry.as_ref()
    }

    pub fn proxy(&self) -> Option<&Proxy> {
        self.proxy.as_ref()
    }

    pub fn failover(&self) -> Option<&Failover> {
        self.failover.as_ref()
    }

    /// Dispatch a parsed signal to the behavior it addresses.
    pub fn apply_signal(&self, signal: &Signal) -> Result<(), SignalError> {
        let not_configured = || SignalError::NotConfigured {
            route: self.name.clone(),
            behavior: signal.behavior(),
        };
        match signal {
            Signal::Timeout(s) => self.timeout.as_ref().ok_or_else(not_configured)?.signal(s),
            Signal::RateLimit(s) => self
                .rate_limiter
                .as_ref()
                .ok_or_else(not_configured)?
                .signal(s),
            Signal::Retry(s) => self.retry.as_ref().ok_or_else(not_configured)?.signal(s),
            Signal::Proxy(s) => self.proxy.as_ref().ok_or_else(not_configured)?.signal(s),
            Signal::Failover(s) => self.failover.as_ref().ok_or_else(not_configured)?.signal(s),
        }
    }

    /// Stamp the route header and add a request id if none is present.
    pub fn update_headers(&self, headers: &mut HeaderMap) {
        if let Ok(value) = HeaderValue::from_str(&self.name) {
            headers.insert(FROM_ROUTE_HEADER, value);
        }
        if !headers.contains_key(REQUEST_ID_HEADER) {
            let id = uuid::Uuid::new_v4().to_string();
            if let Ok(value) = HeaderValue::from_str(&id) {
                headers.insert(REQUEST_ID_HEADER, value);
            }
        }
    }

    fn timeout_ms(&self) -> i64 {
        self.timeout.as_ref().map_or(-1, Timeout::timeout_ms)
    }

    fn rate_state(&self) -> (f64, i64) {
        self.rate_limiter
            .as_ref()
            .map_or((-1.0, -1), RateLimiter::state)
    }

    fn record(
        &self,
        traffic: &'static str,
        start: DateTime<Utc>,
        duration: Duration,
        req: &RequestHead<'_>,
    ) -> AccessRecord {
        let (rate_limit, rate_burst) = self.rate_state();
        AccessRecord {
            traffic,
            start,
            duration,
            route: self.name.clone(),
            request_id: req.request_id().unwrap_or_default().to_string(),
            protocol: format!("{:?}", req.version),
            method: req.method.to_string(),
            url: req.uri.to_string(),
            host: req.host().unwrap_or_default().to_string(),
            path: req.uri.path().to_string(),
            status_code: 0,
            bytes_written: None,
            timeout_ms: self.timeout_ms(),
            rate_limit,
            rate_burst,
            retry: None,
            proxy: self.proxy.as_ref().is_some_and(Proxy::is_enabled),
            failover: self.failover.as_ref().is_some_and(Failover::is_enabled),
            status_flag: None,
        }
    }

    /// Record one inbound request. Reported as `ping` traffic on ping routes.
    #[allow(clippy::too_many_arguments)]
    pub fn log_http_ingress(
        &self,
        sink: &dyn AccessLogSink,
        start: DateTime<Utc>,
        duration: Duration,
        req: &RequestHead<'_>,
        status: StatusCode,
        written: Option<u64>,
        flag: Option<StatusFlag>,
    ) {
        if self.is_nil() {
            return;
        }
        let traffic = if self.ping {
            PING_TRAFFIC
        } else {
            INGRESS_TRAFFIC
        };
        let mut record = self.record(traffic, start, duration, req);
        record.status_code = i32::from(status.as_u16());
        record.bytes_written = written;
        record.status_flag = flag;
        sink.log(&record);
    }

    /// Record one outbound attempt. `status` is `None` for a transport failure. A retried
    /// attempt, or one whose retry was denied, reports the retry bucket's limit and burst.
    #[allow(clippy::too_many_arguments)]
    pub fn log_http_egress(
        &self,
        sink: &dyn AccessLogSink,
        start: DateTime<Utc>,
        duration: Duration,
        req: &RequestHead<'_>,
        status: Option<StatusCode>,
        retry: bool,
        flag: Option<StatusFlag>,
    ) {
        if self.is_nil() {
            return;
        }
        let mut record = self.record(EGRESS_TRAFFIC, start, duration, req);
        record.status_code = status.map_or(0, |s| i32::from(s.as_u16()));
        record.status_flag = flag;
        if let Some(r) = self.retry.as_ref().filter(|r| r.is_enabled()) {
            record.retry = Some(retry);
            if retry || flag == Some(StatusFlag::RetryRateLimited) {
                (record.rate_limit, record.rate_burst) = r.state();
            }
        }
        sink.log(&record);
    }

    /// Record one non-HTTP outbound call identified by a URI or URN.
    #[allow(clippy::too_many_arguments)]
    pub fn log_egress(
        &self,
        sink: &dyn AccessLogSink,
        start: DateTime<Utc>,
        duration: Duration,
        status_code: i32,
        uri: &str,
        request_id: &str,
        method: &str,
        flag: Option<StatusFlag>,
    ) {
        if self.is_nil() {
            return;
        }
        let (scheme, host, path) = parse_uri(uri);
        let (rate_limit, rate_burst) = self.rate_state();
        sink.log(&AccessRecord {
            traffic: EGRESS_TRAFFIC,
            start,
            duration,
            route: self.name.clone(),
            request_id: request_id.to_string(),
            protocol: scheme,
            method: method.to_string(),
            url: uri.to_string(),
            host,
            path,
            status_code,
            bytes_written: None,
            timeout_ms: self.timeout_ms(),
            rate_limit,
            rate_burst,
            retry: None,
            proxy: self.proxy.as_ref().is_some_and(Proxy::is_enabled),
            failover: self.failover.as_ref().is_some_and(Failover::is_enabled),
            status_flag: flag,
        });
    }
}

impl Actuator for Controller {
    fn signal(&self, params: &SignalParams) -> Result<(), SignalError> {
        self.apply_signal(&Signal::parse(params)?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use http::{Method, Request, Version};

    use super::*;
    use crate::{
        adapters::access_log::MemoryAccessLog,
        core::{
            route::{RateLimiterConfig, RetryConfig, TimeoutConfig},
            signal::{BEHAVIOR_KEY, DURATION_KEY, ENABLED_KEY},
            store::{ControllerStore, SharedStore},
        },
    };

    fn registered(route: Route) -> (Arc<dyn ControllerStore>, Arc<Controller>) {
        let store: Arc<dyn ControllerStore> = Arc::new(SharedStore::new());
        let name = route.name.clone();
        store.insert(Controller::from_route(&route, RouteHandle::new(&name, &store)));
        let ctrl = store.get(&name).unwrap();
        (store, ctrl)
    }

    #[test]
    fn test_signal_publishes_new_generation() {
        let (store, ctrl) = registered(
            Route::egress("google-search").timeout(TimeoutConfig::new(
                true,
                504,
                Duration::from_millis(1500),
            )),
        );
        let params = SignalParams::new()
            .with(BEHAVIOR_KEY, "timeout")
            .with(ENABLED_KEY, "false")
            .with(DURATION_KEY, "2s");
        ctrl.signal(&params).unwrap();

        let next = store.get("google-search").unwrap();
        assert!(next.generation() > ctrl.generation());
        assert!(!next.timeout().unwrap().is_enabled());
        assert_eq!(next.timeout().unwrap().duration(), Duration::from_secs(2));
        assert!(ctrl.timeout().unwrap().is_enabled());
        assert_eq!(
            ctrl.timeout().unwrap().duration(),
            Duration::from_millis(1500)
        );
    }

    #[test]
    fn test_signal_to_missing_behavior_is_not_configured() {
        let (_store, ctrl) = registered(Route::egress("bare"));
        let params = SignalParams::new().with(BEHAVIOR_KEY, "retry");
        assert_eq!(
            ctrl.signal(&params),
            Err(SignalError::NotConfigured {
                route: "bare".into(),
                behavior: Behavior::Retry,
            })
        );
    }

    #[test]
    fn test_ingress_restrictions() {
        let route = Route::ingress("inbound")
            .rate_limiter(RateLimiterConfig::new(true, 0, 10.0, 1))
            .retry(RetryConfig::new(true, 1.0, 1, Duration::ZERO, vec![503]));
        let ctrl = Controller::from_route(&route, RouteHandle::detached("inbound"));
        let errors = ctrl.validate(Traffic::Ingress);
        assert_eq!(errors.len(), 2);
        assert!(ctrl.validate(Traffic::Egress).is_empty());

        let host = Route::ingress(HOST_CONTROLLER_NAME)
            .rate_limiter(RateLimiterConfig::new(true, 0, 10.0, 1))
            .timeout(TimeoutConfig::new(true, 0, Duration::from_secs(1)));
        let ctrl = Controller::from_route(&host, RouteHandle::detached(HOST_CONTROLLER_NAME));
        assert_eq!(
            ctrl.validate(Traffic::Ingress),
            vec![ConfigError::IngressBehavior {
                route: HOST_CONTROLLER_NAME.into(),
                behavior: Behavior::Timeout,
            }]
        );
    }

    #[test]
    fn test_update_headers_keeps_request_id() {
        let ctrl = Controller::from_route(&Route::egress("r1"), RouteHandle::detached("r1"));
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static("abc"));
        ctrl.update_headers(&mut headers);
        assert_eq!(headers.get(REQUEST_ID_HEADER).unwrap(), "abc");
        assert_eq!(headers.get(FROM_ROUTE_HEADER).unwrap(), "r1");

        let mut headers = HeaderMap::new();
        ctrl.update_headers(&mut headers);
        let id = headers.get(REQUEST_ID_HEADER).unwrap().to_str().unwrap();
        assert!(uuid::Uuid::parse_str(id).is_ok());
    }

    #[test]
    fn test_log_http_egress_snapshots_state() {
        let route = Route::egress("r1")
            .timeout(TimeoutConfig::new(false, 0, Duration::from_secs(1)))
            .rate_limiter(RateLimiterConfig::new(true, 0, f64::INFINITY, 3))
            .retry(RetryConfig::new(true, 5.0, 2, Duration::ZERO, vec![503]));
        let ctrl = Controller::from_route(&route, RouteHandle::detached("r1"));
        let sink = MemoryAccessLog::new();
        let req = Request::builder()
            .method(Method::GET)
            .uri("http://localhost:8080/search?q=1")
            .version(Version::HTTP_11)
            .body(())
            .unwrap();
        let head = RequestHead::from(&req);

        ctrl.log_http_egress(
            &sink,
            Utc::now(),
            Duration::from_millis(3),
            &head,
            Some(StatusCode::OK),
            false,
            None,
        );
        ctrl.log_http_egress(
            &sink,
            Utc::now(),
            Duration::from_millis(3),
            &head,
            Some(StatusCode::OK),
            false,
            Some(StatusFlag::RetryRateLimited),
        );

        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].timeout_ms, -1);
        assert_eq!(records[0].rate_limit, 99999.0);
        assert_eq!(records[0].rate_burst, 3);
        assert_eq!(records[0].retry, Some(false));
        assert_eq!(records[0].host, "localhost");
        assert_eq!(records[0].path, "/search");
        assert_eq!(records[0].protocol, "HTTP/1.1");
        assert_eq!(records[1].rate_limit, 5.0);
        assert_eq!(records[1].rate_burst, 2);
    }

    #[test]
    fn test_nil_controller_never_logs() {
        let sink = MemoryAccessLog::new();
        Controller::nil().log_egress(
            &sink,
            Utc::now(),
            Duration::ZERO,
            0,
            "urn:postgres:query",
            "id",
            "GET",
            None,
        );
        assert!(sink.records().is_empty());
    }

    #[test]
    fn test_log_egress_splits_urn() {
        let sink = MemoryAccessLog::new();
        let ctrl = Controller::from_route(&Route::egress("db"), RouteHandle::detached("db"));
        ctrl.log_egress(
            &sink,
            Utc::now(),
            Duration::from_millis(1),
            0,
            "urn:postgres:query.access-log",
            "req-1",
            "select",
            None,
        );
        let record = &sink.records()[0];
        assert_eq!(record.protocol, "urn");
        assert_eq!(record.host, "postgres");
        assert_eq!(record.path, "query.access-log");
        assert_eq!(record.request_id, "req-1");
        assert_eq!(record.rate_limit, -1.0);
    }
}
