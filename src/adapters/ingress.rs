//! Axum middleware applying the ingress table to inbound requests.
//!
//! The host controller's rate limiter is consulted before route lookup, so it guards the
//! whole service. The resolved route then bounds the handler with its timeout, and one access
//! record is written per request.
use std::sync::Arc;

use axum::{
    body::{Body, HttpBody},
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use tokio::time::Instant;
use tracing::debug;

use crate::{
    core::{
        access::StatusFlag,
        table::{Registry, RequestHead, Table},
    },
    ports::access_log::AccessLogSink,
};

/// State for [`ingress_control`].
#[derive(Clone)]
pub struct IngressState {
    table: Arc<Table>,
    access_log: Arc<dyn AccessLogSink>,
}

impl IngressState {
    pub fn new(registry: &Registry) -> Self {
        Self {
            table: Arc::clone(registry.ingress()),
            access_log: Arc::clone(registry.access_log()),
        }
    }
}

fn flagged(status: http::StatusCode, flag: StatusFlag) -> Response {
    let mut response = (status, Body::empty()).into_response();
    response.extensions_mut().insert(flag);
    response
}

/// Middleware entry point, installed with
/// `axum::middleware::from_fn_with_state(IngressState::new(&registry), ingress_control)`.
pub async fn ingress_control(
    State(state): State<IngressState>,
    req: Request,
    next: Next,
) -> Response {
    let start = Utc::now();
    let started = Instant::now();
    let (mut parts, body) = req.into_parts();

    let host = state.table.host();
    if let Some(limiter) = host.rate_limiter().filter(|r| r.is_enabled()) {
        if !limiter.allow() {
            let status = limiter.status_code();
            debug!(uri = %parts.uri, "inbound request rate limited");
            host.log_http_ingress(
                state.access_log.as_ref(),
                start,
                started.elapsed(),
                &RequestHead::from(&parts),
                status,
                Some(0),
                Some(StatusFlag::RateLimited),
            );
            return flagged(status, StatusFlag::RateLimited);
        }
    }

    let ctrl = state.table.lookup_http(&RequestHead::from(&parts));
    if !ctrl.is_nil() {
        ctrl.update_headers(&mut parts.headers);
    }
    let head = parts.clone();
    let req = Request::from_parts(parts, body);

    let bound = ctrl.timeout().and_then(|t| t.deadline().map(|d| (t, d)));
    let (response, flag) = match bound {
        Some((timeout, deadline)) => match tokio::time::timeout(deadline, next.run(req)).await {
            Ok(response) => (response, None),
            Err(_) => {
                debug!(route = %ctrl.name(), "inbound request timed out");
                (
                    flagged(timeout.status_code(), StatusFlag::UpstreamTimeout),
                    Some(StatusFlag::UpstreamTimeout),
                )
            }
        },
        None => (next.run(req).await, None),
    };

    ctrl.log_http_ingress(
        state.access_log.as_ref(),
        start,
        started.elapsed(),
        &RequestHead::from(&head),
        response.status(),
        response.body().size_hint().exact(),
        flag,
    );
    response
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::{Router, http::StatusCode, middleware, routing::get};
    use tower::ServiceExt;

    use super::*;
    use crate::{
        adapters::access_log::MemoryAccessLog,
        core::{
            route::{RateLimiterConfig, Route, TimeoutConfig},
            table::RouteMatch,
        },
    };

    fn app(registry: &Registry) -> Router {
        registry.ingress().set_http_matcher(|req| {
            match req.uri.path().trim_start_matches('/').split('/').next() {
                Some(name) if !name.is_empty() => RouteMatch::Route(name.to_string()),
                _ => RouteMatch::Default,
            }
        });
        Router::new()
            .route("/search", get(|| async { "results" }))
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    "late"
                }),
            )
            .route("/health", get(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(
                IngressState::new(registry),
                ingress_control,
            ))
    }

    fn request(path: &str) -> Request {
        Request::builder().uri(path).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_request_is_logged_against_route() {
        let sink = Arc::new(MemoryAccessLog::new());
        let registry = Registry::new(true, sink.clone());
        registry.register(Route::ingress("search")).unwrap();

        let response = app(&registry).oneshot(request("/search")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].traffic, "ingress");
        assert_eq!(records[0].route, "search");
        assert_eq!(records[0].status_code, 200);
        assert_eq!(records[0].bytes_written, Some(7));
        assert!(!records[0].request_id.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_route_timeout() {
        let sink = Arc::new(MemoryAccessLog::new());
        let registry = Registry::new(true, sink.clone());
        registry
            .register(Route::ingress("slow").timeout(TimeoutConfig::new(
                true,
                504,
                Duration::from_millis(10),
            )))
            .unwrap();

        let response = app(&registry).oneshot(request("/slow")).await.unwrap();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        let records = sink.records();
        assert_eq!(records[0].status_flag, Some(StatusFlag::UpstreamTimeout));
        assert_eq!(records[0].timeout_ms, 10);
    }

    #[tokio::test]
    async fn test_host_rate_limit_precedes_lookup() {
        let sink = Arc::new(MemoryAccessLog::new());
        let registry = Registry::new(true, sink.clone());
        registry
            .register(
                Route::ingress("host").rate_limiter(RateLimiterConfig::new(true, 503, 1.0, 0)),
            )
            .unwrap();
        registry.register(Route::ingress("search")).unwrap();

        let response = app(&registry).oneshot(request("/search")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].route, "host");
        assert_eq!(records[0].status_flag, Some(StatusFlag::RateLimited));
    }

    #[tokio::test]
    async fn test_ping_route_reports_ping_traffic() {
        let sink = Arc::new(MemoryAccessLog::new());
        let registry = Registry::new(true, sink.clone());
        registry
            .register(Route::ingress("health").ping(true))
            .unwrap();

        app(&registry).oneshot(request("/health")).await.unwrap();
        assert_eq!(sink.records()[0].traffic, "ping");
    }
}
