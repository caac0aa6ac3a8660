//! HTTP endpoints for runtime reconfiguration.
//!
//! Two shapes are served under the same base path:
//!
//! * `{base}?traffic=egress&route=search&behavior=timeout&duration=500ms`
//! * `{base}/{traffic}/{route}/{behavior}?enabled=false`
//!
//! Both answer `200` with an empty body on success and `400` with the error message as plain
//! text otherwise.
use std::str::FromStr;

use axum::{
    Router,
    extract::{Path, RawQuery, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::any,
};
use tracing::warn;

use crate::core::{
    route::Traffic,
    signal::{BEHAVIOR_KEY, ROUTE_KEY, SignalError, SignalParams, TRAFFIC_KEY},
    table::Registry,
};

/// Default base path of the signal endpoints.
pub const DEFAULT_SIGNAL_PATH: &str = "/actuator";

impl IntoResponse for SignalError {
    fn into_response(self) -> Response {
        (
            StatusCode::BAD_REQUEST,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            self.to_string(),
        )
            .into_response()
    }
}

fn normalize_base(base: &str) -> String {
    let trimmed = base.trim().trim_matches('/');
    if trimmed.is_empty() {
        DEFAULT_SIGNAL_PATH.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// Router serving both signal endpoints under `base`.
pub fn signal_router(registry: Registry, base: &str) -> Router {
    let base = normalize_base(base);
    Router::new()
        .route(&base, any(query_signal))
        .route(
            &format!("{base}/{{traffic}}/{{route}}/{{behavior}}"),
            any(path_signal),
        )
        .with_state(registry)
}

fn dispatch(
    registry: &Registry,
    traffic: &str,
    route: &str,
    params: &SignalParams,
) -> Result<StatusCode, SignalError> {
    let traffic = Traffic::from_str(traffic)?;
    registry.signal(traffic, route, params)?;
    Ok(StatusCode::OK)
}

/// Signal addressed entirely by query parameters.
pub async fn query_signal(
    State(registry): State<Registry>,
    RawQuery(query): RawQuery,
) -> Result<StatusCode, SignalError> {
    let params = SignalParams::from_query(query.as_deref().unwrap_or_default());
    let traffic = params
        .get(TRAFFIC_KEY)
        .ok_or(SignalError::MissingKey(TRAFFIC_KEY))?;
    let route = params
        .get(ROUTE_KEY)
        .ok_or(SignalError::MissingKey(ROUTE_KEY))?;
    dispatch(&registry, traffic, route, &params).inspect_err(|e| warn!("Signal rejected: {e}"))
}

/// Signal addressed by path segments, with behavior parameters in the query.
pub async fn path_signal(
    State(registry): State<Registry>,
    Path((traffic, route, behavior)): Path<(String, String, String)>,
    RawQuery(query): RawQuery,
) -> Result<StatusCode, SignalError> {
    let mut params = SignalParams::from_query(query.as_deref().unwrap_or_default());
    params.insert(BEHAVIOR_KEY, behavior);
    dispatch(&registry, &traffic, &route, &params).inspect_err(|e| warn!("Signal rejected: {e}"))
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use axum::body::{Body, to_bytes};
    use http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::{
        adapters::access_log::MemoryAccessLog,
        core::route::{Route, TimeoutConfig},
    };

    fn registry() -> Registry {
        let registry = Registry::new(true, Arc::new(MemoryAccessLog::new()));
        registry
            .register(Route::egress("search").timeout(TimeoutConfig::new(
                true,
                504,
                Duration::from_millis(1500),
            )))
            .unwrap();
        registry
    }

    async fn call(registry: &Registry, uri: &str) -> (StatusCode, String) {
        let response = signal_router(registry.clone(), "/actuator")
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_query_signal() {
        let registry = registry();
        let (status, body) = call(
            &registry,
            "/actuator?traffic=egress&route=search&behavior=timeout&enabled=false&duration=2s",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.is_empty());

        let ctrl = registry.egress().get("search").unwrap();
        let timeout = ctrl.timeout().unwrap();
        assert!(!timeout.is_enabled());
        assert_eq!(timeout.duration(), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_path_signal() {
        let registry = registry();
        let (status, _) = call(&registry, "/actuator/egress/search/timeout?duration=250ms").await;
        assert_eq!(status, StatusCode::OK);
        let ctrl = registry.egress().get("search").unwrap();
        assert_eq!(
            ctrl.timeout().unwrap().duration(),
            Duration::from_millis(250)
        );
    }

    #[tokio::test]
    async fn test_rejections_are_plain_text() {
        let registry = registry();
        let cases = [
            "/actuator?traffic=egress&route=missing&behavior=timeout",
            "/actuator?traffic=sideways&route=search&behavior=timeout",
            "/actuator?route=search&behavior=timeout",
            "/actuator/egress/search/teleport",
            "/actuator/egress/search/retry?enabled=true",
            "/actuator/egress/search/timeout?duration=fast",
        ];
        for uri in cases {
            let (status, body) = call(&registry, uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
            assert!(!body.is_empty(), "{uri}");
        }
    }

    #[test]
    fn test_normalize_base() {
        assert_eq!(normalize_base("actuator/"), "/actuator");
        assert_eq!(normalize_base(""), DEFAULT_SIGNAL_PATH);
        assert_eq!(normalize_base("/ops/signal"), "/ops/signal");
    }
}
