//! Policy-enforcing wrapper around an outbound HTTP transport.
//!
//! [`ControlledClient`] resolves the egress controller for every request and composes its
//! behaviors around the exchange: rate limiting, proxy redirection, a deadline, and a single
//! bounded retry. Rate-limit denials and timeouts are answered with synthesized responses
//! carrying a [`StatusFlag`] in their extensions; transport errors propagate unchanged.
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::{
    HeaderValue, Request, Response, StatusCode,
    header::{self, HeaderName},
    request::Parts,
};
use http_body_util::BodyExt;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::{
    core::{
        access::StatusFlag,
        controller::Controller,
        proxy::Proxy,
        retry::MAX_RETRY_ATTEMPTS,
        table::{Registry, RequestHead, Table},
    },
    ports::{
        access_log::AccessLogSink,
        http_client::{HttpClient, HttpClientError, HttpClientResult},
    },
};

/// Response standing in for a downstream reply when a policy decided the outcome.
pub fn policy_response(status: StatusCode, flag: StatusFlag) -> Response<AxumBody> {
    let mut response = Response::new(AxumBody::empty());
    *response.status_mut() = status;
    response.extensions_mut().insert(flag);
    response
}

/// Flag attached to a response by a policy, if any.
pub fn status_flag<B>(response: &Response<B>) -> Option<StatusFlag> {
    response.extensions().get::<StatusFlag>().copied()
}

pub struct ControlledClient {
    inner: Arc<dyn HttpClient>,
    table: Arc<Table>,
    access_log: Arc<dyn AccessLogSink>,
}

impl ControlledClient {
    /// Wrap `inner` with the registry's egress table and access log.
    pub fn new(inner: Arc<dyn HttpClient>, registry: &Registry) -> Self {
        Self::with_table(
            inner,
            Arc::clone(registry.egress()),
            Arc::clone(registry.access_log()),
        )
    }

    pub fn with_table(
        inner: Arc<dyn HttpClient>,
        table: Arc<Table>,
        access_log: Arc<dyn AccessLogSink>,
    ) -> Self {
        Self {
            inner,
            table,
            access_log,
        }
    }

    pub fn table(&self) -> &Arc<Table> {
        &self.table
    }

    /// One downstream exchange, bounded by the route deadline when its timeout is enabled.
    async fn exchange(
        &self,
        ctrl: &Controller,
        req: Request<AxumBody>,
    ) -> HttpClientResult<Response<AxumBody>> {
        let Some((timeout, deadline)) = ctrl.timeout().and_then(|t| t.deadline().map(|d| (t, d)))
        else {
            return self.inner.send_request(req).await;
        };
        match tokio::time::timeout(deadline, self.inner.send_request(req)).await {
            Ok(result) => result,
            Err(_) => {
                debug!(route = %ctrl.name(), timeout = ?deadline, "downstream timed out");
                Ok(policy_response(
                    timeout.status_code(),
                    StatusFlag::UpstreamTimeout,
                ))
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn log(
        &self,
        ctrl: &Controller,
        start: DateTime<Utc>,
        started: Instant,
        parts: &Parts,
        status: Option<StatusCode>,
        retried: bool,
        flag: Option<StatusFlag>,
    ) {
        ctrl.log_http_egress(
            self.access_log.as_ref(),
            start,
            started.elapsed(),
            &RequestHead::from(parts),
            status,
            retried,
            flag,
        );
    }
}

/// Point the request at the proxy target and append the configured headers.
fn redirect(proxy: &Proxy, req: &mut Request<AxumBody>) {
    let target = proxy.build_url(req.uri());
    if let Some(authority) = target.authority() {
        if let Ok(host) = HeaderValue::from_str(authority.as_str()) {
            req.headers_mut().insert(header::HOST, host);
        }
    }
    *req.uri_mut() = target;
    for h in proxy.headers() {
        match (
            HeaderName::from_bytes(h.name.as_bytes()),
            HeaderValue::from_str(&h.value),
        ) {
            (Ok(name), Ok(value)) => {
                req.headers_mut().append(name, value);
            }
            _ => warn!("Invalid proxy header: {} = {}", h.name, h.value),
        }
    }
}

fn replay(parts: &Parts, body: &Bytes) -> Request<AxumBody> {
    Request::from_parts(parts.clone(), AxumBody::from(body.clone()))
}

#[async_trait]
impl HttpClient for ControlledClient {
    async fn send_request(
        &self,
        mut req: Request<AxumBody>,
    ) -> HttpClientResult<Response<AxumBody>> {
        let ctrl = self.table.lookup_http(&RequestHead::from(&req));
        if !ctrl.is_nil() {
            ctrl.update_headers(req.headers_mut());
        }
        let mut start = Utc::now();
        let mut started = Instant::now();

        if let Some(limiter) = ctrl.rate_limiter().filter(|r| r.is_enabled()) {
            if !limiter.allow() {
                let (parts, _) = req.into_parts();
                let status = limiter.status_code();
                debug!(route = %ctrl.name(), "request rate limited");
                self.log(
                    &ctrl,
                    start,
                    started,
                    &parts,
                    Some(status),
                    false,
                    Some(StatusFlag::RateLimited),
                );
                return Ok(policy_response(status, StatusFlag::RateLimited));
            }
        }

        if let Some(proxy) = ctrl.proxy().filter(|p| p.is_enabled()) {
            redirect(proxy, &mut req);
        }

        let (parts, body) = req.into_parts();
        let Some(retry) = ctrl.retry().filter(|r| r.is_enabled()) else {
            let result = self
                .exchange(&ctrl, Request::from_parts(parts.clone(), body))
                .await;
            match &result {
                Ok(response) => self.log(
                    &ctrl,
                    start,
                    started,
                    &parts,
                    Some(response.status()),
                    false,
                    status_flag(response),
                ),
                Err(_) => self.log(&ctrl, start, started, &parts, None, false, None),
            }
            return result;
        };

        // A retry resends the request, so the body must be replayable.
        let body = body
            .collect()
            .await
            .map_err(|e| HttpClientError::BodyError(e.to_string()))?
            .to_bytes();

        let mut attempt = 0;
        loop {
            let retried = attempt > 0;
            let mut response = match self.exchange(&ctrl, replay(&parts, &body)).await {
                Ok(response) => response,
                Err(e) => {
                    self.log(&ctrl, start, started, &parts, None, retried, None);
                    return Err(e);
                }
            };

            let mut flag = status_flag(&response);
            let mut retryable = false;
            if attempt < MAX_RETRY_ATTEMPTS {
                let (allowed, retry_flag) = retry.check(response.status());
                retryable = allowed;
                if flag.is_none() {
                    if let Some(retry_flag) = retry_flag {
                        response.extensions_mut().insert(retry_flag);
                        flag = Some(retry_flag);
                    }
                }
            }
            self.log(
                &ctrl,
                start,
                started,
                &parts,
                Some(response.status()),
                retried,
                flag,
            );
            if !retryable {
                return Ok(response);
            }

            debug!(route = %ctrl.name(), status = %response.status(), "retrying request");
            drop(response);
            retry.backoff().await;
            attempt += 1;
            start = Utc::now();
            started = Instant::now();
        }
    }
}
