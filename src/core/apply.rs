//! Policy application for non-HTTP egress calls (databases, queues) identified by a URI or
//! URN such as `urn:postgres:query`.
use std::{future::Future, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use http::Method;
use tokio::time::{Instant, error::Elapsed};

use crate::{
    core::{
        access::StatusFlag,
        controller::Controller,
        table::{Registry, Table},
    },
    ports::access_log::AccessLogSink,
};

/// Status code reported by a call that exceeded its deadline.
pub const STATUS_DEADLINE_EXCEEDED: i32 = 4;
/// Status code to report for a call denied by the rate limiter.
pub const STATUS_RATE_LIMITED: i32 = 94;

/// Guard returned by [`Table::apply`]. The caller checks [`EgressGuard::is_rate_limited`],
/// performs the call within [`EgressGuard::deadline`] (or via [`EgressGuard::run`]), then
/// reports the outcome with [`EgressGuard::finish`], which emits the access record.
#[must_use = "call finish() to record the outcome"]
pub struct EgressGuard {
    ctrl: Arc<Controller>,
    sink: Arc<dyn AccessLogSink>,
    start: DateTime<Utc>,
    started: Instant,
    uri: String,
    request_id: String,
    method: String,
    limited: bool,
    deadline: Option<Duration>,
}

impl EgressGuard {
    pub fn controller(&self) -> &Arc<Controller> {
        &self.ctrl
    }

    /// True when the call must not be made.
    pub fn is_rate_limited(&self) -> bool {
        self.limited
    }

    /// Time budget for the call, if the route has an enabled timeout.
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    /// Run `call` bounded by the deadline.
    pub async fn run<F: Future>(&self, call: F) -> Result<F::Output, Elapsed> {
        match self.deadline {
            Some(deadline) => tokio::time::timeout(deadline, call).await,
            None => Ok(call.await),
        }
    }

    /// Record the outcome. A status of [`STATUS_DEADLINE_EXCEEDED`] is flagged as an
    /// upstream timeout.
    pub fn finish(self, status_code: i32) {
        let flag = if status_code == STATUS_DEADLINE_EXCEEDED {
            Some(StatusFlag::UpstreamTimeout)
        } else if self.limited {
            Some(StatusFlag::RateLimited)
        } else {
            None
        };
        self.ctrl.log_egress(
            self.sink.as_ref(),
            self.start,
            self.started.elapsed(),
            status_code,
            &self.uri,
            &self.request_id,
            &self.method,
            flag,
        );
    }
}

impl Table {
    /// Resolve the controller for `uri` and apply its rate limiter and timeout.
    pub fn apply(
        &self,
        sink: Arc<dyn AccessLogSink>,
        uri: &str,
        request_id: &str,
        method: &str,
    ) -> EgressGuard {
        let parsed = Method::from_bytes(method.as_bytes()).unwrap_or(Method::GET);
        let ctrl = self.lookup_uri(uri, &parsed);
        let limited = ctrl
            .rate_limiter()
            .is_some_and(|r| r.is_enabled() && !r.allow());
        let deadline = if limited {
            None
        } else {
            ctrl.timeout().and_then(|t| t.deadline())
        };
        EgressGuard {
            ctrl,
            sink,
            start: Utc::now(),
            started: Instant::now(),
            uri: uri.to_string(),
            request_id: request_id.to_string(),
            method: method.to_string(),
            limited,
            deadline,
        }
    }
}

impl Registry {
    /// [`Table::apply`] on the egress table, recording to this registry's sink.
    pub fn apply(&self, uri: &str, request_id: &str, method: &str) -> EgressGuard {
        self.egress()
            .apply(Arc::clone(self.access_log()), uri, request_id, method)
    }
}
