//! Axon Control - per-route traffic control for HTTP clients and servers.
//!
//! Every outbound (egress) or inbound (ingress) request is resolved to a route controller
//! that decides whether to apply a timeout, a rate limit, a single bounded retry, a
//! URL-rewriting proxy redirect, or a failover signal. Each behavior can be toggled and
//! reconfigured at runtime through a flat key/value signal protocol without stopping traffic.
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use axon_control::{
//!     adapters::{ControlledClient, HttpClientAdapter, TracingAccessLog},
//!     core::{Registry, Route, RouteMatch, SignalParams, TimeoutConfig, Traffic},
//!     ports::http_client::HttpClient,
//! };
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let registry = Registry::new(true, Arc::new(TracingAccessLog::new()));
//! registry
//!     .register(Route::egress("search").timeout(TimeoutConfig::new(
//!         true,
//!         504,
//!         std::time::Duration::from_millis(500),
//!     )))
//!     .map_err(|e| eyre::eyre!("{e:?}"))?;
//! registry
//!     .egress()
//!     .set_http_matcher(|_| RouteMatch::Route("search".into()));
//!
//! let client = ControlledClient::new(Arc::new(HttpClientAdapter::new()?), &registry);
//! let request = http::Request::get("https://www.google.com/search?q=rust")
//!     .body(axum::body::Body::empty())?;
//! let response = client.send_request(request).await?;
//! println!("{}", response.status());
//!
//! // Later, from the actuator endpoint or directly:
//! let params = SignalParams::new()
//!     .with("behavior", "timeout")
//!     .with("duration", "2s");
//! registry.signal(Traffic::Egress, "search", &params)?;
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters** (implementations) while keeping
//! the policy logic inside `core`, which performs no I/O beyond the timers of its behaviors.
//!
//! # Concurrency
//! Controllers are immutable snapshots. Reconfiguration clones the current controller,
//! changes the clone and swaps it into the table under a short write lock; a request keeps
//! the snapshot it looked up for its whole lifetime.
//!
//! # Error Handling
//! Domain errors are `thiserror` enums (`ConfigError`, `SignalError`, `HttpClientError`);
//! application plumbing returns `eyre::Result<T>` with `WrapErr` context.
pub mod config;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

pub use crate::{
    adapters::{ControlledClient, HttpClientAdapter, MemoryAccessLog, TracingAccessLog},
    core::{Controller, Registry, Route, Table, Traffic},
    ports::{access_log::AccessLogSink, http_client::HttpClient},
    utils::GracefulShutdown,
};
