pub mod access;
pub mod apply;
pub mod controller;
pub mod duration;
pub mod failover;
pub mod limiter;
pub mod proxy;
pub mod rate_limiter;
pub mod retry;
pub mod route;
pub mod signal;
pub mod store;
pub mod table;
pub mod timeout;
pub mod uri;

pub use access::{AccessRecord, StatusFlag};
pub use apply::EgressGuard;
pub use controller::Controller;
pub use route::{
    ConfigError, FailoverConfig, FailoverInvoke, Header, ProxyConfig, RateLimiterConfig,
    RetryConfig, Route, TimeoutConfig, Traffic,
};
pub use signal::{Actuator, Behavior, Signal, SignalError, SignalParams};
pub use table::{Registry, RequestHead, RouteMatch, Table};
