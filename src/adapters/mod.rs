pub mod access_log;
pub mod controlled_client;
pub mod http_client;
pub mod ingress;
pub mod route_providers;
pub mod signal_handler;

/// Re-export commonly used types from adapters
pub use access_log::{MemoryAccessLog, TeeAccessLog, TracingAccessLog};
pub use controlled_client::{ControlledClient, policy_response, status_flag};
pub use http_client::HttpClientAdapter;
pub use ingress::{IngressState, ingress_control};
pub use route_providers::FileRouteProvider;
pub use signal_handler::signal_router;
