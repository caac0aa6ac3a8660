pub mod access_log;
pub mod http_client;
pub mod route_provider;
