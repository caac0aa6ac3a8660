use async_trait::async_trait;
use eyre::Result;
use tokio::sync::mpsc;

use crate::config::models::ControlConfig;

/// Trait for route configuration sources that can load and watch for changes.
#[async_trait]
pub trait RouteProvider: Send + Sync {
    /// Load the current route configuration.
    async fn load_config(&self) -> Result<ControlConfig>;

    /// Return a channel that signals when the configuration has changed.
    /// The receiver should trigger a reload by calling `load_config`.
    fn watch(&self) -> mpsc::Receiver<()>;
}
