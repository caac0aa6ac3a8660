use std::{
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use async_trait::async_trait;
use eyre::{Context, Result};
use notify::{RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::{
    config::{loader::load_config, models::ControlConfig},
    ports::route_provider::RouteProvider,
};

/// Route provider that loads from a local file and watches it for changes.
pub struct FileRouteProvider {
    path: PathBuf,
    // Dropping the watcher stops notifications
    _watcher: Option<notify::RecommendedWatcher>,
    update_tx: mpsc::Sender<()>,
    // Taken once by `watch()`
    update_rx: Mutex<Option<mpsc::Receiver<()>>>,
}

impl FileRouteProvider {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let (tx, rx) = mpsc::channel(1);
        let mut provider = Self {
            path: path.into(),
            _watcher: None,
            update_tx: tx,
            update_rx: Mutex::new(Some(rx)),
        };
        provider.init_watcher()?;
        Ok(provider)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn init_watcher(&mut self) -> Result<()> {
        let tx = self.update_tx.clone();
        let file_name = self
            .path
            .file_name()
            .ok_or_else(|| eyre::eyre!("Invalid route file path: {}", self.path.display()))?
            .to_owned();

        let mut watcher =
            notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
                match res {
                    Ok(event) => {
                        if (event.kind.is_modify()
                            || event.kind.is_create()
                            || event.kind.is_remove())
                            && event
                                .paths
                                .iter()
                                .any(|p| p.file_name() == Some(&file_name))
                        {
                            tracing::debug!("Route file changed: {:?}", event.kind);
                            // A pending notification already covers this change
                            let _ = tx.try_send(());
                        }
                    }
                    Err(e) => tracing::error!("Route file watch error: {:?}", e),
                }
            })?;

        // Watch the directory so editors that replace the file are still seen
        let watch_dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        watcher
            .watch(watch_dir, RecursiveMode::NonRecursive)
            .wrap_err("Failed to watch route file directory")?;

        self._watcher = Some(watcher);
        Ok(())
    }
}

#[async_trait]
impl RouteProvider for FileRouteProvider {
    async fn load_config(&self) -> Result<ControlConfig> {
        let path = self
            .path
            .to_str()
            .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", self.path.display()))?;
        load_config(path).await
    }

    /// The first call gets the live channel; later calls get one that is already closed.
    fn watch(&self) -> mpsc::Receiver<()> {
        let taken = self
            .update_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        taken.unwrap_or_else(|| {
            tracing::warn!("Route file watch channel already taken");
            mpsc::channel(1).1
        })
    }
}
