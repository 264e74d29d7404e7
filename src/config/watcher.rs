//! Endpoint hot reload.
//!
//! Watches the configuration file and publishes the endpoint set whenever it
//! changes. Other sections are only read at startup.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::EndpointConfig;

/// A watcher that monitors the configuration file for endpoint changes.
pub struct ConfigWatcher {
    path: PathBuf,
    current: Vec<EndpointConfig>,
    update_tx: mpsc::UnboundedSender<Vec<EndpointConfig>>,
}

impl ConfigWatcher {
    /// Create a new watcher seeded with the endpoint set already in use.
    ///
    /// Returns the watcher and a receiver for endpoint updates.
    pub fn new(
        path: &Path,
        current: Vec<EndpointConfig>,
    ) -> (Self, mpsc::UnboundedReceiver<Vec<EndpointConfig>>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        (
            Self {
                path: path.to_path_buf(),
                current,
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching the file. The returned handle must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.update_tx;
        let path = self.path.clone();
        let last = Mutex::new(self.current);

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    match load_config(&path) {
                        Ok(config) => {
                            let mut last = match last.lock() {
                                Ok(guard) => guard,
                                Err(poisoned) => poisoned.into_inner(),
                            };
                            if *last == config.endpoints {
                                tracing::debug!("Config file touched, endpoints unchanged");
                                return;
                            }
                            tracing::info!(
                                endpoints = config.endpoints.len(),
                                "Endpoint configuration changed, reloading"
                            );
                            *last = config.endpoints.clone();
                            let _ = tx.send(config.endpoints);
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to reload config, keeping current endpoints");
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;
        tracing::info!(path = ?self.path, "Config watcher started");
        Ok(watcher)
    }
}
