//! Catalog file watcher for hot reload.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::catalog::{load_catalog, Catalog};

/// Monitors the catalog file and emits each successfully loaded version.
pub struct CatalogWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<Catalog>,
}

impl CatalogWatcher {
    /// Returns the watcher and a receiver for catalog updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<Catalog>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (
            Self {
                path: path.to_path_buf(),
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching on notify's background thread.
    ///
    /// The returned watcher must be kept alive for events to keep flowing.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.update_tx.clone();
        let path = self.path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if event.kind.is_modify() || event.kind.is_create() {
                        tracing::info!(path = ?path, "Catalog change detected, reloading");
                        match load_catalog(&path) {
                            Ok(catalog) => {
                                let _ = tx.send(catalog);
                            }
                            Err(e) => {
                                tracing::error!(
                                    error = %e,
                                    "Failed to reload catalog, keeping current routes"
                                );
                            }
                        }
                    }
                }
                Err(e) => tracing::error!(error = ?e, "Catalog watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Catalog watcher started");
        Ok(watcher)
    }
}
