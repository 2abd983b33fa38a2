//! Scheduling of monitor probes.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::catalog::{CatalogError, RouteStore};
use crate::monitor::probe::{probe, MonitorLogStore};
use crate::secrets::{decrypt_secrets, SecretCipher};

/// Dependencies shared by every monitor task.
#[derive(Clone)]
struct ProbeContext {
    routes: Arc<dyn RouteStore>,
    cipher: Arc<dyn SecretCipher>,
    client: reqwest::Client,
    logs: Arc<MonitorLogStore>,
}

/// Running monitor tasks keyed by monitor id.
pub struct MonitorRegistry {
    tasks: DashMap<String, JoinHandle<()>>,
    ctx: ProbeContext,
}

impl MonitorRegistry {
    pub fn new(
        routes: Arc<dyn RouteStore>,
        cipher: Arc<dyn SecretCipher>,
        client: reqwest::Client,
        logs: Arc<MonitorLogStore>,
    ) -> Self {
        Self {
            tasks: DashMap::new(),
            ctx: ProbeContext {
                routes,
                cipher,
                client,
                logs,
            },
        }
    }

    pub fn logs(&self) -> &Arc<MonitorLogStore> {
        &self.ctx.logs
    }

    /// Start (or replace) the task probing `id` every `frequency_secs`.
    pub fn start(&self, id: &str, frequency_secs: u64) {
        let ctx = self.ctx.clone();
        let monitor_id = id.to_string();
        let handle = tokio::spawn(run_monitor(ctx, monitor_id, frequency_secs));
        if let Some(previous) = self.tasks.insert(id.to_string(), handle) {
            previous.abort();
        }
        tracing::info!(monitor = %id, frequency_secs, "Monitor started");
    }

    /// Stop the task for `id`; returns whether one was running.
    pub fn stop(&self, id: &str) -> bool {
        match self.tasks.remove(id) {
            Some((_, handle)) => {
                handle.abort();
                tracing::info!(monitor = %id, "Monitor stopped");
                true
            }
            None => false,
        }
    }

    /// Re-read the monitor's definition and restart it.
    ///
    /// Returns `false` (and stops any stale task) when the monitor is gone.
    pub async fn restart(&self, id: &str) -> Result<bool, CatalogError> {
        match self.ctx.routes.find_monitor(id).await? {
            Some((monitor, _)) => {
                self.start(&monitor.id, monitor.frequency_secs);
                Ok(true)
            }
            None => {
                self.stop(id);
                Ok(false)
            }
        }
    }

    /// Stop everything, then start every monitor in the store.
    pub async fn start_all(&self) -> Result<usize, CatalogError> {
        self.shutdown();
        let monitors = self.ctx.routes.monitors().await?;
        for monitor in &monitors {
            self.start(&monitor.id, monitor.frequency_secs);
        }
        tracing::info!(count = monitors.len(), "Monitors scheduled");
        Ok(monitors.len())
    }

    pub fn shutdown(&self) {
        let ids: Vec<String> = self.tasks.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, handle)) = self.tasks.remove(&id) {
                handle.abort();
            }
        }
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.tasks.get(id).is_some_and(|h| !h.is_finished())
    }

    pub fn running(&self) -> usize {
        self.tasks.iter().filter(|h| !h.is_finished()).count()
    }
}

impl Drop for MonitorRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_monitor(ctx: ProbeContext, id: String, frequency_secs: u64) {
    let period = Duration::from_secs(frequency_secs.max(1));
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let (monitor, secrets) = match ctx.routes.find_monitor(&id).await {
            Ok(Some(found)) => found,
            Ok(None) => {
                tracing::info!(monitor = %id, "Monitor removed from catalog, stopping");
                return;
            }
            Err(e) => {
                tracing::warn!(monitor = %id, error = %e, "Failed to load monitor");
                continue;
            }
        };
        let secrets = match decrypt_secrets(ctx.cipher.as_ref(), &secrets) {
            Ok(secrets) => secrets,
            Err(e) => {
                tracing::error!(monitor = %id, error = %e, "Failed to decrypt monitor secrets");
                continue;
            }
        };

        let log = probe(&ctx.client, &monitor, &secrets).await;
        ctx.logs.push(&id, log);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{parse_catalog, MemoryRouteStore};
    use crate::secrets::PlaintextCipher;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn status_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = socket.read(&mut buf).await;
                    let _ = socket
                        .write_all(b"HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n")
                        .await;
                });
            }
        });
        format!("http://{}", addr)
    }

    fn registry(url: &str) -> MonitorRegistry {
        let catalog = parse_catalog(&format!(
            r#"
            [[projects]]
            id = "p1"

            [[monitors]]
            id = "m1"
            project_id = "p1"
            api_url = "{}/health"
            frequency_secs = 1
            "#,
            url
        ))
        .unwrap();
        let client = reqwest::Client::builder().no_proxy().build().unwrap();
        MonitorRegistry::new(
            Arc::new(MemoryRouteStore::from_catalog(catalog)),
            Arc::new(PlaintextCipher),
            client,
            Arc::new(MonitorLogStore::new()),
        )
    }

    #[tokio::test]
    async fn test_monitor_probes_on_interval() {
        let url = status_server().await;
        let registry = registry(&url);
        assert_eq!(registry.start_all().await.unwrap(), 1);
        assert!(registry.is_running("m1"));

        tokio::time::sleep(Duration::from_millis(2500)).await;
        let logs = registry.logs().recent("m1");
        assert!(!logs.is_empty());
        assert_eq!(logs[0].status, 204);

        assert!(registry.stop("m1"));
        assert!(!registry.is_running("m1"));
        assert!(!registry.stop("m1"));
    }

    #[tokio::test]
    async fn test_restart_unknown_monitor() {
        let registry = registry("http://127.0.0.1:9");
        assert!(!registry.restart("nope").await.unwrap());
        assert!(registry.restart("m1").await.unwrap());
        assert_eq!(registry.running(), 1);
        registry.shutdown();
        assert_eq!(registry.running(), 0);
    }
}
