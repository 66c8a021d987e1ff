//! Worker registry
//!
//! Ordered, URL-unique set of backend instances built once at startup and
//! shared between the health checker and request routing.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::{Worker, WorkerError, WorkerResult};
use crate::metrics::RouterMetrics;

/// Registry of all backend instances, in configuration order
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    workers: Vec<Arc<dyn Worker>>,
    url_index: HashMap<String, usize>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker; URLs must be unique
    pub fn register(&mut self, worker: Arc<dyn Worker>) -> WorkerResult<()> {
        let url = worker.url().to_string();
        if self.url_index.contains_key(&url) {
            return Err(WorkerError::DuplicateWorker { url });
        }
        self.url_index.insert(url, self.workers.len());
        self.workers.push(worker);
        Ok(())
    }

    /// All workers in registry order
    pub fn get_all(&self) -> &[Arc<dyn Worker>] {
        &self.workers
    }

    pub fn get_by_url(&self, url: &str) -> Option<Arc<dyn Worker>> {
        self.url_index
            .get(url.trim_end_matches('/'))
            .map(|&idx| self.workers[idx].clone())
    }

    /// Workers whose most recent probe succeeded, in registry order
    pub fn get_healthy(&self) -> Vec<Arc<dyn Worker>> {
        self.workers
            .iter()
            .filter(|w| w.is_healthy())
            .cloned()
            .collect()
    }

    pub fn healthy_count(&self) -> usize {
        self.workers.iter().filter(|w| w.is_healthy()).count()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Probe every worker concurrently and return the number of healthy ones.
    ///
    /// Each probe is bounded by its own timeout, so one unreachable instance
    /// cannot hold up the others.
    pub async fn check_all_health(&self, client: &reqwest::Client) -> usize {
        let checks = self
            .workers
            .iter()
            .map(|worker| worker.check_health_async(client));
        let results = futures::future::join_all(checks).await;

        let failed = results.iter().filter(|r| r.is_err()).count();
        let healthy = self.healthy_count();
        RouterMetrics::set_healthy_workers(healthy);
        debug!(
            "Health check round complete: {} healthy, {} failed probes, {} total",
            healthy,
            failed,
            self.workers.len()
        );
        healthy
    }

    /// Spawn the periodic health check loop.
    ///
    /// The loop sleeps first: callers run [`check_all_health`](Self::check_all_health)
    /// once before serving traffic.
    pub fn start_health_checker(
        self: &Arc<Self>,
        client: reqwest::Client,
        check_interval_secs: u64,
    ) -> HealthChecker {
        let registry = Arc::clone(self);
        let shutdown = Arc::new(Notify::new());
        let shutdown_signal = Arc::clone(&shutdown);
        let interval = Duration::from_secs(check_interval_secs);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shutdown_signal.notified() => {
                        info!("Health checker shutting down");
                        break;
                    }
                }
                registry.check_all_health(&client).await;
            }
        });

        HealthChecker { handle, shutdown }
    }
}

/// Health checker handle with graceful shutdown
pub struct HealthChecker {
    handle: JoinHandle<()>,
    shutdown: Arc<Notify>,
}

impl fmt::Debug for HealthChecker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HealthChecker")
            .field("finished", &self.handle.is_finished())
            .finish()
    }
}

impl HealthChecker {
    /// Stop the loop and wait for the in-flight probe round, if any
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        let _ = self.handle.await;
    }
}
