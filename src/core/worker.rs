use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Deserialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{WorkerError, WorkerResult};
use crate::metrics::RouterMetrics;

/// Core worker abstraction that represents one backend inference instance
#[async_trait]
pub trait Worker: Send + Sync + fmt::Debug {
    /// Base URL of the instance, also its identity in the registry
    fn url(&self) -> &str;

    /// Static weight used by the weighted policy
    fn weight(&self) -> f64;

    /// Result of the most recent probe
    fn is_healthy(&self) -> bool;

    fn set_healthy(&self, healthy: bool);

    /// Probe the instance and update health, models and last check time.
    ///
    /// Never leaves the worker in a half-updated state: on failure only the
    /// health flag changes.
    async fn check_health_async(&self, client: &reqwest::Client) -> WorkerResult<()>;

    /// Number of in-flight requests
    fn load(&self) -> usize;

    fn increment_load(&self);

    fn decrement_load(&self);

    /// Cumulative number of completed requests
    fn processed_requests(&self) -> u64;

    /// Cumulative approximate token count
    fn total_tokens(&self) -> u64;

    /// Cumulative latency of completed requests
    fn total_latency(&self) -> Duration;

    /// Record a completed request
    fn record_completion(&self, tokens: u64, latency: Duration);

    /// Models reported by the last successful probe
    fn models(&self) -> Vec<String>;

    fn set_models(&self, models: Vec<String>);

    /// Time of the last successful probe
    fn last_health_check(&self) -> Option<DateTime<Utc>>;

    /// Full URL for a backend route
    fn endpoint_url(&self, route: &str) -> String {
        format!("{}{}", self.url(), route)
    }

    fn average_latency(&self) -> Option<Duration> {
        let processed = self.processed_requests();
        if processed == 0 {
            return None;
        }
        let nanos = self.total_latency().as_nanos() / processed as u128;
        Some(Duration::from_nanos(nanos.min(u64::MAX as u128) as u64))
    }
}

/// Health check configuration
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Timeout for health checks in seconds
    pub timeout_secs: u64,
    /// Interval between health checks in seconds
    pub check_interval_secs: u64,
    /// Health check endpoint path
    pub endpoint: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 5,
            check_interval_secs: 30,
            endpoint: "/api/tags".to_string(),
        }
    }
}

/// Static metadata associated with a worker
#[derive(Debug, Clone)]
pub struct WorkerMetadata {
    pub url: String,
    pub weight: f64,
    pub health_config: HealthConfig,
}

/// Body of the capability endpoint (`/api/tags`)
#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    model: Option<String>,
}

/// Basic worker implementation
pub struct BasicWorker {
    pub metadata: WorkerMetadata,
    load_counter: AtomicUsize,
    processed_counter: AtomicU64,
    token_counter: AtomicU64,
    latency_micros: AtomicU64,
    healthy: AtomicBool,
    models: RwLock<Vec<String>>,
    last_health_check: RwLock<Option<DateTime<Utc>>>,
}

impl fmt::Debug for BasicWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicWorker")
            .field("metadata", &self.metadata)
            .field("healthy", &self.healthy.load(Ordering::Relaxed))
            .field("load", &self.load_counter.load(Ordering::Relaxed))
            .finish()
    }
}

impl BasicWorker {
    pub fn new(url: String) -> Self {
        Self {
            metadata: WorkerMetadata {
                url: url.trim_end_matches('/').to_string(),
                weight: 1.0,
                health_config: HealthConfig::default(),
            },
            load_counter: AtomicUsize::new(0),
            processed_counter: AtomicU64::new(0),
            token_counter: AtomicU64::new(0),
            latency_micros: AtomicU64::new(0),
            healthy: AtomicBool::new(true),
            models: RwLock::new(Vec::new()),
            last_health_check: RwLock::new(None),
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.metadata.weight = weight;
        self
    }

    pub fn with_health_config(mut self, config: HealthConfig) -> Self {
        self.metadata.health_config = config;
        self
    }

    async fn http_health_check(&self, client: &reqwest::Client) -> WorkerResult<Vec<String>> {
        let config = &self.metadata.health_config;
        let health_url = self.endpoint_url(&config.endpoint);
        let failed = |reason: String| WorkerError::HealthCheckFailed {
            url: self.metadata.url.clone(),
            reason,
        };

        let response = client
            .get(&health_url)
            .timeout(Duration::from_secs(config.timeout_secs))
            .send()
            .await
            .map_err(|e| failed(format!("request error: {}", e)))?;

        if !response.status().is_success() {
            return Err(failed(format!("status: {}", response.status())));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| failed(format!("failed to read body: {}", e)))?;
        let tags: TagsResponse = serde_json::from_slice(&body)
            .map_err(|e| failed(format!("malformed body: {}", e)))?;

        Ok(tags
            .models
            .into_iter()
            .filter_map(|tag| tag.name.or(tag.model))
            .collect())
    }

    fn update_running_requests_metrics(&self) {
        RouterMetrics::set_running_requests(self.url(), self.load());
    }
}

#[async_trait]
impl Worker for BasicWorker {
    fn url(&self) -> &str {
        &self.metadata.url
    }

    fn weight(&self) -> f64 {
        self.metadata.weight
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Release);
        RouterMetrics::set_worker_health(self.url(), healthy);
    }

    async fn check_health_async(&self, client: &reqwest::Client) -> WorkerResult<()> {
        let was_healthy = self.is_healthy();

        match self.http_health_check(client).await {
            Ok(models) => {
                self.set_models(models);
                *self.last_health_check.write() = Some(Utc::now());
                self.set_healthy(true);
                RouterMetrics::record_health_check(self.url(), true);
                if !was_healthy {
                    info!(worker_url = %self.url(), "Worker recovered and is healthy again");
                }
                Ok(())
            }
            Err(e) => {
                self.set_healthy(false);
                RouterMetrics::record_health_check(self.url(), false);
                if was_healthy {
                    warn!(worker_url = %self.url(), error = %e, "Worker marked unhealthy");
                } else {
                    debug!(worker_url = %self.url(), error = %e, "Worker still unhealthy");
                }
                Err(e)
            }
        }
    }

    fn load(&self) -> usize {
        self.load_counter.load(Ordering::Relaxed)
    }

    fn increment_load(&self) {
        self.load_counter.fetch_add(1, Ordering::Relaxed);
        self.update_running_requests_metrics();
    }

    fn decrement_load(&self) {
        if self
            .load_counter
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                current.checked_sub(1)
            })
            .is_err()
        {
            warn!(
                worker_url = %self.metadata.url,
                "Attempted to decrement load counter that is already at 0"
            );
        }
        self.update_running_requests_metrics();
    }

    fn processed_requests(&self) -> u64 {
        self.processed_counter.load(Ordering::Relaxed)
    }

    fn total_tokens(&self) -> u64 {
        self.token_counter.load(Ordering::Relaxed)
    }

    fn total_latency(&self) -> Duration {
        Duration::from_micros(self.latency_micros.load(Ordering::Relaxed))
    }

    fn record_completion(&self, tokens: u64, latency: Duration) {
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.processed_counter.fetch_add(1, Ordering::Relaxed);
        self.token_counter.fetch_add(tokens, Ordering::Relaxed);
        self.latency_micros.fetch_add(micros, Ordering::Relaxed);
        RouterMetrics::record_processed_request(self.url());
        RouterMetrics::record_tokens(self.url(), tokens);
    }

    fn models(&self) -> Vec<String> {
        self.models.read().clone()
    }

    fn set_models(&self, models: Vec<String>) {
        *self.models.write() = models;
    }

    fn last_health_check(&self) -> Option<DateTime<Utc>> {
        *self.last_health_check.read()
    }
}

/// RAII guard for worker load management
///
/// Increments the worker's load on creation and decrements it exactly once
/// when dropped, whichever way the request ends. Streaming responses keep the
/// guard inside the response body so the slot lives as long as the stream.
pub struct WorkerLoadGuard {
    worker: Arc<dyn Worker>,
}

impl WorkerLoadGuard {
    pub fn new(worker: Arc<dyn Worker>) -> Self {
        worker.increment_load();
        Self { worker }
    }

    pub fn worker(&self) -> &Arc<dyn Worker> {
        &self.worker
    }
}

impl Drop for WorkerLoadGuard {
    fn drop(&mut self) {
        self.worker.decrement_load();
    }
}

impl fmt::Debug for WorkerLoadGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerLoadGuard")
            .field("worker", &self.worker.url())
            .finish()
    }
}
