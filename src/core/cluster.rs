//! Cluster manager
//!
//! Owns the worker registry, the selection policy and the shared HTTP client.
//! The request path only reaches workers through [`ClusterManager::get_instance`]
//! and [`ClusterManager::update_stats`]; the health checker only through
//! [`ClusterManager::check_health`] and the background loop.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info};

use super::{
    BasicWorker, HealthChecker, HealthConfig, Worker, WorkerRegistry, WorkerResult,
};
use crate::config::RouterConfig;
use crate::policies::{LoadBalancingPolicy, PolicyFactory};

/// Outcome of instance selection
#[derive(Debug, Clone)]
pub enum Selection {
    Selected(Arc<dyn Worker>),
    Unavailable,
}


/// Read-only projection of one instance
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub url: String,
    pub healthy: bool,
    pub weight: f64,
    pub active_connections: usize,
    pub total_requests: u64,
    pub total_tokens: u64,
    pub average_latency_ms: Option<f64>,
    pub last_health_check: Option<String>,
    pub models: Vec<String>,
}

/// Read-only projection of the whole cluster
#[derive(Debug, Clone, Serialize)]
pub struct ClusterStatus {
    pub status: &'static str,
    pub strategy: &'static str,
    pub total_instances: usize,
    pub healthy_instances: usize,
    pub instances: Vec<WorkerStatus>,
}

#[derive(Debug)]
pub struct ClusterManager {
    registry: Arc<WorkerRegistry>,
    policy: Arc<dyn LoadBalancingPolicy>,
    client: Client,
    check_interval_secs: u64,
}

impl ClusterManager {
    pub fn new(
        registry: WorkerRegistry,
        policy: Arc<dyn LoadBalancingPolicy>,
        client: Client,
        check_interval_secs: u64,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            policy,
            client,
            check_interval_secs,
        }
    }

    /// Build the registry and policy from configuration
    pub fn from_config(config: &RouterConfig, client: Client) -> WorkerResult<Self> {
        let health_config = HealthConfig {
            timeout_secs: config.health_check.timeout_secs,
            check_interval_secs: config.health_check.check_interval_secs,
            endpoint: config.health_check.endpoint.clone(),
        };

        let mut registry = WorkerRegistry::new();
        for spec in &config.workers {
            let worker = BasicWorker::new(spec.url.clone())
                .with_weight(spec.weight)
                .with_health_config(health_config.clone());
            registry.register(Arc::new(worker))?;
        }

        let policy = PolicyFactory::create_from_config(&config.policy);
        info!(
            "Cluster configured with {} instances, policy: {}",
            registry.len(),
            policy.name()
        );

        Ok(Self::new(
            registry,
            policy,
            client,
            config.health_check.check_interval_secs,
        ))
    }

    /// Pick one healthy instance with the configured policy
    pub fn get_instance(&self) -> Selection {
        let workers = self.registry.get_all();
        match self.policy.select_worker(workers) {
            Some(idx) => {
                let worker = workers[idx].clone();
                debug!(
                    worker_url = %worker.url(),
                    policy = self.policy.name(),
                    "Selected worker"
                );
                Selection::Selected(worker)
            }
            None => Selection::Unavailable,
        }
    }

    /// Record a completed request against an instance
    pub fn update_stats(&self, worker: &dyn Worker, tokens: u64, latency: Duration) {
        worker.record_completion(tokens, latency);
    }

    /// Run one probe round over every instance
    pub async fn check_health(&self) -> usize {
        self.registry.check_all_health(&self.client).await
    }

    /// Start the background probe loop
    pub fn start_health_checker(&self) -> HealthChecker {
        self.registry
            .start_health_checker(self.client.clone(), self.check_interval_secs)
    }

    pub fn has_healthy_workers(&self) -> bool {
        self.registry.healthy_count() > 0
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    pub fn policy(&self) -> &Arc<dyn LoadBalancingPolicy> {
        &self.policy
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn worker_urls(&self) -> Vec<String> {
        self.registry
            .get_all()
            .iter()
            .map(|w| w.url().to_string())
            .collect()
    }

    /// Sorted union of model names over healthy instances
    pub fn available_models(&self) -> Vec<String> {
        let mut models: Vec<String> = self
            .registry
            .get_healthy()
            .iter()
            .flat_map(|w| w.models())
            .collect();
        models.sort();
        models.dedup();
        models
    }

    pub fn status(&self) -> ClusterStatus {
        let instances: Vec<WorkerStatus> = self
            .registry
            .get_all()
            .iter()
            .map(|w| worker_to_status(w.as_ref()))
            .collect();
        let healthy_instances = instances.iter().filter(|w| w.healthy).count();

        ClusterStatus {
            status: if healthy_instances > 0 {
                "healthy"
            } else {
                "unhealthy"
            },
            strategy: self.policy.name(),
            total_instances: instances.len(),
            healthy_instances,
            instances,
        }
    }
}

/// Helper to convert a worker into its status projection
pub fn worker_to_status(worker: &dyn Worker) -> WorkerStatus {
    WorkerStatus {
        url: worker.url().to_string(),
        healthy: worker.is_healthy(),
        weight: worker.weight(),
        active_connections: worker.load(),
        total_requests: worker.processed_requests(),
        total_tokens: worker.total_tokens(),
        average_latency_ms: worker
            .average_latency()
            .map(|d| d.as_micros() as f64 / 1000.0),
        last_health_check: worker
            .last_health_check()
            .map(|t| t.to_rfc3339()),
        models: worker.models(),
    }
}
