//! Load balancing policies for the Ollama router
//!
//! Every policy sees the whole registry in configuration order and is
//! responsible for restricting its choice to healthy workers. A policy returns
//! `None` only when no worker is healthy.

use crate::core::Worker;
use std::fmt::Debug;
use std::sync::Arc;

mod factory;
mod least_connections;
mod random;
mod round_robin;
mod weighted;

pub use factory::PolicyFactory;
pub use least_connections::LeastConnectionsPolicy;
pub use random::RandomPolicy;
pub use round_robin::RoundRobinPolicy;
pub use weighted::WeightedPolicy;

/// Core trait for load balancing policies
pub trait LoadBalancingPolicy: Send + Sync + Debug {
    /// Select a single worker from the registry
    ///
    /// Returns the index into `workers` of the chosen worker, or `None` if no
    /// worker is currently healthy.
    fn select_worker(&self, workers: &[Arc<dyn Worker>]) -> Option<usize>;

    /// Get policy name for metrics and debugging
    fn name(&self) -> &'static str;

    /// Reset any internal state
    ///
    /// This is useful for policies that maintain state (e.g., round-robin counters).
    fn reset(&self) {
        // Default: no-op for stateless policies
    }
}

/// Helper function to filter healthy workers and return their indices
pub(crate) fn get_healthy_worker_indices(workers: &[Arc<dyn Worker>]) -> Vec<usize> {
    workers
        .iter()
        .enumerate()
        .filter(|(_, w)| w.is_healthy())
        .map(|(idx, _)| idx)
        .collect()
}

#[cfg(test)]
pub(crate) fn create_test_workers(count: usize) -> Vec<Arc<dyn Worker>> {
    use crate::core::BasicWorker;

    (1..=count)
        .map(|i| {
            Arc::new(BasicWorker::new(format!("http://w{}:11434", i))) as Arc<dyn Worker>
        })
        .collect()
}
