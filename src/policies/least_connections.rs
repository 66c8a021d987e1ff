//! Least-connections load balancing policy

use super::{get_healthy_worker_indices, LoadBalancingPolicy};
use crate::core::Worker;
use std::sync::Arc;

/// Picks the healthy worker with the fewest in-flight requests
///
/// Ties go to the worker that comes first in registry order.
#[derive(Debug, Default)]
pub struct LeastConnectionsPolicy;

impl LeastConnectionsPolicy {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancingPolicy for LeastConnectionsPolicy {
    fn select_worker(&self, workers: &[Arc<dyn Worker>]) -> Option<usize> {
        // min_by_key keeps the first of equal minima
        get_healthy_worker_indices(workers)
            .into_iter()
            .min_by_key(|&idx| workers[idx].load())
    }

    fn name(&self) -> &'static str {
        "least_connections"
    }
}
