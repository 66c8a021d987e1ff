//! Weighted random load balancing policy

use super::{get_healthy_worker_indices, LoadBalancingPolicy};
use crate::core::Worker;
use rand::Rng;
use std::sync::Arc;

/// Random selection proportional to each healthy worker's static weight
#[derive(Debug, Default)]
pub struct WeightedPolicy;

impl WeightedPolicy {
    pub fn new() -> Self {
        Self
    }

    /// Walk `healthy_indices` accumulating weight and return the first worker
    /// whose cumulative weight exceeds `target`.
    fn pick(workers: &[Arc<dyn Worker>], healthy_indices: &[usize], target: f64) -> Option<usize> {
        let mut cumulative = 0.0;
        for &idx in healthy_indices {
            cumulative += workers[idx].weight();
            if cumulative > target {
                return Some(idx);
            }
        }
        None
    }
}

impl LoadBalancingPolicy for WeightedPolicy {
    fn select_worker(&self, workers: &[Arc<dyn Worker>]) -> Option<usize> {
        let healthy_indices = get_healthy_worker_indices(workers);
        let last = *healthy_indices.last()?;

        let total_weight: f64 = healthy_indices.iter().map(|&idx| workers[idx].weight()).sum();
        if !total_weight.is_finite() || total_weight <= 0.0 {
            return Some(last);
        }

        let target = rand::rng().random_range(0.0..total_weight);
        // Rounding can leave the walk short of the target
        Some(Self::pick(workers, &healthy_indices, target).unwrap_or(last))
    }

    fn name(&self) -> &'static str {
        "weighted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::BasicWorker;

    fn weighted_workers(weights: &[f64]) -> Vec<Arc<dyn Worker>> {
        weights
            .iter()
            .enumerate()
            .map(|(i, &weight)| {
                Arc::new(BasicWorker::new(format!("http://w{}:11434", i + 1)).with_weight(weight))
                    as Arc<dyn Worker>
            })
            .collect()
    }

    #[test]
    fn test_weighted_distribution() {
        let policy = WeightedPolicy::new();
        let workers = weighted_workers(&[1.0, 3.0]);

        let mut counts = [0usize; 2];
        for _ in 0..10_000 {
            counts[policy.select_worker(&workers).unwrap()] += 1;
        }

        let ratio = counts[1] as f64 / counts[0] as f64;
        assert!(
            (2.6..=3.5).contains(&ratio),
            "expected ~3x, got {} ({:?})",
            ratio,
            counts
        );
    }

    #[test]
    fn test_pick_walks_cumulative_weight() {
        let workers = weighted_workers(&[1.0, 3.0, 2.0]);
        let healthy = vec![0, 1, 2];

        assert_eq!(WeightedPolicy::pick(&workers, &healthy, 0.0), Some(0));
        assert_eq!(WeightedPolicy::pick(&workers, &healthy, 0.99), Some(0));
        assert_eq!(WeightedPolicy::pick(&workers, &healthy, 1.0), Some(1));
        assert_eq!(WeightedPolicy::pick(&workers, &healthy, 3.99), Some(1));
        assert_eq!(WeightedPolicy::pick(&workers, &healthy, 4.0), Some(2));
        assert_eq!(WeightedPolicy::pick(&workers, &healthy, 6.0), None);
    }

    #[test]
    fn test_weighted_only_picks_healthy() {
        let policy = WeightedPolicy::new();
        let workers = weighted_workers(&[100.0, 1.0]);
        workers[0].set_healthy(false);

        for _ in 0..50 {
            assert_eq!(policy.select_worker(&workers), Some(1));
        }
    }

    #[test]
    fn test_weighted_falls_back_to_last_healthy() {
        let policy = WeightedPolicy::new();
        let workers = weighted_workers(&[0.0, 0.0, 0.0]);
        workers[2].set_healthy(false);

        assert_eq!(policy.select_worker(&workers), Some(1));
    }

    #[test]
    fn test_weighted_none_when_all_unhealthy() {
        let policy = WeightedPolicy::new();
        let workers = weighted_workers(&[1.0]);
        workers[0].set_healthy(false);

        assert_eq!(policy.select_worker(&workers), None);
    }
}
