//! Round-robin load balancing policy

use super::{get_healthy_worker_indices, LoadBalancingPolicy};
use crate::core::Worker;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Round-robin selection over the current healthy set
///
/// The cursor is shared and only ever advances; it is taken modulo the size of
/// the healthy set at selection time, so a position is not tied to a specific
/// worker once workers change health.
#[derive(Debug, Default)]
pub struct RoundRobinPolicy {
    counter: AtomicUsize,
}

impl RoundRobinPolicy {
    pub fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }
}

impl LoadBalancingPolicy for RoundRobinPolicy {
    fn select_worker(&self, workers: &[Arc<dyn Worker>]) -> Option<usize> {
        let healthy_indices = get_healthy_worker_indices(workers);
        if healthy_indices.is_empty() {
            return None;
        }

        // fetch_add wraps at usize::MAX
        let count = self.counter.fetch_add(1, Ordering::Relaxed);
        Some(healthy_indices[count % healthy_indices.len()])
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }

    fn reset(&self) {
        self.counter.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policies::create_test_workers;
    use std::collections::HashSet;

    #[test]
    fn test_round_robin_selection() {
        let policy = RoundRobinPolicy::new();
        let workers = create_test_workers(3);

        assert_eq!(policy.select_worker(&workers), Some(0));
        assert_eq!(policy.select_worker(&workers), Some(1));
        assert_eq!(policy.select_worker(&workers), Some(2));
        assert_eq!(policy.select_worker(&workers), Some(0));
    }

    #[test]
    fn test_round_robin_covers_all_workers_once() {
        let policy = RoundRobinPolicy::new();
        let workers = create_test_workers(5);

        // Start from an arbitrary cursor position
        policy.select_worker(&workers);
        policy.select_worker(&workers);

        let picked: HashSet<usize> = (0..5)
            .map(|_| policy.select_worker(&workers).unwrap())
            .collect();
        assert_eq!(picked.len(), 5);
    }

    #[test]
    fn test_round_robin_skips_unhealthy() {
        let policy = RoundRobinPolicy::new();
        let workers = create_test_workers(3);
        workers[1].set_healthy(false);

        let picks: Vec<usize> = (0..4)
            .map(|_| policy.select_worker(&workers).unwrap())
            .collect();
        assert_eq!(picks, vec![0, 2, 0, 2]);
    }

    #[test]
    fn test_round_robin_none_when_all_unhealthy() {
        let policy = RoundRobinPolicy::new();
        let workers = create_test_workers(2);
        for worker in &workers {
            worker.set_healthy(false);
        }

        assert_eq!(policy.select_worker(&workers), None);
    }

    #[test]
    fn test_round_robin_reset() {
        let policy = RoundRobinPolicy::new();
        let workers = create_test_workers(3);

        policy.select_worker(&workers);
        policy.select_worker(&workers);
        policy.reset();
        assert_eq!(policy.select_worker(&workers), Some(0));
    }

    #[test]
    fn test_round_robin_concurrent_selection_is_fair() {
        let policy = Arc::new(RoundRobinPolicy::new());
        let workers = Arc::new(create_test_workers(4));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let policy = Arc::clone(&policy);
                let workers = Arc::clone(&workers);
                std::thread::spawn(move || {
                    let mut counts = [0usize; 4];
                    for _ in 0..1000 {
                        counts[policy.select_worker(&workers).unwrap()] += 1;
                    }
                    counts
                })
            })
            .collect();

        let mut totals = [0usize; 4];
        for handle in handles {
            for (total, count) in totals.iter_mut().zip(handle.join().unwrap()) {
                *total += count;
            }
        }

        // 8000 atomic increments over 4 workers land exactly evenly
        assert_eq!(totals, [2000; 4]);
    }
}
