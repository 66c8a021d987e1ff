//! Core abstractions for the router
//!
//! Workers (backend instances), the registry that holds them, the health
//! checker that keeps them current, and the cluster manager that ties the
//! registry to a load balancing policy.

pub mod cluster;
pub mod error;
pub mod worker;
pub mod worker_registry;

pub use cluster::{ClusterManager, ClusterStatus, Selection, WorkerStatus};
pub use error::{WorkerError, WorkerResult};
pub use worker::{BasicWorker, HealthConfig, Worker, WorkerLoadGuard, WorkerMetadata};
pub use worker_registry::{HealthChecker, WorkerRegistry};
