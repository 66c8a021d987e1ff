pub mod config;
pub mod core;
pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod policies;
pub mod routers;
pub mod server;
pub mod types;

pub use config::RouterConfig;
pub use core::{ClusterManager, ClusterStatus, Selection};
pub use server::startup;
