use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tracing::{error, info};

use crate::config::MetricsConfig;

#[derive(Debug, Clone)]
pub struct PrometheusConfig {
    pub port: u16,
    pub host: String,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            port: 29000,
            host: "127.0.0.1".to_string(),
        }
    }
}

impl From<&MetricsConfig> for PrometheusConfig {
    fn from(config: &MetricsConfig) -> Self {
        Self {
            port: config.port,
            host: config.host.clone(),
        }
    }
}

pub fn init_metrics() {
    describe_counter!(
        "ollama_router_requests_total",
        "Total number of requests forwarded by route"
    );
    describe_counter!(
        "ollama_router_request_errors_total",
        "Total number of request errors by route and error type"
    );
    describe_histogram!(
        "ollama_router_request_duration_seconds",
        "End-to-end request duration by route"
    );
    describe_counter!(
        "ollama_router_tokens_total",
        "Approximate generated tokens by instance"
    );
    describe_gauge!(
        "ollama_router_running_requests",
        "Number of in-flight requests per instance"
    );
    describe_counter!(
        "ollama_router_processed_requests_total",
        "Total completed requests per instance"
    );
    describe_gauge!(
        "ollama_router_worker_health",
        "Instance health (1 = healthy, 0 = unhealthy)"
    );
    describe_gauge!(
        "ollama_router_healthy_workers",
        "Number of healthy instances after the last probe round"
    );
    describe_counter!(
        "ollama_router_health_checks_total",
        "Health probes by instance and outcome"
    );
    describe_counter!(
        "ollama_router_stream_aborted_total",
        "Streams that ended before completion by route and cause"
    );
}

pub fn start_prometheus(config: PrometheusConfig) {
    init_metrics();

    let duration_matcher = Matcher::Suffix(String::from("duration_seconds"));
    let duration_bucket = [
        0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 15.0, 30.0, 45.0, 60.0, 90.0, 120.0, 180.0, 240.0,
        300.0,
    ];

    let ip_addr: IpAddr = config
        .host
        .parse()
        .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
    let socket_addr = SocketAddr::new(ip_addr, config.port);

    let builder = match PrometheusBuilder::new()
        .with_http_listener(socket_addr)
        .upkeep_timeout(Duration::from_secs(5 * 60))
        .set_buckets_for_metric(duration_matcher, &duration_bucket)
    {
        Ok(builder) => builder,
        Err(e) => {
            error!("Failed to configure prometheus buckets: {}", e);
            return;
        }
    };

    match builder.install() {
        Ok(()) => info!("Prometheus exporter listening on {}", socket_addr),
        Err(e) => error!("Failed to install prometheus exporter: {}", e),
    }
}

pub struct RouterMetrics;

impl RouterMetrics {
    pub fn record_request(route: &str) {
        counter!("ollama_router_requests_total", "route" => route.to_string()).increment(1);
    }

    pub fn record_request_error(route: &str, error_type: &str) {
        counter!("ollama_router_request_errors_total",
            "route" => route.to_string(),
            "error_type" => error_type.to_string()
        )
        .increment(1);
    }

    pub fn record_request_duration(route: &str, duration: Duration) {
        histogram!("ollama_router_request_duration_seconds", "route" => route.to_string())
            .record(duration.as_secs_f64());
    }

    pub fn record_tokens(worker: &str, tokens: u64) {
        counter!("ollama_router_tokens_total", "worker" => worker.to_string()).increment(tokens);
    }

    pub fn record_processed_request(worker: &str) {
        counter!("ollama_router_processed_requests_total", "worker" => worker.to_string())
            .increment(1);
    }

    pub fn set_running_requests(worker: &str, count: usize) {
        gauge!("ollama_router_running_requests", "worker" => worker.to_string()).set(count as f64);
    }

    pub fn set_worker_health(worker: &str, healthy: bool) {
        gauge!("ollama_router_worker_health", "worker" => worker.to_string())
            .set(if healthy { 1.0 } else { 0.0 });
    }

    pub fn set_healthy_workers(count: usize) {
        gauge!("ollama_router_healthy_workers").set(count as f64);
    }

    pub fn record_health_check(worker: &str, success: bool) {
        counter!("ollama_router_health_checks_total",
            "worker" => worker.to_string(),
            "outcome" => if success { "success" } else { "failure" }
        )
        .increment(1);
    }

    pub fn record_stream_aborted(route: &str, cause: &str) {
        counter!("ollama_router_stream_aborted_total",
            "route" => route.to_string(),
            "cause" => cause.to_string()
        )
        .increment(1);
    }
}
