use anyhow::{Context, Result};
use clap::Parser;
use ollama_router_rs::config::{
    HealthCheckConfig, MetricsConfig, PolicyConfig, RouterConfig, WorkerSpec,
};
use ollama_router_rs::server;

#[derive(Parser, Debug)]
#[command(
    name = "ollama-router",
    version,
    about = "Load-balancing proxy in front of a cluster of Ollama instances"
)]
struct Cli {
    /// Ollama instances, comma separated; each entry is `URL` or `URL=WEIGHT`
    #[arg(
        long,
        env = "OLLAMA_INSTANCES",
        value_delimiter = ',',
        default_value = "http://localhost:11434"
    )]
    instances: Vec<WorkerSpec>,

    /// Load balancing strategy: round_robin, least_connections, random, weighted
    #[arg(long, env = "LOAD_BALANCING_STRATEGY", default_value = "round_robin")]
    strategy: PolicyConfig,

    /// Seconds between health check rounds
    #[arg(long, env = "HEALTH_CHECK_INTERVAL", default_value_t = 30)]
    health_check_interval_secs: u64,

    /// Timeout of a single health probe in seconds
    #[arg(long, default_value_t = 5)]
    health_check_timeout_secs: u64,

    /// Endpoint probed on each instance
    #[arg(long, default_value = "/api/tags")]
    health_check_endpoint: String,

    /// Timeout for non-streaming generation requests in seconds
    #[arg(long, default_value_t = 60)]
    request_timeout_secs: u64,

    /// Idle timeout for streaming generation requests in seconds
    #[arg(long, default_value_t = 300)]
    stream_timeout_secs: u64,

    /// Timeout for establishing backend connections in seconds
    #[arg(long, default_value_t = 10)]
    connect_timeout_secs: u64,

    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "PORT", default_value_t = 8000)]
    port: u16,

    /// Maximum request body size in bytes
    #[arg(long, default_value_t = 256 * 1024 * 1024)]
    max_payload_size: usize,

    /// Allowed CORS origins, comma separated (all when empty)
    #[arg(long, value_delimiter = ',')]
    cors_allowed_origins: Vec<String>,

    /// Log level (error, warn, info, debug, trace); RUST_LOG takes precedence
    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,

    /// Directory for daily rotated log files
    #[arg(long)]
    log_dir: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    /// Host for the Prometheus exporter
    #[arg(long, default_value = "127.0.0.1")]
    prometheus_host: String,

    /// Port for the Prometheus exporter; the exporter is off when unset
    #[arg(long)]
    prometheus_port: Option<u16>,
}

impl Cli {
    fn to_router_config(&self) -> RouterConfig {
        RouterConfig {
            workers: self.instances.clone(),
            policy: self.strategy,
            health_check: HealthCheckConfig {
                timeout_secs: self.health_check_timeout_secs,
                check_interval_secs: self.health_check_interval_secs,
                endpoint: self.health_check_endpoint.clone(),
            },
            host: self.host.clone(),
            port: self.port,
            max_payload_size: self.max_payload_size,
            request_timeout_secs: self.request_timeout_secs,
            stream_timeout_secs: self.stream_timeout_secs,
            connect_timeout_secs: self.connect_timeout_secs,
            cors_allowed_origins: self.cors_allowed_origins.clone(),
            log_dir: self.log_dir.clone(),
            log_level: self.log_level.clone(),
            log_json: self.log_json,
            metrics: self.prometheus_port.map(|port| MetricsConfig {
                host: self.prometheus_host.clone(),
                port,
            }),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config = cli.to_router_config();
    config.validate().context("Invalid router configuration")?;

    server::startup(config)
        .await
        .map_err(|e| anyhow::anyhow!("Router failed: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["ollama-router", "--instances", "http://localhost:11434"])
            .unwrap();
        let config = cli.to_router_config();

        assert_eq!(config.workers, vec![WorkerSpec::new("http://localhost:11434")]);
        assert_eq!(config.policy, PolicyConfig::RoundRobin);
        assert_eq!(config.health_check.check_interval_secs, 30);
        assert_eq!(config.health_check.timeout_secs, 5);
        assert_eq!(config.request_timeout_secs, 60);
        assert_eq!(config.stream_timeout_secs, 300);
        assert!(config.metrics.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cli_weighted_instances() {
        let cli = Cli::try_parse_from([
            "ollama-router",
            "--instances",
            "http://a:11434=1,http://b:11434/=3",
            "--strategy",
            "weighted",
            "--prometheus-port",
            "29000",
        ])
        .unwrap();
        let config = cli.to_router_config();

        assert_eq!(config.policy, PolicyConfig::Weighted);
        assert_eq!(config.workers.len(), 2);
        assert_eq!(config.workers[1].url, "http://b:11434");
        assert_eq!(config.workers[1].weight, 3.0);
        assert_eq!(config.metrics.unwrap().port, 29000);
    }

    #[test]
    fn test_cli_rejects_unknown_strategy() {
        let result = Cli::try_parse_from(["ollama-router", "--strategy", "fastest"]);
        assert!(result.is_err());
    }
}
