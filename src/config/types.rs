use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{ConfigError, ConfigResult};

/// Main router configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Backend instances, in registry order
    pub workers: Vec<WorkerSpec>,
    /// Load balancing policy, fixed for the process lifetime
    pub policy: PolicyConfig,
    /// Health check configuration
    pub health_check: HealthCheckConfig,
    /// Host address to bind to
    pub host: String,
    /// Port number to bind to
    pub port: u16,
    /// Maximum request payload size in bytes
    pub max_payload_size: usize,
    /// Timeout for unary generation requests in seconds
    pub request_timeout_secs: u64,
    /// Longest wait for stream headers or between stream chunks, in seconds
    pub stream_timeout_secs: u64,
    /// Connect timeout for backend connections in seconds
    pub connect_timeout_secs: u64,
    /// CORS allowed origins (empty means all)
    pub cors_allowed_origins: Vec<String>,
    /// Log directory (None = stdout only)
    pub log_dir: Option<String>,
    /// Log level (None = info)
    pub log_level: Option<String>,
    /// Emit logs as JSON
    pub log_json: bool,
    /// Prometheus exporter (None = disabled)
    pub metrics: Option<MetricsConfig>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            workers: vec![WorkerSpec::new("http://localhost:11434")],
            policy: PolicyConfig::RoundRobin,
            health_check: HealthCheckConfig::default(),
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_payload_size: 256 * 1024 * 1024,
            request_timeout_secs: 60,
            stream_timeout_secs: 300,
            connect_timeout_secs: 10,
            cors_allowed_origins: vec![],
            log_dir: None,
            log_level: None,
            log_json: false,
            metrics: None,
        }
    }
}

impl RouterConfig {
    /// Validate the configuration before the server is built
    pub fn validate(&self) -> ConfigResult<()> {
        if self.workers.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "workers".to_string(),
            });
        }

        let mut seen = std::collections::HashSet::new();
        for worker in &self.workers {
            worker.validate()?;
            if !seen.insert(worker.url.as_str()) {
                return Err(ConfigError::DuplicateWorker {
                    url: worker.url.clone(),
                });
            }
        }

        self.health_check.validate()?;

        for (field, value) in [
            ("request_timeout_secs", self.request_timeout_secs),
            ("stream_timeout_secs", self.stream_timeout_secs),
            ("connect_timeout_secs", self.connect_timeout_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: value.to_string(),
                    reason: "Must be > 0".to_string(),
                });
            }
        }

        if self.max_payload_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_payload_size".to_string(),
                value: "0".to_string(),
                reason: "Must be > 0".to_string(),
            });
        }

        Ok(())
    }
}

/// One configured backend instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSpec {
    pub url: String,
    pub weight: f64,
}

impl WorkerSpec {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: normalize_url(&url.into()),
            weight: 1.0,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    fn validate(&self) -> ConfigResult<()> {
        let parsed = url::Url::parse(&self.url).map_err(|e| ConfigError::InvalidValue {
            field: "workers".to_string(),
            value: self.url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidValue {
                field: "workers".to_string(),
                value: self.url.clone(),
                reason: "URL scheme must be http or https".to_string(),
            });
        }
        if !self.weight.is_finite() || self.weight <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "weight".to_string(),
                value: self.weight.to_string(),
                reason: "Must be a finite number > 0".to_string(),
            });
        }
        Ok(())
    }
}

/// Parses `URL` or `URL=WEIGHT`
impl FromStr for WorkerSpec {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "workers".to_string(),
                value: s.to_string(),
                reason: "Empty instance URL".to_string(),
            });
        }

        match s.rsplit_once('=') {
            Some((url, weight)) => {
                let weight = weight
                    .trim()
                    .parse::<f64>()
                    .map_err(|e| ConfigError::InvalidValue {
                        field: "weight".to_string(),
                        value: weight.to_string(),
                        reason: e.to_string(),
                    })?;
                Ok(WorkerSpec::new(url.trim()).with_weight(weight))
            }
            None => Ok(WorkerSpec::new(s)),
        }
    }
}

fn normalize_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

/// Load balancing policy configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyConfig {
    RoundRobin,
    LeastConnections,
    Random,
    Weighted,
}

impl PolicyConfig {
    pub fn name(&self) -> &'static str {
        match self {
            PolicyConfig::RoundRobin => "round_robin",
            PolicyConfig::LeastConnections => "least_connections",
            PolicyConfig::Random => "random",
            PolicyConfig::Weighted => "weighted",
        }
    }
}

impl fmt::Display for PolicyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PolicyConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "round_robin" | "roundrobin" => Ok(PolicyConfig::RoundRobin),
            "least_connections" | "leastconnections" => Ok(PolicyConfig::LeastConnections),
            "random" => Ok(PolicyConfig::Random),
            "weighted" => Ok(PolicyConfig::Weighted),
            other => Err(ConfigError::InvalidValue {
                field: "policy".to_string(),
                value: other.to_string(),
                reason: "Expected one of round_robin, least_connections, random, weighted"
                    .to_string(),
            }),
        }
    }
}

/// Health check configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    /// Timeout for a single probe in seconds
    pub timeout_secs: u64,
    /// Interval between probe rounds in seconds
    pub check_interval_secs: u64,
    /// Capability endpoint probed on each instance
    pub endpoint: String,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 5,
            check_interval_secs: 30,
            endpoint: "/api/tags".to_string(),
        }
    }
}

impl HealthCheckConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "health_check.timeout_secs".to_string(),
                value: "0".to_string(),
                reason: "Must be > 0".to_string(),
            });
        }
        if self.check_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "health_check.check_interval_secs".to_string(),
                value: "0".to_string(),
                reason: "Must be > 0".to_string(),
            });
        }
        if !self.endpoint.starts_with('/') {
            return Err(ConfigError::InvalidValue {
                field: "health_check.endpoint".to_string(),
                value: self.endpoint.clone(),
                reason: "Must start with '/'".to_string(),
            });
        }
        Ok(())
    }
}

/// Prometheus exporter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub host: String,
    pub port: u16,
}
