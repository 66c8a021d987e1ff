use std::path::Path;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Configuration for the logging subsystem
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is not set
    pub level: Level,
    /// Emit JSON lines instead of human readable output
    pub json_format: bool,
    /// Directory for daily rolling log files; console only when unset
    pub log_dir: Option<String>,
    pub colorize: bool,
    pub log_file_name: String,
    /// Restrict the default filter to these targets
    pub log_targets: Option<Vec<String>>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            json_format: false,
            log_dir: None,
            colorize: true,
            log_file_name: "ollama-router".to_string(),
            log_targets: Some(vec!["ollama_router_rs".to_string()]),
        }
    }
}

/// Parse a level name, case-insensitively
pub fn parse_level(level: &str) -> Option<Level> {
    level.trim().to_uppercase().parse::<Level>().ok()
}

fn default_filter(config: &LoggingConfig) -> String {
    let level = config.level.as_str().to_lowercase();
    match &config.log_targets {
        Some(targets) if !targets.is_empty() => {
            // Everything else (hyper, reqwest) stays at warn
            let mut directives = vec!["warn".to_string()];
            directives.extend(
                targets
                    .iter()
                    .map(|target| format!("{}={}", target, level)),
            );
            directives.push(format!("tower_http={}", level));
            directives.join(",")
        }
        _ => level,
    }
}

/// Install the global subscriber
///
/// Returns the file writer guard when file logging is enabled; it has to be
/// kept alive for buffered lines to reach the file.
pub fn init_logging(config: LoggingConfig) -> Option<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(&config)));

    let console_layer = if config.json_format {
        tracing_subscriber::fmt::layer()
            .json()
            .with_timer(ChronoUtc::new(TIME_FORMAT.to_string()))
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_ansi(config.colorize)
            .with_timer(ChronoUtc::new(TIME_FORMAT.to_string()))
            .with_target(true)
            .boxed()
    };

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            let dir = Path::new(dir);
            if let Err(e) = std::fs::create_dir_all(dir) {
                eprintln!("Failed to create log directory {}: {}", dir.display(), e);
            }
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, &config.log_file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = if config.json_format {
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(non_blocking)
                    .boxed()
            } else {
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_timer(ChronoUtc::new(TIME_FORMAT.to_string()))
                    .with_writer(non_blocking)
                    .boxed()
            };
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let result = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();
    if let Err(e) = result {
        eprintln!("Logging already initialized: {}", e);
    }

    guard
}
