//! Router configuration

pub mod types;

pub use types::*;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for field '{field}': {value} ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Duplicate worker URL: {url}")]
    DuplicateWorker { url: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;
