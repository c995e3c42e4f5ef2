//! Config errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    ReadFailed(#[from] std::io::Error),
    /// The file is not valid JSON5.
    #[error("cannot parse config as JSON5: {0}")]
    ParseFailed(#[from] json5::Error),
    /// The merged layers do not match the config schema.
    #[error("config does not match schema: {0}")]
    DecodeFailed(#[from] serde_json::Error),
    #[error("invalid config at {path}: {message}")]
    InvalidField { path: String, message: String },
    /// A `KAIROS_*` variable held an unusable value.
    #[error("invalid value for {var}: {message}")]
    InvalidEnv { var: String, message: String },
}
