//! Error types for the core crate.

use kairos_rs_config::ConfigError;
use kairos_rs_protocol::{DeliveryError, ModelError};
use kairos_rs_store::StoreError;
use thiserror::Error;

/// Errors returned by pipeline, heartbeat, and directive execution.
#[derive(Debug, Error)]
pub enum KairosCoreError {
    /// Store operation failed or rejected its input.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    /// Model backend failed after retries.
    #[error("model error: {0}")]
    Model(#[from] ModelError),
    /// Outbound delivery failed after retries.
    #[error("delivery error: {0}")]
    Delivery(#[from] DeliveryError),
    /// Skill file could not be written or read.
    #[error("skill error: {0}")]
    Skill(String),
    /// Notification was not delivered.
    #[error("notification error: {0}")]
    Notify(String),
    /// Settings derived from config were invalid.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl KairosCoreError {
    /// Whether the failure came from an external endpoint rather than local state.
    pub fn is_external(&self) -> bool {
        matches!(self, KairosCoreError::Model(_) | KairosCoreError::Delivery(_))
    }

    /// Whether the model backend could not be reached, as opposed to refusing
    /// the request.
    pub fn is_model_unavailable(&self) -> bool {
        matches!(self, KairosCoreError::Model(err) if err.is_transient())
    }
}
