//! Error types for the relay layer.

use strata_config::ConfigError;
use thiserror::Error;

/// Errors that can occur while setting up the relay layer.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

impl RelayError {
    /// Label used for metrics.
    pub fn error_type(&self) -> &'static str {
        match self {
            RelayError::Config(_) => strata_core::ERROR_CONFIG,
        }
    }
}
