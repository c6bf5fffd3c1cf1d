//! Error types for the secure layer.

use strata_core::Endpoint;
use thiserror::Error;

use crate::engine::EngineState;

/// Failures reported by a [`SecureEngine`](crate::SecureEngine).
#[derive(Error, Debug)]
pub enum EngineError {
    /// The transport refused the datagram; retry on a later tick.
    #[error("transport would block")]
    WouldBlock,

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("engine config error: {0}")]
    Config(String),

    #[error("operation not allowed in {0:?} state")]
    InvalidState(EngineState),
}

/// Errors surfaced by the secure layer's setup and send paths.
#[derive(Error, Debug)]
pub enum SecureError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("certificate generation failed: {0}")]
    CertGeneration(String),

    #[error("no secure session for {0}")]
    NoSession(Endpoint),

    #[error("handshake with {0} has not completed")]
    HandshakeInProgress(Endpoint),
}

impl SecureError {
    /// Label used for metrics.
    pub fn error_type(&self) -> &'static str {
        match self {
            SecureError::Io(_) => strata_core::ERROR_IO,
            SecureError::Tls(_) | SecureError::HandshakeInProgress(_) => {
                strata_core::ERROR_HANDSHAKE
            }
            SecureError::Config(_) | SecureError::CertGeneration(_) => strata_core::ERROR_CONFIG,
            SecureError::Engine(EngineError::WouldBlock) => strata_core::ERROR_BACKPRESSURE,
            SecureError::Engine(_) => strata_core::ERROR_ENGINE,
            SecureError::NoSession(_) => strata_core::ERROR_SESSION,
        }
    }
}
