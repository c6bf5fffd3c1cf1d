//! Per-endpoint secure session.

use strata_core::Endpoint;
use strata_metrics::{
    record_handshake, record_handshake_duration, record_session_created, record_session_removed,
};
use tracing::{info, warn};

use crate::engine::{EngineState, HandshakeStatus, SecureEngine};

pub(crate) struct SecureSession<E> {
    pub engine: E,
    pub created_at: i64,
    handshake_reported: bool,
}

impl<E: SecureEngine> SecureSession<E> {
    pub fn new(engine: E, now: i64) -> Self {
        record_session_created();
        Self {
            engine,
            created_at: now,
            handshake_reported: false,
        }
    }

    pub fn is_handshaking(&self) -> bool {
        matches!(
            self.engine.state(),
            EngineState::Init | EngineState::Handshake
        )
    }

    /// Log and count the end of the handshake, once.
    pub fn report(&mut self, endpoint: &Endpoint, status: HandshakeStatus, now: i64) {
        if self.handshake_reported {
            return;
        }
        let role = self.engine.role().as_str();
        match status {
            HandshakeStatus::Complete => {
                let elapsed = now - self.created_at;
                info!(endpoint = %endpoint, role, elapsed_ms = elapsed, "handshake complete");
                record_handshake(role, "success");
                record_handshake_duration(elapsed);
            }
            HandshakeStatus::Failed => {
                warn!(endpoint = %endpoint, role, "handshake failed");
                record_handshake(role, "failure");
            }
            _ => return,
        }
        self.handshake_reported = true;
    }
}

impl<E> Drop for SecureSession<E> {
    fn drop(&mut self) {
        record_session_removed();
    }
}
