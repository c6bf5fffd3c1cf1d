//! TLS/DTLS secure layer.
//!
//! [`SecureLayer`] keeps one [`SecureEngine`] per remote endpoint and wraps an
//! [`InnerProtocol`] with it:
//!
//! ```text
//!   inbound datagram ──► session (server role if new)
//!                          │
//!          Init/Handshake  │  Messaging              Fail
//!          drive handshake │  decrypt ─► inner ─►    drop + teardown
//!          reply via sink  │  PacketCommand
//!          ─► Drop         │
//! ```
//!
//! Engines are reached only through [`EngineIo`] push/pull callbacks, so the
//! layer never owns a socket and never blocks. The bundled engine is
//! [`RustlsEngine`].

mod engine;
mod error;
mod inner;
mod layer;
mod rustls_engine;
mod session;
mod tls;

pub use engine::{
    CallbackIo, EngineFactory, EngineIo, EngineState, HandshakePhase, HandshakeStatus,
    MAX_HANDSHAKE_STEPS, SecureEngine, client_should_step, drive_handshake, server_should_step,
    should_step,
};
pub use error::{EngineError, SecureError};
pub use inner::{ConnectionInfo, ConnectionProtocol, InnerProtocol, PacketCommand};
pub use layer::SecureLayer;
pub use rustls_engine::{RustlsEngine, RustlsEngineFactory};
pub use strata_config::Role;
pub use tls::{load_client_config, load_server_config};
