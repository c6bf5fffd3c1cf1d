//! Engine interface between the secure layer and a TLS/DTLS implementation.
//!
//! The layer never hands the engine a socket. Instead each call receives an
//! [`EngineIo`]: `pull` hands over the datagram currently being processed,
//! whole and only once, and `push` sends one datagram to the peer. Neither
//! blocks; once the datagram is taken or when the transport refuses a send
//! they report [`io::ErrorKind::WouldBlock`] and the engine surfaces
//! want-read/want-write.

use std::io;

use strata_config::Role;
use strata_core::{DatagramSink, Endpoint};

use crate::error::EngineError;

/// Upper bound on handshake steps driven for a single datagram.
pub const MAX_HANDSHAKE_STEPS: usize = 32;

/// Synchronous byte callbacks handed to an engine.
pub trait EngineIo {
    /// Length of the datagram the next `pull` would hand over, zero once taken.
    fn staged(&self) -> usize;
    /// Copy the whole staged datagram into `buf`.
    ///
    /// Only the first pull of a call yields data; later pulls report
    /// `WouldBlock`. A `buf` shorter than [`staged`](Self::staged) is an
    /// `InvalidInput` error and leaves the datagram staged.
    fn pull(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    /// Transmit one datagram to the peer.
    fn push(&mut self, data: &[u8]) -> io::Result<()>;
}

/// Coarse engine lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    #[default]
    Init,
    Handshake,
    Messaging,
    /// Sticky. The only remedy is dropping the session.
    Fail,
}

/// Outcome of a single handshake step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStatus {
    /// Progress was made; the role predicate decides whether to keep going.
    Step,
    WantRead,
    WantWrite,
    Complete,
    Failed,
}

/// Position in the TLS handshake flight sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    HelloRequest,
    ClientHello,
    ServerHello,
    ServerCertificate,
    ServerKeyExchange,
    CertificateRequest,
    ServerHelloDone,
    ClientCertificate,
    ClientKeyExchange,
    CertificateVerify,
    ClientChangeCipherSpec,
    ClientFinished,
    ServerChangeCipherSpec,
    ServerFinished,
    FlushBuffers,
    HandshakeWrapup,
    HandshakeOver,
}

/// Whether a server keeps stepping without new input.
///
/// False while waiting for the client's second flight.
pub fn server_should_step(phase: HandshakePhase) -> bool {
    use HandshakePhase::*;
    matches!(
        phase,
        HelloRequest
            | ClientHello
            | ServerHello
            | ServerCertificate
            | ServerKeyExchange
            | CertificateRequest
            | ServerHelloDone
            | ServerChangeCipherSpec
            | ServerFinished
            | FlushBuffers
            | HandshakeWrapup
            | HandshakeOver
    )
}

/// Whether a client keeps stepping without new input.
///
/// False while waiting for the server's first flight.
pub fn client_should_step(phase: HandshakePhase) -> bool {
    use HandshakePhase::*;
    matches!(
        phase,
        HelloRequest
            | ClientHello
            | ServerHelloDone
            | ClientCertificate
            | ClientKeyExchange
            | CertificateVerify
            | ClientChangeCipherSpec
            | ClientFinished
            | FlushBuffers
            | HandshakeWrapup
            | HandshakeOver
    )
}

pub fn should_step(role: Role, phase: HandshakePhase) -> bool {
    match role {
        Role::Server => server_should_step(phase),
        Role::Client => client_should_step(phase),
    }
}

/// A TLS/DTLS engine bound to one peer.
pub trait SecureEngine: Send {
    fn role(&self) -> Role;

    fn state(&self) -> EngineState;

    fn handshake_phase(&self) -> HandshakePhase;

    /// Run one handshake step. A fatal error moves the engine to
    /// [`EngineState::Fail`] and returns [`HandshakeStatus::Failed`].
    fn handshake(&mut self, io: &mut dyn EngineIo) -> HandshakeStatus;

    /// Decrypt staged records into `buf`, returning the plaintext length.
    ///
    /// Records that carry no application data yield `Ok(0)`.
    fn read_data(&mut self, io: &mut dyn EngineIo, buf: &mut [u8]) -> Result<usize, EngineError>;

    /// Encrypt `data` and push it as a single datagram.
    fn send_data(&mut self, io: &mut dyn EngineIo, data: &[u8]) -> Result<(), EngineError>;

    /// Push ciphertext an earlier refused push left queued, returning the
    /// bytes sent. Engines that never hold output back keep the default.
    fn flush_pending(&mut self, _io: &mut dyn EngineIo) -> Result<usize, EngineError> {
        Ok(0)
    }
}

/// Creates engines for new sessions.
pub trait EngineFactory {
    type Engine: SecureEngine;

    fn create(&self, role: Role, endpoint: &Endpoint) -> Result<Self::Engine, EngineError>;
}

/// Drive `engine` until the role predicate says to wait for input.
pub fn drive_handshake<E>(engine: &mut E, io: &mut dyn EngineIo) -> HandshakeStatus
where
    E: SecureEngine + ?Sized,
{
    let mut status = HandshakeStatus::Step;
    for _ in 0..MAX_HANDSHAKE_STEPS {
        status = engine.handshake(io);
        if status != HandshakeStatus::Step || !should_step(engine.role(), engine.handshake_phase())
        {
            break;
        }
    }
    status
}

/// [`EngineIo`] over one staged datagram and the raw network interface.
pub struct CallbackIo<'a, S: DatagramSink + ?Sized> {
    staged: &'a [u8],
    taken: bool,
    sink: &'a mut S,
    endpoint: Endpoint,
}

impl<'a, S: DatagramSink + ?Sized> CallbackIo<'a, S> {
    pub fn new(staged: &'a [u8], sink: &'a mut S, endpoint: Endpoint) -> Self {
        Self {
            staged,
            taken: staged.is_empty(),
            sink,
            endpoint,
        }
    }

    /// Callbacks with nothing staged, for the send paths.
    pub fn outbound(sink: &'a mut S, endpoint: Endpoint) -> Self {
        Self::new(&[], sink, endpoint)
    }

    pub fn consumed(&self) -> bool {
        self.taken
    }
}

impl<S: DatagramSink + ?Sized> EngineIo for CallbackIo<'_, S> {
    fn staged(&self) -> usize {
        if self.taken { 0 } else { self.staged.len() }
    }

    fn pull(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.taken {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let len = self.staged.len();
        if buf.len() < len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("pull buffer of {} bytes for a {len}-byte datagram", buf.len()),
            ));
        }
        buf[..len].copy_from_slice(self.staged);
        self.taken = true;
        Ok(len)
    }

    fn push(&mut self, data: &[u8]) -> io::Result<()> {
        self.sink
            .send_to(&self.endpoint, data)
            .map_err(|e| io::Error::new(io::ErrorKind::WouldBlock, e))
    }
}
