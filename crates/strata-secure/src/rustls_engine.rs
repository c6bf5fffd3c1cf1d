//! [`SecureEngine`] backed by rustls.
//!
//! rustls speaks stream TLS. In datagram mode every flush of pending records
//! becomes one datagram and the peer is expected to receive them in order.
//! Records the transport refuses stay queued in the engine and go out with
//! the next flush; nothing is retransmitted once accepted.

use std::io::{self, Read, Write};
use std::sync::Arc;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, Connection, ServerConfig, ServerConnection};
use strata_config::{Role, SecureConfig, TransportMode};
use strata_core::Endpoint;
use tracing::{debug, info};

use crate::engine::{
    EngineFactory, EngineIo, EngineState, HandshakePhase, HandshakeStatus, SecureEngine,
};
use crate::error::{EngineError, SecureError};
use crate::tls::{load_client_config, load_server_config};

pub struct RustlsEngine {
    conn: Connection,
    role: Role,
    state: EngineState,
    received_any: bool,
    /// Ciphertext not yet accepted by the transport.
    pending_out: Vec<u8>,
}

impl RustlsEngine {
    pub fn new(conn: Connection) -> Self {
        let role = match conn {
            Connection::Client(_) => Role::Client,
            Connection::Server(_) => Role::Server,
        };
        Self {
            conn,
            role,
            state: EngineState::Init,
            received_any: false,
            pending_out: Vec::new(),
        }
    }

    /// Take the staged datagram and feed it to rustls.
    fn ingest(&mut self, io: &mut dyn EngineIo) -> Result<usize, EngineError> {
        let mut datagram = vec![0u8; io.staged()];
        let len = match io.pull(&mut datagram) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        // rustls takes at most one read buffer's worth per call.
        let mut rest = &datagram[..len];
        while !rest.is_empty() {
            if self.conn.read_tls(&mut rest)? == 0 {
                break;
            }
            self.conn.process_new_packets()?;
        }
        if len > 0 {
            self.received_any = true;
        }
        Ok(len)
    }

    /// Push all pending records as one datagram.
    ///
    /// A refused push keeps the bytes for the next flush.
    fn flush(&mut self, io: &mut dyn EngineIo) -> Result<usize, EngineError> {
        while self.conn.wants_write() {
            self.conn.write_tls(&mut self.pending_out)?;
        }
        if self.pending_out.is_empty() {
            return Ok(0);
        }
        match io.push(&self.pending_out) {
            Ok(()) => {
                let sent = self.pending_out.len();
                self.pending_out.clear();
                Ok(sent)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                debug!(
                    role = self.role.as_str(),
                    queued = self.pending_out.len(),
                    "push refused, keeping records"
                );
                Err(EngineError::WouldBlock)
            }
            Err(e) => Err(EngineError::Io(e)),
        }
    }

    fn fail(&mut self, io: &mut dyn EngineIo, err: &EngineError) {
        debug!(role = self.role.as_str(), error = %err, "engine failed");
        self.state = EngineState::Fail;
        // Best effort: deliver the alert rustls queued.
        let _ = self.flush(io);
    }

    fn ensure_messaging(&self) -> Result<(), EngineError> {
        match self.state {
            EngineState::Messaging => Ok(()),
            state => Err(EngineError::InvalidState(state)),
        }
    }
}

impl SecureEngine for RustlsEngine {
    fn role(&self) -> Role {
        self.role
    }

    fn state(&self) -> EngineState {
        self.state
    }

    fn handshake_phase(&self) -> HandshakePhase {
        if self.state == EngineState::Init {
            HandshakePhase::HelloRequest
        } else if !self.conn.is_handshaking() {
            HandshakePhase::HandshakeOver
        } else if self.conn.wants_write() || !self.pending_out.is_empty() {
            HandshakePhase::FlushBuffers
        } else {
            match self.role {
                Role::Client => HandshakePhase::ServerHello,
                Role::Server if self.received_any => HandshakePhase::ClientKeyExchange,
                Role::Server => HandshakePhase::ClientHello,
            }
        }
    }

    fn handshake(&mut self, io: &mut dyn EngineIo) -> HandshakeStatus {
        match self.state {
            EngineState::Fail => return HandshakeStatus::Failed,
            EngineState::Messaging => return HandshakeStatus::Complete,
            EngineState::Init => self.state = EngineState::Handshake,
            EngineState::Handshake => {}
        }

        let read = match self.ingest(io) {
            Ok(n) => n,
            Err(err) => {
                self.fail(io, &err);
                return HandshakeStatus::Failed;
            }
        };
        let written = match self.flush(io) {
            Ok(n) => n,
            Err(EngineError::WouldBlock) if self.conn.is_handshaking() => {
                return HandshakeStatus::WantWrite;
            }
            // Final flight stays queued; the next send or read flushes it.
            Err(EngineError::WouldBlock) => 0,
            Err(err) => {
                self.fail(io, &err);
                return HandshakeStatus::Failed;
            }
        };

        if !self.conn.is_handshaking() {
            self.state = EngineState::Messaging;
            return HandshakeStatus::Complete;
        }
        if read > 0 || written > 0 {
            HandshakeStatus::Step
        } else {
            HandshakeStatus::WantRead
        }
    }

    fn read_data(&mut self, io: &mut dyn EngineIo, buf: &mut [u8]) -> Result<usize, EngineError> {
        self.ensure_messaging()?;
        if let Err(err) = self.ingest(io) {
            self.fail(io, &err);
            return Err(err);
        }
        match self.flush(io) {
            Ok(_) | Err(EngineError::WouldBlock) => {}
            Err(err) => return Err(err),
        }
        match self.conn.reader().read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn send_data(&mut self, io: &mut dyn EngineIo, data: &[u8]) -> Result<(), EngineError> {
        self.ensure_messaging()?;
        self.conn.writer().write_all(data)?;
        self.flush(io)?;
        Ok(())
    }

    fn flush_pending(&mut self, io: &mut dyn EngineIo) -> Result<usize, EngineError> {
        if self.state == EngineState::Fail {
            return Err(EngineError::InvalidState(self.state));
        }
        self.flush(io)
    }
}

/// Creates [`RustlsEngine`]s from shared rustls configs.
#[derive(Clone)]
pub struct RustlsEngineFactory {
    server: Option<Arc<ServerConfig>>,
    client: Option<Arc<ClientConfig>>,
    hostname: Option<String>,
}

impl RustlsEngineFactory {
    pub fn new(
        server: Option<Arc<ServerConfig>>,
        client: Option<Arc<ClientConfig>>,
        hostname: Option<String>,
    ) -> Self {
        Self {
            server,
            client,
            hostname,
        }
    }

    pub fn from_config(cfg: &SecureConfig) -> Result<Self, SecureError> {
        if cfg.transport == TransportMode::Dtls {
            info!("datagram mode: one TLS flight per datagram, no loss recovery");
        }
        let server = load_server_config(cfg)?;
        let client = load_client_config(cfg)?;
        Ok(Self::new(
            Some(Arc::new(server)),
            client.map(Arc::new),
            cfg.hostname.clone(),
        ))
    }

    /// Name the client role verifies: the configured hostname, else the
    /// peer's IP, else `localhost`.
    fn server_name(&self, endpoint: &Endpoint) -> Result<ServerName<'static>, EngineError> {
        if let Some(host) = &self.hostname {
            return ServerName::try_from(host.clone())
                .map_err(|e| EngineError::Config(format!("invalid hostname {host}: {e}")));
        }
        Ok(match endpoint.as_socket_addr() {
            Some(addr) => ServerName::IpAddress(addr.ip().into()),
            None => ServerName::try_from("localhost")
                .map_err(|e| EngineError::Config(e.to_string()))?,
        })
    }
}

impl EngineFactory for RustlsEngineFactory {
    type Engine = RustlsEngine;

    fn create(&self, role: Role, endpoint: &Endpoint) -> Result<RustlsEngine, EngineError> {
        let conn = match role {
            Role::Server => {
                let config = self
                    .server
                    .clone()
                    .ok_or_else(|| EngineError::Config("server role not configured".into()))?;
                Connection::Server(ServerConnection::new(config)?)
            }
            Role::Client => {
                let config = self
                    .client
                    .clone()
                    .ok_or_else(|| EngineError::Config("client role not configured".into()))?;
                let name = self.server_name(endpoint)?;
                Connection::Client(ClientConnection::new(config, name)?)
            }
        };
        Ok(RustlsEngine::new(conn))
    }
}

#[cfg(test)]
mod tests {
    use strata_config::ClientAuthPolicy;
    use strata_core::PacketsQueue;

    use super::*;
    use crate::engine::{CallbackIo, drive_handshake};

    fn factory() -> RustlsEngineFactory {
        let cfg = SecureConfig {
            client_auth: ClientAuthPolicy::None,
            ..Default::default()
        };
        RustlsEngineFactory::from_config(&cfg).unwrap()
    }

    fn endpoint(port: u16) -> Endpoint {
        std::net::SocketAddr::from(([127, 0, 0, 1], port)).into()
    }

    /// Deliver everything in `from` to `engine`, returning its replies.
    fn deliver(engine: &mut RustlsEngine, from: &mut PacketsQueue) -> PacketsQueue {
        let mut replies = PacketsQueue::with_capacity(8);
        for packet in from.drain() {
            let mut io = CallbackIo::new(&packet.payload, &mut replies, endpoint(1));
            drive_handshake(engine, &mut io);
        }
        replies
    }

    #[test]
    fn handshake_completes_in_memory() {
        let factory = factory();
        let mut client = factory.create(Role::Client, &endpoint(2)).unwrap();
        let mut server = factory.create(Role::Server, &endpoint(1)).unwrap();
        assert_eq!(client.handshake_phase(), HandshakePhase::HelloRequest);

        let mut to_server = PacketsQueue::with_capacity(8);
        let mut io = CallbackIo::outbound(&mut to_server, endpoint(2));
        assert_eq!(drive_handshake(&mut client, &mut io), HandshakeStatus::Step);
        assert_eq!(to_server.len(), 1);

        for _ in 0..4 {
            let mut to_client = deliver(&mut server, &mut to_server);
            to_server = deliver(&mut client, &mut to_client);
        }

        assert_eq!(client.state(), EngineState::Messaging);
        assert_eq!(server.state(), EngineState::Messaging);
        assert_eq!(server.handshake_phase(), HandshakePhase::HandshakeOver);
    }

    #[test]
    fn refused_flight_is_kept_for_the_next_flush() {
        let factory = factory();
        let mut client = factory.create(Role::Client, &endpoint(2)).unwrap();

        let mut full = PacketsQueue::with_capacity(0);
        let mut io = CallbackIo::outbound(&mut full, endpoint(2));
        assert_eq!(client.handshake(&mut io), HandshakeStatus::WantWrite);
        assert_eq!(client.handshake_phase(), HandshakePhase::FlushBuffers);

        let mut to_server = PacketsQueue::with_capacity(4);
        let mut io = CallbackIo::outbound(&mut to_server, endpoint(2));
        let sent = client.flush_pending(&mut io).unwrap();
        assert!(sent > 0);
        assert_eq!(to_server.len(), 1);
        assert_eq!(to_server.get(0).unwrap().len(), sent);

        // The resent ClientHello still drives the server forward.
        let mut server = factory.create(Role::Server, &endpoint(1)).unwrap();
        let replies = deliver(&mut server, &mut to_server);
        assert_eq!(server.state(), EngineState::Handshake);
        assert!(!replies.is_empty());
    }

    #[test]
    fn garbage_fails_the_server() {
        let mut server = factory().create(Role::Server, &endpoint(1)).unwrap();
        let mut sink = PacketsQueue::with_capacity(4);
        let mut io = CallbackIo::new(b"definitely not tls", &mut sink, endpoint(1));
        assert_eq!(server.handshake(&mut io), HandshakeStatus::Failed);
        assert_eq!(server.state(), EngineState::Fail);
        let mut io = CallbackIo::outbound(&mut sink, endpoint(1));
        assert_eq!(server.handshake(&mut io), HandshakeStatus::Failed);
    }

    #[test]
    fn data_before_handshake_is_rejected() {
        let mut server = factory().create(Role::Server, &endpoint(1)).unwrap();
        let mut sink = PacketsQueue::with_capacity(4);
        let mut io = CallbackIo::outbound(&mut sink, endpoint(1));
        assert!(matches!(
            server.send_data(&mut io, b"hello"),
            Err(EngineError::InvalidState(EngineState::Init))
        ));
    }

    #[test]
    fn client_without_config_errors() {
        let factory = RustlsEngineFactory::new(None, None, None);
        assert!(matches!(
            factory.create(Role::Client, &endpoint(1)),
            Err(EngineError::Config(_))
        ));
    }
}
