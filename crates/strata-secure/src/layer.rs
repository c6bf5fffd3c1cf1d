//! Secure layer: per-endpoint TLS sessions around the inner protocol.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use bytes::BytesMut;
use strata_config::{NetworkConfig, Role, SecureConfig};
use strata_core::{ConnectionState, DatagramSink, Endpoint, MIN_SECURE_PAYLOAD_SIZE};
use strata_metrics::{
    LAYER_SECURE, record_bytes_encrypted, record_error, record_handshake, record_packet_dropped,
};
use tracing::{debug, info, warn};

use crate::engine::{
    CallbackIo, EngineFactory, EngineState, HandshakeStatus, MAX_HANDSHAKE_STEPS, SecureEngine,
    drive_handshake,
};
use crate::error::{EngineError, SecureError};
use crate::inner::{ConnectionInfo, ConnectionProtocol, InnerProtocol, PacketCommand};
use crate::rustls_engine::RustlsEngineFactory;
use crate::session::SecureSession;

type Sessions<E> = HashMap<Endpoint, SecureSession<E>>;

/// Wraps an [`InnerProtocol`] in per-endpoint TLS sessions.
///
/// Sessions are created lazily: server role on the first datagram from an
/// unseen endpoint, client role on an outbound connection request, and the
/// configured `send_role` on the other send paths.
pub struct SecureLayer<F: EngineFactory, P: InnerProtocol = ConnectionProtocol> {
    factory: F,
    inner: P,
    sessions: Sessions<F::Engine>,
    send_role: Role,
    mtu: usize,
    handshake_timeout_max: i64,
}

impl SecureLayer<RustlsEngineFactory> {
    /// Layer with the bundled rustls engine and the default inner protocol.
    pub fn from_config(
        network: &NetworkConfig,
        secure: Option<&SecureConfig>,
    ) -> Result<Self, SecureError> {
        let defaults = SecureConfig::default();
        let factory = RustlsEngineFactory::from_config(secure.unwrap_or(&defaults))?;
        Ok(Self::new(factory, ConnectionProtocol, network, secure))
    }
}

impl<F: EngineFactory, P: InnerProtocol> SecureLayer<F, P> {
    pub fn new(
        factory: F,
        inner: P,
        network: &NetworkConfig,
        secure: Option<&SecureConfig>,
    ) -> Self {
        let defaults = SecureConfig::default();
        let cfg = match secure {
            Some(cfg) => cfg,
            None => {
                warn!("no secure configuration provided, using defaults");
                &defaults
            }
        };
        if network.mtu < MIN_SECURE_PAYLOAD_SIZE {
            warn!(
                mtu = network.mtu,
                min = MIN_SECURE_PAYLOAD_SIZE,
                "MTU is smaller than a key exchange flight"
            );
        }
        let (min, max) = cfg.handshake_timeouts();
        info!(
            transport = ?cfg.transport,
            send_role = cfg.send_role.as_str(),
            handshake_timeout_min_ms = min,
            handshake_timeout_max_ms = max,
            read_timeout_ms = cfg.read_timeout_ms,
            "secure layer initialized"
        );

        Self {
            factory,
            inner,
            sessions: HashMap::new(),
            send_role: cfg.send_role,
            mtu: network.mtu,
            handshake_timeout_max: i64::from(max),
        }
    }

    /// Handle one inbound datagram from `endpoint`.
    ///
    /// Handshake records are answered through `sink` and yield
    /// [`PacketCommand::Drop`]; plaintext is only forwarded once the session
    /// is messaging.
    pub fn process_receive<S>(
        &mut self,
        data: &[u8],
        endpoint: Endpoint,
        sink: &mut S,
        now: i64,
    ) -> PacketCommand
    where
        S: DatagramSink + ?Sized,
    {
        let session =
            match ensure_session(&mut self.sessions, &self.factory, Role::Server, endpoint, now) {
                Ok(session) => session,
                Err(err) => {
                    warn!(endpoint = %endpoint, error = %err, "failed to create session");
                    record_error(strata_core::ERROR_ENGINE);
                    return PacketCommand::Drop;
                }
            };

        let mut io = CallbackIo::new(data, sink, endpoint);
        let command = match session.engine.state() {
            EngineState::Init | EngineState::Handshake => {
                for _ in 0..MAX_HANDSHAKE_STEPS {
                    let status = drive_handshake(&mut session.engine, &mut io);
                    session.report(&endpoint, status, now);
                    if status != HandshakeStatus::Step
                        || io.consumed()
                        || session.engine.state() != EngineState::Handshake
                    {
                        break;
                    }
                }
                PacketCommand::Drop
            }
            EngineState::Messaging => {
                let mut buf = vec![0u8; self.mtu];
                match session.engine.read_data(&mut io, &mut buf) {
                    Ok(0) => PacketCommand::Drop,
                    Ok(n) => self.inner.process_receive(&endpoint, &buf[..n]),
                    Err(err) => {
                        debug!(endpoint = %endpoint, error = %err, "decrypt failed");
                        record_error(strata_core::ERROR_ENGINE);
                        PacketCommand::Drop
                    }
                }
            }
            EngineState::Fail => PacketCommand::Drop,
        };

        let failed = session.engine.state() == EngineState::Fail;
        if failed {
            record_packet_dropped(LAYER_SECURE, "session_failed");
            self.remove_session(&endpoint);
        } else if matches!(command, PacketCommand::Disconnect { .. }) {
            debug!(endpoint = %endpoint, "peer disconnected");
            self.remove_session(&endpoint);
        }
        command
    }

    /// Encrypt a data message for `conn`. Returns the plaintext size.
    pub fn process_send<S>(
        &mut self,
        conn: &ConnectionInfo,
        has_pipeline: bool,
        payload: &[u8],
        sink: &mut S,
        now: i64,
    ) -> Result<usize, SecureError>
    where
        S: DatagramSink + ?Sized,
    {
        let endpoint = conn.endpoint;
        let session = ensure_session(
            &mut self.sessions,
            &self.factory,
            self.send_role,
            endpoint,
            now,
        )?;
        if session.engine.state() != EngineState::Messaging {
            if session.engine.state() == EngineState::Init && session.engine.role() == Role::Client
            {
                let mut io = CallbackIo::outbound(sink, endpoint);
                let status = drive_handshake(&mut session.engine, &mut io);
                session.report(&endpoint, status, now);
            }
            self.remove_if_failed(&endpoint);
            return Err(SecureError::HandshakeInProgress(endpoint));
        }

        let mut plaintext =
            BytesMut::with_capacity(strata_proto::CONTROL_HEADER_LEN + payload.len());
        self.inner
            .write_data(conn, has_pipeline, payload, &mut plaintext);
        self.encrypt(endpoint, &plaintext, sink)?;
        Ok(plaintext.len())
    }

    /// Encrypt a ConnectionAccept over the existing session.
    pub fn process_send_connection_accept<S>(
        &mut self,
        conn: &ConnectionInfo,
        sink: &mut S,
    ) -> Result<(), SecureError>
    where
        S: DatagramSink + ?Sized,
    {
        let mut plaintext = BytesMut::new();
        self.inner.write_connection_accept(conn, &mut plaintext);
        self.encrypt(conn.endpoint, &plaintext, sink)
    }

    /// Start or continue a client handshake with `conn.endpoint`, sending an
    /// encrypted ConnectionRequest once the session is messaging.
    ///
    /// Mid-handshake this only resends flight bytes the transport refused
    /// earlier.
    pub fn process_send_connection_request<S>(
        &mut self,
        conn: &ConnectionInfo,
        sink: &mut S,
        now: i64,
    ) -> Result<(), SecureError>
    where
        S: DatagramSink + ?Sized,
    {
        let endpoint = conn.endpoint;
        let session =
            ensure_session(&mut self.sessions, &self.factory, Role::Client, endpoint, now)?;
        match session.engine.state() {
            EngineState::Handshake => {
                let mut io = CallbackIo::outbound(sink, endpoint);
                if let Err(err) = session.engine.flush_pending(&mut io) {
                    debug!(endpoint = %endpoint, error = %err, "handshake flight still queued");
                    record_packet_dropped(LAYER_SECURE, "send_refused");
                }
                Ok(())
            }
            EngineState::Messaging => {
                let mut plaintext = BytesMut::new();
                self.inner.write_connection_request(conn, &mut plaintext);
                self.encrypt(endpoint, &plaintext, sink)
            }
            EngineState::Init | EngineState::Fail => {
                let mut io = CallbackIo::outbound(sink, endpoint);
                let status = drive_handshake(&mut session.engine, &mut io);
                session.report(&endpoint, status, now);
                if status == HandshakeStatus::WantWrite {
                    record_packet_dropped(LAYER_SECURE, "send_refused");
                }
                self.remove_if_failed(&endpoint);
                Ok(())
            }
        }
    }

    /// Best-effort encrypted Disconnect, then tear the session down.
    pub fn process_send_disconnect<S>(&mut self, conn: &ConnectionInfo, sink: &mut S)
    where
        S: DatagramSink + ?Sized,
    {
        let endpoint = conn.endpoint;
        if conn.state == ConnectionState::Connected
            && self.session_state(&endpoint) == Some(EngineState::Messaging)
        {
            let mut plaintext = BytesMut::new();
            self.inner.write_disconnect(conn, &mut plaintext);
            if let Err(err) = self.encrypt(endpoint, &plaintext, sink) {
                warn!(endpoint = %endpoint, error = %err, "failed to send disconnect");
            }
        }
        self.remove_session(&endpoint);
    }

    /// Tear down sessions whose handshake outlived the timeout.
    ///
    /// Returns how many were removed.
    pub fn update(&mut self, now: i64) -> usize {
        let max = self.handshake_timeout_max;
        let expired: Vec<(Endpoint, Role)> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.is_handshaking() && now - s.created_at > max)
            .map(|(endpoint, s)| (*endpoint, s.engine.role()))
            .collect();
        for (endpoint, role) in &expired {
            warn!(endpoint = %endpoint, role = role.as_str(), "handshake timed out");
            record_handshake(role.as_str(), "timeout");
            self.remove_session(endpoint);
        }
        expired.len()
    }

    pub fn remove_session(&mut self, endpoint: &Endpoint) -> bool {
        let removed = self.sessions.remove(endpoint).is_some();
        if removed {
            debug!(endpoint = %endpoint, "session removed");
        }
        removed
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn session_state(&self, endpoint: &Endpoint) -> Option<EngineState> {
        self.sessions.get(endpoint).map(|s| s.engine.state())
    }

    pub fn send_role(&self) -> Role {
        self.send_role
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    /// Push `plaintext` through the messaging session for `endpoint`.
    fn encrypt<S>(
        &mut self,
        endpoint: Endpoint,
        plaintext: &[u8],
        sink: &mut S,
    ) -> Result<(), SecureError>
    where
        S: DatagramSink + ?Sized,
    {
        let session = self
            .sessions
            .get_mut(&endpoint)
            .ok_or(SecureError::NoSession(endpoint))?;
        if session.engine.state() != EngineState::Messaging {
            return Err(SecureError::HandshakeInProgress(endpoint));
        }
        let mut io = CallbackIo::outbound(sink, endpoint);
        match session.engine.send_data(&mut io, plaintext) {
            Ok(()) => {
                record_bytes_encrypted(plaintext.len() as u64);
                Ok(())
            }
            Err(err) => {
                let err = SecureError::from(err);
                record_error(err.error_type());
                self.remove_if_failed(&endpoint);
                Err(err)
            }
        }
    }

    fn remove_if_failed(&mut self, endpoint: &Endpoint) {
        if self.session_state(endpoint) == Some(EngineState::Fail) {
            self.remove_session(endpoint);
        }
    }
}

fn ensure_session<'a, F: EngineFactory>(
    sessions: &'a mut Sessions<F::Engine>,
    factory: &F,
    role: Role,
    endpoint: Endpoint,
    now: i64,
) -> Result<&'a mut SecureSession<F::Engine>, EngineError> {
    match sessions.entry(endpoint) {
        Entry::Occupied(entry) => Ok(entry.into_mut()),
        Entry::Vacant(entry) => {
            let engine = factory.create(role, &endpoint)?;
            debug!(endpoint = %endpoint, role = role.as_str(), "session created");
            Ok(entry.insert(SecureSession::new(engine, now)))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use strata_core::{ConnectionId, PacketsQueue};

    use super::*;
    use crate::engine::{EngineIo, HandshakePhase};

    /// Completes after `steps` handshake calls and passes staged bytes
    /// through as plaintext.
    struct ScriptedEngine {
        role: Role,
        state: EngineState,
        steps: usize,
        fail_on: Option<u8>,
    }

    impl SecureEngine for ScriptedEngine {
        fn role(&self) -> Role {
            self.role
        }

        fn state(&self) -> EngineState {
            self.state
        }

        fn handshake_phase(&self) -> HandshakePhase {
            match self.role {
                Role::Client => HandshakePhase::ServerHello,
                Role::Server => HandshakePhase::ClientKeyExchange,
            }
        }

        fn handshake(&mut self, io: &mut dyn EngineIo) -> HandshakeStatus {
            let mut buf = vec![0u8; io.staged()];
            let n = io.pull(&mut buf).unwrap_or(0);
            if n > 0 && Some(buf[0]) == self.fail_on {
                self.state = EngineState::Fail;
                return HandshakeStatus::Failed;
            }
            self.state = EngineState::Handshake;
            self.steps = self.steps.saturating_sub(1);
            let _ = io.push(b"flight");
            if self.steps == 0 {
                self.state = EngineState::Messaging;
                HandshakeStatus::Complete
            } else {
                HandshakeStatus::Step
            }
        }

        fn read_data(
            &mut self,
            io: &mut dyn EngineIo,
            buf: &mut [u8],
        ) -> Result<usize, EngineError> {
            Ok(io.pull(buf).unwrap_or(0))
        }

        fn send_data(&mut self, io: &mut dyn EngineIo, data: &[u8]) -> Result<(), EngineError> {
            io.push(data).map_err(|_| EngineError::WouldBlock)
        }
    }

    #[derive(Default)]
    struct ScriptedFactory {
        created: Arc<Mutex<usize>>,
    }

    impl EngineFactory for ScriptedFactory {
        type Engine = ScriptedEngine;

        fn create(&self, role: Role, _endpoint: &Endpoint) -> Result<ScriptedEngine, EngineError> {
            *self.created.lock().unwrap() += 1;
            Ok(ScriptedEngine {
                role,
                state: EngineState::Init,
                steps: 2,
                fail_on: Some(0xFF),
            })
        }
    }

    fn layer() -> SecureLayer<ScriptedFactory> {
        SecureLayer::new(
            ScriptedFactory::default(),
            ConnectionProtocol,
            &NetworkConfig::default(),
            Some(&SecureConfig::default()),
        )
    }

    fn peer() -> Endpoint {
        std::net::SocketAddr::from(([10, 0, 0, 9], 5000)).into()
    }

    fn conn(state: ConnectionState) -> ConnectionInfo {
        ConnectionInfo {
            id: ConnectionId::NULL,
            endpoint: peer(),
            state,
            send_token: 7,
            receive_token: 9,
            did_receive_data: true,
        }
    }

    #[test]
    fn handshake_datagrams_are_not_forwarded() {
        let mut layer = layer();
        let mut sink = PacketsQueue::with_capacity(8);

        // A data header, but the session is still handshaking.
        let cmd = layer.process_receive(&[4, 0, 7, 0, b'x'], peer(), &mut sink, 10);
        assert_eq!(cmd, PacketCommand::Drop);
        assert_eq!(layer.session_state(&peer()), Some(EngineState::Handshake));
        assert_eq!(sink.len(), 1);

        layer.process_receive(b"second", peer(), &mut sink, 20);
        assert_eq!(layer.session_state(&peer()), Some(EngineState::Messaging));

        let cmd = layer.process_receive(&[4, 0, 7, 0, b'x'], peer(), &mut sink, 30);
        assert!(matches!(cmd, PacketCommand::Data { session_token: 7, .. }));
    }

    #[test]
    fn failed_session_is_replaced() {
        let mut layer = layer();
        let mut sink = PacketsQueue::with_capacity(8);

        assert_eq!(
            layer.process_receive(&[0xFF], peer(), &mut sink, 0),
            PacketCommand::Drop
        );
        assert_eq!(layer.session_count(), 0);

        layer.process_receive(b"hello", peer(), &mut sink, 1);
        assert_eq!(layer.session_count(), 1);
        assert_eq!(*layer.factory.created.lock().unwrap(), 2);
    }

    #[test]
    fn send_before_handshake_errors() {
        let mut layer = layer();
        let mut sink = PacketsQueue::with_capacity(8);
        let err = layer
            .process_send(&conn(ConnectionState::Connected), false, b"x", &mut sink, 0)
            .unwrap_err();
        assert!(matches!(err, SecureError::HandshakeInProgress(_)));
        assert_eq!(layer.session_count(), 1);

        let err = layer
            .process_send_connection_accept(&conn(ConnectionState::Connected), &mut sink)
            .unwrap_err();
        assert!(matches!(err, SecureError::HandshakeInProgress(_)));
    }

    #[test]
    fn accept_without_session_errors() {
        let mut layer = layer();
        let mut sink = PacketsQueue::with_capacity(8);
        assert!(matches!(
            layer.process_send_connection_accept(&conn(ConnectionState::Connected), &mut sink),
            Err(SecureError::NoSession(_))
        ));
    }

    #[test]
    fn send_returns_plaintext_size() {
        let mut layer = layer();
        let mut sink = PacketsQueue::with_capacity(8);
        layer.process_receive(b"a", peer(), &mut sink, 0);
        layer.process_receive(b"b", peer(), &mut sink, 0);
        sink.clear();

        let sent = layer
            .process_send(&conn(ConnectionState::Connected), true, b"abc", &mut sink, 0)
            .unwrap();
        assert_eq!(sent, strata_proto::CONTROL_HEADER_LEN + 3);
        assert_eq!(&sink.get(0).unwrap().payload[..], &[4, 2, 7, 0, b'a', b'b', b'c']);
    }

    #[test]
    fn disconnect_always_removes_session() {
        let mut layer = layer();
        let mut sink = PacketsQueue::with_capacity(8);
        layer.process_receive(b"a", peer(), &mut sink, 0);
        sink.clear();

        // Still handshaking: nothing is sent but the session goes away.
        layer.process_send_disconnect(&conn(ConnectionState::Connected), &mut sink);
        assert!(sink.is_empty());
        assert_eq!(layer.session_count(), 0);
    }

    #[test]
    fn update_expires_stuck_handshakes() {
        let mut layer = layer();
        let mut sink = PacketsQueue::with_capacity(8);
        layer.process_receive(b"a", peer(), &mut sink, 1_000);

        assert_eq!(layer.update(61_000), 0);
        assert_eq!(layer.update(61_001), 1);
        assert_eq!(layer.session_count(), 0);
    }

    #[test]
    fn connection_request_bootstraps_client() {
        let mut layer = layer();
        let mut sink = PacketsQueue::with_capacity(8);
        let c = conn(ConnectionState::Connecting);

        layer
            .process_send_connection_request(&c, &mut sink, 0)
            .unwrap();
        assert_eq!(layer.session_state(&peer()), Some(EngineState::Handshake));
        assert_eq!(sink.len(), 1);

        // Mid-handshake: silent.
        layer
            .process_send_connection_request(&c, &mut sink, 0)
            .unwrap();
        assert_eq!(sink.len(), 1);
    }
}
