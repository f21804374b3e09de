//! Full TWAMP mode: test sessions negotiated over a TCP control connection.
//!
//! The control channel moves through
//! `Connecting -> AwaitGreeting -> NegotiateMode -> AwaitStart -> SessionReady
//! -> TestActive -> Stopped`. [`FullClient::connect`] runs the handshake up to
//! `SessionReady`; sessions and tests are created from the resulting
//! [`FullConnection`].

use std::{
    fmt,
    net::SocketAddr,
    sync::{Arc, Weak},
    time::Duration,
};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpStream, UdpSocket},
    sync::Mutex,
};

use crate::{
    error::{NegotiationError, Result, TwampError},
    exchange::{configure_test_socket, TwampTest},
    messages::{
        AcceptSession, AcceptStatus, ClientSetupResponse, RequestTwSession, ServerGreeting,
        ServerStart, StartAck, StartSessions, StopSessions,
    },
    modes::{describe_modes, SecurityMode},
    session::SessionConfig,
    time::TwampTimestamp,
};

/// Well-known TWAMP-Control port.
pub const DEFAULT_CONTROL_PORT: u16 = 862;

/// Bound on establishing the TCP control connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Control channel states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlState {
    Connecting,
    AwaitGreeting,
    NegotiateMode,
    AwaitStart,
    SessionReady,
    TestActive,
    Stopped,
}

impl fmt::Display for ControlState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Weak handle a test keeps on the control connection it was started over.
pub(crate) type ControlHandle = Weak<Mutex<ControlChannel>>;

/// The TCP stream plus the current protocol state.
pub(crate) struct ControlChannel {
    stream: Option<TcpStream>,
    state: ControlState,
}

impl ControlChannel {
    fn transition(&mut self, next: ControlState) {
        log::debug!("control channel {} -> {}", self.state, next);
        self.state = next;
    }

    fn stream(&mut self) -> Result<&mut TcpStream> {
        self.stream.as_mut().ok_or(TwampError::ConnectionClosed)
    }

    pub(crate) fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Fails unless the connection is open and in `expected`.
    fn require(&self, operation: &'static str, expected: ControlState) -> Result<()> {
        if !self.is_open() {
            return Err(TwampError::ConnectionClosed);
        }
        if self.state != expected {
            return Err(TwampError::InvalidState {
                operation,
                state: self.state,
            });
        }
        Ok(())
    }

    async fn send(&mut self, pdu: &[u8]) -> Result<()> {
        self.stream()?.write_all(pdu).await?;
        Ok(())
    }

    async fn recv<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.stream()?.read_exact(&mut buf).await?;
        Ok(buf)
    }

    async fn shutdown(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                log::debug!("control connection shutdown: {}", e);
            }
        }
        self.transition(ControlState::Stopped);
    }
}

/// Entry point for full-mode measurements.
#[derive(Debug, Clone)]
pub struct FullClient {
    connect_timeout: Duration,
}

impl Default for FullClient {
    fn default() -> Self {
        Self::new()
    }
}

impl FullClient {
    pub fn new() -> Self {
        FullClient {
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Connects to a TWAMP server and completes the control handshake.
    ///
    /// Any failure aborts the handshake and drops the TCP connection; there
    /// is no retry.
    pub async fn connect(&self, host: &str, port: u16) -> Result<FullConnection> {
        let addr = format!("{}:{}", host, port);
        let mut channel = ControlChannel {
            stream: None,
            state: ControlState::Connecting,
        };

        let stream = match tokio::time::timeout(self.connect_timeout, TcpStream::connect(&addr))
            .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(TwampError::Connect { addr, source }),
            Err(_) => {
                return Err(TwampError::Connect {
                    addr,
                    source: std::io::ErrorKind::TimedOut.into(),
                })
            }
        };
        let local_addr = stream.local_addr()?;
        let peer_addr = stream.peer_addr()?;
        log::info!("control connection {} -> {} established", local_addr, peer_addr);
        channel.stream = Some(stream);
        channel.transition(ControlState::AwaitGreeting);

        let greeting = ServerGreeting::from_bytes(&channel.recv::<{ ServerGreeting::SIZE }>().await?)?;
        log::debug!(
            "server greeting: modes={} count={}",
            describe_modes(greeting.modes),
            greeting.count
        );
        check_greeting_modes(greeting.modes)?;
        channel.transition(ControlState::NegotiateMode);

        channel
            .send(&ClientSetupResponse::unauthenticated().to_bytes())
            .await?;
        channel.transition(ControlState::AwaitStart);

        let start = ServerStart::from_bytes(&channel.recv::<{ ServerStart::SIZE }>().await?)?;
        AcceptStatus::check(start.accept, "connection")?;
        channel.transition(ControlState::SessionReady);

        Ok(FullConnection {
            channel: Arc::new(Mutex::new(channel)),
            local_addr,
            peer_addr,
        })
    }
}

/// Validates the mode word announced in the Server-Greeting.
fn check_greeting_modes(modes: u32) -> std::result::Result<(), NegotiationError> {
    if modes == SecurityMode::Unspecified.bits() {
        return Err(NegotiationError::ServerUnwilling);
    }
    if !SecurityMode::Unauthenticated.offered_in(modes) {
        return Err(NegotiationError::UnsupportedMode(describe_modes(modes)));
    }
    Ok(())
}

/// Established control connection, the sole owner of the TCP stream.
pub struct FullConnection {
    channel: Arc<Mutex<ControlChannel>>,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
}

impl FullConnection {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub async fn state(&self) -> ControlState {
        self.channel.lock().await.state
    }

    /// Requests a test session (Request-TW-Session / Accept-Session).
    pub async fn create_session(&self, config: SessionConfig) -> Result<FullSession> {
        let request = RequestTwSession {
            ip_version: if self.peer_addr.is_ipv4() { 4 } else { 6 },
            sender_port: config.sender_port,
            receiver_port: config.receiver_port,
            padding_length: config.padding as u32,
            start_time: TwampTimestamp::now(),
            timeout: config.timeout,
            type_p: config.tos as u32,
        };

        let mut channel = self.channel.lock().await;
        channel.require("create a session", ControlState::SessionReady)?;
        channel.send(&request.to_bytes()).await?;
        let accept = AcceptSession::from_bytes(&channel.recv::<{ AcceptSession::SIZE }>().await?)?;
        AcceptStatus::check(accept.accept, "session")?;
        log::info!("session accepted, reflector test port {}", accept.port);

        Ok(FullSession {
            channel: Arc::downgrade(&self.channel),
            local_addr: self.local_addr,
            peer_addr: self.peer_addr,
            port: accept.port,
            sid: accept.sid,
            config,
        })
    }

    /// Closes the control connection. Sessions derived from it stop working.
    pub async fn close(&self) {
        self.channel.lock().await.shutdown().await;
        log::info!("control connection to {} closed", self.peer_addr);
    }
}

/// A session accepted by the server. Holds only a weak handle to the
/// control connection.
pub struct FullSession {
    channel: Weak<Mutex<ControlChannel>>,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    port: u16,
    sid: [u8; 16],
    config: SessionConfig,
}

impl FullSession {
    /// Reflector UDP port returned in Accept-Session.
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn session_id(&self) -> [u8; 16] {
        self.sid
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn channel(&self) -> Result<Arc<Mutex<ControlChannel>>> {
        self.channel.upgrade().ok_or(TwampError::ConnectionClosed)
    }

    /// Starts the session (Start-Sessions / Start-Ack) and opens the test socket.
    ///
    /// The socket binds to the control connection's local address on the
    /// configured receiver port and connects to the reflector's address on
    /// the negotiated port.
    pub async fn create_test(&self) -> Result<TwampTest> {
        let channel = self.channel()?;
        let mut channel = channel.lock().await;
        channel.require("start a test", ControlState::SessionReady)?;

        channel.send(&StartSessions.to_bytes()).await?;
        let ack = StartAck::from_bytes(&channel.recv::<{ StartAck::SIZE }>().await?)?;
        AcceptStatus::check(ack.accept, "test setup")?;

        let remote = SocketAddr::new(self.peer_addr.ip(), self.port);
        let local = SocketAddr::new(self.local_addr.ip(), self.config.receiver_port);
        let socket = UdpSocket::bind(local).await?;
        socket.connect(remote).await?;
        configure_test_socket(&socket, self.config.tos)?;
        log::info!("test socket {} -> {}", socket.local_addr()?, remote);

        channel.transition(ControlState::TestActive);

        Ok(TwampTest::new(
            socket,
            remote,
            Some(self.local_addr.ip()),
            Some(self.sid),
            self.config.clone(),
        )
        .with_control(self.channel.clone()))
    }

    /// Sends Stop-Sessions. Best effort: failures are logged, not returned.
    ///
    /// Nothing is sent unless a test was started on this connection.
    pub async fn stop(&self) {
        let channel = match self.channel() {
            Ok(channel) => channel,
            Err(e) => {
                log::warn!("cannot stop session: {}", e);
                return;
            }
        };
        let mut channel = channel.lock().await;
        if let Err(e) = channel.require("stop sessions", ControlState::TestActive) {
            log::warn!("Stop-Sessions not sent: {}", e);
            return;
        }
        if let Err(e) = channel.send(&StopSessions::default().to_bytes()).await {
            log::warn!("Stop-Sessions failed: {}", e);
        }
        channel.transition(ControlState::Stopped);
    }
}
