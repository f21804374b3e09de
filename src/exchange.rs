//! Test exchange engine shared by full and light mode.
//!
//! A `TwampTest` owns the connected UDP test socket. Each call to
//! [`TwampTest::run_once`] sends one test packet, waits for its reflection
//! and turns the pair into a [`TwampResult`].

use std::{
    net::{IpAddr, SocketAddr},
    time::Instant,
};

use chrono::Utc;
use rand::{rngs::StdRng, RngCore, SeedableRng};
use tokio::net::UdpSocket;

use crate::{
    error::{Result, TwampError},
    full::ControlHandle,
    packets::{FormatError, MeasurementPacket},
    session::SessionConfig,
    stats::TwampResult,
    time::TwampTimestamp,
};

/// Error estimate stamped on outgoing packets: S=0, Z=0, Scale=1, Multiplier=1.
pub const SENDER_ERROR_ESTIMATE: u16 = 0x0101;

/// Marker placed in the sender TTL byte of outgoing packets.
const SENDER_TTL_MARKER: u8 = 87;

/// TTL recommended for test packets (RFC 5357 Section 4.1.2).
pub const TEST_PACKET_TTL: u32 = 255;

/// Builds the datagram for one test packet: header followed by padding.
///
/// Padding is all zeros when `use_all_zeros` is set, otherwise it is drawn
/// from `rng`.
pub fn build_test_packet(
    sequence_number: u32,
    timestamp: TwampTimestamp,
    padding: usize,
    use_all_zeros: bool,
    rng: &mut impl RngCore,
) -> Vec<u8> {
    let header = MeasurementPacket {
        sequence_number,
        timestamp,
        error_estimate: SENDER_ERROR_ESTIMATE,
        sender_ttl: SENDER_TTL_MARKER,
        ..Default::default()
    };

    let mut pdu = Vec::with_capacity(MeasurementPacket::SIZE + padding);
    pdu.extend_from_slice(&header.to_bytes());
    pdu.resize(MeasurementPacket::SIZE + padding, 0);
    if !use_all_zeros {
        rng.fill_bytes(&mut pdu[MeasurementPacket::SIZE..]);
    }
    pdu
}

/// Applies the test-packet TTL and TOS to a freshly bound socket.
pub(crate) fn configure_test_socket(socket: &UdpSocket, tos: u8) -> Result<()> {
    let sock = socket2::SockRef::from(socket);
    if socket.local_addr()?.is_ipv4() {
        socket.set_ttl(TEST_PACKET_TTL)?;
        sock.set_tos(tos as u32)?;
    } else {
        sock.set_unicast_hops_v6(TEST_PACKET_TTL)?;
        set_traffic_class(&sock, tos)?;
    }
    Ok(())
}

#[cfg(any(
    target_os = "android",
    target_os = "freebsd",
    target_os = "linux",
    target_os = "macos",
    target_os = "netbsd",
    target_os = "openbsd"
))]
fn set_traffic_class(sock: &socket2::SockRef, tos: u8) -> Result<()> {
    sock.set_tclass_v6(tos as u32)?;
    Ok(())
}

#[cfg(not(any(
    target_os = "android",
    target_os = "freebsd",
    target_os = "linux",
    target_os = "macos",
    target_os = "netbsd",
    target_os = "openbsd"
)))]
fn set_traffic_class(_sock: &socket2::SockRef, tos: u8) -> Result<()> {
    if tos != 0 {
        log::debug!("traffic class {:#04x} not supported on this platform", tos);
    }
    Ok(())
}

/// True when `echoed` belongs to a packet sent before `current`, using
/// serial number arithmetic so the check survives wrap-around.
fn is_stale(echoed: u32, current: u32) -> bool {
    let behind = current.wrapping_sub(echoed);
    behind != 0 && behind <= u32::MAX / 2
}

/// A running TWAMP test over a connected UDP socket.
pub struct TwampTest {
    socket: UdpSocket,
    remote: SocketAddr,
    local_host: Option<IpAddr>,
    session_id: Option<[u8; 16]>,
    config: SessionConfig,
    sequence: u32,
    rng: StdRng,
    control: Option<ControlHandle>,
}

impl TwampTest {
    /// Wraps a socket already connected to the reflector's test address.
    pub(crate) fn new(
        socket: UdpSocket,
        remote: SocketAddr,
        local_host: Option<IpAddr>,
        session_id: Option<[u8; 16]>,
        config: SessionConfig,
    ) -> Self {
        TwampTest {
            socket,
            remote,
            local_host,
            session_id,
            config,
            sequence: 0,
            rng: StdRng::from_entropy(),
            control: None,
        }
    }

    /// Ties the test to the control connection it was started over.
    pub(crate) fn with_control(mut self, control: ControlHandle) -> Self {
        self.control = Some(control);
        self
    }

    /// Fails once the owning control connection is closed or dropped.
    async fn ensure_control_open(&self) -> Result<()> {
        if let Some(control) = &self.control {
            let channel = control.upgrade().ok_or(TwampError::ConnectionClosed)?;
            if !channel.lock().await.is_open() {
                return Err(TwampError::ConnectionClosed);
            }
        }
        Ok(())
    }

    /// Throws away reflections that arrived after their deadline.
    fn discard_late_replies(&self, buf: &mut [u8]) {
        let mut discarded = 0;
        while self.socket.try_recv(buf).is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            log::debug!("discarded {} late reflected packet(s)", discarded);
        }
    }

    /// Sets the sequence number of the next test packet.
    pub fn with_sequence(mut self, sequence: u32) -> Self {
        self.sequence = sequence;
        self
    }

    /// Sequence number the next test packet will carry.
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    pub fn remote_host(&self) -> IpAddr {
        self.remote.ip()
    }

    pub fn local_host(&self) -> Option<IpAddr> {
        self.local_host
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Session id negotiated over the control channel (full mode only).
    pub fn session_id(&self) -> Option<[u8; 16]> {
        self.session_id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Size of every test packet this test sends.
    pub fn packet_size(&self) -> usize {
        MeasurementPacket::SIZE + self.config.padding
    }

    /// Sends one test packet and waits for its reflection.
    ///
    /// The sequence counter advances even when the exchange fails, so a
    /// failed iteration is simply a lost packet for the caller. Reflections
    /// of earlier packets that show up late are skipped.
    pub async fn run_once(&mut self) -> Result<TwampResult> {
        self.ensure_control_open().await?;

        let padding = self.config.padding;
        let sender_seq = self.sequence;
        let mut buf = vec![0u8; 2 * (MeasurementPacket::SIZE + padding)];
        self.discard_late_replies(&mut buf);

        let sent_at = Utc::now();
        let pdu = build_test_packet(
            sender_seq,
            TwampTimestamp::from_datetime(sent_at),
            padding,
            self.config.use_all_zeros,
            &mut self.rng,
        );
        let started = Instant::now();
        self.socket.send(&pdu).await?;
        self.sequence = self.sequence.wrapping_add(1);

        let wait = self.config.recv_timeout();
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let len = tokio::time::timeout_at(deadline, self.socket.recv(&mut buf))
                .await
                .map_err(|_| TwampError::Timeout(wait))??;
            let rtt = started.elapsed();
            let finished_at = Utc::now();

            let reply = MeasurementPacket::from_bytes(&buf[..len])?;
            if is_stale(reply.sender_sequence_number, sender_seq) {
                log::debug!(
                    "skipping late reflection of #{} while waiting for #{}",
                    reply.sender_sequence_number,
                    sender_seq
                );
                continue;
            }

            let received_padding = len - MeasurementPacket::SIZE;
            if received_padding < padding {
                return Err(FormatError::ShortPadding {
                    expected: padding,
                    actual: received_padding,
                }
                .into());
            }

            if reply.sender_sequence_number != sender_seq {
                return Err(TwampError::SequenceMismatch {
                    expected: sender_seq,
                    received: reply.sender_sequence_number,
                });
            }

            return Ok(TwampResult {
                sender_size: pdu.len(),
                seq_num: reply.sequence_number,
                timestamp: reply.timestamp,
                error_estimate: reply.error_estimate,
                receive_timestamp: reply.receive_timestamp,
                sender_seq_num: reply.sender_sequence_number,
                sender_timestamp: reply.sender_timestamp,
                sender_error_estimate: reply.sender_error_estimate,
                sender_ttl: reply.sender_ttl,
                sent_at,
                finished_at,
                rtt,
            });
        }
    }

    /// Closes the test socket.
    pub fn close(self) {
        log::debug!("closing test socket towards {}", self.remote);
    }
}
