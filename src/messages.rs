//! TWAMP-Control messages (RFC 4656 Section 3, RFC 5357 Section 3).
//!
//! Every message has a fixed layout; fields live at fixed byte offsets and
//! all multi-byte integers are big-endian. Unused regions (MBZ, HMAC, IVs in
//! unauthenticated mode) are left zeroed on encode and skipped on decode.

use std::fmt;

use crate::{
    error::NegotiationError,
    modes::SecurityMode,
    packets::{be_u16, be_u32, ensure_len, timestamp_at, FormatError},
    time::TwampTimestamp,
};

/// Accept field carried by every server response (RFC 4656 Section 3.3).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum AcceptStatus {
    Ok = 0,
    Failed = 1,
    InternalError = 2,
    NotSupported = 3,
    PermanentResourceLimitation = 4,
    TemporaryResourceLimitation = 5,
}

impl AcceptStatus {
    /// Maps a wire value to a status; values above 5 are not defined.
    pub fn from_byte(value: u8) -> Option<Self> {
        match value {
            0 => Some(AcceptStatus::Ok),
            1 => Some(AcceptStatus::Failed),
            2 => Some(AcceptStatus::InternalError),
            3 => Some(AcceptStatus::NotSupported),
            4 => Some(AcceptStatus::PermanentResourceLimitation),
            5 => Some(AcceptStatus::TemporaryResourceLimitation),
            _ => None,
        }
    }

    /// Checks a received Accept value.
    ///
    /// `context` names the negotiation step ("connection", "session",
    /// "test setup") and ends up in the error message.
    pub fn check(value: u8, context: &'static str) -> Result<(), NegotiationError> {
        match Self::from_byte(value) {
            Some(AcceptStatus::Ok) => Ok(()),
            Some(status) => Err(NegotiationError::Rejected { context, status }),
            None => Err(NegotiationError::UnknownStatus {
                context,
                code: value,
            }),
        }
    }
}

impl fmt::Display for AcceptStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            AcceptStatus::Ok => write!(f, "ok"),
            AcceptStatus::Failed => write!(f, "failed"),
            AcceptStatus::InternalError => write!(f, "internal error"),
            AcceptStatus::NotSupported => write!(f, "not supported"),
            AcceptStatus::PermanentResourceLimitation => {
                write!(f, "permanent resource limitation")
            }
            AcceptStatus::TemporaryResourceLimitation => {
                write!(f, "temporary resource limitation")
            }
        }
    }
}

/// Server-Greeting (64 bytes).
///
/// ```text
///  0..12   Unused
/// 12..16   Modes
/// 16..32   Challenge
/// 32..48   Salt
/// 48..52   Count
/// 52..64   MBZ
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServerGreeting {
    pub modes: u32,
    pub challenge: [u8; 16],
    pub salt: [u8; 16],
    pub count: u32,
}

impl ServerGreeting {
    pub const SIZE: usize = 64;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[12..16].copy_from_slice(&self.modes.to_be_bytes());
        buf[16..32].copy_from_slice(&self.challenge);
        buf[32..48].copy_from_slice(&self.salt);
        buf[48..52].copy_from_slice(&self.count.to_be_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, FormatError> {
        ensure_len(buf, Self::SIZE, "Server-Greeting")?;
        let mut challenge = [0u8; 16];
        challenge.copy_from_slice(&buf[16..32]);
        let mut salt = [0u8; 16];
        salt.copy_from_slice(&buf[32..48]);
        Ok(Self {
            modes: be_u32(buf, 12),
            challenge,
            salt,
            count: be_u32(buf, 48),
        })
    }
}

/// Set-Up-Response sent by the client (164 bytes).
///
/// Key-ID, Token and Client-IV only matter in authenticated and encrypted
/// modes and stay zeroed here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientSetupResponse {
    pub mode: u32,
    pub key_id: [u8; 80],
    pub token: [u8; 64],
    pub client_iv: [u8; 16],
}

impl ClientSetupResponse {
    pub const SIZE: usize = 4 + 80 + 64 + 16;

    /// Response selecting unauthenticated mode.
    pub fn unauthenticated() -> Self {
        ClientSetupResponse {
            mode: SecurityMode::Unauthenticated.bits(),
            key_id: [0u8; 80],
            token: [0u8; 64],
            client_iv: [0u8; 16],
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.mode.to_be_bytes());
        buf[4..84].copy_from_slice(&self.key_id);
        buf[84..148].copy_from_slice(&self.token);
        buf[148..164].copy_from_slice(&self.client_iv);
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, FormatError> {
        ensure_len(buf, Self::SIZE, "Set-Up-Response")?;
        let mut key_id = [0u8; 80];
        key_id.copy_from_slice(&buf[4..84]);
        let mut token = [0u8; 64];
        token.copy_from_slice(&buf[84..148]);
        let mut client_iv = [0u8; 16];
        client_iv.copy_from_slice(&buf[148..164]);
        Ok(Self {
            mode: be_u32(buf, 0),
            key_id,
            token,
            client_iv,
        })
    }
}

/// Server-Start (48 bytes).
///
/// ```text
///  0..15   MBZ
/// 15       Accept
/// 16..32   Server-IV
/// 32..40   Start-Time
/// 40..48   MBZ
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServerStart {
    pub accept: u8,
    pub server_iv: [u8; 16],
    pub start_time: TwampTimestamp,
}

impl ServerStart {
    pub const SIZE: usize = 48;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[15] = self.accept;
        buf[16..32].copy_from_slice(&self.server_iv);
        buf[32..40].copy_from_slice(&self.start_time.to_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, FormatError> {
        ensure_len(buf, Self::SIZE, "Server-Start")?;
        let mut server_iv = [0u8; 16];
        server_iv.copy_from_slice(&buf[16..32]);
        Ok(Self {
            accept: buf[15],
            server_iv,
            start_time: timestamp_at(buf, 32),
        })
    }
}

/// Request-TW-Session (112 bytes, command number 5).
///
/// Sender/receiver addresses and the session id are left zeroed so the
/// server uses the control connection's addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestTwSession {
    /// 4 for IPv4, 6 for IPv6.
    pub ip_version: u8,
    pub sender_port: u16,
    pub receiver_port: u16,
    pub padding_length: u32,
    pub start_time: TwampTimestamp,
    /// Loss threshold in whole seconds (fraction is always zero).
    pub timeout: u32,
    /// Type-P descriptor, carrying the TOS/DSCP value.
    pub type_p: u32,
}

impl RequestTwSession {
    pub const SIZE: usize = 112;
    pub const COMMAND: u8 = 5;

    const OFFSET_COMMAND: usize = 0;
    const OFFSET_IP_VERSION: usize = 1;
    const OFFSET_SENDER_PORT: usize = 12;
    const OFFSET_RECEIVER_PORT: usize = 14;
    const OFFSET_PADDING_LENGTH: usize = 64;
    const OFFSET_START_TIME: usize = 68;
    const OFFSET_TIMEOUT: usize = 76;
    const OFFSET_TYPE_P: usize = 84;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[Self::OFFSET_COMMAND] = Self::COMMAND;
        buf[Self::OFFSET_IP_VERSION] = self.ip_version;
        buf[Self::OFFSET_SENDER_PORT..Self::OFFSET_SENDER_PORT + 2]
            .copy_from_slice(&self.sender_port.to_be_bytes());
        buf[Self::OFFSET_RECEIVER_PORT..Self::OFFSET_RECEIVER_PORT + 2]
            .copy_from_slice(&self.receiver_port.to_be_bytes());
        buf[Self::OFFSET_PADDING_LENGTH..Self::OFFSET_PADDING_LENGTH + 4]
            .copy_from_slice(&self.padding_length.to_be_bytes());
        buf[Self::OFFSET_START_TIME..Self::OFFSET_START_TIME + 8]
            .copy_from_slice(&self.start_time.to_bytes());
        buf[Self::OFFSET_TIMEOUT..Self::OFFSET_TIMEOUT + 4]
            .copy_from_slice(&self.timeout.to_be_bytes());
        buf[Self::OFFSET_TYPE_P..Self::OFFSET_TYPE_P + 4]
            .copy_from_slice(&self.type_p.to_be_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, FormatError> {
        ensure_len(buf, Self::SIZE, "Request-TW-Session")?;
        Ok(Self {
            ip_version: buf[Self::OFFSET_IP_VERSION],
            sender_port: be_u16(buf, Self::OFFSET_SENDER_PORT),
            receiver_port: be_u16(buf, Self::OFFSET_RECEIVER_PORT),
            padding_length: be_u32(buf, Self::OFFSET_PADDING_LENGTH),
            start_time: timestamp_at(buf, Self::OFFSET_START_TIME),
            timeout: be_u32(buf, Self::OFFSET_TIMEOUT),
            type_p: be_u32(buf, Self::OFFSET_TYPE_P),
        })
    }
}

/// Accept-Session (48 bytes on the wire, only the first 20 are used).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AcceptSession {
    pub accept: u8,
    /// UDP port the reflector listens on for this session.
    pub port: u16,
    pub sid: [u8; 16],
}

impl AcceptSession {
    pub const SIZE: usize = 48;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = self.accept;
        buf[2..4].copy_from_slice(&self.port.to_be_bytes());
        buf[4..20].copy_from_slice(&self.sid);
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, FormatError> {
        ensure_len(buf, Self::SIZE, "Accept-Session")?;
        let mut sid = [0u8; 16];
        sid.copy_from_slice(&buf[4..20]);
        Ok(Self {
            accept: buf[0],
            port: be_u16(buf, 2),
            sid,
        })
    }
}

/// Start-Sessions (32 bytes, command number 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StartSessions;

impl StartSessions {
    pub const SIZE: usize = 32;
    pub const COMMAND: u8 = 2;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = Self::COMMAND;
        buf
    }

    /// Returns the command number found in a received request.
    pub fn command_of(buf: &[u8]) -> Result<u8, FormatError> {
        ensure_len(buf, Self::SIZE, "Start-Sessions")?;
        Ok(buf[0])
    }
}

/// Start-Ack (32 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StartAck {
    pub accept: u8,
}

impl StartAck {
    pub const SIZE: usize = 32;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = self.accept;
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, FormatError> {
        ensure_len(buf, Self::SIZE, "Start-Ack")?;
        Ok(Self { accept: buf[0] })
    }
}

/// Stop-Sessions (32 bytes, command number 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopSessions {
    pub accept: u8,
    pub sessions: u16,
}

impl Default for StopSessions {
    fn default() -> Self {
        StopSessions {
            accept: AcceptStatus::Ok as u8,
            sessions: 1,
        }
    }
}

impl StopSessions {
    pub const SIZE: usize = 32;
    pub const COMMAND: u8 = 3;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = Self::COMMAND;
        buf[1] = self.accept;
        buf[4..6].copy_from_slice(&self.sessions.to_be_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, FormatError> {
        ensure_len(buf, Self::SIZE, "Stop-Sessions")?;
        Ok(Self {
            accept: buf[1],
            sessions: be_u16(buf, 4),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_status_mapping() {
        assert!(AcceptStatus::check(0, "session").is_ok());
        for code in 1u8..=5 {
            let status = AcceptStatus::from_byte(code).unwrap();
            assert_eq!(status as u8, code);
            assert_eq!(
                AcceptStatus::check(code, "session"),
                Err(NegotiationError::Rejected {
                    context: "session",
                    status
                })
            );
        }
        for code in [6u8, 42, 255] {
            assert_eq!(AcceptStatus::from_byte(code), None);
            assert_eq!(
                AcceptStatus::check(code, "session"),
                Err(NegotiationError::UnknownStatus {
                    context: "session",
                    code
                })
            );
        }
    }

    #[test]
    fn test_rejection_message() {
        let err = AcceptStatus::check(2, "connection").unwrap_err();
        assert_eq!(err.to_string(), "the connection failed: internal error");
        let err = AcceptStatus::check(1, "test setup").unwrap_err();
        assert_eq!(err.to_string(), "the test setup failed");
    }

    #[test]
    fn test_server_greeting_layout() {
        let greeting = ServerGreeting {
            modes: 7,
            challenge: [0xAA; 16],
            salt: [0xBB; 16],
            count: 1024,
        };
        let bytes = greeting.to_bytes();
        assert_eq!(&bytes[0..12], &[0u8; 12]);
        assert_eq!(&bytes[12..16], &[0, 0, 0, 7]);
        assert_eq!(bytes[16], 0xAA);
        assert_eq!(bytes[47], 0xBB);
        assert_eq!(&bytes[48..52], &1024u32.to_be_bytes());
        assert_eq!(ServerGreeting::from_bytes(&bytes).unwrap(), greeting);
    }

    #[test]
    fn test_setup_response_is_unauthenticated() {
        let bytes = ClientSetupResponse::unauthenticated().to_bytes();
        assert_eq!(bytes.len(), 164);
        assert_eq!(&bytes[0..4], &[0, 0, 0, 1]);
        assert!(bytes[4..].iter().all(|&b| b == 0));
        assert_eq!(
            ClientSetupResponse::from_bytes(&bytes).unwrap(),
            ClientSetupResponse::unauthenticated()
        );
    }

    #[test]
    fn test_server_start_layout() {
        let start = ServerStart {
            accept: 2,
            server_iv: [0x11; 16],
            start_time: TwampTimestamp::new(0xA0B0C0D0, 0x01020304),
        };
        let bytes = start.to_bytes();
        assert_eq!(bytes[15], 2);
        assert_eq!(&bytes[32..40], &[0xA0, 0xB0, 0xC0, 0xD0, 1, 2, 3, 4]);
        assert_eq!(ServerStart::from_bytes(&bytes).unwrap(), start);
    }

    #[test]
    fn test_request_tw_session_layout() {
        let request = RequestTwSession {
            ip_version: 4,
            sender_port: 6666,
            receiver_port: 6667,
            padding_length: 42,
            start_time: TwampTimestamp::new(1, 2),
            timeout: 3,
            type_p: 0xB8,
        };
        let bytes = request.to_bytes();
        assert_eq!(bytes.len(), 112);
        assert_eq!(bytes[0], 5);
        assert_eq!(bytes[1], 4);
        assert_eq!(&bytes[12..14], &6666u16.to_be_bytes());
        assert_eq!(&bytes[14..16], &6667u16.to_be_bytes());
        assert_eq!(&bytes[64..68], &42u32.to_be_bytes());
        assert_eq!(&bytes[68..76], &[0, 0, 0, 1, 0, 0, 0, 2]);
        assert_eq!(&bytes[76..84], &[0, 0, 0, 3, 0, 0, 0, 0]);
        assert_eq!(&bytes[84..88], &[0, 0, 0, 0xB8]);
        assert!(bytes[88..].iter().all(|&b| b == 0));
        assert_eq!(RequestTwSession::from_bytes(&bytes).unwrap(), request);
    }

    #[test]
    fn test_accept_session_layout() {
        let accept = AcceptSession {
            accept: 0,
            port: 862,
            sid: [0x5A; 16],
        };
        let bytes = accept.to_bytes();
        assert_eq!(&bytes[2..4], &862u16.to_be_bytes());
        assert_eq!(AcceptSession::from_bytes(&bytes).unwrap(), accept);
    }

    #[test]
    fn test_start_and_stop_commands() {
        assert_eq!(StartSessions.to_bytes()[0], 2);
        assert_eq!(StartSessions::command_of(&StartSessions.to_bytes()).unwrap(), 2);

        let ack = StartAck { accept: 3 };
        assert_eq!(StartAck::from_bytes(&ack.to_bytes()).unwrap(), ack);

        let stop = StopSessions::default().to_bytes();
        assert_eq!(stop[0], 3);
        assert_eq!(stop[1], 0);
        assert_eq!(&stop[4..6], &[0, 1]);
        assert_eq!(
            StopSessions::from_bytes(&stop).unwrap(),
            StopSessions::default()
        );
    }

    #[test]
    fn test_short_buffers_rejected() {
        assert!(ServerGreeting::from_bytes(&[0u8; 63]).is_err());
        assert!(ServerStart::from_bytes(&[0u8; 47]).is_err());
        assert!(AcceptSession::from_bytes(&[0u8; 20]).is_err());
        assert!(StartAck::from_bytes(&[0u8; 31]).is_err());
        assert!(RequestTwSession::from_bytes(&[0u8; 111]).is_err());
        assert!(ClientSetupResponse::from_bytes(&[0u8; 163]).is_err());
    }
}
