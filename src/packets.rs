//! TWAMP-Test packet structures as defined in RFC 5357 Section 4.2.
//!
//! A single 41-byte header layout is used for both directions: the
//! Session-Sender fills only the leading sequence number, timestamp and
//! error estimate, and the Session-Reflector fills the rest when it echoes
//! the packet back. The header is followed on the wire by padding whose
//! length was agreed when the session was set up.

use thiserror::Error;

use crate::time::TwampTimestamp;

/// Errors raised while decoding fixed-layout wire structures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// The buffer is shorter than the fixed layout requires.
    #[error("buffer too small for {what}: expected {expected} bytes, got {actual}")]
    Truncated {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    /// The reflected packet carried less padding than was negotiated.
    #[error("incorrect padding: expected {expected} bytes but received {actual}")]
    ShortPadding { expected: usize, actual: usize },
}

/// Returns `FormatError::Truncated` unless `buf` holds at least `expected` bytes.
pub(crate) fn ensure_len(buf: &[u8], expected: usize, what: &'static str) -> Result<(), FormatError> {
    if buf.len() < expected {
        return Err(FormatError::Truncated {
            what,
            expected,
            actual: buf.len(),
        });
    }
    Ok(())
}

pub(crate) fn be_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([buf[at], buf[at + 1]])
}

pub(crate) fn be_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

pub(crate) fn timestamp_at(buf: &[u8], at: usize) -> TwampTimestamp {
    TwampTimestamp::new(be_u32(buf, at), be_u32(buf, at + 4))
}

/// TWAMP-Test measurement packet header (41 bytes, padding excluded).
///
/// Wire format:
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                        Sequence Number                       |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                          Timestamp                           |
/// |                                                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |         Error Estimate        |           MBZ                 |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                          Receive Timestamp                    |
/// |                                                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                 Sender Sequence Number                        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                      Sender Timestamp                         |
/// |                                                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |      Sender Error Estimate    |           MBZ                 |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |  Sender TTL   |  Packet Padding (variable) ...
/// +-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct MeasurementPacket {
    /// Sequence number of this packet (sender's or reflector's).
    pub sequence_number: u32,
    /// Transmit timestamp.
    pub timestamp: TwampTimestamp,
    /// Error estimate of `timestamp`.
    pub error_estimate: u16,
    /// Must Be Zero.
    pub mbz1: u16,
    /// Time the reflector received the test packet.
    pub receive_timestamp: TwampTimestamp,
    /// Sender sequence number echoed by the reflector.
    pub sender_sequence_number: u32,
    /// Sender timestamp echoed by the reflector.
    pub sender_timestamp: TwampTimestamp,
    /// Sender error estimate echoed by the reflector.
    pub sender_error_estimate: u16,
    /// Must Be Zero.
    pub mbz2: u16,
    /// TTL of the test packet as seen by the reflector.
    pub sender_ttl: u8,
}

impl MeasurementPacket {
    /// Header size on the wire.
    pub const SIZE: usize = 41;

    /// Serializes the header to its 41-byte big-endian wire format.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.sequence_number.to_be_bytes());
        buf[4..12].copy_from_slice(&self.timestamp.to_bytes());
        buf[12..14].copy_from_slice(&self.error_estimate.to_be_bytes());
        buf[14..16].copy_from_slice(&self.mbz1.to_be_bytes());
        buf[16..24].copy_from_slice(&self.receive_timestamp.to_bytes());
        buf[24..28].copy_from_slice(&self.sender_sequence_number.to_be_bytes());
        buf[28..36].copy_from_slice(&self.sender_timestamp.to_bytes());
        buf[36..38].copy_from_slice(&self.sender_error_estimate.to_be_bytes());
        buf[38..40].copy_from_slice(&self.mbz2.to_be_bytes());
        buf[40] = self.sender_ttl;
        buf
    }

    /// Deserializes a header from big-endian wire format.
    ///
    /// Bytes past the header (padding) are ignored.
    ///
    /// # Errors
    /// Returns `FormatError::Truncated` if the buffer is smaller than 41 bytes.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, FormatError> {
        ensure_len(buf, Self::SIZE, "MeasurementPacket")?;
        Ok(Self {
            sequence_number: be_u32(buf, 0),
            timestamp: timestamp_at(buf, 4),
            error_estimate: be_u16(buf, 12),
            mbz1: be_u16(buf, 14),
            receive_timestamp: timestamp_at(buf, 16),
            sender_sequence_number: be_u32(buf, 24),
            sender_timestamp: timestamp_at(buf, 28),
            sender_error_estimate: be_u16(buf, 36),
            mbz2: be_u16(buf, 38),
            sender_ttl: buf[40],
        })
    }
}
