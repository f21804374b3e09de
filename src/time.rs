use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::packets::FormatError;

/// Seconds between the NTP epoch (1900-01-01) and the Unix epoch.
const NTP_UNIX_OFFSET: i64 = 2208988800;

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// TWAMP timestamp in the 64-bit NTP format (RFC 4656 Section 4.1.2).
///
/// The integer part counts seconds since 1900-01-01 UTC and the fractional
/// part counts units of 2^-32 seconds (roughly 233 ps per LSB).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize)]
pub struct TwampTimestamp {
    /// Seconds since the NTP epoch.
    pub seconds: u32,
    /// Fraction of a second in units of 2^-32 s.
    pub fraction: u32,
}

impl TwampTimestamp {
    /// Size of the encoded timestamp on the wire.
    pub const SIZE: usize = 8;

    pub fn new(seconds: u32, fraction: u32) -> Self {
        TwampTimestamp { seconds, fraction }
    }

    /// Captures the current wall-clock time.
    ///
    /// ```
    /// use twamp_client::time::TwampTimestamp;
    /// let ts = TwampTimestamp::now();
    /// assert!(ts.seconds > 0);
    /// ```
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    /// Converts a UTC instant to the wire representation.
    ///
    /// Seconds wrap modulo 2^32 as in NTP era arithmetic.
    pub fn from_datetime(date: DateTime<Utc>) -> Self {
        let seconds = (date.timestamp() + NTP_UNIX_OFFSET) as u32;
        let nanos = date.timestamp_subsec_nanos() as u64;
        let fraction = ((nanos << 32) / NANOS_PER_SEC) as u32;

        TwampTimestamp { seconds, fraction }
    }

    /// Converts back to a UTC instant, rounding the fraction to the nearest nanosecond.
    pub fn to_datetime(&self) -> DateTime<Utc> {
        let mut secs = self.seconds as i64 - NTP_UNIX_OFFSET;
        let mut nanos = ((self.fraction as u64 * NANOS_PER_SEC + (1 << 31)) >> 32) as u32;
        if nanos as u64 >= NANOS_PER_SEC {
            secs += 1;
            nanos = 0;
        }
        DateTime::<Utc>::from_timestamp(secs, nanos).unwrap_or_default()
    }

    /// Packs both halves into a single `u64` (seconds in the upper word).
    pub fn to_u64(&self) -> u64 {
        ((self.seconds as u64) << 32) | self.fraction as u64
    }

    pub fn from_u64(value: u64) -> Self {
        TwampTimestamp {
            seconds: (value >> 32) as u32,
            fraction: value as u32,
        }
    }

    pub fn to_bytes(&self) -> [u8; 8] {
        self.to_u64().to_be_bytes()
    }

    /// Reads a big-endian timestamp from the first 8 bytes of `buf`.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, FormatError> {
        let bytes: [u8; 8] = buf
            .get(..Self::SIZE)
            .and_then(|b| b.try_into().ok())
            .ok_or(FormatError::Truncated {
                what: "timestamp",
                expected: Self::SIZE,
                actual: buf.len(),
            })?;
        Ok(Self::from_u64(u64::from_be_bytes(bytes)))
    }
}

impl From<DateTime<Utc>> for TwampTimestamp {
    fn from(date: DateTime<Utc>) -> Self {
        Self::from_datetime(date)
    }
}
