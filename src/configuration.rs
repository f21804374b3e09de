use std::time::Duration;

pub use clap::{Parser, ValueEnum};
use thiserror::Error;

use crate::{dscp, full::DEFAULT_CONTROL_PORT, packets::MeasurementPacket, session::SessionConfig};

/// Largest padding that still fits a test packet in one UDP datagram.
pub const MAX_PADDING: usize = 65468;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("packet count must be at least 1")]
    ZeroCount,
    #[error("packet size {0} exceeds the maximum of {max} bytes", max = MAX_PADDING)]
    SizeTooLarge(usize),
    #[error("invalid TOS value '{0}': expected 0..255 or a DSCP name")]
    InvalidTos(String),
}

/// What the binary does with the measurement results.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputMode {
    /// Ping-style lines and a summary.
    Ping,
    /// One JSON results document.
    Json,
}

/// Parses a TOS byte given either numerically (decimal or 0x-hex) or as a
/// DSCP name such as `EF` or `af41`.
pub fn parse_tos(value: &str) -> Result<u8, ConfigurationError> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16).ok(),
        None => value.parse::<u8>().ok(),
    };
    parsed
        .or_else(|| dscp::from_name(value))
        .ok_or_else(|| ConfigurationError::InvalidTos(value.to_string()))
}

#[derive(Parser, Debug, Clone)]
#[command(version, about = "TWAMP client (RFC 5357), full and light modes", long_about = None)]
pub struct Configuration {
    /// Hostname or IP address of the TWAMP server or reflector
    pub host: String,
    /// TWAMP TCP control port
    #[arg(long, default_value_t = DEFAULT_CONTROL_PORT)]
    pub cport: u16,
    /// Interval between TWAMP-Test requests (seconds)
    #[arg(short, long, default_value_t = 1)]
    pub interval: u64,
    /// Number of requests to send
    #[arg(short, long, default_value_t = 5)]
    pub count: u32,
    /// Send requests rapidly, without waiting between them
    #[arg(short, long)]
    pub rapid: bool,
    /// Padding appended to each request packet (0..65468 bytes)
    #[arg(short, long, default_value_t = 42)]
    pub size: usize,
    /// IP type-of-service value (0..255) or DSCP name
    #[arg(short, long, default_value = "0", value_parser = parse_tos)]
    pub tos: u8,
    /// Maximum wait for each reflected packet (seconds)
    #[arg(short, long, default_value_t = 1)]
    pub wait: u32,
    /// Local UDP port for test packets
    #[arg(short, long, default_value_t = 6666)]
    pub port: u16,
    /// Output mode
    #[arg(short, long, value_enum, default_value_t = OutputMode::Ping)]
    pub mode: OutputMode,
    /// Use TWAMP Light against a reflector listening on this UDP port
    #[arg(short, long)]
    pub light_port: Option<u16>,
    /// Fill padding with zeros instead of random bytes
    #[arg(short, long)]
    pub zeros: bool,
}

impl Configuration {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.count == 0 {
            return Err(ConfigurationError::ZeroCount);
        }
        if self.size > MAX_PADDING {
            return Err(ConfigurationError::SizeTooLarge(self.size));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }

    /// Total size of one test packet on the wire (UDP payload).
    pub fn packet_size(&self) -> usize {
        MeasurementPacket::SIZE + self.size
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::default()
            .with_ports(self.port, self.port)
            .with_padding(self.size)
            .with_timeout(self.wait)
            .with_tos(self.tos)
            .with_all_zeros(self.zeros)
            .with_interval(self.interval())
    }
}
