//! TWAMP client - Two-Way Active Measurement Protocol (RFC 5357).
//!
//! Measures round-trip delay and packet loss against a TWAMP server, either
//! in full mode (sessions negotiated over a TCP control connection, RFC 4656
//! / RFC 5357) or in TWAMP Light mode (test packets sent directly to a known
//! reflector port).
//!
//! # Usage
//!
//! Full mode against a server on the default control port:
//! ```bash
//! twamp 192.0.2.1 --count 10
//! ```
//!
//! TWAMP Light against a reflector on UDP port 862, JSON output:
//! ```bash
//! twamp 192.0.2.1 --light-port 862 --mode json
//! ```

/// Command-line configuration and validation.
pub mod configuration;
/// DSCP code points as TOS byte values.
pub mod dscp;
/// Error taxonomy.
pub mod error;
/// Test exchange engine shared by both modes.
pub mod exchange;
/// Full mode: TWAMP-Control handshake and session negotiation.
pub mod full;
/// TWAMP Light mode.
pub mod light;
/// Ping and streaming measurement loops.
pub mod measurement;
/// TWAMP-Control message formats and accept codes.
pub mod messages;
/// Security modes advertised in the Server-Greeting.
pub mod modes;
/// TWAMP-Test packet structure and serialization.
pub mod packets;
/// Test session parameters.
pub mod session;
/// Results and aggregate statistics.
pub mod stats;
/// NTP timestamp format.
pub mod time;

pub use error::{NegotiationError, Result, TwampError};
pub use exchange::TwampTest;
pub use full::{FullClient, FullConnection, FullSession};
pub use light::{LightClient, LightConnection, LightSession};
pub use session::SessionConfig;
pub use stats::{PingResults, PingStats, TwampResult};
