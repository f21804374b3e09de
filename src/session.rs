use std::time::Duration;

/// Receive deadline used when the configured loss threshold is zero.
const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_secs(1);

/// Parameters of one TWAMP test session.
///
/// Supplied by the caller when a session is created and never modified
/// afterwards; the test created from the session keeps its own copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// UDP port test packets are sent from (announced to the server).
    pub sender_port: u16,
    /// UDP port test packets are received on; also the local bind port. 0 picks one.
    pub receiver_port: u16,
    /// Octets appended to the 41-byte test packet header.
    pub padding: usize,
    /// Loss threshold in seconds. Also bounds each wait for a reflected packet.
    pub timeout: u32,
    /// IP type-of-service byte for test packets.
    pub tos: u8,
    /// Fill padding with zeros instead of pseudo-random bytes.
    pub use_all_zeros: bool,
    /// Delay between two consecutive test packets.
    pub interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            sender_port: 0,
            receiver_port: 0,
            padding: 0,
            timeout: 1,
            tos: 0,
            use_all_zeros: false,
            interval: Duration::from_secs(1),
        }
    }
}

impl SessionConfig {
    pub fn with_ports(mut self, sender_port: u16, receiver_port: u16) -> Self {
        self.sender_port = sender_port;
        self.receiver_port = receiver_port;
        self
    }

    pub fn with_padding(mut self, padding: usize) -> Self {
        self.padding = padding;
        self
    }

    pub fn with_timeout(mut self, seconds: u32) -> Self {
        self.timeout = seconds;
        self
    }

    pub fn with_tos(mut self, tos: u8) -> Self {
        self.tos = tos;
        self
    }

    pub fn with_all_zeros(mut self, use_all_zeros: bool) -> Self {
        self.use_all_zeros = use_all_zeros;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// How long a test waits for each reflected packet before counting it lost.
    pub fn recv_timeout(&self) -> Duration {
        if self.timeout == 0 {
            DEFAULT_RECV_TIMEOUT
        } else {
            Duration::from_secs(self.timeout as u64)
        }
    }
}
