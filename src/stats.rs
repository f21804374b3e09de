//! Measurement results and aggregate statistics.
//!
//! `PingResults` is the document handed to result consumers: every
//! successful exchange plus a `PingStats` summary that is recomputed after
//! each iteration, so a live view is always consistent with the results
//! collected so far.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::time::TwampTimestamp;

/// Serializes a `Duration` as integer nanoseconds.
mod duration_ns {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_nanos() as u64)
    }
}

/// One completed test packet exchange.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TwampResult {
    /// Bytes sent in the test packet (header plus padding).
    pub sender_size: usize,
    /// Reflector's own sequence number.
    pub seq_num: u32,
    /// Time the reflector sent the reply.
    pub timestamp: TwampTimestamp,
    pub error_estimate: u16,
    /// Time the reflector received our packet.
    pub receive_timestamp: TwampTimestamp,
    /// Our sequence number as echoed back.
    pub sender_seq_num: u32,
    /// Our transmit timestamp as echoed back.
    pub sender_timestamp: TwampTimestamp,
    pub sender_error_estimate: u16,
    /// TTL of our packet when it reached the reflector.
    pub sender_ttl: u8,
    /// Local wall-clock time the test packet was sent.
    pub sent_at: DateTime<Utc>,
    /// Local wall-clock time the reflected packet arrived.
    pub finished_at: DateTime<Utc>,
    /// Round-trip time measured on the local clock.
    #[serde(with = "duration_ns")]
    pub rtt: Duration,
}

impl TwampResult {
    pub fn rtt(&self) -> Duration {
        self.rtt
    }

    /// Time spent inside the reflector, from its receive and send timestamps.
    pub fn reflector_delay(&self) -> Duration {
        (self.timestamp.to_datetime() - self.receive_timestamp.to_datetime())
            .to_std()
            .unwrap_or_default()
    }
}

/// Aggregate statistics of a run.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct PingStats {
    pub transmitted: u32,
    pub received: u32,
    /// Lost packets as a percentage of transmitted ones.
    pub loss: f64,
    #[serde(with = "duration_ns")]
    pub min: Duration,
    #[serde(with = "duration_ns")]
    pub max: Duration,
    #[serde(with = "duration_ns")]
    pub avg: Duration,
    #[serde(with = "duration_ns")]
    pub std_dev: Duration,
}

/// Results of a run: every received measurement plus the running stats.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PingResults {
    pub results: Vec<TwampResult>,
    pub stat: PingStats,
    #[serde(skip)]
    total_rtt: Duration,
}

impl PingResults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts a transmitted test packet.
    pub fn record_transmitted(&mut self) {
        self.stat.transmitted += 1;
        self.recompute();
    }

    /// Adds a received measurement and refreshes the stats.
    pub fn record_received(&mut self, result: TwampResult) {
        let rtt = result.rtt;
        if self.stat.received == 0 {
            self.stat.min = rtt;
            self.stat.max = rtt;
        } else {
            self.stat.min = self.stat.min.min(rtt);
            self.stat.max = self.stat.max.max(rtt);
        }
        self.total_rtt += rtt;
        self.stat.received += 1;
        self.results.push(result);
        self.recompute();
    }

    fn recompute(&mut self) {
        let stat = &mut self.stat;
        stat.loss = if stat.transmitted > 0 {
            100.0 * (stat.transmitted - stat.received) as f64 / stat.transmitted as f64
        } else {
            0.0
        };
        stat.avg = if stat.received > 0 {
            self.total_rtt / stat.received
        } else {
            Duration::ZERO
        };
        stat.std_dev = std_dev(&self.results, stat.avg);
    }

    /// Serializes the results document to JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Population standard deviation of the RTTs around `mean`.
fn std_dev(results: &[TwampResult], mean: Duration) -> Duration {
    if results.is_empty() {
        return Duration::ZERO;
    }
    let mean_ns = mean.as_nanos() as f64;
    let sum_sq: f64 = results
        .iter()
        .map(|r| {
            let diff = r.rtt.as_nanos() as f64 - mean_ns;
            diff * diff
        })
        .sum();
    Duration::from_nanos((sum_sq / results.len() as f64).sqrt() as u64)
}

fn as_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

impl PingStats {
    /// Prints the ping-style summary lines.
    pub fn print_summary(&self, host: &str) {
        println!("--- {} twamp ping statistics ---", host);
        println!(
            "{} packets transmitted, {} packets received, {:.1}% packet loss",
            self.transmitted, self.received, self.loss
        );
        println!(
            "round-trip min/avg/max/stddev = {:.3}/{:.3}/{:.3}/{:.3} ms",
            as_ms(self.min),
            as_ms(self.avg),
            as_ms(self.max),
            as_ms(self.std_dev)
        );
    }
}
