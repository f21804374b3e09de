//! Measurement loops driving a [`TwampTest`]: the interactive `ping` and
//! the cancellable, streaming `run_x`.
//!
//! A failed exchange never ends a run. It is counted as a lost packet and
//! the loop moves on to the next sequence number.

use std::{
    io::{self, Write},
    time::Duration,
};

use tokio_util::sync::CancellationToken;

use crate::{
    error::Result,
    exchange::TwampTest,
    stats::{PingResults, PingStats, TwampResult},
};

impl TwampTest {
    /// Runs `count` exchanges, printing ping-style lines as it goes.
    ///
    /// Sleeps `interval` between packets unless `rapid` is set, in which
    /// case every packet is acknowledged with a single `!` or `.` instead.
    /// Prints the summary and closes the test socket before returning.
    pub async fn ping(mut self, count: u32, rapid: bool, interval: Duration) -> PingResults {
        let mut results = PingResults::new();
        let host = self.remote_host().to_string();
        let packet_size = self.packet_size();

        println!("TWAMP PING {}: {} data bytes", host, packet_size);

        for i in 0..count {
            results.record_transmitted();
            match self.run_once().await {
                Ok(result) => {
                    if rapid {
                        print!("!");
                    } else {
                        println!(
                            "{} bytes from {}: twamp_seq={} ttl={} time={:.3} ms",
                            packet_size,
                            host,
                            result.sender_seq_num,
                            result.sender_ttl,
                            result.rtt.as_secs_f64() * 1000.0
                        );
                    }
                    results.record_received(result);
                }
                Err(e) => {
                    log::debug!("test packet lost: {}", e);
                    if rapid {
                        print!(".");
                    } else {
                        println!("Request timeout for twamp_seq {}", self.sequence().wrapping_sub(1));
                    }
                }
            }
            if rapid {
                let _ = io::stdout().flush();
            } else if i + 1 < count {
                tokio::time::sleep(interval).await;
            }
        }

        if rapid {
            println!();
        }
        results.stat.print_summary(&host);
        self.close();
        results
    }

    /// Runs up to `count` exchanges until `cancel` fires.
    ///
    /// The token is checked before every send and raced against the
    /// inter-packet wait. `callback` sees every outcome together with the
    /// running stats, one call at a time. The test socket is closed on
    /// every exit path.
    pub async fn run_x<F>(
        mut self,
        count: u32,
        mut callback: F,
        cancel: CancellationToken,
    ) -> PingResults
    where
        F: FnMut(u32, &Result<TwampResult>, &PingStats),
    {
        let mut results = PingResults::new();
        let interval = self.config().interval;

        for i in 0..count {
            if cancel.is_cancelled() {
                log::info!("measurement cancelled");
                break;
            }

            results.record_transmitted();
            let outcome = self.run_once().await;
            match &outcome {
                Ok(result) => results.record_received(result.clone()),
                Err(e) => log::warn!("test packet lost: {}", e),
            }
            callback(count, &outcome, &results.stat);

            if i + 1 == count {
                break;
            }
            tokio::select! {
                _ = cancel.cancelled() => {
                    log::info!("measurement cancelled");
                    break;
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }

        self.close();
        results
    }
}
