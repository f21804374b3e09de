//! TWAMP Light: test packets go straight to a reflector whose address and
//! port are known in advance. There is no control connection.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use tokio::net::UdpSocket;

use crate::{
    error::{Result, TwampError},
    exchange::{configure_test_socket, TwampTest},
    session::SessionConfig,
};

/// Entry point for light-mode measurements.
#[derive(Debug, Clone, Copy, Default)]
pub struct LightClient;

impl LightClient {
    pub fn new() -> Self {
        LightClient
    }

    /// Records the reflector address. Performs no I/O.
    pub fn connect(&self, host: &str, port: u16) -> LightConnection {
        LightConnection {
            host: host.to_string(),
            port,
        }
    }
}

/// Reflector address for light-mode sessions.
#[derive(Debug, Clone)]
pub struct LightConnection {
    host: String,
    port: u16,
}

impl LightConnection {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn create_session(&self, config: SessionConfig) -> LightSession {
        LightSession {
            host: self.host.clone(),
            port: self.port,
            config,
        }
    }

    /// Nothing to release in light mode.
    pub fn close(&self) {}
}

/// A light-mode session: a reflector address plus the test parameters.
#[derive(Debug, Clone)]
pub struct LightSession {
    host: String,
    port: u16,
    config: SessionConfig,
}

impl LightSession {
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Resolves the reflector, binds the test socket on the configured
    /// receiver port and connects it.
    pub async fn create_test(&self) -> Result<TwampTest> {
        let remote = resolve(&self.host, self.port).await?;
        let unspecified = match remote.ip() {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };

        let socket = UdpSocket::bind(SocketAddr::new(unspecified, self.config.receiver_port)).await?;
        socket.connect(remote).await?;
        configure_test_socket(&socket, self.config.tos)?;

        // After connect the kernel has picked the outgoing interface.
        let local = socket.local_addr()?;
        log::info!("light test socket {} -> {}", local, remote);

        Ok(TwampTest::new(
            socket,
            remote,
            Some(local.ip()),
            None,
            self.config.clone(),
        ))
    }

    /// Nothing to tell the reflector in light mode.
    pub async fn stop(&self) {}
}

async fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    let first = match tokio::net::lookup_host((host, port)).await {
        Ok(mut addrs) => addrs.next(),
        Err(source) => {
            return Err(TwampError::Connect {
                addr: format!("{}:{}", host, port),
                source,
            })
        }
    };
    first.ok_or_else(|| TwampError::Connect {
        addr: format!("{}:{}", host, port),
        source: std::io::ErrorKind::NotFound.into(),
    })
}
