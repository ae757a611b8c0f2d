//! Network module - Handles the TCP side of the protocol
//!
//! Provides:
//! - Session for the handshake and whole-packet exchange
//! - Executor for one open/ack/close shell stream
//! - Reconnection policy for bounded connect retries
//! - Client tying the three together for callers

mod session;
mod executor;
mod reconnect;
mod client;

pub use session::*;
pub use executor::*;
pub use reconnect::*;
pub use client::*;

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

/// Configuration for network operations
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// Timeout applied to every read and write on the socket
    pub read_timeout: Duration,
    /// Stream id this client assigns to its side of every stream
    pub local_stream_id: u32,
    /// Verify magic and checksum of received packets
    pub strict_checksums: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(5),
            local_stream_id: 1,
            strict_checksums: false,
        }
    }
}

impl NetworkConfig {
    pub fn with_timeouts(mut self, connect_timeout: Duration, read_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self.read_timeout = read_timeout;
        self
    }

    pub fn strict(mut self) -> Self {
        self.strict_checksums = true;
        self
    }
}

/// A remote host and port
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Returns `None` for an empty host or port 0
    pub fn new(host: impl Into<String>, port: u16) -> Option<Self> {
        let host = host.into();
        if host.trim().is_empty() || port == 0 {
            return None;
        }
        Some(Self { host, port })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Resolve a hostname to a socket address
pub async fn resolve_host(host: &str, port: u16) -> std::io::Result<SocketAddr> {
    use tokio::net::lookup_host;

    let mut addrs = lookup_host((host, port)).await?;

    addrs.next().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Could not resolve host: {}", host),
        )
    })
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_validation() {
        assert!(Endpoint::new("127.0.0.1", 5555).is_some());
        assert!(Endpoint::new("127.0.0.1", 0).is_none());
        assert!(Endpoint::new("  ", 5555).is_none());

        let endpoint = Endpoint::new("tablet.local", 5555).unwrap();
        assert_eq!(endpoint.to_string(), "tablet.local:5555");
    }

    #[tokio::test]
    async fn test_resolve_localhost() {
        let addr = resolve_host("127.0.0.1", 5555).await.unwrap();
        assert_eq!(addr.port(), 5555);
        assert!(addr.ip().is_loopback());
    }
}
