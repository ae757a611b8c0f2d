//! Transport session
//!
//! Owns the TCP connection to one device and handles:
//! - The CONNECT handshake
//! - Whole-packet send/receive over a fragmenting byte stream
//! - Local/remote stream id bookkeeping
//! - Best-effort teardown

use bytes::BytesMut;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::{resolve_host, Endpoint, NetworkConfig};
use crate::protocol::{
    command_label, encode_into, CodecError, Command, Decoder, Packet, PeerInfo, HOST_BANNER,
    MAX_PAYLOAD, PROTOCOL_VERSION,
};

/// Errors raised while sending or receiving packets
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Codec(#[from] CodecError),

    #[error("Connection closed by peer")]
    Closed,

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Not connected")]
    NotConnected,
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Errors raised while opening a session
#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("Could not resolve {endpoint}: {source}")]
    Resolve {
        endpoint: String,
        source: std::io::Error,
    },

    #[error("TCP connect failed: {0}")]
    Io(std::io::Error),

    #[error("Connection timeout after {0:?}")]
    Timeout(Duration),

    #[error("Handshake rejected: peer answered {command}")]
    Rejected { command: String },

    #[error("Connection closed during handshake")]
    Closed,

    #[error("Handshake failed: {0}")]
    Transport(#[from] TransportError),
}

pub type ConnectResult<T> = Result<T, ConnectError>;

/// Session traffic statistics
#[derive(Debug, Default, Clone)]
pub struct SessionStats {
    /// Packets sent
    pub packets_sent: u64,
    /// Packets received
    pub packets_received: u64,
    /// Bytes sent
    pub bytes_sent: u64,
    /// Bytes received
    pub bytes_received: u64,
}

/// One logical connection to a device
pub struct Session {
    /// Endpoint this session was opened against
    endpoint: Endpoint,
    /// Resolved peer address
    remote_addr: SocketAddr,
    /// The TCP stream, `None` once closed
    stream: Option<TcpStream>,
    /// Packet decoder
    decoder: Decoder,
    /// Read buffer
    read_buf: BytesMut,
    /// Write buffer
    write_buf: BytesMut,
    /// Per-operation I/O timeout
    io_timeout: Duration,
    /// Our id for every stream we open
    local_id: u32,
    /// Peer id of the currently open stream, 0 if none
    remote_id: u32,
    /// A write was started but never finished
    unframed: bool,
    /// Peer identity from the handshake
    peer: Option<PeerInfo>,
    /// When the handshake completed
    opened_at: Instant,
    /// Statistics
    stats: SessionStats,
}

impl Session {
    /// Connect to `endpoint` and perform the CONNECT handshake.
    ///
    /// The socket is dropped on any failure, so a rejected handshake never
    /// leaves a half-open connection behind.
    pub async fn open(endpoint: &Endpoint, config: &NetworkConfig) -> ConnectResult<Self> {
        let lookup = tokio::time::timeout(
            config.connect_timeout,
            resolve_host(endpoint.host(), endpoint.port()),
        );
        let remote_addr = match lookup.await {
            Ok(Ok(addr)) => addr,
            Ok(Err(source)) => {
                return Err(ConnectError::Resolve {
                    endpoint: endpoint.to_string(),
                    source,
                })
            }
            Err(_) => return Err(ConnectError::Timeout(config.connect_timeout)),
        };

        tracing::debug!("Connecting to {} ({})", endpoint, remote_addr);

        let stream = match tokio::time::timeout(
            config.connect_timeout,
            TcpStream::connect(remote_addr),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(ConnectError::Io(e)),
            Err(_) => return Err(ConnectError::Timeout(config.connect_timeout)),
        };

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("Could not set TCP_NODELAY: {}", e);
        }

        let mut session = Self::new(stream, remote_addr, endpoint.clone(), config);

        match session.handshake().await {
            Ok(peer) => {
                tracing::info!(
                    "Handshake complete with {} (version {:#010x}, max payload {}, banner '{}')",
                    endpoint,
                    peer.version,
                    peer.max_payload,
                    peer.banner
                );
                session.peer = Some(peer);
                session.opened_at = Instant::now();
                Ok(session)
            }
            Err(e) => {
                session.abort();
                Err(e)
            }
        }
    }

    fn new(
        stream: TcpStream,
        remote_addr: SocketAddr,
        endpoint: Endpoint,
        config: &NetworkConfig,
    ) -> Self {
        let decoder = if config.strict_checksums {
            Decoder::strict()
        } else {
            Decoder::new()
        };

        Self {
            endpoint,
            remote_addr,
            stream: Some(stream),
            decoder,
            read_buf: BytesMut::with_capacity(4096),
            write_buf: BytesMut::with_capacity(4096),
            io_timeout: config.read_timeout,
            local_id: config.local_stream_id,
            remote_id: 0,
            unframed: false,
            peer: None,
            opened_at: Instant::now(),
            stats: SessionStats::default(),
        }
    }

    async fn handshake(&mut self) -> ConnectResult<PeerInfo> {
        self.send_raw(Command::Connect, PROTOCOL_VERSION, MAX_PAYLOAD, HOST_BANNER)
            .await?;

        let reply = self.recv_raw().await?.ok_or(ConnectError::Closed)?;
        if !reply.is(Command::Connect) {
            return Err(ConnectError::Rejected {
                command: command_label(reply.command),
            });
        }

        Ok(PeerInfo::from_packet(&reply))
    }

    /// Encode and write one packet, then flush
    pub async fn send_raw(
        &mut self,
        command: Command,
        arg0: u32,
        arg1: u32,
        payload: &[u8],
    ) -> TransportResult<()> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;

        self.write_buf.clear();
        encode_into(command.code(), arg0, arg1, payload, &mut self.write_buf);
        self.unframed = true;

        let buf = &self.write_buf;
        let write = async move {
            stream.write_all(buf).await?;
            stream.flush().await
        };

        let result = tokio::time::timeout(self.io_timeout, write).await;
        match result {
            Ok(Ok(())) => self.unframed = false,
            Ok(Err(e)) => {
                self.abort();
                return Err(TransportError::Io(e));
            }
            Err(_) => {
                // a partial write leaves the stream unframed
                self.abort();
                return Err(TransportError::Timeout(self.io_timeout));
            }
        }

        self.stats.packets_sent += 1;
        self.stats.bytes_sent += self.write_buf.len() as u64;
        tracing::trace!(
            "-> {} (arg0={}, arg1={}, len={})",
            command,
            arg0,
            arg1,
            payload.len()
        );

        Ok(())
    }

    /// Receive one whole packet.
    ///
    /// Returns `Ok(None)` when the peer closes the stream, including when it
    /// does so partway through a header or payload.
    pub async fn recv_raw(&mut self) -> TransportResult<Option<Packet>> {
        loop {
            match self.decoder.decode(&mut self.read_buf) {
                Ok(Some(packet)) => {
                    self.stats.packets_received += 1;
                    tracing::trace!("<- {}", packet);
                    return Ok(Some(packet));
                }
                Ok(None) => {}
                Err(e) => {
                    self.abort();
                    return Err(TransportError::Codec(e));
                }
            }

            let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
            self.read_buf.reserve(4096);
            let result =
                tokio::time::timeout(self.io_timeout, stream.read_buf(&mut self.read_buf)).await;

            let n = match result {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => {
                    self.abort();
                    return Err(TransportError::Io(e));
                }
                Err(_) => return Err(TransportError::Timeout(self.io_timeout)),
            };

            if n == 0 {
                if self.decoder.is_mid_packet() || !self.read_buf.is_empty() {
                    tracing::debug!(
                        "Peer {} closed the stream mid-packet ({} bytes buffered)",
                        self.endpoint,
                        self.read_buf.len()
                    );
                } else {
                    tracing::debug!("Peer {} closed the stream", self.endpoint);
                }
                self.abort();
                return Ok(None);
            }

            self.stats.bytes_received += n as u64;
        }
    }

    /// Close the session.
    ///
    /// Sends a best-effort CLOSE for the open stream, if any, then releases
    /// the socket. Safe to call more than once. If an earlier write was cut
    /// off partway (its future dropped), nothing more is written.
    pub async fn close(&mut self) {
        if self.stream.is_none() {
            return;
        }

        if self.unframed {
            tracing::debug!(
                "Write to {} was interrupted, dropping without CLOSE",
                self.endpoint
            );
            self.abort();
            return;
        }

        if self.remote_id != 0 {
            let (local, remote) = (self.local_id, self.remote_id);
            if let Err(e) = self.send_raw(Command::Close, local, remote, &[]).await {
                tracing::debug!("Ignoring CLOSE failure during teardown: {}", e);
            }
        }

        if let Some(mut stream) = self.stream.take() {
            let _ = tokio::time::timeout(self.io_timeout, stream.shutdown()).await;
        }
        self.reset();

        tracing::info!(
            "Session to {} closed after {:?} ({} packets sent, {} received)",
            self.endpoint,
            self.opened_at.elapsed(),
            self.stats.packets_sent,
            self.stats.packets_received
        );
    }

    /// Drop the socket without any further traffic
    fn abort(&mut self) {
        if self.stream.take().is_some() {
            tracing::debug!("Dropping connection to {}", self.endpoint);
        }
        self.reset();
    }

    fn reset(&mut self) {
        self.remote_id = 0;
        self.unframed = false;
        self.read_buf.clear();
        self.decoder.reset();
    }

    /// Whether the socket is still held
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn local_stream_id(&self) -> u32 {
        self.local_id
    }

    pub fn remote_stream_id(&self) -> u32 {
        self.remote_id
    }

    pub(crate) fn set_remote_stream_id(&mut self, remote_id: u32) {
        self.remote_id = remote_id;
    }

    /// Peer identity from the handshake
    pub fn peer_info(&self) -> Option<&PeerInfo> {
        self.peer.as_ref()
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.stream.is_some() {
            tracing::debug!("Session to {} dropped without close", self.endpoint);
        }
    }
}
