//! Protocol module - Defines the ADB-style wire protocol
//!
//! Every packet is a fixed 24-byte little-endian header followed by a
//! variable length payload:
//! - 4 bytes command
//! - 4 bytes arg0
//! - 4 bytes arg1
//! - 4 bytes payload length
//! - 4 bytes payload checksum (sum of payload bytes)
//! - 4 bytes magic (bitwise NOT of command)

mod message;
mod codec;

pub use message::*;
pub use codec::*;

/// Protocol version advertised in the CONNECT handshake
pub const PROTOCOL_VERSION: u32 = 0x0100_0001;

/// Maximum payload size advertised in the CONNECT handshake
pub const MAX_PAYLOAD: u32 = 4096;

/// Default TCP port for network ADB
pub const DEFAULT_PORT: u16 = 5555;

/// System identity sent as the CONNECT payload
pub const HOST_BANNER: &[u8] = b"host::\0";

/// Size of the fixed packet header
pub const HEADER_SIZE: usize = 24;
