//! Protocol message definitions
//!
//! Defines the command identifiers and the packet type exchanged with the
//! remote device.

use std::fmt;

use bytes::Bytes;

/// Command identifiers understood by this client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Command {
    /// Connection handshake
    Connect = 0x4e58_4e43,
    /// Stream ready / acknowledgement
    Okay = 0x5941_4b4f,
    /// Stream data
    Write = 0x4554_5257,
    /// Stream close
    Close = 0x4553_4c43,
    /// Open a service stream
    Open = 0x4e45_504f,
}

impl Command {
    /// Raw 32-bit identifier as it appears on the wire
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Look up a known command from its wire identifier
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0x4e58_4e43 => Some(Command::Connect),
            0x5941_4b4f => Some(Command::Okay),
            0x4554_5257 => Some(Command::Write),
            0x4553_4c43 => Some(Command::Close),
            0x4e45_504f => Some(Command::Open),
            _ => None,
        }
    }

    /// Four-letter mnemonic used in logs
    pub fn name(self) -> &'static str {
        match self {
            Command::Connect => "CNXN",
            Command::Okay => "OKAY",
            Command::Write => "WRTE",
            Command::Close => "CLSE",
            Command::Open => "OPEN",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Formats a raw command identifier, falling back to hex for unknown codes
pub fn command_label(code: u32) -> String {
    match Command::from_code(code) {
        Some(command) => command.name().to_string(),
        None => format!("{:#010x}", code),
    }
}

/// A single protocol packet
///
/// The command is kept as its raw wire value so that packets carrying
/// commands this client does not know (AUTH, SYNC, ...) can still be
/// received and reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub command: u32,
    pub arg0: u32,
    pub arg1: u32,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(command: Command, arg0: u32, arg1: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            command: command.code(),
            arg0,
            arg1,
            payload: payload.into(),
        }
    }

    /// The known command of this packet, if any
    pub fn kind(&self) -> Option<Command> {
        Command::from_code(self.command)
    }

    /// Whether this packet carries the given command
    pub fn is(&self, command: Command) -> bool {
        self.command == command.code()
    }

    /// Payload with trailing NUL bytes stripped, lossily decoded as UTF-8
    pub fn payload_text(&self) -> String {
        let end = self
            .payload
            .iter()
            .rposition(|&b| b != 0)
            .map_or(0, |i| i + 1);
        String::from_utf8_lossy(&self.payload[..end]).into_owned()
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}(arg0={}, arg1={}, len={})",
            command_label(self.command),
            self.arg0,
            self.arg1,
            self.payload.len()
        )
    }
}

/// Identity reported by the peer in its CONNECT reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    /// Protocol version announced by the peer
    pub version: u32,
    /// Maximum payload the peer accepts
    pub max_payload: u32,
    /// Banner string, e.g. `device::ro.product.name=...`
    pub banner: String,
}

impl PeerInfo {
    pub fn from_packet(packet: &Packet) -> Self {
        Self {
            version: packet.arg0,
            max_payload: packet.arg1,
            banner: packet.payload_text(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_codes_are_ascii_mnemonics() {
        for command in [
            Command::Connect,
            Command::Okay,
            Command::Write,
            Command::Close,
            Command::Open,
        ] {
            let bytes = command.code().to_le_bytes();
            assert_eq!(&bytes, command.name().as_bytes());
            assert_eq!(Command::from_code(command.code()), Some(command));
        }
    }

    #[test]
    fn test_unknown_command_label() {
        // AUTH is not handled by this client
        assert_eq!(Command::from_code(0x4854_5541), None);
        assert_eq!(command_label(0x4854_5541), "0x48545541");
        assert_eq!(command_label(Command::Okay.code()), "OKAY");
    }

    #[test]
    fn test_payload_text_strips_trailing_nul() {
        let packet = Packet::new(Command::Connect, 1, 2, &b"device::model=x\0"[..]);
        assert_eq!(packet.payload_text(), "device::model=x");

        let empty = Packet::new(Command::Okay, 0, 0, Bytes::new());
        assert_eq!(empty.payload_text(), "");
    }

    #[test]
    fn test_peer_info_from_connect_reply() {
        let packet = Packet::new(Command::Connect, 0x0100_0001, 256 * 1024, &b"device::\0"[..]);
        let info = PeerInfo::from_packet(&packet);
        assert_eq!(info.version, 0x0100_0001);
        assert_eq!(info.max_payload, 256 * 1024);
        assert_eq!(info.banner, "device::");
    }
}
