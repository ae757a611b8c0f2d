//! Protocol codec for encoding/decoding packets
//!
//! Handles the 24-byte header layout and framing of packets out of a
//! byte stream that may arrive in arbitrary fragments.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use super::{command_label, Command, Packet, HEADER_SIZE};

/// Upper bound on a declared payload length (1 MiB)
pub const MAX_PAYLOAD_LIMIT: usize = 1024 * 1024;

/// Codec errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Invalid magic for {command}: {magic:#010x}")]
    InvalidMagic { command: String, magic: u32 },

    #[error("Checksum mismatch: header={expected:#010x}, computed={actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("Payload too large: {0} bytes (max: {1})")]
    PayloadTooLarge(usize, usize),
}

/// Sum of the unsigned payload bytes, truncated to 32 bits
pub fn checksum(payload: &[u8]) -> u32 {
    payload
        .iter()
        .fold(0u32, |sum, &b| sum.wrapping_add(u32::from(b)))
}

/// Parsed packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub command: u32,
    pub arg0: u32,
    pub arg1: u32,
    pub payload_length: u32,
    pub checksum: u32,
    pub magic: u32,
}

impl PacketHeader {
    /// Header describing `payload` for the given command
    pub fn for_payload(command: u32, arg0: u32, arg1: u32, payload: &[u8]) -> Self {
        Self {
            command,
            arg0,
            arg1,
            payload_length: payload.len() as u32,
            checksum: checksum(payload),
            magic: !command,
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut header = [0u8; HEADER_SIZE];
        header[0..4].copy_from_slice(&self.command.to_le_bytes());
        header[4..8].copy_from_slice(&self.arg0.to_le_bytes());
        header[8..12].copy_from_slice(&self.arg1.to_le_bytes());
        header[12..16].copy_from_slice(&self.payload_length.to_le_bytes());
        header[16..20].copy_from_slice(&self.checksum.to_le_bytes());
        header[20..24].copy_from_slice(&self.magic.to_le_bytes());
        header
    }

    /// Pure header parse. Magic and checksum are returned as-is, not validated.
    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Self {
        let mut buf = &bytes[..];
        Self {
            command: buf.get_u32_le(),
            arg0: buf.get_u32_le(),
            arg1: buf.get_u32_le(),
            payload_length: buf.get_u32_le(),
            checksum: buf.get_u32_le(),
            magic: buf.get_u32_le(),
        }
    }

    fn verify_magic(&self) -> Result<(), CodecError> {
        if self.magic != !self.command {
            return Err(CodecError::InvalidMagic {
                command: command_label(self.command),
                magic: self.magic,
            });
        }
        Ok(())
    }
}

/// Encode a packet (header followed by payload) into a buffer
pub fn encode_into(command: u32, arg0: u32, arg1: u32, payload: &[u8], buf: &mut BytesMut) {
    let header = PacketHeader::for_payload(command, arg0, arg1, payload);
    buf.reserve(HEADER_SIZE + payload.len());
    buf.put_slice(&header.to_bytes());
    buf.put_slice(payload);
}

/// Encode a packet into a freshly allocated buffer
pub fn encode(command: Command, arg0: u32, arg1: u32, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    encode_into(command.code(), arg0, arg1, payload, &mut buf);
    buf.freeze()
}

/// Decodes packets from an accumulating read buffer
pub struct Decoder {
    state: DecodeState,
    strict: bool,
}

#[derive(Default)]
enum DecodeState {
    #[default]
    Header,
    Payload(PacketHeader),
}

impl Decoder {
    /// Decoder that accepts headers without checking magic or checksum
    pub fn new() -> Self {
        Self {
            state: DecodeState::Header,
            strict: false,
        }
    }

    /// Decoder that rejects packets with a bad magic or checksum
    pub fn strict() -> Self {
        Self {
            state: DecodeState::Header,
            strict: true,
        }
    }

    /// Drop any partially decoded packet
    pub fn reset(&mut self) {
        self.state = DecodeState::Header;
    }

    /// Whether a header has been consumed and its payload is still pending
    pub fn is_mid_packet(&self) -> bool {
        matches!(self.state, DecodeState::Payload(_))
    }

    /// Attempt to decode a packet from the buffer
    /// Returns Ok(None) if more data is needed
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Packet>, CodecError> {
        loop {
            match &self.state {
                DecodeState::Header => {
                    if buf.len() < HEADER_SIZE {
                        return Ok(None);
                    }

                    let mut raw = [0u8; HEADER_SIZE];
                    raw.copy_from_slice(&buf[..HEADER_SIZE]);
                    let header = PacketHeader::from_bytes(&raw);

                    let length = header.payload_length as usize;
                    if length > MAX_PAYLOAD_LIMIT {
                        return Err(CodecError::PayloadTooLarge(length, MAX_PAYLOAD_LIMIT));
                    }
                    if self.strict {
                        header.verify_magic()?;
                    }

                    buf.advance(HEADER_SIZE);
                    self.state = DecodeState::Payload(header);
                }
                DecodeState::Payload(header) => {
                    let length = header.payload_length as usize;
                    if buf.len() < length {
                        buf.reserve(length - buf.len());
                        return Ok(None);
                    }

                    let header = *header;
                    let payload = buf.split_to(length).freeze();
                    self.state = DecodeState::Header;

                    if self.strict {
                        let actual = checksum(&payload);
                        if actual != header.checksum {
                            return Err(CodecError::ChecksumMismatch {
                                expected: header.checksum,
                                actual,
                            });
                        }
                    }

                    return Ok(Some(Packet {
                        command: header.command,
                        arg0: header.arg0,
                        arg1: header.arg1,
                        payload,
                    }));
                }
            }
        }
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_of(bytes: &[u8]) -> PacketHeader {
        let mut raw = [0u8; HEADER_SIZE];
        raw.copy_from_slice(&bytes[..HEADER_SIZE]);
        PacketHeader::from_bytes(&raw)
    }

    #[test]
    fn test_encode_decode_header() {
        let payload = b"shell:input keyevent 19\0";
        let bytes = encode(Command::Open, 1, 0, payload);
        assert_eq!(bytes.len(), HEADER_SIZE + payload.len());

        let header = header_of(&bytes);
        assert_eq!(header.command, Command::Open.code());
        assert_eq!(header.arg0, 1);
        assert_eq!(header.arg1, 0);
        assert_eq!(header.payload_length as usize, payload.len());
        assert_eq!(header.checksum, checksum(payload));
        assert_eq!(&bytes[HEADER_SIZE..], payload);
    }

    #[test]
    fn test_empty_payload() {
        let bytes = encode(Command::Close, 1, 7, &[]);
        assert_eq!(bytes.len(), HEADER_SIZE);

        let header = header_of(&bytes);
        assert_eq!(header.command, Command::Close.code());
        assert_eq!(header.arg0, 1);
        assert_eq!(header.arg1, 7);
        assert_eq!(header.payload_length, 0);
        assert_eq!(header.checksum, 0);
    }

    #[test]
    fn test_header_is_little_endian() {
        let bytes = encode(Command::Connect, 0x0100_0001, 4096, b"host::\0");
        assert_eq!(&bytes[0..4], b"CNXN");
        assert_eq!(&bytes[4..8], &[0x01, 0x00, 0x00, 0x01]);
        assert_eq!(&bytes[8..12], &[0x00, 0x10, 0x00, 0x00]);
        assert_eq!(&bytes[12..16], &[7, 0, 0, 0]);
    }

    #[test]
    fn test_magic_is_complement_of_command() {
        for command in [
            Command::Connect,
            Command::Okay,
            Command::Write,
            Command::Close,
            Command::Open,
        ] {
            let header = header_of(&encode(command, 0, 0, &[]));
            assert_eq!(header.magic, !command.code());
            assert_eq!(header.magic ^ header.command, u32::MAX);
        }
    }

    #[test]
    fn test_checksum() {
        assert_eq!(checksum(&[]), 0);
        assert_eq!(checksum(b"host::\0"), 0x68 + 0x6f + 0x73 + 0x74 + 0x3a + 0x3a);
        // bytes are summed unsigned
        assert_eq!(checksum(&[0xff, 0xff]), 510);
        assert_ne!(checksum(b"abc"), checksum(b"abd"));
        // swapping bytes cancels out
        assert_eq!(checksum(b"ab"), checksum(b"ba"));
    }

    #[test]
    fn test_checksum_wraps() {
        let payload = vec![0xffu8; 16_843_010];
        let expected = (0xffu64 * payload.len() as u64) as u32;
        assert_eq!(checksum(&payload), expected);
    }

    #[test]
    fn test_decoder_handles_fragments() {
        let mut wire = BytesMut::new();
        encode_into(Command::Okay.code(), 7, 1, &[], &mut wire);
        encode_into(Command::Write.code(), 7, 1, b"output\n", &mut wire);

        let mut decoder = Decoder::new();
        let mut buf = BytesMut::new();
        let mut packets = Vec::new();

        for byte in wire.iter() {
            buf.put_u8(*byte);
            if let Some(packet) = decoder.decode(&mut buf).unwrap() {
                packets.push(packet);
            }
        }

        assert_eq!(packets.len(), 2);
        assert!(packets[0].is(Command::Okay));
        assert_eq!(packets[0].arg0, 7);
        assert!(packets[1].is(Command::Write));
        assert_eq!(&packets[1].payload[..], b"output\n");
        assert!(buf.is_empty());
        assert!(!decoder.is_mid_packet());
    }

    #[test]
    fn test_lenient_decoder_ignores_bad_checksum() {
        let mut buf = BytesMut::new();
        let mut header = PacketHeader::for_payload(Command::Write.code(), 1, 1, b"data");
        header.checksum = 0;
        header.magic = 0;
        buf.put_slice(&header.to_bytes());
        buf.put_slice(b"data");

        let packet = Decoder::new().decode(&mut buf).unwrap().unwrap();
        assert_eq!(&packet.payload[..], b"data");
    }

    #[test]
    fn test_strict_decoder_rejects_bad_checksum() {
        let mut buf = BytesMut::new();
        let mut header = PacketHeader::for_payload(Command::Write.code(), 1, 1, b"data");
        header.checksum = 1;
        buf.put_slice(&header.to_bytes());
        buf.put_slice(b"data");

        let err = Decoder::strict().decode(&mut buf).unwrap_err();
        assert_eq!(
            err,
            CodecError::ChecksumMismatch {
                expected: 1,
                actual: checksum(b"data"),
            }
        );
    }

    #[test]
    fn test_strict_decoder_rejects_bad_magic() {
        let mut buf = BytesMut::new();
        let mut header = PacketHeader::for_payload(Command::Okay.code(), 1, 1, &[]);
        header.magic = Command::Okay.code();
        buf.put_slice(&header.to_bytes());

        let err = Decoder::strict().decode(&mut buf).unwrap_err();
        assert!(matches!(err, CodecError::InvalidMagic { .. }));
    }

    #[test]
    fn test_strict_decoder_accepts_valid_packet() {
        let mut buf = BytesMut::from(&encode(Command::Write, 3, 1, b"ok")[..]);
        let packet = Decoder::strict().decode(&mut buf).unwrap().unwrap();
        assert_eq!(packet.arg0, 3);
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let mut buf = BytesMut::new();
        let mut header = PacketHeader::for_payload(Command::Write.code(), 1, 1, &[]);
        header.payload_length = u32::MAX;
        buf.put_slice(&header.to_bytes());

        let err = Decoder::new().decode(&mut buf).unwrap_err();
        assert!(matches!(err, CodecError::PayloadTooLarge(_, MAX_PAYLOAD_LIMIT)));
    }
}
