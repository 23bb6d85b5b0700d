// JDWP protocol definitions and packet handling
//
// Reference: https://docs.oracle.com/javase/8/docs/platform/jpda/jdwp/jdwp-protocol.html

use crate::error::{JdwpError, JdwpResult, ProtocolFault};
use bytes::{Buf, BufMut};

// JDWP uses big-endian (network byte order) for all multi-byte values
// This is architecture-independent (works on Intel, ARM M1/M2/M3, etc.)

// JDWP handshake string
pub const JDWP_HANDSHAKE: &[u8] = b"JDWP-Handshake";

// Packet structure:
// length (4 bytes) - includes header
// id (4 bytes)
// flags (1 byte) - 0x00 = command, 0x80 = reply
// [Command packet: command set (1 byte) + command (1 byte)]
// [Reply packet: error code (2 bytes)]
// data (variable)

pub const HEADER_SIZE: usize = 11;
pub const REPLY_FLAG: u8 = 0x80;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPacket {
    pub id: u32,
    pub command_set: u8,
    pub command: u8,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyPacket {
    pub id: u32,
    pub error_code: u16,
    pub data: Vec<u8>,
}

/// Either kind of frame, as read off the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Command(CommandPacket),
    Reply(ReplyPacket),
}

impl CommandPacket {
    pub fn new(id: u32, command_set: u8, command: u8) -> Self {
        Self::with_data(id, command_set, command, Vec::new())
    }

    pub fn with_data(id: u32, command_set: u8, command: u8, data: Vec<u8>) -> Self {
        Self {
            id,
            command_set,
            command,
            data,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let length = HEADER_SIZE + self.data.len();
        let mut buf = Vec::with_capacity(length);

        buf.put_u32(length as u32);
        buf.put_u32(self.id);
        buf.put_u8(0x00); // command flag
        buf.put_u8(self.command_set);
        buf.put_u8(self.command);
        buf.put_slice(&self.data);

        buf
    }
}

impl ReplyPacket {
    pub fn new(id: u32, error_code: u16, data: Vec<u8>) -> Self {
        Self {
            id,
            error_code,
            data,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let length = HEADER_SIZE + self.data.len();
        let mut buf = Vec::with_capacity(length);

        buf.put_u32(length as u32);
        buf.put_u32(self.id);
        buf.put_u8(REPLY_FLAG);
        buf.put_u16(self.error_code);
        buf.put_slice(&self.data);

        buf
    }

    pub fn is_error(&self) -> bool {
        self.error_code != 0
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Payload on success, translated fault otherwise
    pub fn into_result(self) -> JdwpResult<Vec<u8>> {
        if self.is_error() {
            Err(ProtocolFault::translate(self.error_code, &self.data).into())
        } else {
            Ok(self.data)
        }
    }
}

impl Packet {
    /// Decode one complete frame. The declared length must match the buffer exactly.
    pub fn decode(bytes: &[u8]) -> JdwpResult<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(JdwpError::WireFormat(format!(
                "Packet too short: {} bytes",
                bytes.len()
            )));
        }

        let mut buf = bytes;
        let length = buf.get_u32() as usize;
        if length != bytes.len() {
            return Err(JdwpError::WireFormat(format!(
                "Length mismatch: header declares {}, got {} bytes",
                length,
                bytes.len()
            )));
        }

        let id = buf.get_u32();
        let flags = buf.get_u8();

        if flags & REPLY_FLAG != 0 {
            let error_code = buf.get_u16();
            Ok(Packet::Reply(ReplyPacket::new(id, error_code, buf.to_vec())))
        } else {
            let command_set = buf.get_u8();
            let command = buf.get_u8();
            Ok(Packet::Command(CommandPacket::with_data(
                id,
                command_set,
                command,
                buf.to_vec(),
            )))
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            Packet::Command(command) => command.encode(),
            Packet::Reply(reply) => reply.encode(),
        }
    }

    pub fn id(&self) -> u32 {
        match self {
            Packet::Command(command) => command.id,
            Packet::Reply(reply) => reply.id,
        }
    }

    pub fn is_reply(&self) -> bool {
        matches!(self, Packet::Reply(_))
    }
}

/// Hex dump of a raw frame, 16 bytes per line, for trace logging
pub fn hex_dump(bytes: &[u8]) -> Vec<String> {
    bytes
        .chunks(16)
        .enumerate()
        .map(|(row, chunk)| {
            let hex: Vec<String> = chunk.iter().map(|b| format!("{:02x}", b)).collect();
            format!("{:04x}: {}", row * 16, hex.join(" "))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FaultKind;

    #[test]
    fn test_command_packet_encode() {
        let packet = CommandPacket::new(1, 1, 1);
        let encoded = packet.encode();

        assert_eq!(encoded.len(), HEADER_SIZE);
        assert_eq!(&encoded[0..4], &[0, 0, 0, 11]); // length (big-endian)
        assert_eq!(&encoded[4..8], &[0, 0, 0, 1]); // id (big-endian)
        assert_eq!(encoded[8], 0x00); // command flag
        assert_eq!(encoded[9], 1); // command set
        assert_eq!(encoded[10], 1); // command
    }

    #[test]
    fn test_big_endian_encoding() {
        // ID should be encoded as big-endian: 0x12345678, not [0x78, 0x56, 0x34, 0x12]
        let packet = CommandPacket::new(0x12345678, 1, 1);
        let encoded = packet.encode();

        assert_eq!(&encoded[4..8], &[0x12, 0x34, 0x56, 0x78]);
    }

    #[test]
    fn test_reply_packet_decode() {
        let reply_data = vec![
            0, 0, 0, 11, // length = 11 (big-endian)
            0, 0, 0, 1, // id = 1 (big-endian)
            0x80, // reply flag
            0, 0, // error code = 0 (big-endian)
        ];

        let packet = Packet::decode(&reply_data).unwrap();
        match packet {
            Packet::Reply(reply) => {
                assert_eq!(reply.id, 1);
                assert_eq!(reply.error_code, 0);
                assert!(!reply.is_error());
            }
            other => panic!("Expected reply, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_reproduces_encoded_packets() {
        let command = Packet::Command(CommandPacket::with_data(7, 64, 100, vec![2, 0, 0, 0, 0]));
        let reply = Packet::Reply(ReplyPacket::new(0xfffffffe, 113, b"boom".to_vec()));

        assert_eq!(Packet::decode(&command.encode()).unwrap(), command);
        assert_eq!(Packet::decode(&reply.encode()).unwrap(), reply);
    }

    #[test]
    fn test_decode_rejects_truncated_buffer() {
        let encoded = CommandPacket::with_data(3, 1, 9, vec![1, 2, 3]).encode();

        for len in 0..HEADER_SIZE {
            assert!(matches!(
                Packet::decode(&encoded[..len]),
                Err(JdwpError::WireFormat(_))
            ));
        }
        // Header intact, payload cut short
        assert!(matches!(
            Packet::decode(&encoded[..encoded.len() - 1]),
            Err(JdwpError::WireFormat(_))
        ));
    }

    #[test]
    fn test_decode_rejects_length_mismatch() {
        let mut encoded = CommandPacket::new(3, 1, 9).encode();
        encoded.push(0xaa);

        assert!(matches!(
            Packet::decode(&encoded),
            Err(JdwpError::WireFormat(_))
        ));
    }

    #[test]
    fn test_error_reply_translates() {
        let reply = ReplyPacket::new(9, 20, Vec::new());
        match reply.into_result() {
            Err(JdwpError::Protocol(fault)) => assert_eq!(fault.kind, FaultKind::ObjectCollected),
            other => panic!("Expected protocol fault, got {:?}", other),
        }
    }

    #[test]
    fn test_hex_dump_rows() {
        let bytes: Vec<u8> = (0u8..20).collect();
        let lines = hex_dump(&bytes);

        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("0000: 00 01 02"));
        assert_eq!(lines[1], "0010: 10 11 12 13");
    }
}
