//! Command and response packets carried in command frame payloads.
//!
//! Both share a four byte header followed by little-endian 32-bit words:
//!
//! ```text
//! tag | flags | reserved | word_count | word0 | word1 | ...
//! ```
//!
//! For responses the first word is the device status.

use crate::error::CodecError;
use crate::protocol::{Command, FLAG_HAS_DATA_PHASE, FLAG_NONE};

const HEADER_LEN: usize = 4;

#[derive(Clone, PartialEq, Debug)]
pub struct CommandPacket {
    pub tag: u8,
    pub flags: u8,
    pub reserved: u8,
    pub params: Vec<u32>,
}

impl CommandPacket {
    /// Build a command without a data phase
    pub fn new(command: Command, params: Vec<u32>) -> Self {
        Self {
            tag: command as u8,
            flags: FLAG_NONE,
            reserved: 0,
            params,
        }
    }

    /// Build a command followed by an outbound data phase
    pub fn with_data_phase(command: Command, params: Vec<u32>) -> Self {
        Self {
            flags: FLAG_HAS_DATA_PHASE,
            ..Self::new(command, params)
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buff = Vec::with_capacity(HEADER_LEN + self.params.len() * 4);
        buff.extend_from_slice(&[self.tag, self.flags, self.reserved, self.params.len() as u8]);
        buff.extend(self.params.iter().flat_map(|w| w.to_le_bytes().to_vec()));
        buff
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let (header, params) = split_words(bytes)?;

        Ok(Self {
            tag: header[0],
            flags: header[1],
            reserved: header[2],
            params,
        })
    }
}

#[derive(Clone, PartialEq, Debug)]
pub struct ResponsePacket {
    pub tag: u8,
    pub flags: u8,
    /// Device status, zero on success
    pub status: u32,
    pub words: Vec<u32>,
}

impl ResponsePacket {
    /// Whether the device follows this response with a data phase
    pub fn has_data_phase(&self) -> bool {
        self.flags & FLAG_HAS_DATA_PHASE != 0
    }

    pub fn encode(&self) -> Vec<u8> {
        let count = self.words.len() + 1;

        let mut buff = Vec::with_capacity(HEADER_LEN + count * 4);
        buff.extend_from_slice(&[self.tag, self.flags, 0, count as u8]);
        buff.extend_from_slice(&self.status.to_le_bytes());
        buff.extend(self.words.iter().flat_map(|w| w.to_le_bytes().to_vec()));
        buff
    }

    /// Decode a response packet.
    ///
    /// The tag is not checked here, matching it to the pending command is up
    /// to the session.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let (header, mut words) = split_words(bytes)?;

        if words.is_empty() {
            return Err(CodecError::Truncated);
        }
        let status = words.remove(0);

        Ok(Self {
            tag: header[0],
            flags: header[1],
            status,
            words,
        })
    }
}

fn split_words(bytes: &[u8]) -> Result<([u8; HEADER_LEN], Vec<u32>), CodecError> {
    if bytes.len() < HEADER_LEN || (bytes.len() - HEADER_LEN) % 4 != 0 {
        return Err(CodecError::Truncated);
    }

    let body = &bytes[HEADER_LEN..];
    if body.len() / 4 != bytes[3] as usize {
        return Err(CodecError::Truncated);
    }

    let words = body
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();

    Ok(([bytes[0], bytes[1], bytes[2], bytes[3]], words))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_get_property() {
        let p = CommandPacket::new(Command::GetProperty, vec![1, 0]);
        assert_eq!(
            p.encode(),
            vec![0x07, 0x00, 0x00, 0x02, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn encode_flash_program_once() {
        let p = CommandPacket::new(Command::FlashProgramOnce, vec![0x51, 4, 0x1234_5678]);
        assert_eq!(
            p.encode(),
            vec![14, 0, 0, 3, 81, 0, 0, 0, 4, 0, 0, 0, 120, 86, 52, 18]
        );
    }

    #[test]
    fn command_packets_survive_encode_decode() {
        let packets = vec![
            CommandPacket::new(Command::Reset, vec![]),
            CommandPacket::new(Command::FlashEraseAll, vec![0]),
            CommandPacket::with_data_phase(Command::WriteMemory, vec![0x2000_0000, 3, 0]),
            CommandPacket {
                tag: 0xC1,
                flags: 0x80,
                reserved: 0x5A,
                params: vec![u32::MAX; 7],
            },
        ];

        for p in packets {
            assert_eq!(CommandPacket::decode(&p.encode()), Ok(p));
        }
    }

    #[test]
    fn write_memory_marks_data_phase() {
        let p = CommandPacket::with_data_phase(Command::WriteMemory, vec![0, 3, 0]);
        assert_eq!(p.encode()[1], FLAG_HAS_DATA_PHASE);
        assert_eq!(CommandPacket::new(Command::ReadMemory, vec![0, 3, 0]).flags, FLAG_NONE);
    }

    #[test]
    fn decode_generic_response() {
        let r = ResponsePacket::decode(&[
            0xa0, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00,
        ])
        .unwrap();

        assert_eq!(r.tag, 0xa0);
        assert_eq!(r.status, 0);
        assert_eq!(r.words, vec![0x01]);
        assert!(!r.has_data_phase());
    }

    #[test]
    fn decode_read_memory_response() {
        let r = ResponsePacket {
            tag: 0xa3,
            flags: FLAG_HAS_DATA_PHASE,
            status: 0,
            words: vec![100],
        };
        let decoded = ResponsePacket::decode(&r.encode()).unwrap();
        assert!(decoded.has_data_phase());
        assert_eq!(decoded, r);
    }

    #[test]
    fn decode_rejects_truncated_packets() {
        // Short header
        assert_eq!(ResponsePacket::decode(&[0xa0, 0x00]), Err(CodecError::Truncated));
        // Misaligned body
        assert_eq!(
            ResponsePacket::decode(&[0xa0, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00]),
            Err(CodecError::Truncated)
        );
        // Count disagrees with body
        assert_eq!(
            ResponsePacket::decode(&[0xa0, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00]),
            Err(CodecError::Truncated)
        );
        // No status word
        assert_eq!(
            ResponsePacket::decode(&[0xa0, 0x00, 0x00, 0x00]),
            Err(CodecError::Truncated)
        );
    }
}
