//! Link level framing.
//!
//! Control frames (ack, nak, abort, ping) are two bytes: the start marker and
//! the frame type. Command and data frames add a little-endian payload length
//! and a CRC-16/XMODEM computed over every byte of the frame except the CRC
//! itself:
//!
//! ```text
//! 0x5A | type | len_lo | len_hi | crc_lo | crc_hi | payload...
//! ```
//!
//! A ping response carries a fixed six byte body followed by its CRC.

use crate::error::FramingError;
use crate::protocol::{FrameType, FRAME_START, MAX_FRAME_PAYLOAD};

const CRC16: crc::Crc<u16> = crc::Crc::<u16>::new(&crc::CRC_16_XMODEM);

const CONTROL_LEN: usize = 2;
const HEADER_LEN: usize = 6;
const PING_RESPONSE_LEN: usize = 10;

#[derive(Clone, PartialEq, Debug)]
pub enum Frame {
    Ping,
    PingResponse { version: u32, options: u16 },
    Ack,
    Nak,
    /// Sent by the device to stop an outbound data phase
    AckAbort,
    Command(Vec<u8>),
    Data(Vec<u8>),
}

impl Frame {
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Ping => FrameType::Ping,
            Frame::PingResponse { .. } => FrameType::PingResponse,
            Frame::Ack => FrameType::Ack,
            Frame::Nak => FrameType::Nak,
            Frame::AckAbort => FrameType::AckAbort,
            Frame::Command(_) => FrameType::Command,
            Frame::Data(_) => FrameType::Data,
        }
    }
}

/// Encode a frame for transmission
pub fn encode(frame: &Frame) -> Vec<u8> {
    let t = frame.frame_type() as u8;

    match frame {
        Frame::Command(payload) | Frame::Data(payload) => {
            let len = (payload.len() as u16).to_le_bytes();

            let mut digest = CRC16.digest();
            digest.update(&[FRAME_START, t, len[0], len[1]]);
            digest.update(payload);
            let crc = digest.finalize().to_le_bytes();

            let mut buff = Vec::with_capacity(HEADER_LEN + payload.len());
            buff.extend_from_slice(&[FRAME_START, t, len[0], len[1], crc[0], crc[1]]);
            buff.extend_from_slice(payload);
            buff
        }
        Frame::PingResponse { version, options } => {
            let mut buff = Vec::with_capacity(PING_RESPONSE_LEN);
            buff.extend_from_slice(&[FRAME_START, t]);
            buff.extend_from_slice(&version.to_le_bytes());
            buff.extend_from_slice(&options.to_le_bytes());
            let crc = CRC16.checksum(&buff).to_le_bytes();
            buff.extend_from_slice(&crc);
            buff
        }
        _ => vec![FRAME_START, t],
    }
}

/// Decode a single, complete frame.
///
/// Any disagreement between the declared length and the bytes supplied is
/// treated as corruption; only a missing header is reported as incomplete.
pub fn decode(bytes: &[u8]) -> Result<Frame, FramingError> {
    if bytes.len() < CONTROL_LEN {
        return Err(FramingError::Incomplete);
    }
    if bytes[0] != FRAME_START {
        return Err(FramingError::Corrupt);
    }

    match scan(bytes, MAX_FRAME_PAYLOAD) {
        Scan::Frame(frame, n) if n == bytes.len() => Ok(frame),
        Scan::Frame(..) | Scan::Truncated | Scan::Corrupt(_) => Err(FramingError::Corrupt),
        Scan::Incomplete => Err(FramingError::Incomplete),
    }
}

enum Scan {
    /// Decoded frame and the number of bytes it occupied
    Frame(Frame, usize),
    /// Header is not complete yet
    Incomplete,
    /// Header is complete but the body is not
    Truncated,
    /// Malformed, with the number of bytes to discard
    Corrupt(usize),
}

// Expects `bytes[0] == FRAME_START`
fn scan(bytes: &[u8], max_payload: usize) -> Scan {
    let t = match bytes.get(1) {
        Some(t) => *t,
        None => return Scan::Incomplete,
    };

    let t = match FrameType::from_u8(t) {
        Some(t) => t,
        None => return Scan::Corrupt(1),
    };

    match t {
        FrameType::Ack => Scan::Frame(Frame::Ack, CONTROL_LEN),
        FrameType::Nak => Scan::Frame(Frame::Nak, CONTROL_LEN),
        FrameType::AckAbort => Scan::Frame(Frame::AckAbort, CONTROL_LEN),
        FrameType::Ping => Scan::Frame(Frame::Ping, CONTROL_LEN),
        FrameType::PingResponse => {
            if bytes.len() < PING_RESPONSE_LEN {
                return Scan::Truncated;
            }

            let crc = u16::from_le_bytes([bytes[8], bytes[9]]);
            if CRC16.checksum(&bytes[..8]) != crc {
                return Scan::Corrupt(PING_RESPONSE_LEN);
            }

            let version = u32::from_le_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);
            let options = u16::from_le_bytes([bytes[6], bytes[7]]);
            Scan::Frame(Frame::PingResponse { version, options }, PING_RESPONSE_LEN)
        }
        FrameType::Command | FrameType::Data => {
            if bytes.len() < HEADER_LEN {
                return Scan::Incomplete;
            }

            let len = u16::from_le_bytes([bytes[2], bytes[3]]) as usize;
            if len > max_payload {
                return Scan::Corrupt(1);
            }
            if bytes.len() < HEADER_LEN + len {
                return Scan::Truncated;
            }

            let crc = u16::from_le_bytes([bytes[4], bytes[5]]);
            let payload = &bytes[HEADER_LEN..HEADER_LEN + len];

            let mut digest = CRC16.digest();
            digest.update(&bytes[..4]);
            digest.update(payload);
            if digest.finalize() != crc {
                return Scan::Corrupt(HEADER_LEN + len);
            }

            let frame = match t {
                FrameType::Command => Frame::Command(payload.to_vec()),
                _ => Frame::Data(payload.to_vec()),
            };
            Scan::Frame(frame, HEADER_LEN + len)
        }
    }
}

/// Accumulates received bytes and extracts frames, resynchronising on the
/// start marker after line noise or a corrupt frame.
#[derive(Debug)]
pub struct FrameBuffer {
    buff: Vec<u8>,
    max_payload: usize,
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new(MAX_FRAME_PAYLOAD)
    }
}

impl FrameBuffer {
    pub fn new(max_payload: usize) -> Self {
        Self {
            buff: Vec::with_capacity(HEADER_LEN + max_payload),
            max_payload,
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buff.extend_from_slice(data);
    }

    /// Extract the next frame.
    ///
    /// Bytes preceding a start marker are dropped. A corrupt frame is
    /// discarded before `FramingError::Corrupt` is returned so the next call
    /// resumes at the following frame.
    pub fn next_frame(&mut self) -> Result<Frame, FramingError> {
        match self.buff.iter().position(|b| *b == FRAME_START) {
            Some(0) => (),
            Some(n) => {
                trace!("Dropping {} bytes of line noise: {:02x?}", n, &self.buff[..n]);
                self.buff.drain(..n);
            }
            None => {
                if !self.buff.is_empty() {
                    trace!("Dropping line noise: {:02x?}", self.buff);
                    self.buff.clear();
                }
                return Err(FramingError::Incomplete);
            }
        }

        match scan(&self.buff, self.max_payload) {
            Scan::Frame(frame, n) => {
                self.buff.drain(..n);
                Ok(frame)
            }
            Scan::Incomplete | Scan::Truncated => Err(FramingError::Incomplete),
            Scan::Corrupt(n) => {
                debug!("Discarding corrupt frame: {:02x?}", &self.buff[..n]);
                self.buff.drain(..n);
                Err(FramingError::Corrupt)
            }
        }
    }

    /// Number of further bytes needed before the pending frame can complete
    pub fn wanted(&self) -> usize {
        let total = match self.buff.get(1).copied().and_then(FrameType::from_u8) {
            None => CONTROL_LEN,
            Some(t) if t.is_control() => CONTROL_LEN,
            Some(FrameType::PingResponse) => PING_RESPONSE_LEN,
            Some(_) if self.buff.len() < 4 => HEADER_LEN,
            Some(_) => HEADER_LEN + u16::from_le_bytes([self.buff[2], self.buff[3]]) as usize,
        };

        total.saturating_sub(self.buff.len()).max(1)
    }

    /// Discard everything buffered
    pub fn clear(&mut self) {
        self.buff.clear();
    }

    pub fn len(&self) -> usize {
        self.buff.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buff.is_empty()
    }
}
