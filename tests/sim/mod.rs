//! Simulated bootloader device for integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use mboot_uart_loader::frame::{self, Frame, FrameBuffer};
use mboot_uart_loader::packet::{CommandPacket, ResponsePacket};
use mboot_uart_loader::protocol::{Command, Response, FLAG_HAS_DATA_PHASE, FLAG_NONE};
use mboot_uart_loader::{status, Transport};

pub const MEMORY_SIZE: usize = 64 * 1024;

pub const STATUS_MEMORY_RANGE_INVALID: u32 = 10200;
pub const STATUS_UNKNOWN_PROPERTY: u32 = 10300;
pub const STATUS_UNKNOWN_COMMAND: u32 = 10000;

#[derive(Clone, PartialEq, Debug)]
pub struct SimError;

enum Sink {
    Memory(usize),
    SbFile,
}

struct Write {
    command: u8,
    sink: Sink,
    remaining: usize,
}

pub struct SimDevice {
    /// Bytes received from the host
    rx: FrameBuffer,
    /// Bytes waiting for the host to read
    outbox: VecDeque<u8>,
    /// Last packet frame sent, resent on nak until acked
    unacked: Option<Vec<u8>>,
    /// Packet frames queued behind the unacked one
    queued: VecDeque<Vec<u8>>,
    write: Option<Write>,

    pub memory: Vec<u8>,
    pub properties: HashMap<u32, Vec<u32>>,
    /// Data frame payload size used for reads
    pub chunk_size: usize,
    /// Status returned when opening a write data phase
    pub reject_writes: Option<u32>,
    /// Corrupt the checksum of the next response, the clean copy follows a nak
    pub corrupt_next_response: bool,
    /// Ignore everything sent by the host
    pub silent: bool,
    /// Finish reads of erased memory with the blank page status
    pub blank_page: bool,
    /// Program-once words by index
    pub otp: HashMap<u32, u32>,
    /// Accept program-once commands without changing any bits
    pub otp_locked: bool,
    /// Bytes streamed by receive SB file
    pub sb_file: Vec<u8>,
    /// Call, execute and configure memory commands with their parameters
    pub invoked: Vec<(u8, Vec<u32>)>,
    /// Frames received from the host, in order
    pub received: Vec<Frame>,
}

impl Default for SimDevice {
    fn default() -> Self {
        Self {
            rx: FrameBuffer::default(),
            outbox: VecDeque::new(),
            unacked: None,
            queued: VecDeque::new(),
            write: None,
            memory: vec![0xFF; MEMORY_SIZE],
            properties: HashMap::new(),
            chunk_size: 32,
            reject_writes: None,
            corrupt_next_response: false,
            silent: false,
            blank_page: false,
            otp: HashMap::new(),
            otp_locked: false,
            sb_file: Vec::new(),
            invoked: Vec::new(),
            received: Vec::new(),
        }
    }
}

impl SimDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_property(mut self, tag: u32, words: Vec<u32>) -> Self {
        self.properties.insert(tag, words);
        self
    }

    /// Payload sizes of data frames received from the host
    pub fn data_frames(&self) -> Vec<usize> {
        self.received
            .iter()
            .filter_map(|f| match f {
                Frame::Data(d) => Some(d.len()),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, frame: &Frame) -> usize {
        self.received.iter().filter(|f| *f == frame).count()
    }

    fn control(&mut self, frame: Frame) {
        self.outbox.extend(frame::encode(&frame));
    }

    fn emit(&mut self, frame: Frame) {
        let bytes = frame::encode(&frame);

        if self.unacked.is_some() {
            self.queued.push_back(bytes);
            return;
        }

        if self.corrupt_next_response {
            if let Frame::Command(_) = frame {
                self.corrupt_next_response = false;

                let mut bad = bytes.clone();
                bad[4] ^= 0xFF;
                self.outbox.extend(bad);
                self.unacked = Some(bytes);
                return;
            }
        }

        self.outbox.extend(bytes.iter().copied());
        self.unacked = Some(bytes);
    }

    fn respond(&mut self, tag: Response, flags: u8, status: u32, words: Vec<u32>) {
        let p = ResponsePacket {
            tag: tag as u8,
            flags,
            status,
            words,
        };
        self.emit(Frame::Command(p.encode()));
    }

    fn generic(&mut self, status: u32, command: u8) {
        self.respond(Response::Generic, FLAG_NONE, status, vec![command as u32]);
    }

    fn range(&self, address: u32, length: u32) -> Option<(usize, usize)> {
        let start = address as usize;
        let end = start.checked_add(length as usize)?;

        if end <= self.memory.len() {
            Some((start, end))
        } else {
            None
        }
    }

    fn handle(&mut self, frame: Frame) {
        match frame {
            Frame::Ping => self.control(Frame::PingResponse {
                version: 0x5001_0200,
                options: 0,
            }),
            Frame::Ack => {
                self.unacked = None;
                if let Some(next) = self.queued.pop_front() {
                    self.outbox.extend(next.iter().copied());
                    self.unacked = Some(next);
                }
            }
            Frame::Nak => {
                if let Some(b) = self.unacked.clone() {
                    self.outbox.extend(b);
                }
            }
            Frame::Command(payload) => {
                self.control(Frame::Ack);

                match CommandPacket::decode(&payload) {
                    Ok(c) => self.command(c),
                    Err(_) => self.generic(STATUS_UNKNOWN_COMMAND, 0),
                }
            }
            Frame::Data(payload) => {
                self.control(Frame::Ack);
                self.data(&payload);
            }
            _ => (),
        }
    }

    fn command(&mut self, c: CommandPacket) {
        let p = |i: usize| c.params.get(i).copied().unwrap_or(0);

        match c.tag {
            t if t == Command::GetProperty as u8 => {
                let value = self.properties.get(&p(0)).cloned();
                match value {
                    Some(words) => self.respond(Response::GetProperty, FLAG_NONE, 0, words),
                    None => self.respond(
                        Response::GetProperty,
                        FLAG_NONE,
                        STATUS_UNKNOWN_PROPERTY,
                        vec![],
                    ),
                }
            }
            t if t == Command::SetProperty as u8 => {
                self.properties.insert(p(0), vec![p(1)]);
                self.generic(0, t);
            }
            t if t == Command::FlashEraseAll as u8 => {
                self.memory.iter_mut().for_each(|b| *b = 0xFF);
                self.generic(0, t);
            }
            t if t == Command::FlashEraseRegion as u8 => match self.range(p(0), p(1)) {
                Some((start, end)) => {
                    self.memory[start..end].iter_mut().for_each(|b| *b = 0xFF);
                    self.generic(0, t);
                }
                None => self.generic(STATUS_MEMORY_RANGE_INVALID, t),
            },
            t if t == Command::FillMemory as u8 => match self.range(p(0), p(1)) {
                Some((start, end)) => {
                    let pattern = p(2).to_le_bytes();
                    for (i, b) in self.memory[start..end].iter_mut().enumerate() {
                        *b = pattern[i % 4];
                    }
                    self.generic(0, t);
                }
                None => self.generic(STATUS_MEMORY_RANGE_INVALID, t),
            },
            t if t == Command::WriteMemory as u8 => {
                if let Some(status) = self.reject_writes {
                    self.respond(Response::Generic, FLAG_NONE, status, vec![]);
                    return;
                }

                match self.range(p(0), p(1)) {
                    Some((start, end)) if c.flags & FLAG_HAS_DATA_PHASE != 0 => {
                        self.open_write(t, Sink::Memory(start), end - start)
                    }
                    _ => self.generic(STATUS_MEMORY_RANGE_INVALID, t),
                }
            }
            t if t == Command::ReceiveSbFile as u8 => {
                self.open_write(t, Sink::SbFile, p(0) as usize)
            }
            t if t == Command::ReadMemory as u8 => match self.range(p(0), p(1)) {
                Some((start, end)) => {
                    self.respond(
                        Response::ReadMemory,
                        FLAG_HAS_DATA_PHASE,
                        0,
                        vec![(end - start) as u32],
                    );

                    let data = self.memory[start..end].to_vec();
                    for chunk in data.chunks(self.chunk_size) {
                        self.emit(Frame::Data(chunk.to_vec()));
                    }

                    let blank = data.iter().all(|b| *b == 0xFF);
                    if self.blank_page && blank {
                        self.generic(status::MEMORY_BLANK_PAGE_READ_DISALLOWED, t);
                    } else {
                        self.generic(0, t);
                    }
                }
                None => self.generic(STATUS_MEMORY_RANGE_INVALID, t),
            },
            t if t == Command::FlashEraseAllUnsecure as u8 => {
                self.memory.iter_mut().for_each(|b| *b = 0xFF);
                self.generic(0, t);
            }
            t if t == Command::FlashReadOnce as u8 => {
                let value = self.otp.get(&p(0)).copied().unwrap_or(0);
                self.respond(Response::FlashReadOnce, FLAG_NONE, 0, vec![4, value]);
            }
            t if t == Command::FlashProgramOnce as u8 => {
                if !self.otp_locked {
                    *self.otp.entry(p(0) & 0x00FF_FFFF).or_insert(0) |= p(2);
                }
                self.generic(0, t);
            }
            t if t == Command::Call as u8
                || t == Command::Execute as u8
                || t == Command::ConfigureMemory as u8 =>
            {
                self.invoked.push((t, c.params.clone()));
                self.generic(0, t);
            }
            t if t == Command::Reset as u8 => self.generic(0, t),
            t => self.generic(STATUS_UNKNOWN_COMMAND, t),
        }
    }

    fn open_write(&mut self, command: u8, sink: Sink, length: usize) {
        self.generic(0, command);

        if length == 0 {
            self.generic(0, command);
        } else {
            self.write = Some(Write {
                command,
                sink,
                remaining: length,
            });
        }
    }

    fn data(&mut self, payload: &[u8]) {
        let w = match self.write.as_mut() {
            Some(w) => w,
            None => return,
        };

        let n = payload.len().min(w.remaining);
        match &mut w.sink {
            Sink::Memory(address) => {
                self.memory[*address..*address + n].copy_from_slice(&payload[..n]);
                *address += n;
            }
            Sink::SbFile => self.sb_file.extend_from_slice(&payload[..n]),
        }
        w.remaining -= n;

        if w.remaining == 0 {
            let command = w.command;
            self.write = None;
            self.generic(0, command);
        }
    }
}

impl Transport for SimDevice {
    type Error = SimError;

    fn send(&mut self, data: &[u8]) -> Result<(), SimError> {
        if self.silent {
            return Ok(());
        }

        self.rx.push(data);
        while let Ok(f) = self.rx.next_frame() {
            self.received.push(f.clone());
            self.handle(f);
        }

        Ok(())
    }

    fn receive(&mut self, max_len: usize, _timeout: Duration) -> Result<Vec<u8>, SimError> {
        let n = max_len.min(self.outbox.len());
        Ok(self.outbox.drain(..n).collect())
    }
}
