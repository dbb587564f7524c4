//! Wire constants for the MCU bootloader serial protocol.

/// Marker byte that opens every frame
pub const FRAME_START: u8 = 0x5A;

/// Default payload size for a single data frame over UART
pub const MAX_CHUNK: usize = 32;

/// Largest frame payload accepted before a frame is considered corrupt
pub const MAX_FRAME_PAYLOAD: usize = 4096;

/// Command flag: no data phase follows the command
pub const FLAG_NONE: u8 = 0x00;

/// Command flag: a data phase follows the command (or the response)
pub const FLAG_HAS_DATA_PHASE: u8 = 0x01;

/// Link level frame types
#[derive(Copy, Clone, PartialEq, Debug)]
#[repr(u8)]
pub enum FrameType {
    Ack = 0xA1,
    Nak = 0xA2,
    AckAbort = 0xA3,
    Command = 0xA4,
    Data = 0xA5,
    Ping = 0xA6,
    PingResponse = 0xA7,
}

impl FrameType {
    pub fn from_u8(v: u8) -> Option<Self> {
        let t = match v {
            0xA1 => Self::Ack,
            0xA2 => Self::Nak,
            0xA3 => Self::AckAbort,
            0xA4 => Self::Command,
            0xA5 => Self::Data,
            0xA6 => Self::Ping,
            0xA7 => Self::PingResponse,
            _ => return None,
        };
        Some(t)
    }

    /// Control frames are two bytes long and carry neither length nor checksum
    pub fn is_control(&self) -> bool {
        matches!(self, Self::Ack | Self::Nak | Self::AckAbort | Self::Ping)
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
#[repr(u8)]
pub enum Command {
    /// Erases the complete flash memory (without recovering flash security)
    FlashEraseAll = 0x01,

    /// Erases a region of flash memory
    FlashEraseRegion = 0x02,

    /// Reads memory starting from an address, response carries a data phase
    ReadMemory = 0x03,

    /// Writes memory starting from an address, command carries a data phase
    WriteMemory = 0x04,

    /// Fills a memory region with a 32-bit pattern
    FillMemory = 0x05,

    /// Fetches a bootloader property
    GetProperty = 0x07,

    /// Streams a secure binary file to the bootloader
    ReceiveSbFile = 0x08,

    /// Jumps to code at an address
    Execute = 0x09,

    /// Calls a function at an address
    Call = 0x0A,

    /// Resets the device
    Reset = 0x0B,

    /// Sets a writable bootloader property
    SetProperty = 0x0C,

    /// Erases the complete flash memory and recovers flash security
    FlashEraseAllUnsecure = 0x0D,

    /// Programs the program-once (IFR) field
    FlashProgramOnce = 0x0E,

    /// Reads the program-once (IFR) field
    FlashReadOnce = 0x0F,

    /// Configures an external memory device
    ConfigureMemory = 0x11,
}

impl Command {
    /// Response tag the device answers this command with on success
    pub fn response(&self) -> Response {
        match self {
            Command::GetProperty => Response::GetProperty,
            Command::ReadMemory => Response::ReadMemory,
            Command::FlashReadOnce => Response::FlashReadOnce,
            _ => Response::Generic,
        }
    }
}

/// Response packet tags
#[derive(Copy, Clone, Debug, PartialEq)]
#[repr(u8)]
pub enum Response {
    /// Status plus the echoed command tag
    Generic = 0xA0,
    /// Status plus the number of bytes in the following data phase
    ReadMemory = 0xA3,
    /// Status plus the property words
    GetProperty = 0xA7,
    /// Status plus the byte count and the program-once value
    FlashReadOnce = 0xAF,
}
