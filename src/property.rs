//! Bootloader properties.

use core::fmt;

/// Property tags understood by the bootloader
#[derive(Copy, Clone, Debug, PartialEq)]
#[repr(u8)]
pub enum Property {
    /// Bootloader version, see [`Version`]
    CurrentVersion = 0x01,
    /// Bitmask of peripherals the bootloader listens on
    AvailablePeripherals = 0x02,
    FlashStartAddress = 0x03,
    FlashSize = 0x04,
    FlashSectorSize = 0x05,
    FlashBlockCount = 0x06,
    /// Bitmask of supported commands, bit n-1 for command tag n
    AvailableCommands = 0x07,
    CrcCheckStatus = 0x08,
    LastError = 0x09,
    VerifyWrites = 0x0A,
    /// Largest data frame payload the device accepts
    MaxPacketSize = 0x0B,
    ReservedRegions = 0x0C,
    ValidateRegions = 0x0D,
    RamStartAddress = 0x0E,
    RamSize = 0x0F,
    SystemDeviceId = 0x10,
    FlashSecurityState = 0x11,
    UniqueDeviceId = 0x12,
    FlashFacSupport = 0x13,
    FlashAccessSegmentSize = 0x14,
    FlashAccessSegmentCount = 0x15,
    FlashReadMargin = 0x16,
    QspiInitStatus = 0x17,
    TargetVersion = 0x18,
    ExternalMemoryAttributes = 0x19,
    ReliableUpdateStatus = 0x1A,
    FlashPageSize = 0x1B,
    IrqNotifierPin = 0x1C,
    PfrKeystoreUpdateOpt = 0x1D,
    ByteWriteTimeoutMs = 0x1E,
}

impl From<Property> for u32 {
    fn from(p: Property) -> u32 {
        p as u32
    }
}

/// Raw words returned for a property query
#[derive(Clone, PartialEq, Debug)]
pub struct PropertyValue {
    /// Tag used for the query
    pub tag: u32,
    pub words: Vec<u32>,
}

impl PropertyValue {
    /// First response word, the whole value for most properties
    pub fn value(&self) -> Option<u32> {
        self.words.first().copied()
    }

    /// Decode the value as a version, for the version properties only
    pub fn version(&self) -> Option<Version> {
        let is_version = self.tag == Property::CurrentVersion as u32
            || self.tag == Property::TargetVersion as u32;

        if is_version {
            self.value().map(Version::from)
        } else {
            None
        }
    }
}

/// Version packed into one word, highest byte first: mark, major, minor,
/// fixation
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct Version {
    pub mark: char,
    pub major: u8,
    pub minor: u8,
    pub fixation: u8,
}

impl From<u32> for Version {
    fn from(v: u32) -> Self {
        let b = v.to_be_bytes();
        Self {
            mark: char::from(b[0]),
            major: b[1],
            minor: b[2],
            fixation: b[3],
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}.{}.{}", self.mark, self.major, self.minor, self.fixation)
    }
}
