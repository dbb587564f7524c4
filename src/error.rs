//! Error types for each protocol layer.

use core::fmt::Debug;

use crate::status;

/// Binding status: failure to talk to the device at all
pub const STATUS_COMMUNICATION_ERROR: i32 = -3;
/// Binding status: retry budget exhausted waiting for the device
pub const STATUS_TIMEOUT: i32 = -4;
/// Binding status: retry budget exhausted on rejected or corrupt frames
pub const STATUS_REJECTED: i32 = -5;
/// Binding status: caller deadline passed mid exchange
pub const STATUS_CANCELLED: i32 = -6;

/// Link level decoding failures
#[derive(Copy, Clone, PartialEq, Debug, thiserror::Error)]
pub enum FramingError {
    /// Not enough bytes for a frame yet
    #[error("incomplete frame")]
    Incomplete,
    /// Bad marker, unknown type, oversize length or checksum mismatch
    #[error("corrupt frame")]
    Corrupt,
}

/// Packet layout failures
#[derive(Copy, Clone, PartialEq, Debug, thiserror::Error)]
pub enum CodecError {
    #[error("packet truncated or misaligned")]
    Truncated,
    #[error("unexpected response tag 0x{0:02x}")]
    UnexpectedTag(u8),
}

/// Exchange level failures, reported once the retry budget is spent
#[derive(Copy, Clone, PartialEq, Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("timeout awaiting device")]
    Timeout,
    #[error("device rejected or corrupted the exchange")]
    Rejected,
    #[error("exchange cancelled by deadline")]
    Cancelled,
}

#[derive(Clone, PartialEq, Debug, thiserror::Error)]
pub enum Error<E: Debug> {
    /// Transport send or receive failed
    #[error("transport error: {0:?}")]
    Io(E),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The device completed the exchange with a non-zero status
    #[error("device status {code}: {}", describe(.code))]
    Device { code: u32 },
}

fn describe(code: &u32) -> &'static str {
    status::describe(*code)
}

impl<E: Debug> Error<E> {
    /// Binding style status, negative for link failures and the device status
    /// (saturated at `i32::MAX`) for device errors
    pub fn status(&self) -> i32 {
        match self {
            Error::Io(_) => STATUS_COMMUNICATION_ERROR,
            Error::Protocol(ProtocolError::Timeout) => STATUS_TIMEOUT,
            Error::Protocol(ProtocolError::Rejected) => STATUS_REJECTED,
            Error::Protocol(ProtocolError::Cancelled) => STATUS_CANCELLED,
            // Device codes stay positive so they never read as link failures
            Error::Device { code } => (*code).min(i32::MAX as u32) as i32,
        }
    }

    /// Device status for device errors
    pub fn device_status(&self) -> Option<u32> {
        match self {
            Error::Device { code } => Some(*code),
            _ => None,
        }
    }
}
