//! Device status codes.
//!
//! The status word is the first parameter of every response packet. The
//! engine treats it as an opaque integer; this table only exists to render
//! well-known values for humans.

pub const SUCCESS: u32 = 0;

/// Read of an erased page refused, the data phase still carries the bytes
pub const MEMORY_BLANK_PAGE_READ_DISALLOWED: u32 = 10211;

/// Host side status: a program-once value did not read back as written
pub const OTP_VERIFY_FAIL: u32 = 52009;

/// Human readable text for a device status code
pub fn describe(code: u32) -> &'static str {
    match code {
        0 => "Success",
        1 => "Fail",
        2 => "Read Only",
        3 => "Out Of Range",
        4 => "Invalid Argument",
        5 => "Timeout",
        6 => "No Transfer In Progress",

        100 => "FLASH Driver: Size Error",
        101 => "FLASH Driver: Alignment Error",
        102 => "FLASH Driver: Address Error",
        103 => "FLASH Driver: Access Error",
        104 => "FLASH Driver: Protection Violation",
        105 => "FLASH Driver: Command Failure",
        106 => "FLASH Driver: Unknown Property",
        107 => "FLASH Driver: Erase Key Error",
        108 => "FLASH Driver: Region Execute Only",
        111 => "FLASH Driver: Command Not Supported",
        117 => "FLASH Driver: Compare Error",

        200 => "I2C Driver: Slave Tx Underrun",
        201 => "I2C Driver: Slave Rx Overrun",
        202 => "I2C Driver: Arbitration Lost",

        300 => "SPI Driver: Slave Tx Underrun",
        301 => "SPI Driver: Slave Rx Overrun",

        400 => "QSPI Driver: Flash Size Error",
        401 => "QSPI Driver: Flash Alignment Error",
        402 => "QSPI Driver: Flash Address Error",
        403 => "QSPI Driver: Flash Command Failure",
        405 => "QSPI Driver: Not Configured",
        407 => "QSPI Driver: Command Timeout",

        10000 => "Unknown Command",
        10001 => "Security Violation",
        10002 => "Abort Data Phase",
        10003 => "Ping Error",
        10004 => "No Response",
        10005 => "No Response Expected",
        10006 => "Unsupported Command",

        10100 => "ROM Loader: Section Overrun",
        10101 => "ROM Loader: Signature Error",
        10102 => "ROM Loader: Section Length Error",
        10104 => "ROM Loader: EOF Reached",
        10105 => "ROM Loader: Checksum Error",
        10106 => "ROM Loader: CRC32 Error",
        10107 => "ROM Loader: Unknown Command",

        10200 => "Memory Range Invalid",
        10201 => "Memory Read Failed",
        10202 => "Memory Write Failed",
        10203 => "Memory Cumulative Write",
        10205 => "Memory Not Configured",
        10206 => "Memory Alignment Error",
        10207 => "Memory Verify Failed",
        10208 => "Memory Write Protected",
        10211 => "Memory Blank Page Read Disallowed",

        10300 => "Unknown Property",
        10301 => "Read Only Property",
        10302 => "Invalid Property Value",

        52009 => "OTP Verify Fail",

        _ => "Unknown Status Code",
    }
}
