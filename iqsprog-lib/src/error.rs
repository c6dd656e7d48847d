//! IqsProg error file
//!
//! Every failure the library reports, with enough context to diagnose it
//! without re-running the sequence

use super::definitions::{BL_BLK_LEN_MAX, FW_FILE_LEN, WR_BYTES_MAX};
use embedded_hal::i2c::ErrorKind;
use std::path::PathBuf;
use thiserror::Error;

/// Result type used across the library
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Reason a hex record was rejected
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordError {
    #[error("Invalid start")]
    InvalidStart,
    #[error("Invalid header")]
    InvalidHeader,
    #[error("Invalid data")]
    InvalidData,
    #[error("Invalid checksum")]
    InvalidChecksum,
    #[error("Incorrect checksum: expected 0x{expected:02X}, found 0x{found:02X}")]
    IncorrectChecksum { expected: u8, found: u8 },
    #[error("Invalid address 0x{0:04X}")]
    InvalidAddress(u16),
    #[error("Invalid type 0x{0:02X}")]
    InvalidType(u8),
    #[error("Insufficient firmware size")]
    Truncated,
}

/// Broad failure classes, used by callers to decide between retrying,
/// resetting and giving up
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    TransientBus,
    ProtocolViolation,
    MalformedImage,
    UnsupportedHardware,
    Resource,
    Permission,
    InvalidArgument,
}

/// Possible errors while using library
#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to read from address 0x{register:04X}: {kind}")]
    Read { register: u16, kind: ErrorKind },
    #[error("Failed to write to address 0x{register:04X}: {kind}")]
    Write { register: u16, kind: ErrorKind },
    #[error("Write of {0} bytes exceeds the {} byte limit", WR_BYTES_MAX)]
    WriteTooLong(usize),
    #[error("Reset line error: {0:?}")]
    ResetLine(embedded_hal::digital::ErrorKind),

    #[error("Unsuccessful bootloader command 0x{command:02X}: {kind}")]
    BootloaderCommand { command: u8, kind: ErrorKind },
    #[error("Unrecognized bootloader ID: 0x{0:04X}")]
    BootloaderId(u16),
    #[error("Failed to open bootloader after {attempts} reset cycles: {source}")]
    BootloaderOpen {
        attempts: usize,
        #[source]
        source: Box<Error>,
    },
    #[error("Bootloader CRC failed: 0x{0:02X}")]
    Crc(u8),
    #[error("Failed to write block at address 0x{address:04X}: {kind}")]
    BlockWrite { address: u16, kind: ErrorKind },
    #[error("Failed to read block at address 0x{address:04X}: {kind}")]
    BlockRead { address: u16, kind: ErrorKind },
    #[error("Failed to verify block at address 0x{0:04X}")]
    Verify(u16),
    #[error("Device did not leave bootloader mode")]
    StuckInBootloader,

    #[error("{reason} at record {record}")]
    Record { record: u32, reason: RecordError },
    #[error("Image length {0} does not match the program memory layout")]
    Layout(usize),
    #[error("Blocks of {len} bytes at 0x{address:04X} fall outside program memory")]
    BlockRange { address: u16, len: usize },

    #[error("Unrecognized product number: {0}")]
    UnrecognizedProduct(u16),
    #[error("Unrecognized project number: {0}")]
    UnrecognizedProject(u16),
    #[error("Unrecognized bootloader status: 0x{0:02X}")]
    UnrecognizedStatus(u8),
    #[error("Invalid maximum {axis}-coordinate: {requested} > {limit}")]
    InvalidCoordinate {
        axis: char,
        requested: u32,
        limit: u16,
    },

    #[error("Device has no bootloader")]
    NoBootloader,
    #[error("Firmware name is empty")]
    EmptyName,
    #[error("Firmware name of {0} bytes exceeds the {} byte limit", FW_FILE_LEN)]
    NameTooLong(usize),
    #[error("Failed to request firmware {path:?}: {source}")]
    FirmwareAccess {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Out of memory for a {0} byte image")]
    OutOfMemory(usize),
}

impl Error {
    /// Failure class of this error
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Read { .. }
            | Error::Write { .. }
            | Error::ResetLine(_)
            | Error::BootloaderCommand { .. }
            | Error::BlockWrite { .. }
            | Error::BlockRead { .. } => ErrorClass::TransientBus,
            Error::BootloaderId(_)
            | Error::BootloaderOpen { .. }
            | Error::Crc(_)
            | Error::Verify(_)
            | Error::StuckInBootloader => ErrorClass::ProtocolViolation,
            Error::Record { .. } | Error::Layout(_) | Error::BlockRange { .. } => {
                ErrorClass::MalformedImage
            }
            Error::UnrecognizedProduct(_)
            | Error::UnrecognizedProject(_)
            | Error::UnrecognizedStatus(_)
            | Error::InvalidCoordinate { .. } => ErrorClass::UnsupportedHardware,
            Error::OutOfMemory(_) | Error::FirmwareAccess { .. } => ErrorClass::Resource,
            Error::NoBootloader => ErrorClass::Permission,
            Error::WriteTooLong(_) | Error::EmptyName | Error::NameTooLong(_) => {
                ErrorClass::InvalidArgument
            }
        }
    }
}

/// Transfers of whole bootloader blocks only
pub(crate) fn check_blocks(len: usize) -> Result<()> {
    if len % BL_BLK_LEN_MAX != 0 {
        return Err(Error::Layout(len));
    }

    Ok(())
}
