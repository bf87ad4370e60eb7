//! BL602 boot ROM protocol constants and reply parsing.

use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};
pub use crate::image::boot_header::BOOT_HEADER_SIZE;
use crate::protocol::command::{CommandOptions, ReplyShape};

/// Size of the segment header following the boot header.
pub const SEGMENT_HEADER_SIZE: usize = 16;

/// Smallest image `load_and_run` accepts.
pub const MIN_LOADER_IMAGE_SIZE: usize = BOOT_HEADER_SIZE + SEGMENT_HEADER_SIZE;

/// Largest data chunk per segment-data or flash-write exchange.
pub const MAX_WRITE_CHUNK: usize = 4092;

/// Largest chunk per flash-read exchange.
pub const MAX_READ_CHUNK: usize = 512;

/// Byte repeated during the wake-up handshake.
pub const SYNC_BYTE: u8 = 0x55;

/// Number of sync bytes sent per attempt.
pub const SYNC_PATTERN_LEN: usize = 70;

/// Boot ROM commands (header/segment/check/jump/info).
pub const BOOTROM_TIMEOUT: Duration = Duration::from_secs(10);

/// Chip erase.
pub const ERASE_ALL_TIMEOUT: Duration = Duration::from_secs(100);

/// One flash-write chunk.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// One flash-read chunk.
pub const READ_TIMEOUT: Duration = Duration::from_secs(100);

/// Per-command reply timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandTimeouts {
    /// Boot ROM commands (header, segment, check, jump, info).
    pub bootrom: Duration,
    /// Chip erase.
    pub erase_all: Duration,
    /// One flash-write chunk.
    pub write: Duration,
    /// One flash-read chunk.
    pub read: Duration,
}

impl Default for CommandTimeouts {
    fn default() -> Self {
        Self {
            bootrom: BOOTROM_TIMEOUT,
            erase_all: ERASE_ALL_TIMEOUT,
            write: WRITE_TIMEOUT,
            read: READ_TIMEOUT,
        }
    }
}

impl CommandTimeouts {
    /// Use the same timeout for every command.
    pub fn uniform(timeout: Duration) -> Self {
        Self {
            bootrom: timeout,
            erase_all: timeout,
            write: timeout,
            read: timeout,
        }
    }
}

/// Options for an unchecksummed boot ROM exchange.
pub(crate) fn bootrom_options(timeout: Duration) -> CommandOptions {
    CommandOptions::new(timeout)
}

/// Options for a checksummed flash exchange.
pub(crate) fn flash_options(timeout: Duration) -> CommandOptions {
    CommandOptions::new(timeout).with_checksum(true)
}

/// Boot ROM identification returned by the get-boot-info command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct BootInfo {
    /// Boot ROM version.
    pub bootrom_version: u32,
    /// Raw OTP info, four rows of four bytes.
    pub otp: [u8; 16],
}

impl BootInfo {
    /// Payload size after the length prefix.
    pub const SIZE: usize = 20;

    /// Parse a length-prefixed get-boot-info result.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let (len, body) = split_length_prefix(data)?;
        if len < Self::SIZE {
            return Err(Error::SizeUnexpected(format!(
                "boot info needs {} bytes, got {len}",
                Self::SIZE
            )));
        }

        let mut version = [0u8; 4];
        version.copy_from_slice(&body[..4]);
        let mut otp = [0u8; 16];
        otp.copy_from_slice(&body[4..20]);

        Ok(Self {
            bootrom_version: u32::from_le_bytes(version),
            otp,
        })
    }

    /// OTP info as a 4x4 grid.
    pub fn otp_rows(&self) -> [[u8; 4]; 4] {
        let mut rows = [[0u8; 4]; 4];
        for (row, chunk) in rows.iter_mut().zip(self.otp.chunks_exact(4)) {
            row.copy_from_slice(chunk);
        }
        rows
    }
}

impl fmt::Display for BootInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "BootROM version: {}", self.bootrom_version)?;
        write!(f, "OTP flags:")?;
        for row in self.otp_rows() {
            write!(f, "\n ")?;
            for byte in row {
                write!(f, " {byte:08b}")?;
            }
        }
        Ok(())
    }
}

/// Split a `len(u16 LE) || data` reply, checking that `len` covers `data`.
pub(crate) fn split_length_prefix(data: &[u8]) -> Result<(usize, &[u8])> {
    let [lo, hi, body @ ..] = data else {
        return Err(Error::SizeUnexpected(format!(
            "reply of {} bytes has no length field",
            data.len()
        )));
    };
    let len = usize::from(u16::from_le_bytes([*lo, *hi]));
    if len != body.len() {
        return Err(Error::SizeUnexpected(format!(
            "length field says {len} bytes, reply carries {}",
            body.len()
        )));
    }
    Ok((len, body))
}

/// Options for the get-boot-info exchange.
pub(crate) fn boot_info_options(timeout: Duration) -> CommandOptions {
    bootrom_options(timeout).with_reply(ReplyShape::LengthPrefixed)
}

/// Options for one flash-read chunk.
pub(crate) fn read_options(timeout: Duration) -> CommandOptions {
    flash_options(timeout).with_reply(ReplyShape::LengthPrefixed)
}
