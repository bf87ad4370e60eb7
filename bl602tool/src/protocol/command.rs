//! BL602 boot command framing.
//!
//! ## Frame Format
//!
//! ```text
//! +------+----------+-----------+-------------------+
//! | Type | Checksum |  Length   |      Payload      |
//! +------+----------+-----------+-------------------+
//! |  1   |    1     | 2 (LE)    |  Length bytes     |
//! +------+----------+-----------+-------------------+
//! ```
//!
//! The checksum is the low byte of `len_lo + len_hi + sum(payload)` when the
//! command is checksummed, and the constant `0x01` otherwise.
//!
//! ## Replies
//!
//! ```text
//! "OK" [result bytes...]      success
//! "FL" [error code, u16 LE]   failure
//! ```

use std::fmt;
use std::time::Duration;

use crate::protocol::crc::frame_checksum;

/// Checksum byte sent when a command is not checksummed.
pub const CHECKSUM_DISABLED: u8 = 0x01;

/// Size of the frame header (type, checksum, length).
pub const HEADER_SIZE: usize = 4;

/// Reply tag for success.
pub const REPLY_OK: [u8; 2] = *b"OK";

/// Reply tag for failure.
pub const REPLY_FAIL: [u8; 2] = *b"FL";

/// Boot ROM and RAM loader command codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    /// Query boot ROM version and OTP info.
    GetBootInfo = 0x10,
    /// Load the 176-byte boot header.
    LoadBootHeader = 0x11,
    /// Load a 16-byte segment header.
    LoadSegmentHeader = 0x17,
    /// Load a chunk of segment data.
    LoadSegmentData = 0x18,
    /// Verify the loaded image.
    CheckImage = 0x19,
    /// Run the loaded image.
    Jump = 0x1A,
    /// Program a chunk of external flash.
    FlashWrite = 0x31,
    /// Read a chunk of external flash.
    FlashRead = 0x32,
    /// Erase the whole external flash.
    FlashEraseAll = 0x3C,
}

impl Command {
    /// Human-readable command name.
    pub fn name(self) -> &'static str {
        match self {
            Self::GetBootInfo => "get-boot-info",
            Self::LoadBootHeader => "load-boot-header",
            Self::LoadSegmentHeader => "load-segment-header",
            Self::LoadSegmentData => "load-segment-data",
            Self::CheckImage => "check-image",
            Self::Jump => "jump",
            Self::FlashWrite => "flash-write",
            Self::FlashRead => "flash-read",
            Self::FlashEraseAll => "flash-erase-all",
        }
    }

    /// Wire code of this command.
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:#04x})", self.name(), self.code())
    }
}

/// What a successful reply carries after `OK`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplyShape {
    /// Nothing follows the status.
    #[default]
    Empty,
    /// A u16-LE length followed by that many bytes.
    LengthPrefixed,
}

/// Per-exchange settings passed to the command channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandOptions {
    /// Whether the frame carries a real checksum.
    pub checksum: bool,
    /// How long to wait for the status tag.
    pub timeout: Duration,
    /// Layout of a successful reply.
    pub reply: ReplyShape,
}

impl Default for CommandOptions {
    fn default() -> Self {
        Self {
            checksum: false,
            timeout: Duration::from_secs(10),
            reply: ReplyShape::Empty,
        }
    }
}

impl CommandOptions {
    /// Options for an unchecksummed exchange with the given timeout.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Default::default()
        }
    }

    /// Enable or disable the frame checksum.
    #[must_use]
    pub fn with_checksum(mut self, checksum: bool) -> Self {
        self.checksum = checksum;
        self
    }

    /// Declare that the reply carries length-prefixed data.
    #[must_use]
    pub fn with_reply(mut self, reply: ReplyShape) -> Self {
        self.reply = reply;
        self
    }
}

/// Classified reply status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyStatus {
    /// `OK`
    Ok,
    /// `FL`
    Fail,
    /// Any other two bytes.
    Unknown([u8; 2]),
}

impl ReplyStatus {
    /// Classify a two-byte status tag.
    pub fn from_tag(tag: [u8; 2]) -> Self {
        match tag {
            REPLY_OK => Self::Ok,
            REPLY_FAIL => Self::Fail,
            other => Self::Unknown(other),
        }
    }
}

/// Command frame builder.
#[derive(Debug)]
pub struct CommandFrame<'a> {
    cmd: Command,
    payload: &'a [u8],
    checksum: bool,
}

impl<'a> CommandFrame<'a> {
    /// Create a new command frame.
    pub fn new(cmd: Command, payload: &'a [u8], checksum: bool) -> Self {
        Self {
            cmd,
            payload,
            checksum,
        }
    }

    /// Checksum byte for this frame.
    pub fn checksum(&self) -> u8 {
        if self.checksum {
            frame_checksum(self.payload)
        } else {
            CHECKSUM_DISABLED
        }
    }

    /// Build the complete frame data.
    ///
    /// Payloads are at most a few KiB; the length field is 16 bits.
    #[allow(clippy::cast_possible_truncation)]
    pub fn build(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE + self.payload.len());
        buf.push(self.cmd.code());
        buf.push(self.checksum());
        buf.extend_from_slice(&(self.payload.len() as u16).to_le_bytes());
        buf.extend_from_slice(self.payload);
        buf
    }

    /// Get the command type.
    pub fn command(&self) -> Command {
        self.cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_codes() {
        assert_eq!(Command::GetBootInfo.code(), 0x10);
        assert_eq!(Command::LoadBootHeader.code(), 0x11);
        assert_eq!(Command::LoadSegmentHeader.code(), 0x17);
        assert_eq!(Command::LoadSegmentData.code(), 0x18);
        assert_eq!(Command::CheckImage.code(), 0x19);
        assert_eq!(Command::Jump.code(), 0x1A);
        assert_eq!(Command::FlashWrite.code(), 0x31);
        assert_eq!(Command::FlashRead.code(), 0x32);
        assert_eq!(Command::FlashEraseAll.code(), 0x3C);
    }

    #[test]
    fn test_frame_without_checksum() {
        let payload = [0xAA, 0xBB, 0xCC];
        let data = CommandFrame::new(Command::LoadBootHeader, &payload, false).build();

        assert_eq!(data, vec![0x11, CHECKSUM_DISABLED, 0x03, 0x00, 0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn test_frame_with_checksum() {
        let payload = [0x00, 0x10, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00];
        let data = CommandFrame::new(Command::FlashRead, &payload, true).build();

        // 0x08 + 0x00 + 0x10 + 0x02
        assert_eq!(data[..4], [0x32, 0x1A, 0x08, 0x00]);
        assert_eq!(&data[4..], &payload);
    }

    #[test]
    fn test_frame_empty_payload() {
        let data = CommandFrame::new(Command::Jump, &[], false).build();
        assert_eq!(data, vec![0x1A, 0x01, 0x00, 0x00]);

        let data = CommandFrame::new(Command::FlashEraseAll, &[], true).build();
        assert_eq!(data, vec![0x3C, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_frame_length_field_little_endian() {
        let payload = vec![0u8; 4096];
        let data = CommandFrame::new(Command::FlashWrite, &payload, true).build();
        assert_eq!(data[2..4], [0x00, 0x10]);
        assert_eq!(data.len(), HEADER_SIZE + 4096);
    }

    #[test]
    fn test_reply_status_from_tag() {
        assert_eq!(ReplyStatus::from_tag(*b"OK"), ReplyStatus::Ok);
        assert_eq!(ReplyStatus::from_tag(*b"FL"), ReplyStatus::Fail);
        assert_eq!(
            ReplyStatus::from_tag([0x00, 0x55]),
            ReplyStatus::Unknown([0x00, 0x55])
        );
    }

    #[test]
    fn test_command_options_builder() {
        let opts = CommandOptions::new(Duration::from_secs(100))
            .with_checksum(true)
            .with_reply(ReplyShape::LengthPrefixed);
        assert!(opts.checksum);
        assert_eq!(opts.timeout, Duration::from_secs(100));
        assert_eq!(opts.reply, ReplyShape::LengthPrefixed);

        let default = CommandOptions::default();
        assert!(!default.checksum);
        assert_eq!(default.reply, ReplyShape::Empty);
    }

    #[test]
    fn test_command_display() {
        assert_eq!(Command::FlashRead.to_string(), "flash-read (0x32)");
        assert_eq!(Command::FlashEraseAll.to_string(), "flash-erase-all (0x3c)");
    }
}
