//! Error types for bl602tool.

use std::io;
use std::time::Duration;
use thiserror::Error;

use crate::protocol::command::Command;

/// Result type for bl602tool operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for bl602tool operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error (opening or configuring the port).
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Every handshake attempt went unanswered.
    #[error("Sync failed after {attempts} attempts")]
    SyncExhausted {
        /// Number of handshake attempts made.
        attempts: u32,
    },

    /// The target did not answer a command in time.
    #[error("Timeout: no reply to {command} within {timeout:?}")]
    Timeout {
        /// Command that timed out.
        command: Command,
        /// Timeout budget that was exhausted.
        timeout: Duration,
    },

    /// The target answered a command with `FL`.
    #[error("Command {command} failed{}", code.map(|c| format!(" (error code {c:#06x})")).unwrap_or_default())]
    CommandFailed {
        /// Command that failed.
        command: Command,
        /// Error code sent by the target after `FL`, when one was received.
        code: Option<u16>,
    },

    /// A reply carried a different amount of data than requested.
    #[error("Size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        /// Number of bytes requested.
        expected: usize,
        /// Number of bytes received.
        actual: usize,
    },

    /// A reply's embedded length field disagrees with its payload.
    #[error("Unexpected reply size: {0}")]
    SizeUnexpected(String),

    /// The channel produced no usable result for a command that returns data.
    #[error("No reply data from target")]
    NoReply,

    /// Image is too short to contain the required headers.
    #[error("Image too short: need at least {required} bytes, got {actual}")]
    ImageTooShort {
        /// Minimum size in bytes.
        required: usize,
        /// Actual size in bytes.
        actual: usize,
    },

    /// Invalid image contents.
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// Operation stopped by the embedding application.
    #[error("Operation interrupted")]
    Interrupted,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_failed_display_with_code() {
        let err = Error::CommandFailed {
            command: Command::FlashWrite,
            code: Some(0x0102),
        };
        assert_eq!(
            err.to_string(),
            "Command flash-write (0x31) failed (error code 0x0102)"
        );
    }

    #[test]
    fn test_command_failed_display_without_code() {
        let err = Error::CommandFailed {
            command: Command::Jump,
            code: None,
        };
        assert_eq!(err.to_string(), "Command jump (0x1a) failed");
    }

    #[test]
    fn test_timeout_display() {
        let err = Error::Timeout {
            command: Command::FlashEraseAll,
            timeout: Duration::from_secs(100),
        };
        assert!(err.to_string().contains("flash-erase-all"));
        assert!(err.to_string().contains("100s"));
    }
}
