//! Port abstraction for the serial link to the boot ROM.
//!
//! The protocol engine never talks to an OS serial device directly. It drives a
//! [`Port`], which is a blocking byte stream that can also report how many
//! received bytes are waiting and discard either direction's buffer. The boot
//! ROM replies without length prefixes for most commands, so "bytes currently
//! available" is part of the contract rather than an optimisation.
//!
//! ```text
//! +------------------------------+
//! |  Bl602Flasher (sync, loader, |
//! |  flash erase/write/read)     |
//! +--------------+---------------+
//!                |
//!                v
//! +--------------+---------------+
//! |  CommandChannel (framing,    |
//! |  polling, reply classifying) |
//! +--------------+---------------+
//!                |
//!                v
//! +--------------+---------------+
//! |  Port trait                  |
//! +--------------+---------------+
//!                |
//!                v
//! +--------------+---------------+
//! |  NativePort (serialport)     |
//! +------------------------------+
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use bl602tool::port::Port;
//!
//! fn drain<P: Port>(port: &mut P) -> bl602tool::Result<Vec<u8>> {
//!     let mut buf = vec![0u8; port.bytes_available()?];
//!     port.read_exact(&mut buf)?;
//!     Ok(buf)
//! }
//! ```

#[cfg(feature = "native")]
pub mod native;

#[cfg(test)]
pub(crate) mod mock;

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Line rate the boot ROM listens at.
pub const BOOTROM_BAUD: u32 = 115_200;

/// Serial port configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate the port is opened with.
    pub baud_rate: u32,
    /// Read/write timeout for blocking calls.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: BOOTROM_BAUD,
            timeout: Duration::from_millis(1000),
        }
    }
}

impl SerialConfig {
    /// Create a configuration for the boot ROM line rate.
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            ..Default::default()
        }
    }

    /// Set the baud rate.
    #[must_use]
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Byte-stream transport used by the protocol engine.
///
/// A session owns exactly one `Port`; no two exchanges are ever in flight on
/// the same port.
pub trait Port: Read + Write + Send {
    /// Get the current baud rate.
    fn baud_rate(&self) -> u32;

    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Number of received bytes waiting to be read.
    fn bytes_available(&mut self) -> Result<usize>;

    /// Discard all bytes waiting in the receive buffer.
    fn clear_input(&mut self) -> Result<()>;

    /// Discard all bytes waiting in the transmit buffer.
    fn clear_output(&mut self) -> Result<()>;

    /// Close the port and release resources.
    fn close(&mut self) -> Result<()>;

    /// Write all bytes, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        std::io::Write::write_all(self, buf)?;
        std::io::Write::flush(self)?;
        Ok(())
    }

    /// Read and discard up to `limit` waiting bytes, returning what was read.
    fn drain(&mut self, limit: usize) -> Result<Vec<u8>> {
        let n = self.bytes_available()?.min(limit);
        let mut buf = vec![0u8; n];
        if n > 0 {
            std::io::Read::read_exact(self, &mut buf)?;
        }
        Ok(buf)
    }
}

// Re-export the native implementation
#[cfg(feature = "native")]
pub use native::NativePort;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_config_default() {
        let config = SerialConfig::default();
        assert_eq!(config.baud_rate, BOOTROM_BAUD);
        assert_eq!(config.timeout, Duration::from_millis(1000));
        assert!(config.port_name.is_empty());
    }

    #[test]
    fn test_serial_config_builder() {
        let config = SerialConfig::new("/dev/ttyUSB0")
            .with_baud_rate(460_800)
            .with_timeout(Duration::from_secs(5));

        assert_eq!(config.port_name, "/dev/ttyUSB0");
        assert_eq!(config.baud_rate, 460_800);
        assert_eq!(config.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_drain_respects_limit() {
        let mut port = mock::MockPort::new();
        port.push_rx(&[0xAA; 10]);

        let drained = port.drain(4).unwrap();
        assert_eq!(drained, vec![0xAA; 4]);
        assert_eq!(port.bytes_available().unwrap(), 6);
    }

    #[test]
    fn test_mock_runs_at_bootrom_baud() {
        let port = mock::MockPort::new();
        assert_eq!(port.baud_rate(), BOOTROM_BAUD);
        assert_eq!(port.name(), "mock");
    }

    #[test]
    fn test_close() {
        let mut port = mock::MockPort::new();
        port.close().unwrap();
        assert!(port.is_closed());
    }

    #[test]
    fn test_drain_empty() {
        let mut port = mock::MockPort::new();
        assert!(port.drain(1024).unwrap().is_empty());
    }
}
