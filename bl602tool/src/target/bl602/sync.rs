//! Wake-up handshake with the boot ROM or RAM loader.
//!
//! The target autobauds on a burst of `0x55` bytes and answers `OK`. Each
//! attempt is independent: stale input is discarded first and nothing carries
//! over to the next attempt. The handshake has to be repeated whenever the
//! firmware on the other end changes (boot ROM, then the uploaded loader).

use std::thread;
use std::time::Duration;

use log::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::command::REPLY_OK;
use crate::target::bl602::protocol::{SYNC_BYTE, SYNC_PATTERN_LEN};

/// Bytes of unexpected reply kept for diagnostics.
const DIAGNOSTIC_DRAIN_LIMIT: usize = 1024;

/// Handshake retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    /// Attempts before giving up.
    pub max_attempts: u32,
    /// Wait between sending the pattern and checking for a reply.
    pub settle_delay: Duration,
    /// Wait between failed attempts.
    pub retry_delay: Duration,
    /// Number of sync bytes per attempt.
    pub pattern_len: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1000,
            settle_delay: Duration::from_millis(100),
            retry_delay: Duration::from_millis(500),
            pattern_len: SYNC_PATTERN_LEN,
        }
    }
}

/// Runs the handshake over a borrowed port.
pub struct SyncNegotiator<'a, P: Port> {
    port: &'a mut P,
    config: SyncConfig,
}

impl<'a, P: Port> SyncNegotiator<'a, P> {
    /// Create a negotiator with the default retry policy.
    pub fn new(port: &'a mut P) -> Self {
        Self {
            port,
            config: SyncConfig::default(),
        }
    }

    /// Create a negotiator with a custom retry policy.
    pub fn with_config(port: &'a mut P, config: SyncConfig) -> Self {
        Self { port, config }
    }

    /// Attempt the handshake until the target answers or attempts run out.
    ///
    /// Returns `Ok(false)` when every attempt failed.
    pub fn sync(&mut self) -> Result<bool> {
        info!("Syncing with target on {}...", self.port.name());

        for attempt in 1..=self.config.max_attempts {
            if attempt > 1 {
                thread::sleep(self.config.retry_delay);
            }
            if crate::is_interrupted_requested() {
                return Err(Error::Interrupted);
            }

            if self.attempt()? {
                info!("Sync OK after {attempt} attempt(s)");
                return Ok(true);
            }
            debug!("Sync attempt {attempt}/{} failed", self.config.max_attempts);
        }

        warn!("No sync after {} attempts", self.config.max_attempts);
        Ok(false)
    }

    /// One handshake attempt.
    fn attempt(&mut self) -> Result<bool> {
        self.port.clear_input()?;

        let pattern = vec![SYNC_BYTE; self.config.pattern_len];
        self.port.write_all_bytes(&pattern)?;

        thread::sleep(self.config.settle_delay);

        if self.port.bytes_available()? >= 2 {
            let mut reply = [0u8; 2];
            self.port.read_exact(&mut reply)?;
            if reply == REPLY_OK {
                return Ok(true);
            }
            trace!("Sync: invalid reply {reply:02X?}");
        } else {
            let leftovers = self.port.drain(DIAGNOSTIC_DRAIN_LIMIT)?;
            trace!("Sync: no reply, leftovers {leftovers:02X?}");
        }

        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::mock::MockPort;

    fn fast() -> SyncConfig {
        SyncConfig {
            settle_delay: Duration::ZERO,
            retry_delay: Duration::ZERO,
            ..Default::default()
        }
    }

    #[test]
    fn test_sync_first_attempt() {
        let mut port = MockPort::with_replies([b"OK".to_vec()]);
        let synced = SyncNegotiator::with_config(&mut port, fast())
            .sync()
            .unwrap();

        assert!(synced);
        assert_eq!(port.writes.len(), 1);
        assert_eq!(port.writes[0], vec![0x55; 70]);
        assert_eq!(port.input_clears, 1);
    }

    #[test]
    fn test_sync_exhausts_exactly_max_attempts() {
        let mut port = MockPort::new();
        let synced = SyncNegotiator::with_config(&mut port, fast())
            .sync()
            .unwrap();

        assert!(!synced);
        assert_eq!(port.writes.len(), 1000);
        assert_eq!(port.input_clears, 1000);
    }

    #[test]
    fn test_sync_invalid_reply_then_ok() {
        let mut port = MockPort::with_replies([b"XY".to_vec(), b"OK".to_vec()]);
        let synced = SyncNegotiator::with_config(&mut port, fast())
            .sync()
            .unwrap();

        assert!(synced);
        assert_eq!(port.writes.len(), 2);
    }

    #[test]
    fn test_sync_single_byte_is_drained() {
        let mut port = MockPort::with_replies([b"O".to_vec(), b"OK".to_vec()]);
        let config = SyncConfig {
            max_attempts: 2,
            ..fast()
        };
        let synced = SyncNegotiator::with_config(&mut port, config)
            .sync()
            .unwrap();

        assert!(synced);
        assert_eq!(port.bytes_available().unwrap(), 0);
    }

    #[test]
    fn test_sync_stale_input_discarded() {
        let mut port = MockPort::with_replies([b"OK".to_vec()]);
        port.push_rx(b"FL");
        let synced = SyncNegotiator::with_config(&mut port, fast())
            .sync()
            .unwrap();
        assert!(synced);
    }

    #[test]
    fn test_sync_custom_pattern_and_attempts() {
        let mut port = MockPort::new();
        let config = SyncConfig {
            max_attempts: 3,
            pattern_len: 8,
            ..fast()
        };
        let synced = SyncNegotiator::with_config(&mut port, config)
            .sync()
            .unwrap();

        assert!(!synced);
        assert_eq!(port.writes, vec![vec![0x55; 8]; 3]);
    }

    #[test]
    fn test_sync_config_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.max_attempts, 1000);
        assert_eq!(config.settle_delay, Duration::from_millis(100));
        assert_eq!(config.retry_delay, Duration::from_millis(500));
        assert_eq!(config.pattern_len, 70);
    }
}
