//! Request/response exchanges over a [`Port`].
//!
//! One call to [`CommandChannel::execute`] writes a frame, waits for the two
//! byte status tag and collects the result. The receive buffer is always empty
//! again when `execute` returns, whatever the outcome, so a late or partial
//! reply never leaks into the next exchange.
//!
//! The boot ROM does not length-prefix most replies. Two framing policies are
//! available:
//!
//! - [`ReplyFraming::SettleDelay`] returns whatever is buffered once the status
//!   tag has arrived. This is how the stock tools talk to the ROM and relies on
//!   the poll step giving the target time to finish sending.
//! - [`ReplyFraming::LengthPrefixed`] uses the caller's [`ReplyShape`]: for
//!   data-bearing replies it reads the u16 length and then exactly that many
//!   bytes, so slow links cannot truncate a result.
//!
//! Both return the same bytes to the caller.

use std::thread;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::command::{Command, CommandFrame, CommandOptions, ReplyShape, ReplyStatus};

/// Upper bound for bytes drained in one go after an exchange.
const DRAIN_LIMIT: usize = 64 * 1024;

/// How the result bytes of an `OK` reply are collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplyFraming {
    /// Read whatever is buffered after the status tag.
    #[default]
    SettleDelay,
    /// Read the embedded length, then exactly that many bytes.
    LengthPrefixed,
}

/// Polling behaviour of the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelTiming {
    /// Sleep between checks for the status tag.
    pub poll_interval: Duration,
}

impl Default for ChannelTiming {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// Frames single command exchanges over a borrowed port.
pub struct CommandChannel<'a, P: Port> {
    port: &'a mut P,
    timing: ChannelTiming,
    framing: ReplyFraming,
}

impl<'a, P: Port> CommandChannel<'a, P> {
    /// Create a channel with default timing and settle-delay framing.
    pub fn new(port: &'a mut P) -> Self {
        Self {
            port,
            timing: ChannelTiming::default(),
            framing: ReplyFraming::default(),
        }
    }

    /// Set the polling behaviour.
    #[must_use]
    pub fn with_timing(mut self, timing: ChannelTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Set the reply framing policy.
    #[must_use]
    pub fn with_framing(mut self, framing: ReplyFraming) -> Self {
        self.framing = framing;
        self
    }

    /// Run one exchange.
    ///
    /// Returns the result bytes that followed `OK`. `FL` becomes
    /// [`Error::CommandFailed`] and silence becomes [`Error::Timeout`].
    pub fn execute(
        &mut self,
        cmd: Command,
        payload: Option<&[u8]>,
        options: &CommandOptions,
    ) -> Result<Vec<u8>> {
        let payload = payload.unwrap_or_default();
        let frame = CommandFrame::new(cmd, payload, options.checksum);
        debug!(
            "> {cmd}: {} bytes, checksum {:#04x}",
            payload.len(),
            frame.checksum()
        );
        self.port.clear_input()?;
        self.port.write_all_bytes(&frame.build())?;

        let outcome = self.collect_reply(cmd, options);
        if outcome.is_err() {
            self.drain_after_failure(cmd);
        }
        outcome
    }

    /// Wait for the status tag and read the rest of the reply.
    fn collect_reply(&mut self, cmd: Command, options: &CommandOptions) -> Result<Vec<u8>> {
        if !self.wait_for_status(options.timeout)? {
            debug!("< {cmd}: no reply within {:?}", options.timeout);
            return Err(Error::Timeout {
                command: cmd,
                timeout: options.timeout,
            });
        }

        let mut tag = [0u8; 2];
        self.port.read_exact(&mut tag)?;

        match ReplyStatus::from_tag(tag) {
            ReplyStatus::Ok => {
                let result = self.read_result(options.reply)?;
                debug!("< {cmd}: OK, {} result bytes", result.len());
                trace!("< {cmd}: {result:02X?}");
                Ok(result)
            },
            ReplyStatus::Fail => {
                let code = self.read_error_code()?;
                debug!("< {cmd}: FL, code {code:?}");
                Err(Error::CommandFailed { command: cmd, code })
            },
            ReplyStatus::Unknown(other) => {
                let stale = self.port.drain(DRAIN_LIMIT)?;
                warn!(
                    "< {cmd}: unexpected status {other:02X?}, discarded {} bytes",
                    stale.len()
                );
                Err(Error::CommandFailed {
                    command: cmd,
                    code: None,
                })
            },
        }
    }

    /// Poll until two bytes are buffered or `timeout` has elapsed.
    fn wait_for_status(&mut self, timeout: Duration) -> Result<bool> {
        let start = Instant::now();
        loop {
            thread::sleep(self.timing.poll_interval);
            let available = self.port.bytes_available()?;
            trace!("poll: {available} bytes buffered");
            if available >= 2 {
                return Ok(true);
            }
            if start.elapsed() >= timeout {
                return Ok(false);
            }
            if crate::is_interrupted_requested() {
                return Err(Error::Interrupted);
            }
        }
    }

    fn read_result(&mut self, shape: ReplyShape) -> Result<Vec<u8>> {
        match (self.framing, shape) {
            (ReplyFraming::SettleDelay, _) => self.port.drain(DRAIN_LIMIT),
            (ReplyFraming::LengthPrefixed, ReplyShape::Empty) => {
                self.discard_leftovers()?;
                Ok(Vec::new())
            },
            (ReplyFraming::LengthPrefixed, ReplyShape::LengthPrefixed) => {
                let mut len = [0u8; 2];
                self.port.read_exact(&mut len)?;
                let mut result = vec![0u8; 2 + usize::from(u16::from_le_bytes(len))];
                result[..2].copy_from_slice(&len);
                self.port.read_exact(&mut result[2..])?;
                self.discard_leftovers()?;
                Ok(result)
            },
        }
    }

    fn read_error_code(&mut self) -> Result<Option<u16>> {
        let rest = match self.framing {
            ReplyFraming::SettleDelay => self.port.drain(DRAIN_LIMIT)?,
            ReplyFraming::LengthPrefixed => {
                let mut code = [0u8; 2];
                let rest = match self.port.read_exact(&mut code) {
                    Ok(()) => code.to_vec(),
                    Err(e) => {
                        trace!("no error code after FL: {e}");
                        Vec::new()
                    },
                };
                self.discard_leftovers()?;
                rest
            },
        };
        Ok(match rest.as_slice() {
            [lo, hi, ..] => Some(u16::from_le_bytes([*lo, *hi])),
            _ => None,
        })
    }

    /// Best effort: the exchange has already failed, keep its error.
    fn drain_after_failure(&mut self, cmd: Command) {
        if let Err(e) = self.discard_leftovers() {
            trace!("drain after failed {cmd} failed: {e}");
        }
    }

    fn discard_leftovers(&mut self) -> Result<()> {
        let stale = self.port.drain(DRAIN_LIMIT)?;
        if !stale.is_empty() {
            warn!("Discarded {} unexpected bytes after reply", stale.len());
        }
        Ok(())
    }
}
