//! BL602 flasher session.
//!
//! A [`Bl602Flasher`] owns the port for the whole session and threads it
//! through every stage:
//!
//! ```text
//! open -> sync -> load_and_run (boot ROM) -> sync (RAM loader)
//!      -> erase_all / write_flash / read_flash -> close
//! ```
//!
//! Each stage is a sequence of single [`CommandChannel`] exchanges. Nothing is
//! retried here; a failed exchange aborts the operation and the caller decides
//! whether to go on.
//!
//! ## Example
//!
//! ```rust,no_run
//! use bl602tool::Bl602Flasher;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let loader = std::fs::read("eflash_loader_40m.bin")?;
//!     let firmware = std::fs::read("firmware.bin")?;
//!
//!     let mut flasher = Bl602Flasher::open("/dev/ttyUSB0", 115_200)?;
//!     flasher.connect()?;
//!     flasher.load_and_run(&loader)?;
//!     flasher.connect()?;
//!
//!     flasher.erase_all()?;
//!     flasher.write_flash_with_progress(&firmware, 0, |current, total| {
//!         println!("{current}/{total}");
//!     })?;
//!
//!     flasher.close()?;
//!     Ok(())
//! }
//! ```

use log::{debug, info};

use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::channel::{ChannelTiming, CommandChannel, ReplyFraming};
use crate::protocol::command::{Command, CommandOptions};
use crate::target::bl602::protocol::{
    BOOT_HEADER_SIZE, BootInfo, CommandTimeouts, MAX_READ_CHUNK, MAX_WRITE_CHUNK,
    MIN_LOADER_IMAGE_SIZE, SEGMENT_HEADER_SIZE, boot_info_options, bootrom_options, flash_options,
    read_options, split_length_prefix,
};
use crate::target::bl602::sync::{SyncConfig, SyncNegotiator};

/// BL602 flasher.
///
/// Generic over the port type `P`, so the same session logic drives a real
/// serial port or an in-memory test double.
pub struct Bl602Flasher<P: Port> {
    port: P,
    framing: ReplyFraming,
    timing: ChannelTiming,
    sync_config: SyncConfig,
    timeouts: CommandTimeouts,
}

impl<P: Port> Bl602Flasher<P> {
    /// Create a flasher over an already opened port.
    pub fn new(port: P) -> Self {
        Self {
            port,
            framing: ReplyFraming::default(),
            timing: ChannelTiming::default(),
            sync_config: SyncConfig::default(),
            timeouts: CommandTimeouts::default(),
        }
    }

    /// Set how reply data is collected.
    #[must_use]
    pub fn with_framing(mut self, framing: ReplyFraming) -> Self {
        self.framing = framing;
        self
    }

    /// Set the reply polling behaviour.
    #[must_use]
    pub fn with_timing(mut self, timing: ChannelTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Set the handshake retry policy.
    #[must_use]
    pub fn with_sync_config(mut self, sync_config: SyncConfig) -> Self {
        self.sync_config = sync_config;
        self
    }

    /// Set per-command reply timeouts.
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: CommandTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Reply framing in use.
    pub fn framing(&self) -> ReplyFraming {
        self.framing
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Get a mutable reference to the underlying port.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Consume the flasher and return the underlying port.
    pub fn into_port(self) -> P {
        self.port
    }

    /// End the session and close the port.
    pub fn close(mut self) -> Result<()> {
        self.port.close()
    }

    fn execute(
        &mut self,
        cmd: Command,
        payload: Option<&[u8]>,
        options: &CommandOptions,
    ) -> Result<Vec<u8>> {
        CommandChannel::new(&mut self.port)
            .with_timing(self.timing)
            .with_framing(self.framing)
            .execute(cmd, payload, options)
    }

    /// Run the handshake once, returning whether the target answered.
    pub fn sync(&mut self) -> Result<bool> {
        SyncNegotiator::with_config(&mut self.port, self.sync_config).sync()
    }

    /// Run the handshake, failing with [`Error::SyncExhausted`] if it never
    /// succeeds.
    ///
    /// Call it again after [`load_and_run`](Self::load_and_run): the RAM loader
    /// needs its own handshake.
    pub fn connect(&mut self) -> Result<()> {
        if self.sync()? {
            Ok(())
        } else {
            Err(Error::SyncExhausted {
                attempts: self.sync_config.max_attempts,
            })
        }
    }

    /// Query boot ROM version and OTP info.
    pub fn get_boot_info(&mut self) -> Result<BootInfo> {
        let options = boot_info_options(self.timeouts.bootrom);
        let reply = self.execute(Command::GetBootInfo, None, &options)?;
        if reply.is_empty() {
            return Err(Error::NoReply);
        }

        let boot_info = BootInfo::parse(&reply)?;
        info!("BootROM version: {}", boot_info.bootrom_version);
        Ok(boot_info)
    }

    /// Upload a RAM loader image to the boot ROM and start it.
    pub fn load_and_run(&mut self, image: &[u8]) -> Result<()> {
        self.load_and_run_with_progress(image, |_, _| {})
    }

    /// Upload a RAM loader image, reporting segment bytes sent.
    ///
    /// The image is sent as boot header, segment header, then the rest in
    /// chunks, followed by check and jump.
    pub fn load_and_run_with_progress<F>(&mut self, image: &[u8], mut progress: F) -> Result<()>
    where
        F: FnMut(usize, usize),
    {
        if image.len() < MIN_LOADER_IMAGE_SIZE {
            return Err(Error::ImageTooShort {
                required: MIN_LOADER_IMAGE_SIZE,
                actual: image.len(),
            });
        }

        let options = bootrom_options(self.timeouts.bootrom);
        let (boot_header, rest) = image.split_at(BOOT_HEADER_SIZE);
        let (segment_header, segment_data) = rest.split_at(SEGMENT_HEADER_SIZE);

        info!("Uploading RAM loader ({} bytes)", image.len());
        self.execute(Command::LoadBootHeader, Some(boot_header), &options)?;
        self.execute(Command::LoadSegmentHeader, Some(segment_header), &options)?;

        let total = segment_data.len();
        let mut sent = 0;
        progress(sent, total);
        for chunk in segment_data.chunks(MAX_WRITE_CHUNK) {
            self.execute(Command::LoadSegmentData, Some(chunk), &options)?;
            sent += chunk.len();
            progress(sent, total);
        }

        self.execute(Command::CheckImage, None, &options)?;
        self.execute(Command::Jump, None, &options)?;

        info!("RAM loader started");
        Ok(())
    }

    /// Erase the whole external flash.
    pub fn erase_all(&mut self) -> Result<()> {
        info!("Erasing entire flash...");
        let options = flash_options(self.timeouts.erase_all);
        self.execute(Command::FlashEraseAll, None, &options)?;
        info!("Flash erased");
        Ok(())
    }

    /// Program `data` at `start_address`.
    pub fn write_flash(&mut self, data: &[u8], start_address: u32) -> Result<()> {
        self.write_flash_with_progress(data, start_address, |_, _| {})
    }

    /// Program `data` at `start_address`, reporting bytes written.
    ///
    /// The first failing chunk aborts the write; chunks already written stay
    /// in flash.
    #[allow(clippy::cast_possible_truncation)]
    pub fn write_flash_with_progress<F>(
        &mut self,
        data: &[u8],
        start_address: u32,
        mut progress: F,
    ) -> Result<()>
    where
        F: FnMut(usize, usize),
    {
        check_range(start_address, data.len())?;
        info!(
            "Writing {} bytes to flash at 0x{start_address:08X}",
            data.len()
        );

        let options = flash_options(self.timeouts.write);
        let total = data.len();
        let mut address = start_address;
        let mut written = 0;

        for chunk in data.chunks(MAX_WRITE_CHUNK) {
            let mut payload = Vec::with_capacity(4 + chunk.len());
            payload.extend_from_slice(&address.to_le_bytes());
            payload.extend_from_slice(chunk);

            self.execute(Command::FlashWrite, Some(&payload), &options)?;

            // Chunks are at most MAX_WRITE_CHUNK bytes.
            address = address.wrapping_add(chunk.len() as u32);
            written += chunk.len();
            progress(written, total);
        }

        debug!("Wrote {written} bytes");
        Ok(())
    }

    /// Read `amount` bytes of flash starting at `start_address`.
    pub fn read_flash(&mut self, start_address: u32, amount: u32) -> Result<Vec<u8>> {
        self.read_flash_with_progress(start_address, amount, |_, _| {})
    }

    /// Read flash, reporting bytes received.
    ///
    /// Byte `i` of the result is flash address `start_address + i`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn read_flash_with_progress<F>(
        &mut self,
        start_address: u32,
        amount: u32,
        mut progress: F,
    ) -> Result<Vec<u8>>
    where
        F: FnMut(usize, usize),
    {
        let total = amount as usize;
        check_range(start_address, total)?;
        info!("Reading {total} bytes of flash at 0x{start_address:08X}");

        let options = read_options(self.timeouts.read);
        let mut buf = vec![0u8; total];
        let mut address = start_address;
        let mut offset = 0;

        while offset < total {
            let chunk_len = (total - offset).min(MAX_READ_CHUNK);

            let mut payload = [0u8; 8];
            payload[..4].copy_from_slice(&address.to_le_bytes());
            payload[4..].copy_from_slice(&(chunk_len as u32).to_le_bytes());

            let reply = self.execute(Command::FlashRead, Some(&payload), &options)?;
            if reply.is_empty() {
                return Err(Error::NoReply);
            }
            let body = reply.get(2..).unwrap_or_default();
            if body.len() != chunk_len {
                return Err(Error::SizeMismatch {
                    expected: chunk_len,
                    actual: body.len(),
                });
            }
            let (_, data) = split_length_prefix(&reply)?;

            buf[offset..offset + chunk_len].copy_from_slice(data);

            address = address.wrapping_add(chunk_len as u32);
            offset += chunk_len;
            progress(offset, total);
        }

        Ok(buf)
    }

    /// Erase, write a test pattern at `start_address`, and read it back.
    ///
    /// Returns the offset of the first byte that did not read back, or `None`
    /// when the whole pattern matched.
    pub fn self_test(&mut self, start_address: u32, len: u32) -> Result<Option<usize>> {
        info!("Self-test: {len} bytes at 0x{start_address:08X}");

        let pattern = test_pattern(len as usize);
        self.erase_all()?;
        self.write_flash(&pattern, start_address)?;
        let readback = self.read_flash(start_address, len)?;

        let mismatch = pattern
            .iter()
            .zip(&readback)
            .position(|(expected, actual)| expected != actual);
        match mismatch {
            Some(offset) => info!("Self-test failed at offset {offset}"),
            None => info!("Self-test passed"),
        }
        Ok(mismatch)
    }
}

/// Reject ranges that run past the 32-bit address space.
fn check_range(start_address: u32, len: usize) -> Result<()> {
    let end = u64::from(start_address) + len as u64;
    if end > 1 << 32 {
        return Err(Error::Config(format!(
            "{len} bytes at 0x{start_address:08X} exceed the 32-bit address space"
        )));
    }
    Ok(())
}

/// Self-test data. The period is prime so a misplaced chunk never lines up.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn test_pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[cfg(feature = "native")]
mod native_impl {
    use log::{debug, warn};

    use super::{Bl602Flasher, Result};
    use crate::port::{BOOTROM_BAUD, NativePort, Port, SerialConfig};

    impl Bl602Flasher<NativePort> {
        /// Open a serial port and create a flasher on it.
        ///
        /// The boot ROM only listens at 115200 baud, so the port is always
        /// opened at that rate; `baud` is advisory until a rate change
        /// command exists.
        pub fn open(port_name: &str, baud: u32) -> Result<Self> {
            if baud != BOOTROM_BAUD {
                warn!("Requested {baud} baud, using {BOOTROM_BAUD} for the boot ROM");
            }
            let config = SerialConfig::new(port_name);
            let port = NativePort::open(&config)?;
            debug!("Opened {} at {} baud", port.name(), port.baud_rate());
            Ok(Self::new(port))
        }
    }
}
