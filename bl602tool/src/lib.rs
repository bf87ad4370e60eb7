//! # bl602tool
//!
//! A library for flashing Bouffalo Lab BL602 chips through the boot ROM's UART
//! protocol.
//!
//! This crate provides:
//!
//! - The boot ROM wake-up handshake
//! - Checksummed command framing with two reply framing policies
//! - RAM loader upload (boot header, segment header, segment data, check, jump)
//! - External flash erase, chunked write and chunked read through the loader
//! - Boot image header parsing and validation (CRC32 and SHA-256)
//!
//! ## Features
//!
//! - `native` (default): serial port support via the `serialport` crate
//! - `serde`: serialization of reports and boot info
//!
//! ## Example
//!
//! ```rust,no_run
//! use bl602tool::{Bl602Flasher, image};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let report = image::validate_file("firmware.bin")?;
//!     println!("valid: {}", report.is_valid());
//!
//!     #[cfg(feature = "native")]
//!     {
//!         let loader = std::fs::read("eflash_loader_40m.bin")?;
//!         let mut flasher = Bl602Flasher::open("/dev/ttyUSB0", 115_200)?;
//!         flasher.connect()?;
//!         println!("{}", flasher.get_boot_info()?);
//!         flasher.load_and_run(&loader)?;
//!         flasher.connect()?;
//!
//!         let dump = flasher.read_flash(0, 0x1000)?;
//!         std::fs::write("dump.bin", dump)?;
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod error;
pub mod image;
pub mod port;
pub mod protocol;
pub mod target;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by long-running library loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications). Handshake retries
/// and reply polling stop with [`Error::Interrupted`] once it does.
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::NativePort;
pub use {
    error::{Error, Result},
    image::{BootHeader, ValidationReport, validate, validate_file},
    port::{Port, SerialConfig},
    protocol::{ChannelTiming, Command, CommandOptions, ReplyFraming},
    target::bl602::{Bl602Flasher, BootInfo, CommandTimeouts, SyncConfig, SyncNegotiator},
};
