//! BL602 boot ROM and RAM loader support.

pub mod flasher;
pub mod protocol;
pub mod sync;

pub use flasher::Bl602Flasher;
pub use protocol::{BootInfo, CommandTimeouts};
pub use sync::{SyncConfig, SyncNegotiator};
