//! Wire protocol shared by the boot ROM and the RAM loader.
//!
//! - [`crc`]: frame checksum and CRC32
//! - [`command`]: command codes and frame layout
//! - [`channel`]: one request/response exchange over a [`Port`](crate::port::Port)

pub mod channel;
pub mod command;
pub mod crc;

// Re-export common types
pub use channel::{ChannelTiming, CommandChannel, ReplyFraming};
pub use command::{Command, CommandFrame, CommandOptions, ReplyShape, ReplyStatus};
pub use crc::{crc32, frame_checksum};
