//! Command implementations.
//!
//! Offline image inspection and the serial session live in separate modules.

pub(crate) mod device;
pub(crate) mod image;
