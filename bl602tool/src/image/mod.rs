//! Firmware image formats.

pub mod boot_header;

pub use boot_header::{
    BlockReport, BlockStatus, BootHeader, ClockConfig, FlashConfig, HashStatus, ImageReport,
    ValidationReport, validate, validate_file,
};
