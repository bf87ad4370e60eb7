//! BL602 boot image header parsing and validation.
//!
//! ## Layout
//!
//! ```text
//! offset  size  field
//! ------  ----  -------------------------------------------
//!      0     4  magic "BFNP"
//!      4     4  revision
//!      8    92  flash config  "FCFG" | 84-byte body | crc32
//!    100    16  clock config  "PCFG" | 8-byte body  | crc32
//!    116     4  boot config
//!    120     4  image segment info
//!    124     4  boot entry
//!    128     4  image start
//!    132    32  SHA-256 of everything after the header
//!    164     8  reserved
//!    172     4  crc32 of bytes [0, 172)
//!    176        payload
//! ```
//!
//! All integers are little-endian. The nested blocks carry a CRC32 over their
//! body only (magic and CRC field excluded).
//!
//! Validation never fails on malformed input: [`validate`] returns a
//! [`ValidationReport`] that records the outcome of every check, so one bad
//! block does not hide problems in the others.

use std::fmt;
use std::io::{Cursor, Read};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};
use log::debug;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::protocol::crc::crc32;

/// Boot header magic.
pub const BOOT_HEADER_MAGIC: [u8; 4] = *b"BFNP";

/// Flash config block magic.
pub const FLASH_CONFIG_MAGIC: [u8; 4] = *b"FCFG";

/// Clock config block magic.
pub const CLOCK_CONFIG_MAGIC: [u8; 4] = *b"PCFG";

/// Size of the boot header.
pub const BOOT_HEADER_SIZE: usize = 176;

/// Bytes covered by the boot header CRC.
pub const BOOT_HEADER_CRC_LEN: usize = 172;

/// Offset of the flash config block inside the boot header.
pub const FLASH_CONFIG_OFFSET: usize = 8;

/// Size of the flash config block.
pub const FLASH_CONFIG_SIZE: usize = 92;

/// Offset of the clock config block inside the boot header.
pub const CLOCK_CONFIG_OFFSET: usize = FLASH_CONFIG_OFFSET + FLASH_CONFIG_SIZE;

/// Size of the clock config block.
pub const CLOCK_CONFIG_SIZE: usize = 16;

/// Serial flash parameters the boot ROM uses to talk to external flash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[allow(missing_docs)]
pub struct FlashConfig {
    pub magic: [u8; 4],
    pub io_mode: u8,
    pub continuous_read_support: u8,
    pub clock_delay: u8,
    pub clock_invert: u8,
    pub reset_enable_cmd: u8,
    pub reset_cmd: u8,
    pub reset_continuous_read_cmd: u8,
    pub reset_continuous_read_cmd_size: u8,
    pub jedec_id_cmd: u8,
    pub jedec_id_cmd_dummy_clock: u8,
    pub qpi_jedec_id_cmd: u8,
    pub qpi_jedec_id_cmd_dummy_clock: u8,
    /// Sector size in KiB.
    pub sector_size: u8,
    pub manufacturer_id: u8,
    pub page_size: u16,
    pub chip_erase_cmd: u8,
    pub sector_erase_cmd: u8,
    pub block_erase_32k_cmd: u8,
    pub block_erase_64k_cmd: u8,
    pub write_enable_cmd: u8,
    pub page_program_cmd: u8,
    pub qio_page_program_cmd: u8,
    pub qio_page_program_address_mode: u8,
    pub fast_read_cmd: u8,
    pub fast_read_dummy_clock: u8,
    pub qpi_fast_read_cmd: u8,
    pub qpi_fast_read_dummy_clock: u8,
    pub fast_read_dual_output_cmd: u8,
    pub fast_read_dual_output_dummy_clock: u8,
    pub fast_read_dual_io_cmd: u8,
    pub fast_read_dual_io_dummy_clock: u8,
    pub fast_read_quad_output_cmd: u8,
    pub fast_read_quad_output_dummy_clock: u8,
    pub fast_read_quad_io_cmd: u8,
    pub fast_read_quad_io_dummy_clock: u8,
    pub qpi_fast_read_quad_io_cmd: u8,
    pub qpi_fast_read_quad_io_dummy_clock: u8,
    pub qpi_page_program_cmd: u8,
    pub volatile_reg_write_enable_cmd: u8,
    pub write_enable_reg_index: u8,
    pub quad_enable_reg_index: u8,
    pub busy_reg_index: u8,
    pub write_enable_bit: u8,
    pub quad_enable_bit: u8,
    pub busy_bit: u8,
    pub write_enable_write_reg_len: u8,
    pub write_enable_read_reg_len: u8,
    pub quad_enable_write_reg_len: u8,
    pub quad_enable_read_reg_len: u8,
    pub release_power_down_cmd: u8,
    pub busy_read_reg_len: u8,
    pub read_reg_cmd: [u8; 4],
    pub write_reg_cmd: [u8; 4],
    pub enter_qpi_cmd: u8,
    pub exit_qpi_cmd: u8,
    pub continuous_read_mode: u8,
    pub continuous_read_exit: u8,
    pub burst_wrap_cmd: u8,
    pub burst_wrap_cmd_dummy_clock: u8,
    pub burst_wrap_data_mode: u8,
    pub burst_wrap_data: u8,
    pub disable_burst_wrap_cmd: u8,
    pub disable_burst_wrap_cmd_dummy_clock: u8,
    pub disable_burst_wrap_data_mode: u8,
    pub disable_burst_wrap_data: u8,
    /// 4K sector erase time in ms.
    pub sector_erase_time: u16,
    /// 32K block erase time in ms.
    pub block_erase_32k_time: u16,
    /// 64K block erase time in ms.
    pub block_erase_64k_time: u16,
    /// Page program time in ms.
    pub page_program_time: u16,
    /// Chip erase time in ms.
    pub chip_erase_time: u16,
    pub power_down_delay: u8,
    pub quad_enable_data: u8,
    pub crc32: u32,
}

impl FlashConfig {
    /// Parse a 92-byte flash config block.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;

        // Struct expressions evaluate their fields in source order.
        Ok(Self {
            magic,
            io_mode: r.read_u8()?,
            continuous_read_support: r.read_u8()?,
            clock_delay: r.read_u8()?,
            clock_invert: r.read_u8()?,
            reset_enable_cmd: r.read_u8()?,
            reset_cmd: r.read_u8()?,
            reset_continuous_read_cmd: r.read_u8()?,
            reset_continuous_read_cmd_size: r.read_u8()?,
            jedec_id_cmd: r.read_u8()?,
            jedec_id_cmd_dummy_clock: r.read_u8()?,
            qpi_jedec_id_cmd: r.read_u8()?,
            qpi_jedec_id_cmd_dummy_clock: r.read_u8()?,
            sector_size: r.read_u8()?,
            manufacturer_id: r.read_u8()?,
            page_size: r.read_u16::<LittleEndian>()?,
            chip_erase_cmd: r.read_u8()?,
            sector_erase_cmd: r.read_u8()?,
            block_erase_32k_cmd: r.read_u8()?,
            block_erase_64k_cmd: r.read_u8()?,
            write_enable_cmd: r.read_u8()?,
            page_program_cmd: r.read_u8()?,
            qio_page_program_cmd: r.read_u8()?,
            qio_page_program_address_mode: r.read_u8()?,
            fast_read_cmd: r.read_u8()?,
            fast_read_dummy_clock: r.read_u8()?,
            qpi_fast_read_cmd: r.read_u8()?,
            qpi_fast_read_dummy_clock: r.read_u8()?,
            fast_read_dual_output_cmd: r.read_u8()?,
            fast_read_dual_output_dummy_clock: r.read_u8()?,
            fast_read_dual_io_cmd: r.read_u8()?,
            fast_read_dual_io_dummy_clock: r.read_u8()?,
            fast_read_quad_output_cmd: r.read_u8()?,
            fast_read_quad_output_dummy_clock: r.read_u8()?,
            fast_read_quad_io_cmd: r.read_u8()?,
            fast_read_quad_io_dummy_clock: r.read_u8()?,
            qpi_fast_read_quad_io_cmd: r.read_u8()?,
            qpi_fast_read_quad_io_dummy_clock: r.read_u8()?,
            qpi_page_program_cmd: r.read_u8()?,
            volatile_reg_write_enable_cmd: r.read_u8()?,
            write_enable_reg_index: r.read_u8()?,
            quad_enable_reg_index: r.read_u8()?,
            busy_reg_index: r.read_u8()?,
            write_enable_bit: r.read_u8()?,
            quad_enable_bit: r.read_u8()?,
            busy_bit: r.read_u8()?,
            write_enable_write_reg_len: r.read_u8()?,
            write_enable_read_reg_len: r.read_u8()?,
            quad_enable_write_reg_len: r.read_u8()?,
            quad_enable_read_reg_len: r.read_u8()?,
            release_power_down_cmd: r.read_u8()?,
            busy_read_reg_len: r.read_u8()?,
            read_reg_cmd: read_array(r)?,
            write_reg_cmd: read_array(r)?,
            enter_qpi_cmd: r.read_u8()?,
            exit_qpi_cmd: r.read_u8()?,
            continuous_read_mode: r.read_u8()?,
            continuous_read_exit: r.read_u8()?,
            burst_wrap_cmd: r.read_u8()?,
            burst_wrap_cmd_dummy_clock: r.read_u8()?,
            burst_wrap_data_mode: r.read_u8()?,
            burst_wrap_data: r.read_u8()?,
            disable_burst_wrap_cmd: r.read_u8()?,
            disable_burst_wrap_cmd_dummy_clock: r.read_u8()?,
            disable_burst_wrap_data_mode: r.read_u8()?,
            disable_burst_wrap_data: r.read_u8()?,
            sector_erase_time: r.read_u16::<LittleEndian>()?,
            block_erase_32k_time: r.read_u16::<LittleEndian>()?,
            block_erase_64k_time: r.read_u16::<LittleEndian>()?,
            page_program_time: r.read_u16::<LittleEndian>()?,
            chip_erase_time: r.read_u16::<LittleEndian>()?,
            power_down_delay: r.read_u8()?,
            quad_enable_data: r.read_u8()?,
            crc32: r.read_u32::<LittleEndian>()?,
        })
    }

    /// Field names and hex-formatted values, in layout order.
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        let b = |v: u8| format!("0x{v:02x}");
        let h = |v: u16| format!("0x{v:04x}");
        let a = |v: [u8; 4]| hex(&v);
        vec![
            ("io_mode", b(self.io_mode)),
            ("continuous_read_support", b(self.continuous_read_support)),
            ("clock_delay", b(self.clock_delay)),
            ("clock_invert", b(self.clock_invert)),
            ("reset_enable_cmd", b(self.reset_enable_cmd)),
            ("reset_cmd", b(self.reset_cmd)),
            ("reset_continuous_read_cmd", b(self.reset_continuous_read_cmd)),
            ("reset_continuous_read_cmd_size", b(self.reset_continuous_read_cmd_size)),
            ("jedec_id_cmd", b(self.jedec_id_cmd)),
            ("jedec_id_cmd_dummy_clock", b(self.jedec_id_cmd_dummy_clock)),
            ("qpi_jedec_id_cmd", b(self.qpi_jedec_id_cmd)),
            ("qpi_jedec_id_cmd_dummy_clock", b(self.qpi_jedec_id_cmd_dummy_clock)),
            ("sector_size", b(self.sector_size)),
            ("manufacturer_id", b(self.manufacturer_id)),
            ("page_size", h(self.page_size)),
            ("chip_erase_cmd", b(self.chip_erase_cmd)),
            ("sector_erase_cmd", b(self.sector_erase_cmd)),
            ("block_erase_32k_cmd", b(self.block_erase_32k_cmd)),
            ("block_erase_64k_cmd", b(self.block_erase_64k_cmd)),
            ("write_enable_cmd", b(self.write_enable_cmd)),
            ("page_program_cmd", b(self.page_program_cmd)),
            ("qio_page_program_cmd", b(self.qio_page_program_cmd)),
            ("qio_page_program_address_mode", b(self.qio_page_program_address_mode)),
            ("fast_read_cmd", b(self.fast_read_cmd)),
            ("fast_read_dummy_clock", b(self.fast_read_dummy_clock)),
            ("qpi_fast_read_cmd", b(self.qpi_fast_read_cmd)),
            ("qpi_fast_read_dummy_clock", b(self.qpi_fast_read_dummy_clock)),
            ("fast_read_dual_output_cmd", b(self.fast_read_dual_output_cmd)),
            ("fast_read_dual_output_dummy_clock", b(self.fast_read_dual_output_dummy_clock)),
            ("fast_read_dual_io_cmd", b(self.fast_read_dual_io_cmd)),
            ("fast_read_dual_io_dummy_clock", b(self.fast_read_dual_io_dummy_clock)),
            ("fast_read_quad_output_cmd", b(self.fast_read_quad_output_cmd)),
            ("fast_read_quad_output_dummy_clock", b(self.fast_read_quad_output_dummy_clock)),
            ("fast_read_quad_io_cmd", b(self.fast_read_quad_io_cmd)),
            ("fast_read_quad_io_dummy_clock", b(self.fast_read_quad_io_dummy_clock)),
            ("qpi_fast_read_quad_io_cmd", b(self.qpi_fast_read_quad_io_cmd)),
            ("qpi_fast_read_quad_io_dummy_clock", b(self.qpi_fast_read_quad_io_dummy_clock)),
            ("qpi_page_program_cmd", b(self.qpi_page_program_cmd)),
            ("volatile_reg_write_enable_cmd", b(self.volatile_reg_write_enable_cmd)),
            ("write_enable_reg_index", b(self.write_enable_reg_index)),
            ("quad_enable_reg_index", b(self.quad_enable_reg_index)),
            ("busy_reg_index", b(self.busy_reg_index)),
            ("write_enable_bit", b(self.write_enable_bit)),
            ("quad_enable_bit", b(self.quad_enable_bit)),
            ("busy_bit", b(self.busy_bit)),
            ("write_enable_write_reg_len", b(self.write_enable_write_reg_len)),
            ("write_enable_read_reg_len", b(self.write_enable_read_reg_len)),
            ("quad_enable_write_reg_len", b(self.quad_enable_write_reg_len)),
            ("quad_enable_read_reg_len", b(self.quad_enable_read_reg_len)),
            ("release_power_down_cmd", b(self.release_power_down_cmd)),
            ("busy_read_reg_len", b(self.busy_read_reg_len)),
            ("read_reg_cmd", a(self.read_reg_cmd)),
            ("write_reg_cmd", a(self.write_reg_cmd)),
            ("enter_qpi_cmd", b(self.enter_qpi_cmd)),
            ("exit_qpi_cmd", b(self.exit_qpi_cmd)),
            ("continuous_read_mode", b(self.continuous_read_mode)),
            ("continuous_read_exit", b(self.continuous_read_exit)),
            ("burst_wrap_cmd", b(self.burst_wrap_cmd)),
            ("burst_wrap_cmd_dummy_clock", b(self.burst_wrap_cmd_dummy_clock)),
            ("burst_wrap_data_mode", b(self.burst_wrap_data_mode)),
            ("burst_wrap_data", b(self.burst_wrap_data)),
            ("disable_burst_wrap_cmd", b(self.disable_burst_wrap_cmd)),
            ("disable_burst_wrap_cmd_dummy_clock", b(self.disable_burst_wrap_cmd_dummy_clock)),
            ("disable_burst_wrap_data_mode", b(self.disable_burst_wrap_data_mode)),
            ("disable_burst_wrap_data", b(self.disable_burst_wrap_data)),
            ("sector_erase_time", h(self.sector_erase_time)),
            ("block_erase_32k_time", h(self.block_erase_32k_time)),
            ("block_erase_64k_time", h(self.block_erase_64k_time)),
            ("page_program_time", h(self.page_program_time)),
            ("chip_erase_time", h(self.chip_erase_time)),
            ("power_down_delay", b(self.power_down_delay)),
            ("quad_enable_data", b(self.quad_enable_data)),
        ]
    }
}

/// PLL and bus clock setup applied by the boot ROM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ClockConfig {
    /// Block magic, `PCFG` when valid.
    pub magic: [u8; 4],
    /// Crystal type.
    pub xtal_type: u8,
    /// PLL output clock selection.
    pub pll_clock: u8,
    /// HCLK divider.
    pub hclk_divider: u8,
    /// BCLK divider.
    pub bclk_divider: u8,
    /// Flash clock source.
    pub flash_clock_type: u8,
    /// Flash clock divider.
    pub flash_clock_divider: u8,
    /// Stored CRC32 of the 8-byte body.
    pub crc32: u32,
}

impl ClockConfig {
    /// Parse a 16-byte clock config block.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;

        let xtal_type = r.read_u8()?;
        let pll_clock = r.read_u8()?;
        let hclk_divider = r.read_u8()?;
        let bclk_divider = r.read_u8()?;
        let flash_clock_type = r.read_u8()?;
        let flash_clock_divider = r.read_u8()?;
        let _reserved = r.read_u16::<LittleEndian>()?;
        let crc32 = r.read_u32::<LittleEndian>()?;

        let config = Self {
            magic,
            xtal_type,
            pll_clock,
            hclk_divider,
            bclk_divider,
            flash_clock_type,
            flash_clock_divider,
            crc32,
        };
        Ok(config)
    }

    /// Field names and hex-formatted values, in layout order.
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        [
            ("xtal_type", self.xtal_type),
            ("pll_clock", self.pll_clock),
            ("hclk_divider", self.hclk_divider),
            ("bclk_divider", self.bclk_divider),
            ("flash_clock_type", self.flash_clock_type),
            ("flash_clock_divider", self.flash_clock_divider),
        ]
        .into_iter()
        .map(|(name, v)| (name, format!("0x{v:02x}")))
        .collect()
    }
}

/// Parsed 176-byte boot header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct BootHeader {
    /// Header magic, `BFNP` when valid.
    pub magic: [u8; 4],
    /// Header revision.
    pub revision: u32,
    /// Flash parameters.
    pub flash_config: FlashConfig,
    /// Clock parameters.
    pub clock_config: ClockConfig,
    /// Boot configuration flags.
    pub boot_config: u32,
    /// Image segment info.
    pub segment_info: u32,
    /// Entry point.
    pub entry_point: u32,
    /// Image RAM address or flash offset.
    pub image_start: u32,
    /// SHA-256 digest of the payload.
    pub hash: [u8; 32],
    /// Reserved words.
    pub reserved: [u32; 2],
    /// Stored CRC32 of bytes `[0, 172)`.
    pub crc32: u32,
}

impl BootHeader {
    /// Parse the header at the start of `image`.
    pub fn parse(image: &[u8]) -> Result<Self> {
        if image.len() < BOOT_HEADER_SIZE {
            return Err(Error::ImageTooShort {
                required: BOOT_HEADER_SIZE,
                actual: image.len(),
            });
        }

        let mut r = Cursor::new(&image[..BOOT_HEADER_SIZE]);
        let magic = read_array(&mut r)?;
        let revision = r.read_u32::<LittleEndian>()?;
        let flash_config = FlashConfig::read_from(&mut r)?;
        let clock_config = ClockConfig::read_from(&mut r)?;
        let boot_config = r.read_u32::<LittleEndian>()?;
        let segment_info = r.read_u32::<LittleEndian>()?;
        let entry_point = r.read_u32::<LittleEndian>()?;
        let image_start = r.read_u32::<LittleEndian>()?;
        let mut hash = [0u8; 32];
        r.read_exact(&mut hash)?;
        let reserved = [
            r.read_u32::<LittleEndian>()?,
            r.read_u32::<LittleEndian>()?,
        ];
        let crc32 = r.read_u32::<LittleEndian>()?;

        Ok(Self {
            magic,
            revision,
            flash_config,
            clock_config,
            boot_config,
            segment_info,
            entry_point,
            image_start,
            hash,
            reserved,
            crc32,
        })
    }
}

/// Outcome of checking one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize),
    serde(tag = "status", rename_all = "snake_case")
)]
pub enum BlockStatus {
    /// Magic and CRC both check out.
    Valid,
    /// The block does not start with its magic.
    BadMagic {
        /// Magic the block should start with.
        expected: [u8; 4],
        /// Magic found in the image.
        actual: [u8; 4],
    },
    /// The stored CRC does not match the block contents.
    BadCrc {
        /// CRC stored in the block.
        expected: u32,
        /// CRC computed over the block.
        actual: u32,
    },
}

/// Magic and CRC checks of one block, evaluated independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct BlockReport {
    /// `Valid` or `BadMagic`.
    pub magic: BlockStatus,
    /// `Valid` or `BadCrc`.
    pub crc: BlockStatus,
}

impl BlockReport {
    fn check(expected_magic: [u8; 4], magic: [u8; 4], stored_crc: u32, body: &[u8]) -> Self {
        let computed = crc32(body);
        Self {
            magic: if magic == expected_magic {
                BlockStatus::Valid
            } else {
                BlockStatus::BadMagic {
                    expected: expected_magic,
                    actual: magic,
                }
            },
            crc: if stored_crc == computed {
                BlockStatus::Valid
            } else {
                BlockStatus::BadCrc {
                    expected: stored_crc,
                    actual: computed,
                }
            },
        }
    }

    /// Overall status; a bad magic takes precedence over a bad CRC.
    pub fn status(&self) -> BlockStatus {
        match self.magic {
            BlockStatus::Valid => self.crc,
            bad => bad,
        }
    }

    /// Whether both checks passed.
    pub fn is_valid(&self) -> bool {
        self.status() == BlockStatus::Valid
    }
}

/// Payload digest check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize),
    serde(tag = "status", rename_all = "snake_case")
)]
pub enum HashStatus {
    /// SHA-256 of the payload matches the header.
    Ok,
    /// SHA-256 of the payload differs from the header.
    Mismatch {
        /// Digest stored in the header.
        expected: [u8; 32],
        /// Digest of the payload.
        actual: [u8; 32],
    },
}

/// Everything learned about an image with a complete header.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ImageReport {
    /// Parsed header fields.
    pub header: BootHeader,
    /// Boot header checks.
    pub boot_header: BlockReport,
    /// Flash config checks.
    pub flash_config: BlockReport,
    /// Clock config checks.
    pub clock_config: BlockReport,
    /// Payload digest check.
    pub hash: HashStatus,
    /// Payload length in bytes.
    pub payload_len: usize,
}

impl ImageReport {
    /// Whether every block and the digest check out.
    pub fn is_valid(&self) -> bool {
        self.boot_header.is_valid()
            && self.flash_config.is_valid()
            && self.clock_config.is_valid()
            && self.hash == HashStatus::Ok
    }
}

/// Result of [`validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize),
    serde(tag = "result", rename_all = "snake_case")
)]
pub enum ValidationReport {
    /// The image cannot hold a boot header.
    TooShort {
        /// Minimum length.
        required: usize,
        /// Actual length.
        actual: usize,
    },
    /// The header was parsed and checked.
    Checked(Box<ImageReport>),
}

impl ValidationReport {
    /// Whether the image is fully valid.
    pub fn is_valid(&self) -> bool {
        match self {
            Self::TooShort { .. } => false,
            Self::Checked(report) => report.is_valid(),
        }
    }

    /// The detailed report, if the header could be parsed.
    pub fn image(&self) -> Option<&ImageReport> {
        match self {
            Self::TooShort { .. } => None,
            Self::Checked(report) => Some(report),
        }
    }
}

impl fmt::Display for BlockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Valid => write!(f, "valid"),
            Self::BadMagic { expected, actual } => write!(
                f,
                "magic is wrong ({}), expected {}",
                actual.escape_ascii(),
                expected.escape_ascii()
            ),
            Self::BadCrc { expected, actual } => {
                write!(f, "crc32 is wrong: stored {expected:#010x}, computed {actual:#010x}")
            },
        }
    }
}

/// Check every block of `image` and the payload digest.
pub fn validate(image: &[u8]) -> ValidationReport {
    let header = match BootHeader::parse(image) {
        Ok(header) => header,
        Err(e) => {
            debug!("Cannot parse boot header: {e}");
            return ValidationReport::TooShort {
                required: BOOT_HEADER_SIZE,
                actual: image.len(),
            };
        },
    };

    let (raw, payload) = image.split_at(BOOT_HEADER_SIZE);
    let flash = &raw[FLASH_CONFIG_OFFSET..FLASH_CONFIG_OFFSET + FLASH_CONFIG_SIZE];
    let clock = &raw[CLOCK_CONFIG_OFFSET..CLOCK_CONFIG_OFFSET + CLOCK_CONFIG_SIZE];

    let boot_header = BlockReport::check(
        BOOT_HEADER_MAGIC,
        header.magic,
        header.crc32,
        &raw[..BOOT_HEADER_CRC_LEN],
    );
    let flash_config = BlockReport::check(
        FLASH_CONFIG_MAGIC,
        header.flash_config.magic,
        header.flash_config.crc32,
        &flash[4..FLASH_CONFIG_SIZE - 4],
    );
    let clock_config = BlockReport::check(
        CLOCK_CONFIG_MAGIC,
        header.clock_config.magic,
        header.clock_config.crc32,
        &clock[4..CLOCK_CONFIG_SIZE - 4],
    );

    let digest = sha256(payload);
    let hash = if digest == header.hash {
        HashStatus::Ok
    } else {
        HashStatus::Mismatch {
            expected: header.hash,
            actual: digest,
        }
    };

    ValidationReport::Checked(Box::new(ImageReport {
        header,
        boot_header,
        flash_config,
        clock_config,
        hash,
        payload_len: payload.len(),
    }))
}

/// Read `path` and validate it.
pub fn validate_file<P: AsRef<Path>>(path: P) -> Result<ValidationReport> {
    let image = std::fs::read(path.as_ref())?;
    debug!(
        "Validating {} ({} bytes)",
        path.as_ref().display(),
        image.len()
    );
    Ok(validate(&image))
}

/// SHA-256 digest of `data`.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut digest = [0u8; 32];
    digest.copy_from_slice(&Sha256::digest(data));
    digest
}

/// Lowercase hex without separators.
pub fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn read_array<R: Read>(r: &mut R) -> Result<[u8; 4]> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

/// Build a well-formed image around `payload`.
#[cfg(test)]
pub(crate) fn test_image(payload: &[u8]) -> Vec<u8> {
    let mut image = Vec::with_capacity(BOOT_HEADER_SIZE + payload.len());
    image.extend_from_slice(&BOOT_HEADER_MAGIC);
    image.extend_from_slice(&1u32.to_le_bytes());

    let flash_body: Vec<u8> = (0..84u8).collect();
    image.extend_from_slice(&FLASH_CONFIG_MAGIC);
    image.extend_from_slice(&flash_body);
    image.extend_from_slice(&crc32(&flash_body).to_le_bytes());

    let clock_body = [0x04, 0x04, 0x00, 0x01, 0x02, 0x01, 0x00, 0x00];
    image.extend_from_slice(&CLOCK_CONFIG_MAGIC);
    image.extend_from_slice(&clock_body);
    image.extend_from_slice(&crc32(&clock_body).to_le_bytes());

    image.extend_from_slice(&0x0000_0100u32.to_le_bytes());
    image.extend_from_slice(&0x0000_0001u32.to_le_bytes());
    image.extend_from_slice(&0x2200_0000u32.to_le_bytes());
    image.extend_from_slice(&0x0000_2000u32.to_le_bytes());
    image.extend_from_slice(&sha256(payload));
    image.extend_from_slice(&[0u8; 8]);
    let crc = crc32(&image);
    image.extend_from_slice(&crc.to_le_bytes());

    image.extend_from_slice(payload);
    image
}
