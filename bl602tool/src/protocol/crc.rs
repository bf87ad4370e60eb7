//! Checksums used on the wire and in boot images.
//!
//! - Command frames carry an 8-bit additive checksum over the length field
//!   and payload.
//! - Boot header blocks carry a standard reflected CRC32 (the zlib one),
//!   computed over a block-specific byte window.

/// Reflected IEEE 802.3 polynomial.
const CRC32_POLY: u32 = 0xEDB8_8320;

/// 256-entry lookup table, built at compile time.
static CRC32_TABLE: [u32; 256] = build_crc32_table();

const fn build_crc32_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        #[allow(clippy::cast_possible_truncation)]
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ CRC32_POLY
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Calculate the CRC32 of `data`.
pub fn crc32(data: &[u8]) -> u32 {
    !data.iter().fold(0xFFFF_FFFF_u32, |crc, &byte| {
        (crc >> 8) ^ CRC32_TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize]
    })
}

/// Calculate the command frame checksum.
///
/// Sum of the two length bytes and every payload byte, modulo 256.
#[allow(clippy::cast_possible_truncation)]
pub fn frame_checksum(payload: &[u8]) -> u8 {
    let len = payload.len() as u16;
    let [lo, hi] = len.to_le_bytes();
    payload
        .iter()
        .fold(lo.wrapping_add(hi), |sum, &byte| sum.wrapping_add(byte))
}
