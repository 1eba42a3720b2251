//! # X.25 Checksum Implementation
//!
//! CRC-16/MCRF4XX as used by MAVLink frame validation.
//!
//! **Polynomial**: 0x1021 reflected (0x8408)
//! **Initial Value**: 0xFFFF
//!
//! MAVLink appends a per-message CRC_EXTRA byte to the checksummed data so
//! that sender and receiver disagree when their message definitions differ.

/// Accumulate one byte into a running X.25 checksum
pub fn crc16_mcrf4xx_step(crc: u16, byte: u8) -> u16 {
    let mut tmp = byte ^ (crc & 0xFF) as u8;
    tmp ^= tmp << 4;
    (crc >> 8) ^ ((tmp as u16) << 8) ^ ((tmp as u16) << 3) ^ ((tmp as u16) >> 4)
}

/// Accumulate a byte slice into a running X.25 checksum
///
/// # Arguments
///
/// * `crc` - Running checksum (start from 0xFFFF)
/// * `data` - Bytes to accumulate
pub fn crc16_mcrf4xx_accumulate(crc: u16, data: &[u8]) -> u16 {
    data.iter().fold(crc, |crc, &byte| crc16_mcrf4xx_step(crc, byte))
}

/// Calculate the X.25 checksum of a byte slice
///
/// # Examples
///
/// ```
/// use field_bridge::mav::crc::crc16_mcrf4xx;
///
/// let crc = crc16_mcrf4xx(b"123456789");
/// assert_eq!(crc, 0x6F91);
/// ```
pub fn crc16_mcrf4xx(data: &[u8]) -> u16 {
    crc16_mcrf4xx_accumulate(0xFFFF, data)
}
