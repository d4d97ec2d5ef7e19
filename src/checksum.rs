//! Integrity checks used by the frame formats.
//!
//! Version 0 frames carry an XOR [`parity`] byte, version 1 frames a
//! CRC-CCITT ([`crc16`]) transmitted low byte first.

const CCITT_POLY: u16 = 0x1021;
const CCITT_POLY_REFLECTED: u16 = 0x8408;
const CRC_INIT: u16 = 0xFFFF;

/// CRC-CCITT, MSB first, initial value 0xFFFF, no final XOR.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = CRC_INIT;
    for &byte in data {
        crc ^= u16::from(byte) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ CCITT_POLY;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// CRC-CCITT computed LSB first with the reflected polynomial.
///
/// The result is complemented and byte swapped. An empty buffer yields 0.
pub fn crc16_reflected(data: &[u8]) -> u16 {
    if data.is_empty() {
        return !CRC_INIT;
    }
    let mut crc = CRC_INIT;
    for &byte in data {
        let mut bits = u16::from(byte);
        for _ in 0..8 {
            let lsb_set = (crc ^ bits) & 0x0001 != 0;
            crc >>= 1;
            if lsb_set {
                crc ^= CCITT_POLY_REFLECTED;
            }
            bits >>= 1;
        }
    }
    (!crc).swap_bytes()
}

/// XOR of all bytes.
pub fn parity(data: &[u8]) -> u8 {
    data.iter().fold(0, |acc, byte| acc ^ byte)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc16_check_value() {
        // CRC-16/CCITT-FALSE check value
        assert_eq!(crc16(b"123456789"), 0x29B1);
        assert_eq!(crc16(&[]), 0xFFFF);
    }

    #[test]
    fn test_crc16_reflected_check_value() {
        // CRC-16/X-25 check value is 0x906E, transmitted byte swapped
        assert_eq!(crc16_reflected(b"123456789"), 0x6E90);
        assert_eq!(crc16_reflected(&[]), 0);
    }

    #[test]
    fn test_parity() {
        assert_eq!(parity(&[]), 0);
        assert_eq!(parity(&[0x0f, 0xf0]), 0xff);
        assert_eq!(parity(&[0x55, 0x55, 0x01]), 0x01);
    }

    #[test]
    fn test_crc16_detects_bit_flips() {
        let data = *b"\x05\x09\x02\x09!\x00\x01";
        let good = crc16(&data);
        for byte in 0..data.len() {
            for bit in 0..8 {
                let mut flipped = data;
                flipped[byte] ^= 1 << bit;
                assert_ne!(crc16(&flipped), good);
            }
        }
    }
}
