//! CRC engines used by the two protocol families.
//!
//! Family A frames and the CRC-oracle dump path use CRC-16/XMODEM
//! (poly 0x1021, init 0, no reflection). Family B's real flash verifier
//! uses CRC-32 (ISO-HDLC, the everyday "zip" CRC-32).

use crc::{Crc, CRC_16_XMODEM, CRC_32_ISO_HDLC};
use std::sync::OnceLock;

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);
const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

pub fn crc16_xmodem(data: &[u8]) -> u16 {
    CRC16.checksum(data)
}

pub fn crc32_iso_hdlc(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}

/// Precomputed `byte -> crc16(byte)` table, used to invert the family-A
/// CRC-oracle dump: a single-byte CRC-16 query leaks exactly one byte of
/// flash because the map is a bijection on `0..=255`.
struct Crc16ByteOracle {
    forward: [u16; 256],
    inverse: std::collections::HashMap<u16, u8>,
}

impl Crc16ByteOracle {
    fn build() -> Self {
        let mut forward = [0u16; 256];
        let mut inverse = std::collections::HashMap::with_capacity(256);
        for byte in 0u16..256 {
            let crc = crc16_xmodem(&[byte as u8]);
            forward[byte as usize] = crc;
            let prev = inverse.insert(crc, byte as u8);
            assert!(
                prev.is_none(),
                "CRC-16/XMODEM over a single byte must be a bijection on 0..=255"
            );
        }
        Self { forward, inverse }
    }
}

static ORACLE: OnceLock<Crc16ByteOracle> = OnceLock::new();

fn oracle() -> &'static Crc16ByteOracle {
    ORACLE.get_or_init(Crc16ByteOracle::build)
}

/// `crc16_xmodem(&[byte])` for every byte value, precomputed once.
pub fn byte_crc_table() -> &'static [u16; 256] {
    &oracle().forward
}

/// Invert a single-byte CRC-16/XMODEM response back into the byte that
/// produced it. Panics (via the `OnceLock` build assertion) only if the
/// bijection property is ever violated, which would indicate a corrupted
/// CRC table rather than a bad device response.
pub fn invert_byte_crc(crc: u16) -> Option<u8> {
    oracle().inverse.get(&crc).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_oracle_is_bijective() {
        let table = byte_crc_table();
        let mut seen = std::collections::HashSet::new();
        for &crc in table.iter() {
            assert!(seen.insert(crc), "duplicate CRC-16 value across byte inputs");
        }
        assert_eq!(seen.len(), 256);
    }

    #[test]
    fn invert_round_trips() {
        for byte in 0u8..=255 {
            let crc = crc16_xmodem(&[byte]);
            assert_eq!(invert_byte_crc(crc), Some(byte));
        }
    }

    #[test]
    fn crc16_xmodem_known_vector() {
        // "123456789" -> 0x31C3 is the standard XMODEM check value.
        assert_eq!(crc16_xmodem(b"123456789"), 0x31C3);
    }
}
