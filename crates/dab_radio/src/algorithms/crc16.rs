//! CRC-16 used across DAB: FIBs, access units, MSC data groups and dynamic
//! label segments all share the CCITT polynomial with inverted initial value
//! and inverted transmission.

use crc::{Crc, CRC_16_GENIBUS};

/// Polynomial 0x1021, init 0xFFFF, xorout 0xFFFF.
pub const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_GENIBUS);

pub fn calculate_crc16(buf: &[u8]) -> u16 {
    CRC16.checksum(buf)
}

/// Validates a block whose final two bytes carry the big endian CRC.
pub fn validate_block(buf: &[u8]) -> bool {
    if buf.len() < 2 {
        return false;
    }
    let (data, crc) = buf.split_at(buf.len() - 2);
    let received = u16::from_be_bytes([crc[0], crc[1]]);
    calculate_crc16(data) == received
}

/// Appends the big endian CRC to a block. Test and reference tooling only.
pub fn append_crc16(buf: &mut Vec<u8>) {
    let crc = calculate_crc16(buf);
    buf.extend_from_slice(&crc.to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_value_matches_genibus() {
        assert_eq!(calculate_crc16(b"123456789"), 0xD64E);
    }

    #[test]
    fn appended_blocks_validate_and_corruption_fails() {
        let mut block = b"ensemble metadata".to_vec();
        append_crc16(&mut block);
        assert!(validate_block(&block));
        let last = block.len() - 1;
        block[last] ^= 0x01;
        assert!(!validate_block(&block));
    }
}
