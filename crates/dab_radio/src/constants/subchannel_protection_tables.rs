//! Subchannel protection profiles.
//!
//! A subchannel descriptor announces its error protection either as an index
//! into the unequal error protection (UEP) table or as a long form equal
//! error protection (EEP) profile. Both resolve to a puncturing schedule:
//! runs of 128 mother bit blocks with the puncture index to apply, plus the
//! 24 tail bits punctured with PI_X.

use crate::algorithms::puncture_codes::{get_nb_kept_bits, NB_PUNCTURE_BLOCK_BITS};
use thiserror::Error;

/// Number of transmitted bits contributed by the PI_X punctured tail.
pub const NB_TAIL_TRANSMITTED_BITS: usize = 12;
/// Number of mother bits in the punctured tail.
pub const NB_TAIL_MOTHER_BITS: usize = 24;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtectionProfileError {
    #[error("UEP table index {0} is outside the 64 entry table")]
    UnknownUepIndex(usize),
    #[error("EEP option {0} is not a defined profile set")]
    UnknownEepOption(u8),
    #[error("Subchannel size {size} CU is not a multiple of {divisor} for the requested EEP profile")]
    InvalidEepSize { size: usize, divisor: usize },
}

/// One run of puncturing blocks inside a codeword.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PunctureRange {
    pub nb_blocks: usize,
    pub puncture_index: usize,
}

/// Complete puncturing schedule of a subchannel codeword for one CIF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PunctureSchedule {
    pub ranges: Vec<PunctureRange>,
    pub bitrate_kbps: u32,
    /// Fill bits appended after the punctured tail to reach the capacity unit boundary.
    pub nb_padding_bits: usize,
}

impl PunctureSchedule {
    pub fn nb_blocks_total(&self) -> usize {
        self.ranges.iter().map(|range| range.nb_blocks).sum()
    }

    /// Decoded payload bytes per CIF, excluding the flushing tail bits.
    pub fn nb_decoded_bytes(&self) -> usize {
        self.nb_blocks_total()*NB_PUNCTURE_BLOCK_BITS/32
    }

    /// Transmitted bits per CIF including tail and padding.
    pub fn nb_transmitted_bits(&self) -> usize {
        let body: usize = self.ranges
            .iter()
            .map(|range| range.nb_blocks*4*get_nb_kept_bits(range.puncture_index))
            .sum();
        body + NB_TAIL_TRANSMITTED_BITS + self.nb_padding_bits
    }
}

/// One row of the unequal error protection table. Entries are ordered by
/// bitrate then descending protection level, which is the order the short
/// form subchannel descriptor indexes them in.
pub struct UepProfile {
    pub bitrate_kbps: u32,
    pub protection_level: u8,
    pub subchannel_size_cu: usize,
    pub nb_blocks: [usize; 4],
    /// Puncture index per range, zero when the range is absent.
    pub puncture_indices: [usize; 4],
    pub nb_padding_bits: usize,
}

#[rustfmt::skip]
pub static UEP_PROTECTION_TABLE: [UepProfile; 64] = [
    UepProfile { bitrate_kbps:  32, protection_level: 5, subchannel_size_cu:  16, nb_blocks: [ 3,  4,  17, 0], puncture_indices: [ 5,  3,  2,  0], nb_padding_bits: 0 },
    UepProfile { bitrate_kbps:  32, protection_level: 4, subchannel_size_cu:  21, nb_blocks: [ 3,  3,  18, 0], puncture_indices: [11,  6,  5,  0], nb_padding_bits: 0 },
    UepProfile { bitrate_kbps:  32, protection_level: 3, subchannel_size_cu:  24, nb_blocks: [ 3,  4,  14, 3], puncture_indices: [15,  9,  6,  8], nb_padding_bits: 0 },
    UepProfile { bitrate_kbps:  32, protection_level: 2, subchannel_size_cu:  29, nb_blocks: [ 3,  4,  14, 3], puncture_indices: [22, 13,  8, 13], nb_padding_bits: 0 },
    UepProfile { bitrate_kbps:  32, protection_level: 1, subchannel_size_cu:  35, nb_blocks: [ 3,  5,  13, 3], puncture_indices: [24, 17, 12, 17], nb_padding_bits: 4 },
    UepProfile { bitrate_kbps:  48, protection_level: 5, subchannel_size_cu:  24, nb_blocks: [ 4,  3,  26, 3], puncture_indices: [ 5,  4,  2,  3], nb_padding_bits: 0 },
    UepProfile { bitrate_kbps:  48, protection_level: 4, subchannel_size_cu:  29, nb_blocks: [ 3,  4,  26, 3], puncture_indices: [ 9,  6,  4,  6], nb_padding_bits: 0 },
    UepProfile { bitrate_kbps:  48, protection_level: 3, subchannel_size_cu:  35, nb_blocks: [ 3,  4,  26, 3], puncture_indices: [15, 10,  6,  9], nb_padding_bits: 4 },
    UepProfile { bitrate_kbps:  48, protection_level: 2, subchannel_size_cu:  42, nb_blocks: [ 3,  4,  26, 3], puncture_indices: [24, 14,  8, 15], nb_padding_bits: 0 },
    UepProfile { bitrate_kbps:  48, protection_level: 1, subchannel_size_cu:  52, nb_blocks: [ 3,  5,  25, 3], puncture_indices: [24, 18, 13, 18], nb_padding_bits: 0 },
    UepProfile { bitrate_kbps:  56, protection_level: 5, subchannel_size_cu:  29, nb_blocks: [ 6, 10,  23, 3], puncture_indices: [ 5,  4,  2,  3], nb_padding_bits: 0 },
    UepProfile { bitrate_kbps:  56, protection_level: 4, subchannel_size_cu:  35, nb_blocks: [ 6, 10,  23, 3], puncture_indices: [ 9,  6,  4,  5], nb_padding_bits: 0 },
    UepProfile { bitrate_kbps:  56, protection_level: 3, subchannel_size_cu:  42, nb_blocks: [ 6, 10,  23, 3], puncture_indices: [15,  8,  6,  8], nb_padding_bits: 4 },
    UepProfile { bitrate_kbps:  56, protection_level: 2, subchannel_size_cu:  52, nb_blocks: [ 6, 10,  23, 3], puncture_indices: [23, 13,  8, 13], nb_padding_bits: 8 },
    UepProfile { bitrate_kbps:  64, protection_level: 5, subchannel_size_cu:  32, nb_blocks: [ 6,  9,  31, 2], puncture_indices: [ 5,  3,  2,  3], nb_padding_bits: 0 },
    UepProfile { bitrate_kbps:  64, protection_level: 4, subchannel_size_cu:  42, nb_blocks: [ 6,  9,  33, 0], puncture_indices: [11,  6,  5,  0], nb_padding_bits: 0 },
    UepProfile { bitrate_kbps:  64, protection_level: 3, subchannel_size_cu:  48, nb_blocks: [ 6, 12,  27, 3], puncture_indices: [16,  8,  6,  9], nb_padding_bits: 0 },
    UepProfile { bitrate_kbps:  64, protection_level: 2, subchannel_size_cu:  58, nb_blocks: [ 6, 10,  29, 3], puncture_indices: [23, 13,  8, 13], nb_padding_bits: 8 },
    UepProfile { bitrate_kbps:  64, protection_level: 1, subchannel_size_cu:  70, nb_blocks: [ 6, 11,  28, 3], puncture_indices: [24, 18, 12, 18], nb_padding_bits: 4 },
    UepProfile { bitrate_kbps:  80, protection_level: 5, subchannel_size_cu:  40, nb_blocks: [ 6, 10,  41, 3], puncture_indices: [ 6,  3,  2,  3], nb_padding_bits: 0 },
    UepProfile { bitrate_kbps:  80, protection_level: 4, subchannel_size_cu:  52, nb_blocks: [ 6, 10,  41, 3], puncture_indices: [11,  6,  5,  6], nb_padding_bits: 0 },
    UepProfile { bitrate_kbps:  80, protection_level: 3, subchannel_size_cu:  58, nb_blocks: [ 6, 11,  40, 3], puncture_indices: [16,  8,  6,  7], nb_padding_bits: 0 },
    UepProfile { bitrate_kbps:  80, protection_level: 2, subchannel_size_cu:  70, nb_blocks: [ 6, 10,  41, 3], puncture_indices: [23, 13,  8, 13], nb_padding_bits: 8 },
    UepProfile { bitrate_kbps:  80, protection_level: 1, subchannel_size_cu:  84, nb_blocks: [ 6, 10,  41, 3], puncture_indices: [24, 17, 12, 18], nb_padding_bits: 4 },
    UepProfile { bitrate_kbps:  96, protection_level: 5, subchannel_size_cu:  48, nb_blocks: [ 7,  9,  53, 3], puncture_indices: [ 5,  4,  2,  4], nb_padding_bits: 0 },
    UepProfile { bitrate_kbps:  96, protection_level: 4, subchannel_size_cu:  58, nb_blocks: [ 7, 10,  52, 3], puncture_indices: [ 9,  6,  4,  6], nb_padding_bits: 0 },
    UepProfile { bitrate_kbps:  96, protection_level: 3, subchannel_size_cu:  70, nb_blocks: [ 6, 12,  51, 3], puncture_indices: [16,  9,  6, 10], nb_padding_bits: 4 },
    UepProfile { bitrate_kbps:  96, protection_level: 2, subchannel_size_cu:  84, nb_blocks: [ 6, 10,  53, 3], puncture_indices: [22, 12,  9, 12], nb_padding_bits: 0 },
    UepProfile { bitrate_kbps:  96, protection_level: 1, subchannel_size_cu: 104, nb_blocks: [ 6, 13,  50, 3], puncture_indices: [24, 18, 13, 19], nb_padding_bits: 0 },
    UepProfile { bitrate_kbps: 112, protection_level: 5, subchannel_size_cu:  58, nb_blocks: [14, 17,  50, 3], puncture_indices: [ 5,  4,  2,  5], nb_padding_bits: 0 },
    UepProfile { bitrate_kbps: 112, protection_level: 4, subchannel_size_cu:  70, nb_blocks: [11, 21,  49, 3], puncture_indices: [ 9,  6,  4,  8], nb_padding_bits: 0 },
    UepProfile { bitrate_kbps: 112, protection_level: 3, subchannel_size_cu:  84, nb_blocks: [11, 23,  47, 3], puncture_indices: [16,  8,  6,  9], nb_padding_bits: 0 },
    UepProfile { bitrate_kbps: 112, protection_level: 2, subchannel_size_cu: 104, nb_blocks: [11, 21,  49, 3], puncture_indices: [23, 12,  9, 14], nb_padding_bits: 4 },
    UepProfile { bitrate_kbps: 128, protection_level: 5, subchannel_size_cu:  64, nb_blocks: [12, 19,  62, 3], puncture_indices: [ 5,  3,  2,  4], nb_padding_bits: 0 },
    UepProfile { bitrate_kbps: 128, protection_level: 4, subchannel_size_cu:  84, nb_blocks: [11, 21,  61, 3], puncture_indices: [11,  6,  5,  7], nb_padding_bits: 0 },
    UepProfile { bitrate_kbps: 128, protection_level: 3, subchannel_size_cu:  96, nb_blocks: [11, 22,  60, 3], puncture_indices: [16,  9,  6, 10], nb_padding_bits: 4 },
    UepProfile { bitrate_kbps: 128, protection_level: 2, subchannel_size_cu: 116, nb_blocks: [11, 21,  61, 3], puncture_indices: [22, 12,  9, 14], nb_padding_bits: 0 },
    UepProfile { bitrate_kbps: 128, protection_level: 1, subchannel_size_cu: 140, nb_blocks: [11, 20,  62, 3], puncture_indices: [24, 17, 13, 19], nb_padding_bits: 8 },
    UepProfile { bitrate_kbps: 160, protection_level: 5, subchannel_size_cu:  80, nb_blocks: [11, 19,  87, 3], puncture_indices: [ 5,  4,  2,  4], nb_padding_bits: 0 },
    UepProfile { bitrate_kbps: 160, protection_level: 4, subchannel_size_cu: 104, nb_blocks: [11, 23,  83, 3], puncture_indices: [11,  6,  5,  9], nb_padding_bits: 0 },
    UepProfile { bitrate_kbps: 160, protection_level: 3, subchannel_size_cu: 116, nb_blocks: [11, 24,  82, 3], puncture_indices: [16,  8,  6, 11], nb_padding_bits: 0 },
    UepProfile { bitrate_kbps: 160, protection_level: 2, subchannel_size_cu: 140, nb_blocks: [11, 21,  85, 3], puncture_indices: [22, 11,  9, 13], nb_padding_bits: 0 },
    UepProfile { bitrate_kbps: 160, protection_level: 1, subchannel_size_cu: 168, nb_blocks: [11, 22,  84, 3], puncture_indices: [24, 18, 12, 19], nb_padding_bits: 0 },
    UepProfile { bitrate_kbps: 192, protection_level: 5, subchannel_size_cu:  96, nb_blocks: [11, 20, 110, 3], puncture_indices: [ 6,  4,  2,  5], nb_padding_bits: 0 },
    UepProfile { bitrate_kbps: 192, protection_level: 4, subchannel_size_cu: 116, nb_blocks: [11, 22, 108, 3], puncture_indices: [10,  6,  4,  9], nb_padding_bits: 0 },
    UepProfile { bitrate_kbps: 192, protection_level: 3, subchannel_size_cu: 140, nb_blocks: [11, 24, 106, 3], puncture_indices: [16, 10,  6, 11], nb_padding_bits: 0 },
    UepProfile { bitrate_kbps: 192, protection_level: 2, subchannel_size_cu: 168, nb_blocks: [11, 20, 110, 3], puncture_indices: [22, 13,  9, 13], nb_padding_bits: 8 },
    UepProfile { bitrate_kbps: 192, protection_level: 1, subchannel_size_cu: 204, nb_blocks: [11, 20, 110, 3], puncture_indices: [24, 24, 12, 15], nb_padding_bits: 0 },
    UepProfile { bitrate_kbps: 224, protection_level: 5, subchannel_size_cu: 116, nb_blocks: [12, 26, 127, 3], puncture_indices: [ 8,  6,  2,  1], nb_padding_bits: 0 },
    UepProfile { bitrate_kbps: 224, protection_level: 4, subchannel_size_cu: 140, nb_blocks: [11, 24, 130, 3], puncture_indices: [ 9,  5,  5,  8], nb_padding_bits: 0 },
    UepProfile { bitrate_kbps: 224, protection_level: 3, subchannel_size_cu: 168, nb_blocks: [11, 24, 130, 3], puncture_indices: [16, 10,  7,  5], nb_padding_bits: 0 },
    UepProfile { bitrate_kbps: 224, protection_level: 2, subchannel_size_cu: 204, nb_blocks: [11, 24, 130, 3], puncture_indices: [24, 20,  9,  1], nb_padding_bits: 0 },
    UepProfile { bitrate_kbps: 224, protection_level: 1, subchannel_size_cu: 232, nb_blocks: [11, 26, 128, 3], puncture_indices: [24, 16, 13,  7], nb_padding_bits: 0 },
    UepProfile { bitrate_kbps: 256, protection_level: 5, subchannel_size_cu: 128, nb_blocks: [11, 24, 154, 3], puncture_indices: [ 6,  5,  2,  5], nb_padding_bits: 0 },
    UepProfile { bitrate_kbps: 256, protection_level: 4, subchannel_size_cu: 168, nb_blocks: [11, 24, 154, 3], puncture_indices: [12,  9,  5, 10], nb_padding_bits: 4 },
    UepProfile { bitrate_kbps: 256, protection_level: 3, subchannel_size_cu: 204, nb_blocks: [14, 24, 151, 3], puncture_indices: [16, 18,  7,  4], nb_padding_bits: 0 },
    UepProfile { bitrate_kbps: 256, protection_level: 2, subchannel_size_cu: 232, nb_blocks: [11, 22, 156, 3], puncture_indices: [24, 22,  9,  7], nb_padding_bits: 0 },
    UepProfile { bitrate_kbps: 256, protection_level: 1, subchannel_size_cu: 280, nb_blocks: [13, 24, 152, 3], puncture_indices: [24, 20, 14,  7], nb_padding_bits: 0 },
    UepProfile { bitrate_kbps: 320, protection_level: 5, subchannel_size_cu: 160, nb_blocks: [11, 26, 200, 3], puncture_indices: [ 8,  5,  2,  6], nb_padding_bits: 4 },
    UepProfile { bitrate_kbps: 320, protection_level: 4, subchannel_size_cu: 204, nb_blocks: [11, 25, 201, 3], puncture_indices: [13,  7,  5,  6], nb_padding_bits: 0 },
    UepProfile { bitrate_kbps: 320, protection_level: 2, subchannel_size_cu: 280, nb_blocks: [11, 26, 200, 3], puncture_indices: [24, 24,  8, 23], nb_padding_bits: 0 },
    UepProfile { bitrate_kbps: 384, protection_level: 5, subchannel_size_cu: 192, nb_blocks: [11, 27, 247, 3], puncture_indices: [ 8,  6,  2,  7], nb_padding_bits: 0 },
    UepProfile { bitrate_kbps: 384, protection_level: 3, subchannel_size_cu: 280, nb_blocks: [11, 26, 248, 3], puncture_indices: [16,  9,  7,  9], nb_padding_bits: 0 },
    UepProfile { bitrate_kbps: 384, protection_level: 1, subchannel_size_cu: 416, nb_blocks: [12, 28, 245, 3], puncture_indices: [24, 22, 14,  5], nb_padding_bits: 0 },
];

pub fn get_uep_profile(table_index: usize) -> Result<&'static UepProfile, ProtectionProfileError> {
    UEP_PROTECTION_TABLE
        .get(table_index)
        .ok_or(ProtectionProfileError::UnknownUepIndex(table_index))
}

pub fn get_uep_schedule(table_index: usize) -> Result<PunctureSchedule, ProtectionProfileError> {
    let profile = get_uep_profile(table_index)?;
    let ranges = profile
        .nb_blocks
        .iter()
        .zip(profile.puncture_indices.iter())
        .filter(|(nb_blocks, _)| **nb_blocks > 0)
        .map(|(nb_blocks, puncture_index)| PunctureRange {
            nb_blocks: *nb_blocks,
            puncture_index: *puncture_index,
        })
        .collect();
    Ok(PunctureSchedule {
        ranges,
        bitrate_kbps: profile.bitrate_kbps,
        nb_padding_bits: profile.nb_padding_bits,
    })
}

/// Derives an equal error protection schedule from the long form descriptor.
/// Option 0 is profile set A with subchannel sizes of {12,8,6,4}n capacity
/// units, option 1 is profile set B with {27,21,18,15}n. The protection
/// level field is zero based.
pub fn get_eep_schedule(option: u8, protection_level: u8, subchannel_size_cu: usize) -> Result<PunctureSchedule, ProtectionProfileError> {
    let level = (protection_level & 0b11) as usize;
    match option {
        0b000 => {
            const DIVISORS: [usize; 4] = [12, 8, 6, 4];
            let divisor = DIVISORS[level];
            if subchannel_size_cu % divisor != 0 || subchannel_size_cu == 0 {
                return Err(ProtectionProfileError::InvalidEepSize { size: subchannel_size_cu, divisor });
            }
            let n = subchannel_size_cu/divisor;
            let ranges = match level {
                0 => vec![
                    PunctureRange { nb_blocks: 6*n - 3, puncture_index: 24 },
                    PunctureRange { nb_blocks: 3, puncture_index: 23 },
                ],
                1 => {
                    if n == 1 {
                        vec![
                            PunctureRange { nb_blocks: 5, puncture_index: 13 },
                            PunctureRange { nb_blocks: 1, puncture_index: 12 },
                        ]
                    } else {
                        vec![
                            PunctureRange { nb_blocks: 2*n - 3, puncture_index: 14 },
                            PunctureRange { nb_blocks: 4*n + 3, puncture_index: 13 },
                        ]
                    }
                },
                2 => vec![
                    PunctureRange { nb_blocks: 6*n - 3, puncture_index: 8 },
                    PunctureRange { nb_blocks: 3, puncture_index: 7 },
                ],
                _ => vec![
                    PunctureRange { nb_blocks: 4*n - 3, puncture_index: 3 },
                    PunctureRange { nb_blocks: 2*n + 3, puncture_index: 2 },
                ],
            };
            Ok(PunctureSchedule {
                ranges,
                bitrate_kbps: (8*n) as u32,
                nb_padding_bits: 0,
            })
        },
        0b001 => {
            const DIVISORS: [usize; 4] = [27, 21, 18, 15];
            const PUNCTURE_PAIRS: [(usize, usize); 4] = [(10, 9), (6, 5), (4, 3), (2, 1)];
            let divisor = DIVISORS[level];
            if subchannel_size_cu % divisor != 0 || subchannel_size_cu == 0 {
                return Err(ProtectionProfileError::InvalidEepSize { size: subchannel_size_cu, divisor });
            }
            let n = subchannel_size_cu/divisor;
            let (first, second) = PUNCTURE_PAIRS[level];
            Ok(PunctureSchedule {
                ranges: vec![
                    PunctureRange { nb_blocks: 24*n - 3, puncture_index: first },
                    PunctureRange { nb_blocks: 3, puncture_index: second },
                ],
                bitrate_kbps: (32*n) as u32,
                nb_padding_bits: 0,
            })
        },
        option => Err(ProtectionProfileError::UnknownEepOption(option)),
    }
}
