//! Per subchannel MSC decoder.
//!
//! For every CIF the decoder slices the subchannel allocation, time
//! deinterleaves the soft bits, depunctures and Viterbi decodes them with
//! the subchannel's protection profile, removes energy dispersal and
//! optionally runs the packet mode Reed-Solomon outer code.

use log::{debug, warn};
use thiserror::Error;

use dab_core::dab_parameters::DabDecoderParameters;

use crate::algorithms::additive_scrambler::AdditiveScrambler;
use crate::algorithms::dab_viterbi_decoder::DabViterbiDecoder;
use crate::algorithms::puncture_codes::{get_puncture_code, NB_PUNCTURE_BLOCK_BITS, PI_X};
use crate::algorithms::reed_solomon_decoder::{
    ReedSolomonDecoder, NB_PACKET_RS_CODEWORD_BYTES, NB_PACKET_RS_PARITY_BYTES,
};
use crate::constants::subchannel_protection_tables::{
    get_eep_schedule, get_uep_schedule, ProtectionProfileError, PunctureSchedule,
};
use crate::database::dab_database_entities::{Subchannel, SubchannelProtection};
use crate::msc::cif_deinterleaver::CifDeinterleaver;

#[derive(Debug, Error)]
pub enum MscDecoderError {
    #[error(transparent)]
    Protection(#[from] ProtectionProfileError),
    #[error("Subchannel allocation [{start}, {end}) exceeds the {capacity} capacity units of a CIF")]
    AllocationOutOfRange { start: usize, end: usize, capacity: usize },
    #[error("Protection profile transmits {transmitted} bits but the subchannel allocates {allocated}")]
    AllocationMismatch { transmitted: usize, allocated: usize },
}

pub struct MscDecoder {
    params: DabDecoderParameters,
    subchannel: Subchannel,
    schedule: PunctureSchedule,
    deinterleaver: CifDeinterleaver,
    vitdec: DabViterbiDecoder,
    scrambler: AdditiveScrambler,
    rs_decoder: Option<ReedSolomonDecoder>,
    deinterleaved_bits: Vec<i8>,
    decoded_bytes: Vec<u8>,
    is_rs_error: bool,
    last_path_error: u64,
}

impl MscDecoder {
    pub fn new(params: DabDecoderParameters, subchannel: Subchannel) -> Result<Self, MscDecoderError> {
        let schedule = match subchannel.protection {
            SubchannelProtection::Uep { table_index } => get_uep_schedule(table_index as usize)?,
            SubchannelProtection::Eep { option, protection_level } => {
                get_eep_schedule(option, protection_level, subchannel.length_cu as usize)?
            },
        };

        let start = subchannel.start_address as usize;
        let end = start + subchannel.length_cu as usize;
        if end > params.nb_cus_per_cif {
            return Err(MscDecoderError::AllocationOutOfRange { start, end, capacity: params.nb_cus_per_cif });
        }

        let nb_subchannel_bits = subchannel.length_cu as usize*params.nb_bits_per_cu;
        if schedule.nb_transmitted_bits() != nb_subchannel_bits {
            return Err(MscDecoderError::AllocationMismatch {
                transmitted: schedule.nb_transmitted_bits(),
                allocated: nb_subchannel_bits,
            });
        }

        let nb_decoded_bytes = schedule.nb_decoded_bytes();
        // Packet mode FEC scheme 1 wraps the stream into RS(204,188) codewords
        let rs_decoder = match subchannel.fec_scheme {
            1 => Some(ReedSolomonDecoder::new(NB_PACKET_RS_PARITY_BYTES)),
            _ => None,
        };

        Ok(Self {
            params,
            subchannel,
            schedule,
            deinterleaver: CifDeinterleaver::new(nb_subchannel_bits),
            vitdec: DabViterbiDecoder::new(),
            scrambler: AdditiveScrambler::default(),
            rs_decoder,
            deinterleaved_bits: vec![0i8; nb_subchannel_bits],
            decoded_bytes: vec![0u8; nb_decoded_bytes],
            is_rs_error: false,
            last_path_error: 0,
        })
    }

    pub fn get_bitrate_kbps(&self) -> u32 {
        self.schedule.bitrate_kbps
    }

    /// Decoded bytes produced for every CIF once the deinterleaver is primed.
    pub fn get_nb_decoded_bytes(&self) -> usize {
        self.decoded_bytes.len()
    }

    /// Soft flag from the most recent Reed-Solomon pass.
    pub fn get_is_rs_error(&self) -> bool {
        self.is_rs_error
    }

    /// Accumulated Viterbi path error of the most recent CIF.
    pub fn get_last_path_error(&self) -> u64 {
        self.last_path_error
    }

    /// True when the most recent path error suggests the channel is mostly
    /// noise rather than a decodable signal.
    pub fn get_is_path_error_spike(&self) -> bool {
        // A clean channel accumulates nearly zero error per trellis step;
        // an eighth of the worst case means reception has collapsed.
        use viterbi::viterbi_decoder_config::get_viterbi_decoder_config;
        let max_error_per_step = get_viterbi_decoder_config().soft_decision_max_error as u64;
        let nb_steps = (self.decoded_bytes.len()*8 + 6) as u64;
        self.last_path_error > nb_steps*max_error_per_step/8
    }

    /// Decodes the subchannel's slice of one CIF. Returns None while the
    /// deinterleaver delay line fills or when the codeword walk fails.
    pub fn decode_cif(&mut self, cif_buf: &[i8]) -> Option<&[u8]> {
        assert!(cif_buf.len() == self.params.nb_bits_per_cif, "CIF must be {} soft bits but got {}", self.params.nb_bits_per_cif, cif_buf.len());

        let start_bit = self.subchannel.start_address as usize*self.params.nb_bits_per_cu;
        let nb_subchannel_bits = self.deinterleaved_bits.len();
        let subchannel_slice = &cif_buf[start_bit..start_bit + nb_subchannel_bits];

        if !self.deinterleaver.consume(subchannel_slice, &mut self.deinterleaved_bits) {
            return None;
        }

        self.vitdec.reset(0);
        let mut curr_symbol = 0;
        for range in &self.schedule.ranges {
            curr_symbol += self.vitdec.update(
                &self.deinterleaved_bits[curr_symbol..],
                get_puncture_code(range.puncture_index),
                range.nb_blocks*NB_PUNCTURE_BLOCK_BITS,
            );
        }
        curr_symbol += self.vitdec.update(&self.deinterleaved_bits[curr_symbol..], &PI_X, 24);

        let nb_coded_bits = nb_subchannel_bits - self.schedule.nb_padding_bits;
        if curr_symbol != nb_coded_bits {
            warn!("subchannel {} consumed {}/{} punctured symbols", self.subchannel.id, curr_symbol, nb_coded_bits);
            return None;
        }

        let path_error = self.vitdec.chainback(&mut self.decoded_bytes, 0);
        debug!("subchannel {} path error {}", self.subchannel.id, path_error);
        self.last_path_error = path_error;

        self.scrambler.reset();
        self.scrambler.descramble(&mut self.decoded_bytes);

        self.is_rs_error = false;
        if let Some(rs_decoder) = &self.rs_decoder {
            // Uncorrectable codewords are still forwarded with the flag set
            for codeword in self.decoded_bytes.chunks_exact_mut(NB_PACKET_RS_CODEWORD_BYTES) {
                if rs_decoder.correct(codeword).is_err() {
                    self.is_rs_error = true;
                }
            }
        }

        Some(&self.decoded_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::dab_viterbi_decoder::{encode_mother_codeword, puncture_mother_bits};
    use crate::msc::cif_deinterleaver::{interleave_reference_frames, NB_DEINTERLEAVER_DEPTH};
    use dab_core::dab_parameters::get_dab_decoder_parameters;
    use dab_core::dab_transmission_modes::DabTransmissionMode;

    fn test_subchannel() -> Subchannel {
        // 8 kbit/s EEP 3-A subchannel at the start of the CIF
        Subchannel {
            id: 1,
            start_address: 0,
            length_cu: 6,
            protection: SubchannelProtection::Eep { option: 0, protection_level: 2 },
            fec_scheme: 0,
        }
    }

    /// Transmit side of one logical frame for the test subchannel.
    fn encode_logical_frame(payload: &[u8], schedule: &PunctureSchedule) -> Vec<i8> {
        let mut scrambled = payload.to_vec();
        let mut scrambler = AdditiveScrambler::default();
        scrambler.descramble(&mut scrambled);

        let mother_bits = encode_mother_codeword(&scrambled);
        let mut soft_bits = Vec::new();
        let mut curr_mother_bit = 0;
        for range in &schedule.ranges {
            let nb_range_bits = range.nb_blocks*NB_PUNCTURE_BLOCK_BITS;
            soft_bits.extend(puncture_mother_bits(
                &mother_bits[curr_mother_bit..curr_mother_bit + nb_range_bits],
                get_puncture_code(range.puncture_index),
                nb_range_bits,
            ));
            curr_mother_bit += nb_range_bits;
        }
        soft_bits.extend(puncture_mother_bits(&mother_bits[curr_mother_bit..], &PI_X, 24));
        for _ in 0..schedule.nb_padding_bits {
            soft_bits.push(0);
        }
        soft_bits
    }

    #[test]
    fn subchannel_round_trip_through_the_full_pipeline() {
        let params = get_dab_decoder_parameters(DabTransmissionMode::I);
        let subchannel = test_subchannel();
        let mut decoder = MscDecoder::new(params, subchannel).unwrap();
        assert_eq!(decoder.get_bitrate_kbps(), 8);
        assert_eq!(decoder.get_nb_decoded_bytes(), 24);

        // Generate distinct payloads and interleave their coded frames
        let nb_frames = 20;
        let payloads: Vec<Vec<u8>> = (0..nb_frames)
            .map(|frame| (0..24).map(|byte| ((frame*37 + byte*11) % 256) as u8).collect())
            .collect();
        let schedule = get_eep_schedule(0, 2, 6).unwrap();
        let coded_frames: Vec<Vec<i8>> = payloads
            .iter()
            .map(|payload| encode_logical_frame(payload, &schedule))
            .collect();

        let mut decoded_payloads = Vec::new();
        for cif_index in 0..nb_frames {
            let subchannel_bits = interleave_reference_frames(&coded_frames, cif_index);
            let mut cif = vec![0i8; params.nb_bits_per_cif];
            cif[..subchannel_bits.len()].copy_from_slice(&subchannel_bits);
            if let Some(decoded) = decoder.decode_cif(&cif) {
                decoded_payloads.push(decoded.to_vec());
            }
        }

        assert_eq!(decoded_payloads.len(), nb_frames - (NB_DEINTERLEAVER_DEPTH - 1));
        for (index, decoded) in decoded_payloads.iter().enumerate() {
            assert_eq!(decoded, &payloads[index], "Logical frame {} diverged", index);
        }
    }

    #[test]
    fn misplaced_allocation_is_a_configuration_error() {
        let params = get_dab_decoder_parameters(DabTransmissionMode::I);
        let subchannel = Subchannel {
            start_address: 863,
            ..test_subchannel()
        };
        assert!(matches!(
            MscDecoder::new(params, subchannel),
            Err(MscDecoderError::AllocationOutOfRange { .. }),
        ));
    }

    #[test]
    fn wrong_subchannel_size_is_a_configuration_error() {
        let params = get_dab_decoder_parameters(DabTransmissionMode::I);
        let subchannel = Subchannel {
            length_cu: 7,
            ..test_subchannel()
        };
        assert!(MscDecoder::new(params, subchannel).is_err());
    }
}
