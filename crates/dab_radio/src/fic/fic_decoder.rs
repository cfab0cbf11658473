//! Fast information channel decoder.
//!
//! Each CIF has an associated group of FIBs transmitted as one tail biting
//! convolutional codeword at rate 1/3. The codeword is depunctured and
//! Viterbi decoded, energy dispersal is removed, and each 32 byte FIB is
//! validated against its CRC before its FIGs are parsed.

use log::{debug, warn};

use dab_core::dab_parameters::DabDecoderParameters;

use crate::algorithms::additive_scrambler::AdditiveScrambler;
use crate::algorithms::crc16::validate_block;
use crate::algorithms::dab_viterbi_decoder::DabViterbiDecoder;
use crate::algorithms::puncture_codes::{get_puncture_code, NB_PUNCTURE_BLOCK_BITS, PI_X};
use crate::fic::fig_handler::FigHandler;
use crate::fic::fig_processor::{FigProcessor, NB_FIB_PAYLOAD_BYTES};

/// Number of bytes in a FIB including its CRC.
pub const NB_FIB_BYTES: usize = 32;

#[derive(Debug, Default, Clone, Copy)]
pub struct FicDecoderStatistics {
    pub nb_fibs_total: usize,
    pub nb_fibs_valid: usize,
}

pub struct FicDecoder {
    params: DabDecoderParameters,
    vitdec: DabViterbiDecoder,
    scrambler: AdditiveScrambler,
    decoded_bytes: Vec<u8>,
    statistics: FicDecoderStatistics,
}

impl FicDecoder {
    pub fn new(params: DabDecoderParameters) -> Self {
        let nb_decoded_bytes = params.nb_bits_per_fib_group/3/8;
        Self {
            params,
            vitdec: DabViterbiDecoder::new(),
            scrambler: AdditiveScrambler::default(),
            decoded_bytes: vec![0u8; nb_decoded_bytes],
            statistics: FicDecoderStatistics::default(),
        }
    }

    pub fn get_statistics(&self) -> FicDecoderStatistics {
        self.statistics
    }

    /// Decodes the FIC slice of an entire transmission frame.
    pub fn decode_fic(&mut self, buf: &[i8], handler: &mut dyn FigHandler) {
        assert!(buf.len() == self.params.nb_bits_in_fic, "FIC slice must be {} soft bits but got {}", self.params.nb_bits_in_fic, buf.len());
        let nb_bits_per_fib_group = self.params.nb_bits_per_fib_group;
        for (cif_index, fib_group) in buf.chunks_exact(nb_bits_per_fib_group).enumerate() {
            self.decode_fib_group(fib_group, cif_index, handler);
        }
    }

    /// Decodes the tail biting codeword carrying one group of FIBs.
    pub fn decode_fib_group(&mut self, buf: &[i8], cif_index: usize, handler: &mut dyn FigHandler) {
        assert!(buf.len() == self.params.nb_bits_per_fib_group, "FIB group must be {} soft bits but got {}", self.params.nb_bits_per_fib_group, buf.len());

        let nb_decoded_bits = self.decoded_bytes.len()*8;
        let nb_mother_bits = (nb_decoded_bits + 6)*4;
        let nb_blocks = (nb_mother_bits - 24)/NB_PUNCTURE_BLOCK_BITS;
        // The last three blocks before the tail step down one puncture index
        let nb_strong_blocks = nb_blocks - 3;

        self.vitdec.reset(0);
        let mut curr_symbol = 0;
        curr_symbol += self.vitdec.update(
            &buf[curr_symbol..],
            get_puncture_code(16),
            nb_strong_blocks*NB_PUNCTURE_BLOCK_BITS,
        );
        curr_symbol += self.vitdec.update(
            &buf[curr_symbol..],
            get_puncture_code(15),
            3*NB_PUNCTURE_BLOCK_BITS,
        );
        curr_symbol += self.vitdec.update(&buf[curr_symbol..], &PI_X, 24);

        if curr_symbol != buf.len() {
            warn!("[{}] FIB group consumed {}/{} punctured symbols", cif_index, curr_symbol, buf.len());
            return;
        }

        let path_error = self.vitdec.chainback(&mut self.decoded_bytes, 0);
        debug!("[{}] FIB group path error {}", cif_index, path_error);

        self.scrambler.reset();
        self.scrambler.descramble(&mut self.decoded_bytes);

        for fib in self.decoded_bytes.chunks_exact(NB_FIB_BYTES) {
            self.statistics.nb_fibs_total += 1;
            if !validate_block(fib) {
                debug!("[{}] FIB dropped on CRC mismatch", cif_index);
                continue;
            }
            self.statistics.nb_fibs_valid += 1;
            FigProcessor::process_fib(&fib[..NB_FIB_PAYLOAD_BYTES], cif_index, handler);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::crc16::append_crc16;
    use crate::algorithms::dab_viterbi_decoder::{encode_mother_codeword, puncture_mother_bits};
    use crate::database::dab_database_updater::DabDatabaseUpdater;
    use dab_core::dab_parameters::get_dab_decoder_parameters;
    use dab_core::dab_transmission_modes::DabTransmissionMode;

    /// Builds a 32 byte FIB around the given FIGs.
    fn build_fib(figs: &[&[u8]]) -> Vec<u8> {
        let mut fib = Vec::new();
        for fig in figs {
            let (fig_type, data) = (fig[0], &fig[1..]);
            fib.push((fig_type << 5) | (data.len() as u8));
            fib.extend_from_slice(data);
        }
        fib.push(0xFF);
        fib.resize(NB_FIB_PAYLOAD_BYTES, 0x00);
        append_crc16(&mut fib);
        fib
    }

    /// Transmit side of one FIB group: scramble, encode, puncture.
    fn encode_fib_group(fib_bytes: &[u8]) -> Vec<i8> {
        let mut scrambled = fib_bytes.to_vec();
        let mut scrambler = AdditiveScrambler::default();
        scrambler.descramble(&mut scrambled);

        let mother_bits = encode_mother_codeword(&scrambled);
        let nb_strong_bits = 21*NB_PUNCTURE_BLOCK_BITS;
        let nb_weak_bits = 3*NB_PUNCTURE_BLOCK_BITS;

        let mut soft_bits = puncture_mother_bits(&mother_bits[..nb_strong_bits], get_puncture_code(16), nb_strong_bits);
        soft_bits.extend(puncture_mother_bits(&mother_bits[nb_strong_bits..nb_strong_bits + nb_weak_bits], get_puncture_code(15), nb_weak_bits));
        soft_bits.extend(puncture_mother_bits(&mother_bits[nb_strong_bits + nb_weak_bits..], &PI_X, 24));
        soft_bits
    }

    fn build_test_group() -> Vec<i8> {
        let fib_with_ensemble = build_fib(&[&[0, 0x00, 0xC0, 0x12, 0x05, 0x32]]);
        let mut label_fig = vec![1u8, 0x00, 0xC0, 0x12];
        label_fig.extend_from_slice(b"Test Ensemble   ");
        label_fig.extend_from_slice(&[0x00, 0x00]);
        let fib_with_label = build_fib(&[&label_fig]);
        let empty_fib = build_fib(&[]);

        let mut group_bytes = Vec::new();
        group_bytes.extend_from_slice(&fib_with_ensemble);
        group_bytes.extend_from_slice(&fib_with_label);
        group_bytes.extend_from_slice(&empty_fib);
        encode_fib_group(&group_bytes)
    }

    #[test]
    fn valid_fib_group_mutates_the_database() {
        let params = get_dab_decoder_parameters(DabTransmissionMode::I);
        let mut decoder = FicDecoder::new(params);
        let mut updater = DabDatabaseUpdater::new();

        let soft_bits = build_test_group();
        assert_eq!(soft_bits.len(), params.nb_bits_per_fib_group);
        decoder.decode_fib_group(&soft_bits, 0, &mut updater);

        assert_eq!(decoder.get_statistics().nb_fibs_total, 3);
        assert_eq!(decoder.get_statistics().nb_fibs_valid, 3);
        assert!(updater.take_dirty());

        let ensemble = &updater.get_database().ensemble;
        assert_eq!(ensemble.id.country_id, 0xC);
        assert_eq!(ensemble.id.ensemble_reference, 0x012);
        assert_eq!(ensemble.cif_upper, 5);
        assert_eq!(ensemble.cif_lower, 50);
        assert_eq!(ensemble.label, "Test Ensemble");
    }

    #[test]
    fn altered_fib_crc_produces_no_mutation() {
        let params = get_dab_decoder_parameters(DabTransmissionMode::I);
        let mut decoder = FicDecoder::new(params);
        let mut updater = DabDatabaseUpdater::new();

        // Alter the trailing CRC bytes of every FIB before transmission.
        // The channel is perfect so the parser sees exactly these bytes.
        let mut group_bytes = Vec::new();
        for fib_index in 0..3 {
            let mut fib = build_fib(&[&[0u8, 0x00, 0xC0, 0x12, 0x05, 0x32]]);
            fib[NB_FIB_BYTES - 1] ^= 0x01 << fib_index;
            group_bytes.extend_from_slice(&fib);
        }
        let soft_bits = encode_fib_group(&group_bytes);
        decoder.decode_fib_group(&soft_bits, 0, &mut updater);

        assert_eq!(decoder.get_statistics().nb_fibs_total, 3);
        assert_eq!(decoder.get_statistics().nb_fibs_valid, 0);
        assert!(!updater.take_dirty());
    }

    #[test]
    fn sparse_errors_are_corrected_by_the_channel_code() {
        let params = get_dab_decoder_parameters(DabTransmissionMode::I);
        let mut decoder = FicDecoder::new(params);
        let mut updater = DabDatabaseUpdater::new();

        let mut soft_bits = build_test_group();
        for index in (0..soft_bits.len()).step_by(53) {
            soft_bits[index] = -soft_bits[index];
        }
        decoder.decode_fib_group(&soft_bits, 0, &mut updater);
        assert_eq!(decoder.get_statistics().nb_fibs_valid, 3);
        assert_eq!(updater.get_database().ensemble.label, "Test Ensemble");
    }
}
