//! Depuncturing front end over the shared Viterbi core.
//!
//! All DAB channels use the same mother code so the branch table and decoder
//! configuration are created once and shared by every decoder instance.

use std::sync::OnceLock;

use viterbi::convolutional_encoder::ConvolutionalEncoder;
use viterbi::viterbi_branch_table::ViterbiBranchTable;
use viterbi::viterbi_decoder_config::{
    get_viterbi_decoder_config, SOFT_DECISION_HIGH, SOFT_DECISION_LOW, SOFT_DECISION_PUNCTURED,
};
use viterbi::viterbi_decoder_core::ViterbiDecoderCore;
use viterbi::viterbi_kernels::{get_detected_kernel, DecoderKernel};

/// Generator polynomials of the DAB mother code in reversed binary form.
/// The octal ETSI values are {133, 171, 145, 133}.
pub const DAB_CODE_POLYNOMIALS: [u8; 4] = [109, 79, 83, 109];

/// Soft decision value of a transmitted 0 bit.
pub const SOFT_LOW: i8 = SOFT_DECISION_LOW as i8;
/// Soft decision value of a transmitted 1 bit.
pub const SOFT_HIGH: i8 = SOFT_DECISION_HIGH as i8;

fn get_shared_branch_table() -> &'static ViterbiBranchTable {
    static BRANCH_TABLE: OnceLock<ViterbiBranchTable> = OnceLock::new();
    BRANCH_TABLE.get_or_init(|| {
        ViterbiBranchTable::new(DAB_CODE_POLYNOMIALS, SOFT_DECISION_HIGH, SOFT_DECISION_LOW)
    })
}

pub struct DabViterbiDecoder {
    core: ViterbiDecoderCore,
    depunctured_symbols: Vec<i16>,
}

impl Default for DabViterbiDecoder {
    fn default() -> Self {
        Self::with_kernel(get_detected_kernel())
    }
}

impl DabViterbiDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_kernel(kernel: DecoderKernel) -> Self {
        Self {
            core: ViterbiDecoderCore::new(get_shared_branch_table(), get_viterbi_decoder_config(), kernel),
            depunctured_symbols: Vec::new(),
        }
    }

    pub fn get_kernel(&self) -> DecoderKernel {
        self.core.get_kernel()
    }

    pub fn reset(&mut self, starting_state: usize) {
        self.core.reset(starting_state);
    }

    /// Walks the requested number of output symbols, consuming one punctured
    /// input symbol whenever the cyclic puncture flag is set and inserting the
    /// neutral value otherwise, then runs the Viterbi update over the
    /// depunctured run. Returns the number of input symbols consumed.
    pub fn update(
        &mut self,
        punctured_symbols: &[i8],
        puncture_code: &[u8],
        requested_output_symbols: usize,
    ) -> usize {
        assert!(requested_output_symbols % 4 == 0, "Requested output symbols {} must be a multiple of the code rate", requested_output_symbols);

        let total_symbols = punctured_symbols.len();
        self.depunctured_symbols.resize(requested_output_symbols, 0);

        let mut index_punctured_symbol = 0;
        let mut index_puncture_code = 0;
        for output in self.depunctured_symbols.iter_mut() {
            let is_transmitted = puncture_code[index_puncture_code] != 0;
            if is_transmitted {
                // A bad puncture code or an oversized request would walk past
                // the input buffer. Bail out so one corrupted subchannel
                // descriptor cannot take down the pipeline.
                if index_punctured_symbol >= total_symbols {
                    log::error!("Puncture code requested more symbols than available ({}/{})", index_punctured_symbol, total_symbols);
                    return 0;
                }
                let symbol = punctured_symbols[index_punctured_symbol] as i16;
                *output = symbol.max(SOFT_DECISION_LOW);
                index_punctured_symbol += 1;
            } else {
                *output = SOFT_DECISION_PUNCTURED;
            }
            index_puncture_code = (index_puncture_code + 1) % puncture_code.len();
        }

        self.core.update(&self.depunctured_symbols);
        index_punctured_symbol
    }

    /// Emits hard bits MSB first into the output bytes. Returns the
    /// accumulated path error of the chained back path.
    pub fn chainback(&mut self, bytes_out: &mut [u8], end_state: usize) -> u64 {
        self.core.chainback(bytes_out, end_state)
    }
}

/// Punctures an encoded mother codeword for tests and reference tooling.
/// Each range applies its puncture vector cyclically over a run of mother
/// bits; kept bits are mapped onto soft decision values.
pub fn puncture_mother_bits(mother_bits: &[u8], puncture_code: &[u8], total_mother_bits: usize) -> Vec<i8> {
    let mut transmitted = Vec::new();
    for (index, bit) in mother_bits.iter().take(total_mother_bits).enumerate() {
        if puncture_code[index % puncture_code.len()] != 0 {
            transmitted.push(match bit {
                0 => SOFT_HIGH,
                _ => SOFT_LOW,
            });
        }
    }
    transmitted
}

/// Convolutionally encodes bytes with the DAB polynomials including the tail.
pub fn encode_mother_codeword(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = ConvolutionalEncoder::new(DAB_CODE_POLYNOMIALS);
    encoder.encode_bytes(bytes, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::puncture_codes::{get_puncture_code, PI_X};
    use viterbi::viterbi_kernels::get_supported_kernels;

    #[test]
    fn punctured_round_trip_recovers_payload() {
        // A 32 byte payload punctured to rate 8/18 with PI_10
        let payload: Vec<u8> = (0..32u8).map(|i| i.wrapping_mul(0x5B).wrapping_add(3)).collect();
        let mother_bits = encode_mother_codeword(&payload);
        let nb_payload_mother_bits = payload.len()*8*4;
        let nb_tail_mother_bits = 24;

        let puncture_code = get_puncture_code(10);
        let mut soft_bits = puncture_mother_bits(&mother_bits[..nb_payload_mother_bits], puncture_code, nb_payload_mother_bits);
        let tail_bits = puncture_mother_bits(&mother_bits[nb_payload_mother_bits..], &PI_X, nb_tail_mother_bits);
        let nb_body_bits = soft_bits.len();
        soft_bits.extend_from_slice(&tail_bits);

        for kernel in get_supported_kernels() {
            let mut decoder = DabViterbiDecoder::with_kernel(kernel);
            decoder.reset(0);
            let consumed = decoder.update(&soft_bits, puncture_code, nb_payload_mother_bits);
            assert_eq!(consumed, nb_body_bits);
            let consumed_tail = decoder.update(&soft_bits[nb_body_bits..], &PI_X, nb_tail_mother_bits);
            assert_eq!(consumed_tail, tail_bits.len());

            let mut decoded = vec![0u8; payload.len()];
            let error = decoder.chainback(&mut decoded, 0);
            assert_eq!(decoded, payload, "Payload diverged on {:?}", kernel);
            assert_eq!(error, 0);
        }
    }

    #[test]
    fn oversized_request_consumes_nothing() {
        let mut decoder = DabViterbiDecoder::new();
        decoder.reset(0);
        let soft_bits = [SOFT_HIGH; 16];
        let consumed = decoder.update(&soft_bits, get_puncture_code(24), 128);
        assert_eq!(consumed, 0);
    }
}
