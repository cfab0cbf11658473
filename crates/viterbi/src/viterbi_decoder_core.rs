use crate::viterbi_branch_table::ViterbiBranchTable;
use crate::viterbi_decoder_config::ViterbiDecoderConfig;
use crate::viterbi_kernels::{run_acs, DecoderKernel};
use crate::{CODE_RATE, NB_STATES};

/// Path metric state machine with full decision history.
///
/// The branch table and configuration are shared immutable state so any
/// number of decoder instances can be created cheaply. A decode is performed
/// as reset, one or more updates over depunctured symbols, then a single
/// chainback over the recorded decisions.
pub struct ViterbiDecoderCore {
    config: ViterbiDecoderConfig,
    branch_table: &'static ViterbiBranchTable,
    kernel: DecoderKernel,
    metrics: [u16; NB_STATES],
    metrics_next: [u16; NB_STATES],
    decisions: Vec<u64>,
    /// Total metric removed by renormalisation since the last reset.
    renormalisation_offset: u64,
    steps_since_renormalisation: usize,
}

impl ViterbiDecoderCore {
    pub fn new(branch_table: &'static ViterbiBranchTable, config: ViterbiDecoderConfig, kernel: DecoderKernel) -> Self {
        Self {
            config,
            branch_table,
            kernel,
            metrics: [0u16; NB_STATES],
            metrics_next: [0u16; NB_STATES],
            decisions: Vec::new(),
            renormalisation_offset: 0,
            steps_since_renormalisation: 0,
        }
    }

    pub fn get_kernel(&self) -> DecoderKernel {
        self.kernel
    }

    /// Clears the path metrics and decision history. Only the starting state
    /// begins with a zero metric so decodes are biased to paths leaving it.
    pub fn reset(&mut self, starting_state: usize) {
        assert!(starting_state < NB_STATES);
        self.metrics = [self.config.initial_non_start_error; NB_STATES];
        self.metrics[starting_state] = self.config.initial_start_error;
        self.decisions.clear();
        self.renormalisation_offset = 0;
        self.steps_since_renormalisation = 0;
    }

    /// Runs the add-compare-select update over depunctured soft symbols.
    /// The symbol count must be a multiple of the code rate.
    pub fn update(&mut self, depunctured_symbols: &[i16]) {
        assert!(depunctured_symbols.len() % CODE_RATE == 0, "Symbols {} must be a multiple of the code rate {}", depunctured_symbols.len(), CODE_RATE);

        let mut branch_metrics = [0u16; NB_STATES/2];
        for step_symbols in depunctured_symbols.chunks_exact(CODE_RATE) {
            self.branch_table.calculate_branch_metrics(step_symbols, &mut branch_metrics);
            let decisions = run_acs(
                self.kernel,
                &self.metrics,
                &mut self.metrics_next,
                &branch_metrics,
                self.config.soft_decision_max_error,
            );
            std::mem::swap(&mut self.metrics, &mut self.metrics_next);
            self.decisions.push(decisions);

            self.steps_since_renormalisation += 1;
            if self.steps_since_renormalisation >= self.config.renormalisation_interval {
                self.renormalise();
            }
        }
    }

    /// Emits hard bits MSB first into the output bytes by walking the
    /// decision history backwards from the end state. Trailing trellis steps
    /// beyond the requested bit count are traversed but not emitted, which
    /// discards flushing tail bits. Returns the accumulated path error.
    pub fn chainback(&self, bytes_out: &mut [u8], end_state: usize) -> u64 {
        assert!(end_state < NB_STATES);
        let total_steps = self.decisions.len();
        let total_bits = bytes_out.len()*8;
        assert!(total_bits <= total_steps, "Requested {} bits from a history of {} trellis steps", total_bits, total_steps);

        bytes_out.fill(0);
        let mut state = end_state;
        for step in (0..total_steps).rev() {
            // The newest input bit sits at the most significant state bit
            let bit = (state >> 5) & 1;
            if step < total_bits {
                bytes_out[step/8] |= (bit as u8) << (7 - (step % 8));
            }
            let decision = (self.decisions[step] >> state) & 1;
            state = ((state & (NB_STATES/2 - 1)) << 1) | decision as usize;
        }

        self.get_error(end_state)
    }

    /// Accumulated path error of a state including renormalisation losses.
    pub fn get_error(&self, state: usize) -> u64 {
        self.renormalisation_offset + self.metrics[state] as u64
    }

    fn renormalise(&mut self) {
        let minimum = *self.metrics.iter().min().expect("Path metrics cannot be empty");
        for metric in self.metrics.iter_mut() {
            *metric -= minimum;
        }
        self.renormalisation_offset += minimum as u64;
        self.steps_since_renormalisation = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convolutional_encoder::ConvolutionalEncoder;
    use crate::viterbi_decoder_config::{get_viterbi_decoder_config, SOFT_DECISION_HIGH, SOFT_DECISION_LOW};
    use crate::viterbi_kernels::get_supported_kernels;
    use std::sync::OnceLock;

    const POLYNOMIALS: [u8; 4] = [109, 79, 83, 109];

    fn get_branch_table() -> &'static ViterbiBranchTable {
        static TABLE: OnceLock<ViterbiBranchTable> = OnceLock::new();
        TABLE.get_or_init(|| ViterbiBranchTable::new(POLYNOMIALS, SOFT_DECISION_HIGH, SOFT_DECISION_LOW))
    }

    fn generate_payload_bits(total_bits: usize) -> Vec<u8> {
        let mut seed = 0x12345678u32;
        (0..total_bits)
            .map(|_| {
                seed = seed.wrapping_mul(1664525).wrapping_add(1013904223);
                ((seed >> 24) & 1) as u8
            })
            .collect()
    }

    fn encode_to_soft_bits(payload_bits: &[u8]) -> Vec<i16> {
        let mut encoder = ConvolutionalEncoder::new(POLYNOMIALS);
        let mut soft_bits = Vec::new();
        for &bit in payload_bits {
            for coded in encoder.encode_bit(bit) {
                soft_bits.push(match coded {
                    0 => SOFT_DECISION_HIGH,
                    _ => SOFT_DECISION_LOW,
                });
            }
        }
        soft_bits
    }

    fn decode(soft_bits: &[i16], total_bytes: usize, kernel: DecoderKernel) -> (Vec<u8>, u64) {
        let mut decoder = ViterbiDecoderCore::new(get_branch_table(), get_viterbi_decoder_config(), kernel);
        decoder.reset(0);
        decoder.update(soft_bits);
        let mut bytes_out = vec![0u8; total_bytes];
        let error = decoder.chainback(&mut bytes_out, 0);
        (bytes_out, error)
    }

    #[test]
    fn round_trip_is_perfect_on_every_kernel() {
        let total_bytes = 25; // 200 payload bits
        let mut payload_bits = generate_payload_bits(total_bytes*8);
        // Flush the encoder back to state 0 with tail bits
        payload_bits.extend_from_slice(&[0u8; 6]);
        let soft_bits = encode_to_soft_bits(&payload_bits);

        let mut expected_bytes = vec![0u8; total_bytes];
        for (i, bit) in payload_bits[..total_bytes*8].iter().enumerate() {
            expected_bytes[i/8] |= bit << (7 - (i % 8));
        }

        for kernel in get_supported_kernels() {
            let (decoded, error) = decode(&soft_bits, total_bytes, kernel);
            assert_eq!(decoded, expected_bytes, "Decoded payload diverged on {:?}", kernel);
            assert_eq!(error, 0, "Perfect reception must have zero path error on {:?}", kernel);
        }
    }

    #[test]
    fn corrupted_symbols_are_corrected_with_nonzero_error() {
        let total_bytes = 32;
        let mut payload_bits = generate_payload_bits(total_bytes*8);
        payload_bits.extend_from_slice(&[0u8; 6]);
        let mut soft_bits = encode_to_soft_bits(&payload_bits);

        // Flip a sparse set of coded symbols
        for index in (0..soft_bits.len()).step_by(97) {
            soft_bits[index] = -soft_bits[index];
        }

        let (reference, _) = decode(&encode_to_soft_bits(&payload_bits), total_bytes, DecoderKernel::Scalar);
        for kernel in get_supported_kernels() {
            let (decoded, error) = decode(&soft_bits, total_bytes, kernel);
            assert_eq!(decoded, reference, "Corrected payload diverged on {:?}", kernel);
            assert!(error > 0, "Corrupted symbols must accumulate path error");
        }
    }

    #[test]
    fn long_decodes_survive_renormalisation() {
        // Enough trellis steps to force many renormalisations when symbols mismatch everywhere
        let total_bytes = 512;
        let mut payload_bits = generate_payload_bits(total_bytes*8);
        payload_bits.extend_from_slice(&[0u8; 6]);
        let soft_bits = encode_to_soft_bits(&payload_bits);

        let mut noisy = soft_bits.clone();
        for (i, symbol) in noisy.iter_mut().enumerate() {
            // Attenuated symbols accumulate metric on every branch
            *symbol = match i % 2 {
                0 => *symbol / 2,
                _ => *symbol / 3,
            };
        }

        for kernel in get_supported_kernels() {
            let (decoded, _) = decode(&noisy, total_bytes, kernel);
            let (reference, _) = decode(&soft_bits, total_bytes, kernel);
            assert_eq!(decoded, reference, "Attenuation must not change the decoded path on {:?}", kernel);
        }
    }
}
