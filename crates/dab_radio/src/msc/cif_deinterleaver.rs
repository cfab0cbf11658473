//! Time deinterleaver.
//!
//! The transmitter delays bit i of a logical frame by a number of CIFs given
//! by the bit reversed value of i mod 16. The receiver holds the last 16
//! CIF slices of the subchannel and applies the complementary delay. The
//! delay line must fill before output is meaningful, so the first 15 CIFs
//! produce nothing.

/// Depth of the convolutional interleaver in CIFs.
pub const NB_DEINTERLEAVER_DEPTH: usize = 16;

/// Transmit side delay of bit i as a function of i mod 16.
pub const DELAY_SEQUENCE: [usize; NB_DEINTERLEAVER_DEPTH] = [
    0, 8, 4, 12, 2, 10, 6, 14, 1, 9, 5, 13, 3, 11, 7, 15,
];

pub struct CifDeinterleaver {
    /// Delay line of the most recent CIF slices, flattened.
    delay_line: Vec<i8>,
    nb_bits: usize,
    write_slot: usize,
    total_frames: usize,
}

impl CifDeinterleaver {
    pub fn new(nb_bits: usize) -> Self {
        Self {
            delay_line: vec![0i8; nb_bits*NB_DEINTERLEAVER_DEPTH],
            nb_bits,
            write_slot: 0,
            total_frames: 0,
        }
    }

    pub fn reset(&mut self) {
        self.delay_line.fill(0);
        self.write_slot = 0;
        self.total_frames = 0;
    }

    /// True once the delay line is primed and output frames are valid.
    pub fn is_primed(&self) -> bool {
        self.total_frames >= NB_DEINTERLEAVER_DEPTH
    }

    /// Consumes one CIF slice. Returns true and fills the output with a
    /// deinterleaved logical frame once the delay line is primed.
    pub fn consume(&mut self, input: &[i8], output: &mut [i8]) -> bool {
        assert!(input.len() == self.nb_bits, "CIF slice must be {} bits but got {}", self.nb_bits, input.len());
        assert!(output.len() == self.nb_bits, "Output frame must be {} bits but got {}", self.nb_bits, output.len());

        let write_offset = self.write_slot*self.nb_bits;
        self.delay_line[write_offset..write_offset + self.nb_bits].copy_from_slice(input);
        self.total_frames += 1;

        let is_output_valid = self.is_primed();
        if is_output_valid {
            for (bit_index, out_bit) in output.iter_mut().enumerate() {
                // Bit i of the emitted logical frame was transmitted
                // 15 - delay(i) CIFs ago.
                let age = (NB_DEINTERLEAVER_DEPTH - 1) - DELAY_SEQUENCE[bit_index % NB_DEINTERLEAVER_DEPTH];
                let slot = (self.write_slot + NB_DEINTERLEAVER_DEPTH - age) % NB_DEINTERLEAVER_DEPTH;
                *out_bit = self.delay_line[slot*self.nb_bits + bit_index];
            }
        }

        self.write_slot = (self.write_slot + 1) % NB_DEINTERLEAVER_DEPTH;
        is_output_valid
    }
}

/// Transmit side interleaver used by tests to generate reference CIFs.
pub fn interleave_reference_frames(frames: &[Vec<i8>], cif_index: usize) -> Vec<i8> {
    let nb_bits = frames[0].len();
    (0..nb_bits)
        .map(|bit_index| {
            let delay = DELAY_SEQUENCE[bit_index % NB_DEINTERLEAVER_DEPTH];
            match cif_index.checked_sub(delay) {
                Some(frame_index) if frame_index < frames.len() => frames[frame_index][bit_index],
                _ => 0,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_frames(nb_frames: usize, nb_bits: usize) -> Vec<Vec<i8>> {
        (0..nb_frames)
            .map(|frame| {
                (0..nb_bits)
                    .map(|bit| ((frame*31 + bit*7) % 255) as i8)
                    .collect()
            })
            .collect()
    }

    #[test]
    fn output_invalid_until_the_delay_line_is_primed() {
        let nb_bits = 64;
        let frames = build_frames(20, nb_bits);
        let mut deinterleaver = CifDeinterleaver::new(nb_bits);
        let mut output = vec![0i8; nb_bits];

        for cif_index in 0..NB_DEINTERLEAVER_DEPTH - 1 {
            let cif = interleave_reference_frames(&frames, cif_index);
            assert!(!deinterleaver.consume(&cif, &mut output), "CIF {} should be part of priming", cif_index);
        }
    }

    #[test]
    fn primed_deinterleaver_reconstructs_logical_frames() {
        let nb_bits = 128;
        let frames = build_frames(24, nb_bits);
        let mut deinterleaver = CifDeinterleaver::new(nb_bits);
        let mut output = vec![0i8; nb_bits];

        let mut recovered = Vec::new();
        for cif_index in 0..24 {
            let cif = interleave_reference_frames(&frames, cif_index);
            if deinterleaver.consume(&cif, &mut output) {
                recovered.push(output.clone());
            }
        }

        // CIF t emits logical frame t-15
        assert_eq!(recovered.len(), 24 - (NB_DEINTERLEAVER_DEPTH - 1));
        for (index, frame) in recovered.iter().enumerate() {
            assert_eq!(frame, &frames[index], "Logical frame {} diverged", index);
        }
    }

    #[test]
    fn reset_forces_a_new_priming_cycle() {
        let nb_bits = 32;
        let frames = build_frames(20, nb_bits);
        let mut deinterleaver = CifDeinterleaver::new(nb_bits);
        let mut output = vec![0i8; nb_bits];

        for cif_index in 0..NB_DEINTERLEAVER_DEPTH {
            let cif = interleave_reference_frames(&frames, cif_index);
            deinterleaver.consume(&cif, &mut output);
        }
        assert!(deinterleaver.is_primed());
        deinterleaver.reset();
        assert!(!deinterleaver.is_primed());
    }
}
