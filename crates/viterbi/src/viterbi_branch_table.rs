use crate::{CODE_RATE, CONSTRAINT_LENGTH, NB_STATES};

/// Expected soft decision outputs for each trellis butterfly.
///
/// The trellis state holds the most recent K-1 input bits with the newest bit
/// at the most significant position. The two predecessors of a state are the
/// even and odd states sharing its lower bits. Every polynomial of the DAB
/// mother code taps both the newest and the oldest register bit, so the
/// expected outputs of the odd predecessor and of the 1-input branch are the
/// exact complements of the even 0-input branch. Only the even 0-input
/// branch is stored.
pub struct ViterbiBranchTable {
    /// Expected soft value for polynomial r on the branch leaving even state 2j with input 0.
    pub expected: [[i16; NB_STATES / 2]; CODE_RATE],
    pub polynomials: [u8; CODE_RATE],
}

impl ViterbiBranchTable {
    pub fn new(polynomials: [u8; CODE_RATE], soft_high: i16, soft_low: i16) -> Self {
        let mut expected = [[0i16; NB_STATES / 2]; CODE_RATE];
        for (r, polynomial) in polynomials.iter().enumerate() {
            assert!(*polynomial >> CONSTRAINT_LENGTH == 0, "Polynomial 0b{:b} exceeds the constraint length {}", polynomial, CONSTRAINT_LENGTH);
            assert!(polynomial & 1 == 1, "Polynomial 0b{:b} must tap the oldest register bit", polynomial);
            assert!(polynomial >> (CONSTRAINT_LENGTH-1) == 1, "Polynomial 0b{:b} must tap the newest register bit", polynomial);
            for j in 0..NB_STATES/2 {
                let register = (2*j) as u8;
                let output = (register & polynomial).count_ones() & 1;
                expected[r][j] = match output {
                    0 => soft_high,
                    _ => soft_low,
                };
            }
        }
        Self { expected, polynomials }
    }

    /// Computes the branch metrics for all butterflies of a single trellis step.
    /// Symbols must lie within [soft_low, soft_high] so that the complement
    /// identity |s-e| + |s+e| = 2*soft_high holds for every branch.
    pub fn calculate_branch_metrics(&self, symbols: &[i16], metrics_out: &mut [u16; NB_STATES / 2]) {
        assert!(symbols.len() == CODE_RATE);
        for (j, metric) in metrics_out.iter_mut().enumerate() {
            let mut total: u16 = 0;
            for r in 0..CODE_RATE {
                total += symbols[r].abs_diff(self.expected[r][j]);
            }
            *metric = total;
        }
    }
}
