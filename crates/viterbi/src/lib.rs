//! Soft decision Viterbi decoder for the DAB mother code.
//!
//! The code is the rate 1/4, constraint length 7 convolutional code used by
//! every DAB channel. Polynomials are given in reversed binary form so that
//! the newest bit occupies the most significant tap.
//!
//! The decoder is split into a shared immutable branch table, a shared
//! decoder configuration and a per instance core holding path metrics and
//! decision history. The add-compare-select inner loop is dispatched at
//! runtime to the best kernel for the host (scalar, SSE4.2, AVX2 or NEON).
//! All kernels produce bit identical output.

pub mod convolutional_encoder;
pub mod viterbi_branch_table;
pub mod viterbi_decoder_config;
pub mod viterbi_decoder_core;
pub mod viterbi_kernels;

/// Constraint length of the DAB mother code.
pub const CONSTRAINT_LENGTH: usize = 7;
/// Number of coded bits produced for each input bit.
pub const CODE_RATE: usize = 4;
/// Number of trellis states.
pub const NB_STATES: usize = 1 << (CONSTRAINT_LENGTH - 1);
