//! Add-compare-select kernels.
//!
//! Each kernel consumes the branch metrics of one trellis step and produces
//! the new path metrics plus a 64 bit decision word. Bit n of the decision
//! word is set when the odd predecessor of state n strictly beat the even
//! predecessor; ties always select the even predecessor so every kernel
//! emits identical decisions.

use crate::NB_STATES;

/// The instruction set used for the add-compare-select inner loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderKernel {
    Scalar,
    Sse42,
    Avx2,
    Neon,
}

/// Selects the fastest kernel supported by the running machine.
pub fn get_detected_kernel() -> DecoderKernel {
    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    {
        if is_x86_feature_detected!("avx2") {
            return DecoderKernel::Avx2;
        }
        if is_x86_feature_detected!("sse4.2") {
            return DecoderKernel::Sse42;
        }
    }
    #[cfg(target_arch = "aarch64")]
    {
        return DecoderKernel::Neon;
    }
    #[allow(unreachable_code)]
    DecoderKernel::Scalar
}

/// Lists every kernel the running machine can execute.
pub fn get_supported_kernels() -> Vec<DecoderKernel> {
    let mut kernels = vec![DecoderKernel::Scalar];
    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    {
        if is_x86_feature_detected!("sse4.2") {
            kernels.push(DecoderKernel::Sse42);
        }
        if is_x86_feature_detected!("avx2") {
            kernels.push(DecoderKernel::Avx2);
        }
    }
    #[cfg(target_arch = "aarch64")]
    {
        kernels.push(DecoderKernel::Neon);
    }
    kernels
}

pub(crate) fn run_acs(
    kernel: DecoderKernel,
    old_metrics: &[u16; NB_STATES],
    new_metrics: &mut [u16; NB_STATES],
    branch_metrics: &[u16; NB_STATES / 2],
    max_error: u16,
) -> u64 {
    match kernel {
        DecoderKernel::Scalar => acs_scalar(old_metrics, new_metrics, branch_metrics, max_error),
        #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
        DecoderKernel::Sse42 => unsafe { acs_sse42(old_metrics, new_metrics, branch_metrics, max_error) },
        #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
        DecoderKernel::Avx2 => unsafe { acs_avx2(old_metrics, new_metrics, branch_metrics, max_error) },
        #[cfg(target_arch = "aarch64")]
        DecoderKernel::Neon => unsafe { acs_neon(old_metrics, new_metrics, branch_metrics, max_error) },
        #[allow(unreachable_patterns)]
        _ => acs_scalar(old_metrics, new_metrics, branch_metrics, max_error),
    }
}

/// Reference butterfly. State n has predecessors 2(n&31) and 2(n&31)+1 and the
/// branch metric of each non stored transition is the complement of the
/// stored even 0-input branch.
fn acs_scalar(
    old_metrics: &[u16; NB_STATES],
    new_metrics: &mut [u16; NB_STATES],
    branch_metrics: &[u16; NB_STATES / 2],
    max_error: u16,
) -> u64 {
    let mut decisions: u64 = 0;
    for j in 0..NB_STATES/2 {
        let metric = branch_metrics[j];
        let metric_c = max_error - metric;
        let metric_even = old_metrics[2*j];
        let metric_odd = old_metrics[2*j + 1];

        // Input bit 0 reaches state j
        let from_even = metric_even.saturating_add(metric);
        let from_odd = metric_odd.saturating_add(metric_c);
        if from_odd < from_even {
            new_metrics[j] = from_odd;
            decisions |= 1u64 << j;
        } else {
            new_metrics[j] = from_even;
        }

        // Input bit 1 reaches state j+32
        let from_even = metric_even.saturating_add(metric_c);
        let from_odd = metric_odd.saturating_add(metric);
        if from_odd < from_even {
            new_metrics[j + NB_STATES/2] = from_odd;
            decisions |= 1u64 << (j + NB_STATES/2);
        } else {
            new_metrics[j + NB_STATES/2] = from_even;
        }
    }
    decisions
}

#[cfg(target_arch = "x86")]
use std::arch::x86::*;
#[cfg(target_arch = "x86_64")]
use std::arch::x86_64::*;

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
#[target_feature(enable = "sse4.2")]
unsafe fn acs_sse42(
    old_metrics: &[u16; NB_STATES],
    new_metrics: &mut [u16; NB_STATES],
    branch_metrics: &[u16; NB_STATES / 2],
    max_error: u16,
) -> u64 {
    let max_error_v = _mm_set1_epi16(max_error as i16);
    let lane_mask = _mm_set1_epi32(0x0000FFFF);
    let mut decisions: u64 = 0;

    // 8 butterflies per iteration
    for i in 0..4 {
        let v0 = _mm_loadu_si128(old_metrics.as_ptr().add(16*i) as *const __m128i);
        let v1 = _mm_loadu_si128(old_metrics.as_ptr().add(16*i + 8) as *const __m128i);
        let even = _mm_packus_epi32(_mm_and_si128(v0, lane_mask), _mm_and_si128(v1, lane_mask));
        let odd = _mm_packus_epi32(_mm_srli_epi32(v0, 16), _mm_srli_epi32(v1, 16));

        let metric = _mm_loadu_si128(branch_metrics.as_ptr().add(8*i) as *const __m128i);
        let metric_c = _mm_subs_epu16(max_error_v, metric);

        let from_even_0 = _mm_adds_epu16(even, metric);
        let from_odd_0 = _mm_adds_epu16(odd, metric_c);
        let new_0 = _mm_min_epu16(from_even_0, from_odd_0);
        let even_won_0 = _mm_cmpeq_epi16(new_0, from_even_0);

        let from_even_1 = _mm_adds_epu16(even, metric_c);
        let from_odd_1 = _mm_adds_epu16(odd, metric);
        let new_1 = _mm_min_epu16(from_even_1, from_odd_1);
        let even_won_1 = _mm_cmpeq_epi16(new_1, from_even_1);

        _mm_storeu_si128(new_metrics.as_mut_ptr().add(8*i) as *mut __m128i, new_0);
        _mm_storeu_si128(new_metrics.as_mut_ptr().add(NB_STATES/2 + 8*i) as *mut __m128i, new_1);

        // Lanes 0..8 carry even_won_0 and lanes 8..16 carry even_won_1
        let packed = _mm_packs_epi16(even_won_0, even_won_1);
        let odd_won = !(_mm_movemask_epi8(packed) as u32) as u64;
        decisions |= (odd_won & 0xFF) << (8*i);
        decisions |= ((odd_won >> 8) & 0xFF) << (NB_STATES/2 + 8*i);
    }
    decisions
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
#[target_feature(enable = "avx2")]
unsafe fn acs_avx2(
    old_metrics: &[u16; NB_STATES],
    new_metrics: &mut [u16; NB_STATES],
    branch_metrics: &[u16; NB_STATES / 2],
    max_error: u16,
) -> u64 {
    let max_error_v = _mm256_set1_epi16(max_error as i16);
    let lane_mask = _mm256_set1_epi32(0x0000FFFF);
    let mut decisions: u64 = 0;

    // 16 butterflies per iteration. _mm256_packus_epi32 packs inside each
    // 128 bit lane so the quadwords are restored to butterfly order with a
    // cross lane permute.
    for i in 0..2 {
        let v0 = _mm256_loadu_si256(old_metrics.as_ptr().add(32*i) as *const __m256i);
        let v1 = _mm256_loadu_si256(old_metrics.as_ptr().add(32*i + 16) as *const __m256i);
        let even = _mm256_permute4x64_epi64(
            _mm256_packus_epi32(_mm256_and_si256(v0, lane_mask), _mm256_and_si256(v1, lane_mask)),
            0b11011000,
        );
        let odd = _mm256_permute4x64_epi64(
            _mm256_packus_epi32(_mm256_srli_epi32(v0, 16), _mm256_srli_epi32(v1, 16)),
            0b11011000,
        );

        let metric = _mm256_loadu_si256(branch_metrics.as_ptr().add(16*i) as *const __m256i);
        let metric_c = _mm256_subs_epu16(max_error_v, metric);

        let from_even_0 = _mm256_adds_epu16(even, metric);
        let from_odd_0 = _mm256_adds_epu16(odd, metric_c);
        let new_0 = _mm256_min_epu16(from_even_0, from_odd_0);
        let even_won_0 = _mm256_cmpeq_epi16(new_0, from_even_0);

        let from_even_1 = _mm256_adds_epu16(even, metric_c);
        let from_odd_1 = _mm256_adds_epu16(odd, metric);
        let new_1 = _mm256_min_epu16(from_even_1, from_odd_1);
        let even_won_1 = _mm256_cmpeq_epi16(new_1, from_even_1);

        _mm256_storeu_si256(new_metrics.as_mut_ptr().add(16*i) as *mut __m256i, new_0);
        _mm256_storeu_si256(new_metrics.as_mut_ptr().add(NB_STATES/2 + 16*i) as *mut __m256i, new_1);

        // _mm256_packs_epi16 interleaves the two sources per 128 bit lane:
        // byte lanes are [w0 0..8 | w1 0..8 | w0 8..16 | w1 8..16]
        let packed = _mm256_packs_epi16(even_won_0, even_won_1);
        let odd_won = !(_mm256_movemask_epi8(packed) as u32) as u64;
        let odd_won_0 = (odd_won & 0xFF) | (((odd_won >> 16) & 0xFF) << 8);
        let odd_won_1 = ((odd_won >> 8) & 0xFF) | (((odd_won >> 24) & 0xFF) << 8);
        decisions |= odd_won_0 << (16*i);
        decisions |= odd_won_1 << (NB_STATES/2 + 16*i);
    }
    decisions
}

#[cfg(target_arch = "aarch64")]
#[target_feature(enable = "neon")]
unsafe fn acs_neon(
    old_metrics: &[u16; NB_STATES],
    new_metrics: &mut [u16; NB_STATES],
    branch_metrics: &[u16; NB_STATES / 2],
    max_error: u16,
) -> u64 {
    use std::arch::aarch64::*;
    const BIT_WEIGHTS: [u16; 8] = [1, 2, 4, 8, 16, 32, 64, 128];
    let weights = vld1q_u16(BIT_WEIGHTS.as_ptr());
    let max_error_v = vdupq_n_u16(max_error);
    let mut decisions: u64 = 0;

    // 8 butterflies per iteration, vld2q deinterleaves even and odd states
    for i in 0..4 {
        let pair = vld2q_u16(old_metrics.as_ptr().add(16*i));
        let even = pair.0;
        let odd = pair.1;

        let metric = vld1q_u16(branch_metrics.as_ptr().add(8*i));
        let metric_c = vsubq_u16(max_error_v, metric);

        let from_even_0 = vqaddq_u16(even, metric);
        let from_odd_0 = vqaddq_u16(odd, metric_c);
        let new_0 = vminq_u16(from_even_0, from_odd_0);
        let odd_won_0 = vcltq_u16(from_odd_0, from_even_0);

        let from_even_1 = vqaddq_u16(even, metric_c);
        let from_odd_1 = vqaddq_u16(odd, metric);
        let new_1 = vminq_u16(from_even_1, from_odd_1);
        let odd_won_1 = vcltq_u16(from_odd_1, from_even_1);

        vst1q_u16(new_metrics.as_mut_ptr().add(8*i), new_0);
        vst1q_u16(new_metrics.as_mut_ptr().add(NB_STATES/2 + 8*i), new_1);

        let bits_0 = vaddvq_u16(vandq_u16(odd_won_0, weights)) as u64;
        let bits_1 = vaddvq_u16(vandq_u16(odd_won_1, weights)) as u64;
        decisions |= bits_0 << (8*i);
        decisions |= bits_1 << (NB_STATES/2 + 8*i);
    }
    decisions
}
