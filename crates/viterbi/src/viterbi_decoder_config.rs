use crate::CODE_RATE;

/// Soft decision value representing a transmitted 0 bit.
pub const SOFT_DECISION_HIGH: i16 = 127;
/// Soft decision value representing a transmitted 1 bit.
pub const SOFT_DECISION_LOW: i16 = -127;
/// Neutral value inserted for symbols removed by the puncture code.
pub const SOFT_DECISION_PUNCTURED: i16 = 0;

/// Shared configuration for all decoder instances.
#[derive(Debug, Clone, Copy)]
pub struct ViterbiDecoderConfig {
    /// Largest branch metric a single trellis step can accumulate.
    pub soft_decision_max_error: u16,
    /// Initial path metric of the requested starting state.
    pub initial_start_error: u16,
    /// Initial path metric of every other state.
    pub initial_non_start_error: u16,
    /// Number of trellis steps between metric renormalisations.
    /// Renormalisation runs on a fixed cadence so that every kernel
    /// produces identical metrics.
    pub renormalisation_interval: usize,
}

/// Use the same configuration for all decoders.
pub fn get_viterbi_decoder_config() -> ViterbiDecoderConfig {
    let max_error = (SOFT_DECISION_HIGH - SOFT_DECISION_LOW) as u16 * CODE_RATE as u16;
    let error_margin = max_error * 5;
    let renormalisation_threshold = u16::MAX - error_margin;
    // The interval is sized so metrics stay below the threshold between renormalisations
    let renormalisation_interval = ((renormalisation_threshold - 2*error_margin) / max_error) as usize / 2;
    ViterbiDecoderConfig {
        soft_decision_max_error: max_error,
        initial_start_error: u16::MIN,
        initial_non_start_error: u16::MIN + error_margin,
        renormalisation_interval,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_is_derived_from_soft_decision_range() {
        let config = get_viterbi_decoder_config();
        assert_eq!(config.soft_decision_max_error, 1016);
        assert_eq!(config.initial_start_error, 0);
        assert_eq!(config.initial_non_start_error, 5080);
        assert!(config.renormalisation_interval > 0);
        // Metrics grow by at most max_error each step. The first window starts from
        // the non start error so it must also fit below the saturation threshold.
        let worst = config.initial_non_start_error as usize
            + config.renormalisation_interval * config.soft_decision_max_error as usize;
        assert!(worst < (u16::MAX - config.soft_decision_max_error) as usize);
    }
}
