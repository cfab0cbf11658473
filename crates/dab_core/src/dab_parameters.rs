use crate::dab_transmission_modes::DabTransmissionMode;

/// Refer to the struct DabDecoderParameters for an explanation of what these constants mean.
/// This contains all the information required for digital decoding of a demodulated frame.
pub struct DabParameters {
    /// Number of OFDM data symbols in a transmission frame after differential demodulation.
    pub nb_symbols: usize,
    /// Number of FFT bins that are data carriers centered around DC.
    pub nb_fft_data_carriers: usize,
    /// Number of symbols for the fast information channel (FIC). This carries metadata about the ensemble.
    pub nb_fic_symbols: usize,
    /// Number of symbols for the main service channel (MSC). This carries radio data for each channel in the ensemble.
    pub nb_msc_symbols: usize,
    /// Number of fast information blocks (FIB) in the FIC
    pub nb_fibs_in_fic: usize,
    /// Number of common interleaved frames (CIF) in the MSC.
    pub nb_cifs_in_msc: usize,
}

/// These constants are defined for the output of a 2.048MHz demodulator.
pub fn get_dab_parameters(transmission_mode: DabTransmissionMode) -> DabParameters {
    let params = match transmission_mode {
        DabTransmissionMode::I => DabParameters {
            nb_symbols: 75,
            nb_fft_data_carriers: 1536,
            nb_fic_symbols: 3,
            nb_msc_symbols: 72,
            nb_fibs_in_fic: 12,
            nb_cifs_in_msc: 4,
        },
        DabTransmissionMode::II => DabParameters {
            nb_symbols: 75,
            nb_fft_data_carriers: 384,
            nb_fic_symbols: 3,
            nb_msc_symbols: 72,
            nb_fibs_in_fic: 3,
            nb_cifs_in_msc: 1,
        },
        DabTransmissionMode::III => DabParameters {
            nb_symbols: 152,
            nb_fft_data_carriers: 192,
            nb_fic_symbols: 8,
            nb_msc_symbols: 144,
            nb_fibs_in_fic: 4,
            nb_cifs_in_msc: 1,
        },
        DabTransmissionMode::IV => DabParameters {
            nb_symbols: 75,
            nb_fft_data_carriers: 768,
            nb_fic_symbols: 3,
            nb_msc_symbols: 72,
            nb_fibs_in_fic: 6,
            nb_cifs_in_msc: 2,
        },
    };

    assert!(params.nb_symbols == (params.nb_fic_symbols + params.nb_msc_symbols), "Number of data symbols doesn't match number of FIC and MSC symbols");
    assert!(params.nb_fibs_in_fic % params.nb_cifs_in_msc == 0, "The number of FIBs in the FIC must be a multiple of the number of CIFs in the MSC.");

    params
}

/// Parameters describing the decoder side of a digital audio broadcast (DAB) ensemble
///
/// # Common acronyms
/// | Acronym | Phrase | Description |
/// | ------- | ------ | ----------- |
/// | FIC | Fast Information Channel | Carries metadata about the ensemble's structure including channel descriptions. |
/// | MSC | Main Service Channel | Carries radio data for the ensemble. This includes audio data for each channel and slideshows. |
/// | CIF | Common Interleaved Frame | The main service channel is transmitted as a series of interleaved frames that need to be deinterleaved. |
/// | FIB | Fast Information Block | The fast information channel is transmitted as groups of consecutive blocks. |
/// | CU  | Capacity Unit | Subchannels are allocated inside a CIF in units of 64 bits. |
///
/// # Diagram of DAB frame
/// This is the frame of a mode I transmission.
/// ```text
/// | Frame              |
/// | SYM*75             |
/// | SYM*3     | SYM*72 |
/// | FIC       | MSC    |
/// | [FIB*3]*4 | CIF*4  |
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct DabDecoderParameters {
    /// Number of symbols for each frame.
    pub nb_symbols: usize,
    /// Number of symbols for the fast information channel (FIC). This carries metadata about the ensemble.
    pub nb_fic_symbols: usize,
    /// Number of symbols for the main service channel (MSC). This carries radio data for each channel in the ensemble.
    pub nb_msc_symbols: usize,
    /// Number of fast information blocks (FIB) in the FIC
    pub nb_fibs_in_fic: usize,
    /// Number of common interleaved frames (CIF) in the MSC.
    pub nb_cifs_in_msc: usize,
    /// Number of bits per symbol
    pub nb_bits_per_symbol: usize,
    /// Number of bits in each frame.
    pub nb_bits_per_frame: usize,
    /// Number of bits in FIC.
    pub nb_bits_in_fic: usize,
    /// Number of bits in MSC.
    pub nb_bits_in_msc: usize,
    /// Number of bits per FIB
    pub nb_bits_per_fib: usize,
    /// Number of bits in the convolutionally encoded group of FIBs associated with one CIF.
    pub nb_bits_per_fib_group: usize,
    /// Number of FIBs inside one encoded FIB group.
    pub nb_fibs_per_fib_group: usize,
    /// Number of bits per CIF
    pub nb_bits_per_cif: usize,
    /// Number of bits inside one capacity unit (CU). Subchannels are addressed in CUs.
    pub nb_bits_per_cu: usize,
    /// Number of capacity units inside one CIF.
    pub nb_cus_per_cif: usize,
}

/// Returns useful parameters used in DAB digital decoding for a given transmission mode
pub fn get_dab_decoder_parameters(transmission_mode: DabTransmissionMode) -> DabDecoderParameters {
    let params = get_dab_parameters(transmission_mode);

    let bits_per_carrier = 2;
    let nb_bits_per_cu = 64;
    let nb_symbols = params.nb_symbols;
    let nb_fic_symbols = params.nb_fic_symbols;
    let nb_msc_symbols = params.nb_msc_symbols;
    let nb_fibs_in_fic = params.nb_fibs_in_fic;
    let nb_cifs_in_msc = params.nb_cifs_in_msc;
    let nb_bits_per_symbol = params.nb_fft_data_carriers*bits_per_carrier;
    let nb_bits_per_frame = nb_bits_per_symbol*nb_symbols;
    let nb_bits_in_fic = nb_fic_symbols*nb_bits_per_symbol;
    let nb_bits_in_msc = nb_msc_symbols*nb_bits_per_symbol;
    let nb_bits_per_fib = 256;
    let nb_bits_per_fib_group = nb_bits_in_fic/nb_cifs_in_msc;
    let nb_fibs_per_fib_group = nb_fibs_in_fic/nb_cifs_in_msc;
    let nb_bits_per_cif = nb_bits_in_msc/nb_cifs_in_msc;
    let nb_cus_per_cif = nb_bits_per_cif/nb_bits_per_cu;

    assert!(nb_symbols == (nb_fic_symbols + nb_msc_symbols), "Number of data symbols in frame doesn't match number of FIC and MSC symbols");
    assert!(nb_fibs_in_fic % nb_cifs_in_msc == 0, "The number of FIBs in the FIC must be a multiple of the number of CIFs in the MSC.");
    assert!(nb_bits_per_cif % nb_bits_per_cu == 0, "A CIF must contain a whole number of capacity units");
    assert!(nb_bits_per_fib_group == nb_fibs_per_fib_group*nb_bits_per_fib*3, "An encoded FIB group must be three times the size of its decoded FIBs");

    DabDecoderParameters {
        nb_symbols,
        nb_fic_symbols,
        nb_msc_symbols,
        nb_fibs_in_fic,
        nb_cifs_in_msc,
        nb_bits_per_symbol,
        nb_bits_per_frame,
        nb_bits_in_fic,
        nb_bits_in_msc,
        nb_bits_per_fib,
        nb_bits_per_fib_group,
        nb_fibs_per_fib_group,
        nb_bits_per_cif,
        nb_bits_per_cu,
        nb_cus_per_cif,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_1_decoder_parameters() {
        let params = get_dab_decoder_parameters(DabTransmissionMode::I);
        assert_eq!(params.nb_bits_per_symbol, 3072);
        assert_eq!(params.nb_bits_in_fic, 9216);
        assert_eq!(params.nb_bits_in_msc, 221184);
        assert_eq!(params.nb_bits_per_fib_group, 2304);
        assert_eq!(params.nb_fibs_per_fib_group, 3);
        assert_eq!(params.nb_bits_per_cif, 55296);
        assert_eq!(params.nb_cus_per_cif, 864);
    }

    #[test]
    fn all_modes_are_consistent() {
        for mode in [
            DabTransmissionMode::I,
            DabTransmissionMode::II,
            DabTransmissionMode::III,
            DabTransmissionMode::IV,
        ] {
            let params = get_dab_decoder_parameters(mode);
            assert_eq!(params.nb_bits_per_frame, params.nb_bits_in_fic + params.nb_bits_in_msc);
        }
    }
}
