//! Outer Reed-Solomon codes.
//!
//! Both DAB+ audio super frames and packet mode FEC use shortened codes over
//! GF(2^8) with the 0x11D field polynomial: RS(120,110) with ten parity
//! bytes per super frame column and RS(204,188) with sixteen parity bytes
//! for packet subchannels.

use reed_solomon::Decoder;

/// Parity bytes of the RS(120,110) super frame column code.
pub const NB_SUPERFRAME_RS_PARITY_BYTES: usize = 10;
/// Codeword length of the super frame column code.
pub const NB_SUPERFRAME_RS_CODEWORD_BYTES: usize = 120;
/// Parity bytes of the RS(204,188) packet mode code.
pub const NB_PACKET_RS_PARITY_BYTES: usize = 16;
/// Codeword length of the packet mode code.
pub const NB_PACKET_RS_CODEWORD_BYTES: usize = 204;

pub struct ReedSolomonDecoder {
    decoder: Decoder,
    nb_parity_bytes: usize,
}

impl ReedSolomonDecoder {
    pub fn new(nb_parity_bytes: usize) -> Self {
        Self {
            decoder: Decoder::new(nb_parity_bytes),
            nb_parity_bytes,
        }
    }

    /// Corrects a codeword in place and returns the number of corrected
    /// symbols, or Err when the codeword is uncorrectable.
    pub fn correct(&self, codeword: &mut [u8]) -> Result<usize, ()> {
        assert!(codeword.len() > self.nb_parity_bytes, "Codeword of {} bytes cannot fit {} parity bytes", codeword.len(), self.nb_parity_bytes);
        match self.decoder.correct_err_count(codeword, None) {
            Ok((corrected, nb_errors)) => {
                let nb_data_bytes = codeword.len() - self.nb_parity_bytes;
                codeword[..nb_data_bytes].copy_from_slice(corrected.data());
                Ok(nb_errors)
            },
            Err(_) => Err(()),
        }
    }
}
