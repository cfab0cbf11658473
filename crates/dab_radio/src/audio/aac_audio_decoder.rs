//! Interface of the external HE-AACv2 decoder.
//!
//! The bitstream decoder itself is a host library. The radio owns one
//! decoder instance per subchannel and replaces it whenever the super frame
//! header announces different audio parameters.

/// Audio parameters derived from the DAB+ super frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AacDecoderParams {
    pub sampling_frequency: u32,
    pub is_sbr: bool,
    pub is_ps: bool,
    pub is_stereo: bool,
}

/// Result of decoding one access unit.
#[derive(Debug, Default)]
pub struct AacDecodeResult {
    pub is_error: bool,
    pub error_code: i32,
    pub audio_buf: Vec<u8>,
}

pub trait AacAudioDecoder: Send {
    fn decode_frame(&mut self, buf: &[u8]) -> AacDecodeResult;
    fn get_params(&self) -> AacDecoderParams;
}

/// Constructs decoder instances for a subchannel pipeline. Returning an
/// error disables audio decode for the channel while data decode continues.
pub trait AacAudioDecoderFactory: Send {
    fn create_decoder(&mut self, params: AacDecoderParams) -> Result<Box<dyn AacAudioDecoder>, String>;
}

impl<F> AacAudioDecoderFactory for F
where
    F: FnMut(AacDecoderParams) -> Result<Box<dyn AacAudioDecoder>, String> + Send,
{
    fn create_decoder(&mut self, params: AacDecoderParams) -> Result<Box<dyn AacAudioDecoder>, String> {
        self(params)
    }
}
