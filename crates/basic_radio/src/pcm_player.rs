//! Interface of the host audio output device.

/// Format of the PCM stream handed to the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BasicAudioParams {
    pub frequency: u32,
    pub is_stereo: bool,
    pub bytes_per_sample: u8,
}

pub trait PcmPlayer: Send {
    fn set_parameters(&mut self, params: BasicAudioParams);
    fn consume_buffer(&mut self, buf: &[u8]);
}
