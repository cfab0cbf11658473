//! One decoding pipeline for a DAB+ subchannel.
//!
//! Slices the subchannel out of every CIF, feeds the decoded logical frames
//! into the super frame processor and fans the results out: access units to
//! the external AAC decoder, PAD content to the dynamic label and slideshow
//! assemblers, error events to status flags and observers.

use std::sync::{Arc, Mutex};

use log::{debug, error};

use dab_core::dab_parameters::DabDecoderParameters;
use dab_radio::audio::aac_audio_decoder::{AacAudioDecoder, AacAudioDecoderFactory, AacDecoderParams};
use dab_radio::audio::aac_data_decoder::AacDataDecoder;
use dab_radio::audio::aac_frame_processor::{AacFrameProcessor, SuperFrameHeader};
use dab_radio::database::dab_database_entities::Subchannel;
use dab_radio::mot::mot_entities::MotEntity;
use dab_radio::mot::mot_slideshow_processor::{BasicSlideshow, MotSlideshowProcessor};
use dab_radio::msc::msc_decoder::{MscDecoder, MscDecoderError};

use crate::pcm_player::{BasicAudioParams, PcmPlayer};

const CONTROL_FLAG_DECODE_AUDIO: u8 = 0b10000000;
const CONTROL_FLAG_DECODE_DATA: u8 = 0b01000000;
const CONTROL_FLAG_PLAY_AUDIO: u8 = 0b00100000;
const CONTROL_FLAG_ALL_SELECTED: u8 = 0b11100000;

/// Per channel control flags. Playing audio requires decoding it, so the
/// setters keep the two coupled.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BasicDabPlusControls {
    flags: u8,
}

impl BasicDabPlusControls {
    pub fn get_any_enabled(&self) -> bool {
        self.flags != 0
    }

    pub fn get_all_enabled(&self) -> bool {
        self.flags == CONTROL_FLAG_ALL_SELECTED
    }

    pub fn run_all(&mut self) {
        self.flags = CONTROL_FLAG_ALL_SELECTED;
    }

    pub fn stop_all(&mut self) {
        self.flags = 0;
    }

    pub fn get_is_decode_audio(&self) -> bool {
        (self.flags & CONTROL_FLAG_DECODE_AUDIO) != 0
    }

    pub fn set_is_decode_audio(&mut self, is_enabled: bool) {
        self.set_flag(CONTROL_FLAG_DECODE_AUDIO, is_enabled);
        if !is_enabled {
            self.set_flag(CONTROL_FLAG_PLAY_AUDIO, false);
        }
    }

    pub fn get_is_decode_data(&self) -> bool {
        (self.flags & CONTROL_FLAG_DECODE_DATA) != 0
    }

    pub fn set_is_decode_data(&mut self, is_enabled: bool) {
        self.set_flag(CONTROL_FLAG_DECODE_DATA, is_enabled);
    }

    pub fn get_is_play_audio(&self) -> bool {
        (self.flags & CONTROL_FLAG_PLAY_AUDIO) != 0
    }

    pub fn set_is_play_audio(&mut self, is_enabled: bool) {
        self.set_flag(CONTROL_FLAG_PLAY_AUDIO, is_enabled);
        if is_enabled {
            self.set_flag(CONTROL_FLAG_DECODE_AUDIO, true);
        }
    }

    fn set_flag(&mut self, flag: u8, is_enabled: bool) {
        if is_enabled {
            self.flags |= flag;
        } else {
            self.flags &= !flag;
        }
    }
}

/// Soft error classes surfaced by a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelErrorKind {
    Firecode,
    ReedSolomon,
    AccessUnitCrc,
    ViterbiPathError,
    AudioDecode,
    AudioDecoderStartup,
}

type AudioDataCallback = Box<dyn FnMut(BasicAudioParams, &[u8]) + Send>;
type DynamicLabelCallback = Box<dyn FnMut(&str) + Send>;
type MotEntityCallback = Box<dyn FnMut(&MotEntity) + Send>;
type SlideshowCallback = Box<dyn FnMut(&BasicSlideshow) + Send>;
type ChannelErrorCallback = Box<dyn FnMut(ChannelErrorKind, u8) + Send>;

#[derive(Default)]
struct ChannelShared {
    subchannel_id: u8,
    controls: BasicDabPlusControls,
    superframe_header: Option<SuperFrameHeader>,
    dynamic_label: String,
    is_firecode_error: bool,
    is_rs_error: bool,
    is_au_crc_error: bool,
    is_codec_error: bool,
    pcm_player: Option<Box<dyn PcmPlayer>>,
    pcm_player_params: Option<BasicAudioParams>,
    audio_data_callbacks: Vec<AudioDataCallback>,
    dynamic_label_callbacks: Vec<DynamicLabelCallback>,
    mot_entity_callbacks: Vec<MotEntityCallback>,
    slideshow_callbacks: Vec<SlideshowCallback>,
    error_callbacks: Vec<ChannelErrorCallback>,
}

impl ChannelShared {
    fn notify_error(&mut self, kind: ChannelErrorKind) {
        let subchannel_id = self.subchannel_id;
        for callback in self.error_callbacks.iter_mut() {
            callback(kind, subchannel_id);
        }
    }
}

pub struct BasicDabPlusChannel {
    params: DabDecoderParameters,
    subchannel: Subchannel,
    msc_decoder: MscDecoder,
    aac_frame_processor: AacFrameProcessor,
    shared: Arc<Mutex<ChannelShared>>,
}

impl BasicDabPlusChannel {
    pub fn new(
        params: DabDecoderParameters,
        subchannel: Subchannel,
        audio_decoder_factory: Option<Box<dyn AacAudioDecoderFactory>>,
    ) -> Result<Self, MscDecoderError> {
        let msc_decoder = MscDecoder::new(params, subchannel)?;
        let shared = Arc::new(Mutex::new(ChannelShared {
            subchannel_id: subchannel.id,
            ..ChannelShared::default()
        }));

        let mut aac_frame_processor = AacFrameProcessor::new();
        Self::setup_callbacks(&mut aac_frame_processor, &shared, audio_decoder_factory);

        Ok(Self {
            params,
            subchannel,
            msc_decoder,
            aac_frame_processor,
            shared,
        })
    }

    fn setup_callbacks(
        aac_frame_processor: &mut AacFrameProcessor,
        shared: &Arc<Mutex<ChannelShared>>,
        audio_decoder_factory: Option<Box<dyn AacAudioDecoderFactory>>,
    ) {
        // Error indicators reflect the current super frame only
        aac_frame_processor.subscribe_superframe_begin({
            let shared = shared.clone();
            move || {
                let mut shared = shared.lock().unwrap();
                shared.is_firecode_error = false;
                shared.is_rs_error = false;
                shared.is_au_crc_error = false;
            }
        });

        aac_frame_processor.subscribe_superframe_header({
            let shared = shared.clone();
            move |header| {
                let mut shared = shared.lock().unwrap();
                shared.superframe_header = Some(header);
            }
        });

        // Audio decode path. The external decoder is owned here and is
        // lazily constructed or replaced whenever the announced parameters
        // differ from the running instance.
        aac_frame_processor.subscribe_access_unit({
            let shared = shared.clone();
            let mut audio_decoder_factory = audio_decoder_factory;
            let mut audio_decoder: Option<Box<dyn AacAudioDecoder>> = None;
            move |au_index, nb_aus, buf| {
                let header = {
                    let shared = shared.lock().unwrap();
                    if !shared.controls.get_is_decode_audio() {
                        return;
                    }
                    match shared.superframe_header {
                        Some(header) => header,
                        None => return,
                    }
                };
                let Some(factory) = audio_decoder_factory.as_mut() else {
                    return;
                };

                let audio_params = AacDecoderParams {
                    sampling_frequency: header.sampling_rate,
                    is_sbr: header.is_sbr,
                    is_ps: header.is_ps,
                    is_stereo: header.is_stereo,
                };
                let replace_decoder = match &audio_decoder {
                    None => true,
                    Some(decoder) => decoder.get_params() != audio_params,
                };
                if replace_decoder {
                    match factory.create_decoder(audio_params) {
                        Ok(decoder) => audio_decoder = Some(decoder),
                        Err(message) => {
                            // Audio is disabled for the channel but data
                            // decoding carries on.
                            error!("audio decoder startup failed: {}", message);
                            let mut shared = shared.lock().unwrap();
                            shared.controls.set_is_decode_audio(false);
                            shared.notify_error(ChannelErrorKind::AudioDecoderStartup);
                            return;
                        },
                    }
                }

                let decoder = audio_decoder.as_mut().expect("Decoder exists or we returned");
                let result = decoder.decode_frame(buf);

                let mut shared = shared.lock().unwrap();
                if au_index == 0 {
                    shared.is_codec_error = false;
                }
                if result.is_error {
                    debug!("audio decode error={} au_index={}/{}", result.error_code, au_index, nb_aus);
                    shared.is_codec_error = true;
                    shared.notify_error(ChannelErrorKind::AudioDecode);
                    return;
                }

                let audio_params = BasicAudioParams {
                    frequency: decoder.get_params().sampling_frequency,
                    is_stereo: true,
                    bytes_per_sample: 2,
                };
                let shared = &mut *shared;
                for callback in shared.audio_data_callbacks.iter_mut() {
                    callback(audio_params, &result.audio_buf);
                }

                // The sound device only runs while playback is selected
                if shared.controls.get_is_play_audio() {
                    if let Some(pcm_player) = shared.pcm_player.as_mut() {
                        if shared.pcm_player_params != Some(audio_params) {
                            pcm_player.set_parameters(audio_params);
                            shared.pcm_player_params = Some(audio_params);
                        }
                        pcm_player.consume_buffer(&result.audio_buf);
                    }
                }
            }
        });

        // Data decode path: PAD extraction feeding labels and the slideshow
        aac_frame_processor.subscribe_access_unit({
            let shared = shared.clone();
            let mut aac_data_decoder = AacDataDecoder::new();
            let slideshow_processor = MotSlideshowProcessor::new();

            aac_data_decoder
                .get_pad_processor_mut()
                .get_dynamic_label_mut()
                .subscribe_label({
                    let shared = shared.clone();
                    move |label, charset| {
                        debug!("dynamic_label[{}]={} | charset={}", label.len(), label, charset);
                        let mut shared = shared.lock().unwrap();
                        shared.dynamic_label = label.to_string();
                        let shared = &mut *shared;
                        for callback in shared.dynamic_label_callbacks.iter_mut() {
                            callback(label);
                        }
                    }
                });
            aac_data_decoder
                .get_pad_processor_mut()
                .get_mot_processor_mut()
                .get_mot_processor_mut()
                .subscribe_entity({
                    let shared = shared.clone();
                    move |entity| {
                        let mut shared = shared.lock().unwrap();
                        let shared = &mut *shared;
                        match slideshow_processor.process_mot_entity(entity) {
                            Some(slideshow) => {
                                for callback in shared.slideshow_callbacks.iter_mut() {
                                    callback(&slideshow);
                                }
                            },
                            None => {
                                for callback in shared.mot_entity_callbacks.iter_mut() {
                                    callback(entity);
                                }
                            },
                        }
                    }
                });

            move |_au_index, _nb_aus, buf| {
                let is_decode_data = shared.lock().unwrap().controls.get_is_decode_data();
                if is_decode_data {
                    aac_data_decoder.process_access_unit(buf);
                }
            }
        });

        // Error events raise the per channel status flags
        aac_frame_processor.subscribe_firecode_error({
            let shared = shared.clone();
            move |_nb_desync_frames| {
                let mut shared = shared.lock().unwrap();
                shared.is_firecode_error = true;
                shared.notify_error(ChannelErrorKind::Firecode);
            }
        });
        aac_frame_processor.subscribe_rs_error({
            let shared = shared.clone();
            move |_codeword_index, _nb_codewords| {
                let mut shared = shared.lock().unwrap();
                shared.is_rs_error = true;
                shared.notify_error(ChannelErrorKind::ReedSolomon);
            }
        });
        aac_frame_processor.subscribe_access_unit_crc_error({
            let shared = shared.clone();
            move |_au_index, _nb_aus, _crc_received, _crc_calculated| {
                let mut shared = shared.lock().unwrap();
                shared.is_au_crc_error = true;
                shared.notify_error(ChannelErrorKind::AccessUnitCrc);
            }
        });
    }

    /// Consumes the MSC slice of one transmission frame.
    pub fn process(&mut self, msc_bits: &[i8]) {
        assert!(msc_bits.len() == self.params.nb_bits_in_msc, "MSC slice must be {} soft bits but got {}", self.params.nb_bits_in_msc, msc_bits.len());

        if !self.shared.lock().unwrap().controls.get_any_enabled() {
            return;
        }

        for cif_buf in msc_bits.chunks_exact(self.params.nb_bits_per_cif) {
            // The deinterleaver produces nothing while its delay line fills
            let Some(decoded_bytes) = self.msc_decoder.decode_cif(cif_buf) else {
                continue;
            };
            self.aac_frame_processor.process_frame(decoded_bytes);
            if self.msc_decoder.get_is_rs_error() {
                let mut shared = self.shared.lock().unwrap();
                shared.is_rs_error = true;
                shared.notify_error(ChannelErrorKind::ReedSolomon);
            }
            if self.msc_decoder.get_is_path_error_spike() {
                self.shared.lock().unwrap().notify_error(ChannelErrorKind::ViterbiPathError);
            }
        }
    }

    pub fn get_subchannel(&self) -> &Subchannel {
        &self.subchannel
    }

    pub fn get_bitrate_kbps(&self) -> u32 {
        self.msc_decoder.get_bitrate_kbps()
    }

    pub fn get_controls(&self) -> BasicDabPlusControls {
        self.shared.lock().unwrap().controls
    }

    pub fn update_controls(&self, apply: impl FnOnce(&mut BasicDabPlusControls)) {
        apply(&mut self.shared.lock().unwrap().controls);
    }

    pub fn get_superframe_header(&self) -> Option<SuperFrameHeader> {
        self.shared.lock().unwrap().superframe_header
    }

    pub fn get_dynamic_label(&self) -> String {
        self.shared.lock().unwrap().dynamic_label.clone()
    }

    pub fn get_is_firecode_error(&self) -> bool {
        self.shared.lock().unwrap().is_firecode_error
    }

    pub fn get_is_rs_error(&self) -> bool {
        self.shared.lock().unwrap().is_rs_error
    }

    pub fn get_is_au_crc_error(&self) -> bool {
        self.shared.lock().unwrap().is_au_crc_error
    }

    pub fn get_is_codec_error(&self) -> bool {
        self.shared.lock().unwrap().is_codec_error
    }

    /// Installs the sound device fed while play audio is selected.
    pub fn set_pcm_player(&self, pcm_player: Box<dyn PcmPlayer>) {
        let mut shared = self.shared.lock().unwrap();
        shared.pcm_player = Some(pcm_player);
        shared.pcm_player_params = None;
    }

    pub fn subscribe_audio_data(&self, callback: impl FnMut(BasicAudioParams, &[u8]) + Send + 'static) {
        self.shared.lock().unwrap().audio_data_callbacks.push(Box::new(callback));
    }

    pub fn subscribe_dynamic_label(&self, callback: impl FnMut(&str) + Send + 'static) {
        self.shared.lock().unwrap().dynamic_label_callbacks.push(Box::new(callback));
    }

    pub fn subscribe_mot_entity(&self, callback: impl FnMut(&MotEntity) + Send + 'static) {
        self.shared.lock().unwrap().mot_entity_callbacks.push(Box::new(callback));
    }

    pub fn subscribe_slideshow(&self, callback: impl FnMut(&BasicSlideshow) + Send + 'static) {
        self.shared.lock().unwrap().slideshow_callbacks.push(Box::new(callback));
    }

    pub fn subscribe_error(&self, callback: impl FnMut(ChannelErrorKind, u8) + Send + 'static) {
        self.shared.lock().unwrap().error_callbacks.push(Box::new(callback));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn play_audio_implies_decode_audio() {
        let mut controls = BasicDabPlusControls::default();
        controls.set_is_play_audio(true);
        assert!(controls.get_is_decode_audio());
        assert!(controls.get_is_play_audio());
    }

    #[test]
    fn disabling_decode_audio_stops_playback() {
        let mut controls = BasicDabPlusControls::default();
        controls.set_is_play_audio(true);
        controls.set_is_decode_audio(false);
        assert!(!controls.get_is_play_audio());
        assert!(!controls.get_is_decode_audio());
        assert!(!controls.get_any_enabled());
    }

    #[test]
    fn control_flags_return_to_zero() {
        let mut controls = BasicDabPlusControls::default();
        controls.set_is_play_audio(true);
        controls.set_is_decode_audio(false);
        assert_eq!(controls, BasicDabPlusControls::default());

        controls.run_all();
        assert!(controls.get_all_enabled());
        controls.stop_all();
        assert!(!controls.get_any_enabled());
    }
}
