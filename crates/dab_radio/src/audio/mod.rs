pub mod aac_audio_decoder;
pub mod aac_data_decoder;
pub mod aac_frame_processor;
