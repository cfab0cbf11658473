//! Top level receiver: one FIC runner, one worker per DAB+ subchannel.
//!
//! The ingest thread stages each transmission frame in shared buffers,
//! signals the workers and waits on their barriers. FIC results are applied
//! to the ensemble database between frames, which is also when subchannel
//! pipelines are created or rebuilt after a reconfiguration.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use parking_lot::{Mutex, RwLock};

use dab_core::dab_parameters::DabDecoderParameters;
use dab_radio::audio::aac_audio_decoder::{AacAudioDecoder, AacAudioDecoderFactory, AacDecoderParams};
use dab_radio::database::dab_database::DabDatabase;
use dab_radio::database::dab_database_entities::{SubchannelId, TransportMode, AUDIO_SERVICE_TYPE_DAB_PLUS};
use dab_radio::database::dab_database_updater::DabDatabaseUpdater;
use dab_radio::fic::fic_decoder::{FicDecoder, FicDecoderStatistics};

use crate::basic_dab_plus_channel::BasicDabPlusChannel;
use crate::basic_threaded_channel::BasicThreadedChannel;

/// How long the ingest thread waits on a busy worker before dropping the
/// frame for that subchannel.
const DEFAULT_FRAME_TIMEOUT: Duration = Duration::from_millis(250);

struct FicState {
    decoder: FicDecoder,
    updater: DabDatabaseUpdater,
}

struct ChannelWorker {
    channel: Arc<Mutex<BasicDabPlusChannel>>,
    runner: BasicThreadedChannel,
}

/// Clones of this handle let every channel construct decoders through the
/// single factory supplied by the host.
struct SharedAudioDecoderFactory {
    inner: Arc<Mutex<Box<dyn AacAudioDecoderFactory>>>,
}

impl AacAudioDecoderFactory for SharedAudioDecoderFactory {
    fn create_decoder(&mut self, params: AacDecoderParams) -> Result<Box<dyn AacAudioDecoder>, String> {
        self.inner.lock().create_decoder(params)
    }
}

type EnsembleUpdateCallback = Box<dyn FnMut(&DabDatabase) + Send>;

pub struct BasicRadio {
    params: DabDecoderParameters,
    fic_buffer: Arc<RwLock<Vec<i8>>>,
    fic_state: Arc<Mutex<FicState>>,
    fic_runner: BasicThreadedChannel,
    msc_buffer: Arc<RwLock<Vec<i8>>>,
    channels: BTreeMap<SubchannelId, ChannelWorker>,
    database_snapshot: Arc<RwLock<DabDatabase>>,
    ensemble_update_callbacks: Vec<EnsembleUpdateCallback>,
    audio_decoder_factory: Option<Arc<Mutex<Box<dyn AacAudioDecoderFactory>>>>,
    frame_timeout: Duration,
    nb_dropped_frames: u64,
}

impl BasicRadio {
    pub fn new(params: DabDecoderParameters, audio_decoder_factory: Option<Box<dyn AacAudioDecoderFactory>>) -> Self {
        let fic_buffer = Arc::new(RwLock::new(vec![0i8; params.nb_bits_in_fic]));
        let fic_state = Arc::new(Mutex::new(FicState {
            decoder: FicDecoder::new(params),
            updater: DabDatabaseUpdater::new(),
        }));
        let fic_runner = BasicThreadedChannel::new("FIC".to_string(), {
            let fic_buffer = fic_buffer.clone();
            let fic_state = fic_state.clone();
            move || {
                let frame = fic_buffer.read();
                let mut guard = fic_state.lock();
                let fic_state = &mut *guard;
                fic_state.decoder.decode_fic(&frame, &mut fic_state.updater);
            }
        });

        Self {
            params,
            fic_buffer,
            fic_state,
            fic_runner,
            msc_buffer: Arc::new(RwLock::new(vec![0i8; params.nb_bits_in_msc])),
            channels: BTreeMap::new(),
            database_snapshot: Arc::new(RwLock::new(DabDatabase::new())),
            ensemble_update_callbacks: Vec::new(),
            audio_decoder_factory: audio_decoder_factory.map(|factory| Arc::new(Mutex::new(factory))),
            frame_timeout: DEFAULT_FRAME_TIMEOUT,
            nb_dropped_frames: 0,
        }
    }

    pub fn get_params(&self) -> DabDecoderParameters {
        self.params
    }

    /// Coalesced on every frame whose FIBs mutated the database.
    pub fn subscribe_ensemble_update(&mut self, callback: impl FnMut(&DabDatabase) + Send + 'static) {
        self.ensemble_update_callbacks.push(Box::new(callback));
    }

    /// Shared read handle onto the most recent database snapshot.
    pub fn get_database_handle(&self) -> Arc<RwLock<DabDatabase>> {
        self.database_snapshot.clone()
    }

    pub fn get_channel(&self, subchannel_id: SubchannelId) -> Option<Arc<Mutex<BasicDabPlusChannel>>> {
        self.channels.get(&subchannel_id).map(|worker| worker.channel.clone())
    }

    pub fn get_channel_ids(&self) -> Vec<SubchannelId> {
        self.channels.keys().copied().collect()
    }

    pub fn get_fic_statistics(&self) -> FicDecoderStatistics {
        self.fic_state.lock().decoder.get_statistics()
    }

    pub fn get_nb_dropped_frames(&self) -> u64 {
        self.nb_dropped_frames
    }

    /// Consumes the FIC slice of one transmission frame.
    pub fn process_fic(&mut self, buf: &[i8]) {
        assert!(buf.len() == self.params.nb_bits_in_fic, "FIC slice must be {} soft bits but got {}", self.params.nb_bits_in_fic, buf.len());

        self.fic_buffer.write().copy_from_slice(buf);
        self.fic_runner.start();
        self.fic_runner.join();

        // Apply whatever the FIC learnt before the next frame arrives
        let (is_dirty, changed_subchannels) = {
            let mut fic_state = self.fic_state.lock();
            let is_dirty = fic_state.updater.take_dirty();
            let mut changed_subchannels = fic_state.updater.take_changed_subchannels();
            if fic_state.updater.take_configuration_changed() {
                // A reconfiguration invalidates every pipeline
                changed_subchannels.extend(self.channels.keys().copied());
            }
            if is_dirty {
                *self.database_snapshot.write() = fic_state.updater.get_database().clone();
            }
            (is_dirty, changed_subchannels)
        };

        if !is_dirty && changed_subchannels.is_empty() {
            return;
        }

        let snapshot = self.database_snapshot.clone();
        let snapshot = snapshot.read();
        for subchannel_id in changed_subchannels {
            if self.channels.remove(&subchannel_id).is_some() {
                info!("subchannel {} pipeline torn down for a new descriptor", subchannel_id);
            }
        }
        self.create_missing_channels(&snapshot);
        for callback in self.ensemble_update_callbacks.iter_mut() {
            callback(&snapshot);
        }
    }

    /// Consumes the MSC slice of one transmission frame. The frame is
    /// dropped when a previous frame still occupies the staging buffer.
    pub fn process_msc(&mut self, buf: &[i8]) {
        assert!(buf.len() == self.params.nb_bits_in_msc, "MSC slice must be {} soft bits but got {}", self.params.nb_bits_in_msc, buf.len());

        match self.msc_buffer.try_write_for(self.frame_timeout) {
            Some(mut frame) => frame.copy_from_slice(buf),
            None => {
                self.nb_dropped_frames += 1;
                warn!("staging buffer still busy, dropping MSC frame");
                return;
            },
        }

        for (subchannel_id, worker) in self.channels.iter() {
            if !worker.runner.is_idle() {
                self.nb_dropped_frames += 1;
                warn!("subchannel {} worker missed a frame", subchannel_id);
                continue;
            }
            worker.runner.start();
        }
        for worker in self.channels.values() {
            let _ = worker.runner.join_timeout(self.frame_timeout);
        }
    }

    /// Cooperative shutdown of the FIC runner and every channel worker.
    pub fn stop(&mut self) {
        self.fic_runner.stop();
        for (_, mut worker) in std::mem::take(&mut self.channels) {
            worker.runner.stop();
        }
    }

    fn create_missing_channels(&mut self, snapshot: &DabDatabase) {
        for subchannel in snapshot.get_subchannels() {
            if self.channels.contains_key(&subchannel.id) {
                continue;
            }
            let Some(component) = snapshot.get_service_component_by_subchannel(subchannel.id) else {
                continue;
            };
            let is_dab_plus_audio = component.transport_mode == TransportMode::StreamAudio
                && component.service_type == AUDIO_SERVICE_TYPE_DAB_PLUS;
            if !is_dab_plus_audio {
                continue;
            }

            let factory = self.audio_decoder_factory.as_ref().map(|inner| {
                Box::new(SharedAudioDecoderFactory { inner: inner.clone() }) as Box<dyn AacAudioDecoderFactory>
            });
            let channel = match BasicDabPlusChannel::new(self.params, *subchannel, factory) {
                Ok(channel) => channel,
                // Configuration error: the subchannel stays uncreated
                Err(err) => {
                    warn!("subchannel {} pipeline rejected: {}", subchannel.id, err);
                    continue;
                },
            };
            info!("subchannel {} pipeline created ({} kbit/s)", subchannel.id, channel.get_bitrate_kbps());

            let channel = Arc::new(Mutex::new(channel));
            let runner = BasicThreadedChannel::new(format!("MSC-subchannel-{}", subchannel.id), {
                let channel = channel.clone();
                let msc_buffer = self.msc_buffer.clone();
                move || {
                    let frame = msc_buffer.read();
                    channel.lock().process(&frame);
                }
            });
            self.channels.insert(subchannel.id, ChannelWorker { channel, runner });
        }
    }
}

impl Drop for BasicRadio {
    fn drop(&mut self) {
        self.stop();
    }
}
