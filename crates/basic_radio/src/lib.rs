//! Orchestration of a DAB ensemble receiver.
//!
//! Owns the worker threads, the ensemble database and one decoding channel
//! per selected subchannel. The demodulator hands in one transmission frame
//! of soft bits at a time and decoded services flow out through observers.

pub mod barrier;
pub mod basic_dab_plus_channel;
pub mod basic_radio;
pub mod basic_threaded_channel;
pub mod pcm_player;
