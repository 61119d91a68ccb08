//! Realtime binaural / isochronic entrainment audio engine.
//!
//! A track is an ordered list of steps; each step assembles one or more
//! voices (binaural tones, isochronic tones, spectrally shaped noise with
//! swept notch filtering) over an optional background-noise layer. The
//! [`scheduler::TrackScheduler`] synthesises a continuous stereo stream
//! block by block while the control surface in [`api`] plays, pauses,
//! seeks and live-updates the track without audible glitches.

pub mod api;
pub mod audio_io;
pub mod command;
pub mod config;
pub mod dsp;
pub mod logging;
pub mod models;
pub mod noise;
pub mod noise_params;
pub mod scheduler;
pub mod voices;

pub use api::PlaybackStatus;
pub use models::TrackData;
pub use scheduler::TrackScheduler;
