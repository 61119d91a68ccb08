use crate::models::TrackData;

/// Control messages pushed from the UI thread into the audio callback via
/// a lock-free ring buffer. Each one is a bounded mutation of the
/// scheduler; none may block on audio output.
#[derive(Debug)]
pub enum Command {
    /// Replace the track definition while preserving playback progress.
    UpdateTrack(Box<TrackData>),
    /// Pause or resume playback
    SetPaused(bool),
    /// Seek to a new playback position in seconds
    StartFrom(f64),
    /// Adjust the master output gain (0.0 - 1.0)
    SetMasterGain(f32),
    /// Override the per-step binaural gain in realtime
    SetBinauralGain(f32),
    /// Override the per-step noise gain in realtime
    SetNoiseGain(f32),
    /// Override the per-step normalization level in realtime
    SetNormalizationLevel(f32),
}
