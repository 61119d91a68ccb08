//! Process-global control surface over one audio session.
//!
//! The UI boundary: every call here performs a bounded mutation or a
//! snapshot read and never blocks on audio output. Commands travel to the
//! audio callback over a lock-free ring buffer; position flows back
//! through shared atomics.

use crate::audio_io::{self, PlaybackState};
use crate::command::Command;
use crate::config::CONFIG;
use crate::models::TrackData;
use crate::scheduler::TrackScheduler;
use hound::{SampleFormat, WavSpec, WavWriter};
use lazy_static::lazy_static;
use parking_lot::Mutex;
use ringbuf::traits::{Producer, Split};
use ringbuf::HeapRb;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

struct EngineState {
    command_producer: ringbuf::HeapProd<Command>,
    stop_sender: crossbeam::channel::Sender<()>,
    elapsed_samples: Arc<AtomicU64>,
    current_step: Arc<AtomicU64>,
    is_paused: Arc<AtomicBool>,
    sample_rate: u32,
}

lazy_static! {
    static ref ENGINE: Mutex<Option<EngineState>> = Mutex::new(None);
}

/// Playback snapshot returned by [`get_playback_status`].
#[derive(Clone, Debug)]
pub struct PlaybackStatus {
    /// Current playback position in seconds
    pub position_seconds: f64,
    /// Current step index (0-based)
    pub current_step: u64,
    /// Whether playback is paused
    pub is_paused: bool,
    /// Sample rate of the audio session
    pub sample_rate: u32,
}

/// One-time process setup (logging, panic hook).
pub fn init() {
    crate::logging::init_logging();
}

/// Parse a track definition and start a playback session, replacing any
/// session already running. Returns once the audio thread is launched.
pub fn load_track(track_json: &str, start_time: Option<f64>) -> anyhow::Result<()> {
    stop();

    let track_data: TrackData = serde_json::from_str(track_json)
        .map_err(|e| anyhow::anyhow!("invalid track JSON: {e}"))?;
    let sample_rate = track_data.global_settings.sample_rate;

    let start_secs = start_time.unwrap_or(0.0);
    let scheduler = TrackScheduler::new_with_start(track_data, sample_rate, start_secs);

    let rb = HeapRb::<Command>::new(1024);
    let (prod, cons) = rb.split();
    let (stop_tx, stop_rx) = crossbeam::channel::unbounded();

    let elapsed_samples = Arc::new(AtomicU64::new(0));
    let current_step = Arc::new(AtomicU64::new(0));
    let is_paused = Arc::new(AtomicBool::new(false));
    let playback_state = PlaybackState {
        elapsed_samples: Arc::clone(&elapsed_samples),
        current_step: Arc::clone(&current_step),
        is_paused: Arc::clone(&is_paused),
    };

    std::thread::spawn(move || {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            if let Err(e) = audio_io::run_audio_stream(scheduler, cons, stop_rx, Some(playback_state))
            {
                log::error!("audio stream failed: {e:#}");
            }
        }));
        if result.is_err() {
            log::error!("audio thread panicked; session dead until rebuilt");
        }
    });

    let mut guard = ENGINE.lock();
    *guard = Some(EngineState {
        command_producer: prod,
        stop_sender: stop_tx,
        elapsed_samples,
        current_step,
        is_paused,
        sample_rate,
    });
    Ok(())
}

/// Push a replacement track definition into the running session.
pub fn update_track(track_json: &str) -> anyhow::Result<()> {
    let track_data: TrackData = serde_json::from_str(track_json)
        .map_err(|e| anyhow::anyhow!("invalid track JSON: {e}"))?;
    let mut guard = ENGINE.lock();
    if let Some(state) = guard.as_mut() {
        let _ = state
            .command_producer
            .try_push(Command::UpdateTrack(Box::new(track_data)));
    }
    Ok(())
}

fn push_command(cmd: Command) {
    let mut guard = ENGINE.lock();
    if let Some(state) = guard.as_mut() {
        let _ = state.command_producer.try_push(cmd);
    }
}

pub fn play() {
    push_command(Command::SetPaused(false));
}

pub fn pause() {
    push_command(Command::SetPaused(true));
}

/// Stop and tear down the running session, if any.
pub fn stop() {
    let mut guard = ENGINE.lock();
    if let Some(state) = guard.take() {
        audio_io::stop_audio_stream(&state.stop_sender);
    }
}

/// Seek to a position in seconds. Positions past the end clamp to the end.
pub fn seek_to(seconds: f64) {
    push_command(Command::StartFrom(seconds));
}

pub fn set_master_gain(gain: f32) {
    push_command(Command::SetMasterGain(gain));
}

pub fn set_binaural_gain(gain: f32) {
    push_command(Command::SetBinauralGain(gain));
}

pub fn set_noise_gain(gain: f32) {
    push_command(Command::SetNoiseGain(gain));
}

pub fn set_normalization_level(level: f32) {
    push_command(Command::SetNormalizationLevel(level));
}

/// Current playback position in seconds, or None without a session.
pub fn get_playback_position() -> Option<f64> {
    let guard = ENGINE.lock();
    guard.as_ref().map(|state| {
        let samples = state.elapsed_samples.load(Ordering::Relaxed);
        samples as f64 / state.sample_rate as f64
    })
}

pub fn get_elapsed_samples() -> Option<u64> {
    let guard = ENGINE.lock();
    guard
        .as_ref()
        .map(|state| state.elapsed_samples.load(Ordering::Relaxed))
}

pub fn get_current_step() -> Option<u64> {
    let guard = ENGINE.lock();
    guard
        .as_ref()
        .map(|state| state.current_step.load(Ordering::Relaxed))
}

pub fn is_paused() -> Option<bool> {
    let guard = ENGINE.lock();
    guard
        .as_ref()
        .map(|state| state.is_paused.load(Ordering::Relaxed))
}

/// Whether a session exists and is not paused.
pub fn is_playing() -> bool {
    let guard = ENGINE.lock();
    guard
        .as_ref()
        .map(|state| !state.is_paused.load(Ordering::Relaxed))
        .unwrap_or(false)
}

pub fn get_sample_rate() -> Option<u32> {
    let guard = ENGINE.lock();
    guard.as_ref().map(|s| s.sample_rate)
}

/// Complete playback snapshot, or None without a session.
pub fn get_playback_status() -> Option<PlaybackStatus> {
    let guard = ENGINE.lock();
    guard.as_ref().map(|state| PlaybackStatus {
        position_seconds: state.elapsed_samples.load(Ordering::Relaxed) as f64
            / state.sample_rate as f64,
        current_step: state.current_step.load(Ordering::Relaxed),
        is_paused: state.is_paused.load(Ordering::Relaxed),
        sample_rate: state.sample_rate,
    })
}

fn resolve_output_path(out_path: &str) -> std::path::PathBuf {
    if std::path::Path::new(out_path).is_absolute() {
        std::path::PathBuf::from(out_path)
    } else {
        CONFIG.output_dir.join(out_path)
    }
}

fn render_to_wav(track_data: TrackData, out_path: &str, limit_frames: Option<usize>) -> anyhow::Result<()> {
    let sample_rate = track_data.global_settings.sample_rate;
    let mut scheduler = TrackScheduler::new(track_data, sample_rate);

    let track_frames = scheduler.total_samples();
    let target_frames = limit_frames
        .map(|l| l.min(track_frames))
        .unwrap_or(track_frames);

    let spec = WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let output_path = resolve_output_path(out_path);
    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| anyhow::anyhow!("failed to create output directory: {e}"))?;
    }
    let mut writer = WavWriter::create(&output_path, spec)
        .map_err(|e| anyhow::anyhow!("failed to create WAV file: {e}"))?;

    log::info!("rendering {target_frames} frames at {sample_rate} Hz");
    let start_time = std::time::Instant::now();

    let mut remaining = target_frames;
    let mut buffer = vec![0.0f32; 512 * 2];
    while remaining > 0 {
        let frames = 512.min(remaining);
        buffer.resize(frames * 2, 0.0);
        scheduler.process_block(&mut buffer);
        for sample in &buffer[..frames * 2] {
            let s = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            writer
                .write_sample(s)
                .map_err(|e| anyhow::anyhow!("failed to write sample: {e}"))?;
        }
        remaining -= frames;
    }

    writer
        .finalize()
        .map_err(|e| anyhow::anyhow!("failed to finalize WAV file: {e}"))?;
    log::info!("render finished in {:.2}s", start_time.elapsed().as_secs_f32());
    Ok(())
}

/// Render up to 60 seconds of the track to a WAV file for previewing.
pub fn render_sample_wav(track_json: &str, out_path: &str) -> anyhow::Result<()> {
    let track_data: TrackData = serde_json::from_str(track_json)
        .map_err(|e| anyhow::anyhow!("invalid track JSON: {e}"))?;
    let limit = track_data.global_settings.sample_rate as usize * 60;
    render_to_wav(track_data, out_path, Some(limit))
}

/// Render the complete track to a WAV file.
pub fn render_full_wav(track_json: &str, out_path: &str) -> anyhow::Result<()> {
    let track_data: TrackData = serde_json::from_str(track_json)
        .map_err(|e| anyhow::anyhow!("invalid track JSON: {e}"))?;
    render_to_wav(track_data, out_path, None)
}
