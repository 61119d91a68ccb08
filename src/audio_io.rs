use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleFormat, StreamConfig};
use crossbeam::channel::Receiver;
use ringbuf::traits::Consumer;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::command::Command;
use crate::scheduler::TrackScheduler;

/// Shared state atomics for tracking playback position from the UI thread
pub struct PlaybackState {
    pub elapsed_samples: Arc<AtomicU64>,
    pub current_step: Arc<AtomicU64>,
    pub is_paused: Arc<AtomicBool>,
}

/// Pick a fixed callback size of at least four times the platform minimum.
/// Larger callbacks ride out scheduling jitter; the fallback is whatever
/// the device defaults to.
fn configure_buffer_size(device: &cpal::Device, config: &mut StreamConfig) {
    if let Ok(ranges) = device.supported_output_configs() {
        for range in ranges {
            if let &cpal::SupportedBufferSize::Range { min, max } = range.buffer_size() {
                let wanted = (min.max(1) * 4).max(1024);
                if wanted <= max {
                    config.buffer_size = BufferSize::Fixed(wanted);
                    log::info!("using fixed buffer size: {wanted} frames");
                    return;
                }
            }
        }
    }
    log::info!("using default device buffer size");
}

/// Own the output stream for the lifetime of a session. The cpal callback
/// drains pending commands, renders one block from the scheduler and
/// publishes the position atomics; the thread parks until the stop channel
/// fires.
pub fn run_audio_stream<C>(
    scheduler: TrackScheduler,
    cmd_rx: C,
    stop_rx: Receiver<()>,
    playback_state: Option<PlaybackState>,
) -> anyhow::Result<()>
where
    C: Consumer<Item = Command> + Send + 'static,
{
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| anyhow::anyhow!("no output device available"))?;
    let supported_config = device
        .default_output_config()
        .map_err(|e| anyhow::anyhow!("no default output config: {e}"))?;
    let sample_format = supported_config.sample_format();
    let mut config: StreamConfig = supported_config.clone().into();

    // Prefer the track's sample rate when the device can run at it.
    let desired_rate = scheduler.sample_rate as u32;
    if desired_rate != config.sample_rate.0 {
        if let Ok(mut ranges) = device.supported_output_configs() {
            if let Some(range) = ranges.find(|r| {
                r.channels() == config.channels
                    && r.sample_format() == sample_format
                    && r.min_sample_rate().0 <= desired_rate
                    && desired_rate <= r.max_sample_rate().0
            }) {
                config = range
                    .with_sample_rate(cpal::SampleRate(desired_rate))
                    .config();
            } else {
                log::warn!(
                    "sample rate {} not supported, using {}",
                    desired_rate,
                    config.sample_rate.0
                );
            }
        }
    }

    configure_buffer_size(&device, &mut config);

    let mut sched = scheduler;
    let mut cmds = cmd_rx;
    let audio_callback = move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
        while let Some(cmd) = cmds.try_pop() {
            sched.handle_command(cmd);
        }
        sched.process_block(data);

        if let Some(state) = &playback_state {
            state
                .elapsed_samples
                .store(sched.absolute_sample, Ordering::Relaxed);
            state
                .current_step
                .store(sched.current_step as u64, Ordering::Relaxed);
            state.is_paused.store(sched.paused, Ordering::Relaxed);
        }
    };

    let stream = match sample_format {
        SampleFormat::F32 => device
            .build_output_stream(
                &config,
                audio_callback,
                |err| log::error!("audio stream error: {err}"),
                None,
            )
            .map_err(|e| anyhow::anyhow!("failed to build audio stream: {e}"))?,
        other => anyhow::bail!("unsupported sample format: {other:?}"),
    };
    stream
        .play()
        .map_err(|e| anyhow::anyhow!("failed to start playback: {e}"))?;

    // Keep the stream alive until a stop signal is received.
    while stop_rx
        .recv_timeout(std::time::Duration::from_millis(100))
        .is_err()
    {}

    log::info!("audio stream stopped");
    Ok(())
}

// The actual stop logic is handled via the channel in `run_audio_stream`.
pub fn stop_audio_stream(sender: &crossbeam::channel::Sender<()>) {
    let _ = sender.send(());
}
