//! Offline end-to-end scenarios: the scheduler is driven directly through
//! `process_block` and the concatenated output is inspected.

use entrain_engine::models::TrackData;
use entrain_engine::scheduler::TrackScheduler;
use serde_json::json;

fn track(value: serde_json::Value) -> TrackData {
    serde_json::from_value(value).unwrap()
}

fn render(sched: &mut TrackScheduler, frames: usize) -> Vec<f32> {
    let block = 512;
    let mut out = Vec::with_capacity(frames * 2);
    let mut buf = vec![0.0f32; block * 2];
    let mut remaining = frames;
    while remaining > 0 {
        let n = block.min(remaining);
        buf.resize(n * 2, 0.0);
        sched.process_block(&mut buf);
        out.extend_from_slice(&buf[..n * 2]);
        remaining -= n;
    }
    out
}

fn channel(out: &[f32], ch: usize) -> Vec<f32> {
    out.chunks(2).map(|f| f[ch]).collect()
}

/// Rising zero crossings over the samples, a cheap frequency estimate.
fn cycles(samples: &[f32]) -> usize {
    let mut n = 0;
    for i in 1..samples.len() {
        if samples[i - 1] <= 0.0 && samples[i] > 0.0 {
            n += 1;
        }
    }
    n
}

fn rms(samples: &[f32]) -> f32 {
    (samples.iter().map(|x| x * x).sum::<f32>() / samples.len() as f32).sqrt()
}

// The default mixdown chain: normalisation target 0.95 times the clamped
// step volume 0.6.
const STEP_GAIN: f32 = 0.95 * 0.6;

#[test]
fn single_tone_is_mono_and_at_pitch() {
    let t = track(json!({
        "global_settings": { "sample_rate": 44100, "crossfade_duration": 0.0 },
        "steps": [{
            "duration": 1.0,
            "voices": [{
                "synth_function": "binaural_beat",
                "parameters": { "baseFreq": 220.0, "beatFreq": 0.0, "ampL": 1.0, "ampR": 1.0 }
            }]
        }]
    }));
    let mut sched = TrackScheduler::new(t, 44100);
    let out = render(&mut sched, 44100);
    let left = channel(&out, 0);
    let right = channel(&out, 1);

    for i in 0..left.len() {
        assert!((left[i] - right[i]).abs() < 1e-6, "stereo mismatch at {i}");
    }
    let peak = left.iter().fold(0.0f32, |m, v| m.max(v.abs()));
    assert!((peak - STEP_GAIN).abs() < 0.01, "peak {peak}");
    let n = cycles(&left);
    assert!((n as i64 - 220).abs() <= 1, "fundamental {n} Hz");
}

#[test]
fn beat_splits_the_channels() {
    let t = track(json!({
        "global_settings": { "sample_rate": 44100, "crossfade_duration": 0.0 },
        "steps": [{
            "duration": 1.0,
            "voices": [{
                "synth_function": "binaural_beat",
                "parameters": { "baseFreq": 200.0, "beatFreq": 10.0, "ampL": 1.0, "ampR": 1.0 }
            }]
        }]
    }));
    let mut sched = TrackScheduler::new(t, 44100);
    let out = render(&mut sched, 44100);

    let left = cycles(&channel(&out, 0));
    let right = cycles(&channel(&out, 1));
    assert!((left as i64 - 195).abs() <= 1, "left {left} Hz");
    assert!((right as i64 - 205).abs() <= 1, "right {right} Hz");
}

#[test]
fn transition_ramps_the_beat_linearly() {
    let t = track(json!({
        "global_settings": { "sample_rate": 44100, "crossfade_duration": 0.0 },
        "steps": [{
            "duration": 2.0,
            "voices": [{
                "synth_function": "binaural_beat_transition",
                "is_transition": true,
                "parameters": {
                    "baseFreq": 200.0,
                    "startBeatFreq": 4.0,
                    "endBeatFreq": 12.0,
                    "ampL": 1.0,
                    "ampR": 1.0
                }
            }]
        }]
    }));
    let mut sched = TrackScheduler::new(t, 44100);
    let out = render(&mut sched, 88200);
    let left = channel(&out, 0);
    let right = channel(&out, 1);

    // The instantaneous L-R split integrates to the mean beat per window:
    // 6 Hz over the first second, 10 Hz over the second.
    let first = cycles(&right[..44100]) as i64 - cycles(&left[..44100]) as i64;
    let second = cycles(&right[44100..]) as i64 - cycles(&left[44100..]) as i64;
    assert!((first - 6).abs() <= 3, "first-second beat {first}");
    assert!((second - 10).abs() <= 3, "second-second beat {second}");
}

#[test]
fn isochronic_gating_repeats_per_cycle() {
    let fs = 44100usize;
    let t = track(json!({
        "global_settings": { "sample_rate": 44100, "crossfade_duration": 0.0 },
        "steps": [{
            "duration": 1.0,
            "voices": [{
                "synth_function": "isochronic_tone",
                "parameters": {
                    "baseFreq": 440.0,
                    "beatFreq": 5.0,
                    "rampPercent": 0.1,
                    "gapPercent": 0.0,
                    "ampL": 1.0,
                    "ampR": 1.0
                }
            }]
        }]
    }));
    let mut sched = TrackScheduler::new(t, 44100);
    let out = render(&mut sched, fs);
    let left = channel(&out, 0);

    // Five trapezoid cycles of 0.2 s each; every cycle carries the same
    // energy within 1%.
    let cycle = fs / 5;
    let rms_values: Vec<f32> = (0..5).map(|c| rms(&left[c * cycle..(c + 1) * cycle])).collect();
    let mean = rms_values.iter().sum::<f32>() / 5.0;
    for r in &rms_values {
        assert!((r - mean).abs() / mean < 0.01, "cycle rms {r} vs {mean}");
    }

    // The ramp pulls the envelope to zero at every cycle boundary.
    for c in 1..5 {
        let idx = c * cycle;
        let boundary_peak = left[idx.saturating_sub(8)..idx + 8]
            .iter()
            .fold(0.0f32, |m, v| m.max(v.abs()));
        assert!(boundary_peak < 0.1 * STEP_GAIN, "boundary peak {boundary_peak}");
    }
}

#[test]
fn crossfade_hands_over_between_pitches() {
    let fs = 8000usize;
    let t = track(json!({
        "global_settings": {
            "sample_rate": 8000,
            "crossfade_duration": 0.5,
            "crossfade_curve": "linear"
        },
        "steps": [
            {
                "duration": 1.0,
                "voices": [{
                    "synth_function": "binaural_beat",
                    "parameters": { "baseFreq": 220.0, "beatFreq": 0.0, "ampL": 1.0, "ampR": 1.0 }
                }]
            },
            {
                "duration": 1.0,
                "voices": [{
                    "synth_function": "binaural_beat",
                    "parameters": { "baseFreq": 440.0, "beatFreq": 0.0, "ampL": 1.0, "ampR": 1.0 }
                }]
            }
        ]
    }));
    let mut sched = TrackScheduler::new(t, 8000);
    let out = render(&mut sched, fs * 2);
    let left = channel(&out, 0);

    // Before the fade starts only the low tone plays.
    let pre = cycles(&left[..fs / 4]);
    assert!((pre as f32 - 55.0).abs() <= 2.0, "pre-fade {pre} cycles");

    // Well after the handover only the high tone remains. Step B's clock
    // started at the fade, so its solo region sits around 1.1-1.4 s.
    let tail = &left[(fs * 11) / 10..(fs * 14) / 10];
    let post = cycles(tail);
    let expected = 440.0 * tail.len() as f32 / fs as f32;
    assert!((post as f32 - expected).abs() <= 3.0, "post-fade {post} cycles");

    // The fade keeps the signal bounded by the sum of both step gains.
    let peak = left.iter().fold(0.0f32, |m, v| m.max(v.abs()));
    assert!(peak <= 2.0 * STEP_GAIN + 1e-3, "peak {peak}");
}

#[test]
fn noise_voice_renders_bounded_stereo_noise() {
    let t = track(json!({
        "global_settings": { "sample_rate": 8000, "crossfade_duration": 0.0 },
        "steps": [{
            "duration": 2.0,
            "voices": [{
                "synth_function": "noise_swept_notch",
                "voice_type": "noise",
                "parameters": {
                    "amp": 1.0,
                    "duration_seconds": 2.0,
                    "exponent": 1.0,
                    "lowcut": 100.0,
                    "highcut": 3000.0,
                    "seed": 5
                }
            }]
        }]
    }));
    let mut sched = TrackScheduler::new(t, 8000);
    let out = render(&mut sched, 16000);

    assert!(out.iter().all(|s| s.is_finite()));
    let tail = &out[out.len() / 2..];
    let level = rms(tail);
    assert!(level > 0.01, "noise collapsed: rms {level}");
    // Calibrated peak keeps the normalised group under its target.
    let peak = out.iter().fold(0.0f32, |m, v| m.max(v.abs()));
    assert!(peak <= 1.0, "peak {peak}");
}

#[test]
fn background_noise_fades_in_under_the_voices() {
    let fs = 8000usize;
    let t = track(json!({
        "global_settings": { "sample_rate": 8000, "crossfade_duration": 0.0 },
        "steps": [{ "duration": 2.0, "voices": [] }],
        "background_noise": {
            "gain": 0.5,
            "start_time": 0.0,
            "fade_in": 1.0,
            "params": { "duration_seconds": 2.0, "exponent": 1.0, "seed": 9 }
        }
    }));
    let mut sched = TrackScheduler::new(t, 8000);
    let out = render(&mut sched, fs * 2);

    let early = rms(&channel(&out[..fs / 8 * 2], 0));
    let late = rms(&channel(&out[fs * 2..fs * 3], 0));
    assert!(early < late, "fade-in not rising: early {early} late {late}");
    assert!(out.iter().all(|s| s.is_finite()));
}

#[test]
fn compatible_update_keeps_the_stream_alive() {
    let base = json!({
        "global_settings": { "sample_rate": 8000, "crossfade_duration": 0.0 },
        "steps": [{
            "duration": 4.0,
            "voices": [{
                "synth_function": "binaural_beat",
                "parameters": { "baseFreq": 220.0, "beatFreq": 0.0, "ampL": 1.0, "ampR": 1.0 }
            }]
        }],
        "background_noise": {
            "gain": 0.3,
            "params": {
                "duration_seconds": 4.0,
                "exponent": 1.0,
                "seed": 2,
                "lfo_freq": 0.5,
                "sweeps": [{
                    "start_min": 500.0, "start_max": 1500.0,
                    "start_q": 15.0, "start_casc": 3
                }]
            }
        }
    });
    let mut sched = TrackScheduler::new(track(base.clone()), 8000);
    let _ = render(&mut sched, 8000);

    // Retune the sweep within the allocated shape mid-flight.
    let mut updated = base;
    updated["background_noise"]["params"]["sweeps"][0]["start_q"] = json!(25.0);
    sched.update_track(track(updated));

    let out = render(&mut sched, 8000);
    assert!(out.iter().all(|s| s.is_finite()));
    assert!(rms(&channel(&out, 0)) > 0.001, "stream died after update");
}

#[test]
fn volume_envelope_shapes_the_step() {
    let fs = 8000usize;
    let t = track(json!({
        "global_settings": { "sample_rate": 8000, "crossfade_duration": 0.0 },
        "steps": [{
            "duration": 1.0,
            "voices": [{
                "synth_function": "binaural_beat",
                "parameters": { "baseFreq": 220.0, "beatFreq": 0.0, "ampL": 1.0, "ampR": 1.0 },
                "volume_envelope": [[0.0, 0.0], [1.0, 1.0]]
            }]
        }]
    }));
    let mut sched = TrackScheduler::new(t, 8000);
    let out = render(&mut sched, fs);
    let left = channel(&out, 0);

    let early = rms(&left[..fs / 4]);
    let late = rms(&left[(fs * 3) / 4..]);
    assert!(early < late * 0.5, "envelope not rising: {early} vs {late}");
}
