use crate::command::Command;
use crate::config::CONFIG;
use crate::models::{BackgroundNoiseData, StepData, TrackData, VoiceGroup};
use crate::noise::StreamingNoise;
use crate::voices::{apply_phases, harvest_phases, voices_for_step, StepVoice};

/// Per-sample stereo synthesis contract shared by every voice.
pub trait Voice: Send + Sync {
    /// Additively mix into an interleaved stereo buffer of `2 * frames`.
    fn process(&mut self, output: &mut [f32]);
    fn is_finished(&self) -> bool;
}

#[derive(Clone, Copy)]
pub enum CrossfadeCurve {
    Linear,
    EqualPower,
}

impl CrossfadeCurve {
    fn from_str(s: &str) -> Self {
        match s {
            "equal_power" => CrossfadeCurve::EqualPower,
            _ => CrossfadeCurve::Linear,
        }
    }

    fn gains(self, ratio: f32) -> (f32, f32) {
        match self {
            CrossfadeCurve::Linear => (1.0 - ratio, ratio),
            CrossfadeCurve::EqualPower => {
                let theta = ratio * std::f32::consts::FRAC_PI_2;
                (
                    crate::dsp::trig::cos_lut(theta),
                    crate::dsp::trig::sin_lut(theta),
                )
            }
        }
    }
}

/// Two adjacent steps carry the same voices when every slot matches in
/// synth tag, parameters, transition flag and mixdown group. Such steps
/// hand their oscillator phases across the boundary instead of
/// crossfading.
fn steps_have_continuous_voices(a: &StepData, b: &StepData) -> bool {
    if a.voices.len() != b.voices.len() {
        return false;
    }
    for (va, vb) in a.voices.iter().zip(&b.voices) {
        if va.synth_function_name != vb.synth_function_name
            || va.params != vb.params
            || va.is_transition != vb.is_transition
            || va.group() != vb.group()
        {
            return false;
        }
    }
    true
}

pub struct BackgroundNoise {
    config: BackgroundNoiseData,
    generator: StreamingNoise,
    gain: f32,
    start_sample: usize,
    fade_in_samples: usize,
    fade_out_samples: usize,
    /// usize::MAX when the noise has no configured duration and runs for
    /// the whole track.
    duration_samples: usize,
    envelope: Vec<[f64; 2]>,
    playback_sample: usize,
}

impl BackgroundNoise {
    fn from_config(config: &BackgroundNoiseData, sample_rate: f32) -> Option<Self> {
        let params = if !config.file_path.is_empty() && config.file_path.ends_with(".noise") {
            match crate::noise_params::load_noise_params(&config.file_path) {
                Ok(p) => Some(p),
                Err(e) => {
                    log::warn!("failed to load noise params '{}': {e}", config.file_path);
                    None
                }
            }
        } else {
            config.params.clone()
        }?;

        let generator = StreamingNoise::new(&params, sample_rate as u32);
        let duration_samples = if params.duration_seconds > 0.0 {
            (params.duration_seconds as f64 * sample_rate as f64) as usize
        } else {
            usize::MAX
        };
        let mut envelope = config.amp_envelope.clone().unwrap_or_default();
        envelope.sort_by(|a, b| a[0].partial_cmp(&b[0]).unwrap_or(std::cmp::Ordering::Equal));

        Some(Self {
            config: config.clone(),
            generator,
            gain: config.amp,
            start_sample: (config.start_time * sample_rate as f64) as usize,
            fade_in_samples: (config.fade_in * sample_rate as f64) as usize,
            fade_out_samples: (config.fade_out * sample_rate as f64) as usize,
            duration_samples,
            envelope,
            playback_sample: 0,
        })
    }

    /// Envelope value at `sample`, linearly interpolated between the user
    /// control points, terminal values held outside.
    fn envelope_at(&self, sample: usize, sample_rate: f32) -> f32 {
        if self.envelope.is_empty() {
            return 1.0;
        }
        let t = sample as f64 / sample_rate as f64;
        let first = self.envelope[0];
        let last = self.envelope[self.envelope.len() - 1];
        if t <= first[0] {
            return first[1] as f32;
        }
        if t >= last[0] {
            return last[1] as f32;
        }
        for pair in self.envelope.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            if t <= b[0] {
                let span = b[0] - a[0];
                let v = if span > 0.0 {
                    a[1] + (b[1] - a[1]) * (t - a[0]) / span
                } else {
                    b[1]
                };
                return v as f32;
            }
        }
        last[1] as f32
    }

    fn fade_gain(&self, sample: usize) -> f32 {
        let mut g = 1.0f32;
        if self.fade_in_samples > 0 && sample < self.fade_in_samples {
            g *= sample as f32 / self.fade_in_samples as f32;
        }
        if self.fade_out_samples > 0 && self.duration_samples != usize::MAX {
            let fade_out_start = self.duration_samples.saturating_sub(self.fade_out_samples);
            if sample >= fade_out_start {
                let into = sample - fade_out_start;
                g *= 1.0 - (into as f32 / self.fade_out_samples as f32).min(1.0);
            }
        }
        g
    }

    /// Realign after a hard seek: the generator is advanced to where the
    /// absolute position lands inside the noise timeline.
    fn realign(&mut self, absolute_sample: usize) {
        self.playback_sample = 0;
        if absolute_sample > self.start_sample {
            let skip = (absolute_sample - self.start_sample).min(match self.duration_samples {
                usize::MAX => absolute_sample - self.start_sample,
                d => d,
            });
            self.generator.skip_samples(skip);
            self.playback_sample = skip;
        }
    }
}

pub struct TrackScheduler {
    pub track: TrackData,
    pub current_sample: usize,
    pub current_step: usize,
    pub active_voices: Vec<StepVoice>,
    pub next_voices: Vec<StepVoice>,
    pub sample_rate: f32,
    pub crossfade_samples: usize,
    pub current_crossfade_samples: usize,
    pub crossfade_curve: CrossfadeCurve,
    pub crossfade_envelope: Vec<f32>,
    crossfade_prev: Vec<f32>,
    crossfade_next: Vec<f32>,
    group_scratch: Vec<f32>,
    pub next_step_sample: usize,
    pub crossfade_active: bool,
    pub absolute_sample: u64,
    /// Whether playback is paused
    pub paused: bool,
    pub background_noise: Option<BackgroundNoise>,
    pub scratch: Vec<f32>,
    pub master_gain: f32,
    pub voice_gain: f32,
    pub noise_gain: f32,
    /// Realtime override of the normalisation target; step and global
    /// levels apply when None.
    normalization_override: Option<f32>,
    /// Oscillator phases harvested at the last step boundary, consumed by
    /// the next step's voices in slot order.
    accumulated_phases: Vec<(f32, f32)>,
}

impl TrackScheduler {
    pub fn new(track: TrackData, device_rate: u32) -> Self {
        Self::new_with_start(track, device_rate, 0.0)
    }

    pub fn new_with_start(track: TrackData, device_rate: u32, start_time: f64) -> Self {
        let sample_rate = device_rate as f32;
        let crossfade_samples =
            (track.global_settings.crossfade_duration * sample_rate as f64) as usize;
        let crossfade_curve = CrossfadeCurve::from_str(&track.global_settings.crossfade_curve);
        let background_noise = track
            .background_noise
            .as_ref()
            .and_then(|cfg| BackgroundNoise::from_config(cfg, sample_rate));

        let cfg = &CONFIG;
        let mut sched = Self {
            track,
            current_sample: 0,
            current_step: 0,
            active_voices: Vec::new(),
            next_voices: Vec::new(),
            sample_rate,
            crossfade_samples,
            current_crossfade_samples: 0,
            crossfade_curve,
            crossfade_envelope: Vec::new(),
            crossfade_prev: Vec::new(),
            crossfade_next: Vec::new(),
            group_scratch: Vec::new(),
            next_step_sample: 0,
            crossfade_active: false,
            absolute_sample: 0,
            paused: false,
            background_noise,
            scratch: Vec::new(),
            master_gain: cfg.master_gain,
            voice_gain: cfg.voice_gain,
            noise_gain: cfg.noise_gain,
            normalization_override: None,
            accumulated_phases: Vec::new(),
        };

        if start_time > 0.0 {
            let start_samples = (start_time * sample_rate as f64) as usize;
            sched.seek_samples(start_samples);
        }
        sched
    }

    pub fn total_samples(&self) -> usize {
        self.track
            .steps
            .iter()
            .map(|s| (s.duration * self.sample_rate as f64) as usize)
            .sum()
    }

    fn seek_samples(&mut self, abs_samples: usize) {
        // Seeks past the end clamp to the end of the last step.
        let abs_samples = abs_samples.min(self.total_samples());
        self.absolute_sample = abs_samples as u64;

        let mut remaining = abs_samples;
        self.current_step = self.track.steps.len();
        self.current_sample = 0;
        for (idx, step) in self.track.steps.iter().enumerate() {
            let step_samples = (step.duration * self.sample_rate as f64) as usize;
            if remaining < step_samples {
                self.current_step = idx;
                self.current_sample = remaining;
                break;
            }
            remaining = remaining.saturating_sub(step_samples);
        }

        // Hard seeks restart oscillators from phase zero; the resulting
        // discontinuity is accepted.
        self.active_voices.clear();
        self.next_voices.clear();
        self.accumulated_phases.clear();
        self.crossfade_active = false;
        self.current_crossfade_samples = 0;
        self.next_step_sample = 0;
        self.crossfade_envelope.clear();

        if let Some(noise) = &mut self.background_noise {
            noise.realign(abs_samples);
        }
    }

    /// Replace the current track data while preserving playback progress.
    /// A compatible background-noise config keeps its generator alive (and
    /// is retuned in place when possible); anything else is rebuilt.
    pub fn update_track(&mut self, track: TrackData) {
        let abs_samples = self.absolute_sample as usize;

        self.crossfade_samples =
            (track.global_settings.crossfade_duration * self.sample_rate as f64) as usize;
        self.crossfade_curve = CrossfadeCurve::from_str(&track.global_settings.crossfade_curve);

        let reuse_noise = match (&self.background_noise, &track.background_noise) {
            (Some(existing), Some(new_cfg)) => existing.config.is_compatible_with(new_cfg),
            (None, None) => true,
            _ => false,
        };

        if reuse_noise {
            let mut rebuild = false;
            if let (Some(noise), Some(new_cfg)) =
                (&mut self.background_noise, &track.background_noise)
            {
                noise.gain = new_cfg.amp;
                if let Some(params) = &new_cfg.params {
                    rebuild = !noise.generator.update_realtime_params(params);
                }
                if !rebuild {
                    noise.config = new_cfg.clone();
                }
            }
            if rebuild {
                log::warn!("noise update incompatible with allocated sweeps; rebuilding");
                self.background_noise = track
                    .background_noise
                    .as_ref()
                    .and_then(|cfg| BackgroundNoise::from_config(cfg, self.sample_rate));
                if let Some(noise) = &mut self.background_noise {
                    noise.realign(abs_samples);
                }
            }
        } else {
            self.background_noise = track
                .background_noise
                .as_ref()
                .and_then(|cfg| BackgroundNoise::from_config(cfg, self.sample_rate));
            if let Some(noise) = &mut self.background_noise {
                noise.realign(abs_samples);
            }
        }

        self.track = track;

        // Voices rebuild on the next block; their phases are carried over
        // so an update that keeps a step's oscillators does not click.
        self.accumulated_phases = harvest_phases(&self.active_voices);

        // Re-derive the step position.
        let mut remaining = abs_samples.min(self.total_samples());
        self.current_step = self.track.steps.len();
        self.current_sample = 0;
        for (idx, step) in self.track.steps.iter().enumerate() {
            let step_samples = (step.duration * self.sample_rate as f64) as usize;
            if remaining < step_samples {
                self.current_step = idx;
                self.current_sample = remaining;
                break;
            }
            remaining = remaining.saturating_sub(step_samples);
        }
        self.active_voices.clear();
        self.next_voices.clear();
        self.crossfade_active = false;
        self.current_crossfade_samples = 0;
        self.next_step_sample = 0;
        self.crossfade_envelope.clear();
    }

    pub fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::UpdateTrack(t) => self.update_track(*t),
            Command::SetPaused(p) => {
                if p {
                    self.pause();
                } else {
                    self.resume();
                }
            }
            Command::StartFrom(time) => {
                let samples = (time.max(0.0) * self.sample_rate as f64) as usize;
                self.seek_samples(samples);
            }
            Command::SetMasterGain(g) => self.master_gain = g.max(0.0),
            Command::SetBinauralGain(g) => self.voice_gain = g.max(0.0),
            Command::SetNoiseGain(g) => self.noise_gain = g.max(0.0),
            Command::SetNormalizationLevel(level) => {
                self.normalization_override = if level > 0.0 {
                    Some(level.min(1.0))
                } else {
                    None
                };
            }
        }
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn current_step_index(&self) -> usize {
        self.current_step
    }

    pub fn elapsed_samples(&self) -> u64 {
        self.absolute_sample
    }

    fn normalization_level_for(&self, step: &StepData) -> f32 {
        if let Some(level) = self.normalization_override {
            return level;
        }
        match step.normalization_level {
            Some(level) if level > 0.0 => level.min(1.0),
            _ => self.track.global_settings.normalization_target(),
        }
    }

    /// Grouped mixdown of one step's voices into `out`. Each group is
    /// rendered into a shared scratch, attenuated to its normalisation
    /// target (never boosted) and scaled by the step volume for the group.
    fn mix_step_voices(
        voices: &mut [StepVoice],
        step: &StepData,
        norm_level: f32,
        group_scratch: &mut Vec<f32>,
        out: &mut [f32],
    ) {
        if group_scratch.len() != out.len() {
            group_scratch.resize(out.len(), 0.0);
        }
        for group in [VoiceGroup::Binaural, VoiceGroup::Noise, VoiceGroup::Other] {
            let mut peak = 0.0f32;
            let mut any = false;
            group_scratch.fill(0.0);
            for sv in voices.iter_mut().filter(|sv| sv.group == group) {
                sv.voice.process(group_scratch);
                peak = peak.max(sv.voice.normalization_peak());
                any = true;
            }
            if !any {
                continue;
            }
            let norm_gain = if peak > 0.0 {
                (norm_level / peak).min(1.0)
            } else {
                1.0
            };
            let volume = match group {
                VoiceGroup::Noise => step.noise_gain(),
                _ => step.binaural_gain(),
            };
            let gain = norm_gain * volume;
            for (o, s) in out.iter_mut().zip(group_scratch.iter()) {
                *o += s * gain;
            }
        }
    }

    pub fn process_block(&mut self, buffer: &mut [f32]) {
        let frame_count = buffer.len() / 2;
        buffer.fill(0.0);

        if self.paused {
            return;
        }
        if self.current_step >= self.track.steps.len() {
            return;
        }

        if self.active_voices.is_empty() && !self.crossfade_active {
            let step = &self.track.steps[self.current_step];
            self.active_voices = voices_for_step(step, self.sample_rate);
            apply_phases(&mut self.active_voices, &self.accumulated_phases);
            self.accumulated_phases.clear();
        }

        // Crossfade is only armed when the next step carries different
        // voices; continuous steps hand their phases over instead.
        if !self.crossfade_active
            && self.crossfade_samples > 0
            && self.current_step + 1 < self.track.steps.len()
        {
            let step = &self.track.steps[self.current_step];
            let next_step = &self.track.steps[self.current_step + 1];
            if !steps_have_continuous_voices(step, next_step) {
                let step_samples = (step.duration * self.sample_rate as f64) as usize;
                let fade_len = self.crossfade_samples.min(step_samples);
                if self.current_sample >= step_samples.saturating_sub(fade_len) {
                    self.next_voices = voices_for_step(next_step, self.sample_rate);
                    self.crossfade_active = true;
                    self.next_step_sample = 0;
                    let next_samples = (next_step.duration * self.sample_rate as f64) as usize;
                    self.current_crossfade_samples =
                        self.crossfade_samples.min(step_samples).min(next_samples);
                    self.crossfade_envelope = if self.current_crossfade_samples <= 1 {
                        vec![0.0; self.current_crossfade_samples]
                    } else {
                        (0..self.current_crossfade_samples)
                            .map(|i| i as f32 / (self.current_crossfade_samples - 1) as f32)
                            .collect()
                    };
                }
            }
        }

        if self.crossfade_active {
            let len = buffer.len();
            let frames = frame_count;
            if self.crossfade_prev.len() != len {
                self.crossfade_prev.resize(len, 0.0);
            }
            if self.crossfade_next.len() != len {
                self.crossfade_next.resize(len, 0.0);
            }
            self.crossfade_prev.fill(0.0);
            self.crossfade_next.fill(0.0);

            let cur_level = self.normalization_level_for(&self.track.steps[self.current_step]);
            let next_level =
                self.normalization_level_for(&self.track.steps[self.current_step + 1]);
            Self::mix_step_voices(
                &mut self.active_voices,
                &self.track.steps[self.current_step],
                cur_level,
                &mut self.group_scratch,
                &mut self.crossfade_prev,
            );
            Self::mix_step_voices(
                &mut self.next_voices,
                &self.track.steps[self.current_step + 1],
                next_level,
                &mut self.group_scratch,
                &mut self.crossfade_next,
            );

            for i in 0..frames {
                let idx = i * 2;
                let progress = self.next_step_sample + i;
                if progress < self.current_crossfade_samples {
                    let ratio = if progress < self.crossfade_envelope.len() {
                        self.crossfade_envelope[progress]
                    } else {
                        progress as f32 / (self.current_crossfade_samples - 1) as f32
                    };
                    let (g_out, g_in) = self.crossfade_curve.gains(ratio);
                    buffer[idx] =
                        self.crossfade_prev[idx] * g_out + self.crossfade_next[idx] * g_in;
                    buffer[idx + 1] =
                        self.crossfade_prev[idx + 1] * g_out + self.crossfade_next[idx + 1] * g_in;
                } else {
                    buffer[idx] = self.crossfade_next[idx];
                    buffer[idx + 1] = self.crossfade_next[idx + 1];
                }
            }

            self.current_sample += frames;
            self.next_step_sample += frames;

            if self.next_step_sample >= self.current_crossfade_samples {
                // The incoming voices stay live across the switch; their
                // phases become the accumulated set for the step after.
                self.accumulated_phases = harvest_phases(&self.next_voices);
                self.current_step += 1;
                self.current_sample = self.next_step_sample;
                self.next_step_sample = 0;
                self.active_voices = std::mem::take(&mut self.next_voices);
                self.active_voices.retain(|sv| !sv.voice.is_finished());
                self.crossfade_active = false;
                self.crossfade_envelope.clear();
                self.current_crossfade_samples = 0;
            }
        } else {
            let cur_level = self.normalization_level_for(&self.track.steps[self.current_step]);
            Self::mix_step_voices(
                &mut self.active_voices,
                &self.track.steps[self.current_step],
                cur_level,
                &mut self.group_scratch,
                buffer,
            );

            self.current_sample += frame_count;
            let step_samples =
                (self.track.steps[self.current_step].duration * self.sample_rate as f64) as usize;
            if self.current_sample >= step_samples {
                self.accumulated_phases = harvest_phases(&self.active_voices);
                self.current_step += 1;
                // Carry the block overshoot so the absolute timeline stays
                // aligned with the step durations.
                self.current_sample -= step_samples;
                self.active_voices.clear();
            } else {
                self.active_voices.retain(|sv| !sv.voice.is_finished());
            }
        }

        for v in buffer.iter_mut() {
            *v *= self.voice_gain;
        }

        self.mix_background_noise(buffer, frame_count);

        if self.master_gain != 1.0 {
            for v in buffer.iter_mut() {
                *v *= self.master_gain;
            }
        }

        self.absolute_sample += frame_count as u64;
    }

    fn mix_background_noise(&mut self, buffer: &mut [f32], frames: usize) {
        let Some(noise) = &mut self.background_noise else {
            return;
        };
        let block_start = self.absolute_sample as usize;
        if block_start + frames <= noise.start_sample {
            return;
        }
        if noise.playback_sample >= noise.duration_samples {
            return;
        }

        // First frame of this block that the noise covers.
        let offset = noise.start_sample.saturating_sub(block_start);
        let frames_avail = frames - offset;
        let frames_left = noise.duration_samples - noise.playback_sample;
        let gen_frames = frames_avail.min(frames_left);
        if gen_frames == 0 {
            return;
        }

        if self.scratch.len() < gen_frames * 2 {
            self.scratch.resize(gen_frames * 2, 0.0);
        }
        let scratch = &mut self.scratch[..gen_frames * 2];
        scratch.fill(0.0);
        noise.generator.generate(scratch);

        let sample_rate = self.sample_rate;
        let noise_gain = self.noise_gain;
        for i in 0..gen_frames {
            let pos = noise.playback_sample + i;
            let g = noise.gain * noise.fade_gain(pos) * noise.envelope_at(pos, sample_rate) * noise_gain;
            buffer[(offset + i) * 2] += scratch[i * 2] * g;
            buffer[(offset + i) * 2 + 1] += scratch[i * 2 + 1] * g;
        }
        noise.playback_sample += gen_frames;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tone_step(duration: f64, freq: f64, amp: f64) -> serde_json::Value {
        json!({
            "duration": duration,
            "voices": [{
                "synth_function": "binaural_beat",
                "parameters": {
                    "baseFreq": freq,
                    "beatFreq": 0.0,
                    "ampL": amp,
                    "ampR": amp
                }
            }]
        })
    }

    fn track_from(steps: Vec<serde_json::Value>, settings: serde_json::Value) -> TrackData {
        serde_json::from_value(json!({
            "global_settings": settings,
            "steps": steps
        }))
        .unwrap()
    }

    #[test]
    fn fade_curve_gain_identities() {
        let samples = 64;
        for i in 0..samples {
            let ratio = i as f32 / (samples - 1) as f32;
            let (g_out, g_in) = CrossfadeCurve::Linear.gains(ratio);
            assert!((g_out + g_in - 1.0).abs() < 1e-6);
            let (g_out, g_in) = CrossfadeCurve::EqualPower.gains(ratio);
            assert!((g_out * g_out + g_in * g_in - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn continuity_check_compares_slots() {
        let a: StepData = serde_json::from_value(tone_step(1.0, 220.0, 1.0)).unwrap();
        let b: StepData = serde_json::from_value(tone_step(2.0, 220.0, 1.0)).unwrap();
        // Duration may differ; the voices are what matters.
        assert!(steps_have_continuous_voices(&a, &b));

        let c: StepData = serde_json::from_value(tone_step(1.0, 440.0, 1.0)).unwrap();
        assert!(!steps_have_continuous_voices(&a, &c));
    }

    #[test]
    fn volume_clamp_bounds_the_output_peak() {
        // amp 1.0 voice with binaural_volume 0.9: the step volume clamps to
        // 0.6 and the normalisation target is 0.95, so the output peak must
        // sit just below 0.6 * 0.95.
        let mut steps = vec![tone_step(0.2, 220.0, 1.0)];
        steps[0]["binaural_volume"] = json!(0.9);
        let track = track_from(steps, json!({ "sample_rate": 8000, "crossfade_duration": 0.0 }));
        let mut sched = TrackScheduler::new(track, 8000);

        let mut buf = vec![0.0f32; 512 * 2];
        let mut peak = 0.0f32;
        for _ in 0..3 {
            sched.process_block(&mut buf);
            peak = buf.iter().fold(peak, |m, v| m.max(v.abs()));
        }
        assert!(peak <= 0.6 * 0.95 + 1e-4, "peak {peak}");
        assert!(peak > 0.5, "peak {peak}");
    }

    #[test]
    fn phase_continuity_across_identical_steps() {
        // Two identical steps, no crossfade configured: the oscillator
        // phase must carry over so the waveform has no seam.
        let steps = vec![tone_step(0.1, 220.0, 1.0), tone_step(0.1, 220.0, 1.0)];
        let track = track_from(steps, json!({ "sample_rate": 8000, "crossfade_duration": 0.0 }));
        let mut sched = TrackScheduler::new(track, 8000);

        let frames = 160;
        let total = 1600;
        let mut left = Vec::new();
        let mut buf = vec![0.0f32; frames * 2];
        for _ in 0..total / frames {
            sched.process_block(&mut buf);
            for i in 0..frames {
                left.push(buf[i * 2]);
            }
        }
        // Max per-sample increment of a 220 Hz sine at 8 kHz, scaled by the
        // step gain, plus headroom.
        let max_delta = 2.0 * std::f32::consts::PI * 220.0 / 8000.0 * 0.6 + 0.02;
        for i in 1..left.len() {
            assert!(
                (left[i] - left[i - 1]).abs() <= max_delta,
                "seam at {i}: {} -> {}",
                left[i - 1],
                left[i]
            );
        }
    }

    #[test]
    fn crossfade_runs_between_different_steps() {
        let steps = vec![tone_step(1.0, 220.0, 1.0), tone_step(1.0, 440.0, 1.0)];
        let track = track_from(
            steps,
            json!({ "sample_rate": 8000, "crossfade_duration": 0.5, "crossfade_curve": "linear" }),
        );
        let mut sched = TrackScheduler::new(track, 8000);
        let mut buf = vec![0.0f32; 400 * 2];

        // Walk into the crossfade window.
        for _ in 0..15 {
            sched.process_block(&mut buf);
        }
        assert!(sched.crossfade_active);
        // Finish it: step index advances, fade state clears.
        for _ in 0..10 {
            sched.process_block(&mut buf);
        }
        assert_eq!(sched.current_step, 1);
        assert!(!sched.crossfade_active);
    }

    #[test]
    fn seek_is_idempotent_within_a_block() {
        let steps = vec![tone_step(1.0, 220.0, 1.0), tone_step(1.0, 330.0, 1.0)];
        let track = track_from(steps, json!({ "sample_rate": 8000, "crossfade_duration": 0.0 }));
        let mut sched = TrackScheduler::new(track, 8000);

        sched.handle_command(Command::StartFrom(1.5));
        assert_eq!(sched.current_step, 1);
        assert_eq!(sched.current_sample, 4000);
        assert_eq!(sched.absolute_sample, 12000);

        let mut buf = vec![0.0f32; 256 * 2];
        sched.process_block(&mut buf);
        sched.handle_command(Command::StartFrom(1.5));
        assert_eq!(sched.absolute_sample, 12000);
        assert_eq!(sched.current_step, 1);
        assert_eq!(sched.current_sample, 4000);
    }

    #[test]
    fn seek_past_end_clamps() {
        let steps = vec![tone_step(1.0, 220.0, 1.0)];
        let track = track_from(steps, json!({ "sample_rate": 8000 }));
        let mut sched = TrackScheduler::new(track, 8000);
        sched.handle_command(Command::StartFrom(99.0));
        assert_eq!(sched.absolute_sample, 8000);

        let mut buf = vec![0.0f32; 64 * 2];
        sched.process_block(&mut buf);
        assert!(buf.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn track_length_matches_step_sum() {
        let steps = vec![tone_step(0.25, 220.0, 1.0), tone_step(0.5, 330.0, 1.0)];
        let track = track_from(steps, json!({ "sample_rate": 8000, "crossfade_duration": 0.0 }));
        let mut sched = TrackScheduler::new(track, 8000);
        assert_eq!(sched.total_samples(), 6000);

        let frames = 128;
        let mut buf = vec![0.0f32; frames * 2];
        let mut produced = 0usize;
        loop {
            sched.process_block(&mut buf);
            if buf.iter().all(|&s| s == 0.0) {
                break;
            }
            produced += frames;
            assert!(produced < 20000, "no end of stream");
        }
        let expected = sched.total_samples();
        assert!(
            (produced as i64 - expected as i64).unsigned_abs() as usize <= frames,
            "produced {produced}, expected {expected}"
        );
    }

    #[test]
    fn gain_commands_apply() {
        let steps = vec![tone_step(1.0, 220.0, 1.0)];
        let track = track_from(steps, json!({ "sample_rate": 8000, "crossfade_duration": 0.0 }));
        let mut sched = TrackScheduler::new(track, 8000);
        sched.handle_command(Command::SetMasterGain(0.5));
        sched.handle_command(Command::SetBinauralGain(0.5));

        let mut buf = vec![0.0f32; 512 * 2];
        sched.process_block(&mut buf);
        sched.process_block(&mut buf);
        let peak = buf.iter().fold(0.0f32, |m, v| m.max(v.abs()));
        // 0.95 norm * 0.6 volume * 0.5 voice * 0.5 master
        assert!(peak <= 0.95 * 0.6 * 0.25 + 1e-4);
        assert!(peak > 0.1);
    }

    #[test]
    fn paused_scheduler_emits_silence_and_holds_position() {
        let steps = vec![tone_step(1.0, 220.0, 1.0)];
        let track = track_from(steps, json!({ "sample_rate": 8000 }));
        let mut sched = TrackScheduler::new(track, 8000);
        sched.handle_command(Command::SetPaused(true));

        let mut buf = vec![0.5f32; 128 * 2];
        sched.process_block(&mut buf);
        assert!(buf.iter().all(|&s| s == 0.0));
        assert_eq!(sched.elapsed_samples(), 0);
        assert!(sched.is_paused());
    }
}
