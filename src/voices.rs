use serde_json::Value;
use std::collections::HashMap;

use crate::dsp::trig::sin_lut;
use crate::dsp::{
    build_volume_envelope, pan2, skewed_sine_phase, skewed_triangle_phase, trapezoid_envelope,
};
use crate::models::{StepData, VoiceData, VoiceGroup};
use crate::noise::StreamingNoise;
use crate::noise_params::NoiseParams;
use crate::scheduler::Voice;

const TWO_PI: f32 = 2.0 * std::f32::consts::PI;

/// Strongly typed wrapper for all available voice implementations.
pub enum VoiceKind {
    BinauralBeat(BinauralBeatVoice),
    BinauralBeatTransition(BinauralBeatTransitionVoice),
    IsochronicTone(IsochronicToneVoice),
    IsochronicToneTransition(IsochronicToneTransitionVoice),
    NoiseSweptNotch(NoiseSweptNotchVoice),
    VolumeEnvelope(Box<VolumeEnvelopeVoice>),
}

/// A voice plus the mixdown group it is normalised under.
pub struct StepVoice {
    pub voice: VoiceKind,
    pub group: VoiceGroup,
}

fn get_f32(params: &HashMap<String, Value>, key: &str, default: f32) -> f32 {
    params
        .get(key)
        .and_then(|v| v.as_f64())
        .map(|v| v as f32)
        .unwrap_or(default)
}

fn get_bool(params: &HashMap<String, Value>, key: &str, default: bool) -> bool {
    params.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
}

#[derive(Clone, Copy)]
enum TransitionCurve {
    Linear,
    Logarithmic,
    Exponential,
}

impl TransitionCurve {
    fn from_str(s: &str) -> Self {
        match s {
            "logarithmic" => TransitionCurve::Logarithmic,
            "exponential" => TransitionCurve::Exponential,
            _ => TransitionCurve::Linear,
        }
    }

    fn apply(self, alpha: f32) -> f32 {
        match self {
            TransitionCurve::Linear => alpha,
            TransitionCurve::Logarithmic => 1.0 - (1.0 - alpha).powi(2),
            TransitionCurve::Exponential => alpha.powi(2),
        }
    }
}

#[derive(Clone, Copy)]
enum LfoShape {
    Sine,
    Triangle,
}

impl LfoShape {
    fn from_str(s: &str) -> Self {
        match s {
            "triangle" => LfoShape::Triangle,
            _ => LfoShape::Sine,
        }
    }

    fn eval(self, phase: f32, skew: f32) -> f32 {
        match self {
            LfoShape::Triangle => skewed_triangle_phase(phase, skew),
            LfoShape::Sine => skewed_sine_phase(phase, skew),
        }
    }
}

/// Transition progress in [0, 1]: flat before `initial_offset`, flat after
/// `duration - post_offset`, shaped by the curve in between.
fn transition_alpha(
    t: f32,
    duration: f32,
    initial_offset: f32,
    post_offset: f32,
    curve: TransitionCurve,
) -> f32 {
    let alpha = if t < initial_offset {
        0.0
    } else if t > duration - post_offset {
        1.0
    } else {
        let span = duration - initial_offset - post_offset;
        if span > 0.0 {
            (t - initial_offset) / span
        } else {
            1.0
        }
    };
    curve.apply(alpha.clamp(0.0, 1.0))
}

#[inline]
fn lerp(a: f32, b: f32, alpha: f32) -> f32 {
    a + (b - a) * alpha
}

/// Wrapper voice that applies a precomputed volume envelope to another voice.
pub struct VolumeEnvelopeVoice {
    inner: Box<VoiceKind>,
    envelope: Vec<f32>,
    env_peak: f32,
    idx: usize,
    temp_buf: Vec<f32>,
}

impl VolumeEnvelopeVoice {
    pub fn new(inner: Box<VoiceKind>, envelope: Vec<f32>) -> Self {
        let env_peak = envelope.iter().fold(0.0f32, |m, v| m.max(v.abs()));
        Self {
            inner,
            envelope,
            env_peak,
            idx: 0,
            temp_buf: Vec::new(),
        }
    }

    fn phases(&self) -> Option<(f32, f32)> {
        self.inner.phases()
    }

    fn set_phases(&mut self, left: f32, right: f32) {
        self.inner.set_phases(left, right);
    }

    fn normalization_peak(&self) -> f32 {
        self.inner.normalization_peak() * self.env_peak
    }
}

impl Voice for VolumeEnvelopeVoice {
    fn process(&mut self, output: &mut [f32]) {
        if self.temp_buf.len() != output.len() {
            self.temp_buf.resize(output.len(), 0.0);
        }
        self.temp_buf.fill(0.0);

        self.inner.process(&mut self.temp_buf);
        let frames = output.len() / 2;
        for i in 0..frames {
            let env = if self.idx < self.envelope.len() {
                self.envelope[self.idx]
            } else {
                *self.envelope.last().unwrap_or(&1.0)
            };
            output[i * 2] += self.temp_buf[i * 2] * env;
            output[i * 2 + 1] += self.temp_buf[i * 2 + 1] * env;
            if self.idx < self.envelope.len() {
                self.idx += 1;
            }
        }
    }

    fn is_finished(&self) -> bool {
        self.inner.is_finished() && self.idx >= self.envelope.len()
    }
}

pub struct BinauralBeatVoice {
    amp_l: f32,
    amp_r: f32,
    base_freq: f32,
    beat_freq: f32,
    force_mono: bool,
    left_high: bool,
    amp_osc_depth_l: f32,
    amp_osc_freq_l: f32,
    amp_osc_depth_r: f32,
    amp_osc_freq_r: f32,
    freq_osc_range_l: f32,
    freq_osc_freq_l: f32,
    freq_osc_range_r: f32,
    freq_osc_freq_r: f32,
    freq_osc_skew_l: f32,
    freq_osc_skew_r: f32,
    freq_osc_phase_offset_l: f32,
    freq_osc_phase_offset_r: f32,
    freq_osc_shape: LfoShape,
    amp_osc_phase_offset_l: f32,
    amp_osc_phase_offset_r: f32,
    amp_osc_skew_l: f32,
    amp_osc_skew_r: f32,
    phase_osc_freq: f32,
    phase_osc_range: f32,
    phase_l: f32,
    phase_r: f32,
    sample_rate: f32,
    remaining_samples: usize,
    sample_idx: usize,
}

impl BinauralBeatVoice {
    pub fn new(params: &HashMap<String, Value>, duration: f32, sample_rate: f32) -> Self {
        let total_samples = (duration * sample_rate) as usize;
        let start_phase_l = get_f32(params, "startPhaseL", 0.0);
        let start_phase_r = get_f32(params, "startPhaseR", 0.0);
        Self {
            amp_l: get_f32(params, "ampL", 0.5),
            amp_r: get_f32(params, "ampR", 0.5),
            base_freq: get_f32(params, "baseFreq", 200.0),
            beat_freq: get_f32(params, "beatFreq", 4.0),
            force_mono: get_bool(params, "forceMono", false),
            left_high: get_bool(params, "leftHigh", false),
            amp_osc_depth_l: get_f32(params, "ampOscDepthL", 0.0),
            amp_osc_freq_l: get_f32(params, "ampOscFreqL", 0.0),
            amp_osc_depth_r: get_f32(params, "ampOscDepthR", 0.0),
            amp_osc_freq_r: get_f32(params, "ampOscFreqR", 0.0),
            freq_osc_range_l: get_f32(params, "freqOscRangeL", 0.0),
            freq_osc_freq_l: get_f32(params, "freqOscFreqL", 0.0),
            freq_osc_range_r: get_f32(params, "freqOscRangeR", 0.0),
            freq_osc_freq_r: get_f32(params, "freqOscFreqR", 0.0),
            freq_osc_skew_l: get_f32(params, "freqOscSkewL", 0.0),
            freq_osc_skew_r: get_f32(params, "freqOscSkewR", 0.0),
            freq_osc_phase_offset_l: get_f32(params, "freqOscPhaseOffsetL", 0.0),
            freq_osc_phase_offset_r: get_f32(params, "freqOscPhaseOffsetR", 0.0),
            freq_osc_shape: LfoShape::from_str(
                params
                    .get("freqOscShape")
                    .and_then(|v| v.as_str())
                    .unwrap_or("sine"),
            ),
            amp_osc_phase_offset_l: get_f32(params, "ampOscPhaseOffsetL", 0.0),
            amp_osc_phase_offset_r: get_f32(params, "ampOscPhaseOffsetR", 0.0),
            amp_osc_skew_l: get_f32(params, "ampOscSkewL", 0.0),
            amp_osc_skew_r: get_f32(params, "ampOscSkewR", 0.0),
            phase_osc_freq: get_f32(params, "phaseOscFreq", 0.0),
            phase_osc_range: get_f32(params, "phaseOscRange", 0.0),
            phase_l: start_phase_l,
            phase_r: start_phase_r,
            sample_rate,
            remaining_samples: total_samples,
            sample_idx: 0,
        }
    }

    fn peak(&self) -> f32 {
        self.amp_l.abs().max(self.amp_r.abs())
    }
}

impl Voice for BinauralBeatVoice {
    fn process(&mut self, output: &mut [f32]) {
        let frames = output.len() / 2;
        let dt = 1.0 / self.sample_rate;
        for i in 0..frames {
            if self.remaining_samples == 0 {
                break;
            }
            let t = self.sample_idx as f32 / self.sample_rate;

            // Instantaneous frequency with vibrato
            let half_beat = if self.left_high {
                -self.beat_freq * 0.5
            } else {
                self.beat_freq * 0.5
            };
            let phase_l_vib = self.freq_osc_freq_l * t + self.freq_osc_phase_offset_l / TWO_PI;
            let phase_r_vib = self.freq_osc_freq_r * t + self.freq_osc_phase_offset_r / TWO_PI;
            let vib_l = (self.freq_osc_range_l * 0.5)
                * self.freq_osc_shape.eval(phase_l_vib.fract(), self.freq_osc_skew_l);
            let vib_r = (self.freq_osc_range_r * 0.5)
                * self.freq_osc_shape.eval(phase_r_vib.fract(), self.freq_osc_skew_r);
            let mut freq_l = self.base_freq - half_beat + vib_l;
            let mut freq_r = self.base_freq + half_beat + vib_r;

            if self.force_mono || self.beat_freq == 0.0 {
                freq_l = self.base_freq.max(0.0);
                freq_r = self.base_freq.max(0.0);
            } else {
                freq_l = freq_l.max(0.0);
                freq_r = freq_r.max(0.0);
            }

            self.phase_l = (self.phase_l + TWO_PI * freq_l * dt).rem_euclid(TWO_PI);
            self.phase_r = (self.phase_r + TWO_PI * freq_r * dt).rem_euclid(TWO_PI);

            // Phase LFO shifts the rendered phase only; the integrated phase
            // stays untouched so handoff between steps remains continuous.
            let mut ph_l = self.phase_l;
            let mut ph_r = self.phase_r;
            if self.phase_osc_freq != 0.0 || self.phase_osc_range != 0.0 {
                let dphi =
                    (self.phase_osc_range * 0.5) * sin_lut(TWO_PI * self.phase_osc_freq * t);
                ph_l -= dphi;
                ph_r += dphi;
            }

            let amp_phase_l = self.amp_osc_freq_l * t + self.amp_osc_phase_offset_l / TWO_PI;
            let amp_phase_r = self.amp_osc_freq_r * t + self.amp_osc_phase_offset_r / TWO_PI;
            let env_l = 1.0
                - self.amp_osc_depth_l
                    * (0.5 * (1.0 + skewed_sine_phase(amp_phase_l.fract(), self.amp_osc_skew_l)));
            let env_r = 1.0
                - self.amp_osc_depth_r
                    * (0.5 * (1.0 + skewed_sine_phase(amp_phase_r.fract(), self.amp_osc_skew_r)));

            output[i * 2] += sin_lut(ph_l) * env_l * self.amp_l;
            output[i * 2 + 1] += sin_lut(ph_r) * env_r * self.amp_r;

            self.remaining_samples -= 1;
            self.sample_idx += 1;
        }
    }

    fn is_finished(&self) -> bool {
        self.remaining_samples == 0
    }
}

pub struct BinauralBeatTransitionVoice {
    start_amp_l: f32,
    end_amp_l: f32,
    start_amp_r: f32,
    end_amp_r: f32,
    start_base_freq: f32,
    end_base_freq: f32,
    start_beat_freq: f32,
    end_beat_freq: f32,
    start_force_mono: bool,
    end_force_mono: bool,
    left_high: bool,
    start_phase_osc_freq: f32,
    end_phase_osc_freq: f32,
    start_phase_osc_range: f32,
    end_phase_osc_range: f32,
    start_amp_osc_depth_l: f32,
    end_amp_osc_depth_l: f32,
    start_amp_osc_freq_l: f32,
    end_amp_osc_freq_l: f32,
    start_amp_osc_depth_r: f32,
    end_amp_osc_depth_r: f32,
    start_amp_osc_freq_r: f32,
    end_amp_osc_freq_r: f32,
    start_amp_osc_phase_offset_l: f32,
    end_amp_osc_phase_offset_l: f32,
    start_amp_osc_phase_offset_r: f32,
    end_amp_osc_phase_offset_r: f32,
    start_freq_osc_range_l: f32,
    end_freq_osc_range_l: f32,
    start_freq_osc_freq_l: f32,
    end_freq_osc_freq_l: f32,
    start_freq_osc_range_r: f32,
    end_freq_osc_range_r: f32,
    start_freq_osc_freq_r: f32,
    end_freq_osc_freq_r: f32,
    start_freq_osc_skew_l: f32,
    end_freq_osc_skew_l: f32,
    start_freq_osc_skew_r: f32,
    end_freq_osc_skew_r: f32,
    start_freq_osc_phase_offset_l: f32,
    end_freq_osc_phase_offset_l: f32,
    start_freq_osc_phase_offset_r: f32,
    end_freq_osc_phase_offset_r: f32,
    start_amp_osc_skew_l: f32,
    end_amp_osc_skew_l: f32,
    start_amp_osc_skew_r: f32,
    end_amp_osc_skew_r: f32,
    freq_osc_shape: LfoShape,
    curve: TransitionCurve,
    initial_offset: f32,
    post_offset: f32,
    sample_rate: f32,
    remaining_samples: usize,
    phase_l: f32,
    phase_r: f32,
    sample_idx: usize,
    duration: f32,
}

impl BinauralBeatTransitionVoice {
    pub fn new(params: &HashMap<String, Value>, duration: f32, sample_rate: f32) -> Self {
        // Every start_* falls back to the non-transition default, every
        // end_* to its start_*; an incomplete parameter set degrades to the
        // plain binaural behaviour.
        let start_amp_l = get_f32(params, "startAmpL", get_f32(params, "ampL", 0.5));
        let end_amp_l = get_f32(params, "endAmpL", start_amp_l);
        let start_amp_r = get_f32(params, "startAmpR", get_f32(params, "ampR", 0.5));
        let end_amp_r = get_f32(params, "endAmpR", start_amp_r);
        let start_base_freq = get_f32(params, "startBaseFreq", get_f32(params, "baseFreq", 200.0));
        let end_base_freq = get_f32(params, "endBaseFreq", start_base_freq);
        let start_beat_freq = get_f32(params, "startBeatFreq", get_f32(params, "beatFreq", 4.0));
        let end_beat_freq = get_f32(params, "endBeatFreq", start_beat_freq);
        let start_force_mono =
            get_bool(params, "startForceMono", get_bool(params, "forceMono", false));
        let end_force_mono = get_bool(params, "endForceMono", start_force_mono);
        let start_phase_osc_freq =
            get_f32(params, "startPhaseOscFreq", get_f32(params, "phaseOscFreq", 0.0));
        let end_phase_osc_freq = get_f32(params, "endPhaseOscFreq", start_phase_osc_freq);
        let start_phase_osc_range =
            get_f32(params, "startPhaseOscRange", get_f32(params, "phaseOscRange", 0.0));
        let end_phase_osc_range = get_f32(params, "endPhaseOscRange", start_phase_osc_range);
        let start_amp_osc_depth_l =
            get_f32(params, "startAmpOscDepthL", get_f32(params, "ampOscDepthL", 0.0));
        let end_amp_osc_depth_l = get_f32(params, "endAmpOscDepthL", start_amp_osc_depth_l);
        let start_amp_osc_freq_l =
            get_f32(params, "startAmpOscFreqL", get_f32(params, "ampOscFreqL", 0.0));
        let end_amp_osc_freq_l = get_f32(params, "endAmpOscFreqL", start_amp_osc_freq_l);
        let start_amp_osc_depth_r =
            get_f32(params, "startAmpOscDepthR", get_f32(params, "ampOscDepthR", 0.0));
        let end_amp_osc_depth_r = get_f32(params, "endAmpOscDepthR", start_amp_osc_depth_r);
        let start_amp_osc_freq_r =
            get_f32(params, "startAmpOscFreqR", get_f32(params, "ampOscFreqR", 0.0));
        let end_amp_osc_freq_r = get_f32(params, "endAmpOscFreqR", start_amp_osc_freq_r);
        let start_amp_osc_phase_offset_l = get_f32(
            params,
            "startAmpOscPhaseOffsetL",
            get_f32(params, "ampOscPhaseOffsetL", 0.0),
        );
        let end_amp_osc_phase_offset_l =
            get_f32(params, "endAmpOscPhaseOffsetL", start_amp_osc_phase_offset_l);
        let start_amp_osc_phase_offset_r = get_f32(
            params,
            "startAmpOscPhaseOffsetR",
            get_f32(params, "ampOscPhaseOffsetR", 0.0),
        );
        let end_amp_osc_phase_offset_r =
            get_f32(params, "endAmpOscPhaseOffsetR", start_amp_osc_phase_offset_r);
        let start_freq_osc_range_l =
            get_f32(params, "startFreqOscRangeL", get_f32(params, "freqOscRangeL", 0.0));
        let end_freq_osc_range_l = get_f32(params, "endFreqOscRangeL", start_freq_osc_range_l);
        let start_freq_osc_freq_l =
            get_f32(params, "startFreqOscFreqL", get_f32(params, "freqOscFreqL", 0.0));
        let end_freq_osc_freq_l = get_f32(params, "endFreqOscFreqL", start_freq_osc_freq_l);
        let start_freq_osc_range_r =
            get_f32(params, "startFreqOscRangeR", get_f32(params, "freqOscRangeR", 0.0));
        let end_freq_osc_range_r = get_f32(params, "endFreqOscRangeR", start_freq_osc_range_r);
        let start_freq_osc_freq_r =
            get_f32(params, "startFreqOscFreqR", get_f32(params, "freqOscFreqR", 0.0));
        let end_freq_osc_freq_r = get_f32(params, "endFreqOscFreqR", start_freq_osc_freq_r);
        let start_freq_osc_skew_l =
            get_f32(params, "startFreqOscSkewL", get_f32(params, "freqOscSkewL", 0.0));
        let end_freq_osc_skew_l = get_f32(params, "endFreqOscSkewL", start_freq_osc_skew_l);
        let start_freq_osc_skew_r =
            get_f32(params, "startFreqOscSkewR", get_f32(params, "freqOscSkewR", 0.0));
        let end_freq_osc_skew_r = get_f32(params, "endFreqOscSkewR", start_freq_osc_skew_r);
        let start_freq_osc_phase_offset_l = get_f32(
            params,
            "startFreqOscPhaseOffsetL",
            get_f32(params, "freqOscPhaseOffsetL", 0.0),
        );
        let end_freq_osc_phase_offset_l =
            get_f32(params, "endFreqOscPhaseOffsetL", start_freq_osc_phase_offset_l);
        let start_freq_osc_phase_offset_r = get_f32(
            params,
            "startFreqOscPhaseOffsetR",
            get_f32(params, "freqOscPhaseOffsetR", 0.0),
        );
        let end_freq_osc_phase_offset_r =
            get_f32(params, "endFreqOscPhaseOffsetR", start_freq_osc_phase_offset_r);
        let start_amp_osc_skew_l =
            get_f32(params, "startAmpOscSkewL", get_f32(params, "ampOscSkewL", 0.0));
        let end_amp_osc_skew_l = get_f32(params, "endAmpOscSkewL", start_amp_osc_skew_l);
        let start_amp_osc_skew_r =
            get_f32(params, "startAmpOscSkewR", get_f32(params, "ampOscSkewR", 0.0));
        let end_amp_osc_skew_r = get_f32(params, "endAmpOscSkewR", start_amp_osc_skew_r);

        let total_samples = (duration * sample_rate) as usize;
        Self {
            start_amp_l,
            end_amp_l,
            start_amp_r,
            end_amp_r,
            start_base_freq,
            end_base_freq,
            start_beat_freq,
            end_beat_freq,
            start_force_mono,
            end_force_mono,
            left_high: get_bool(params, "leftHigh", false),
            start_phase_osc_freq,
            end_phase_osc_freq,
            start_phase_osc_range,
            end_phase_osc_range,
            start_amp_osc_depth_l,
            end_amp_osc_depth_l,
            start_amp_osc_freq_l,
            end_amp_osc_freq_l,
            start_amp_osc_depth_r,
            end_amp_osc_depth_r,
            start_amp_osc_freq_r,
            end_amp_osc_freq_r,
            start_amp_osc_phase_offset_l,
            end_amp_osc_phase_offset_l,
            start_amp_osc_phase_offset_r,
            end_amp_osc_phase_offset_r,
            start_freq_osc_range_l,
            end_freq_osc_range_l,
            start_freq_osc_freq_l,
            end_freq_osc_freq_l,
            start_freq_osc_range_r,
            end_freq_osc_range_r,
            start_freq_osc_freq_r,
            end_freq_osc_freq_r,
            start_freq_osc_skew_l,
            end_freq_osc_skew_l,
            start_freq_osc_skew_r,
            end_freq_osc_skew_r,
            start_freq_osc_phase_offset_l,
            end_freq_osc_phase_offset_l,
            start_freq_osc_phase_offset_r,
            end_freq_osc_phase_offset_r,
            start_amp_osc_skew_l,
            end_amp_osc_skew_l,
            start_amp_osc_skew_r,
            end_amp_osc_skew_r,
            freq_osc_shape: LfoShape::from_str(
                params
                    .get("freqOscShape")
                    .and_then(|v| v.as_str())
                    .unwrap_or("sine"),
            ),
            curve: TransitionCurve::from_str(
                params
                    .get("transition_curve")
                    .and_then(|v| v.as_str())
                    .unwrap_or("linear"),
            ),
            initial_offset: get_f32(params, "initial_offset", 0.0),
            post_offset: get_f32(params, "post_offset", 0.0),
            sample_rate,
            remaining_samples: total_samples,
            phase_l: get_f32(params, "startPhaseL", 0.0),
            phase_r: get_f32(params, "startPhaseR", 0.0),
            sample_idx: 0,
            duration,
        }
    }

    fn peak(&self) -> f32 {
        self.start_amp_l
            .abs()
            .max(self.end_amp_l.abs())
            .max(self.start_amp_r.abs())
            .max(self.end_amp_r.abs())
    }
}

impl Voice for BinauralBeatTransitionVoice {
    fn process(&mut self, output: &mut [f32]) {
        let frames = output.len() / 2;
        let dt = 1.0 / self.sample_rate;
        for i in 0..frames {
            if self.remaining_samples == 0 {
                break;
            }
            let t = self.sample_idx as f32 / self.sample_rate;
            let alpha =
                transition_alpha(t, self.duration, self.initial_offset, self.post_offset, self.curve);

            let amp_l = lerp(self.start_amp_l, self.end_amp_l, alpha);
            let amp_r = lerp(self.start_amp_r, self.end_amp_r, alpha);
            let base_freq = lerp(self.start_base_freq, self.end_base_freq, alpha);
            let beat_freq = lerp(self.start_beat_freq, self.end_beat_freq, alpha);
            let force_mono = if self.start_force_mono == self.end_force_mono {
                self.start_force_mono
            } else {
                alpha >= 0.5
            };
            let phase_osc_freq = lerp(self.start_phase_osc_freq, self.end_phase_osc_freq, alpha);
            let phase_osc_range = lerp(self.start_phase_osc_range, self.end_phase_osc_range, alpha);
            let amp_osc_depth_l = lerp(self.start_amp_osc_depth_l, self.end_amp_osc_depth_l, alpha);
            let amp_osc_freq_l = lerp(self.start_amp_osc_freq_l, self.end_amp_osc_freq_l, alpha);
            let amp_osc_depth_r = lerp(self.start_amp_osc_depth_r, self.end_amp_osc_depth_r, alpha);
            let amp_osc_freq_r = lerp(self.start_amp_osc_freq_r, self.end_amp_osc_freq_r, alpha);
            let amp_osc_phase_offset_l = lerp(
                self.start_amp_osc_phase_offset_l,
                self.end_amp_osc_phase_offset_l,
                alpha,
            );
            let amp_osc_phase_offset_r = lerp(
                self.start_amp_osc_phase_offset_r,
                self.end_amp_osc_phase_offset_r,
                alpha,
            );
            let freq_osc_range_l = lerp(self.start_freq_osc_range_l, self.end_freq_osc_range_l, alpha);
            let freq_osc_freq_l = lerp(self.start_freq_osc_freq_l, self.end_freq_osc_freq_l, alpha);
            let freq_osc_range_r = lerp(self.start_freq_osc_range_r, self.end_freq_osc_range_r, alpha);
            let freq_osc_freq_r = lerp(self.start_freq_osc_freq_r, self.end_freq_osc_freq_r, alpha);
            let freq_osc_skew_l = lerp(self.start_freq_osc_skew_l, self.end_freq_osc_skew_l, alpha);
            let freq_osc_skew_r = lerp(self.start_freq_osc_skew_r, self.end_freq_osc_skew_r, alpha);
            let freq_osc_phase_offset_l = lerp(
                self.start_freq_osc_phase_offset_l,
                self.end_freq_osc_phase_offset_l,
                alpha,
            );
            let freq_osc_phase_offset_r = lerp(
                self.start_freq_osc_phase_offset_r,
                self.end_freq_osc_phase_offset_r,
                alpha,
            );
            let amp_osc_skew_l = lerp(self.start_amp_osc_skew_l, self.end_amp_osc_skew_l, alpha);
            let amp_osc_skew_r = lerp(self.start_amp_osc_skew_r, self.end_amp_osc_skew_r, alpha);

            let half_beat = if self.left_high {
                -beat_freq * 0.5
            } else {
                beat_freq * 0.5
            };
            let phase_l_vib = freq_osc_freq_l * t + freq_osc_phase_offset_l / TWO_PI;
            let phase_r_vib = freq_osc_freq_r * t + freq_osc_phase_offset_r / TWO_PI;
            let vib_l =
                (freq_osc_range_l * 0.5) * self.freq_osc_shape.eval(phase_l_vib.fract(), freq_osc_skew_l);
            let vib_r =
                (freq_osc_range_r * 0.5) * self.freq_osc_shape.eval(phase_r_vib.fract(), freq_osc_skew_r);
            let mut freq_l = base_freq - half_beat + vib_l;
            let mut freq_r = base_freq + half_beat + vib_r;

            if force_mono || beat_freq == 0.0 {
                freq_l = base_freq.max(0.0);
                freq_r = base_freq.max(0.0);
            } else {
                freq_l = freq_l.max(0.0);
                freq_r = freq_r.max(0.0);
            }

            self.phase_l = (self.phase_l + TWO_PI * freq_l * dt).rem_euclid(TWO_PI);
            self.phase_r = (self.phase_r + TWO_PI * freq_r * dt).rem_euclid(TWO_PI);

            let mut ph_l = self.phase_l;
            let mut ph_r = self.phase_r;
            if phase_osc_freq != 0.0 || phase_osc_range != 0.0 {
                let dphi = (phase_osc_range * 0.5) * sin_lut(TWO_PI * phase_osc_freq * t);
                ph_l -= dphi;
                ph_r += dphi;
            }

            let amp_phase_l = amp_osc_freq_l * t + amp_osc_phase_offset_l / TWO_PI;
            let amp_phase_r = amp_osc_freq_r * t + amp_osc_phase_offset_r / TWO_PI;
            let env_l = 1.0
                - amp_osc_depth_l
                    * (0.5 * (1.0 + skewed_sine_phase(amp_phase_l.fract(), amp_osc_skew_l)));
            let env_r = 1.0
                - amp_osc_depth_r
                    * (0.5 * (1.0 + skewed_sine_phase(amp_phase_r.fract(), amp_osc_skew_r)));

            output[i * 2] += sin_lut(ph_l) * env_l * amp_l;
            output[i * 2 + 1] += sin_lut(ph_r) * env_r * amp_r;

            self.remaining_samples -= 1;
            self.sample_idx += 1;
        }
    }

    fn is_finished(&self) -> bool {
        self.remaining_samples == 0
    }
}

pub struct IsochronicToneVoice {
    amp_l: f32,
    amp_r: f32,
    base_freq: f32,
    beat_freq: f32,
    force_mono: bool,
    amp_osc_depth_l: f32,
    amp_osc_freq_l: f32,
    amp_osc_depth_r: f32,
    amp_osc_freq_r: f32,
    freq_osc_range_l: f32,
    freq_osc_freq_l: f32,
    freq_osc_range_r: f32,
    freq_osc_freq_r: f32,
    freq_osc_skew_l: f32,
    freq_osc_skew_r: f32,
    freq_osc_phase_offset_l: f32,
    freq_osc_phase_offset_r: f32,
    amp_osc_phase_offset_l: f32,
    amp_osc_phase_offset_r: f32,
    amp_osc_skew_l: f32,
    amp_osc_skew_r: f32,
    phase_osc_freq: f32,
    phase_osc_range: f32,
    ramp_percent: f32,
    gap_percent: f32,
    pan: f32,
    pan_freq: f32,
    pan_range_min: f32,
    pan_range_max: f32,
    pan_phase: f32,
    phase_l: f32,
    phase_r: f32,
    beat_phase: f32,
    sample_rate: f32,
    remaining_samples: usize,
    sample_idx: usize,
}

impl IsochronicToneVoice {
    pub fn new(params: &HashMap<String, Value>, duration: f32, sample_rate: f32) -> Self {
        let total_samples = (duration * sample_rate) as usize;
        Self {
            amp_l: get_f32(params, "ampL", 0.5),
            amp_r: get_f32(params, "ampR", 0.5),
            base_freq: get_f32(params, "baseFreq", 200.0),
            beat_freq: get_f32(params, "beatFreq", 4.0),
            force_mono: get_bool(params, "forceMono", false),
            amp_osc_depth_l: get_f32(params, "ampOscDepthL", 0.0),
            amp_osc_freq_l: get_f32(params, "ampOscFreqL", 0.0),
            amp_osc_depth_r: get_f32(params, "ampOscDepthR", 0.0),
            amp_osc_freq_r: get_f32(params, "ampOscFreqR", 0.0),
            freq_osc_range_l: get_f32(params, "freqOscRangeL", 0.0),
            freq_osc_freq_l: get_f32(params, "freqOscFreqL", 0.0),
            freq_osc_range_r: get_f32(params, "freqOscRangeR", 0.0),
            freq_osc_freq_r: get_f32(params, "freqOscFreqR", 0.0),
            freq_osc_skew_l: get_f32(params, "freqOscSkewL", 0.0),
            freq_osc_skew_r: get_f32(params, "freqOscSkewR", 0.0),
            freq_osc_phase_offset_l: get_f32(params, "freqOscPhaseOffsetL", 0.0),
            freq_osc_phase_offset_r: get_f32(params, "freqOscPhaseOffsetR", 0.0),
            amp_osc_phase_offset_l: get_f32(params, "ampOscPhaseOffsetL", 0.0),
            amp_osc_phase_offset_r: get_f32(params, "ampOscPhaseOffsetR", 0.0),
            amp_osc_skew_l: get_f32(params, "ampOscSkewL", 0.0),
            amp_osc_skew_r: get_f32(params, "ampOscSkewR", 0.0),
            phase_osc_freq: get_f32(params, "phaseOscFreq", 0.0),
            phase_osc_range: get_f32(params, "phaseOscRange", 0.0),
            ramp_percent: get_f32(params, "rampPercent", 0.2),
            gap_percent: get_f32(params, "gapPercent", 0.15),
            pan: get_f32(params, "pan", 0.0),
            pan_freq: get_f32(params, "panFreq", 0.0),
            pan_range_min: get_f32(params, "panRangeMin", -1.0),
            pan_range_max: get_f32(params, "panRangeMax", 1.0),
            pan_phase: get_f32(params, "panPhase", 0.0),
            phase_l: get_f32(params, "startPhaseL", 0.0),
            phase_r: get_f32(params, "startPhaseR", 0.0),
            beat_phase: 0.0,
            sample_rate,
            remaining_samples: total_samples,
            sample_idx: 0,
        }
    }

    fn peak(&self) -> f32 {
        self.amp_l.abs().max(self.amp_r.abs())
    }

    fn pan_at(&self, t: f32) -> f32 {
        if self.pan_freq != 0.0 {
            let center = (self.pan_range_min + self.pan_range_max) * 0.5;
            let range = (self.pan_range_max - self.pan_range_min) * 0.5;
            center + range * sin_lut(TWO_PI * self.pan_freq * t + self.pan_phase)
        } else {
            self.pan
        }
    }
}

impl Voice for IsochronicToneVoice {
    fn process(&mut self, output: &mut [f32]) {
        let frames = output.len() / 2;
        let dt = 1.0 / self.sample_rate;
        for i in 0..frames {
            if self.remaining_samples == 0 {
                break;
            }
            let t = self.sample_idx as f32 / self.sample_rate;

            let phase_l_vib = self.freq_osc_freq_l * t + self.freq_osc_phase_offset_l / TWO_PI;
            let phase_r_vib = self.freq_osc_freq_r * t + self.freq_osc_phase_offset_r / TWO_PI;
            let vib_l = (self.freq_osc_range_l * 0.5)
                * skewed_sine_phase(phase_l_vib.fract(), self.freq_osc_skew_l);
            let vib_r = (self.freq_osc_range_r * 0.5)
                * skewed_sine_phase(phase_r_vib.fract(), self.freq_osc_skew_r);
            let mut freq_l = self.base_freq + vib_l;
            let mut freq_r = self.base_freq + vib_r;

            if self.force_mono {
                freq_l = self.base_freq.max(0.0);
                freq_r = self.base_freq.max(0.0);
            } else {
                freq_l = freq_l.max(0.0);
                freq_r = freq_r.max(0.0);
            }

            let cycle_len = if self.beat_freq > 0.0 {
                1.0 / self.beat_freq
            } else {
                0.0
            };
            let iso_env = trapezoid_envelope(
                self.beat_phase * cycle_len,
                cycle_len,
                self.ramp_percent,
                self.gap_percent,
            );

            self.phase_l = (self.phase_l + TWO_PI * freq_l * dt).rem_euclid(TWO_PI);
            self.phase_r = (self.phase_r + TWO_PI * freq_r * dt).rem_euclid(TWO_PI);
            self.beat_phase = (self.beat_phase + self.beat_freq * dt).rem_euclid(1.0);

            let mut ph_l = self.phase_l;
            let mut ph_r = self.phase_r;
            if self.phase_osc_freq != 0.0 || self.phase_osc_range != 0.0 {
                let dphi =
                    (self.phase_osc_range * 0.5) * sin_lut(TWO_PI * self.phase_osc_freq * t);
                ph_l -= dphi;
                ph_r += dphi;
            }

            let amp_phase_l = self.amp_osc_freq_l * t + self.amp_osc_phase_offset_l / TWO_PI;
            let amp_phase_r = self.amp_osc_freq_r * t + self.amp_osc_phase_offset_r / TWO_PI;
            let env_l = 1.0
                - self.amp_osc_depth_l
                    * (0.5 * (1.0 + skewed_sine_phase(amp_phase_l.fract(), self.amp_osc_skew_l)));
            let env_r = 1.0
                - self.amp_osc_depth_r
                    * (0.5 * (1.0 + skewed_sine_phase(amp_phase_r.fract(), self.amp_osc_skew_r)));

            let mut sample_l = sin_lut(ph_l) * env_l * self.amp_l * iso_env;
            let mut sample_r = sin_lut(ph_r) * env_r * self.amp_r * iso_env;

            let pan = self.pan_at(t);
            if pan != 0.0 || self.pan_freq != 0.0 {
                let mono = 0.5 * (sample_l + sample_r);
                let (pl, pr) = pan2(mono, pan);
                sample_l = pl;
                sample_r = pr;
            }

            output[i * 2] += sample_l;
            output[i * 2 + 1] += sample_r;

            self.remaining_samples -= 1;
            self.sample_idx += 1;
        }
    }

    fn is_finished(&self) -> bool {
        self.remaining_samples == 0
    }
}

pub struct IsochronicToneTransitionVoice {
    start_amp_l: f32,
    end_amp_l: f32,
    start_amp_r: f32,
    end_amp_r: f32,
    start_base_freq: f32,
    end_base_freq: f32,
    start_beat_freq: f32,
    end_beat_freq: f32,
    start_force_mono: bool,
    end_force_mono: bool,
    start_phase_osc_freq: f32,
    end_phase_osc_freq: f32,
    start_phase_osc_range: f32,
    end_phase_osc_range: f32,
    start_amp_osc_depth_l: f32,
    end_amp_osc_depth_l: f32,
    start_amp_osc_freq_l: f32,
    end_amp_osc_freq_l: f32,
    start_amp_osc_depth_r: f32,
    end_amp_osc_depth_r: f32,
    start_amp_osc_freq_r: f32,
    end_amp_osc_freq_r: f32,
    start_amp_osc_phase_offset_l: f32,
    end_amp_osc_phase_offset_l: f32,
    start_amp_osc_phase_offset_r: f32,
    end_amp_osc_phase_offset_r: f32,
    start_freq_osc_range_l: f32,
    end_freq_osc_range_l: f32,
    start_freq_osc_freq_l: f32,
    end_freq_osc_freq_l: f32,
    start_freq_osc_range_r: f32,
    end_freq_osc_range_r: f32,
    start_freq_osc_freq_r: f32,
    end_freq_osc_freq_r: f32,
    start_freq_osc_skew_l: f32,
    end_freq_osc_skew_l: f32,
    start_freq_osc_skew_r: f32,
    end_freq_osc_skew_r: f32,
    start_freq_osc_phase_offset_l: f32,
    end_freq_osc_phase_offset_l: f32,
    start_freq_osc_phase_offset_r: f32,
    end_freq_osc_phase_offset_r: f32,
    start_amp_osc_skew_l: f32,
    end_amp_osc_skew_l: f32,
    start_amp_osc_skew_r: f32,
    end_amp_osc_skew_r: f32,
    ramp_percent: f32,
    gap_percent: f32,
    pan: f32,
    curve: TransitionCurve,
    initial_offset: f32,
    post_offset: f32,
    sample_rate: f32,
    remaining_samples: usize,
    phase_l: f32,
    phase_r: f32,
    beat_phase: f32,
    sample_idx: usize,
    duration: f32,
}

impl IsochronicToneTransitionVoice {
    pub fn new(params: &HashMap<String, Value>, duration: f32, sample_rate: f32) -> Self {
        let start_amp_l = get_f32(params, "startAmpL", get_f32(params, "ampL", 0.5));
        let end_amp_l = get_f32(params, "endAmpL", start_amp_l);
        let start_amp_r = get_f32(params, "startAmpR", get_f32(params, "ampR", 0.5));
        let end_amp_r = get_f32(params, "endAmpR", start_amp_r);
        let start_base_freq = get_f32(params, "startBaseFreq", get_f32(params, "baseFreq", 200.0));
        let end_base_freq = get_f32(params, "endBaseFreq", start_base_freq);
        let start_beat_freq = get_f32(params, "startBeatFreq", get_f32(params, "beatFreq", 4.0));
        let end_beat_freq = get_f32(params, "endBeatFreq", start_beat_freq);
        let start_force_mono =
            get_bool(params, "startForceMono", get_bool(params, "forceMono", false));
        let end_force_mono = get_bool(params, "endForceMono", start_force_mono);
        let start_phase_osc_freq =
            get_f32(params, "startPhaseOscFreq", get_f32(params, "phaseOscFreq", 0.0));
        let end_phase_osc_freq = get_f32(params, "endPhaseOscFreq", start_phase_osc_freq);
        let start_phase_osc_range =
            get_f32(params, "startPhaseOscRange", get_f32(params, "phaseOscRange", 0.0));
        let end_phase_osc_range = get_f32(params, "endPhaseOscRange", start_phase_osc_range);
        let start_amp_osc_depth_l =
            get_f32(params, "startAmpOscDepthL", get_f32(params, "ampOscDepthL", 0.0));
        let end_amp_osc_depth_l = get_f32(params, "endAmpOscDepthL", start_amp_osc_depth_l);
        let start_amp_osc_freq_l =
            get_f32(params, "startAmpOscFreqL", get_f32(params, "ampOscFreqL", 0.0));
        let end_amp_osc_freq_l = get_f32(params, "endAmpOscFreqL", start_amp_osc_freq_l);
        let start_amp_osc_depth_r =
            get_f32(params, "startAmpOscDepthR", get_f32(params, "ampOscDepthR", 0.0));
        let end_amp_osc_depth_r = get_f32(params, "endAmpOscDepthR", start_amp_osc_depth_r);
        let start_amp_osc_freq_r =
            get_f32(params, "startAmpOscFreqR", get_f32(params, "ampOscFreqR", 0.0));
        let end_amp_osc_freq_r = get_f32(params, "endAmpOscFreqR", start_amp_osc_freq_r);
        let start_amp_osc_phase_offset_l = get_f32(
            params,
            "startAmpOscPhaseOffsetL",
            get_f32(params, "ampOscPhaseOffsetL", 0.0),
        );
        let end_amp_osc_phase_offset_l =
            get_f32(params, "endAmpOscPhaseOffsetL", start_amp_osc_phase_offset_l);
        let start_amp_osc_phase_offset_r = get_f32(
            params,
            "startAmpOscPhaseOffsetR",
            get_f32(params, "ampOscPhaseOffsetR", 0.0),
        );
        let end_amp_osc_phase_offset_r =
            get_f32(params, "endAmpOscPhaseOffsetR", start_amp_osc_phase_offset_r);
        let start_freq_osc_range_l =
            get_f32(params, "startFreqOscRangeL", get_f32(params, "freqOscRangeL", 0.0));
        let end_freq_osc_range_l = get_f32(params, "endFreqOscRangeL", start_freq_osc_range_l);
        let start_freq_osc_freq_l =
            get_f32(params, "startFreqOscFreqL", get_f32(params, "freqOscFreqL", 0.0));
        let end_freq_osc_freq_l = get_f32(params, "endFreqOscFreqL", start_freq_osc_freq_l);
        let start_freq_osc_range_r =
            get_f32(params, "startFreqOscRangeR", get_f32(params, "freqOscRangeR", 0.0));
        let end_freq_osc_range_r = get_f32(params, "endFreqOscRangeR", start_freq_osc_range_r);
        let start_freq_osc_freq_r =
            get_f32(params, "startFreqOscFreqR", get_f32(params, "freqOscFreqR", 0.0));
        let end_freq_osc_freq_r = get_f32(params, "endFreqOscFreqR", start_freq_osc_freq_r);
        let start_freq_osc_skew_l =
            get_f32(params, "startFreqOscSkewL", get_f32(params, "freqOscSkewL", 0.0));
        let end_freq_osc_skew_l = get_f32(params, "endFreqOscSkewL", start_freq_osc_skew_l);
        let start_freq_osc_skew_r =
            get_f32(params, "startFreqOscSkewR", get_f32(params, "freqOscSkewR", 0.0));
        let end_freq_osc_skew_r = get_f32(params, "endFreqOscSkewR", start_freq_osc_skew_r);
        let start_freq_osc_phase_offset_l = get_f32(
            params,
            "startFreqOscPhaseOffsetL",
            get_f32(params, "freqOscPhaseOffsetL", 0.0),
        );
        let end_freq_osc_phase_offset_l =
            get_f32(params, "endFreqOscPhaseOffsetL", start_freq_osc_phase_offset_l);
        let start_freq_osc_phase_offset_r = get_f32(
            params,
            "startFreqOscPhaseOffsetR",
            get_f32(params, "freqOscPhaseOffsetR", 0.0),
        );
        let end_freq_osc_phase_offset_r =
            get_f32(params, "endFreqOscPhaseOffsetR", start_freq_osc_phase_offset_r);
        let start_amp_osc_skew_l =
            get_f32(params, "startAmpOscSkewL", get_f32(params, "ampOscSkewL", 0.0));
        let end_amp_osc_skew_l = get_f32(params, "endAmpOscSkewL", start_amp_osc_skew_l);
        let start_amp_osc_skew_r =
            get_f32(params, "startAmpOscSkewR", get_f32(params, "ampOscSkewR", 0.0));
        let end_amp_osc_skew_r = get_f32(params, "endAmpOscSkewR", start_amp_osc_skew_r);

        let total_samples = (duration * sample_rate) as usize;
        Self {
            start_amp_l,
            end_amp_l,
            start_amp_r,
            end_amp_r,
            start_base_freq,
            end_base_freq,
            start_beat_freq,
            end_beat_freq,
            start_force_mono,
            end_force_mono,
            start_phase_osc_freq,
            end_phase_osc_freq,
            start_phase_osc_range,
            end_phase_osc_range,
            start_amp_osc_depth_l,
            end_amp_osc_depth_l,
            start_amp_osc_freq_l,
            end_amp_osc_freq_l,
            start_amp_osc_depth_r,
            end_amp_osc_depth_r,
            start_amp_osc_freq_r,
            end_amp_osc_freq_r,
            start_amp_osc_phase_offset_l,
            end_amp_osc_phase_offset_l,
            start_amp_osc_phase_offset_r,
            end_amp_osc_phase_offset_r,
            start_freq_osc_range_l,
            end_freq_osc_range_l,
            start_freq_osc_freq_l,
            end_freq_osc_freq_l,
            start_freq_osc_range_r,
            end_freq_osc_range_r,
            start_freq_osc_freq_r,
            end_freq_osc_freq_r,
            start_freq_osc_skew_l,
            end_freq_osc_skew_l,
            start_freq_osc_skew_r,
            end_freq_osc_skew_r,
            start_freq_osc_phase_offset_l,
            end_freq_osc_phase_offset_l,
            start_freq_osc_phase_offset_r,
            end_freq_osc_phase_offset_r,
            start_amp_osc_skew_l,
            end_amp_osc_skew_l,
            start_amp_osc_skew_r,
            end_amp_osc_skew_r,
            ramp_percent: get_f32(params, "rampPercent", 0.2),
            gap_percent: get_f32(params, "gapPercent", 0.15),
            pan: get_f32(params, "pan", 0.0),
            curve: TransitionCurve::from_str(
                params
                    .get("transition_curve")
                    .and_then(|v| v.as_str())
                    .unwrap_or("linear"),
            ),
            initial_offset: get_f32(params, "initial_offset", 0.0),
            post_offset: get_f32(params, "post_offset", 0.0),
            sample_rate,
            remaining_samples: total_samples,
            phase_l: get_f32(params, "startPhaseL", 0.0),
            phase_r: get_f32(params, "startPhaseR", 0.0),
            beat_phase: 0.0,
            sample_idx: 0,
            duration,
        }
    }

    fn peak(&self) -> f32 {
        self.start_amp_l
            .abs()
            .max(self.end_amp_l.abs())
            .max(self.start_amp_r.abs())
            .max(self.end_amp_r.abs())
    }
}

impl Voice for IsochronicToneTransitionVoice {
    fn process(&mut self, output: &mut [f32]) {
        let frames = output.len() / 2;
        let dt = 1.0 / self.sample_rate;
        for i in 0..frames {
            if self.remaining_samples == 0 {
                break;
            }
            let t = self.sample_idx as f32 / self.sample_rate;
            let alpha =
                transition_alpha(t, self.duration, self.initial_offset, self.post_offset, self.curve);

            let amp_l = lerp(self.start_amp_l, self.end_amp_l, alpha);
            let amp_r = lerp(self.start_amp_r, self.end_amp_r, alpha);
            let base_freq = lerp(self.start_base_freq, self.end_base_freq, alpha);
            let beat_freq = lerp(self.start_beat_freq, self.end_beat_freq, alpha);
            let force_mono = if self.start_force_mono == self.end_force_mono {
                self.start_force_mono
            } else {
                alpha >= 0.5
            };
            let phase_osc_freq = lerp(self.start_phase_osc_freq, self.end_phase_osc_freq, alpha);
            let phase_osc_range = lerp(self.start_phase_osc_range, self.end_phase_osc_range, alpha);
            let amp_osc_depth_l = lerp(self.start_amp_osc_depth_l, self.end_amp_osc_depth_l, alpha);
            let amp_osc_freq_l = lerp(self.start_amp_osc_freq_l, self.end_amp_osc_freq_l, alpha);
            let amp_osc_depth_r = lerp(self.start_amp_osc_depth_r, self.end_amp_osc_depth_r, alpha);
            let amp_osc_freq_r = lerp(self.start_amp_osc_freq_r, self.end_amp_osc_freq_r, alpha);
            let amp_osc_phase_offset_l = lerp(
                self.start_amp_osc_phase_offset_l,
                self.end_amp_osc_phase_offset_l,
                alpha,
            );
            let amp_osc_phase_offset_r = lerp(
                self.start_amp_osc_phase_offset_r,
                self.end_amp_osc_phase_offset_r,
                alpha,
            );
            let freq_osc_range_l = lerp(self.start_freq_osc_range_l, self.end_freq_osc_range_l, alpha);
            let freq_osc_freq_l = lerp(self.start_freq_osc_freq_l, self.end_freq_osc_freq_l, alpha);
            let freq_osc_range_r = lerp(self.start_freq_osc_range_r, self.end_freq_osc_range_r, alpha);
            let freq_osc_freq_r = lerp(self.start_freq_osc_freq_r, self.end_freq_osc_freq_r, alpha);
            let freq_osc_skew_l = lerp(self.start_freq_osc_skew_l, self.end_freq_osc_skew_l, alpha);
            let freq_osc_skew_r = lerp(self.start_freq_osc_skew_r, self.end_freq_osc_skew_r, alpha);
            let freq_osc_phase_offset_l = lerp(
                self.start_freq_osc_phase_offset_l,
                self.end_freq_osc_phase_offset_l,
                alpha,
            );
            let freq_osc_phase_offset_r = lerp(
                self.start_freq_osc_phase_offset_r,
                self.end_freq_osc_phase_offset_r,
                alpha,
            );
            let amp_osc_skew_l = lerp(self.start_amp_osc_skew_l, self.end_amp_osc_skew_l, alpha);
            let amp_osc_skew_r = lerp(self.start_amp_osc_skew_r, self.end_amp_osc_skew_r, alpha);

            let phase_l_vib = freq_osc_freq_l * t + freq_osc_phase_offset_l / TWO_PI;
            let phase_r_vib = freq_osc_freq_r * t + freq_osc_phase_offset_r / TWO_PI;
            let vib_l = (freq_osc_range_l * 0.5) * skewed_sine_phase(phase_l_vib.fract(), freq_osc_skew_l);
            let vib_r = (freq_osc_range_r * 0.5) * skewed_sine_phase(phase_r_vib.fract(), freq_osc_skew_r);
            let mut freq_l = base_freq + vib_l;
            let mut freq_r = base_freq + vib_r;

            if force_mono {
                freq_l = base_freq.max(0.0);
                freq_r = base_freq.max(0.0);
            } else {
                freq_l = freq_l.max(0.0);
                freq_r = freq_r.max(0.0);
            }

            let cycle_len = if beat_freq > 0.0 { 1.0 / beat_freq } else { 0.0 };
            let iso_env = trapezoid_envelope(
                self.beat_phase * cycle_len,
                cycle_len,
                self.ramp_percent,
                self.gap_percent,
            );

            self.phase_l = (self.phase_l + TWO_PI * freq_l * dt).rem_euclid(TWO_PI);
            self.phase_r = (self.phase_r + TWO_PI * freq_r * dt).rem_euclid(TWO_PI);
            self.beat_phase = (self.beat_phase + beat_freq * dt).rem_euclid(1.0);

            let mut ph_l = self.phase_l;
            let mut ph_r = self.phase_r;
            if phase_osc_freq != 0.0 || phase_osc_range != 0.0 {
                let dphi = (phase_osc_range * 0.5) * sin_lut(TWO_PI * phase_osc_freq * t);
                ph_l -= dphi;
                ph_r += dphi;
            }

            let amp_phase_l = amp_osc_freq_l * t + amp_osc_phase_offset_l / TWO_PI;
            let amp_phase_r = amp_osc_freq_r * t + amp_osc_phase_offset_r / TWO_PI;
            let env_l = 1.0
                - amp_osc_depth_l
                    * (0.5 * (1.0 + skewed_sine_phase(amp_phase_l.fract(), amp_osc_skew_l)));
            let env_r = 1.0
                - amp_osc_depth_r
                    * (0.5 * (1.0 + skewed_sine_phase(amp_phase_r.fract(), amp_osc_skew_r)));

            let mut sample_l = sin_lut(ph_l) * env_l * amp_l * iso_env;
            let mut sample_r = sin_lut(ph_r) * env_r * amp_r * iso_env;

            if self.pan != 0.0 {
                let mono = 0.5 * (sample_l + sample_r);
                let (pl, pr) = pan2(mono, self.pan);
                sample_l = pl;
                sample_r = pr;
            }

            output[i * 2] += sample_l;
            output[i * 2 + 1] += sample_r;

            self.remaining_samples -= 1;
            self.sample_idx += 1;
        }
    }

    fn is_finished(&self) -> bool {
        self.remaining_samples == 0
    }
}

/// Spectrally shaped noise with swept notches, rendered by a
/// [`StreamingNoise`] generator owned by the voice.
pub struct NoiseSweptNotchVoice {
    generator: StreamingNoise,
    amp: f32,
    calibrated_peak: f32,
    remaining_samples: usize,
    scratch: Vec<f32>,
}

impl NoiseSweptNotchVoice {
    pub fn new(
        params: &HashMap<String, Value>,
        duration: f32,
        sample_rate: f32,
        transition: bool,
    ) -> Self {
        let mut noise_params = Self::decode_noise_params(params);
        if transition {
            noise_params.transition = true;
        }
        if noise_params.duration_seconds <= 0.0 {
            noise_params.duration_seconds = duration;
        }

        let amp = get_f32(params, "amp", 1.0);
        let (generator, peak) =
            StreamingNoise::new_with_calibrated_peak(&noise_params, sample_rate as u32);
        Self {
            generator,
            amp,
            calibrated_peak: peak * amp.abs(),
            remaining_samples: (duration * sample_rate) as usize,
            scratch: Vec::new(),
        }
    }

    /// The noise parameters either sit under a dedicated key or are the
    /// voice parameter map itself.
    fn decode_noise_params(params: &HashMap<String, Value>) -> NoiseParams {
        for key in ["noise_params", "noiseParams", "params"] {
            if let Some(value) = params.get(key) {
                if let Ok(decoded) = serde_json::from_value::<NoiseParams>(value.clone()) {
                    return decoded;
                }
            }
        }
        let map: serde_json::Map<String, Value> =
            params.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        serde_json::from_value(Value::Object(map)).unwrap_or_default()
    }

    fn peak(&self) -> f32 {
        self.calibrated_peak
    }
}

impl Voice for NoiseSweptNotchVoice {
    fn process(&mut self, output: &mut [f32]) {
        let frames = (output.len() / 2).min(self.remaining_samples);
        if frames == 0 {
            return;
        }
        if self.scratch.len() < frames * 2 {
            self.scratch.resize(frames * 2, 0.0);
        }
        let scratch = &mut self.scratch[..frames * 2];
        scratch.fill(0.0);
        self.generator.generate(scratch);
        for i in 0..frames * 2 {
            output[i] += scratch[i] * self.amp;
        }
        self.remaining_samples -= frames;
    }

    fn is_finished(&self) -> bool {
        self.remaining_samples == 0
    }
}

impl Voice for VoiceKind {
    fn process(&mut self, output: &mut [f32]) {
        match self {
            VoiceKind::BinauralBeat(v) => v.process(output),
            VoiceKind::BinauralBeatTransition(v) => v.process(output),
            VoiceKind::IsochronicTone(v) => v.process(output),
            VoiceKind::IsochronicToneTransition(v) => v.process(output),
            VoiceKind::NoiseSweptNotch(v) => v.process(output),
            VoiceKind::VolumeEnvelope(v) => v.process(output),
        }
    }

    fn is_finished(&self) -> bool {
        match self {
            VoiceKind::BinauralBeat(v) => v.is_finished(),
            VoiceKind::BinauralBeatTransition(v) => v.is_finished(),
            VoiceKind::IsochronicTone(v) => v.is_finished(),
            VoiceKind::IsochronicToneTransition(v) => v.is_finished(),
            VoiceKind::NoiseSweptNotch(v) => v.is_finished(),
            VoiceKind::VolumeEnvelope(v) => v.is_finished(),
        }
    }
}

impl VoiceKind {
    /// Current oscillator phases, for handoff across step boundaries.
    /// Noise voices have no meaningful phase and return None.
    pub fn phases(&self) -> Option<(f32, f32)> {
        match self {
            VoiceKind::BinauralBeat(v) => Some((v.phase_l, v.phase_r)),
            VoiceKind::BinauralBeatTransition(v) => Some((v.phase_l, v.phase_r)),
            VoiceKind::IsochronicTone(v) => Some((v.phase_l, v.phase_r)),
            VoiceKind::IsochronicToneTransition(v) => Some((v.phase_l, v.phase_r)),
            VoiceKind::NoiseSweptNotch(_) => None,
            VoiceKind::VolumeEnvelope(v) => v.phases(),
        }
    }

    pub fn set_phases(&mut self, left: f32, right: f32) {
        let left = left.rem_euclid(TWO_PI);
        let right = right.rem_euclid(TWO_PI);
        match self {
            VoiceKind::BinauralBeat(v) => {
                v.phase_l = left;
                v.phase_r = right;
            }
            VoiceKind::BinauralBeatTransition(v) => {
                v.phase_l = left;
                v.phase_r = right;
            }
            VoiceKind::IsochronicTone(v) => {
                v.phase_l = left;
                v.phase_r = right;
            }
            VoiceKind::IsochronicToneTransition(v) => {
                v.phase_l = left;
                v.phase_r = right;
            }
            VoiceKind::NoiseSweptNotch(_) => {}
            VoiceKind::VolumeEnvelope(v) => v.set_phases(left, right),
        }
    }

    /// Static upper bound on this voice's output magnitude, used for
    /// per-group attenuation in the mixdown.
    pub fn normalization_peak(&self) -> f32 {
        match self {
            VoiceKind::BinauralBeat(v) => v.peak(),
            VoiceKind::BinauralBeatTransition(v) => v.peak(),
            VoiceKind::IsochronicTone(v) => v.peak(),
            VoiceKind::IsochronicToneTransition(v) => v.peak(),
            VoiceKind::NoiseSweptNotch(v) => v.peak(),
            VoiceKind::VolumeEnvelope(v) => v.normalization_peak(),
        }
    }
}

/// Build the voices of a step in slot order. Unknown synth tags are logged
/// and skipped; the rest of the step remains valid.
pub fn voices_for_step(step: &StepData, sample_rate: f32) -> Vec<StepVoice> {
    let mut out = Vec::new();
    for voice in &step.voices {
        if let Some(v) = create_voice(voice, step.duration as f32, sample_rate) {
            out.push(StepVoice {
                voice: v,
                group: voice.group(),
            });
        }
    }
    out
}

fn create_voice(data: &VoiceData, duration: f32, sample_rate: f32) -> Option<VoiceKind> {
    let mut voice = match data.synth_function_name.as_str() {
        "binaural_beat" => {
            VoiceKind::BinauralBeat(BinauralBeatVoice::new(&data.params, duration, sample_rate))
        }
        "binaural_beat_transition" => VoiceKind::BinauralBeatTransition(
            BinauralBeatTransitionVoice::new(&data.params, duration, sample_rate),
        ),
        "isochronic_tone" => {
            VoiceKind::IsochronicTone(IsochronicToneVoice::new(&data.params, duration, sample_rate))
        }
        "isochronic_tone_transition" => VoiceKind::IsochronicToneTransition(
            IsochronicToneTransitionVoice::new(&data.params, duration, sample_rate),
        ),
        "noise_swept_notch" => VoiceKind::NoiseSweptNotch(NoiseSweptNotchVoice::new(
            &data.params,
            duration,
            sample_rate,
            false,
        )),
        "noise_swept_notch_transition" => VoiceKind::NoiseSweptNotch(NoiseSweptNotchVoice::new(
            &data.params,
            duration,
            sample_rate,
            true,
        )),
        other => {
            log::warn!("unknown synth function '{other}', skipping voice");
            return None;
        }
    };

    if let Some(points) = &data.volume_envelope {
        let env = build_volume_envelope(points, duration, sample_rate as u32);
        voice = VoiceKind::VolumeEnvelope(Box::new(VolumeEnvelopeVoice::new(Box::new(voice), env)));
    }
    Some(voice)
}

/// Collect the phases of every oscillator voice, in slot order.
pub fn harvest_phases(voices: &[StepVoice]) -> Vec<(f32, f32)> {
    voices.iter().filter_map(|sv| sv.voice.phases()).collect()
}

/// Apply harvested phases to the oscillator voices of the next step, in
/// slot order. Slots without phase state on either side are skipped.
pub fn apply_phases(voices: &mut [StepVoice], phases: &[(f32, f32)]) {
    let mut iter = phases.iter();
    for sv in voices.iter_mut() {
        if sv.voice.phases().is_some() {
            match iter.next() {
                Some(&(l, r)) => sv.voice.set_phases(l, r),
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn render(voice: &mut VoiceKind, frames: usize) -> Vec<f32> {
        let mut buf = vec![0.0f32; frames * 2];
        voice.process(&mut buf);
        buf
    }

    #[test]
    fn pure_tone_channels_match_when_beat_is_zero() {
        let p = params(&[
            ("baseFreq", json!(220.0)),
            ("beatFreq", json!(0.0)),
            ("ampL", json!(1.0)),
            ("ampR", json!(1.0)),
        ]);
        let mut voice = VoiceKind::BinauralBeat(BinauralBeatVoice::new(&p, 0.1, 44100.0));
        let out = render(&mut voice, 4410);
        let peak = out.iter().fold(0.0f32, |m, v| m.max(v.abs()));
        assert!(peak > 0.98 && peak <= 1.0 + 1e-4);
        for i in 0..4410 {
            assert!((out[i * 2] - out[i * 2 + 1]).abs() < 1e-6);
        }
    }

    #[test]
    fn beat_detunes_the_channels_symmetrically() {
        // 10 Hz beat on a 200 Hz base: left runs at 195 Hz, right at 205 Hz.
        let p = params(&[
            ("baseFreq", json!(200.0)),
            ("beatFreq", json!(10.0)),
            ("ampL", json!(1.0)),
            ("ampR", json!(1.0)),
        ]);
        let fs = 44100.0;
        let mut voice = VoiceKind::BinauralBeat(BinauralBeatVoice::new(&p, 1.0, fs));
        let out = render(&mut voice, 44100);

        let cycles = |ch: usize| {
            let mut crossings = 0usize;
            for i in 1..44100 {
                if out[(i - 1) * 2 + ch] <= 0.0 && out[i * 2 + ch] > 0.0 {
                    crossings += 1;
                }
            }
            crossings as f32
        };
        assert!((cycles(0) - 195.0).abs() <= 1.0);
        assert!((cycles(1) - 205.0).abs() <= 1.0);
    }

    #[test]
    fn left_high_flips_beat_polarity() {
        let p = params(&[
            ("baseFreq", json!(200.0)),
            ("beatFreq", json!(10.0)),
            ("leftHigh", json!(true)),
            ("ampL", json!(1.0)),
            ("ampR", json!(1.0)),
        ]);
        let mut voice = VoiceKind::BinauralBeat(BinauralBeatVoice::new(&p, 1.0, 44100.0));
        let out = render(&mut voice, 44100);
        let mut left_crossings = 0usize;
        for i in 1..44100 {
            if out[(i - 1) * 2] <= 0.0 && out[i * 2] > 0.0 {
                left_crossings += 1;
            }
        }
        assert!((left_crossings as f32 - 205.0).abs() <= 1.0);
    }

    #[test]
    fn transition_defaults_cascade_to_static_voice() {
        // Only baseFreq given: transition must degrade to a constant tone.
        let p = params(&[("baseFreq", json!(300.0)), ("ampL", json!(1.0)), ("ampR", json!(1.0))]);
        let fs = 8000.0;
        let mut transition =
            VoiceKind::BinauralBeatTransition(BinauralBeatTransitionVoice::new(&p, 0.5, fs));
        let mut plain = VoiceKind::BinauralBeat(BinauralBeatVoice::new(&p, 0.5, fs));
        let a = render(&mut transition, 4000);
        let b = render(&mut plain, 4000);
        for i in 0..a.len() {
            assert!((a[i] - b[i]).abs() < 1e-4);
        }
    }

    #[test]
    fn transition_curves_shape_alpha() {
        assert_eq!(TransitionCurve::Linear.apply(0.5), 0.5);
        assert!((TransitionCurve::Logarithmic.apply(0.5) - 0.75).abs() < 1e-6);
        assert!((TransitionCurve::Exponential.apply(0.5) - 0.25).abs() < 1e-6);
    }

    #[test]
    fn isochronic_gate_produces_silent_gaps() {
        let p = params(&[
            ("baseFreq", json!(440.0)),
            ("beatFreq", json!(5.0)),
            ("rampPercent", json!(0.1)),
            ("gapPercent", json!(0.5)),
            ("ampL", json!(1.0)),
            ("ampR", json!(1.0)),
        ]);
        let fs = 44100.0;
        let mut voice = VoiceKind::IsochronicTone(IsochronicToneVoice::new(&p, 1.0, fs));
        let out = render(&mut voice, 44100);
        // One cycle is 0.2s; the second half of each cycle must be silent.
        let cycle = (fs / 5.0) as usize;
        let gap_sample = cycle / 2 + cycle / 8;
        assert_eq!(out[gap_sample * 2], 0.0);
        let top_sample = cycle / 4;
        assert!(out[top_sample * 2].abs() <= 1.0);
    }

    #[test]
    fn volume_envelope_scales_and_outlives_inner() {
        let p = params(&[
            ("baseFreq", json!(100.0)),
            ("beatFreq", json!(0.0)),
            ("ampL", json!(1.0)),
            ("ampR", json!(1.0)),
        ]);
        let inner = VoiceKind::BinauralBeat(BinauralBeatVoice::new(&p, 0.01, 1000.0));
        let mut wrapped = VoiceKind::VolumeEnvelope(Box::new(VolumeEnvelopeVoice::new(
            Box::new(inner),
            vec![0.5; 10],
        )));
        assert!(!wrapped.is_finished());
        let out = render(&mut wrapped, 10);
        assert!(out.iter().all(|s| s.abs() <= 0.5 + 1e-6));
        assert!(wrapped.is_finished());
    }

    #[test]
    fn envelope_peak_combines_inner_and_curve() {
        let p = params(&[("ampL", json!(0.8)), ("ampR", json!(0.2))]);
        let inner = VoiceKind::BinauralBeat(BinauralBeatVoice::new(&p, 0.01, 1000.0));
        let wrapped = VoiceKind::VolumeEnvelope(Box::new(VolumeEnvelopeVoice::new(
            Box::new(inner),
            vec![0.25, 0.5],
        )));
        assert!((wrapped.normalization_peak() - 0.4).abs() < 1e-6);
    }

    #[test]
    fn phase_handoff_skips_noise_slots() {
        let p = params(&[("baseFreq", json!(100.0))]);
        let mut voices = vec![
            StepVoice {
                voice: VoiceKind::BinauralBeat(BinauralBeatVoice::new(&p, 0.1, 1000.0)),
                group: VoiceGroup::Binaural,
            },
            StepVoice {
                voice: VoiceKind::BinauralBeat(BinauralBeatVoice::new(&p, 0.1, 1000.0)),
                group: VoiceGroup::Binaural,
            },
        ];
        voices[0].voice.set_phases(1.0, 2.0);
        voices[1].voice.set_phases(3.0, 4.0);
        let harvested = harvest_phases(&voices);
        assert_eq!(harvested, vec![(1.0, 2.0), (3.0, 4.0)]);

        let mut next = vec![StepVoice {
            voice: VoiceKind::BinauralBeat(BinauralBeatVoice::new(&p, 0.1, 1000.0)),
            group: VoiceGroup::Binaural,
        }];
        apply_phases(&mut next, &harvested);
        assert_eq!(next[0].voice.phases(), Some((1.0, 2.0)));
    }

    #[test]
    fn unknown_voice_tag_is_skipped() {
        let step: StepData = serde_json::from_str(
            r#"{
                "duration": 1.0,
                "voices": [
                    { "synth_function": "theremin", "parameters": {} },
                    { "synth_function": "binaural_beat", "parameters": {} }
                ]
            }"#,
        )
        .unwrap();
        let voices = voices_for_step(&step, 1000.0);
        assert_eq!(voices.len(), 1);
    }
}
