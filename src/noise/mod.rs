//! Streaming stereo noise with time-varying notch sweeps.
//!
//! A [`spectral::SpectralNoiseCore`] supplies spectrally shaped mono noise;
//! this module runs it through per-sweep notch cascades inside a Hann
//! overlap-add frame, with per-channel RMS compensation so the notches do
//! not dent the perceived loudness.

pub mod spectral;

use crate::dsp::trig::cos_lut;
use crate::noise_params::NoiseParams;
use spectral::SpectralNoiseCore;
use std::cmp::Ordering;

const BLOCK_SIZE: usize = 2048;
const HOP_SIZE: usize = BLOCK_SIZE / 2;

/// Relative change required before the per-channel notch makeup gain is
/// retargeted; block-rate RMS jitter below this is ignored.
const OLA_RMS_HYSTERESIS_RATIO: f32 = 0.20;

/// Per-sample smoothing for the notch makeup gain; settles within a couple
/// of blocks.
const OLA_GAIN_SMOOTHING_COEFF: f32 = 0.998;

/// Samples rendered during warm-up and peak calibration; matches the
/// spectral core's renormalisation window.
const CALIBRATION_WINDOW: usize = 16384;

/// Triangle LFO with the same phase convention as a width-0.5 sawtooth.
fn sawtooth_triangle(phase: f32) -> f32 {
    let t = phase.rem_euclid(2.0 * std::f32::consts::PI) / (2.0 * std::f32::consts::PI);
    if t < 0.5 {
        -1.0 + 4.0 * t
    } else {
        3.0 - 4.0 * t
    }
}

/// LFO sample for the configured waveform. The "sine" waveform is
/// cosine-phased so a zero offset starts at the top of the sweep window.
fn lfo_value(phase: f32, waveform: &str) -> f32 {
    if waveform.eq_ignore_ascii_case("triangle") {
        sawtooth_triangle(phase)
    } else {
        cos_lut(phase)
    }
}

#[derive(Clone, Copy)]
struct NotchCoeffs {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

/// Cookbook notch, computed in f64. Deep cascades accumulate enough error
/// in f32 to spike the peak and poison normalisation.
fn notch_coeffs(freq: f64, q: f64, sample_rate: f64) -> NotchCoeffs {
    let w0 = 2.0 * std::f64::consts::PI * freq / sample_rate;
    let cos_w0 = w0.cos();
    let alpha = w0.sin() / (2.0 * q);
    let a0 = 1.0 + alpha;
    NotchCoeffs {
        b0: 1.0 / a0,
        b1: -2.0 * cos_w0 / a0,
        b2: 1.0 / a0,
        a1: -2.0 * cos_w0 / a0,
        a2: (1.0 - alpha) / a0,
    }
}

#[derive(Clone, Copy)]
struct NotchState {
    z1: f64,
    z2: f64,
}

impl NotchState {
    fn new() -> Self {
        Self { z1: 0.0, z2: 0.0 }
    }
}

/// Run a notch cascade over `block` with per-sample coefficients, keeping
/// the per-stage state continuous across calls. Transposed Direct Form II.
fn notch_cascade_block(
    block: &mut [f32],
    freq_series: &[f32],
    q_series: &[f32],
    casc_series: &[usize],
    state: &mut [NotchState],
    sample_rate: f64,
) {
    let max_stage = state.len();
    for i in 0..block.len() {
        let casc = casc_series[i].clamp(1, max_stage);
        let freq = freq_series[i] as f64;
        if !freq.is_finite() || freq <= 0.0 || freq >= sample_rate * 0.49 {
            continue;
        }
        let q = (q_series[i] as f64).max(1e-6);
        let coeffs = notch_coeffs(freq, q, sample_rate);

        let mut sample = block[i] as f64;
        for st in state.iter_mut().take(casc) {
            let out = sample * coeffs.b0 + st.z1;
            st.z1 = sample * coeffs.b1 - out * coeffs.a1 + st.z2;
            st.z2 = sample * coeffs.b2 - out * coeffs.a2;
            sample = out;
        }
        block[i] = sample as f32;
    }
}

fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|n| 0.5 - 0.5 * (2.0 * std::f32::consts::PI * n as f32 / (size as f32 - 1.0)).cos())
        .collect()
}

/// Sweep endpoints after default substitution.
#[derive(Clone)]
struct SweepLane {
    start_min: f32,
    end_min: f32,
    start_max: f32,
    end_max: f32,
    start_q: f32,
    end_q: f32,
    start_casc: usize,
    end_casc: usize,
}

/// Per-sweep filter memory: one state word pair per cascade stage, per
/// channel, per pass (main + intra-offset).
struct SweepRuntime {
    max_casc: usize,
    l_main: Vec<NotchState>,
    r_main: Vec<NotchState>,
    l_extra: Vec<NotchState>,
    r_extra: Vec<NotchState>,
}

impl SweepRuntime {
    fn new(max_casc: usize) -> Self {
        let max_casc = max_casc.max(1);
        Self {
            max_casc,
            l_main: vec![NotchState::new(); max_casc],
            r_main: vec![NotchState::new(); max_casc],
            l_extra: vec![NotchState::new(); max_casc],
            r_extra: vec![NotchState::new(); max_casc],
        }
    }
}

/// Overlap-add working set. Everything is preallocated; the audio thread
/// must never touch the allocator.
struct OlaState {
    input_ring: Vec<f32>,
    input_write_pos: usize,
    input_samples_buffered: usize,

    out_acc_l: Vec<f32>,
    out_acc_r: Vec<f32>,
    win_acc: Vec<f32>,
    acc_read_pos: usize,
    acc_write_pos: usize,
    samples_ready: usize,
    absolute_block_start: usize,

    window: Vec<f32>,
    block_l: Vec<f32>,
    block_r: Vec<f32>,

    smoothed_gain_l: f32,
    smoothed_gain_r: f32,

    t_vals: Vec<f32>,
    lfo_main_l: Vec<f32>,
    lfo_main_r: Vec<f32>,
    lfo_extra_l: Vec<f32>,
    lfo_extra_r: Vec<f32>,
    q_series: Vec<f32>,
    casc_series: Vec<usize>,
    notch_freq_l: Vec<f32>,
    notch_freq_r: Vec<f32>,
    notch_freq_l_extra: Vec<f32>,
    notch_freq_r_extra: Vec<f32>,
}

impl OlaState {
    fn new() -> Self {
        let acc_size = BLOCK_SIZE * 2;
        Self {
            input_ring: vec![0.0; BLOCK_SIZE],
            input_write_pos: 0,
            input_samples_buffered: 0,
            out_acc_l: vec![0.0; acc_size],
            out_acc_r: vec![0.0; acc_size],
            win_acc: vec![0.0; acc_size],
            acc_read_pos: 0,
            acc_write_pos: 0,
            samples_ready: 0,
            absolute_block_start: 0,
            window: hann_window(BLOCK_SIZE),
            block_l: vec![0.0; BLOCK_SIZE],
            block_r: vec![0.0; BLOCK_SIZE],
            smoothed_gain_l: 1.0,
            smoothed_gain_r: 1.0,
            t_vals: vec![0.0; BLOCK_SIZE],
            lfo_main_l: vec![0.0; BLOCK_SIZE],
            lfo_main_r: vec![0.0; BLOCK_SIZE],
            lfo_extra_l: vec![0.0; BLOCK_SIZE],
            lfo_extra_r: vec![0.0; BLOCK_SIZE],
            q_series: vec![0.0; BLOCK_SIZE],
            casc_series: vec![0; BLOCK_SIZE],
            notch_freq_l: vec![0.0; BLOCK_SIZE],
            notch_freq_r: vec![0.0; BLOCK_SIZE],
            notch_freq_l_extra: vec![0.0; BLOCK_SIZE],
            notch_freq_r_extra: vec![0.0; BLOCK_SIZE],
        }
    }
}

pub struct StreamingNoise {
    sample_rate: f32,
    duration_samples: usize,

    start_lfo_freq: f32,
    end_lfo_freq: f32,
    lfo_freq: f32,
    start_lfo_phase_offset: f32,
    end_lfo_phase_offset: f32,
    start_intra_offset: f32,
    end_intra_offset: f32,
    lfo_waveform: String,
    initial_offset: f32,

    sweeps: Vec<SweepLane>,
    sweep_runtime: Vec<SweepRuntime>,
    transition: bool,

    core: SpectralNoiseCore,
    ola: OlaState,
    total_samples_output: usize,
}

impl StreamingNoise {
    fn build_sweeps(params: &NoiseParams) -> Vec<SweepLane> {
        params
            .sweeps
            .iter()
            .map(|sw| {
                let start_min = if sw.start_min > 0.0 { sw.start_min } else { 1000.0 };
                let end_min = if sw.end_min > 0.0 { sw.end_min } else { start_min };
                let start_max = if sw.start_max > 0.0 {
                    sw.start_max.max(start_min + 1.0)
                } else {
                    start_min + 9000.0
                };
                let end_max = if sw.end_max > 0.0 {
                    sw.end_max.max(end_min + 1.0)
                } else {
                    start_max
                };
                let start_q = if sw.start_q > 0.0 { sw.start_q } else { 25.0 };
                let end_q = if sw.end_q > 0.0 { sw.end_q } else { start_q };
                let start_casc = if sw.start_casc > 0 { sw.start_casc } else { 10 };
                let end_casc = if sw.end_casc > 0 { sw.end_casc } else { start_casc };
                SweepLane {
                    start_min,
                    end_min,
                    start_max,
                    end_max,
                    start_q,
                    end_q,
                    start_casc,
                    end_casc,
                }
            })
            .collect()
    }

    pub fn new(params: &NoiseParams, sample_rate: u32) -> Self {
        let sample_rate_f = sample_rate as f32;
        let duration_samples = (params.duration_seconds * sample_rate_f) as usize;

        let lfo_freq = if params.transition {
            params.start_lfo_freq
        } else if params.lfo_freq != 0.0 {
            params.lfo_freq
        } else {
            1.0 / 12.0
        };

        let sweeps = Self::build_sweeps(params);
        let sweep_runtime: Vec<SweepRuntime> = sweeps
            .iter()
            .map(|lane| SweepRuntime::new(lane.start_casc.max(lane.end_casc)))
            .collect();

        let mut gen = Self {
            sample_rate: sample_rate_f,
            duration_samples,
            start_lfo_freq: if params.start_lfo_freq > 0.0 {
                params.start_lfo_freq
            } else {
                lfo_freq
            },
            end_lfo_freq: if params.end_lfo_freq > 0.0 {
                params.end_lfo_freq
            } else {
                lfo_freq
            },
            lfo_freq,
            start_lfo_phase_offset: params.start_lfo_phase_offset_deg.to_radians(),
            end_lfo_phase_offset: params.end_lfo_phase_offset_deg.to_radians(),
            start_intra_offset: params.start_intra_phase_offset_deg.to_radians(),
            end_intra_offset: params.end_intra_phase_offset_deg.to_radians(),
            lfo_waveform: params.lfo_waveform.clone(),
            initial_offset: params.initial_offset,
            sweeps,
            sweep_runtime,
            transition: params.transition,
            core: SpectralNoiseCore::new(params, sample_rate_f),
            ola: OlaState::new(),
            total_samples_output: 0,
        };

        // Without sweeps the static makeup gain must latch before real
        // output starts, otherwise the first window fades in audibly.
        if params.sweeps.is_empty() {
            for _ in 0..CALIBRATION_WINDOW {
                gen.core.next();
            }
        }

        gen
    }

    /// Retune the sweeps in place. Returns false when the new parameters do
    /// not fit the allocated cascade stages (or the sweep count changed);
    /// the caller must rebuild the generator in that case.
    pub fn update_realtime_params(&mut self, params: &NoiseParams) -> bool {
        if params.sweeps.len() != self.sweeps.len() {
            return false;
        }

        let sweeps = Self::build_sweeps(params);
        for (rt, lane) in self.sweep_runtime.iter_mut().zip(&sweeps) {
            let max_casc = lane.start_casc.max(lane.end_casc).max(1);
            if max_casc > rt.max_casc {
                return false;
            }
            rt.max_casc = max_casc;
        }

        let lfo_freq = if params.transition {
            params.start_lfo_freq
        } else if params.lfo_freq != 0.0 {
            params.lfo_freq
        } else {
            1.0 / 12.0
        };

        self.sweeps = sweeps;
        self.transition = params.transition;
        self.lfo_waveform = params.lfo_waveform.clone();
        self.start_lfo_freq = if params.start_lfo_freq > 0.0 {
            params.start_lfo_freq
        } else {
            lfo_freq
        };
        self.end_lfo_freq = if params.end_lfo_freq > 0.0 {
            params.end_lfo_freq
        } else {
            lfo_freq
        };
        self.lfo_freq = lfo_freq;
        self.start_lfo_phase_offset = params.start_lfo_phase_offset_deg.to_radians();
        self.end_lfo_phase_offset = params.end_lfo_phase_offset_deg.to_radians();
        self.start_intra_offset = params.start_intra_phase_offset_deg.to_radians();
        self.end_intra_offset = params.end_intra_phase_offset_deg.to_radians();
        true
    }

    /// Build a generator together with a robust peak estimate from a
    /// throwaway calibration run. The 99.9th percentile of |x| is used
    /// instead of the absolute maximum: deep high-Q cascades can produce
    /// single-sample spikes that would otherwise collapse normalisation.
    pub fn new_with_calibrated_peak(params: &NoiseParams, sample_rate: u32) -> (Self, f32) {
        let mut calibration = StreamingNoise::new(params, sample_rate);
        let mut scratch = vec![0.0f32; CALIBRATION_WINDOW * 2];
        calibration.generate(&mut scratch);

        let mut abs_vals: Vec<f32> = scratch.iter().map(|v| v.abs()).collect();
        abs_vals.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
        let idx = ((abs_vals.len() as f64) * 0.999).floor() as usize;
        let idx = idx.min(abs_vals.len().saturating_sub(1));
        let peak = abs_vals.get(idx).copied().unwrap_or(0.0).max(1e-9);

        (StreamingNoise::new(params, sample_rate), peak)
    }

    /// Advance the stream without producing output (seek realignment).
    pub fn skip_samples(&mut self, n: usize) {
        let mut scratch = vec![0.0f32; 4096];
        let mut remaining = n;
        while remaining > 0 {
            let frames = remaining.min(2048);
            self.generate(&mut scratch[..frames * 2]);
            remaining -= frames;
        }
    }

    fn transition_fraction(&self, sample_idx: usize) -> f32 {
        if !self.transition || self.duration_samples == 0 {
            return 0.0;
        }
        (sample_idx as f32 / self.duration_samples as f32).clamp(0.0, 1.0)
    }

    fn interpolate_lfo_freq(&self, t: f32) -> f32 {
        if !self.transition {
            return self.lfo_freq;
        }
        self.start_lfo_freq + (self.end_lfo_freq - self.start_lfo_freq) * t
    }

    fn interpolate_phase_offset(&self, t: f32) -> f32 {
        if !self.transition {
            return self.start_lfo_phase_offset;
        }
        self.start_lfo_phase_offset + (self.end_lfo_phase_offset - self.start_lfo_phase_offset) * t
    }

    fn interpolate_intra_offset(&self, t: f32) -> f32 {
        if !self.transition {
            return self.start_intra_offset;
        }
        self.start_intra_offset + (self.end_intra_offset - self.start_intra_offset) * t
    }

    fn lfo_phase(&self, sample_idx: usize, lfo_freq: f32, extra_offset: f32) -> f32 {
        let t = sample_idx as f32 / self.sample_rate + self.initial_offset;
        2.0 * std::f32::consts::PI * lfo_freq * t + extra_offset
    }

    /// Filter one Hann frame and fold it into the accumulators. Runs at
    /// hop rate from `generate`; uses only preallocated buffers.
    fn process_ola_block(&mut self) {
        let acc_size = self.ola.out_acc_l.len();
        let block_start = self.ola.absolute_block_start;
        let do_extra = self.start_intra_offset.abs() > 1e-6 || self.end_intra_offset.abs() > 1e-6;

        for i in 0..BLOCK_SIZE {
            let abs_idx = block_start + i;
            let t = self.transition_fraction(abs_idx);
            self.ola.t_vals[i] = t;

            let lfo_freq = self.interpolate_lfo_freq(t);
            let phase_offset = self.interpolate_phase_offset(t);
            let intra_offset = self.interpolate_intra_offset(t);

            let l_phase = self.lfo_phase(abs_idx, lfo_freq, 0.0);
            let r_phase = self.lfo_phase(abs_idx, lfo_freq, phase_offset);
            self.ola.lfo_main_l[i] = lfo_value(l_phase, &self.lfo_waveform);
            self.ola.lfo_main_r[i] = lfo_value(r_phase, &self.lfo_waveform);
            if do_extra {
                self.ola.lfo_extra_l[i] = lfo_value(l_phase + intra_offset, &self.lfo_waveform);
                self.ola.lfo_extra_r[i] = lfo_value(r_phase + intra_offset, &self.lfo_waveform);
            }
        }

        // The window is applied after filtering so the IIR cascades see a
        // continuous signal; here we only copy the raw input and remember
        // its RMS for the makeup stage.
        let mut sum_sq_in: f32 = 0.0;
        for i in 0..BLOCK_SIZE {
            let ring_idx = (self.ola.input_write_pos + BLOCK_SIZE - self.ola.input_samples_buffered
                + i)
                % BLOCK_SIZE;
            let base = self.ola.input_ring[ring_idx];
            self.ola.block_l[i] = base;
            self.ola.block_r[i] = base;
            sum_sq_in += base * base;
        }
        let rms_in = (sum_sq_in / BLOCK_SIZE as f32).sqrt();

        for (si, lane) in self.sweeps.iter().enumerate() {
            let rt = &mut self.sweep_runtime[si];
            for i in 0..BLOCK_SIZE {
                let t = self.ola.t_vals[i];
                let min_f = lane.start_min + (lane.end_min - lane.start_min) * t;
                let max_f = lane.start_max + (lane.end_max - lane.start_max) * t;
                self.ola.q_series[i] = lane.start_q + (lane.end_q - lane.start_q) * t;
                let casc_f =
                    lane.start_casc as f32 + (lane.end_casc as f32 - lane.start_casc as f32) * t;
                self.ola.casc_series[i] = (casc_f.round().max(1.0) as usize).min(rt.max_casc);

                let center = (min_f + max_f) * 0.5;
                let range = (max_f - min_f) * 0.5;
                self.ola.notch_freq_l[i] = center + range * self.ola.lfo_main_l[i];
                self.ola.notch_freq_r[i] = center + range * self.ola.lfo_main_r[i];
                if do_extra {
                    self.ola.notch_freq_l_extra[i] = center + range * self.ola.lfo_extra_l[i];
                    self.ola.notch_freq_r_extra[i] = center + range * self.ola.lfo_extra_r[i];
                }
            }

            notch_cascade_block(
                &mut self.ola.block_l,
                &self.ola.notch_freq_l,
                &self.ola.q_series,
                &self.ola.casc_series,
                &mut rt.l_main,
                self.sample_rate as f64,
            );
            notch_cascade_block(
                &mut self.ola.block_r,
                &self.ola.notch_freq_r,
                &self.ola.q_series,
                &self.ola.casc_series,
                &mut rt.r_main,
                self.sample_rate as f64,
            );
            if do_extra {
                notch_cascade_block(
                    &mut self.ola.block_l,
                    &self.ola.notch_freq_l_extra,
                    &self.ola.q_series,
                    &self.ola.casc_series,
                    &mut rt.l_extra,
                    self.sample_rate as f64,
                );
                notch_cascade_block(
                    &mut self.ola.block_r,
                    &self.ola.notch_freq_r_extra,
                    &self.ola.q_series,
                    &self.ola.casc_series,
                    &mut rt.r_extra,
                    self.sample_rate as f64,
                );
            }
        }

        // Per-channel makeup toward the pre-notch RMS, with hysteresis so
        // the gain does not chase block-to-block jitter as the notch moves.
        if !self.sweeps.is_empty() && rms_in > 1e-8 {
            let mut sum_sq_l: f32 = 0.0;
            let mut sum_sq_r: f32 = 0.0;
            for i in 0..BLOCK_SIZE {
                sum_sq_l += self.ola.block_l[i] * self.ola.block_l[i];
                sum_sq_r += self.ola.block_r[i] * self.ola.block_r[i];
            }
            let rms_l = (sum_sq_l / BLOCK_SIZE as f32).sqrt();
            let rms_r = (sum_sq_r / BLOCK_SIZE as f32).sqrt();

            let raw_target_l = if rms_l > 1e-8 {
                (rms_in / rms_l).clamp(0.25, 16.0)
            } else {
                self.ola.smoothed_gain_l
            };
            let raw_target_r = if rms_r > 1e-8 {
                (rms_in / rms_r).clamp(0.25, 16.0)
            } else {
                self.ola.smoothed_gain_r
            };

            let ratio_diff_l =
                (raw_target_l - self.ola.smoothed_gain_l).abs() / self.ola.smoothed_gain_l.max(0.01);
            let ratio_diff_r =
                (raw_target_r - self.ola.smoothed_gain_r).abs() / self.ola.smoothed_gain_r.max(0.01);
            let target_gain_l = if ratio_diff_l > OLA_RMS_HYSTERESIS_RATIO {
                raw_target_l
            } else {
                self.ola.smoothed_gain_l
            };
            let target_gain_r = if ratio_diff_r > OLA_RMS_HYSTERESIS_RATIO {
                raw_target_r
            } else {
                self.ola.smoothed_gain_r
            };

            let coeff = OLA_GAIN_SMOOTHING_COEFF;
            for sample in self.ola.block_l.iter_mut() {
                self.ola.smoothed_gain_l =
                    coeff * self.ola.smoothed_gain_l + (1.0 - coeff) * target_gain_l;
                *sample *= self.ola.smoothed_gain_l;
            }
            for sample in self.ola.block_r.iter_mut() {
                self.ola.smoothed_gain_r =
                    coeff * self.ola.smoothed_gain_r + (1.0 - coeff) * target_gain_r;
                *sample *= self.ola.smoothed_gain_r;
            }
        }

        for i in 0..BLOCK_SIZE {
            self.ola.block_l[i] *= self.ola.window[i];
            self.ola.block_r[i] *= self.ola.window[i];
        }

        let write_base = self.ola.acc_write_pos;
        for i in 0..BLOCK_SIZE {
            let acc_idx = (write_base + i) % acc_size;
            self.ola.out_acc_l[acc_idx] += self.ola.block_l[i];
            self.ola.out_acc_r[acc_idx] += self.ola.block_r[i];
            self.ola.win_acc[acc_idx] += self.ola.window[i];
        }

        self.ola.acc_write_pos = (self.ola.acc_write_pos + HOP_SIZE) % acc_size;
        self.ola.samples_ready += HOP_SIZE;
        self.ola.absolute_block_start += HOP_SIZE;
    }

    /// Fill `out` (interleaved stereo) with filtered noise.
    pub fn generate(&mut self, out: &mut [f32]) {
        let frames = out.len() / 2;
        let acc_size = self.ola.out_acc_l.len();
        let mut frames_written = 0;

        while frames_written < frames {
            if self.ola.samples_ready > 0 {
                let read_pos = self.ola.acc_read_pos;
                let win_val = self.ola.win_acc[read_pos];
                let (l, r) = if win_val > 1e-8 {
                    (
                        self.ola.out_acc_l[read_pos] / win_val,
                        self.ola.out_acc_r[read_pos] / win_val,
                    )
                } else {
                    (0.0, 0.0)
                };
                out[frames_written * 2] = l;
                out[frames_written * 2 + 1] = r;

                self.ola.out_acc_l[read_pos] = 0.0;
                self.ola.out_acc_r[read_pos] = 0.0;
                self.ola.win_acc[read_pos] = 0.0;
                self.ola.acc_read_pos = (read_pos + 1) % acc_size;
                self.ola.samples_ready -= 1;
                self.total_samples_output += 1;
                frames_written += 1;
            } else {
                while self.ola.input_samples_buffered < BLOCK_SIZE {
                    let sample = self.core.next();
                    self.ola.input_ring[self.ola.input_write_pos] = sample;
                    self.ola.input_write_pos = (self.ola.input_write_pos + 1) % BLOCK_SIZE;
                    self.ola.input_samples_buffered += 1;
                }
                self.process_ola_block();
                // 50% overlap: the next frame reuses half of this one.
                self.ola.input_samples_buffered = BLOCK_SIZE - HOP_SIZE;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::noise_params::NoiseSweep;

    fn flat_pink(duration: f32) -> NoiseParams {
        NoiseParams {
            duration_seconds: duration,
            exponent: Some(1.0),
            lowcut: Some(100.0),
            highcut: Some(8000.0),
            seed: Some(11),
            ..Default::default()
        }
    }

    fn swept(duration: f32) -> NoiseParams {
        NoiseParams {
            duration_seconds: duration,
            exponent: Some(1.0),
            seed: Some(11),
            lfo_freq: 0.5,
            sweeps: vec![NoiseSweep {
                start_min: 800.0,
                start_max: 2000.0,
                start_q: 20.0,
                start_casc: 4,
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn window_rms(samples: &[f32]) -> f32 {
        let sum: f32 = samples.iter().map(|x| x * x).sum();
        (sum / samples.len() as f32).sqrt()
    }

    #[test]
    fn steady_noise_rms_is_stable() {
        let mut noise = StreamingNoise::new(&flat_pink(3.0), 44100);
        let total = 44100 * 3;
        let mut out = vec![0.0f32; total * 2];
        noise.generate(&mut out);

        // Warm-up: skip the first renorm window, then compare 16k windows.
        let window = 16384 * 2;
        let windows: Vec<f32> = out[window..]
            .chunks(window)
            .filter(|c| c.len() == window)
            .map(window_rms)
            .collect();
        let mean = windows.iter().sum::<f32>() / windows.len() as f32;
        for w in &windows {
            assert!((w - mean).abs() / mean < 0.05, "window {w} vs mean {mean}");
        }
        assert!(out.iter().all(|s| s.is_finite() && s.abs() <= 1.0 + 1e-3));
    }

    #[test]
    fn swept_notch_output_is_finite_and_compensated() {
        let mut noise = StreamingNoise::new(&swept(2.0), 44100);
        let mut out = vec![0.0f32; 44100 * 2 * 2];
        noise.generate(&mut out);
        assert!(out.iter().all(|s| s.is_finite()));
        let tail = &out[out.len() / 2..];
        assert!(window_rms(tail) > 0.01);
    }

    #[test]
    fn incompatible_update_is_rejected() {
        let mut noise = StreamingNoise::new(&swept(2.0), 44100);

        // Same shape, retuned: accepted.
        let mut retuned = swept(2.0);
        retuned.sweeps[0].start_q = 30.0;
        assert!(noise.update_realtime_params(&retuned));

        // Deeper cascade than allocated: rejected.
        let mut deeper = swept(2.0);
        deeper.sweeps[0].start_casc = 12;
        assert!(!noise.update_realtime_params(&deeper));

        // Different sweep count: rejected.
        let mut more = swept(2.0);
        more.sweeps.push(NoiseSweep::default());
        assert!(!noise.update_realtime_params(&more));
    }

    #[test]
    fn skip_samples_advances_clock() {
        let mut noise = StreamingNoise::new(&flat_pink(1.0), 44100);
        noise.skip_samples(4096);
        assert_eq!(noise.total_samples_output, 4096);
    }

    #[test]
    fn triangle_lfo_spans_unit_range() {
        assert!((sawtooth_triangle(0.0) + 1.0).abs() < 1e-6);
        assert!((sawtooth_triangle(std::f32::consts::PI) - 1.0).abs() < 1e-6);
    }
}
