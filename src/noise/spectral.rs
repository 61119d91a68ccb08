//! FFT-shaped coloured-noise source.
//!
//! Blocks are rendered off the audio thread by a dedicated worker and
//! double-buffered; the synthesis cursor crossfades into each fresh block
//! and falls back to looping the current one when the worker is late.

use crate::noise_params::{colour_preset, NoiseParams};
use biquad::{Biquad, Coefficients, DirectForm2Transposed, ToHertz, Type, Q_BUTTERWORTH_F32};
use crossbeam::channel::{bounded, Receiver, Sender, TryRecvError};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;
use std::thread;

/// Raised-cosine overlap between the outgoing and incoming noise block.
const CROSSFADE_SAMPLES: usize = 2048;

/// Fade length masking the discontinuity when the buffer has to loop
/// because the worker missed its deadline.
const UNDERRUN_FADE_SAMPLES: usize = 512;

/// Window over which pre/post filter RMS is compared for makeup gain.
const RENORM_WINDOW: usize = 16384;

/// Relative change required before the makeup gain is retargeted.
const RENORM_HYSTERESIS_RATIO: f32 = 0.10;

/// One-pole coefficient smoothing the applied makeup gain.
const GAIN_SMOOTHING_COEFF: f32 = 0.99995;

/// Fallback block length (~0.74 s at 44.1 kHz) when the configured noise
/// duration is zero or longer than one chunk.
const DEFAULT_BLOCK: usize = 1 << 15;

struct RenderRequest {
    buffer: Vec<f32>,
}

struct RenderResponse {
    buffer: Vec<f32>,
    target_rms: Option<f32>,
}

/// Background renderer owning the FFT plans, the seeded Gaussian source and
/// the latched target RMS. Lives on its own thread; exits when the request
/// channel closes.
struct SpectralWorker {
    rx: Receiver<RenderRequest>,
    tx: Sender<RenderResponse>,

    size: usize,
    exponent: f32,
    high_exponent: f32,
    distribution_curve: f32,
    sample_rate: f32,
    fft_forward: Arc<dyn Fft<f32>>,
    fft_inverse: Arc<dyn Fft<f32>>,
    rng: StdRng,
    normal: Normal<f32>,
    spectrum: Vec<Complex<f32>>,

    target_rms: Option<f32>,
}

impl SpectralWorker {
    fn run(mut self) {
        while let Ok(mut req) = self.rx.recv() {
            // A panic here must not take down the audio pipeline.
            if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                self.render_into(&mut req.buffer);
            }))
            .is_err()
            {
                log::error!("spectral noise worker panicked; emitting silence");
                req.buffer.fill(0.0);
            }
            if self
                .tx
                .send(RenderResponse {
                    buffer: req.buffer,
                    target_rms: self.target_rms,
                })
                .is_err()
            {
                break;
            }
        }
    }

    fn render_into(&mut self, target: &mut Vec<f32>) {
        if target.len() != self.size {
            target.resize(self.size, 0.0);
        }

        for slot in self.spectrum.iter_mut() {
            *slot = Complex::new(self.normal.sample(&mut self.rng), 0.0);
        }
        self.fft_forward.process(&mut self.spectrum);

        let nyquist = self.sample_rate / 2.0;
        let min_f = self.sample_rate / self.size as f32;
        let log_min = min_f.ln();
        let log_span = (nyquist.ln() - log_min).max(1e-12);

        self.spectrum[0] = Complex::new(0.0, 0.0);
        for i in 1..=self.size / 2 {
            let freq = i as f32 * self.sample_rate / self.size as f32;
            let log_norm = ((freq.ln() - log_min) / log_span).clamp(0.0, 1.0);
            let interp = log_norm.powf(self.distribution_curve);
            let current_exp = self.exponent + (self.high_exponent - self.exponent) * interp;
            let scale = freq.powf(-current_exp / 2.0);

            self.spectrum[i] *= scale;
            if i < self.size / 2 {
                self.spectrum[self.size - i] = self.spectrum[i].conj();
            } else {
                // Nyquist bin must stay real.
                self.spectrum[i].im = 0.0;
            }
        }

        self.fft_inverse.process(&mut self.spectrum);
        let inv_n = 1.0 / self.size as f32;
        for (out, bin) in target.iter_mut().zip(&self.spectrum) {
            *out = bin.re * inv_n;
        }

        // RMS lock: the first block is peak-normalised and defines the
        // target; every later block is scaled to that target and clamped.
        let current_rms = rms(target);
        if current_rms > 1e-9 {
            if let Some(target_rms) = self.target_rms {
                let gain = target_rms / current_rms;
                for x in target.iter_mut() {
                    *x = (*x * gain).clamp(-1.0, 1.0);
                }
            } else {
                let max_val = target.iter().fold(0.0f32, |acc, &v| acc.max(v.abs()));
                if max_val > 1e-9 {
                    for x in target.iter_mut() {
                        *x /= max_val;
                    }
                    self.target_rms = Some(rms(target));
                }
            }
        }
    }
}

fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|x| x * x).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

/// Mono coloured-noise stream: double-buffered FFT blocks with handoff
/// crossfade, underrun masking and optional Butterworth band limiting with
/// post-filter RMS makeup.
pub struct SpectralNoiseCore {
    buffer: Vec<f32>,
    next_buffer: Vec<f32>,
    next_ready: bool,
    cursor: usize,
    size: usize,

    worker_tx: Sender<RenderRequest>,
    worker_rx: Receiver<RenderResponse>,
    worker_requested: bool,

    highpass: Option<Vec<DirectForm2Transposed<f32>>>,
    lowpass: Option<Vec<DirectForm2Transposed<f32>>>,
    base_amplitude: f32,

    renorm_gain: f32,
    smoothed_gain: f32,
    renorm_initialized: bool,
    pre_rms_accum: f32,
    post_rms_accum: f32,
    rms_samples: usize,
    /// Static shelves never move, so the makeup gain is latched after the
    /// first window instead of tracked.
    is_unmodulated: bool,

    underrun_recovering: bool,
    underrun_fade_pos: usize,
}

impl SpectralNoiseCore {
    pub fn new(params: &NoiseParams, sample_rate: f32) -> Self {
        let preset = colour_preset(&params.colour_name());
        let exponent = params
            .exponent
            .or_else(|| preset.as_ref().map(|p| p.exponent))
            .unwrap_or(0.0);
        let high_exponent = params
            .high_exponent
            .or_else(|| preset.as_ref().map(|p| p.high_exponent))
            .unwrap_or(exponent);
        let distribution_curve = params
            .distribution_curve
            .or_else(|| preset.as_ref().map(|p| p.distribution_curve))
            .unwrap_or(1.0)
            .max(1e-6);
        let lowcut = params.lowcut.or_else(|| preset.as_ref().and_then(|p| p.lowcut));
        let highcut = params
            .highcut
            .or_else(|| preset.as_ref().and_then(|p| p.highcut));
        let amplitude = params
            .amplitude
            .or_else(|| preset.as_ref().map(|p| p.amplitude))
            .unwrap_or(1.0);
        let seed = params.seed.unwrap_or(1).max(0) as u64;

        // Short requested durations become the block length exactly; anything
        // longer streams in default-sized chunks.
        let requested = (params.duration_seconds.max(0.0) * sample_rate) as usize;
        let mut size = if requested > 0 && requested < DEFAULT_BLOCK {
            requested
        } else {
            DEFAULT_BLOCK
        };
        if size < 8 {
            size = 8;
        }
        if size % 2 != 0 {
            size += 1;
        }

        let mut planner = FftPlanner::new();
        let fft_forward = planner.plan_fft_forward(size);
        let fft_inverse = planner.plan_fft_inverse(size);

        let nyquist = sample_rate / 2.0;
        let highpass = lowcut.and_then(|fc| {
            if fc > 0.0 && fc < nyquist {
                Coefficients::<f32>::from_params(
                    Type::HighPass,
                    sample_rate.hz(),
                    fc.hz(),
                    Q_BUTTERWORTH_F32,
                )
                .ok()
                .map(|c| vec![DirectForm2Transposed::<f32>::new(c); 2])
            } else {
                None
            }
        });
        let lowpass = highcut.and_then(|fc| {
            if fc > 0.0 && fc < nyquist {
                Coefficients::<f32>::from_params(
                    Type::LowPass,
                    sample_rate.hz(),
                    fc.hz(),
                    Q_BUTTERWORTH_F32,
                )
                .ok()
                .map(|c| vec![DirectForm2Transposed::<f32>::new(c); 2])
            } else {
                None
            }
        });

        let (req_tx, req_rx) = bounded::<RenderRequest>(2);
        let (res_tx, res_rx) = bounded::<RenderResponse>(2);
        let worker = SpectralWorker {
            rx: req_rx,
            tx: res_tx,
            size,
            exponent,
            high_exponent,
            distribution_curve,
            sample_rate,
            fft_forward,
            fft_inverse,
            rng: StdRng::seed_from_u64(seed),
            normal: Normal::new(0.0, 1.0).expect("unit normal"),
            spectrum: vec![Complex::new(0.0, 0.0); size],
            target_rms: None,
        };
        thread::spawn(move || worker.run());

        // Prime the pipeline with two blocks so playback never starts on an
        // empty buffer; constructing happens on the control path where a
        // blocking wait is acceptable.
        let _ = req_tx.send(RenderRequest {
            buffer: vec![0.0; size],
        });
        let first = res_rx.recv().expect("spectral worker died on first block");
        let _ = req_tx.send(RenderRequest {
            buffer: vec![0.0; size],
        });
        let second = res_rx.recv().expect("spectral worker died on second block");

        Self {
            buffer: first.buffer,
            next_buffer: second.buffer,
            next_ready: true,
            cursor: 0,
            size,
            worker_tx: req_tx,
            worker_rx: res_rx,
            worker_requested: false,
            highpass,
            lowpass,
            base_amplitude: amplitude,
            renorm_gain: 1.0,
            smoothed_gain: 1.0,
            renorm_initialized: false,
            pre_rms_accum: 0.0,
            post_rms_accum: 0.0,
            rms_samples: 0,
            is_unmodulated: true,
            underrun_recovering: false,
            underrun_fade_pos: 0,
        }
    }

    fn crossfade_len(&self) -> usize {
        self.buffer.len().min(CROSSFADE_SAMPLES)
    }

    /// Next mono sample. Never blocks: missing worker responses degrade to
    /// a looped buffer with a masking fade.
    pub fn next(&mut self) -> f32 {
        let crossfade_len = self.crossfade_len();

        // Ask for the replacement block as soon as the cursor passes the
        // midpoint, recycling the spent buffer's allocation.
        if !self.next_ready && !self.worker_requested && self.cursor >= self.size / 2 {
            let mut recycled = std::mem::take(&mut self.next_buffer);
            if recycled.len() != self.size {
                recycled.resize(self.size, 0.0);
            }
            if self.worker_tx.try_send(RenderRequest { buffer: recycled }).is_ok() {
                self.worker_requested = true;
            }
        }

        if self.worker_requested {
            match self.worker_rx.try_recv() {
                Ok(response) => {
                    self.next_buffer = response.buffer;
                    self.next_ready = true;
                    self.worker_requested = false;
                }
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => {
                    self.worker_requested = false;
                }
            }
        }

        if self.cursor >= self.buffer.len() {
            if self.next_ready {
                // The crossfade already consumed the head of the new block.
                let skip = crossfade_len.min(self.next_buffer.len());
                std::mem::swap(&mut self.buffer, &mut self.next_buffer);
                self.cursor = skip;
                self.next_ready = false;
                self.underrun_recovering = false;
                self.underrun_fade_pos = 0;
            } else {
                // Worker missed the deadline: loop this buffer and fade the
                // seam.
                self.cursor = 0;
                self.underrun_recovering = true;
                self.underrun_fade_pos = 0;
            }
        }

        let mut sample = if self.next_ready {
            let crossfade_start = self.buffer.len().saturating_sub(crossfade_len);
            if self.cursor >= crossfade_start && crossfade_len > 0 && !self.next_buffer.is_empty() {
                let idx = self.cursor - crossfade_start;
                let t = idx as f32 / crossfade_len as f32;
                let fade_out = 0.5 * (1.0 + (std::f32::consts::PI * t).cos());
                let next_sample = self.next_buffer.get(idx).copied().unwrap_or(0.0);
                self.buffer[self.cursor] * fade_out + next_sample * (1.0 - fade_out)
            } else {
                self.buffer[self.cursor]
            }
        } else {
            self.buffer[self.cursor]
        };

        if self.underrun_recovering {
            if self.underrun_fade_pos < UNDERRUN_FADE_SAMPLES {
                let pos = self.underrun_fade_pos;
                let t = pos as f32 / UNDERRUN_FADE_SAMPLES as f32;
                let fade_in = 0.5 * (1.0 - (std::f32::consts::PI * t).cos());

                let tail_base = self.buffer.len().saturating_sub(UNDERRUN_FADE_SAMPLES);
                let tail_idx = (tail_base + pos).min(self.buffer.len().saturating_sub(1));
                sample = self.buffer[tail_idx] * (1.0 - fade_in) + sample * fade_in;
                self.underrun_fade_pos += 1;
            } else {
                self.underrun_recovering = false;
                self.underrun_fade_pos = 0;
            }
        }

        self.cursor += 1;

        let pre_filter = sample;
        if let Some(filters) = &mut self.highpass {
            for f in filters {
                sample = f.run(sample);
            }
        }
        if let Some(filters) = &mut self.lowpass {
            for f in filters {
                sample = f.run(sample);
            }
        }
        sample = self.apply_post_filter_renorm(pre_filter, sample);

        sample * self.base_amplitude
    }

    fn apply_post_filter_renorm(&mut self, pre: f32, post: f32) -> f32 {
        self.pre_rms_accum += pre * pre;
        self.post_rms_accum += post * post;
        self.rms_samples += 1;

        if self.rms_samples >= RENORM_WINDOW {
            let pre_rms = (self.pre_rms_accum / self.rms_samples as f32).sqrt();
            let post_rms = (self.post_rms_accum / self.rms_samples as f32).sqrt();

            if pre_rms > 1e-6 && post_rms > 1e-6 {
                let target_gain = (pre_rms / post_rms).clamp(0.25, 16.0);
                if self.is_unmodulated {
                    if !self.renorm_initialized {
                        self.renorm_gain = target_gain;
                        self.smoothed_gain = target_gain;
                        self.renorm_initialized = true;
                    }
                } else {
                    let ratio_diff = (target_gain - self.renorm_gain).abs() / self.renorm_gain;
                    if ratio_diff > RENORM_HYSTERESIS_RATIO {
                        if !self.renorm_initialized {
                            self.renorm_gain = target_gain;
                            self.smoothed_gain = target_gain;
                            self.renorm_initialized = true;
                        } else {
                            self.renorm_gain = 0.8 * self.renorm_gain + 0.2 * target_gain;
                        }
                    }
                }
            } else if !self.renorm_initialized {
                self.renorm_gain = 1.0;
                self.smoothed_gain = 1.0;
                self.renorm_initialized = true;
            }

            self.pre_rms_accum = 0.0;
            self.post_rms_accum = 0.0;
            self.rms_samples = 0;
        }

        self.smoothed_gain =
            GAIN_SMOOTHING_COEFF * self.smoothed_gain + (1.0 - GAIN_SMOOTHING_COEFF) * self.renorm_gain;
        post * self.smoothed_gain
    }

    /// Number of samples per rendered block.
    #[cfg(test)]
    pub fn block_size(&self) -> usize {
        self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pink_params(duration: f32) -> NoiseParams {
        NoiseParams {
            duration_seconds: duration,
            exponent: Some(1.0),
            seed: Some(7),
            ..Default::default()
        }
    }

    #[test]
    fn short_duration_sets_block_size() {
        let core = SpectralNoiseCore::new(&pink_params(0.01), 44100.0);
        // 441 rounded up to even
        assert_eq!(core.block_size(), 442);
    }

    #[test]
    fn samples_stay_bounded_across_handoffs() {
        let mut core = SpectralNoiseCore::new(&pink_params(0.02), 44100.0);
        for _ in 0..core.block_size() * 6 {
            let s = core.next();
            assert!(s.is_finite());
            assert!(s.abs() <= 1.0 + 1e-6);
        }
    }

    #[test]
    fn rms_stays_locked_between_blocks() {
        let mut core = SpectralNoiseCore::new(&pink_params(0.05), 44100.0);
        let block = core.block_size();
        // Warm up one full block, then compare successive block RMS values.
        let mut first = Vec::with_capacity(block);
        for _ in 0..block {
            first.push(core.next());
        }
        let mut second = Vec::with_capacity(block);
        for _ in 0..block {
            second.push(core.next());
        }
        let r1 = rms(&first);
        let r2 = rms(&second);
        assert!(r1 > 0.0);
        assert!((r1 - r2).abs() / r1 < 0.25, "r1={r1} r2={r2}");
    }

    #[test]
    fn band_limited_green_noise_is_renormalised() {
        let params = NoiseParams {
            duration_seconds: 0.05,
            lowcut: Some(100.0),
            highcut: Some(8000.0),
            exponent: Some(0.0),
            seed: Some(3),
            ..Default::default()
        };
        let mut core = SpectralNoiseCore::new(&params, 44100.0);
        let mut out = Vec::new();
        for _ in 0..RENORM_WINDOW * 2 {
            out.push(core.next());
        }
        let steady = rms(&out[RENORM_WINDOW..]);
        assert!(steady > 0.05, "band-limited noise collapsed: {steady}");
    }
}
