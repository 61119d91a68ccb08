//! Branch-light helpers shared by the voice synthesis loops.

pub mod trig;

use trig::{cos_lut, sin_lut};

const SKEW_EPS: f32 = 1e-4;

/// Skewed sine over one normalized cycle. `phase` in [0, 1), `skew` in
/// [-1, 1] shifts the zero crossing: the first half-wave occupies
/// `0.5 + 0.5 * skew` of the cycle, the second the remainder.
pub fn skewed_sine_phase(phase: f32, skew: f32) -> f32 {
    let frac = (0.5 + 0.5 * skew).clamp(SKEW_EPS, 1.0 - SKEW_EPS);
    let phase = phase.rem_euclid(1.0);
    if phase < frac {
        let local = phase / frac;
        sin_lut(std::f32::consts::PI * local)
    } else {
        let local = (phase - frac) / (1.0 - frac);
        sin_lut(std::f32::consts::PI * (1.0 + local))
    }
}

/// Piecewise-linear analogue of [`skewed_sine_phase`].
pub fn skewed_triangle_phase(phase: f32, skew: f32) -> f32 {
    let frac = (0.5 + 0.5 * skew).clamp(SKEW_EPS, 1.0 - SKEW_EPS);
    let phase = phase.rem_euclid(1.0);
    if phase < frac {
        let local = phase / frac;
        1.0 - (2.0 * local - 1.0).abs()
    } else {
        let local = (phase - frac) / (1.0 - frac);
        (2.0 * local - 1.0).abs() - 1.0
    }
}

/// Trapezoidal gate for isochronic tones. `t` is the position inside the
/// current cycle in seconds, `cycle_len` the full cycle length,
/// `ramp_percent` the fraction of the audible part spent ramping
/// (split between attack and decay), `gap_percent` the trailing silent
/// fraction of the cycle.
pub fn trapezoid_envelope(t: f32, cycle_len: f32, ramp_percent: f32, gap_percent: f32) -> f32 {
    if cycle_len <= 0.0 {
        return 0.0;
    }
    let gap = gap_percent.clamp(0.0, 1.0);
    let audible = cycle_len * (1.0 - gap);
    if audible <= 0.0 || t >= audible {
        return 0.0;
    }
    let ramp_len = audible * ramp_percent.clamp(0.0, 1.0) * 0.5;
    if ramp_len <= 0.0 {
        return 1.0;
    }
    if t < ramp_len {
        t / ramp_len
    } else if t > audible - ramp_len {
        (audible - t) / ramp_len
    } else {
        1.0
    }
}

/// Equal-power stereo panner. `pan` in [-1, 1].
pub fn pan2(signal: f32, pan: f32) -> (f32, f32) {
    let pan = pan.clamp(-1.0, 1.0);
    let angle = (pan + 1.0) * std::f32::consts::FRAC_PI_4;
    (cos_lut(angle) * signal, sin_lut(angle) * signal)
}

/// Precompute a per-sample gain curve from (seconds, amplitude) control
/// points. Points are linearly interpolated; outside the covered span the
/// terminal amplitudes hold. An empty point list yields unity gain.
pub fn build_volume_envelope(points: &[[f64; 2]], duration: f32, sample_rate: u32) -> Vec<f32> {
    let total = (duration as f64 * sample_rate as f64) as usize;
    if points.is_empty() {
        return vec![1.0; total];
    }
    let mut sorted: Vec<[f64; 2]> = points.to_vec();
    sorted.sort_by(|a, b| a[0].partial_cmp(&b[0]).unwrap_or(std::cmp::Ordering::Equal));

    let mut env = Vec::with_capacity(total);
    let mut seg = 0usize;
    for i in 0..total {
        let t = i as f64 / sample_rate as f64;
        while seg + 1 < sorted.len() && t > sorted[seg + 1][0] {
            seg += 1;
        }
        let value = if t <= sorted[0][0] {
            sorted[0][1]
        } else if t >= sorted[sorted.len() - 1][0] {
            sorted[sorted.len() - 1][1]
        } else {
            let a = sorted[seg];
            let b = sorted[seg + 1];
            let span = b[0] - a[0];
            if span > 0.0 {
                a[1] + (b[1] - a[1]) * (t - a[0]) / span
            } else {
                b[1]
            }
        };
        env.push(value as f32);
    }
    env
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skewed_sine_is_plain_sine_at_zero_skew() {
        for i in 0..100 {
            let p = i as f32 / 100.0;
            let expected = (2.0 * std::f32::consts::PI * p).sin();
            assert!((skewed_sine_phase(p, 0.0) - expected).abs() < 1e-4);
        }
    }

    #[test]
    fn skewed_triangle_peaks_at_quarter_cycle() {
        assert!((skewed_triangle_phase(0.25, 0.0) - 1.0).abs() < 1e-6);
        assert!((skewed_triangle_phase(0.75, 0.0) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn trapezoid_gap_silences_tail() {
        let cycle = 0.2;
        assert_eq!(trapezoid_envelope(0.19, cycle, 0.1, 0.5), 0.0);
        assert_eq!(trapezoid_envelope(0.05, cycle, 0.0, 0.0), 1.0);
    }

    #[test]
    fn trapezoid_ramps_linearly() {
        let cycle = 1.0;
        // ramp_percent 0.2 -> 0.1s attack over a fully audible cycle
        let v = trapezoid_envelope(0.05, cycle, 0.2, 0.0);
        assert!((v - 0.5).abs() < 1e-6);
    }

    #[test]
    fn zero_cycle_is_silent() {
        assert_eq!(trapezoid_envelope(0.0, 0.0, 0.5, 0.0), 0.0);
    }

    #[test]
    fn pan_center_is_equal_power() {
        let (l, r) = pan2(1.0, 0.0);
        assert!((l - r).abs() < 1e-6);
        assert!((l * l + r * r - 1.0).abs() < 1e-5);
    }

    #[test]
    fn envelope_interpolates_and_holds_ends() {
        let env = build_volume_envelope(&[[0.0, 0.0], [1.0, 1.0]], 2.0, 100);
        assert_eq!(env.len(), 200);
        assert!((env[50] - 0.5).abs() < 0.02);
        assert!((env[150] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn empty_envelope_is_unity() {
        let env = build_volume_envelope(&[], 0.5, 100);
        assert!(env.iter().all(|&v| v == 1.0));
    }
}
