//! Shared sine lookup table used by every oscillator in the engine.
//!
//! The table covers [0, 2pi] with 65 536 intervals; the final entry
//! duplicates sin(2pi) so interpolation never needs a wrap-around branch.

use once_cell::sync::Lazy;

const TABLE_BITS: usize = 16;
const TABLE_SIZE: usize = 1 << TABLE_BITS;
const TWO_PI: f32 = 2.0 * std::f32::consts::PI;

static SIN_TABLE: Lazy<Vec<f32>> = Lazy::new(|| {
    let mut table = Vec::with_capacity(TABLE_SIZE + 1);
    for i in 0..=TABLE_SIZE {
        let phase = i as f64 / TABLE_SIZE as f64 * std::f64::consts::TAU;
        table.push(phase.sin() as f32);
    }
    table
});

/// sin(x) via table lookup with linear interpolation. `x` in radians,
/// any finite value.
#[inline]
pub fn sin_lut(x: f32) -> f32 {
    let phase = x.rem_euclid(TWO_PI);
    let pos = phase / TWO_PI * TABLE_SIZE as f32;
    let idx = pos as usize;
    let frac = pos - idx as f32;
    let table = &*SIN_TABLE;
    // idx <= TABLE_SIZE - 1 because phase < 2pi; idx + 1 is always in bounds
    // thanks to the duplicated last entry.
    table[idx] + (table[idx + 1] - table[idx]) * frac
}

/// cos(x) through the same table.
#[inline]
pub fn cos_lut(x: f32) -> f32 {
    sin_lut(x + std::f32::consts::FRAC_PI_2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_libm_sine() {
        for i in 0..10_000 {
            let x = (i as f32 - 5000.0) * 0.01;
            assert!((sin_lut(x) - x.sin()).abs() < 1e-5, "x = {x}");
        }
    }

    #[test]
    fn cosine_is_shifted_sine() {
        for i in 0..1000 {
            let x = i as f32 * 0.05;
            assert!((cos_lut(x) - x.cos()).abs() < 1e-5);
        }
    }

    #[test]
    fn wraps_negative_phase() {
        assert!((sin_lut(-std::f32::consts::FRAC_PI_2) + 1.0).abs() < 1e-5);
    }
}
