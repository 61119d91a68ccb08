use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

/// One swept notch: start/end endpoints for the frequency window, Q and
/// cascade depth, linearly interpolated over the noise duration when the
/// transition flag is set.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct NoiseSweep {
    #[serde(default)]
    pub start_min: f32,
    #[serde(default)]
    pub end_min: f32,
    #[serde(default)]
    pub start_max: f32,
    #[serde(default)]
    pub end_max: f32,
    #[serde(default)]
    pub start_q: f32,
    #[serde(default)]
    pub end_q: f32,
    #[serde(default)]
    pub start_casc: usize,
    #[serde(default)]
    pub end_casc: usize,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct NoiseParams {
    #[serde(default)]
    pub duration_seconds: f32,
    #[serde(default)]
    pub sample_rate: u32,
    #[serde(default)]
    pub lfo_waveform: String,
    #[serde(default)]
    pub transition: bool,
    #[serde(default)]
    pub lfo_freq: f32,
    #[serde(default)]
    pub start_lfo_freq: f32,
    #[serde(default)]
    pub end_lfo_freq: f32,
    #[serde(default)]
    pub sweeps: Vec<NoiseSweep>,
    #[serde(default)]
    pub start_lfo_phase_offset_deg: f32,
    #[serde(default)]
    pub end_lfo_phase_offset_deg: f32,
    #[serde(default)]
    pub start_intra_phase_offset_deg: f32,
    #[serde(default)]
    pub end_intra_phase_offset_deg: f32,
    #[serde(default)]
    pub initial_offset: f32,
    #[serde(default)]
    pub post_offset: f32,
    /// Spectral slope at the bottom of the spectrum (1 = pink, 2 = brown...).
    /// Falls back to the named colour preset when absent.
    #[serde(default)]
    pub exponent: Option<f32>,
    /// Slope at the Nyquist end; defaults to `exponent`.
    #[serde(default)]
    pub high_exponent: Option<f32>,
    /// Interpolation power between the two exponents in log-frequency space.
    #[serde(default)]
    pub distribution_curve: Option<f32>,
    #[serde(default)]
    pub lowcut: Option<f32>,
    #[serde(default)]
    pub highcut: Option<f32>,
    #[serde(default)]
    pub amplitude: Option<f32>,
    #[serde(default)]
    pub seed: Option<i64>,
    /// Free-form colour block; both historical spellings are accepted.
    /// `{"name": "pink"}` selects a preset for whichever explicit fields
    /// above are missing.
    #[serde(default, alias = "color_params")]
    pub noise_parameters: HashMap<String, Value>,
}

/// Spectral preset for a named noise colour:
/// (exponent, high_exponent, distribution_curve, lowcut, highcut, amplitude).
pub struct ColourPreset {
    pub exponent: f32,
    pub high_exponent: f32,
    pub distribution_curve: f32,
    pub lowcut: Option<f32>,
    pub highcut: Option<f32>,
    pub amplitude: f32,
}

pub fn colour_preset(name: &str) -> Option<ColourPreset> {
    let (exponent, high_exponent, lowcut, highcut) = match name {
        "pink" => (1.0, 1.0, None, None),
        "brown" => (2.0, 2.0, None, None),
        "red" => (2.0, 1.5, None, None),
        "green" => (0.0, 0.0, Some(100.0), Some(8000.0)),
        "blue" => (-1.0, -1.0, None, None),
        "purple" => (-2.0, -2.0, None, None),
        "deep brown" => (2.5, 2.0, None, None),
        "white" => (0.0, 0.0, None, None),
        _ => return None,
    };
    Some(ColourPreset {
        exponent,
        high_exponent,
        distribution_curve: 1.0,
        lowcut,
        highcut,
        amplitude: 1.0,
    })
}

impl NoiseParams {
    /// Preset name carried in the colour block, defaulting to pink.
    pub fn colour_name(&self) -> String {
        if let Some(Value::String(name)) = self.noise_parameters.get("name") {
            return name.to_lowercase();
        }
        "pink".to_string()
    }

    /// Whether `other` describes the same generator shape: identical
    /// spectral configuration and sweep count. Sweep retuning within that
    /// shape goes through `StreamingNoise::update_realtime_params`; a
    /// different shape needs a rebuilt generator.
    pub fn same_generator_shape(&self, other: &NoiseParams) -> bool {
        self.duration_seconds == other.duration_seconds
            && self.noise_parameters == other.noise_parameters
            && self.exponent == other.exponent
            && self.high_exponent == other.high_exponent
            && self.distribution_curve == other.distribution_curve
            && self.lowcut == other.lowcut
            && self.highcut == other.highcut
            && self.amplitude == other.amplitude
            && self.seed == other.seed
            && self.sweeps.len() == other.sweeps.len()
    }
}

pub fn load_noise_params(path: &str) -> anyhow::Result<NoiseParams> {
    let file = std::fs::File::open(path)?;
    let params: NoiseParams = serde_json::from_reader(file)?;
    Ok(params)
}

pub fn load_noise_params_from_str(data: &str) -> Result<NoiseParams, serde_json::Error> {
    serde_json::from_str(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_colour_block_under_both_keys() {
        let a: NoiseParams =
            serde_json::from_str(r#"{"noise_parameters": {"name": "Brown"}}"#).unwrap();
        let b: NoiseParams = serde_json::from_str(r#"{"color_params": {"name": "Brown"}}"#).unwrap();
        assert_eq!(a.colour_name(), "brown");
        assert_eq!(b.colour_name(), "brown");
    }

    #[test]
    fn default_colour_is_pink() {
        let p = NoiseParams::default();
        assert_eq!(p.colour_name(), "pink");
        let preset = colour_preset(&p.colour_name()).unwrap();
        assert_eq!(preset.exponent, 1.0);
    }

    #[test]
    fn green_preset_carries_band_limits() {
        let preset = colour_preset("green").unwrap();
        assert_eq!(preset.lowcut, Some(100.0));
        assert_eq!(preset.highcut, Some(8000.0));
    }

    #[test]
    fn unknown_colour_has_no_preset() {
        assert!(colour_preset("octarine").is_none());
    }
}
