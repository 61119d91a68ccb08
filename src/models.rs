use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Absolute ceiling on the per-step binaural and noise volumes, applied
/// before group normalisation so user presets cannot push the mixdown into
/// runaway loudness.
pub const MAX_INDIVIDUAL_GAIN: f32 = 0.6;

fn default_amp() -> f32 {
    1.0
}

fn default_crossfade_duration() -> f64 {
    3.0
}

fn default_crossfade_curve() -> String {
    "linear".to_string()
}

fn default_normalization_level() -> f32 {
    0.95
}

fn default_step_volume() -> f32 {
    MAX_INDIVIDUAL_GAIN
}

/// Mixdown group a voice belongs to. Groups are normalised independently
/// and scaled by the step's binaural or noise volume.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VoiceGroup {
    Binaural,
    Noise,
    Other,
}

#[derive(Deserialize, Debug, Clone)]
pub struct VoiceData {
    #[serde(alias = "synthFunctionName", alias = "synth_function")]
    pub synth_function_name: String,
    #[serde(alias = "parameters", default)]
    pub params: HashMap<String, serde_json::Value>,
    /// Ordered (seconds, amplitude) control points, linearly interpolated.
    #[serde(alias = "volumeEnvelope")]
    pub volume_envelope: Option<Vec<[f64; 2]>>,
    #[serde(default, alias = "isTransition")]
    pub is_transition: bool,
    #[serde(default, alias = "voiceType")]
    pub voice_type: Option<VoiceGroup>,
    #[serde(default)]
    pub description: String,
}

impl VoiceData {
    /// Mixdown group, inferred from the synth tag when the session file
    /// does not say.
    pub fn group(&self) -> VoiceGroup {
        self.voice_type.unwrap_or({
            if self.synth_function_name.starts_with("noise") {
                VoiceGroup::Noise
            } else {
                VoiceGroup::Binaural
            }
        })
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct StepData {
    #[serde(alias = "Duration", alias = "durationSeconds", alias = "stepDuration")]
    pub duration: f64,
    #[serde(default)]
    pub description: String,
    pub voices: Vec<VoiceData>,
    #[serde(default = "default_step_volume", alias = "binauralVolume")]
    pub binaural_volume: f32,
    #[serde(default = "default_step_volume", alias = "noiseVolume")]
    pub noise_volume: f32,
    /// Per-step override of the global normalisation target.
    #[serde(default, alias = "normalizationLevel")]
    pub normalization_level: Option<f32>,
}

impl StepData {
    /// Binaural volume clamped into [0, MAX_INDIVIDUAL_GAIN].
    pub fn binaural_gain(&self) -> f32 {
        self.binaural_volume.clamp(0.0, MAX_INDIVIDUAL_GAIN)
    }

    /// Noise volume clamped into [0, MAX_INDIVIDUAL_GAIN].
    pub fn noise_gain(&self) -> f32 {
        self.noise_volume.clamp(0.0, MAX_INDIVIDUAL_GAIN)
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct GlobalSettings {
    #[serde(alias = "sampleRate")]
    pub sample_rate: u32,
    #[serde(default = "default_crossfade_duration", alias = "crossfadeDuration")]
    pub crossfade_duration: f64,
    #[serde(default = "default_crossfade_curve", alias = "crossfadeCurve")]
    pub crossfade_curve: String,
    #[serde(
        default = "default_normalization_level",
        alias = "normalizationLevel"
    )]
    pub normalization_level: f32,
    #[serde(default, alias = "outputFilename")]
    pub output_filename: Option<String>,
}

impl GlobalSettings {
    /// Normalisation target forced into (0, 1].
    pub fn normalization_target(&self) -> f32 {
        if self.normalization_level > 0.0 {
            self.normalization_level.min(1.0)
        } else {
            default_normalization_level()
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct TrackData {
    #[serde(alias = "globalSettings", alias = "global")]
    pub global_settings: GlobalSettings,
    #[serde(alias = "progression")]
    pub steps: Vec<StepData>,
    /// Overlay clips are accepted at the boundary for forward compatibility
    /// with session files; the DSP core does not render them.
    #[serde(default, alias = "overlay_clips")]
    pub clips: Vec<ClipData>,
    #[serde(default, alias = "noise")]
    pub background_noise: Option<BackgroundNoiseData>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ClipData {
    #[serde(alias = "path", alias = "file")]
    pub file_path: String,
    #[serde(default, alias = "start_time")]
    pub start: f64,
    #[serde(default = "default_amp", alias = "gain")]
    pub amp: f32,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct BackgroundNoiseData {
    /// Optional `.noise` parameter file; inline `params` wins when present.
    #[serde(default, alias = "file", alias = "file_path", alias = "params_path")]
    pub file_path: String,
    #[serde(default = "default_amp", alias = "gain", alias = "amp")]
    pub amp: f32,
    #[serde(default, alias = "startTime")]
    pub start_time: f64,
    #[serde(default, alias = "fadeIn")]
    pub fade_in: f64,
    #[serde(default, alias = "fadeOut")]
    pub fade_out: f64,
    /// Optional (seconds, amplitude) gain curve on top of the fades.
    #[serde(default, alias = "ampEnvelope")]
    pub amp_envelope: Option<Vec<[f64; 2]>>,
    #[serde(default)]
    pub params: Option<crate::noise_params::NoiseParams>,
}

impl BackgroundNoiseData {
    /// Whether a replacement config can keep the already-running generator.
    /// The generator is reusable when everything that shaped it is unchanged;
    /// sweep retuning within that shape goes through
    /// `StreamingNoise::update_realtime_params`.
    pub fn is_compatible_with(&self, other: &BackgroundNoiseData) -> bool {
        let params_compatible = match (&self.params, &other.params) {
            (Some(a), Some(b)) => a.same_generator_shape(b),
            (None, None) => true,
            _ => false,
        };
        params_compatible
            && self.file_path == other.file_path
            && self.start_time == other.start_time
            && self.fade_in == other.fade_in
            && self.fade_out == other.fade_out
            && self.amp_envelope == other.amp_envelope
    }
}

impl TrackData {
    /// Resolve the background-noise parameter file relative to `base`.
    pub fn resolve_relative_paths<P: AsRef<Path>>(&mut self, base: P) {
        let base = base.as_ref();
        if let Some(noise) = &mut self.background_noise {
            if !noise.file_path.is_empty() {
                let p = Path::new(&noise.file_path);
                if p.is_relative() {
                    noise.file_path = base.join(p).to_string_lossy().into_owned();
                }
            }
        }
        for clip in &mut self.clips {
            if !clip.file_path.is_empty() {
                let p = Path::new(&clip.file_path);
                if p.is_relative() {
                    clip.file_path = base.join(p).to_string_lossy().into_owned();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_track(extra: &str) -> TrackData {
        let json = format!(
            r#"{{
                "global_settings": {{ "sample_rate": 44100 {extra} }},
                "steps": [
                    {{ "duration": 1.0, "voices": [] }}
                ]
            }}"#
        );
        serde_json::from_str(&json).unwrap()
    }

    #[test]
    fn global_defaults() {
        let track = minimal_track("");
        assert_eq!(track.global_settings.crossfade_duration, 3.0);
        assert_eq!(track.global_settings.crossfade_curve, "linear");
        assert!((track.global_settings.normalization_target() - 0.95).abs() < 1e-6);
    }

    #[test]
    fn step_volumes_clamp_to_ceiling() {
        let json = r#"{
            "duration": 2.0,
            "voices": [],
            "binaural_volume": 0.9,
            "noise_volume": -0.5
        }"#;
        let step: StepData = serde_json::from_str(json).unwrap();
        assert_eq!(step.binaural_gain(), MAX_INDIVIDUAL_GAIN);
        assert_eq!(step.noise_gain(), 0.0);
    }

    #[test]
    fn voice_type_parses_and_defaults() {
        let json = r#"{
            "synth_function": "binaural_beat",
            "parameters": {},
            "voice_type": "noise"
        }"#;
        let voice: VoiceData = serde_json::from_str(json).unwrap();
        assert_eq!(voice.group(), VoiceGroup::Noise);

        let json = r#"{ "synth_function": "binaural_beat" }"#;
        let voice: VoiceData = serde_json::from_str(json).unwrap();
        assert_eq!(voice.group(), VoiceGroup::Binaural);

        let json = r#"{ "synth_function": "noise_swept_notch", "parameters": {} }"#;
        let voice: VoiceData = serde_json::from_str(json).unwrap();
        assert_eq!(voice.group(), VoiceGroup::Noise);
    }

    #[test]
    fn background_noise_compatibility() {
        let a: BackgroundNoiseData = serde_json::from_str(
            r#"{ "gain": 0.5, "start_time": 1.0, "params": { "duration_seconds": 4.0 } }"#,
        )
        .unwrap();
        let mut b = a.clone();
        assert!(a.is_compatible_with(&b));
        // Gain changes stay compatible; the shape of the generator is unchanged.
        b.amp = 0.2;
        assert!(a.is_compatible_with(&b));
        b.start_time = 2.0;
        assert!(!a.is_compatible_with(&b));
    }

    #[test]
    fn overlay_clips_accepted() {
        let json = r#"{
            "global_settings": { "sample_rate": 48000 },
            "steps": [{ "duration": 1.0, "voices": [] }],
            "overlay_clips": [{ "file": "intro.flac", "start_time": 3.0 }]
        }"#;
        let track: TrackData = serde_json::from_str(json).unwrap();
        assert_eq!(track.clips.len(), 1);
        assert_eq!(track.clips[0].start, 3.0);
    }
}
