use once_cell::sync::Lazy;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Deserialize, Debug, Clone)]
pub struct BackendConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_gain")]
    pub voice_gain: f32,
    #[serde(default = "default_gain")]
    pub noise_gain: f32,
    #[serde(default = "default_gain")]
    pub master_gain: f32,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_gain() -> f32 {
    1.0
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            voice_gain: 1.0,
            noise_gain: 1.0,
            master_gain: 1.0,
        }
    }
}

impl BackendConfig {
    /// Write a default config file the user can edit.
    pub fn generate_default(path: &str) -> std::io::Result<()> {
        let contents = "\
output_dir = \"output\"
voice_gain = 1.0
noise_gain = 1.0
master_gain = 1.0
";
        std::fs::write(path, contents)
    }
}

pub static CONFIG: Lazy<BackendConfig> = Lazy::new(|| {
    let path = PathBuf::from("config.toml");
    if let Ok(txt) = std::fs::read_to_string(&path) {
        toml::from_str(&txt).unwrap_or_default()
    } else {
        BackendConfig::default()
    }
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_unity_gains() {
        let cfg = BackendConfig::default();
        assert_eq!(cfg.voice_gain, 1.0);
        assert_eq!(cfg.noise_gain, 1.0);
        assert_eq!(cfg.master_gain, 1.0);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg: BackendConfig = toml::from_str("voice_gain = 0.5").unwrap();
        assert_eq!(cfg.voice_gain, 0.5);
        assert_eq!(cfg.noise_gain, 1.0);
        assert_eq!(cfg.output_dir, PathBuf::from("output"));
    }
}
