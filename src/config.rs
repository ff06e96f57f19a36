//! User preferences under `~/.config/ab-preview`.

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{error::ConfigError, gain::DEFAULT_REFERENCE_LUFS};

pub fn config_dir() -> Result<PathBuf, ConfigError> {
    let home = std::env::var_os("HOME").ok_or(ConfigError::NoHome)?;
    Ok(PathBuf::from(home).join(".config").join("ab-preview"))
}

pub fn config_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.json"))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    /// Loudness every track is matched to when the feed has no reference
    pub reference_lufs: f64,
    pub gain_matching: bool,
    pub fft_size: usize,
    pub smoothing: f32,
    pub peak_decay: f32,
    /// Extra decode attempts for tracks attached through readiness flags
    pub retry_attempts: u32,
    pub retry_delay_frames: u32,
    pub show_spectrum: bool,
    pub show_ribbon: bool,
    pub true_peak_threshold_db: f32,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        PreviewConfig {
            reference_lufs: DEFAULT_REFERENCE_LUFS,
            gain_matching: true,
            fft_size: 2048,
            smoothing: 0.82,
            peak_decay: 0.985,
            retry_attempts: 3,
            retry_delay_frames: 60,
            show_spectrum: true,
            show_ribbon: true,
            true_peak_threshold_db: -1.5,
        }
    }
}

impl PreviewConfig {
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Config from the user's config dir; defaults when missing or unreadable.
    pub fn load() -> Self {
        let path = match config_path() {
            Ok(p) => p,
            Err(_) => return Self::default(),
        };
        match Self::load_from(&path) {
            Ok(cfg) => cfg,
            Err(ConfigError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Self::default()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring config file");
                Self::default()
            }
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&config_path()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let cfg: PreviewConfig =
            serde_json::from_str(r#"{"gain_matching": false, "fft_size": 4096}"#).unwrap();
        assert!(!cfg.gain_matching);
        assert_eq!(cfg.fft_size, 4096);
        assert_eq!(cfg.smoothing, 0.82);
        assert_eq!(cfg.retry_attempts, 3);
    }

    #[test]
    fn save_then_load() {
        let path = std::env::temp_dir()
            .join(format!("ab-preview-cfg-{}", std::process::id()))
            .join("config.json");
        let cfg = PreviewConfig {
            show_ribbon: false,
            reference_lufs: -16.0,
            ..PreviewConfig::default()
        };
        cfg.save_to(&path).unwrap();
        assert_eq!(PreviewConfig::load_from(&path).unwrap(), cfg);
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let path = std::env::temp_dir().join(format!("ab-preview-bad-{}.json", std::process::id()));
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            PreviewConfig::load_from(&path),
            Err(ConfigError::Json(_))
        ));
        let _ = fs::remove_file(&path);
    }
}
