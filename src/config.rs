use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::cache::DEFAULT_CAPACITY;
use crate::convert::{AsciiConverter, ContrastEnhance, DEFAULT_RAMP};
use crate::pipeline::Pipeline;
use crate::settings::{DeviceClass, ProcessingSettings, QualityTier};
use crate::source::MediaSource;

const APP_DIR: &str = "reelscii";
const CONFIG_NAMES: &[&str] = &["reelscii.json", "reelscii.toml"];

fn default_cache_capacity() -> usize {
    DEFAULT_CAPACITY
}

fn default_true() -> bool {
    true
}

fn default_ramp() -> String {
    DEFAULT_RAMP.to_string()
}

/// Application configuration, read from JSON or TOML.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub tier: QualityTier,
    /// Overrides the tier's width.
    pub width: Option<u32>,
    /// Overrides the tier's height.
    pub height: Option<u32>,
    /// Overrides the tier's frame rate.
    pub fps: Option<u32>,
    #[serde(default)]
    pub device: DeviceClass,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    #[serde(default)]
    pub contrast_enhance: bool,
    #[serde(default = "default_true")]
    pub adaptive_quality: bool,
    #[serde(default = "default_ramp")]
    pub ramp: String,
    /// Where precomputed sequences are persisted; defaults to the user cache dir.
    pub store_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            tier: QualityTier::default(),
            width: None,
            height: None,
            fps: None,
            device: DeviceClass::default(),
            cache_capacity: DEFAULT_CAPACITY,
            contrast_enhance: false,
            adaptive_quality: true,
            ramp: default_ramp(),
            store_dir: None,
        }
    }
}

impl AppConfig {
    /// Parse a config file; `.toml` files as TOML, anything else as JSON.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
        let config: AppConfig = if path.extension().is_some_and(|ext| ext == "toml") {
            toml::from_str(&text).with_context(|| format!("parsing config toml {}", path.display()))?
        } else {
            serde_json::from_str(&text).with_context(|| format!("parsing config json {}", path.display()))?
        };
        config.validate().with_context(|| format!("invalid config {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ramp.is_empty() {
            return Err(anyhow!("ramp must contain at least one character"));
        }
        if !self.ramp.is_ascii() {
            return Err(anyhow!(
                "ramp contains non-ASCII characters. This will cause corrupted output. Please use only ASCII characters."
            ));
        }
        if self.cache_capacity == 0 {
            return Err(anyhow!("cache_capacity must be at least 1"));
        }
        Ok(())
    }

    /// Resolved processing settings: tier defaults with overrides applied and clamped.
    pub fn settings(&self) -> ProcessingSettings {
        let base = ProcessingSettings::from_tier(self.tier, self.device);
        base.with_dimensions(
            self.width.unwrap_or(base.output_width),
            self.height.unwrap_or(base.output_height),
        )
        .with_frame_rate(self.fps.unwrap_or(base.frame_rate))
    }

    pub fn converter(&self) -> AsciiConverter {
        AsciiConverter::new()
            .with_ramp(&self.ramp)
            .with_contrast(self.contrast_enhance.then(ContrastEnhance::default))
    }

    /// A pipeline assembled from this configuration.
    pub fn pipeline<S: MediaSource>(&self) -> Pipeline<S> {
        Pipeline::new(self.settings())
            .with_cache_capacity(self.cache_capacity)
            .with_converter(self.converter())
            .with_adaptive(self.adaptive_quality)
    }

    /// Directory for persisted sequences.
    pub fn store_dir(&self) -> Option<PathBuf> {
        self.store_dir.clone().or_else(|| dirs::cache_dir().map(|d| d.join(APP_DIR).join("sequences")))
    }
}

/// Look for a config in the user data dir, then the current dir, then use built-in defaults.
pub fn load_config() -> Result<AppConfig> {
    let mut tried: Vec<PathBuf> = Vec::new();
    if let Some(d) = dirs::data_dir() {
        for name in CONFIG_NAMES {
            tried.push(d.join(APP_DIR).join(name));
        }
    }
    for name in CONFIG_NAMES {
        tried.push(PathBuf::from(name));
    }

    for p in &tried {
        if p.exists() {
            return AppConfig::from_file(p);
        }
    }

    Ok(AppConfig::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_resolve_to_medium() {
        let s = AppConfig::default().settings();
        assert_eq!((s.output_width, s.output_height, s.frame_rate), (120, 40, 24));
        assert_eq!(s.device_class, DeviceClass::Standard);
    }

    #[test]
    fn test_json_overrides_and_clamps() {
        let cfg: AppConfig = serde_json::from_str(r#"{"tier": "high", "width": 500, "fps": 0, "device": "constrained"}"#).unwrap();
        let s = cfg.settings();
        assert_eq!(s.output_width, 200);
        assert_eq!(s.output_height, 60);
        assert_eq!(s.frame_rate, 1);
        assert_eq!(s.device_class, DeviceClass::Constrained);
        assert_eq!(cfg.cache_capacity, 10);
        assert!(cfg.adaptive_quality);
    }

    #[test]
    fn test_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reelscii.toml");
        fs::write(&path, "tier = \"low\"\ncontrast_enhance = true\nramp = \" .#\"\n").unwrap();
        let cfg = AppConfig::from_file(&path).unwrap();
        assert_eq!(cfg.tier, QualityTier::Low);
        assert!(cfg.contrast_enhance);
        assert_eq!(cfg.converter().ramp(), b" .#");
    }

    #[test]
    fn test_non_ascii_ramp_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reelscii.json");
        fs::write(&path, r#"{"ramp": " ░▒▓█"}"#).unwrap();
        let err = AppConfig::from_file(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("non-ASCII"));
    }
}
