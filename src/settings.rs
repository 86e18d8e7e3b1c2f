use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Narrowest output grid, in characters.
pub const MIN_WIDTH: u32 = 60;
/// Widest output grid, in characters.
pub const MAX_WIDTH: u32 = 200;
/// Shortest output grid, in lines.
pub const MIN_HEIGHT: u32 = 20;
/// Tallest output grid, in lines.
pub const MAX_HEIGHT: u32 = 80;

/// Discrete quality presets mapping to default dimensions and frame rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    Low,
    #[default]
    Medium,
    High,
    Ultra,
}

impl QualityTier {
    /// Default `(width, height, fps)` for this tier.
    pub fn defaults(self) -> (u32, u32, u32) {
        match self {
            QualityTier::Low => (80, 30, 15),
            QualityTier::Medium => (120, 40, 24),
            QualityTier::High => (160, 60, 30),
            QualityTier::Ultra => (200, 80, 30),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            QualityTier::Low => "low",
            QualityTier::Medium => "medium",
            QualityTier::High => "high",
            QualityTier::Ultra => "ultra",
        }
    }
}

impl std::str::FromStr for QualityTier {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(QualityTier::Low),
            "medium" => Ok(QualityTier::Medium),
            "high" => Ok(QualityTier::High),
            "ultra" => Ok(QualityTier::Ultra),
            other => Err(format!("unknown quality tier '{}' (expected low, medium, high or ultra)", other)),
        }
    }
}

/// Hardware class; constrained devices get longer timeouts, more retries and a tick floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    #[default]
    Standard,
    Constrained,
}

impl DeviceClass {
    pub fn is_constrained(self) -> bool {
        self == DeviceClass::Constrained
    }
}

/// Output settings for the pipeline.
///
/// Width and height only ever change together, either through
/// [`ProcessingSettings::with_dimensions`] or by building a new value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessingSettings {
    pub output_width: u32,
    pub output_height: u32,
    pub frame_rate: u32,
    pub quality_tier: QualityTier,
    pub device_class: DeviceClass,
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self::from_tier(QualityTier::default(), DeviceClass::default())
    }
}

impl ProcessingSettings {
    /// Settings populated from a tier's defaults.
    pub fn from_tier(tier: QualityTier, device_class: DeviceClass) -> Self {
        let (w, h, fps) = tier.defaults();
        Self {
            output_width: w,
            output_height: h,
            frame_rate: fps,
            quality_tier: tier,
            device_class,
        }
    }

    /// Copy of these settings with a new grid size, clamped to the supported range.
    pub fn with_dimensions(&self, width: u32, height: u32) -> Self {
        Self {
            output_width: width.clamp(MIN_WIDTH, MAX_WIDTH),
            output_height: height.clamp(MIN_HEIGHT, MAX_HEIGHT),
            ..*self
        }
    }

    pub fn with_frame_rate(&self, fps: u32) -> Self {
        Self { frame_rate: fps.max(1), ..*self }
    }

    /// Time allowance per frame at the configured rate.
    pub fn frame_budget(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.frame_rate.max(1)))
    }

    /// Stable textual fingerprint used to key persisted sequences.
    pub fn fingerprint(&self) -> String {
        format!(
            "{}x{}@{}:{}:{:?}",
            self.output_width,
            self.output_height,
            self.frame_rate,
            self.quality_tier.name(),
            self.device_class
        )
    }
}

impl fmt::Display for ProcessingSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{} @ {}fps ({})", self.output_width, self.output_height, self.frame_rate, self.quality_tier.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_defaults_within_bounds() {
        for tier in [QualityTier::Low, QualityTier::Medium, QualityTier::High, QualityTier::Ultra] {
            let s = ProcessingSettings::from_tier(tier, DeviceClass::Standard);
            assert!((MIN_WIDTH..=MAX_WIDTH).contains(&s.output_width));
            assert!((MIN_HEIGHT..=MAX_HEIGHT).contains(&s.output_height));
        }
    }

    #[test]
    fn test_with_dimensions_clamps_pair() {
        let s = ProcessingSettings::default().with_dimensions(10, 500);
        assert_eq!((s.output_width, s.output_height), (MIN_WIDTH, MAX_HEIGHT));
    }

    #[test]
    fn test_frame_budget() {
        let s = ProcessingSettings::default().with_frame_rate(30);
        assert_eq!(s.frame_budget().as_millis(), 33);
    }

    #[test]
    fn test_tier_parse() {
        assert_eq!("HIGH".parse::<QualityTier>(), Ok(QualityTier::High));
        assert!("extreme".parse::<QualityTier>().is_err());
    }
}
