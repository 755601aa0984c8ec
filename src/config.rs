//! Viewer configuration knobs exposed to the host application.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    // Viewport
    pub width: f32,
    pub height: f32,
    pub fov_y_deg: f32,

    // Drag rotation, radians per pixel
    pub rotation_speed: f32,
    pub pitch_speed: f32,
    pub pitch_min: f32,
    pub pitch_max: f32,

    // Tap vs drag
    pub hold_delay_ms: u64,
    pub tap_slop_px: f32,

    // Pinch zoom, camera distance from the model
    pub initial_distance: f32,
    pub zoom_min: f32,
    pub zoom_max: f32,

    /// Largest dimension of the model after normalization.
    pub target_size: f32,

    /// Download cache for remote assets; scratch files are staged here too.
    pub cache_dir: PathBuf,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            width: 360.0,
            height: 360.0,
            fov_y_deg: 75.0,
            rotation_speed: 0.01,
            pitch_speed: 0.01,
            pitch_min: -std::f32::consts::FRAC_PI_3,
            pitch_max: std::f32::consts::FRAC_PI_3,
            hold_delay_ms: 100,
            tap_slop_px: 10.0,
            initial_distance: 5.0,
            zoom_min: 2.0,
            zoom_max: 20.0,
            target_size: 2.0,
            cache_dir: std::env::temp_dir().join("glbview-cache"),
        }
    }
}

impl ViewerConfig {
    pub fn hold_delay(&self) -> Duration {
        Duration::from_millis(self.hold_delay_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.width > 0.0 && self.height > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "viewport must be positive, got {}x{}",
                self.width, self.height
            )));
        }
        if self.pitch_min > self.pitch_max {
            return Err(ConfigError::Invalid(format!(
                "pitch range is inverted: [{}, {}]",
                self.pitch_min, self.pitch_max
            )));
        }
        if !(self.zoom_min > 0.0) || self.zoom_min > self.zoom_max {
            return Err(ConfigError::Invalid(format!(
                "zoom range must be positive and ordered: [{}, {}]",
                self.zoom_min, self.zoom_max
            )));
        }
        if !(self.target_size > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "target size must be positive, got {}",
                self.target_size
            )));
        }
        if !(self.fov_y_deg > 0.0 && self.fov_y_deg < 180.0) {
            return Err(ConfigError::Invalid(format!(
                "vertical fov out of range: {}",
                self.fov_y_deg
            )));
        }
        Ok(())
    }

    /// Clamp the initial distance into the zoom range.
    pub fn clamped_initial_distance(&self) -> f32 {
        self.initial_distance.clamp(self.zoom_min, self.zoom_max)
    }
}

pub fn save_config(config: &ViewerConfig, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(path, json)?;
    Ok(())
}

pub fn load_config(path: &Path) -> Result<ViewerConfig> {
    let json = std::fs::read_to_string(path)?;
    let config: ViewerConfig = serde_json::from_str(&json)?;
    config.validate()?;
    Ok(config)
}
