//! TOML configuration.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::decode::InversionMode;
use crate::scanner::LoopConfig;
use crate::traits::{Facing, Resolution};

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Camera selection and format.
    pub camera: CameraConfig,
    /// Scan loop tuning.
    pub scan: ScanConfig,
    /// History persistence.
    pub storage: StorageConfig,
    /// Log filter.
    pub logging: LoggingConfig,
}

/// `[camera]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    /// V4L2 index of the front camera.
    #[serde(default)]
    pub user_device: u32,
    /// V4L2 index of the back camera.
    #[serde(default)]
    pub environment_device: u32,
    /// Camera used when the command line does not choose one.
    #[serde(default)]
    pub facing: Facing,
    /// Requested frame width.
    #[serde(default = "default_width")]
    pub width: u32,
    /// Requested frame height.
    #[serde(default = "default_height")]
    pub height: u32,
    /// Number of mmap buffers for the capture stream.
    #[serde(default = "default_buffer_count")]
    pub buffer_count: u32,
}

impl CameraConfig {
    /// Resolution hint built from `width` and `height`.
    #[must_use]
    pub const fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            user_device: 0,
            environment_device: 0,
            facing: Facing::default(),
            width: default_width(),
            height: default_height(),
            buffer_count: default_buffer_count(),
        }
    }
}

/// `[scan]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ScanConfig {
    /// Refresh ticks per second.
    #[serde(default = "default_fps")]
    pub fps: f64,
    /// Inversion mode passed to the decoder.
    #[serde(default)]
    pub inversion: InversionMode,
    /// Consecutive decode failures tolerated before the session is stopped.
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
    /// Ticks skipped after a decode failure.
    #[serde(default = "default_failure_cooldown_ticks")]
    pub failure_cooldown_ticks: u32,
    /// Report every frame without a symbol as a warning.
    #[serde(default)]
    pub warn_on_empty_frames: bool,
}

impl ScanConfig {
    /// Scanner loop settings derived from this section.
    #[must_use]
    pub const fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            inversion: self.inversion,
            max_consecutive_failures: self.max_consecutive_failures,
            failure_cooldown_ticks: self.failure_cooldown_ticks,
            warn_on_empty_frames: self.warn_on_empty_frames,
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            fps: default_fps(),
            inversion: InversionMode::default(),
            max_consecutive_failures: default_max_consecutive_failures(),
            failure_cooldown_ticks: default_failure_cooldown_ticks(),
            warn_on_empty_frames: false,
        }
    }
}

/// `[storage]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Directory holding `history.json` and `settings.json`.
    #[serde(default = "default_storage_dir")]
    pub dir: PathBuf,
    /// Maximum number of history entries kept.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: default_storage_dir(),
            history_limit: default_history_limit(),
        }
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.scan.fps.is_finite() && self.scan.fps > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "scan.fps must be positive, got {}",
                self.scan.fps
            )));
        }
        if self.scan.max_consecutive_failures == 0 {
            return Err(ConfigError::Invalid(
                "scan.max_consecutive_failures must be at least 1".to_owned(),
            ));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "camera resolution must be non-zero, got {}x{}",
                self.camera.width, self.camera.height
            )));
        }
        if self.camera.buffer_count == 0 {
            return Err(ConfigError::Invalid(
                "camera.buffer_count must be at least 1".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    /// The file is not valid TOML for this schema.
    #[error("failed to parse config: {0}")]
    Parse(String),
    /// A value is out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

const fn default_width() -> u32 {
    1280
}
const fn default_height() -> u32 {
    720
}
const fn default_buffer_count() -> u32 {
    4
}
const fn default_fps() -> f64 {
    30.0
}
const fn default_max_consecutive_failures() -> u32 {
    10
}
const fn default_failure_cooldown_ticks() -> u32 {
    5
}
fn default_storage_dir() -> PathBuf {
    PathBuf::from("qr-cam-scanner-data")
}
const fn default_history_limit() -> usize {
    50
}
fn default_log_level() -> String {
    "info".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").expect("empty config should parse");
        assert_eq!(config.camera.width, 1280);
        assert_eq!(config.camera.height, 720);
        assert_eq!(config.camera.facing, Facing::Environment);
        assert_eq!(config.scan.max_consecutive_failures, 10);
        assert_eq!(config.scan.failure_cooldown_ticks, 5);
        assert!(!config.scan.warn_on_empty_frames);
        assert_eq!(config.storage.history_limit, 50);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_partial_sections() {
        let config = Config::parse(
            r#"
            [camera]
            facing = "user"
            user_device = 2

            [scan]
            inversion = "attempt_both"
            warn_on_empty_frames = true
            "#,
        )
        .expect("config should parse");

        assert_eq!(config.camera.facing, Facing::User);
        assert_eq!(config.camera.user_device, 2);
        assert_eq!(config.camera.buffer_count, 4);
        assert_eq!(config.scan.inversion, InversionMode::AttemptBoth);
        assert!(config.scan.loop_config().warn_on_empty_frames);
    }

    #[test]
    fn test_rejects_zero_fps() {
        let result = Config::parse("[scan]\nfps = 0.0\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_unknown_facing() {
        let result = Config::parse("[camera]\nfacing = \"sideways\"\n");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = Config::load(Path::new("/nonexistent/qr-cam-scanner.toml"))
            .expect("missing file should fall back to defaults");
        assert!((config.scan.fps - 30.0).abs() < f64::EPSILON);
    }
}
