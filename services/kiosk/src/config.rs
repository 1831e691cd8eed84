//! Configuration management for the weighing kiosk service.
//!
//! Configuration is layered: a default config file, an optional
//! environment-specific file selected by `RUN_MODE`, and finally
//! `KIOSK`-prefixed environment variables.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the kiosk service.
#[derive(Debug, Clone, Deserialize)]
pub struct KioskConfig {
    /// Load-cell sampling configuration
    #[serde(default)]
    pub scale: ScaleConfig,

    /// Camera configuration
    #[serde(default)]
    pub camera: CameraConfig,

    /// Local persistence paths
    #[serde(default)]
    pub storage: StorageConfig,

    /// Remote upload configuration
    pub upload: UploadConfig,

    /// Selectable item catalog
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Metrics export configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Load-cell sampling configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ScaleConfig {
    /// Load-cell driver to use ("sim" is the bring-up simulator)
    #[serde(default = "default_driver")]
    pub driver: String,

    /// Samples averaged for calibration-grade readings
    #[serde(default = "default_calibration_samples")]
    pub calibration_samples: usize,

    /// Samples averaged for live display readings
    #[serde(default = "default_display_samples")]
    pub display_samples: usize,

    /// Interval between live weight readings in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

/// Camera configuration.
///
/// The live preview itself is owned by the display layer; the interval is
/// carried here so the whole device setup lives in one place.
#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    /// Camera device to use ("static" is the bring-up stand-in)
    #[serde(default = "default_camera_device")]
    pub device: String,

    /// Interval between preview frames in milliseconds
    #[serde(default = "default_preview_interval_ms")]
    pub preview_interval_ms: u64,
}

/// Local persistence paths.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path of the persisted calibration ratio file
    #[serde(default = "default_calibration_file")]
    pub calibration_file: PathBuf,

    /// Path of the append-only capture log
    #[serde(default = "default_capture_log")]
    pub capture_log: PathBuf,

    /// Directory for captured images
    #[serde(default = "default_image_dir")]
    pub image_dir: PathBuf,
}

/// Remote upload configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Collection endpoint URL (HTTPS POST target)
    pub endpoint_url: String,

    /// Total request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

/// Selectable item catalog.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    /// Item labels offered to the operator
    #[serde(default = "default_catalog_items")]
    pub items: Vec<String>,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,
}

/// Metrics export configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Enable the Prometheus exporter
    #[serde(default)]
    pub enabled: bool,

    /// Exporter listen port
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_driver() -> String {
    "sim".to_string()
}
fn default_calibration_samples() -> usize {
    100
}
fn default_display_samples() -> usize {
    10
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_camera_device() -> String {
    "static".to_string()
}
fn default_preview_interval_ms() -> u64 {
    50
}
fn default_calibration_file() -> PathBuf {
    PathBuf::from("data/scale_calibration.json")
}
fn default_capture_log() -> PathBuf {
    PathBuf::from("data/measurements.jsonl")
}
fn default_image_dir() -> PathBuf {
    PathBuf::from("data/captures")
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_catalog_items() -> Vec<String> {
    ["Brinjal", "Cucumber", "Rice", "Carrot"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "pretty".to_string()
}
fn default_metrics_port() -> u16 {
    9090
}

impl Default for ScaleConfig {
    fn default() -> Self {
        Self {
            driver: default_driver(),
            calibration_samples: default_calibration_samples(),
            display_samples: default_display_samples(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: default_camera_device(),
            preview_interval_ms: default_preview_interval_ms(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            calibration_file: default_calibration_file(),
            capture_log: default_capture_log(),
            image_dir: default_image_dir(),
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            items: default_catalog_items(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

impl KioskConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Configuration is loaded in the following order (later sources override
    /// earlier):
    /// 1. Default config file (config/default.toml)
    /// 2. Environment-specific config (config/{env}.toml)
    /// 3. Environment variables (prefixed with KIOSK_)
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // e.g. KIOSK_UPLOAD__ENDPOINT_URL
            .add_source(
                Environment::with_prefix("KIOSK")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Create configuration from environment variables only.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(
                Environment::with_prefix("KIOSK")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.upload.endpoint_url.is_empty() {
            return Err(ConfigValidationError::MissingField(
                "upload.endpoint_url".to_string(),
            ));
        }
        if !self.upload.endpoint_url.starts_with("http://")
            && !self.upload.endpoint_url.starts_with("https://")
        {
            return Err(ConfigValidationError::InvalidValue {
                field: "upload.endpoint_url".to_string(),
                message: "URL must start with http:// or https://".to_string(),
            });
        }

        if self.scale.calibration_samples == 0 || self.scale.display_samples == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "scale.calibration_samples/display_samples".to_string(),
                message: "Sample counts must be greater than 0".to_string(),
            });
        }

        if self.scale.poll_interval_ms == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "scale.poll_interval_ms".to_string(),
                message: "Poll interval must be greater than 0".to_string(),
            });
        }

        if self.catalog.items.is_empty() {
            return Err(ConfigValidationError::MissingField(
                "catalog.items".to_string(),
            ));
        }

        Ok(())
    }
}

impl ScaleConfig {
    /// Get the live display poll interval as Duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl CameraConfig {
    /// Get the preview interval as Duration.
    pub fn preview_interval(&self) -> Duration {
        Duration::from_millis(self.preview_interval_ms)
    }
}

impl UploadConfig {
    /// Get the total request timeout as Duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Get the connection timeout as Duration.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
