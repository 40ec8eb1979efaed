//! # HAL Configuration
//!
//! Settings for the logging bootstrap, native device creation and the default
//! render target. Every section has working defaults so a configuration file
//! only needs to name what it changes.

use serde::{Deserialize, Serialize};

use super::{Config, ConfigError};
use crate::render::api::ClearColor;

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `env_logger` filter, overridden by `RUST_LOG`
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Native device settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Application name reported to the driver
    pub application_name: String,
    /// Whether to enable validation layers; `None` follows the build type
    pub enable_validation: Option<bool>,
    /// Device extensions to enable on the logical device
    pub extensions: Vec<String>,
    /// Prefer a discrete GPU when several devices are available
    pub prefer_discrete_gpu: bool,
}

impl DeviceConfig {
    /// Resolve the validation setting against the build type
    pub fn validation_enabled(&self) -> bool {
        self.enable_validation.unwrap_or(cfg!(debug_assertions))
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            application_name: "Render HAL Application".to_string(),
            enable_validation: None,
            extensions: Vec::new(),
            prefer_discrete_gpu: true,
        }
    }
}

/// Default render target settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    /// Target width in pixels
    pub width: u32,
    /// Target height in pixels
    pub height: u32,
    /// Colour used by `RenderDevice::clear`
    pub clear_color: ClearColor,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            clear_color: ClearColor::BLACK,
        }
    }
}

/// Top-level configuration for the abstraction layer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HalConfig {
    /// Logging bootstrap
    pub logging: LoggingConfig,
    /// Native device creation
    pub device: DeviceConfig,
    /// Default render target
    pub frame: FrameConfig,
}

impl HalConfig {
    /// Create a configuration with defaults and the given application name
    pub fn new(app_name: impl Into<String>) -> Self {
        let mut config = Self::default();
        config.device.application_name = app_name.into();
        config
    }

    /// Set the render target size
    pub fn with_frame_size(mut self, width: u32, height: u32) -> Self {
        self.frame.width = width;
        self.frame.height = height;
        self
    }

    /// Enable or disable validation layers
    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.device.enable_validation = Some(enabled);
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device.application_name.is_empty() {
            return Err(ConfigError::Invalid("Application name cannot be empty".to_string()));
        }

        if self.frame.width == 0 || self.frame.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "Frame dimensions must be non-zero, got {}x{}",
                self.frame.width, self.frame.height
            )));
        }

        if !self.frame.clear_color.is_normalized() {
            return Err(ConfigError::Invalid(format!(
                "Clear colour components must lie in [0, 1], got {:?}",
                self.frame.clear_color
            )));
        }

        if self.device.extensions.iter().any(String::is_empty) {
            return Err(ConfigError::Invalid("Device extension names cannot be empty".to_string()));
        }

        Ok(())
    }

    /// Load a configuration file and validate it
    pub fn load_validated(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let config = Self::load_from_file(path)?;
        config.validate()?;
        Ok(config)
    }
}

impl Config for HalConfig {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(HalConfig::default().validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: HalConfig = toml::from_str(
            r#"
            [frame]
            width = 1024

            [device]
            extensions = ["VK_KHR_swapchain"]
            "#,
        )
        .unwrap();

        assert_eq!(config.frame.width, 1024);
        assert_eq!(config.frame.height, 600);
        assert_eq!(config.device.extensions, vec!["VK_KHR_swapchain".to_string()]);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn zero_sized_frame_is_invalid() {
        let config = HalConfig::new("probe").with_frame_size(0, 600);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn out_of_range_clear_colour_is_invalid() {
        let mut config = HalConfig::new("probe");
        config.frame.clear_color = ClearColor::new(2.0, 0.0, 0.0, 1.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_extension_is_unsupported() {
        let result = HalConfig::load_from_file("hal.json");
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat(_))));
    }

    #[test]
    fn ron_file_round_trips_through_disk() {
        let path = std::env::temp_dir().join(format!("render_hal_config_{}.ron", std::process::id()));
        let path = path.to_str().unwrap().to_string();

        let config = HalConfig::new("ron probe").with_validation(false);
        config.save_to_file(&path).unwrap();
        let loaded = HalConfig::load_validated(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.device.application_name, "ron probe");
        assert_eq!(loaded.device.enable_validation, Some(false));
        assert!(!loaded.device.validation_enabled());
    }
}
