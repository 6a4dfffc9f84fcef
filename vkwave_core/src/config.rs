use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

fn default_present_mode() -> String {
    "fifo".to_string()
}

fn default_window_title() -> String {
    "vkwave".to_string()
}

fn default_window_width() -> u32 {
    1280
}

fn default_window_height() -> u32 {
    720
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct VulkanConfig {
    pub preferred_gpu: Option<String>,
    #[serde(default = "default_present_mode")]
    pub present_mode: String,
    pub swapchain_images: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    #[serde(default = "default_window_title")]
    pub title: String,
    #[serde(default = "default_window_width")]
    pub width: u32,
    #[serde(default = "default_window_height")]
    pub height: u32,
    pub mode: Option<String>,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: default_window_title(),
            width: default_window_width(),
            height: default_window_height(),
            mode: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct PlatformConfig {
    pub use_x11: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SceneConfig {
    pub model_path: Option<PathBuf>,
    pub model_paths: Vec<PathBuf>,
    pub hdr_path: Option<PathBuf>,
    pub hdr_paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub max_frames: u64,
    pub shader_debug: bool,
    pub shader_optimize: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            max_frames: 0,
            shader_debug: false,
            shader_optimize: true,
            log_level: default_log_level(),
        }
    }
}

/// Typed mirror of every key in the external configuration contract.
/// Every field is optional in the TOML source; missing keys fall back to
/// the defaults documented per-field above. Deserialized first from disk,
/// then overridden field-by-field by CLI flags where one is present.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub vulkan: VulkanConfig,
    pub window: WindowConfig,
    pub platform: PlatformConfig,
    pub scene: SceneConfig,
    pub debug: DebugConfig,
}

impl AppConfig {
    /// Loads `path` if it exists; a missing file is not an error (defaults
    /// apply, logged at info). A present-but-malformed file is fatal.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::info!("no config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let config = AppConfig::load(Path::new("/nonexistent/vkwave.toml")).unwrap();
        assert_eq!(config.window.width, 1280);
        assert_eq!(config.vulkan.present_mode, "fifo");
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config: AppConfig = toml::from_str("[window]\nwidth = 1920\n").unwrap();
        assert_eq!(config.window.width, 1920);
        assert_eq!(config.window.height, 720);
        assert_eq!(config.debug.log_level, "info");
    }

    #[test]
    fn malformed_toml_is_an_error() {
        let result: std::result::Result<AppConfig, _> = toml::from_str("this is not toml {{{");
        assert!(result.is_err());
    }
}
