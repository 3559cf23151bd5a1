//! Application Configuration
//!
//! Service settings stored in TOML format.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP server settings
    pub server: ServerSettings,
    /// OCR settings
    pub ocr: OcrSettings,
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Bind address
    pub host: String,
    /// Bind port
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

/// OCR-related settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrSettings {
    /// Language codes to recognize, in priority order
    pub languages: Vec<String>,
    /// Whether to request GPU acceleration (falls back to CPU when no
    /// accelerator is available)
    pub use_gpu: bool,
    /// Reject rotation values that are not a multiple of 90 instead of
    /// silently ignoring them
    pub strict_rotation: bool,
    /// Model cache directory; defaults to the per-user data directory
    pub models_dir: Option<PathBuf>,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            languages: vec!["ko".to_string(), "en".to_string()],
            use_gpu: true,
            strict_rotation: false,
            models_dir: None,
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
