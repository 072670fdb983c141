//! Configuration parsing and management for facelens

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, FacelensError, Result};
use crate::inference::DetectorMode;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub session: SessionConfig,
    pub assets: AssetConfig,
    pub inference: InferenceConfig,
    pub renderer: RendererConfig,
    pub pipeline: PipelineConfig,
    pub http: HttpConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ConfigError::ReadFile(format!("{}: {}", path.as_ref().display(), e))
        })?;

        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()).into())
    }

    /// Load configuration from default paths
    pub fn load() -> Result<Self> {
        let paths = [
            PathBuf::from("config.toml"),
            PathBuf::from("config/default.toml"),
            dirs_path().join("config.toml"),
        ];

        for path in &paths {
            if path.exists() {
                tracing::info!("Loading config from: {}", path.display());
                return Self::from_file(path);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.session.port == 0 {
            return Err(invalid("session.port", "Port must be greater than 0"));
        }

        if self.pipeline.tick_interval_ms == 0 {
            return Err(invalid(
                "pipeline.tick_interval_ms",
                "Tick interval must be greater than 0",
            ));
        }

        if self.renderer.view_width == 0 || self.renderer.view_height == 0 {
            return Err(invalid(
                "renderer.view_width/view_height",
                "View dimensions must be greater than 0",
            ));
        }

        if self.inference.enabled && self.inference.command.trim().is_empty() {
            return Err(invalid(
                "inference.command",
                "Detector command must be set when inference is enabled",
            ));
        }

        if self.http.enabled && self.http.port == 0 {
            return Err(invalid("http.port", "Port must be greater than 0"));
        }

        if !self.assets.mesh_path.exists() {
            tracing::warn!(
                "Overlay mesh not found at: {} (overlays will attach without a mesh)",
                self.assets.mesh_path.display()
            );
        }
        if !self.assets.texture_path.exists() {
            tracing::warn!(
                "Overlay texture not found at: {}",
                self.assets.texture_path.display()
            );
        }

        Ok(())
    }
}

fn invalid(field: &str, message: &str) -> FacelensError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.to_string(),
    }
    .into()
}

/// Tracking session configuration (bundled UDP session)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Listen address for face packets
    pub listen_address: String,
    /// UDP port to receive face packets on
    pub port: u16,
    /// Still image the tracker keeps refreshed with the latest camera frame
    pub frame_path: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            listen_address: "127.0.0.1".to_string(),
            port: 12347,
            frame_path: PathBuf::from("frames/latest.png"),
        }
    }
}

/// Overlay asset sources
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetConfig {
    /// glTF/GLB mesh attached to each face region
    pub mesh_path: PathBuf,
    /// Texture applied to the face mesh
    pub texture_path: PathBuf,
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            mesh_path: PathBuf::from("assets/face_regions.glb"),
            texture_path: PathBuf::from("assets/blush_texture.png"),
        }
    }
}

/// Object detector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Enable the bundled subprocess detector
    pub enabled: bool,
    /// Detector program (reads PNG on stdin, writes JSON detections on stdout)
    pub command: String,
    /// Extra arguments for the detector program
    pub args: Vec<String>,
    /// Streaming or single-image detection
    pub mode: DetectorMode,
    /// Per-request timeout in milliseconds
    pub timeout_ms: u64,
    /// Label drawn when the detector does not classify an object
    pub default_label: String,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            command: "python3".to_string(),
            args: vec!["scripts/detect.py".to_string()],
            mode: DetectorMode::Stream,
            timeout_ms: 5000,
            default_label: "Object".to_string(),
        }
    }
}

/// Overlay renderer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Width of the drawing surface
    pub view_width: u32,
    /// Height of the drawing surface
    pub view_height: u32,
    /// Box stroke width in pixels
    pub stroke_width: f32,
    /// Label text size in pixels
    pub text_size: f32,
    /// RGBA color used for both box and label
    pub color: [u8; 4],
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            view_width: 1080,
            view_height: 1920,
            stroke_width: 10.0,
            text_size: 32.0,
            color: [255, 255, 0, 255],
        }
    }
}

/// Tick loop and reconciliation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Interval between session update ticks
    pub tick_interval_ms: u64,
    /// Remove overlays as soon as their face leaves the live set
    pub detach_missing: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 33,
            detach_missing: true,
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Enable HTTP server
    pub enabled: bool,
    /// HTTP server host
    pub host: String,
    /// HTTP server port
    pub port: u16,
    /// Enable CORS
    pub cors_enabled: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 8080,
            cors_enabled: true,
        }
    }
}

/// Get the platform-specific configuration directory
fn dirs_path() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        if let Some(config_dir) = std::env::var_os("XDG_CONFIG_HOME") {
            return PathBuf::from(config_dir).join("facelens");
        }
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(".config/facelens");
        }
    }

    #[cfg(target_os = "macos")]
    {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join("Library/Application Support/facelens");
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Some(appdata) = std::env::var_os("APPDATA") {
            return PathBuf::from(appdata).join("facelens");
        }
    }

    PathBuf::from(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.session.port, 12347);
        assert_eq!(config.inference.default_label, "Object");
        assert_eq!(config.inference.mode, DetectorMode::Stream);
        assert!(config.pipeline.detach_missing);
        assert!(!config.inference.enabled);
    }

    #[test]
    fn test_config_validation() {
        let config = Config::default();
        assert!(config.validate().is_ok());

        let mut config = Config::default();
        config.pipeline.tick_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.inference.enabled = true;
        config.inference.command = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
            [pipeline]
            detach_missing = false

            [inference]
            mode = "single_image"
            default_label = "Thing"

            [renderer]
            view_height = 800
        "#;

        let config = Config::from_str(toml).unwrap();
        assert!(!config.pipeline.detach_missing);
        assert_eq!(config.inference.mode, DetectorMode::SingleImage);
        assert_eq!(config.inference.default_label, "Thing");
        assert_eq!(config.renderer.view_height, 800);
        assert_eq!(config.renderer.view_width, 1080);
    }
}
