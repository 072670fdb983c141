//! Error types for facelens

use thiserror::Error;

/// Main error type for facelens
#[derive(Error, Debug)]
pub enum FacelensError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Asset error: {0}")]
    Asset(#[from] AssetError),

    #[error("Inference error: {0}")]
    Inference(#[from] InferenceError),

    #[error("Web server error: {0}")]
    Web(#[from] WebError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadFile(String),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid configuration value: {field} - {message}")]
    InvalidValue { field: String, message: String },
}

/// Tracking session errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    /// Session could not be created yet (install pending, permissions, device busy).
    /// Recoverable: creation is retried on the next resume.
    #[error("Tracking session unavailable: {0}")]
    Unavailable(String),

    /// The camera could not be opened while resuming. Fatal for the current cycle.
    #[error("Unable to get camera: {0}")]
    CameraUnavailable(String),
}

/// Capture-and-infer errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CaptureError {
    #[error("No camera frame available yet")]
    FrameUnavailable,

    #[error("Frame conversion failed: {0}")]
    Conversion(String),
}

/// Overlay asset errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AssetError {
    #[error("Asset not found: {0}")]
    NotFound(String),

    #[error("Failed to load asset: {0}")]
    LoadFailed(String),
}

/// Inference service errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InferenceError {
    #[error("Inference failed: {0}")]
    Failed(String),

    #[error("Failed to launch detector: {0}")]
    Spawn(String),

    #[error("Detector timed out after {0} ms")]
    Timeout(u64),

    #[error("Failed to parse detector output: {0}")]
    Parse(String),
}

/// Web server errors
#[derive(Error, Debug)]
pub enum WebError {
    #[error("Failed to bind to address: {0}")]
    Bind(String),

    #[error("Coordinator is not running")]
    CoordinatorGone,
}

/// Result type alias for facelens operations
pub type Result<T> = std::result::Result<T, FacelensError>;
