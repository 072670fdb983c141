//! Object detection service
//!
//! Detectors take a converted RGB frame and resolve asynchronously, possibly
//! long after the capture that produced the frame.

pub mod subprocess;

use futures::future::BoxFuture;
use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::error::InferenceError;
use crate::render::BoundingBox;

pub use subprocess::CommandDetector;

/// How the detector treats consecutive images
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorMode {
    /// Low latency, images are related frames of one stream
    #[default]
    Stream,
    /// Each image is independent
    SingleImage,
}

impl DetectorMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectorMode::Stream => "stream",
            DetectorMode::SingleImage => "single_image",
        }
    }
}

/// One detected object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub confidence: f32,
}

/// Detections from one image, with the image size they refer to
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionResult {
    pub detections: Vec<Detection>,
    pub width: u32,
    pub height: u32,
}

/// An object detector
pub trait InferenceService: Send + Sync {
    fn detect(
        &self,
        image: RgbImage,
        mode: DetectorMode,
    ) -> BoxFuture<'static, Result<Vec<Detection>, InferenceError>>;
}

/// Stand-in used when no detector is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledDetector;

impl InferenceService for DisabledDetector {
    fn detect(
        &self,
        _image: RgbImage,
        _mode: DetectorMode,
    ) -> BoxFuture<'static, Result<Vec<Detection>, InferenceError>> {
        let result = Err(InferenceError::Failed(
            "no detector configured (inference.enabled = false)".to_string(),
        ));
        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_detection() {
        let json = r#"[
            {"bbox": {"left": 1, "top": 2, "right": 30, "bottom": 40}, "label": "cup", "confidence": 0.8},
            {"bbox": {"left": 0, "top": 0, "right": 5, "bottom": 5}}
        ]"#;
        let detections: Vec<Detection> = serde_json::from_str(json).unwrap();
        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].label.as_deref(), Some("cup"));
        assert_eq!(detections[0].bbox.width(), 29);
        assert!(detections[1].label.is_none());
        assert_eq!(detections[1].confidence, 0.0);
    }

    #[tokio::test]
    async fn test_disabled_detector_fails() {
        let result = DisabledDetector
            .detect(RgbImage::new(1, 1), DetectorMode::Stream)
            .await;
        assert!(matches!(result, Err(InferenceError::Failed(_))));
    }
}
