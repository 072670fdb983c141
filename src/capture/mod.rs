//! Capture-and-infer pipeline
//!
//! One capture cycle: borrow the latest camera frame, convert it to RGB,
//! hand it to the detector and forward every detection to the overlay
//! surface. At most one cycle is in flight; overlapping requests are
//! rejected rather than queued.

pub mod convert;

use image::RgbImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::config::InferenceConfig;
use crate::error::InferenceError;
use crate::inference::{DetectionResult, DetectorMode, InferenceService};
use crate::render::OverlaySurface;
use crate::session::TrackingSession;

/// What a capture request turned into
#[derive(Debug)]
pub enum CaptureOutcome {
    /// Frame converted and handed to the detector
    Submitted(InferenceTicket),
    /// No session or no camera frame yet
    NoFrame,
    /// The frame could not be converted to RGB
    ConversionFailed(String),
    /// Another cycle is still in flight
    Busy,
}

impl CaptureOutcome {
    pub fn is_busy(&self) -> bool {
        matches!(self, CaptureOutcome::Busy)
    }
}

/// Handle to a submitted inference request
#[derive(Debug)]
pub struct InferenceTicket {
    handle: JoinHandle<Result<DetectionResult, InferenceError>>,
}

impl InferenceTicket {
    /// Wait for the detector and the overlay update to finish
    pub async fn wait(self) -> Result<DetectionResult, InferenceError> {
        self.handle
            .await
            .map_err(|e| InferenceError::Failed(format!("inference task: {}", e)))?
    }
}

/// Claim on the single in-flight slot, released on drop
struct InFlightGuard(Arc<AtomicBool>);

impl InFlightGuard {
    fn try_claim(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(Arc::clone(flag)))
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Runs capture cycles against a detector and an overlay surface
pub struct CapturePipeline {
    detector: Arc<dyn InferenceService>,
    surface: OverlaySurface,
    in_flight: Arc<AtomicBool>,
    mode: DetectorMode,
    default_label: String,
}

impl CapturePipeline {
    pub fn new(
        detector: Arc<dyn InferenceService>,
        surface: OverlaySurface,
        config: &InferenceConfig,
    ) -> Self {
        Self {
            detector,
            surface,
            in_flight: Arc::new(AtomicBool::new(false)),
            mode: config.mode,
            default_label: config.default_label.clone(),
        }
    }

    /// Whether a cycle is currently in flight
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn surface(&self) -> &OverlaySurface {
        &self.surface
    }

    /// Run one capture cycle.
    ///
    /// Acquisition and conversion both run on the blocking pool; the frame
    /// goes back to the session as soon as conversion is done.
    pub async fn capture_and_process(
        &self,
        session: Option<Arc<dyn TrackingSession>>,
    ) -> CaptureOutcome {
        let Some(guard) = InFlightGuard::try_claim(&self.in_flight) else {
            tracing::debug!("Capture rejected, previous cycle still in flight");
            return CaptureOutcome::Busy;
        };

        let Some(session) = session else {
            tracing::debug!("Capture skipped, no tracking session");
            return CaptureOutcome::NoFrame;
        };

        let converted = tokio::task::spawn_blocking(move || -> Result<RgbImage, CaptureOutcome> {
            let frame = session.acquire_frame().map_err(|e| {
                tracing::debug!("Capture skipped: {}", e);
                CaptureOutcome::NoFrame
            })?;
            let result = convert::to_rgb(frame.image());
            drop(frame);
            result.map_err(|e| {
                tracing::warn!("{}", e);
                CaptureOutcome::ConversionFailed(e.to_string())
            })
        })
        .await;

        let image = match converted {
            Ok(Ok(image)) => image,
            Ok(Err(outcome)) => return outcome,
            Err(e) => {
                tracing::warn!("Frame capture task failed: {}", e);
                return CaptureOutcome::ConversionFailed(e.to_string());
            }
        };

        let (width, height) = image.dimensions();
        tracing::debug!("Submitting {}x{} frame for inference", width, height);

        let detection = self.detector.detect(image, self.mode);
        let surface = self.surface.clone();
        let default_label = self.default_label.clone();

        let handle = tokio::spawn(async move {
            let _guard = guard;
            let detections = detection.await.inspect_err(|e| {
                tracing::warn!("Inference failed: {}", e);
            })?;

            for detection in &detections {
                let label = detection
                    .label
                    .as_deref()
                    .filter(|label| !label.is_empty())
                    .unwrap_or(&default_label);
                if !surface.set_data(detection.bbox, label, width, height) {
                    tracing::debug!("Overlay closed, dropping late detections");
                    break;
                }
            }

            tracing::debug!("Inference finished with {} detections", detections.len());
            Ok::<_, InferenceError>(DetectionResult {
                detections,
                width,
                height,
            })
        });

        CaptureOutcome::Submitted(InferenceTicket { handle })
    }
}
