//! Tracking session collaborator
//!
//! The session supplies the live face set every tick and hands out camera
//! frames on request. The pipeline only ever holds [`EntityRef`]s, never the
//! session's entities themselves.

pub mod udp;

#[cfg(test)]
pub(crate) mod fake;

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{CaptureError, SessionError};

pub use udp::{UdpSessionProvider, UdpTrackingSession};

/// Non-owning identity of a tracked face: session id plus session generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    pub id: u64,
    pub generation: u32,
}

impl EntityRef {
    pub fn new(id: u64, generation: u32) -> Self {
        Self { id, generation }
    }
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "face#{}.{}", self.id, self.generation)
    }
}

/// Tracking state reported by the session for a face
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingState {
    #[default]
    Tracking,
    Paused,
    Stopped,
}

/// Face pose in session space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Default for Pose {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
        }
    }
}

/// A face as reported by the session for one tick
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedEntity {
    pub entity: EntityRef,
    pub pose: Pose,
    pub mesh_vertices: Vec<Vec3>,
    pub tracking: TrackingState,
}

impl TrackedEntity {
    pub fn new(id: u64, generation: u32) -> Self {
        Self {
            entity: EntityRef::new(id, generation),
            pose: Pose::default(),
            mesh_vertices: Vec::new(),
            tracking: TrackingState::Tracking,
        }
    }

    pub fn is_tracking(&self) -> bool {
        self.tracking == TrackingState::Tracking
    }
}

/// Face tracking mode requested from the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaceMode {
    Disabled,
    Mesh3d,
}

/// When the session delivers updates relative to the camera
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    Blocking,
    LatestCameraImage,
}

/// Settings applied once when a session is created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub face_mode: FaceMode,
    pub update_mode: UpdateMode,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            face_mode: FaceMode::Mesh3d,
            update_mode: UpdateMode::LatestCameraImage,
        }
    }
}

/// Pixel layout of a raw camera image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgba8,
    Rgb8,
    /// Y plane followed by interleaved V/U at half resolution
    Nv21,
    /// Planar Y, U, V (I420)
    Yuv420,
    /// Anything else the camera may hand out
    Other(u32),
}

/// Raw camera image as handed out by the session
#[derive(Debug, Clone, PartialEq)]
pub struct CameraImage {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

/// A camera image on loan from the session.
///
/// The buffer goes back to the session when this value is dropped.
pub struct AcquiredFrame {
    image: CameraImage,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl AcquiredFrame {
    pub fn new(image: CameraImage, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            image,
            release: Some(Box::new(release)),
        }
    }

    pub fn image(&self) -> &CameraImage {
        &self.image
    }
}

impl std::fmt::Debug for AcquiredFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcquiredFrame")
            .field("width", &self.image.width)
            .field("height", &self.image.height)
            .field("format", &self.image.format)
            .finish()
    }
}

impl Drop for AcquiredFrame {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// A running face tracking session
pub trait TrackingSession: Send + Sync {
    /// Apply session settings. Called once, right after creation.
    fn configure(&self, settings: &SessionSettings);

    /// Start or restart camera delivery
    fn resume(&self) -> Result<(), SessionError>;

    /// Stop camera delivery; the session stays configured
    fn pause(&self);

    /// Faces currently being tracked
    fn live_entities(&self) -> Vec<TrackedEntity>;

    /// Borrow the latest camera image
    fn acquire_frame(&self) -> Result<AcquiredFrame, CaptureError>;
}

/// Creates tracking sessions on demand.
///
/// `Ok(None)` means creation has to wait (install or permission pending).
pub trait SessionProvider: Send + Sync {
    fn create(&mut self) -> Result<Option<Arc<dyn TrackingSession>>, SessionError>;
}
