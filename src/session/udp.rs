//! JSON-over-UDP tracking session
//!
//! An external face tracker sends one JSON packet per camera frame listing
//! the faces it currently sees, and keeps the latest camera frame on disk at
//! `frame_path`. This session turns those into live entities and frames.

use glam::{Quat, Vec3};
use serde::Deserialize;
use std::net::{SocketAddr, UdpSocket};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::SessionConfig;
use crate::error::{CaptureError, SessionError};

use super::{
    AcquiredFrame, CameraImage, EntityRef, FaceMode, PixelFormat, Pose, SessionProvider,
    SessionSettings, TrackedEntity, TrackingSession, TrackingState,
};

/// A single JSON packet from the tracker
#[derive(Debug, Clone, Deserialize)]
pub struct FacePacket {
    #[serde(default)]
    pub faces: Vec<FaceEntry>,
}

/// One face inside a [`FacePacket`]
#[derive(Debug, Clone, Deserialize)]
pub struct FaceEntry {
    pub id: u64,
    #[serde(default)]
    pub generation: u32,
    #[serde(default)]
    pub tracking: TrackingState,
    /// Translation [x, y, z]
    #[serde(default)]
    pub position: [f32; 3],
    /// Rotation quaternion [x, y, z, w]
    #[serde(default = "identity_rotation")]
    pub rotation: [f32; 4],
    #[serde(default)]
    pub mesh_vertices: Vec<[f32; 3]>,
}

fn identity_rotation() -> [f32; 4] {
    [0.0, 0.0, 0.0, 1.0]
}

impl From<FaceEntry> for TrackedEntity {
    fn from(face: FaceEntry) -> Self {
        Self {
            entity: EntityRef::new(face.id, face.generation),
            pose: Pose {
                position: Vec3::from_array(face.position),
                rotation: Quat::from_array(face.rotation).normalize(),
            },
            mesh_vertices: face.mesh_vertices.into_iter().map(Vec3::from_array).collect(),
            tracking: face.tracking,
        }
    }
}

/// Tracking session fed by JSON-over-UDP packets
pub struct UdpTrackingSession {
    config: SessionConfig,
    settings: Mutex<SessionSettings>,
    socket: Mutex<Option<UdpSocket>>,
    faces: Mutex<Vec<TrackedEntity>>,
}

impl UdpTrackingSession {
    /// Create a new session (does not bind yet)
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            config: config.clone(),
            settings: Mutex::new(SessionSettings::default()),
            socket: Mutex::new(None),
            faces: Mutex::new(Vec::new()),
        }
    }

    /// Address the session is bound to, once resumed
    pub fn local_addr(&self) -> Option<SocketAddr> {
        lock(&self.socket).as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Drain every queued packet, keeping the newest face list
    fn poll_packets(&self) {
        let socket = lock(&self.socket);
        let socket = match socket.as_ref() {
            Some(s) => s,
            None => return,
        };

        let mut buf = [0u8; 65536];
        let mut latest: Option<FacePacket> = None;

        loop {
            match socket.recv(&mut buf) {
                Ok(size) if size > 0 => match serde_json::from_slice::<FacePacket>(&buf[..size]) {
                    Ok(packet) => latest = Some(packet),
                    Err(e) => tracing::warn!("Dropping malformed face packet: {}", e),
                },
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    tracing::warn!("Face packet receive error: {}", e);
                    break;
                }
            }
        }

        if let Some(packet) = latest {
            *lock(&self.faces) = packet.faces.into_iter().map(TrackedEntity::from).collect();
        }
    }
}

impl TrackingSession for UdpTrackingSession {
    fn configure(&self, settings: &SessionSettings) {
        tracing::debug!("Session configured: {:?}", settings);
        *lock(&self.settings) = *settings;
    }

    fn resume(&self) -> Result<(), SessionError> {
        let mut socket = lock(&self.socket);
        if socket.is_some() {
            return Ok(());
        }

        let addr = format!("{}:{}", self.config.listen_address, self.config.port);
        let bound = UdpSocket::bind(&addr)
            .map_err(|e| SessionError::CameraUnavailable(format!("bind {}: {}", addr, e)))?;
        bound
            .set_nonblocking(true)
            .map_err(|e| SessionError::CameraUnavailable(format!("non-blocking: {}", e)))?;

        tracing::info!("Tracking session listening on {}", addr);
        *socket = Some(bound);
        Ok(())
    }

    fn pause(&self) {
        if lock(&self.socket).take().is_some() {
            lock(&self.faces).clear();
            tracing::info!("Tracking session paused");
        }
    }

    fn live_entities(&self) -> Vec<TrackedEntity> {
        if lock(&self.settings).face_mode == FaceMode::Disabled {
            return Vec::new();
        }

        self.poll_packets();

        lock(&self.faces)
            .iter()
            .filter(|face| face.is_tracking())
            .cloned()
            .collect()
    }

    fn acquire_frame(&self) -> Result<AcquiredFrame, CaptureError> {
        if lock(&self.socket).is_none() {
            return Err(CaptureError::FrameUnavailable);
        }

        let decoded = image::open(&self.config.frame_path).map_err(|e| {
            tracing::debug!(
                "Camera frame not ready at {}: {}",
                self.config.frame_path.display(),
                e
            );
            CaptureError::FrameUnavailable
        })?;

        let rgba = decoded.to_rgba8();
        let image = CameraImage {
            width: rgba.width(),
            height: rgba.height(),
            format: PixelFormat::Rgba8,
            data: rgba.into_raw(),
        };

        Ok(AcquiredFrame::new(image, || {
            tracing::trace!("Camera frame released");
        }))
    }
}

/// Creates [`UdpTrackingSession`]s from configuration
pub struct UdpSessionProvider {
    config: SessionConfig,
}

impl UdpSessionProvider {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }
}

impl SessionProvider for UdpSessionProvider {
    fn create(&mut self) -> Result<Option<Arc<dyn TrackingSession>>, SessionError> {
        Ok(Some(Arc::new(UdpTrackingSession::new(&self.config))))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
