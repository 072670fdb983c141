//! In-memory session used by unit tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{CaptureError, SessionError};

use super::{
    AcquiredFrame, CameraImage, SessionProvider, SessionSettings, TrackedEntity, TrackingSession,
};

#[derive(Default)]
pub(crate) struct FakeSession {
    pub faces: Mutex<Vec<TrackedEntity>>,
    pub frame: Mutex<Option<CameraImage>>,
    /// Blocks the calling thread inside `acquire_frame`, like a slow decoder
    pub acquire_delay: Mutex<Option<Duration>>,
    pub settings: Mutex<Option<SessionSettings>>,
    pub fail_resume: AtomicBool,
    pub resumed: AtomicBool,
    pub resume_calls: AtomicUsize,
    pub pause_calls: AtomicUsize,
    pub acquired: AtomicUsize,
    pub released: Arc<AtomicUsize>,
    pub outstanding: Arc<AtomicUsize>,
    pub max_outstanding: Arc<AtomicUsize>,
}

impl FakeSession {
    pub fn set_faces(&self, faces: Vec<TrackedEntity>) {
        *self.faces.lock().unwrap() = faces;
    }

    pub fn set_frame(&self, frame: Option<CameraImage>) {
        *self.frame.lock().unwrap() = frame;
    }
}

impl TrackingSession for FakeSession {
    fn configure(&self, settings: &SessionSettings) {
        *self.settings.lock().unwrap() = Some(*settings);
    }

    fn resume(&self) -> Result<(), SessionError> {
        self.resume_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_resume.load(Ordering::SeqCst) {
            return Err(SessionError::CameraUnavailable("camera in use".to_string()));
        }
        self.resumed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn pause(&self) {
        self.pause_calls.fetch_add(1, Ordering::SeqCst);
        self.resumed.store(false, Ordering::SeqCst);
    }

    fn live_entities(&self) -> Vec<TrackedEntity> {
        self.faces.lock().unwrap().clone()
    }

    fn acquire_frame(&self) -> Result<AcquiredFrame, CaptureError> {
        if let Some(delay) = *self.acquire_delay.lock().unwrap() {
            std::thread::sleep(delay);
        }

        let image = self
            .frame
            .lock()
            .unwrap()
            .clone()
            .ok_or(CaptureError::FrameUnavailable)?;

        self.acquired.fetch_add(1, Ordering::SeqCst);
        let now = self.outstanding.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_outstanding.fetch_max(now, Ordering::SeqCst);

        let released = Arc::clone(&self.released);
        let outstanding = Arc::clone(&self.outstanding);
        Ok(AcquiredFrame::new(image, move || {
            released.fetch_add(1, Ordering::SeqCst);
            outstanding.fetch_sub(1, Ordering::SeqCst);
        }))
    }
}

/// Hands out a scripted sequence of creation results, then the shared session
pub(crate) struct FakeProvider {
    pub session: Arc<FakeSession>,
    pub script: VecDeque<Result<bool, SessionError>>,
    pub create_calls: Arc<AtomicUsize>,
}

impl FakeProvider {
    pub fn new(session: Arc<FakeSession>) -> Self {
        Self {
            session,
            script: VecDeque::new(),
            create_calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl SessionProvider for FakeProvider {
    fn create(&mut self) -> Result<Option<Arc<dyn TrackingSession>>, SessionError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        match self.script.pop_front().unwrap_or(Ok(true)) {
            Ok(true) => Ok(Some(Arc::clone(&self.session) as Arc<dyn TrackingSession>)),
            Ok(false) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
