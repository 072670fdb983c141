//! Pipeline coordinator
//!
//! Owns the tracking session, scene graph, binding table and capture
//! pipeline, and drives them from a single task: lifecycle events, session
//! ticks, asset completions and host commands are all handled here in order.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;

use crate::capture::{CaptureOutcome, CapturePipeline};
use crate::config::PipelineConfig;
use crate::error::{SessionError, WebError};
use crate::overlay::{AssetCompletion, AssetLoader, ReconcileReport, Reconciler};
use crate::scene::SceneGraph;
use crate::session::{SessionProvider, SessionSettings, TrackingSession};

/// Host command that runs one capture-and-infer cycle
pub const CAPTURE_AND_PROCESS: &str = "captureAndProcess";

/// Coordinator lifecycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    #[default]
    Uninitialized,
    Configured,
    Running,
    Paused,
    Destroyed,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LifecycleState::Uninitialized => "uninitialized",
            LifecycleState::Configured => "configured",
            LifecycleState::Running => "running",
            LifecycleState::Paused => "paused",
            LifecycleState::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

/// Host lifecycle notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Resume,
    Pause,
    Stop,
    Destroy,
}

impl std::str::FromStr for LifecycleEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "resume" => Ok(LifecycleEvent::Resume),
            "pause" => Ok(LifecycleEvent::Pause),
            "stop" => Ok(LifecycleEvent::Stop),
            "destroy" => Ok(LifecycleEvent::Destroy),
            other => Err(format!("unknown lifecycle event '{}'", other)),
        }
    }
}

/// Result of a host command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandReply {
    Success,
    Busy,
    NotImplemented,
}

/// A named command from the host, answered once handled
#[derive(Debug)]
pub struct HostCommand {
    pub name: String,
    pub reply: oneshot::Sender<CommandReply>,
}

/// A lifecycle event from the host, answered with the resulting state
#[derive(Debug)]
pub struct LifecycleRequest {
    pub event: LifecycleEvent,
    pub reply: oneshot::Sender<Result<LifecycleState, SessionError>>,
}

/// Snapshot published after every coordinator step
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStatus {
    pub state: LifecycleState,
    pub session_active: bool,
    pub bindings: usize,
    pub scene_nodes: usize,
    pub capture_busy: bool,
    pub overlay_revision: u64,
}

/// Sending side, shared with the web server and the binary
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    commands: mpsc::Sender<HostCommand>,
    lifecycle: mpsc::Sender<LifecycleRequest>,
    status: watch::Receiver<PipelineStatus>,
}

impl CoordinatorHandle {
    /// Dispatch a named host command and wait for its reply
    pub async fn command(&self, name: &str) -> Result<CommandReply, WebError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(HostCommand {
                name: name.to_string(),
                reply,
            })
            .await
            .map_err(|_| WebError::CoordinatorGone)?;
        rx.await.map_err(|_| WebError::CoordinatorGone)
    }

    /// Deliver a lifecycle event and wait until it has been applied
    pub async fn lifecycle(
        &self,
        event: LifecycleEvent,
    ) -> Result<Result<LifecycleState, SessionError>, WebError> {
        let (reply, rx) = oneshot::channel();
        self.lifecycle
            .send(LifecycleRequest { event, reply })
            .await
            .map_err(|_| WebError::CoordinatorGone)?;
        rx.await.map_err(|_| WebError::CoordinatorGone)
    }

    /// Latest published status
    pub fn status(&self) -> PipelineStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<PipelineStatus> {
        self.status.clone()
    }
}

/// Receiving side, consumed by [`Coordinator::run`]
#[derive(Debug)]
pub struct CoordinatorInbox {
    commands: mpsc::Receiver<HostCommand>,
    lifecycle: mpsc::Receiver<LifecycleRequest>,
    status: watch::Sender<PipelineStatus>,
}

/// Create the channels between the coordinator and its callers
pub fn channel(capacity: usize) -> (CoordinatorHandle, CoordinatorInbox) {
    let (command_tx, command_rx) = mpsc::channel(capacity);
    let (lifecycle_tx, lifecycle_rx) = mpsc::channel(capacity);
    let (status_tx, status_rx) = watch::channel(PipelineStatus::default());

    (
        CoordinatorHandle {
            commands: command_tx,
            lifecycle: lifecycle_tx,
            status: status_rx,
        },
        CoordinatorInbox {
            commands: command_rx,
            lifecycle: lifecycle_rx,
            status: status_tx,
        },
    )
}

/// Single owner of the session, scene and binding table
pub struct Coordinator {
    state: LifecycleState,
    provider: Box<dyn SessionProvider>,
    session: Option<Arc<dyn TrackingSession>>,
    reconciler: Reconciler,
    scene: SceneGraph,
    loader: AssetLoader,
    completions: mpsc::UnboundedReceiver<AssetCompletion>,
    capture: CapturePipeline,
    tick_attached: bool,
    tick_interval: Duration,
}

impl Coordinator {
    pub fn new(
        provider: Box<dyn SessionProvider>,
        loader: AssetLoader,
        completions: mpsc::UnboundedReceiver<AssetCompletion>,
        capture: CapturePipeline,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            state: LifecycleState::Uninitialized,
            provider,
            session: None,
            reconciler: Reconciler::new(config.detach_missing),
            scene: SceneGraph::new(),
            loader,
            completions,
            capture,
            tick_attached: false,
            tick_interval: Duration::from_millis(config.tick_interval_ms),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn scene(&self) -> &SceneGraph {
        &self.scene
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    /// Apply one lifecycle event.
    ///
    /// Only a failed camera resume is reported back; session creation
    /// problems are logged and retried on the next resume.
    pub fn handle_lifecycle(&mut self, event: LifecycleEvent) -> Result<(), SessionError> {
        tracing::debug!("Lifecycle event {:?} in state {}", event, self.state);

        match event {
            LifecycleEvent::Resume => self.resume(),
            LifecycleEvent::Pause | LifecycleEvent::Stop => {
                if self.state == LifecycleState::Running {
                    if let Some(session) = &self.session {
                        session.pause();
                    }
                    self.state = LifecycleState::Paused;
                    tracing::info!("Pipeline paused");
                }
                Ok(())
            }
            LifecycleEvent::Destroy => {
                self.destroy();
                Ok(())
            }
        }
    }

    fn resume(&mut self) -> Result<(), SessionError> {
        if self.state == LifecycleState::Destroyed {
            tracing::warn!("Ignoring resume after destroy");
            return Ok(());
        }

        let session = match &self.session {
            Some(session) => Arc::clone(session),
            None => match self.provider.create() {
                Ok(Some(session)) => {
                    session.configure(&SessionSettings::default());
                    self.session = Some(Arc::clone(&session));
                    self.state = LifecycleState::Configured;
                    tracing::info!("Tracking session created");
                    session
                }
                Ok(None) => {
                    tracing::warn!("Tracking session not available yet, retrying on next resume");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!("{}, retrying on next resume", e);
                    return Ok(());
                }
            },
        };

        session.resume().map_err(|e| match e {
            SessionError::Unavailable(message) => SessionError::CameraUnavailable(message),
            other => other,
        })?;

        self.tick_attached = true;
        self.state = LifecycleState::Running;
        tracing::info!("Pipeline running");
        Ok(())
    }

    fn destroy(&mut self) {
        self.tick_attached = false;
        self.session = None;
        let removed = self.reconciler.clear(&mut self.scene);
        self.capture.surface().close();
        self.state = LifecycleState::Destroyed;
        tracing::info!("Pipeline destroyed ({} overlays released)", removed);
    }

    /// Reconcile against the live face set; `None` when ticks are off
    pub fn on_tick(&mut self) -> Option<ReconcileReport> {
        if self.state != LifecycleState::Running || !self.tick_attached {
            return None;
        }
        let session = self.session.as_ref()?;

        let live = session.live_entities();
        let report = self.reconciler.reconcile(&live, &mut self.scene, &self.loader);
        if report.created > 0 || report.removed > 0 {
            tracing::debug!(
                "Tick: {} created, {} removed, {} bound",
                report.created,
                report.removed,
                self.reconciler.len()
            );
        }
        Some(report)
    }

    /// Route a finished asset load to its binding
    pub fn apply_completion(&mut self, completion: AssetCompletion) -> bool {
        self.reconciler.apply_completion(completion, &mut self.scene)
    }

    /// Dispatch a host command by name
    pub async fn handle_command(&self, name: &str) -> CommandReply {
        match name {
            CAPTURE_AND_PROCESS => {
                match self.capture.capture_and_process(self.session.clone()).await {
                    CaptureOutcome::Busy => CommandReply::Busy,
                    CaptureOutcome::Submitted(_)
                    | CaptureOutcome::NoFrame
                    | CaptureOutcome::ConversionFailed(_) => CommandReply::Success,
                }
            }
            other => {
                tracing::warn!("Unknown host command: {}", other);
                CommandReply::NotImplemented
            }
        }
    }

    pub fn status(&self) -> PipelineStatus {
        PipelineStatus {
            state: self.state,
            session_active: self.session.is_some(),
            bindings: self.reconciler.len(),
            scene_nodes: self.scene.len(),
            capture_busy: self.capture.is_busy(),
            overlay_revision: self.capture.surface().revision(),
        }
    }

    /// Drive the coordinator until shutdown.
    ///
    /// Shutdown destroys the pipeline before returning.
    pub async fn run(mut self, inbox: CoordinatorInbox, mut shutdown: broadcast::Receiver<()>) {
        let CoordinatorInbox {
            mut commands,
            mut lifecycle,
            status,
        } = inbox;

        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            "Coordinator started (tick every {} ms)",
            self.tick_interval.as_millis()
        );
        status.send_replace(self.status());

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.on_tick();
                }
                Some(completion) = self.completions.recv() => {
                    self.apply_completion(completion);
                }
                Some(command) = commands.recv() => {
                    let reply = self.handle_command(&command.name).await;
                    let _ = command.reply.send(reply);
                }
                Some(request) = lifecycle.recv() => {
                    let result = self.handle_lifecycle(request.event);
                    if let Err(e) = &result {
                        tracing::error!("{}", e);
                    }
                    let _ = request.reply.send(result.map(|_| self.state));
                }
                _ = shutdown.recv() => {
                    tracing::info!("Coordinator shutting down");
                    self.handle_lifecycle(LifecycleEvent::Destroy).ok();
                    status.send_replace(self.status());
                    return;
                }
            }

            status.send_if_modified(|current| {
                let next = self.status();
                if *current == next {
                    return false;
                }
                *current = next;
                true
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AssetConfig, InferenceConfig};
    use crate::error::AssetError;
    use crate::inference::DisabledDetector;
    use crate::overlay::assets::{AssetDecoder, AssetKind, MeshAsset, TextureAsset};
    use crate::render::{OverlayStyle, OverlaySurface};
    use crate::session::fake::{FakeProvider, FakeSession};
    use crate::session::{FaceMode, TrackedEntity, UpdateMode};
    use std::path::Path;
    use std::sync::atomic::Ordering;

    struct StaticDecoder;

    impl AssetDecoder for StaticDecoder {
        fn decode_mesh(&self, _path: &Path) -> Result<MeshAsset, AssetError> {
            Ok(MeshAsset::default())
        }

        fn decode_texture(&self, _path: &Path) -> Result<TextureAsset, AssetError> {
            Ok(TextureAsset::default())
        }
    }

    fn coordinator(provider: FakeProvider) -> Coordinator {
        let (loader, completions) =
            AssetLoader::new(&AssetConfig::default(), Arc::new(StaticDecoder));
        let capture = CapturePipeline::new(
            Arc::new(DisabledDetector),
            OverlaySurface::new(OverlayStyle::default()),
            &InferenceConfig::default(),
        );
        Coordinator::new(
            Box::new(provider),
            loader,
            completions,
            capture,
            &PipelineConfig::default(),
        )
    }

    async fn next_completion(coordinator: &mut Coordinator) -> AssetCompletion {
        tokio::time::timeout(Duration::from_secs(5), coordinator.completions.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_deferred_session_creation_is_retried() {
        let session = Arc::new(FakeSession::default());
        let mut provider = FakeProvider::new(Arc::clone(&session));
        provider.script.push_back(Ok(false));
        provider
            .script
            .push_back(Err(SessionError::Unavailable("not installed".to_string())));
        let create_calls = Arc::clone(&provider.create_calls);
        let mut coordinator = coordinator(provider);

        assert_eq!(coordinator.handle_lifecycle(LifecycleEvent::Resume), Ok(()));
        assert_eq!(coordinator.state(), LifecycleState::Uninitialized);
        assert!(!coordinator.has_session());

        assert_eq!(coordinator.handle_lifecycle(LifecycleEvent::Resume), Ok(()));
        assert_eq!(coordinator.state(), LifecycleState::Uninitialized);

        assert_eq!(coordinator.handle_lifecycle(LifecycleEvent::Resume), Ok(()));
        assert_eq!(coordinator.state(), LifecycleState::Running);
        assert_eq!(create_calls.load(Ordering::SeqCst), 3);

        let settings = session.settings.lock().unwrap().unwrap();
        assert_eq!(settings.face_mode, FaceMode::Mesh3d);
        assert_eq!(settings.update_mode, UpdateMode::LatestCameraImage);
    }

    #[tokio::test]
    async fn test_session_created_once_across_pause_and_resume() {
        let session = Arc::new(FakeSession::default());
        let provider = FakeProvider::new(Arc::clone(&session));
        let create_calls = Arc::clone(&provider.create_calls);
        let mut coordinator = coordinator(provider);

        coordinator.handle_lifecycle(LifecycleEvent::Resume).unwrap();
        coordinator.handle_lifecycle(LifecycleEvent::Pause).unwrap();
        assert_eq!(coordinator.state(), LifecycleState::Paused);
        coordinator.handle_lifecycle(LifecycleEvent::Resume).unwrap();
        coordinator.handle_lifecycle(LifecycleEvent::Stop).unwrap();
        coordinator.handle_lifecycle(LifecycleEvent::Resume).unwrap();

        assert_eq!(coordinator.state(), LifecycleState::Running);
        assert_eq!(create_calls.load(Ordering::SeqCst), 1);
        assert_eq!(session.resume_calls.load(Ordering::SeqCst), 3);
        assert_eq!(session.pause_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_camera_failure_is_reported() {
        let session = Arc::new(FakeSession::default());
        session.fail_resume.store(true, Ordering::SeqCst);
        session.set_faces(vec![TrackedEntity::new(1, 0)]);
        let mut coordinator = coordinator(FakeProvider::new(Arc::clone(&session)));

        let result = coordinator.handle_lifecycle(LifecycleEvent::Resume);
        assert!(matches!(result, Err(SessionError::CameraUnavailable(_))));
        assert_eq!(coordinator.state(), LifecycleState::Configured);
        assert!(coordinator.on_tick().is_none());
        assert!(coordinator.reconciler().is_empty());

        session.fail_resume.store(false, Ordering::SeqCst);
        coordinator.handle_lifecycle(LifecycleEvent::Resume).unwrap();
        assert_eq!(coordinator.state(), LifecycleState::Running);
    }

    #[tokio::test]
    async fn test_ticks_skipped_while_paused() {
        let session = Arc::new(FakeSession::default());
        let mut coordinator = coordinator(FakeProvider::new(Arc::clone(&session)));
        assert!(coordinator.on_tick().is_none());

        coordinator.handle_lifecycle(LifecycleEvent::Resume).unwrap();
        coordinator.handle_lifecycle(LifecycleEvent::Pause).unwrap();
        session.set_faces(vec![TrackedEntity::new(1, 0)]);

        assert!(coordinator.on_tick().is_none());
        assert!(coordinator.reconciler().is_empty());

        coordinator.handle_lifecycle(LifecycleEvent::Resume).unwrap();
        let report = coordinator.on_tick().unwrap();
        assert_eq!(report.created, 1);
        assert_eq!(coordinator.reconciler().len(), 1);
    }

    #[tokio::test]
    async fn test_destroy_with_load_outstanding() {
        let session = Arc::new(FakeSession::default());
        session.set_faces(vec![TrackedEntity::new(1, 0)]);
        let mut coordinator = coordinator(FakeProvider::new(Arc::clone(&session)));

        coordinator.handle_lifecycle(LifecycleEvent::Resume).unwrap();
        coordinator.on_tick().unwrap();
        assert_eq!(coordinator.reconciler().len(), 1);

        // Mesh lands, texture is still "in flight" when the host destroys
        let first = next_completion(&mut coordinator).await;
        let second = next_completion(&mut coordinator).await;
        let (mesh, texture) = if first.payload.kind() == AssetKind::Mesh {
            (first, second)
        } else {
            (second, first)
        };
        assert!(coordinator.apply_completion(mesh));

        coordinator.handle_lifecycle(LifecycleEvent::Destroy).unwrap();
        assert_eq!(coordinator.state(), LifecycleState::Destroyed);
        assert!(coordinator.reconciler().is_empty());
        assert!(coordinator.scene().is_empty());
        assert!(!coordinator.has_session());
        assert!(coordinator.capture.surface().is_closed());

        let revision = coordinator.scene().revision();
        assert!(!coordinator.apply_completion(texture));
        assert_eq!(coordinator.scene().revision(), revision);

        // Nothing brings a destroyed pipeline back
        coordinator.handle_lifecycle(LifecycleEvent::Resume).unwrap();
        assert_eq!(coordinator.state(), LifecycleState::Destroyed);
        assert!(coordinator.on_tick().is_none());
    }

    #[tokio::test]
    async fn test_command_dispatch() {
        let session = Arc::new(FakeSession::default());
        let coordinator = coordinator(FakeProvider::new(session));

        assert_eq!(
            coordinator.handle_command("switchCamera").await,
            CommandReply::NotImplemented
        );
        // No session and no frame still counts as handled
        assert_eq!(
            coordinator.handle_command(CAPTURE_AND_PROCESS).await,
            CommandReply::Success
        );
    }

    #[test]
    fn test_parse_lifecycle_event() {
        assert_eq!(
            "resume".parse::<LifecycleEvent>().ok(),
            Some(LifecycleEvent::Resume)
        );
        assert_eq!(
            "Destroy".parse::<LifecycleEvent>().ok(),
            Some(LifecycleEvent::Destroy)
        );
        assert!("restart".parse::<LifecycleEvent>().is_err());
    }

    #[tokio::test]
    async fn test_run_loop_handles_events_until_shutdown() {
        let session = Arc::new(FakeSession::default());
        session.set_faces(vec![TrackedEntity::new(1, 0), TrackedEntity::new(2, 0)]);
        let coordinator = coordinator(FakeProvider::new(Arc::clone(&session)));

        let (handle, inbox) = channel(8);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(coordinator.run(inbox, shutdown_rx));

        let state = handle.lifecycle(LifecycleEvent::Resume).await.unwrap();
        assert_eq!(state, Ok(LifecycleState::Running));

        let mut status = handle.subscribe_status();
        tokio::time::timeout(
            Duration::from_secs(5),
            status.wait_for(|s| s.bindings == 2 && s.scene_nodes == 2),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(
            handle.command("unknown").await.unwrap(),
            CommandReply::NotImplemented
        );

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();

        let last = handle.status();
        assert_eq!(last.state, LifecycleState::Destroyed);
        assert_eq!(last.bindings, 0);
        assert!(matches!(
            handle.command(CAPTURE_AND_PROCESS).await,
            Err(WebError::CoordinatorGone)
        ));
    }
}
