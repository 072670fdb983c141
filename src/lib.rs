//! Facelens - Tracked-Entity Overlay Pipeline
//!
//! A service that keeps one overlay attached to every face reported by a
//! tracking session and, on request, runs an object detector on the latest
//! camera frame:
//! - Per-tick reconciliation between live faces and overlay nodes
//! - Asynchronous mesh/texture loading with stale-completion rejection
//! - Single-flight capture, conversion and inference
//! - Box/label overlay with an HTTP/SSE surface for hosts

pub mod capture;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod inference;
pub mod overlay;
pub mod render;
pub mod scene;
pub mod session;
pub mod web;

pub use config::Config;
pub use error::{FacelensError, Result};

use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

use coordinator::CoordinatorHandle;
use render::OverlaySurface;

/// Application state shared across all components
#[derive(Debug)]
pub struct AppState {
    /// Current configuration
    pub config: RwLock<Config>,
    /// Shutdown signal
    pub shutdown_tx: broadcast::Sender<()>,
    /// Commands, lifecycle events and status of the pipeline coordinator
    pub coordinator: CoordinatorHandle,
    /// Detection overlay
    pub overlay: OverlaySurface,
}

impl AppState {
    /// Create a new application state with the given configuration
    pub fn new(
        config: Config,
        coordinator: CoordinatorHandle,
        overlay: OverlaySurface,
    ) -> Arc<Self> {
        let (shutdown_tx, _) = broadcast::channel(1);

        Arc::new(Self {
            config: RwLock::new(config),
            shutdown_tx,
            coordinator,
            overlay,
        })
    }

    /// Subscribe to shutdown signal
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Signal shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
