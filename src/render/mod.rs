//! Detection overlay surface
//!
//! Holds the most recent box/label pair and turns it into draw commands in
//! view coordinates. Writes replace each other; nothing is queued.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

use crate::config::RendererConfig;

/// Axis-aligned box in source image pixels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl BoundingBox {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> i32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> i32 {
        self.bottom.saturating_sub(self.top)
    }

    pub fn center_x(&self) -> i32 {
        midpoint(self.left, self.right)
    }

    pub fn center_y(&self) -> i32 {
        midpoint(self.top, self.bottom)
    }
}

// Detector coordinates are untrusted, so the sum is taken in i64
fn midpoint(a: i32, b: i32) -> i32 {
    ((a as i64 + b as i64) / 2) as i32
}

/// The only state the surface draws from
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OverlayFrameState {
    pub bbox: BoundingBox,
    pub label: String,
    pub source_width: u32,
    pub source_height: u32,
    pub revision: u64,
}

/// A single primitive for the view to draw
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DrawCommand {
    StrokeRect {
        left: f32,
        top: f32,
        right: f32,
        bottom: f32,
        stroke_width: f32,
        color: [u8; 4],
    },
    Text {
        text: String,
        x: f32,
        y: f32,
        size: f32,
        color: [u8; 4],
    },
}

/// Paint settings shared by box and label
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayStyle {
    pub stroke_width: f32,
    pub text_size: f32,
    pub color: [u8; 4],
}

impl From<&RendererConfig> for OverlayStyle {
    fn from(config: &RendererConfig) -> Self {
        Self {
            stroke_width: config.stroke_width,
            text_size: config.text_size,
            color: config.color,
        }
    }
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self::from(&RendererConfig::default())
    }
}

/// Passive drawing surface for detection results
#[derive(Debug, Clone)]
pub struct OverlaySurface {
    tx: Arc<watch::Sender<Option<OverlayFrameState>>>,
    revision: Arc<AtomicU64>,
    closed: Arc<AtomicBool>,
    style: OverlayStyle,
}

impl OverlaySurface {
    pub fn new(style: OverlayStyle) -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            tx: Arc::new(tx),
            revision: Arc::new(AtomicU64::new(0)),
            closed: Arc::new(AtomicBool::new(false)),
            style,
        }
    }

    /// Replace everything drawn with one box and label, then request a redraw.
    ///
    /// Returns `false` once the surface is closed.
    pub fn set_data(
        &self,
        bbox: BoundingBox,
        label: &str,
        source_width: u32,
        source_height: u32,
    ) -> bool {
        self.tx.send_if_modified(|state| {
            if self.closed.load(Ordering::SeqCst) {
                return false;
            }
            *state = Some(OverlayFrameState {
                bbox,
                label: label.to_string(),
                source_width,
                source_height,
                revision: self.revision.fetch_add(1, Ordering::SeqCst) + 1,
            });
            true
        })
    }

    /// Replace only the box, keeping label and source dimensions
    pub fn draw_bounding_box(&self, bbox: BoundingBox) -> bool {
        self.tx.send_if_modified(|state| {
            if self.closed.load(Ordering::SeqCst) {
                return false;
            }
            let next = state.get_or_insert_with(OverlayFrameState::default);
            next.bbox = bbox;
            next.revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
            true
        })
    }

    /// Clear the overlay and ignore every later write
    pub fn close(&self) {
        // Under the channel lock, so no write can land after the clear
        self.tx.send_modify(|state| {
            self.closed.store(true, Ordering::SeqCst);
            *state = None;
        });
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Latest state, if anything has been drawn
    pub fn current(&self) -> Option<OverlayFrameState> {
        self.tx.borrow().clone()
    }

    /// Number of writes so far
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<OverlayFrameState>> {
        self.tx.subscribe()
    }

    pub fn style(&self) -> OverlayStyle {
        self.style
    }

    /// Draw commands for the latest state on a view of the given size
    pub fn paint(&self, view_width: u32, view_height: u32) -> Vec<DrawCommand> {
        match self.current() {
            Some(state) => paint_state(&state, view_width, view_height, &self.style),
            None => Vec::new(),
        }
    }
}

/// Map a frame state into view coordinates.
///
/// The source image is centered vertically in the view; the same offset
/// applies to box and label. Label first, box on top.
pub fn paint_state(
    state: &OverlayFrameState,
    _view_width: u32,
    view_height: u32,
    style: &OverlayStyle,
) -> Vec<DrawCommand> {
    let offset = (view_height as f32 - state.source_height as f32) / 2.0;
    let bbox = &state.bbox;
    let mut commands = Vec::with_capacity(2);

    if !state.label.is_empty() {
        commands.push(DrawCommand::Text {
            text: state.label.clone(),
            x: bbox.center_x() as f32,
            y: bbox.center_y() as f32 + offset,
            size: style.text_size,
            color: style.color,
        });
    }

    commands.push(DrawCommand::StrokeRect {
        left: bbox.left as f32,
        top: bbox.top as f32 + offset,
        right: bbox.right as f32,
        bottom: bbox.bottom as f32 + offset,
        stroke_width: style.stroke_width,
        color: style.color,
    });

    commands
}
