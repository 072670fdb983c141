//! Overlay binding records

use crate::scene::NodeId;
use crate::session::EntityRef;

use super::assets::{MeshHandle, TextureHandle};

/// Identity a load completion is matched against.
///
/// The serial is unique per binding for the reconciler's lifetime, so a
/// completion issued for a removed binding never matches a newer binding of
/// the same face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingTag {
    pub entity: EntityRef,
    pub serial: u64,
}

impl BindingTag {
    pub fn new(entity: EntityRef, serial: u64) -> Self {
        Self { entity, serial }
    }
}

impl std::fmt::Display for BindingTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (binding {})", self.entity, self.serial)
    }
}

/// Load progress of a single overlay asset
#[derive(Debug, Clone, Default)]
pub enum AssetLoadState<T> {
    #[default]
    Pending,
    Loaded(T),
    Failed(String),
}

impl<T> AssetLoadState<T> {
    pub fn is_pending(&self) -> bool {
        matches!(self, AssetLoadState::Pending)
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, AssetLoadState::Loaded(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, AssetLoadState::Failed(_))
    }

    pub fn loaded(&self) -> Option<&T> {
        match self {
            AssetLoadState::Loaded(value) => Some(value),
            _ => None,
        }
    }

    /// Short label for status output
    pub fn label(&self) -> &'static str {
        match self {
            AssetLoadState::Pending => "pending",
            AssetLoadState::Loaded(_) => "loaded",
            AssetLoadState::Failed(_) => "failed",
        }
    }
}

/// Links one tracked face to its overlay node and asset states
#[derive(Debug, Clone)]
pub struct OverlayBinding {
    pub tag: BindingTag,
    pub node: NodeId,
    pub mesh: AssetLoadState<MeshHandle>,
    pub texture: AssetLoadState<TextureHandle>,
}

impl OverlayBinding {
    pub fn new(tag: BindingTag, node: NodeId) -> Self {
        Self {
            tag,
            node,
            mesh: AssetLoadState::Pending,
            texture: AssetLoadState::Pending,
        }
    }

    pub fn entity(&self) -> EntityRef {
        self.tag.entity
    }

    /// Both mesh and texture are loaded
    pub fn is_complete(&self) -> bool {
        self.mesh.is_loaded() && self.texture.is_loaded()
    }
}
