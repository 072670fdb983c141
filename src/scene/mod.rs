//! Overlay scene graph
//!
//! Flat node table with a single root. Only the coordinator task mutates it;
//! every mutation bumps [`SceneGraph::revision`].

use std::collections::HashMap;

use crate::overlay::assets::{MeshHandle, TextureHandle};
use crate::session::EntityRef;

/// Handle to an overlay node owned by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

/// A face overlay node
#[derive(Debug, Clone)]
pub struct OverlayNode {
    id: NodeId,
    entity: EntityRef,
    attached: bool,
    mesh: Option<MeshHandle>,
    texture: Option<TextureHandle>,
    shadow_caster: bool,
    shadow_receiver: bool,
}

impl OverlayNode {
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Face this node follows
    pub fn entity(&self) -> EntityRef {
        self.entity
    }

    /// Whether the node is parented to the scene root
    pub fn is_attached(&self) -> bool {
        self.attached
    }

    pub fn mesh(&self) -> Option<&MeshHandle> {
        self.mesh.as_ref()
    }

    pub fn texture(&self) -> Option<&TextureHandle> {
        self.texture.as_ref()
    }

    pub fn is_shadow_caster(&self) -> bool {
        self.shadow_caster
    }

    pub fn is_shadow_receiver(&self) -> bool {
        self.shadow_receiver
    }
}

#[derive(Debug, Default)]
pub struct SceneGraph {
    nodes: HashMap<NodeId, OverlayNode>,
    root_children: Vec<NodeId>,
    next_id: u64,
    revision: u64,
}

impl SceneGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a detached node following `entity`
    pub fn create_node(&mut self, entity: EntityRef) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(
            id,
            OverlayNode {
                id,
                entity,
                attached: false,
                mesh: None,
                texture: None,
                shadow_caster: true,
                shadow_receiver: true,
            },
        );
        self.revision += 1;
        id
    }

    /// Parent a node to the scene root. Returns false for unknown nodes.
    pub fn attach_to_root(&mut self, id: NodeId) -> bool {
        match self.nodes.get_mut(&id) {
            Some(node) if !node.attached => {
                node.attached = true;
                self.root_children.push(id);
                self.revision += 1;
                true
            }
            Some(_) => true,
            None => false,
        }
    }

    /// Remove a node from the scene root without destroying it
    pub fn detach(&mut self, id: NodeId) -> bool {
        match self.nodes.get_mut(&id) {
            Some(node) if node.attached => {
                node.attached = false;
                self.root_children.retain(|child| *child != id);
                self.revision += 1;
                true
            }
            _ => false,
        }
    }

    /// Detach and free a node, dropping its asset handles
    pub fn destroy(&mut self, id: NodeId) -> Option<OverlayNode> {
        self.detach(id);
        let node = self.nodes.remove(&id)?;
        self.revision += 1;
        Some(node)
    }

    pub fn set_mesh(&mut self, id: NodeId, mesh: MeshHandle) -> bool {
        self.mutate(id, |node| node.mesh = Some(mesh))
    }

    pub fn set_texture(&mut self, id: NodeId, texture: TextureHandle) -> bool {
        self.mutate(id, |node| node.texture = Some(texture))
    }

    pub fn set_shadows(&mut self, id: NodeId, caster: bool, receiver: bool) -> bool {
        self.mutate(id, |node| {
            node.shadow_caster = caster;
            node.shadow_receiver = receiver;
        })
    }

    fn mutate(&mut self, id: NodeId, f: impl FnOnce(&mut OverlayNode)) -> bool {
        match self.nodes.get_mut(&id) {
            Some(node) => {
                f(node);
                self.revision += 1;
                true
            }
            None => false,
        }
    }

    pub fn node(&self, id: NodeId) -> Option<&OverlayNode> {
        self.nodes.get(&id)
    }

    /// Nodes parented to the root, in attach order
    pub fn root_children(&self) -> &[NodeId] {
        &self.root_children
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Monotonic mutation counter
    pub fn revision(&self) -> u64 {
        self.revision
    }
}
