//! Per-tick reconciliation between live faces and overlay bindings

use std::collections::{HashMap, HashSet};

use crate::scene::SceneGraph;
use crate::session::{EntityRef, TrackedEntity};

use super::assets::{AssetCompletion, AssetKind, AssetLoader, AssetPayload};
use super::binding::{AssetLoadState, BindingTag, OverlayBinding};

/// What one reconciliation pass changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub created: usize,
    pub removed: usize,
    pub live: usize,
}

/// Owns the binding table, keyed by face identity
#[derive(Debug)]
pub struct Reconciler {
    bindings: HashMap<EntityRef, OverlayBinding>,
    next_serial: u64,
    detach_missing: bool,
}

impl Reconciler {
    /// `detach_missing` removes overlays in the first tick their face is gone
    pub fn new(detach_missing: bool) -> Self {
        Self {
            bindings: HashMap::new(),
            next_serial: 0,
            detach_missing,
        }
    }

    /// Bring the binding table in line with the live face set.
    ///
    /// New faces get a node parented to the root plus one mesh and one texture
    /// load. Loads only complete through [`Reconciler::apply_completion`], so
    /// every creation in this pass happens before any of its loads land.
    pub fn reconcile(
        &mut self,
        live: &[TrackedEntity],
        scene: &mut SceneGraph,
        loader: &AssetLoader,
    ) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let mut live_set = HashSet::with_capacity(live.len());

        for entity in live.iter().filter(|e| e.is_tracking()) {
            let key = entity.entity;
            if !live_set.insert(key) || self.bindings.contains_key(&key) {
                continue;
            }

            let tag = BindingTag::new(key, self.next_serial);
            self.next_serial += 1;

            let node = scene.create_node(key);
            scene.attach_to_root(node);
            self.bindings.insert(key, OverlayBinding::new(tag, node));

            loader.load(AssetKind::Mesh, tag);
            loader.load(AssetKind::Texture, tag);

            tracing::info!("Overlay attached to {}", tag);
            report.created += 1;
        }

        if self.detach_missing {
            let gone: Vec<EntityRef> = self
                .bindings
                .keys()
                .filter(|key| !live_set.contains(key))
                .copied()
                .collect();

            for key in gone {
                if let Some(binding) = self.bindings.remove(&key) {
                    scene.destroy(binding.node);
                    tracing::info!("Overlay removed from {}", binding.tag);
                    report.removed += 1;
                }
            }
        }

        report.live = live_set.len();
        if report.created > 0 || report.removed > 0 {
            tracing::debug!(
                "Reconciled: {} live, {} created, {} removed, {} bound",
                report.live,
                report.created,
                report.removed,
                self.bindings.len()
            );
        }

        report
    }

    /// Store a finished load into its binding.
    ///
    /// Completions whose binding is gone (or was replaced) are dropped without
    /// touching the scene. Returns whether the completion was applied.
    pub fn apply_completion(
        &mut self,
        completion: AssetCompletion,
        scene: &mut SceneGraph,
    ) -> bool {
        let AssetCompletion { tag, payload } = completion;

        let binding = match self.bindings.get_mut(&tag.entity) {
            Some(binding) if binding.tag == tag => binding,
            _ => {
                tracing::debug!(
                    "Discarding {} completion for stale {}",
                    payload.kind(),
                    tag
                );
                return false;
            }
        };

        match payload {
            AssetPayload::Mesh(Ok(mesh)) => {
                scene.set_mesh(binding.node, mesh.clone());
                scene.set_shadows(binding.node, false, false);
                binding.mesh = AssetLoadState::Loaded(mesh);
                tracing::debug!("Mesh loaded for {}", tag);
            }
            AssetPayload::Texture(Ok(texture)) => {
                scene.set_texture(binding.node, texture.clone());
                binding.texture = AssetLoadState::Loaded(texture);
                tracing::debug!("Texture loaded for {}", tag);
            }
            AssetPayload::Mesh(Err(e)) => {
                tracing::warn!("Mesh load failed for {}: {}", tag, e);
                binding.mesh = AssetLoadState::Failed(e.to_string());
            }
            AssetPayload::Texture(Err(e)) => {
                tracing::warn!("Texture load failed for {}: {}", tag, e);
                binding.texture = AssetLoadState::Failed(e.to_string());
            }
        }

        true
    }

    /// Destroy every binding and its node. Returns how many were freed.
    pub fn clear(&mut self, scene: &mut SceneGraph) -> usize {
        let count = self.bindings.len();
        for (_, binding) in self.bindings.drain() {
            scene.destroy(binding.node);
        }
        if count > 0 {
            tracing::info!("Released {} overlay bindings", count);
        }
        count
    }

    pub fn binding(&self, entity: &EntityRef) -> Option<&OverlayBinding> {
        self.bindings.get(entity)
    }

    pub fn bindings(&self) -> impl Iterator<Item = &OverlayBinding> {
        self.bindings.values()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AssetConfig;
    use crate::error::AssetError;
    use crate::overlay::assets::{AssetDecoder, MeshAsset, TextureAsset};
    use std::path::Path;
    use std::sync::Arc;
    use tokio::sync::mpsc::UnboundedReceiver;

    struct StaticDecoder {
        texture_fails: bool,
    }

    impl AssetDecoder for StaticDecoder {
        fn decode_mesh(&self, _path: &Path) -> Result<MeshAsset, AssetError> {
            Ok(MeshAsset::default())
        }

        fn decode_texture(&self, path: &Path) -> Result<TextureAsset, AssetError> {
            if self.texture_fails {
                Err(AssetError::LoadFailed(path.display().to_string()))
            } else {
                Ok(TextureAsset::default())
            }
        }
    }

    fn loader(texture_fails: bool) -> (AssetLoader, UnboundedReceiver<AssetCompletion>) {
        AssetLoader::new(
            &AssetConfig::default(),
            Arc::new(StaticDecoder { texture_fails }),
        )
    }

    fn faces(ids: &[u64]) -> Vec<TrackedEntity> {
        ids.iter().map(|&id| TrackedEntity::new(id, 0)).collect()
    }

    async fn drain(
        rx: &mut UnboundedReceiver<AssetCompletion>,
        count: usize,
        reconciler: &mut Reconciler,
        scene: &mut SceneGraph,
    ) {
        for _ in 0..count {
            let completion = rx.recv().await.unwrap();
            reconciler.apply_completion(completion, scene);
        }
    }

    #[tokio::test]
    async fn test_new_face_gets_binding_and_shadowless_mesh() {
        let (loader, mut rx) = loader(false);
        let mut scene = SceneGraph::new();
        let mut reconciler = Reconciler::new(true);

        let report = reconciler.reconcile(&faces(&[1]), &mut scene, &loader);
        assert_eq!(report.created, 1);
        assert_eq!(reconciler.len(), 1);

        let e1 = EntityRef::new(1, 0);
        let node = reconciler.binding(&e1).unwrap().node;
        assert!(scene.node(node).unwrap().is_attached());
        assert!(scene.node(node).unwrap().is_shadow_caster());
        assert!(reconciler.binding(&e1).unwrap().mesh.is_pending());

        drain(&mut rx, 2, &mut reconciler, &mut scene).await;

        let binding = reconciler.binding(&e1).unwrap();
        assert!(binding.is_complete());
        let node = scene.node(binding.node).unwrap();
        assert!(node.mesh().is_some());
        assert!(node.texture().is_some());
        assert!(!node.is_shadow_caster());
        assert!(!node.is_shadow_receiver());
    }

    #[tokio::test]
    async fn test_binding_count_bounded_by_distinct_faces() {
        let (loader, _rx) = loader(false);
        let mut scene = SceneGraph::new();
        let mut reconciler = Reconciler::new(true);

        let ticks: Vec<Vec<TrackedEntity>> = vec![
            faces(&[1]),
            faces(&[1, 1, 2]),
            faces(&[2]),
            faces(&[]),
            faces(&[3, 1]),
        ];

        let mut seen = HashSet::new();
        for live in &ticks {
            seen.extend(live.iter().map(|e| e.entity));
            reconciler.reconcile(live, &mut scene, &loader);
            assert!(reconciler.len() <= seen.len());
            assert_eq!(reconciler.len(), scene.len());
        }

        assert_eq!(reconciler.len(), 2);
        assert_eq!(scene.root_children().len(), 2);
    }

    #[tokio::test]
    async fn test_existing_face_is_a_no_op() {
        let (loader, _rx) = loader(false);
        let mut scene = SceneGraph::new();
        let mut reconciler = Reconciler::new(true);

        reconciler.reconcile(&faces(&[1]), &mut scene, &loader);
        let revision = scene.revision();

        let report = reconciler.reconcile(&faces(&[1]), &mut scene, &loader);
        assert_eq!(report, ReconcileReport { created: 0, removed: 0, live: 1 });
        assert_eq!(scene.revision(), revision);
    }

    #[tokio::test]
    async fn test_missing_face_detached_and_stale_completion_ignored() {
        let (loader, mut rx) = loader(false);
        let mut scene = SceneGraph::new();
        let mut reconciler = Reconciler::new(true);

        reconciler.reconcile(&faces(&[1]), &mut scene, &loader);
        let old_tag = reconciler.binding(&EntityRef::new(1, 0)).unwrap().tag;

        let report = reconciler.reconcile(&faces(&[]), &mut scene, &loader);
        assert_eq!(report.removed, 1);
        assert!(reconciler.is_empty());
        assert!(scene.is_empty());

        // Loads issued for the removed binding land afterwards
        let revision = scene.revision();
        for _ in 0..2 {
            let completion = rx.recv().await.unwrap();
            assert_eq!(completion.tag, old_tag);
            assert!(!reconciler.apply_completion(completion, &mut scene));
        }
        assert_eq!(scene.revision(), revision);

        // Reappearance is a new binding; an old-serial completion still misses
        reconciler.reconcile(&faces(&[1]), &mut scene, &loader);
        let new_tag = reconciler.binding(&EntityRef::new(1, 0)).unwrap().tag;
        assert_ne!(new_tag.serial, old_tag.serial);

        let revision = scene.revision();
        let stale = AssetCompletion {
            tag: old_tag,
            payload: AssetPayload::Mesh(Ok(Arc::new(MeshAsset::default()))),
        };
        assert!(!reconciler.apply_completion(stale, &mut scene));
        assert_eq!(scene.revision(), revision);
        assert!(reconciler.binding(&EntityRef::new(1, 0)).unwrap().mesh.is_pending());
    }

    #[tokio::test]
    async fn test_retain_policy_keeps_bindings() {
        let (loader, _rx) = loader(false);
        let mut scene = SceneGraph::new();
        let mut reconciler = Reconciler::new(false);

        reconciler.reconcile(&faces(&[1, 2]), &mut scene, &loader);
        let report = reconciler.reconcile(&faces(&[]), &mut scene, &loader);

        assert_eq!(report.removed, 0);
        assert_eq!(reconciler.len(), 2);
        assert_eq!(scene.root_children().len(), 2);
    }

    #[tokio::test]
    async fn test_texture_failure_keeps_mesh_and_binding() {
        let (loader, mut rx) = loader(true);
        let mut scene = SceneGraph::new();
        let mut reconciler = Reconciler::new(true);

        reconciler.reconcile(&faces(&[9]), &mut scene, &loader);
        drain(&mut rx, 2, &mut reconciler, &mut scene).await;

        let binding = reconciler.binding(&EntityRef::new(9, 0)).unwrap();
        assert!(binding.mesh.is_loaded());
        assert!(binding.texture.is_failed());
        assert!(!binding.is_complete());

        let node = scene.node(binding.node).unwrap();
        assert!(node.is_attached());
        assert!(node.mesh().is_some());
        assert!(node.texture().is_none());
    }

    #[tokio::test]
    async fn test_clear_frees_every_node() {
        let (loader, _rx) = loader(false);
        let mut scene = SceneGraph::new();
        let mut reconciler = Reconciler::new(true);

        reconciler.reconcile(&faces(&[1, 2, 3]), &mut scene, &loader);
        assert_eq!(reconciler.clear(&mut scene), 3);
        assert!(reconciler.is_empty());
        assert!(scene.is_empty());
        assert!(scene.root_children().is_empty());
    }
}
