//! Overlay asset loading
//!
//! Loads run on the blocking pool and report back through a channel whose
//! receiver lives on the coordinator task. Nothing here touches the scene.

use glam::Vec3;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::config::AssetConfig;
use crate::error::AssetError;

use super::binding::BindingTag;

/// Which overlay asset a load produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetKind {
    Mesh,
    Texture,
}

impl std::fmt::Display for AssetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssetKind::Mesh => write!(f, "mesh"),
            AssetKind::Texture => write!(f, "texture"),
        }
    }
}

/// Triangle mesh drawn over a face region
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MeshAsset {
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub indices: Vec<u32>,
}

/// RGBA8 texture applied to the face mesh
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TextureAsset {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

pub type MeshHandle = Arc<MeshAsset>;
pub type TextureHandle = Arc<TextureAsset>;

/// Turns asset sources into renderable data
pub trait AssetDecoder: Send + Sync {
    fn decode_mesh(&self, path: &Path) -> Result<MeshAsset, AssetError>;
    fn decode_texture(&self, path: &Path) -> Result<TextureAsset, AssetError>;
}

/// Decodes glTF/GLB meshes and PNG/JPEG textures from disk
#[derive(Debug, Default, Clone, Copy)]
pub struct FileAssetDecoder;

impl AssetDecoder for FileAssetDecoder {
    fn decode_mesh(&self, path: &Path) -> Result<MeshAsset, AssetError> {
        if !path.exists() {
            return Err(AssetError::NotFound(path.display().to_string()));
        }

        let (document, buffers, _images) = gltf::import(path)
            .map_err(|e| AssetError::LoadFailed(format!("{}: {}", path.display(), e)))?;

        let primitive = document
            .meshes()
            .flat_map(|mesh| mesh.primitives())
            .next()
            .ok_or_else(|| AssetError::LoadFailed(format!("{}: no mesh primitives", path.display())))?;

        let reader = primitive.reader(|buffer| Some(&buffers[buffer.index()]));

        let positions: Vec<Vec3> = reader
            .read_positions()
            .ok_or_else(|| AssetError::LoadFailed(format!("{}: no positions", path.display())))?
            .map(Vec3::from)
            .collect();

        let normals: Vec<Vec3> = reader
            .read_normals()
            .map(|iter| iter.map(Vec3::from).collect())
            .unwrap_or_default();

        let indices: Vec<u32> = reader
            .read_indices()
            .map(|iter| iter.into_u32().collect())
            .unwrap_or_else(|| (0..positions.len() as u32).collect());

        Ok(MeshAsset {
            positions,
            normals,
            indices,
        })
    }

    fn decode_texture(&self, path: &Path) -> Result<TextureAsset, AssetError> {
        if !path.exists() {
            return Err(AssetError::NotFound(path.display().to_string()));
        }

        let rgba = image::open(path)
            .map_err(|e| AssetError::LoadFailed(format!("{}: {}", path.display(), e)))?
            .to_rgba8();

        Ok(TextureAsset {
            width: rgba.width(),
            height: rgba.height(),
            rgba: rgba.into_raw(),
        })
    }
}

/// Result carried by a completed load
#[derive(Debug, Clone)]
pub enum AssetPayload {
    Mesh(Result<MeshHandle, AssetError>),
    Texture(Result<TextureHandle, AssetError>),
}

impl AssetPayload {
    pub fn kind(&self) -> AssetKind {
        match self {
            AssetPayload::Mesh(_) => AssetKind::Mesh,
            AssetPayload::Texture(_) => AssetKind::Texture,
        }
    }
}

/// A finished load, tagged with the binding that requested it
#[derive(Debug, Clone)]
pub struct AssetCompletion {
    pub tag: BindingTag,
    pub payload: AssetPayload,
}

#[derive(Debug, Default)]
struct AssetCache {
    meshes: HashMap<PathBuf, MeshHandle>,
    textures: HashMap<PathBuf, TextureHandle>,
}

/// Issues asynchronous mesh/texture loads for overlay bindings
#[derive(Clone)]
pub struct AssetLoader {
    mesh_path: PathBuf,
    texture_path: PathBuf,
    decoder: Arc<dyn AssetDecoder>,
    cache: Arc<Mutex<AssetCache>>,
    tx: mpsc::UnboundedSender<AssetCompletion>,
}

impl AssetLoader {
    /// Create a loader and the receiver its completions arrive on
    pub fn new(
        config: &AssetConfig,
        decoder: Arc<dyn AssetDecoder>,
    ) -> (Self, mpsc::UnboundedReceiver<AssetCompletion>) {
        let (tx, rx) = mpsc::unbounded_channel();

        let loader = Self {
            mesh_path: config.mesh_path.clone(),
            texture_path: config.texture_path.clone(),
            decoder,
            cache: Arc::new(Mutex::new(AssetCache::default())),
            tx,
        };

        (loader, rx)
    }

    /// Start loading `kind` for the binding `tag`. Never blocks.
    ///
    /// Must be called from within a tokio runtime.
    pub fn load(&self, kind: AssetKind, tag: BindingTag) {
        let decoder = Arc::clone(&self.decoder);
        let cache = Arc::clone(&self.cache);
        let tx = self.tx.clone();
        let path = match kind {
            AssetKind::Mesh => self.mesh_path.clone(),
            AssetKind::Texture => self.texture_path.clone(),
        };

        tracing::debug!("Loading {} for {} from {}", kind, tag, path.display());

        tokio::task::spawn_blocking(move || {
            let payload = match kind {
                AssetKind::Mesh => AssetPayload::Mesh(load_mesh(&*decoder, &cache, &path)),
                AssetKind::Texture => {
                    AssetPayload::Texture(load_texture(&*decoder, &cache, &path))
                }
            };

            if tx.send(AssetCompletion { tag, payload }).is_err() {
                tracing::debug!("Dropping {} completion for {}: receiver closed", kind, tag);
            }
        });
    }
}

fn load_mesh(
    decoder: &dyn AssetDecoder,
    cache: &Mutex<AssetCache>,
    path: &Path,
) -> Result<MeshHandle, AssetError> {
    if let Some(hit) = lock(cache).meshes.get(path) {
        return Ok(Arc::clone(hit));
    }

    let mesh = Arc::new(decoder.decode_mesh(path)?);
    lock(cache)
        .meshes
        .insert(path.to_path_buf(), Arc::clone(&mesh));
    Ok(mesh)
}

fn load_texture(
    decoder: &dyn AssetDecoder,
    cache: &Mutex<AssetCache>,
    path: &Path,
) -> Result<TextureHandle, AssetError> {
    if let Some(hit) = lock(cache).textures.get(path) {
        return Ok(Arc::clone(hit));
    }

    let texture = Arc::new(decoder.decode_texture(path)?);
    lock(cache)
        .textures
        .insert(path.to_path_buf(), Arc::clone(&texture));
    Ok(texture)
}

fn lock(cache: &Mutex<AssetCache>) -> std::sync::MutexGuard<'_, AssetCache> {
    cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
