//! Face overlays
//!
//! Bindings between tracked faces and their overlay nodes, the per-tick
//! reconciler that maintains them, and the asynchronous asset loader.

pub mod assets;
pub mod binding;
pub mod reconciler;

pub use assets::{
    AssetCompletion, AssetDecoder, AssetKind, AssetLoader, AssetPayload, FileAssetDecoder,
};
pub use binding::{AssetLoadState, BindingTag, OverlayBinding};
pub use reconciler::{Reconciler, ReconcileReport};
