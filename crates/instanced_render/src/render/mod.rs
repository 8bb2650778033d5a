//! Rendering pipeline
//!
//! The heart of the library: the geometry arena, the material and bindless
//! tables, the per-archetype instance registries, views, and the renderer
//! that orchestrates them once per frame.

pub mod bindless;
pub mod debug_draw;
pub mod frame;
pub mod geometry;
pub mod instance;
pub mod material;
pub mod renderer;
pub mod view;

pub use bindless::{BindlessTextureTable, TextureSlot};
pub use debug_draw::{DebugDrawQueue, DebugLine};
pub use frame::{DirtyBits, FrameRing, MAX_FRAMES_IN_FLIGHT};
pub use geometry::{BufferKind, GeometryArena, GeometryHandle};
pub use instance::{InstanceHandle, InstanceRenderer, MeshArchetype, ViewMask};
pub use material::{MaterialHandle, MaterialRecord, MaterialTable};
pub use renderer::{Renderer, RendererStats};
pub use view::{View, ViewKey};

use crate::assets::AssetId;
use crate::gfx::GfxError;

/// Result type for renderer operations
pub type RenderResult<T> = Result<T, RenderError>;

/// Errors surfaced by the rendering pipeline
///
/// Capacity exhaustion and invariant violations are programmer errors and
/// assert rather than appear here; only failures originating outside this
/// library (the device, the asset source) are recoverable.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// A device operation failed
    #[error("graphics device error: {0}")]
    Gfx(#[from] GfxError),

    /// The mesh source has no mesh for the asset
    #[error("unknown asset {0:?}")]
    UnknownAsset(AssetId),

    /// The view key does not name a live view
    #[error("unknown view")]
    UnknownView,

    /// The configured limits are inconsistent
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}
