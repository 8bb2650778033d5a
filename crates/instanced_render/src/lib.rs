//! # Instanced Render
//!
//! A frame-pipelined instanced rendering library built around arena-allocated
//! GPU geometry and indirect draw generation.
//!
//! ## Features
//!
//! - **Indirect Draw Batching**: One draw call per (asset, batch) pair, no
//!   matter how many instances are placed
//! - **Arena Geometry**: Bump-allocated vertex/index/data buffers with tagged
//!   offset handles
//! - **Frame Pipelining**: Per-frame-in-flight staging buffers and dirty
//!   tracking, correct with up to three frames concurrently on the GPU
//! - **Bindless Materials**: Dense material table plus a slot-allocated
//!   bindless texture table
//! - **Backend Agnostic**: The graphics device is a trait; a headless
//!   recording device ships for tests and tooling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use instanced_render::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let limits = RenderLimits::default();
//!     let device = HeadlessDevice::new(limits.frames_in_flight);
//!     let mut renderer = Renderer::new(Box::new(device), limits)?;
//!
//!     let mut library = MeshLibrary::new();
//!     // ... register meshes, create materials and instances ...
//!
//!     renderer.render_frame()?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod foundation;
pub mod config;
pub mod gfx;
pub mod assets;
pub mod render;

/// Common imports for library users
pub mod prelude {
    pub use crate::{
        assets::{AssetId, MeshAsset, MeshLibrary, MeshSource, SubMesh},
        config::{Config, RenderLimits},
        foundation::math::{Mat4, Transform, Vec3},
        gfx::{DrawIndexedIndirectCommand, FrameIndex, GpuDevice, HeadlessDevice},
        render::{
            BufferKind, GeometryHandle, InstanceHandle, MaterialHandle, MeshArchetype,
            RenderError, Renderer, ViewKey, ViewMask,
        },
    };
}
