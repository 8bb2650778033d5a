//! Instance registries
//!
//! One registry per mesh archetype owns the ordered instance sequence, the
//! per-asset batch metadata, and the per-frame indirect command stream. The
//! ordering invariant that makes instanced indirect draws possible: all
//! instances referencing the same asset occupy a contiguous range of the
//! sequence, at all times.

pub mod registry;
pub mod skeletal_mesh;
pub mod static_mesh;

pub use skeletal_mesh::SkeletalMeshRenderer;
pub use static_mesh::StaticMeshRenderer;

use bitflags::bitflags;

use crate::assets::{AssetId, MeshSource};
use crate::foundation::math::Transform;
use crate::gfx::{CommandList, DescriptorSetId, DrawIndexedIndirectCommand, FrameIndex, GpuDevice};
use crate::render::geometry::GeometryArena;
use crate::render::material::MaterialTable;
use crate::render::RenderResult;

/// Handle to a live instance
///
/// Generated from a monotonic per-registry counter, so handles never
/// collide and carry no positional information; position lives in the
/// registry's index map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceHandle(pub u64);

/// The closed set of mesh archetypes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeshArchetype {
    /// Rigid geometry, one transform per instance
    Static,
    /// Skinned geometry with a bone palette per instance
    Skeletal,
}

bitflags! {
    /// Per-instance view visibility bits
    ///
    /// Carried into the GPU instance record; shaders test the bit of the
    /// view being rendered.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ViewMask: u32 {
        /// Visible in every view
        const ALL = u32::MAX;
    }
}

impl ViewMask {
    /// Mask with only the given view layer set
    pub fn layer(index: u32) -> Self {
        debug_assert!(index < 32, "view layer {index} out of range");
        Self::from_bits_retain(1 << index)
    }
}

impl Default for ViewMask {
    fn default() -> Self {
        Self::ALL
    }
}

/// Contiguous run of batch-table rows belonging to one asset
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct AssetBatchData {
    /// First row in the global batch table
    pub batch_offset: u32,
    /// Number of rows (sub-meshes)
    pub batch_count: u32,
}

/// One row of the global batch table, immutable once the asset is loaded
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct BatchData {
    /// Byte offset of the batch's indices in the index arena
    pub index_offset: u32,
    /// Number of indices
    pub index_count: u32,
    /// Byte offset of the batch's vertices in the vertex arena
    pub vertex_offset: u32,
    /// Dense material table index
    pub material_index: u32,
    /// Element offset of the bind-pose bone table in the data arena;
    /// zero for static meshes
    pub bone_table_offset: u32,
    /// Pad to 32 bytes
    pub _padding: [u32; 3],
}

/// Per-(instance, batch) GPU record filled by `prepare`
///
/// Instances are duplicated once per batch of their asset so every indirect
/// draw reads its own contiguous range of these records.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct InstanceData {
    /// Model matrix, column major
    pub model: [[f32; 4]; 4],
    /// Dense material table index for the batch
    pub material_index: u32,
    /// View visibility bits
    pub view_mask: u32,
    /// Element offset of the instance's bone palette in the data arena
    pub bone_offset: u32,
    /// Pad to 80 bytes
    pub _padding: u32,
}

/// Descriptor sets shared by every registry during a render pass
#[derive(Debug, Clone, Copy)]
pub struct SharedSets {
    /// Set 0: the view's uniform buffer
    pub view: DescriptorSetId,
    /// Set 1: the material table
    pub materials: DescriptorSetId,
    /// Set 2: the bindless texture array
    pub bindless: DescriptorSetId,
}

/// Per-archetype instance renderer
///
/// Implemented once per [`MeshArchetype`]; the renderer selects the
/// implementation at registration time and drives it through this trait.
pub trait InstanceRenderer {
    /// The archetype this registry renders
    fn archetype(&self) -> MeshArchetype;

    /// Place a new instance of an asset
    ///
    /// The first instantiation of an asset registers its batch metadata;
    /// every instantiation inserts into the ordered sequence at the point
    /// that keeps same-asset instances contiguous, and marks every frame
    /// slot dirty.
    fn create_instance(
        &mut self,
        device: &mut dyn GpuDevice,
        arena: &mut GeometryArena,
        source: &dyn MeshSource,
        materials: &MaterialTable,
        asset: AssetId,
        transform: Transform,
        view_mask: ViewMask,
    ) -> RenderResult<InstanceHandle>;

    /// Overwrite an instance's transform
    fn set_transform(&mut self, handle: InstanceHandle, transform: Transform);

    /// Overwrite an instance's view visibility bits
    fn set_view_mask(&mut self, handle: InstanceHandle, mask: ViewMask);

    /// Remove an instance from the sequence
    fn destroy_instance(&mut self, handle: InstanceHandle);

    /// Rebuild the frame's command stream and GPU records, if dirty
    fn prepare(&mut self, device: &mut dyn GpuDevice, frame: FrameIndex) -> RenderResult<()>;

    /// Record one draw per generated indirect command
    fn render(
        &self,
        cmd: &mut dyn CommandList,
        arena: &GeometryArena,
        sets: SharedSets,
        frame: FrameIndex,
    );

    /// Number of live instances
    fn instance_count(&self) -> usize;

    /// The command stream generated for a frame slot
    fn draw_commands(&self, frame: FrameIndex) -> &[DrawIndexedIndirectCommand];
}
