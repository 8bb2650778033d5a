//! Graphics device abstraction
//!
//! This module defines the traits a graphics backend must implement for the
//! renderer to run against it. The renderer itself never touches a concrete
//! graphics API; it records uploads, copies, and indirect draws through
//! these traits and trusts the backend's frame-acquire contract for
//! cross-frame synchronization.

pub mod headless;

pub use headless::HeadlessDevice;

use bitflags::bitflags;

/// Result type for device operations
pub type GfxResult<T> = Result<T, GfxError>;

/// Errors surfaced by a graphics backend
#[derive(Debug, thiserror::Error)]
pub enum GfxError {
    /// Buffer allocation failed
    #[error("out of device memory allocating {size} bytes for '{label}'")]
    OutOfMemory {
        /// Requested allocation size in bytes
        size: u64,
        /// Debug label of the failed allocation
        label: String,
    },

    /// A handle did not resolve to a live resource
    #[error("invalid resource handle: {0}")]
    InvalidHandle(String),

    /// The device became unusable
    #[error("device lost: {0}")]
    DeviceLost(String),
}

/// Handle to a device buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub u64);

/// Handle to a device texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub u64);

/// Handle to a compiled graphics pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineId(pub u64);

/// Handle to an allocated descriptor set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorSetId(pub u64);

/// Index of the frame-in-flight ring slot acquired for the current frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameIndex(pub usize);

impl FrameIndex {
    /// Ring slot as a plain index
    pub fn get(self) -> usize {
        self.0
    }
}

bitflags! {
    /// Buffer usage flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BufferUsage: u32 {
        /// Bound as a vertex buffer
        const VERTEX = 1 << 0;
        /// Bound as an index buffer
        const INDEX = 1 << 1;
        /// Read as a shader storage buffer
        const STORAGE = 1 << 2;
        /// Bound as a uniform buffer
        const UNIFORM = 1 << 3;
        /// Source of copy commands (CPU staging)
        const TRANSFER_SRC = 1 << 4;
        /// Destination of copy commands
        const TRANSFER_DST = 1 << 5;
    }
}

/// Creation parameters for a device buffer
#[derive(Debug, Clone)]
pub struct BufferDesc {
    /// Size in bytes
    pub size: u64,
    /// Usage flags
    pub usage: BufferUsage,
    /// Whether the CPU may map and write the buffer directly
    pub host_visible: bool,
    /// Debug label
    pub label: String,
}

impl BufferDesc {
    /// Describe a GPU-only buffer
    pub fn device_local(label: impl Into<String>, size: u64, usage: BufferUsage) -> Self {
        Self {
            size,
            usage: usage | BufferUsage::TRANSFER_DST,
            host_visible: false,
            label: label.into(),
        }
    }

    /// Describe a CPU-writable staging buffer
    pub fn staging(label: impl Into<String>, size: u64) -> Self {
        Self {
            size,
            usage: BufferUsage::TRANSFER_SRC,
            host_visible: true,
            label: label.into(),
        }
    }
}

/// GPU-consumable indexed indirect draw arguments
///
/// Layout matches the indirect draw argument structure consumed by the
/// graphics APIs this library targets.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DrawIndexedIndirectCommand {
    /// Number of indices to draw
    pub index_count: u32,
    /// Number of instances to draw
    pub instance_count: u32,
    /// First index within the bound index buffer
    pub first_index: u32,
    /// Value added to each index before vertex lookup
    pub vertex_offset: i32,
    /// First instance-data record for this draw
    pub first_instance: u32,
}

/// Main graphics device trait
///
/// The device owns all GPU resources and the frame ring. `begin_frame`
/// returns the ring slot whose per-frame resources are guaranteed (by the
/// backend's fencing) to no longer be read by the GPU; the renderer performs
/// no synchronization of its own beyond that contract.
pub trait GpuDevice {
    /// Create a buffer
    fn create_buffer(&mut self, desc: &BufferDesc) -> GfxResult<BufferId>;

    /// Destroy a buffer
    fn destroy_buffer(&mut self, buffer: BufferId) -> GfxResult<()>;

    /// Write bytes into a host-visible buffer
    fn upload(&mut self, buffer: BufferId, offset: u64, data: &[u8]) -> GfxResult<()>;

    /// Record a buffer-to-buffer copy
    fn copy_buffer(
        &mut self,
        src: BufferId,
        src_offset: u64,
        dst: BufferId,
        dst_offset: u64,
        size: u64,
    ) -> GfxResult<()>;

    /// Create a graphics pipeline
    fn create_pipeline(&mut self, label: &str) -> GfxResult<PipelineId>;

    /// Allocate a descriptor set
    fn allocate_descriptor_set(&mut self, label: &str) -> GfxResult<DescriptorSetId>;

    /// Free a descriptor set
    fn free_descriptor_set(&mut self, set: DescriptorSetId) -> GfxResult<()>;

    /// Point a descriptor set binding at a buffer
    fn bind_buffer_to_set(
        &mut self,
        set: DescriptorSetId,
        binding: u32,
        buffer: BufferId,
    ) -> GfxResult<()>;

    /// Write one slot of the bindless texture descriptor array
    ///
    /// `None` writes a null descriptor, releasing the slot's texture.
    fn write_texture_slot(&mut self, slot: u32, texture: Option<TextureId>) -> GfxResult<()>;

    /// Acquire the next frame ring slot
    fn begin_frame(&mut self) -> GfxResult<FrameIndex>;

    /// Submit the current frame
    fn end_frame(&mut self) -> GfxResult<()>;

    /// Block until the GPU has finished all in-flight work
    fn wait_idle(&mut self) -> GfxResult<()>;

    /// Access the command list for the current frame
    fn command_list(&mut self) -> &mut dyn CommandList;

    /// Downcast to the concrete backend type
    fn as_any(&self) -> &dyn std::any::Any;

    /// Downcast to the concrete backend type, mutably
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any;
}

/// Command recording interface
///
/// One draw call is issued per previously generated indirect command, in
/// emission order.
pub trait CommandList {
    /// Begin a render pass
    fn begin_render_pass(&mut self, label: &str);

    /// End the current render pass
    fn end_render_pass(&mut self);

    /// Bind a graphics pipeline
    fn bind_pipeline(&mut self, pipeline: PipelineId);

    /// Bind a descriptor set at the given set index
    fn bind_descriptor_set(&mut self, index: u32, set: DescriptorSetId);

    /// Bind a vertex buffer
    fn bind_vertex_buffer(&mut self, buffer: BufferId, offset: u64);

    /// Bind an index buffer
    fn bind_index_buffer(&mut self, buffer: BufferId, offset: u64);

    /// Issue one indexed draw from indirect-style arguments
    fn draw_indexed(&mut self, cmd: &DrawIndexedIndirectCommand);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indirect_command_is_twenty_bytes() {
        // Must match the indirect argument layout GPUs consume.
        assert_eq!(std::mem::size_of::<DrawIndexedIndirectCommand>(), 20);
    }

    #[test]
    fn staging_desc_is_host_visible_transfer_src() {
        let desc = BufferDesc::staging("stage", 128);
        assert!(desc.host_visible);
        assert!(desc.usage.contains(BufferUsage::TRANSFER_SRC));
    }

    #[test]
    fn device_local_desc_always_transfer_dst() {
        let desc = BufferDesc::device_local("geom", 256, BufferUsage::VERTEX);
        assert!(!desc.host_visible);
        assert!(desc.usage.contains(BufferUsage::TRANSFER_DST));
        assert!(desc.usage.contains(BufferUsage::VERTEX));
    }
}
