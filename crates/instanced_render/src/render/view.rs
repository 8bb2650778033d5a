//! Views
//!
//! A view is a camera: projection and view matrices plus a per-frame ring
//! of uniform buffers. Updating a view raises every frame slot's dirty bit
//! so the new matrices reach each ring slot the next time it is acquired,
//! regardless of which slot is active at update time.

use slotmap::new_key_type;

use crate::foundation::math::{matrix_to_column_arrays, Mat4, Vec3};
use crate::gfx::{BufferDesc, BufferId, BufferUsage, DescriptorSetId, FrameIndex, GpuDevice};
use crate::render::frame::{DirtyBits, FrameRing};
use crate::render::instance::ViewMask;
use crate::render::RenderResult;

new_key_type! {
    /// Renderer-owned key naming a registered view
    pub struct ViewKey;
}

/// Per-frame camera uniform block
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ViewUniforms {
    /// View matrix, column major
    pub view: [[f32; 4]; 4],
    /// Projection matrix, column major
    pub projection: [[f32; 4]; 4],
    /// Projection * view, column major
    pub view_projection: [[f32; 4]; 4],
    /// Camera world position, w unused
    pub position: [f32; 4],
}

impl Default for ViewUniforms {
    fn default() -> Self {
        let identity = matrix_to_column_arrays(&Mat4::identity());
        Self {
            view: identity,
            projection: identity,
            view_projection: identity,
            position: [0.0; 4],
        }
    }
}

struct ViewFrame {
    buffer: BufferId,
    set: DescriptorSetId,
}

/// A camera with its frame-ring uniform buffers
pub struct View {
    uniforms: ViewUniforms,
    mask: ViewMask,
    frames: FrameRing<ViewFrame>,
    dirty: DirtyBits,
}

impl View {
    /// Create the view's uniform ring and descriptor sets
    pub fn new(device: &mut dyn GpuDevice, label: &str, mask: ViewMask) -> RenderResult<Self> {
        let bytes = std::mem::size_of::<ViewUniforms>() as u64;
        let frames = FrameRing::try_new_with(|i| -> RenderResult<ViewFrame> {
            let buffer = device.create_buffer(&BufferDesc {
                size: bytes,
                usage: BufferUsage::UNIFORM,
                host_visible: true,
                label: format!("{label}.uniforms[{i}]"),
            })?;
            let set = device.allocate_descriptor_set(&format!("{label}.set[{i}]"))?;
            device.bind_buffer_to_set(set, 0, buffer)?;
            Ok(ViewFrame { buffer, set })
        })?;
        Ok(Self {
            uniforms: ViewUniforms::default(),
            mask,
            frames,
            // Fresh matrices must reach every ring slot.
            dirty: DirtyBits::all_set(),
        })
    }

    /// Store new camera matrices and dirty every frame slot
    pub fn update(&mut self, view: &Mat4, projection: &Mat4, position: Vec3) {
        self.uniforms = ViewUniforms {
            view: matrix_to_column_arrays(view),
            projection: matrix_to_column_arrays(projection),
            view_projection: matrix_to_column_arrays(&(projection * view)),
            position: [position.x, position.y, position.z, 0.0],
        };
        self.dirty.raise_all();
    }

    /// Upload the uniforms into the frame slot's buffer, if dirty
    pub fn flush(&mut self, device: &mut dyn GpuDevice, frame: FrameIndex) -> RenderResult<()> {
        if !self.dirty.check(frame) {
            return Ok(());
        }
        let frame_res = self.frames.get(frame);
        device.upload(frame_res.buffer, 0, bytemuck::bytes_of(&self.uniforms))?;
        self.dirty.clear(frame);
        Ok(())
    }

    /// The descriptor set to bind for a frame slot
    pub fn set(&self, frame: FrameIndex) -> DescriptorSetId {
        self.frames.get(frame).set
    }

    /// The view's visibility mask
    pub fn mask(&self) -> ViewMask {
        self.mask
    }

    /// Whether the frame slot still needs an upload
    pub fn is_dirty(&self, frame: FrameIndex) -> bool {
        self.dirty.check(frame)
    }

    /// Release the view's GPU resources
    ///
    /// The caller must have synchronized with the device first; every ring
    /// slot's buffer goes away at once.
    pub fn release(self, device: &mut dyn GpuDevice) -> RenderResult<()> {
        for frame_res in self.frames.iter() {
            device.destroy_buffer(frame_res.buffer)?;
            device.free_descriptor_set(frame_res.set)?;
        }
        Ok(())
    }
}
