//! Static mesh instance renderer

use crate::assets::{AssetId, MeshSource};
use crate::config::RenderLimits;
use crate::foundation::math::Transform;
use crate::gfx::{CommandList, DrawIndexedIndirectCommand, FrameIndex, GpuDevice};
use crate::render::geometry::GeometryArena;
use crate::render::instance::registry::RegistryCore;
use crate::render::instance::{InstanceHandle, InstanceRenderer, MeshArchetype, SharedSets, ViewMask};
use crate::render::material::MaterialTable;
use crate::render::{RenderError, RenderResult};

/// Instance registry for rigid geometry
pub struct StaticMeshRenderer {
    core: RegistryCore,
}

impl StaticMeshRenderer {
    /// Create the registry and its per-frame GPU buffers
    pub fn new(device: &mut dyn GpuDevice, limits: &RenderLimits) -> RenderResult<Self> {
        Ok(Self {
            core: RegistryCore::new(device, limits, "static_mesh")?,
        })
    }
}

impl InstanceRenderer for StaticMeshRenderer {
    fn archetype(&self) -> MeshArchetype {
        MeshArchetype::Static
    }

    fn create_instance(
        &mut self,
        _device: &mut dyn GpuDevice,
        _arena: &mut GeometryArena,
        source: &dyn MeshSource,
        materials: &MaterialTable,
        asset: AssetId,
        transform: Transform,
        view_mask: ViewMask,
    ) -> RenderResult<InstanceHandle> {
        let mesh = source.mesh(asset).ok_or(RenderError::UnknownAsset(asset))?;
        debug_assert!(
            !mesh.is_skeletal(),
            "skeletal asset {asset:?} placed in the static registry"
        );
        self.core
            .create_instance(source, materials, asset, transform, view_mask, 0)
    }

    fn set_transform(&mut self, handle: InstanceHandle, transform: Transform) {
        self.core.set_transform(handle, transform);
    }

    fn set_view_mask(&mut self, handle: InstanceHandle, mask: ViewMask) {
        self.core.set_view_mask(handle, mask);
    }

    fn destroy_instance(&mut self, handle: InstanceHandle) {
        self.core.destroy_instance(handle);
    }

    fn prepare(&mut self, device: &mut dyn GpuDevice, frame: FrameIndex) -> RenderResult<()> {
        self.core.prepare(device, frame)?;
        Ok(())
    }

    fn render(
        &self,
        cmd: &mut dyn CommandList,
        arena: &GeometryArena,
        sets: SharedSets,
        frame: FrameIndex,
    ) {
        self.core.render(cmd, arena, sets, frame);
    }

    fn instance_count(&self) -> usize {
        self.core.instance_count()
    }

    fn draw_commands(&self, frame: FrameIndex) -> &[DrawIndexedIndirectCommand] {
        self.core.draw_commands(frame)
    }
}
