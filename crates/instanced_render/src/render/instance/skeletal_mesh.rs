//! Skeletal mesh instance renderer
//!
//! Skinned instances carry a bone palette: a run of 4x4 matrices allocated
//! from the data arena at creation and re-uploaded in place on animation
//! ticks. The GPU instance record addresses the palette by element offset;
//! the shader adds the batch's bind-pose table offset on top.

use std::collections::HashMap;

use crate::assets::{AssetId, MeshSource};
use crate::config::RenderLimits;
use crate::foundation::math::{matrix_to_column_arrays, Mat4, Transform};
use crate::gfx::{CommandList, DrawIndexedIndirectCommand, FrameIndex, GpuDevice};
use crate::render::geometry::{BufferKind, GeometryArena, GeometryHandle};
use crate::render::instance::registry::{RegistryCore, BONE_MATRIX_BYTES};
use crate::render::instance::{InstanceHandle, InstanceRenderer, MeshArchetype, SharedSets, ViewMask};
use crate::render::material::MaterialTable;
use crate::render::{RenderError, RenderResult};

#[derive(Debug, Clone, Copy)]
struct BonePalette {
    allocation: GeometryHandle,
    bone_count: u32,
}

/// Instance registry for skinned geometry
pub struct SkeletalMeshRenderer {
    core: RegistryCore,
    palettes: HashMap<InstanceHandle, BonePalette>,
}

impl SkeletalMeshRenderer {
    /// Create the registry and its per-frame GPU buffers
    pub fn new(device: &mut dyn GpuDevice, limits: &RenderLimits) -> RenderResult<Self> {
        Ok(Self {
            core: RegistryCore::new(device, limits, "skeletal_mesh")?,
            palettes: HashMap::new(),
        })
    }

    /// Re-upload an instance's bone palette
    ///
    /// The palette lives in the data arena, not in per-frame buffers, so the
    /// write takes effect for every frame slot; the instance's dirty bits
    /// are raised so the per-frame records stay in step.
    pub fn set_bone_palette(
        &mut self,
        device: &mut dyn GpuDevice,
        arena: &mut GeometryArena,
        handle: InstanceHandle,
        matrices: &[Mat4],
    ) -> RenderResult<()> {
        let palette = *self
            .palettes
            .get(&handle)
            .unwrap_or_else(|| panic!("bone update for unknown instance {handle:?}"));
        assert_eq!(
            matrices.len(),
            palette.bone_count as usize,
            "palette update size mismatch for {handle:?}"
        );
        let columns: Vec<[[f32; 4]; 4]> = matrices.iter().map(matrix_to_column_arrays).collect();
        arena.update(device, palette.allocation, bytemuck::cast_slice(&columns), 0)?;
        self.core.touch(handle);
        Ok(())
    }

    /// Element offset of an instance's palette in the data arena
    pub fn palette_offset(&self, handle: InstanceHandle) -> u32 {
        self.core.bone_offset(handle)
    }
}

impl InstanceRenderer for SkeletalMeshRenderer {
    fn archetype(&self) -> MeshArchetype {
        MeshArchetype::Skeletal
    }

    fn create_instance(
        &mut self,
        device: &mut dyn GpuDevice,
        arena: &mut GeometryArena,
        source: &dyn MeshSource,
        materials: &MaterialTable,
        asset: AssetId,
        transform: Transform,
        view_mask: ViewMask,
    ) -> RenderResult<InstanceHandle> {
        let mesh = source.mesh(asset).ok_or(RenderError::UnknownAsset(asset))?;
        assert!(
            mesh.is_skeletal(),
            "static asset {asset:?} placed in the skeletal registry"
        );
        let bone_count = mesh.bone_count;

        // Identity palette until the first animation tick.
        let identity: Vec<[[f32; 4]; 4]> = (0..bone_count)
            .map(|_| matrix_to_column_arrays(&Mat4::identity()))
            .collect();
        let allocation = arena.allocate(
            device,
            BufferKind::Data,
            bytemuck::cast_slice(&identity),
            BONE_MATRIX_BYTES,
        )?;
        let bone_offset = allocation.offset() / BONE_MATRIX_BYTES;

        let handle = self.core.create_instance(
            source,
            materials,
            asset,
            transform,
            view_mask,
            bone_offset,
        )?;
        self.palettes.insert(
            handle,
            BonePalette {
                allocation,
                bone_count,
            },
        );
        Ok(handle)
    }

    fn set_transform(&mut self, handle: InstanceHandle, transform: Transform) {
        self.core.set_transform(handle, transform);
    }

    fn set_view_mask(&mut self, handle: InstanceHandle, mask: ViewMask) {
        self.core.set_view_mask(handle, mask);
    }

    fn destroy_instance(&mut self, handle: InstanceHandle) {
        if let Some(palette) = self.palettes.remove(&handle) {
            // The arena never reclaims; the palette bytes leak with it.
            // A reclaiming allocator would free `palette.allocation` here.
            let _ = palette;
        }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{MeshAsset, MeshLibrary, SubMesh};
    use crate::foundation::math::Vec3;
    use crate::gfx::HeadlessDevice;
    use crate::render::material::MaterialTable;

    struct Fixture {
        device: HeadlessDevice,
        arena: GeometryArena,
        library: MeshLibrary,
        materials: MaterialTable,
        renderer: SkeletalMeshRenderer,
    }

    impl Fixture {
        fn new() -> Self {
            let mut device = HeadlessDevice::new(3);
            let limits = RenderLimits::default();
            let arena = GeometryArena::new(&mut device, &limits).unwrap();
            let materials = MaterialTable::new(&mut device, &limits).unwrap();
            let renderer = SkeletalMeshRenderer::new(&mut device, &limits).unwrap();
            Self {
                device,
                arena,
                library: MeshLibrary::new(),
                materials,
                renderer,
            }
        }

        fn skinned_mesh(&mut self, bone_count: u32) -> AssetId {
            let material = self.materials.create();
            self.library.insert(MeshAsset {
                submeshes: vec![SubMesh {
                    index_offset: 0,
                    index_count: 24,
                    vertex_offset: 0,
                    material,
                }],
                vertex_stride: 48,
                index_stride: 4,
                bone_count,
                bone_table: None,
            })
        }
    }

    #[test]
    fn create_allocates_an_identity_palette() {
        let mut fx = Fixture::new();
        let asset = fx.skinned_mesh(4);
        let handle = fx
            .renderer
            .create_instance(
                &mut fx.device,
                &mut fx.arena,
                &fx.library,
                &fx.materials,
                asset,
                Transform::identity(),
                ViewMask::ALL,
            )
            .unwrap();
        // Four matrices of 64 bytes each.
        assert_eq!(fx.arena.head(BufferKind::Data), 256);
        assert_eq!(fx.renderer.palette_offset(handle), 0);

        let bytes = fx.device.buffer_bytes(fx.arena.buffer(BufferKind::Data));
        let first: &[[f32; 4]; 4] = bytemuck::from_bytes(&bytes[..64]);
        assert_eq!(first[0][0], 1.0);
        assert_eq!(first[1][1], 1.0);
    }

    #[test]
    fn palettes_of_distinct_instances_do_not_overlap() {
        let mut fx = Fixture::new();
        let asset = fx.skinned_mesh(2);
        let first = fx
            .renderer
            .create_instance(
                &mut fx.device,
                &mut fx.arena,
                &fx.library,
                &fx.materials,
                asset,
                Transform::identity(),
                ViewMask::ALL,
            )
            .unwrap();
        let second = fx
            .renderer
            .create_instance(
                &mut fx.device,
                &mut fx.arena,
                &fx.library,
                &fx.materials,
                asset,
                Transform::identity(),
                ViewMask::ALL,
            )
            .unwrap();
        assert_eq!(fx.renderer.palette_offset(first), 0);
        assert_eq!(fx.renderer.palette_offset(second), 2);
    }

    #[test]
    fn bone_update_rewrites_only_that_palette() {
        let mut fx = Fixture::new();
        let asset = fx.skinned_mesh(1);
        let first = fx
            .renderer
            .create_instance(
                &mut fx.device,
                &mut fx.arena,
                &fx.library,
                &fx.materials,
                asset,
                Transform::identity(),
                ViewMask::ALL,
            )
            .unwrap();
        let second = fx
            .renderer
            .create_instance(
                &mut fx.device,
                &mut fx.arena,
                &fx.library,
                &fx.materials,
                asset,
                Transform::identity(),
                ViewMask::ALL,
            )
            .unwrap();

        let moved = Mat4::new_translation(&Vec3::new(2.0, 0.0, 0.0));
        fx.renderer
            .set_bone_palette(&mut fx.device, &mut fx.arena, second, &[moved])
            .unwrap();

        let bytes = fx.device.buffer_bytes(fx.arena.buffer(BufferKind::Data));
        let first_palette: &[[f32; 4]; 4] = bytemuck::from_bytes(&bytes[..64]);
        let second_palette: &[[f32; 4]; 4] = bytemuck::from_bytes(&bytes[64..128]);
        assert_eq!(first_palette[3][0], 0.0);
        assert_eq!(second_palette[3][0], 2.0);
        let _ = first;
    }

    #[test]
    #[should_panic(expected = "size mismatch")]
    fn wrong_palette_size_is_fatal() {
        let mut fx = Fixture::new();
        let asset = fx.skinned_mesh(2);
        let handle = fx
            .renderer
            .create_instance(
                &mut fx.device,
                &mut fx.arena,
                &fx.library,
                &fx.materials,
                asset,
                Transform::identity(),
                ViewMask::ALL,
            )
            .unwrap();
        fx.renderer
            .set_bone_palette(&mut fx.device, &mut fx.arena, handle, &[Mat4::identity()])
            .unwrap();
    }

    #[test]
    #[should_panic(expected = "skeletal registry")]
    fn static_asset_in_skeletal_registry_is_fatal() {
        let mut fx = Fixture::new();
        let asset = fx.skinned_mesh(0); // bone_count 0 makes it static
        let _ = fx.renderer.create_instance(
            &mut fx.device,
            &mut fx.arena,
            &fx.library,
            &fx.materials,
            asset,
            Transform::identity(),
            ViewMask::ALL,
        );
    }
}
