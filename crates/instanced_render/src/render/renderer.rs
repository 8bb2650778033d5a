//! Renderer orchestration
//!
//! The renderer owns the device, the geometry arena, the material and
//! bindless tables, one instance registry per archetype, and the registered
//! views. `render_frame` runs the per-frame sequence: flush queued bindless
//! writes, flush the material table, then for every view run each
//! registry's `prepare` and `render`, and finally drain the debug queue.

use slotmap::SlotMap;

use crate::assets::{AssetId, MeshSource};
use crate::config::RenderLimits;
use crate::foundation::math::{Mat4, Transform, Vec3};
use crate::gfx::{DescriptorSetId, FrameIndex, GpuDevice, TextureId};
use crate::render::bindless::{BindlessTextureTable, TextureSlot};
use crate::render::debug_draw::DebugDrawQueue;
use crate::render::frame::FrameRing;
use crate::render::geometry::{BufferKind, GeometryArena, GeometryHandle};
use crate::render::instance::{
    InstanceHandle, InstanceRenderer, MeshArchetype, SharedSets, SkeletalMeshRenderer,
    StaticMeshRenderer, ViewMask,
};
use crate::render::material::{MaterialHandle, MaterialTable};
use crate::render::view::{View, ViewKey};
use crate::render::{RenderError, RenderResult};

/// Counters published after each rendered frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RendererStats {
    /// Live instances across both registries
    pub live_instances: usize,
    /// Indirect draws issued last frame, per view
    pub draw_calls: usize,
    /// Views rendered last frame
    pub views: usize,
    /// Live (resolvable) materials
    pub live_materials: usize,
}

/// Top-level renderer
pub struct Renderer {
    device: Box<dyn GpuDevice>,
    arena: GeometryArena,
    materials: MaterialTable,
    material_sets: FrameRing<DescriptorSetId>,
    bindless: BindlessTextureTable,
    bindless_set: DescriptorSetId,
    statics: StaticMeshRenderer,
    skeletals: SkeletalMeshRenderer,
    views: SlotMap<ViewKey, View>,
    debug: DebugDrawQueue,
    stats: RendererStats,
}

impl Renderer {
    /// Build the renderer and every fixed-capacity GPU resource
    pub fn new(mut device: Box<dyn GpuDevice>, limits: RenderLimits) -> RenderResult<Self> {
        limits.validate()?;
        let arena = GeometryArena::new(&mut *device, &limits)?;
        let materials = MaterialTable::new(&mut *device, &limits)?;
        let material_sets = FrameRing::try_new_with(|i| -> RenderResult<DescriptorSetId> {
            let set = device.allocate_descriptor_set(&format!("materials.set[{i}]"))?;
            device.bind_buffer_to_set(set, 0, materials.table_buffer(FrameIndex(i)))?;
            Ok(set)
        })?;
        let bindless = BindlessTextureTable::new(limits.max_texture_slots);
        let bindless_set = device.allocate_descriptor_set("bindless.textures")?;
        let statics = StaticMeshRenderer::new(&mut *device, &limits)?;
        let skeletals = SkeletalMeshRenderer::new(&mut *device, &limits)?;
        log::info!(
            "renderer up: {} frames in flight, {} max instances per registry",
            limits.frames_in_flight,
            limits.max_instances
        );
        Ok(Self {
            device,
            arena,
            materials,
            material_sets,
            bindless,
            bindless_set,
            statics,
            skeletals,
            views: SlotMap::with_key(),
            debug: DebugDrawQueue::new(),
            stats: RendererStats::default(),
        })
    }

    // --- geometry -------------------------------------------------------

    /// Allocate and upload a block of geometry into the arena
    pub fn upload_geometry(
        &mut self,
        kind: BufferKind,
        bytes: &[u8],
        alignment: u32,
    ) -> RenderResult<GeometryHandle> {
        self.arena.allocate(&mut *self.device, kind, bytes, alignment)
    }

    /// Partially re-upload inside an existing geometry allocation
    pub fn update_geometry(
        &mut self,
        handle: GeometryHandle,
        bytes: &[u8],
        offset: u32,
    ) -> RenderResult<()> {
        self.arena.update(&mut *self.device, handle, bytes, offset)
    }

    // --- materials and textures ----------------------------------------

    /// Append a zeroed material record
    pub fn create_material(&mut self) -> MaterialHandle {
        self.materials.create()
    }

    /// Overwrite a material's parameters
    pub fn update_material(
        &mut self,
        handle: MaterialHandle,
        color: [f32; 4],
        albedo: TextureSlot,
        normal: TextureSlot,
    ) {
        self.materials.update(handle, color, albedo, normal);
    }

    /// Forget a material handle; its table slot leaks until process exit
    pub fn destroy_material(&mut self, handle: MaterialHandle) {
        self.materials.destroy(handle);
    }

    /// Assign a bindless slot to a texture
    pub fn register_texture(&mut self, texture: TextureId) -> TextureSlot {
        self.bindless.allocate(texture)
    }

    /// Release a bindless slot for reuse
    pub fn release_texture(&mut self, slot: TextureSlot) {
        self.bindless.release(slot);
    }

    // --- instances ------------------------------------------------------

    /// Place an instance of an asset in the given archetype's registry
    pub fn create_instance(
        &mut self,
        source: &dyn MeshSource,
        archetype: MeshArchetype,
        asset: AssetId,
        transform: Transform,
        view_mask: ViewMask,
    ) -> RenderResult<InstanceHandle> {
        let Self {
            device,
            arena,
            materials,
            statics,
            skeletals,
            ..
        } = self;
        let registry: &mut dyn InstanceRenderer = match archetype {
            MeshArchetype::Static => statics,
            MeshArchetype::Skeletal => skeletals,
        };
        registry.create_instance(&mut **device, arena, source, materials, asset, transform, view_mask)
    }

    /// Overwrite an instance's transform
    pub fn set_transform(
        &mut self,
        archetype: MeshArchetype,
        handle: InstanceHandle,
        transform: Transform,
    ) {
        self.registry_mut(archetype).set_transform(handle, transform);
    }

    /// Overwrite an instance's view visibility bits
    pub fn set_view_mask(&mut self, archetype: MeshArchetype, handle: InstanceHandle, mask: ViewMask) {
        self.registry_mut(archetype).set_view_mask(handle, mask);
    }

    /// Remove an instance
    pub fn destroy_instance(&mut self, archetype: MeshArchetype, handle: InstanceHandle) {
        self.registry_mut(archetype).destroy_instance(handle);
    }

    /// Re-upload a skeletal instance's bone palette
    pub fn set_bone_palette(
        &mut self,
        handle: InstanceHandle,
        matrices: &[Mat4],
    ) -> RenderResult<()> {
        let Self {
            device,
            arena,
            skeletals,
            ..
        } = self;
        skeletals.set_bone_palette(&mut **device, arena, handle, matrices)
    }

    fn registry_mut(&mut self, archetype: MeshArchetype) -> &mut dyn InstanceRenderer {
        match archetype {
            MeshArchetype::Static => &mut self.statics,
            MeshArchetype::Skeletal => &mut self.skeletals,
        }
    }

    /// Access a registry read-only
    pub fn registry(&self, archetype: MeshArchetype) -> &dyn InstanceRenderer {
        match archetype {
            MeshArchetype::Static => &self.statics,
            MeshArchetype::Skeletal => &self.skeletals,
        }
    }

    // --- views ----------------------------------------------------------

    /// Register a view with its own per-frame uniform ring
    pub fn create_view(&mut self, label: &str, mask: ViewMask) -> RenderResult<ViewKey> {
        let view = View::new(&mut *self.device, label, mask)?;
        Ok(self.views.insert(view))
    }

    /// Store new camera matrices for a view
    ///
    /// The matrices reach every frame slot's uniform buffer on subsequent
    /// frames, whichever slot is active right now.
    pub fn update_view(
        &mut self,
        key: ViewKey,
        view: &Mat4,
        projection: &Mat4,
        position: Vec3,
    ) -> RenderResult<()> {
        self.views
            .get_mut(key)
            .ok_or(RenderError::UnknownView)?
            .update(view, projection, position);
        Ok(())
    }

    /// Unregister a view and release its buffers
    ///
    /// Stalls the device with a full `wait_idle` first: the view's ring
    /// buffers may still be read by in-flight frames, and a coarse wait is
    /// the correctness-over-performance choice made here.
    pub fn destroy_view(&mut self, key: ViewKey) -> RenderResult<()> {
        let view = self.views.remove(key).ok_or(RenderError::UnknownView)?;
        self.device.wait_idle()?;
        view.release(&mut *self.device)
    }

    /// Number of registered views
    pub fn view_count(&self) -> usize {
        self.views.len()
    }

    // --- per-frame ------------------------------------------------------

    /// Run one full frame
    pub fn render_frame(&mut self) -> RenderResult<FrameIndex> {
        let Self {
            device,
            arena,
            materials,
            material_sets,
            bindless,
            bindless_set,
            statics,
            skeletals,
            views,
            debug,
            ..
        } = self;

        let frame = device.begin_frame()?;

        // Queued bindless writes land before anything samples them.
        bindless.flush(&mut **device)?;
        materials.flush(&mut **device, frame)?;

        let mut draw_calls = 0usize;
        for (_key, view) in views.iter_mut() {
            view.flush(&mut **device, frame)?;

            // Idempotent per frame slot; only the first view pays for it.
            statics.prepare(&mut **device, frame)?;
            skeletals.prepare(&mut **device, frame)?;

            let sets = SharedSets {
                view: view.set(frame),
                materials: *material_sets.get(frame),
                bindless: *bindless_set,
            };
            let cmd = device.command_list();
            cmd.begin_render_pass("scene");
            statics.render(cmd, arena, sets, frame);
            skeletals.render(cmd, arena, sets, frame);
            cmd.end_render_pass();

            draw_calls += statics.draw_commands(frame).len()
                + skeletals.draw_commands(frame).len();
        }

        debug.clear();
        device.end_frame()?;

        self.stats = RendererStats {
            live_instances: self.statics.instance_count() + self.skeletals.instance_count(),
            draw_calls,
            views: self.views.len(),
            live_materials: self.materials.live(),
        };
        Ok(frame)
    }

    /// Counters from the most recent frame
    pub fn stats(&self) -> RendererStats {
        self.stats
    }

    /// The frame-scoped debug geometry queue
    pub fn debug_draw(&mut self) -> &mut DebugDrawQueue {
        &mut self.debug
    }

    /// The underlying device
    pub fn device(&self) -> &dyn GpuDevice {
        &*self.device
    }

    /// The underlying device, mutably
    pub fn device_mut(&mut self) -> &mut dyn GpuDevice {
        &mut *self.device
    }
}
