//! Shared registry state for both archetypes
//!
//! [`RegistryCore`] owns the ordered instance sequence, the handle index
//! map, the asset and batch tables, and the per-frame GPU mirrors. The two
//! archetype renderers wrap it with their archetype-specific create paths.

use std::collections::HashMap;

use crate::assets::{AssetId, MeshSource};
use crate::config::RenderLimits;
use crate::foundation::math::Transform;
use crate::gfx::{
    BufferDesc, BufferId, BufferUsage, CommandList, DescriptorSetId, DrawIndexedIndirectCommand,
    FrameIndex, GpuDevice, PipelineId,
};
use crate::render::frame::{DirtyBits, FrameRing};
use crate::render::geometry::{BufferKind, GeometryArena};
use crate::render::instance::{
    AssetBatchData, BatchData, InstanceData, InstanceHandle, SharedSets, ViewMask,
};
use crate::render::material::MaterialTable;
use crate::render::{RenderError, RenderResult};

/// One live instance in the ordered sequence
#[derive(Debug, Clone)]
pub(crate) struct InstanceRecord {
    pub handle: InstanceHandle,
    pub asset: AssetId,
    pub transform: Transform,
    pub view_mask: ViewMask,
    /// Element offset of the instance's bone palette in the data arena;
    /// zero for static meshes
    pub bone_offset: u32,
}

/// Element strides of an asset's geometry, kept CPU-side for command emission
#[derive(Debug, Clone, Copy)]
struct AssetStrides {
    vertex: u32,
    index: u32,
}

/// Per-frame GPU mirrors and the command stream derived for that slot
struct RegistryFrame {
    staging: BufferId,
    instance_buffer: BufferId,
    asset_buffer: BufferId,
    batch_buffer: BufferId,
    model_set: DescriptorSetId,
    commands: Vec<DrawIndexedIndirectCommand>,
}

pub(crate) struct RegistryCore {
    label: &'static str,
    pipeline: PipelineId,

    instances: Vec<InstanceRecord>,
    index_map: HashMap<InstanceHandle, usize>,
    next_handle: u64,

    asset_indices: HashMap<AssetId, u32>,
    asset_table: Vec<AssetBatchData>,
    asset_strides: Vec<AssetStrides>,
    batch_table: Vec<BatchData>,

    max_instances: usize,
    max_assets: usize,
    max_batches: usize,
    max_draw_records: usize,

    frames: FrameRing<RegistryFrame>,
    dirty: DirtyBits,
}

impl RegistryCore {
    pub fn new(
        device: &mut dyn GpuDevice,
        limits: &RenderLimits,
        label: &'static str,
    ) -> RenderResult<Self> {
        let pipeline = device.create_pipeline(label)?;
        let record_bytes = (limits.max_draw_records * std::mem::size_of::<InstanceData>()) as u64;
        let asset_bytes = (limits.max_assets * std::mem::size_of::<AssetBatchData>()) as u64;
        let batch_bytes = (limits.max_batches * std::mem::size_of::<BatchData>()) as u64;

        let frames = FrameRing::try_new_with(|i| -> RenderResult<RegistryFrame> {
            let staging = device
                .create_buffer(&BufferDesc::staging(format!("{label}.staging[{i}]"), record_bytes))?;
            let instance_buffer = device.create_buffer(&BufferDesc::device_local(
                format!("{label}.instances[{i}]"),
                record_bytes,
                BufferUsage::STORAGE,
            ))?;
            // The asset/batch tables are small and re-uploaded whole while
            // dirty; they skip the staging round trip.
            let asset_buffer = device.create_buffer(&BufferDesc {
                size: asset_bytes,
                usage: BufferUsage::STORAGE | BufferUsage::TRANSFER_DST,
                host_visible: true,
                label: format!("{label}.assets[{i}]"),
            })?;
            let batch_buffer = device.create_buffer(&BufferDesc {
                size: batch_bytes,
                usage: BufferUsage::STORAGE | BufferUsage::TRANSFER_DST,
                host_visible: true,
                label: format!("{label}.batches[{i}]"),
            })?;
            let model_set = device.allocate_descriptor_set(&format!("{label}.model[{i}]"))?;
            device.bind_buffer_to_set(model_set, 0, instance_buffer)?;
            device.bind_buffer_to_set(model_set, 1, batch_buffer)?;
            device.bind_buffer_to_set(model_set, 2, asset_buffer)?;
            Ok(RegistryFrame {
                staging,
                instance_buffer,
                asset_buffer,
                batch_buffer,
                model_set,
                commands: Vec::new(),
            })
        })?;

        Ok(Self {
            label,
            pipeline,
            instances: Vec::new(),
            index_map: HashMap::new(),
            next_handle: 0,
            asset_indices: HashMap::new(),
            asset_table: Vec::new(),
            asset_strides: Vec::new(),
            batch_table: Vec::new(),
            max_instances: limits.max_instances,
            max_assets: limits.max_assets,
            max_batches: limits.max_batches,
            max_draw_records: limits.max_draw_records,
            frames,
            dirty: DirtyBits::all_clear(),
        })
    }

    /// Register an asset's batch metadata on first instantiation
    fn ensure_asset(
        &mut self,
        source: &dyn MeshSource,
        materials: &MaterialTable,
        asset: AssetId,
    ) -> RenderResult<u32> {
        if let Some(&dense) = self.asset_indices.get(&asset) {
            return Ok(dense);
        }
        let mesh = source.mesh(asset).ok_or(RenderError::UnknownAsset(asset))?;
        assert!(
            self.asset_table.len() < self.max_assets,
            "{} asset table exhausted at {} assets",
            self.label,
            self.max_assets
        );
        assert!(
            self.batch_table.len() + mesh.submeshes.len() <= self.max_batches,
            "{} batch table exhausted at {} batches",
            self.label,
            self.max_batches
        );

        let dense = self.asset_table.len() as u32;
        self.asset_table.push(AssetBatchData {
            batch_offset: self.batch_table.len() as u32,
            batch_count: mesh.submeshes.len() as u32,
        });
        self.asset_strides.push(AssetStrides {
            vertex: mesh.vertex_stride,
            index: mesh.index_stride,
        });
        let bone_table_offset = mesh
            .bone_table
            .map_or(0, |h| h.offset() / BONE_MATRIX_BYTES);
        for submesh in &mesh.submeshes {
            debug_assert!(
                submesh.index_offset % mesh.index_stride == 0,
                "batch index offset {} not aligned to stride {}",
                submesh.index_offset,
                mesh.index_stride
            );
            debug_assert!(
                submesh.vertex_offset % mesh.vertex_stride == 0,
                "batch vertex offset {} not aligned to stride {}",
                submesh.vertex_offset,
                mesh.vertex_stride
            );
            self.batch_table.push(BatchData {
                index_offset: submesh.index_offset,
                index_count: submesh.index_count,
                vertex_offset: submesh.vertex_offset,
                material_index: materials.resolve_index(submesh.material),
                bone_table_offset,
                _padding: [0; 3],
            });
        }
        self.asset_indices.insert(asset, dense);
        log::debug!(
            "{}: registered asset {asset:?} as dense index {dense} ({} batches)",
            self.label,
            mesh.submeshes.len()
        );
        Ok(dense)
    }

    /// Insert a new instance, preserving same-asset contiguity
    pub fn create_instance(
        &mut self,
        source: &dyn MeshSource,
        materials: &MaterialTable,
        asset: AssetId,
        transform: Transform,
        view_mask: ViewMask,
        bone_offset: u32,
    ) -> RenderResult<InstanceHandle> {
        self.ensure_asset(source, materials, asset)?;
        assert!(
            self.instances.len() < self.max_instances,
            "{} instance table exhausted at {} instances",
            self.label,
            self.max_instances
        );

        let handle = InstanceHandle(self.next_handle);
        self.next_handle += 1;

        // Reverse scan for the last instance of this asset; inserting right
        // after it keeps the contiguity invariant without any render-time
        // sorting.
        let position = self
            .instances
            .iter()
            .rposition(|record| record.asset == asset)
            .map_or(self.instances.len(), |p| p + 1);

        for index in self.index_map.values_mut() {
            if *index >= position {
                *index += 1;
            }
        }
        self.instances.insert(
            position,
            InstanceRecord {
                handle,
                asset,
                transform,
                view_mask,
                bone_offset,
            },
        );
        self.index_map.insert(handle, position);
        self.dirty.raise_all();
        log::trace!("{}: instance {handle:?} of {asset:?} at position {position}", self.label);
        Ok(handle)
    }

    fn position_of(&self, handle: InstanceHandle) -> usize {
        *self
            .index_map
            .get(&handle)
            .unwrap_or_else(|| panic!("{}: unknown instance {handle:?}", self.label))
    }

    pub fn set_transform(&mut self, handle: InstanceHandle, transform: Transform) {
        let position = self.position_of(handle);
        self.instances[position].transform = transform;
        self.dirty.raise_all();
    }

    pub fn set_view_mask(&mut self, handle: InstanceHandle, mask: ViewMask) {
        let position = self.position_of(handle);
        self.instances[position].view_mask = mask;
        self.dirty.raise_all();
    }

    pub fn bone_offset(&self, handle: InstanceHandle) -> u32 {
        self.instances[self.position_of(handle)].bone_offset
    }

    /// Mark an instance mutated without changing its record
    ///
    /// Bone palettes live in the shared data arena, so a palette write does
    /// not alter the sequence; the dirty bits still have to rise so every
    /// frame slot re-derives its records.
    pub fn touch(&mut self, handle: InstanceHandle) {
        let _ = self.position_of(handle);
        self.dirty.raise_all();
    }

    /// Remove an instance; asset and batch rows are retained
    pub fn destroy_instance(&mut self, handle: InstanceHandle) {
        let position = self
            .index_map
            .remove(&handle)
            .unwrap_or_else(|| panic!("{}: destroy of unknown instance {handle:?}", self.label));
        let removed = self.instances.remove(position);
        for index in self.index_map.values_mut() {
            if *index > position {
                *index -= 1;
            }
        }
        log::trace!(
            "{}: destroyed instance {:?} at position {position}",
            self.label,
            removed.handle
        );
        if !self.instances.iter().any(|r| r.asset == removed.asset) {
            // No compaction policy yet; the dense index, batch rows, and
            // any arena geometry stay allocated until process exit.
            log::warn!(
                "{}: last instance of {:?} destroyed; its table rows leak until process exit",
                self.label,
                removed.asset
            );
        }
        self.dirty.raise_all();
    }

    /// Rebuild the frame slot's command stream and instance records
    ///
    /// Walks the ordered sequence once, closing a run whenever the asset
    /// changes, and emits one indirect command per (run, batch) pair.
    /// Returns whether an upload happened; a clean frame slot is a no-op.
    pub fn prepare(&mut self, device: &mut dyn GpuDevice, frame: FrameIndex) -> RenderResult<bool> {
        if !self.dirty.check(frame) {
            return Ok(false);
        }

        let mut commands = Vec::new();
        let mut records: Vec<InstanceData> = Vec::new();
        let mut run_start = 0usize;
        for end in 1..=self.instances.len() {
            let closes_run = end == self.instances.len()
                || self.instances[end].asset != self.instances[run_start].asset;
            if !closes_run {
                continue;
            }
            let dense = self.asset_indices[&self.instances[run_start].asset] as usize;
            let span = self.asset_table[dense];
            let strides = self.asset_strides[dense];
            let run_len = (end - run_start) as u32;
            let batches = &self.batch_table
                [span.batch_offset as usize..(span.batch_offset + span.batch_count) as usize];
            for batch in batches {
                let first_instance = records.len() as u32;
                for record in &self.instances[run_start..end] {
                    records.push(InstanceData {
                        model: record.transform.to_column_arrays(),
                        material_index: batch.material_index,
                        view_mask: record.view_mask.bits(),
                        bone_offset: record.bone_offset + batch.bone_table_offset,
                        _padding: 0,
                    });
                }
                commands.push(DrawIndexedIndirectCommand {
                    index_count: batch.index_count,
                    instance_count: run_len,
                    first_index: batch.index_offset / strides.index,
                    vertex_offset: (batch.vertex_offset / strides.vertex) as i32,
                    first_instance,
                });
            }
            run_start = end;
        }
        assert!(
            records.len() <= self.max_draw_records,
            "{} draw-record ceiling exceeded: {} > {}",
            self.label,
            records.len(),
            self.max_draw_records
        );

        let frame_res = self.frames.get_mut(frame);
        let record_bytes: &[u8] = bytemuck::cast_slice(&records);
        if !record_bytes.is_empty() {
            device.upload(frame_res.staging, 0, record_bytes)?;
            device.copy_buffer(
                frame_res.staging,
                0,
                frame_res.instance_buffer,
                0,
                record_bytes.len() as u64,
            )?;
        }
        if !self.asset_table.is_empty() {
            device.upload(frame_res.asset_buffer, 0, bytemuck::cast_slice(&self.asset_table))?;
            device.upload(frame_res.batch_buffer, 0, bytemuck::cast_slice(&self.batch_table))?;
        }
        frame_res.commands = commands;
        self.dirty.clear(frame);
        log::trace!(
            "{}: prepared frame {} ({} draws, {} records)",
            self.label,
            frame.get(),
            frame_res.commands.len(),
            records.len()
        );
        Ok(true)
    }

    /// Bind state and issue one draw per command, in emission order
    pub fn render(
        &self,
        cmd: &mut dyn CommandList,
        arena: &GeometryArena,
        sets: SharedSets,
        frame: FrameIndex,
    ) {
        let frame_res = self.frames.get(frame);
        if frame_res.commands.is_empty() {
            return;
        }
        cmd.bind_pipeline(self.pipeline);
        cmd.bind_descriptor_set(0, sets.view);
        cmd.bind_descriptor_set(1, sets.materials);
        cmd.bind_descriptor_set(2, sets.bindless);
        cmd.bind_descriptor_set(3, frame_res.model_set);
        cmd.bind_vertex_buffer(arena.buffer(BufferKind::Vertex), 0);
        cmd.bind_index_buffer(arena.buffer(BufferKind::Index), 0);
        for command in &frame_res.commands {
            cmd.draw_indexed(command);
        }
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub fn draw_commands(&self, frame: FrameIndex) -> &[DrawIndexedIndirectCommand] {
        &self.frames.get(frame).commands
    }

    #[cfg(test)]
    pub fn is_dirty(&self, frame: FrameIndex) -> bool {
        self.dirty.check(frame)
    }

    /// GPU instance-record buffer for a frame slot
    #[cfg(test)]
    pub fn instance_buffer(&self, frame: FrameIndex) -> BufferId {
        self.frames.get(frame).instance_buffer
    }

    /// Walk the invariants the sequence and index map must uphold
    ///
    /// Used by the test suite after every mutation batch.
    #[cfg(test)]
    pub fn check_invariants(&self) {
        assert_eq!(self.index_map.len(), self.instances.len());
        for (&handle, &position) in &self.index_map {
            assert_eq!(self.instances[position].handle, handle);
        }
        // Same-asset instances must be one contiguous range.
        let mut seen: std::collections::HashSet<AssetId> = std::collections::HashSet::new();
        let mut previous: Option<AssetId> = None;
        for record in &self.instances {
            if previous != Some(record.asset) {
                assert!(
                    seen.insert(record.asset),
                    "asset {:?} appears in two separate runs",
                    record.asset
                );
                previous = Some(record.asset);
            }
        }
    }
}

/// Bytes per bone matrix in the data arena
pub(crate) const BONE_MATRIX_BYTES: u32 = 64;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{MeshAsset, MeshLibrary, SubMesh};
    use crate::gfx::HeadlessDevice;

    struct Fixture {
        device: HeadlessDevice,
        library: MeshLibrary,
        materials: MaterialTable,
        core: RegistryCore,
    }

    impl Fixture {
        fn new() -> Self {
            let mut device = HeadlessDevice::new(3);
            let limits = RenderLimits::default();
            let materials = MaterialTable::new(&mut device, &limits).unwrap();
            let core = RegistryCore::new(&mut device, &limits, "test_registry").unwrap();
            Self {
                device,
                library: MeshLibrary::new(),
                materials,
                core,
            }
        }

        fn mesh(&mut self, batches: &[(u32, u32)]) -> AssetId {
            // (index_count, index_offset_bytes) per batch
            let material = self.materials.create();
            self.library.insert(MeshAsset {
                submeshes: batches
                    .iter()
                    .map(|&(index_count, index_offset)| SubMesh {
                        index_offset,
                        index_count,
                        vertex_offset: 0,
                        material,
                    })
                    .collect(),
                vertex_stride: 32,
                index_stride: 4,
                bone_count: 0,
                bone_table: None,
            })
        }

        fn spawn(&mut self, asset: AssetId) -> InstanceHandle {
            self.core
                .create_instance(
                    &self.library,
                    &self.materials,
                    asset,
                    Transform::identity(),
                    ViewMask::ALL,
                    0,
                )
                .unwrap()
        }
    }

    #[test]
    fn interleaved_creates_stay_contiguous() {
        let mut fx = Fixture::new();
        let a = fx.mesh(&[(36, 0)]);
        let b = fx.mesh(&[(6, 144)]);
        // Interleave creation order across assets.
        fx.spawn(a);
        fx.spawn(b);
        fx.spawn(a);
        fx.spawn(b);
        fx.spawn(a);
        fx.core.check_invariants();
        assert_eq!(fx.core.instance_count(), 5);
    }

    #[test]
    fn destroy_shifts_index_map_consistently() {
        let mut fx = Fixture::new();
        let a = fx.mesh(&[(36, 0)]);
        let b = fx.mesh(&[(6, 144)]);
        let handles: Vec<_> = vec![
            fx.spawn(a),
            fx.spawn(b),
            fx.spawn(a),
            fx.spawn(b),
        ];
        fx.core.destroy_instance(handles[0]);
        fx.core.check_invariants();
        fx.core.destroy_instance(handles[3]);
        fx.core.check_invariants();
        assert_eq!(fx.core.instance_count(), 2);
    }

    #[test]
    #[should_panic(expected = "unknown instance")]
    fn double_destroy_is_fatal() {
        let mut fx = Fixture::new();
        let a = fx.mesh(&[(3, 0)]);
        let handle = fx.spawn(a);
        fx.core.destroy_instance(handle);
        fx.core.destroy_instance(handle);
    }

    #[test]
    fn handles_never_repeat() {
        let mut fx = Fixture::new();
        let a = fx.mesh(&[(3, 0)]);
        let first = fx.spawn(a);
        fx.core.destroy_instance(first);
        let second = fx.spawn(a);
        assert_ne!(first, second);
    }

    #[test]
    fn two_assets_with_destroy_emit_expected_commands() {
        // A has two batches (36 and 12 indices), B one batch (6 indices).
        // Create I1, I2 of A, then I3 of B, then destroy I1.
        let mut fx = Fixture::new();
        let a = fx.mesh(&[(36, 0), (12, 144)]);
        let b = fx.mesh(&[(6, 192)]);
        let i1 = fx.spawn(a);
        let _i2 = fx.spawn(a);
        let _i3 = fx.spawn(b);
        fx.core.destroy_instance(i1);

        let frame = FrameIndex(0);
        fx.core.prepare(&mut fx.device, frame).unwrap();
        let commands = fx.core.draw_commands(frame);
        assert_eq!(
            commands,
            &[
                DrawIndexedIndirectCommand {
                    index_count: 36,
                    instance_count: 1,
                    first_index: 0,
                    vertex_offset: 0,
                    first_instance: 0,
                },
                DrawIndexedIndirectCommand {
                    index_count: 12,
                    instance_count: 1,
                    first_index: 36,
                    vertex_offset: 0,
                    first_instance: 1,
                },
                DrawIndexedIndirectCommand {
                    index_count: 6,
                    instance_count: 1,
                    first_index: 48,
                    vertex_offset: 0,
                    first_instance: 2,
                },
            ]
        );
    }

    #[test]
    fn draw_coverage_counts_every_instance_once_per_batch() {
        let mut fx = Fixture::new();
        let a = fx.mesh(&[(36, 0), (12, 144)]); // 2 batches
        let b = fx.mesh(&[(6, 192)]); // 1 batch
        for _ in 0..3 {
            fx.spawn(a);
        }
        for _ in 0..2 {
            fx.spawn(b);
        }
        let frame = FrameIndex(1);
        fx.core.prepare(&mut fx.device, frame).unwrap();
        let commands = fx.core.draw_commands(frame);
        // Asset A: 2 commands of instance_count 3; asset B: 1 of 2.
        let a_total: u32 = commands
            .iter()
            .filter(|c| c.index_count != 6)
            .map(|c| c.instance_count)
            .sum();
        let b_total: u32 = commands
            .iter()
            .filter(|c| c.index_count == 6)
            .map(|c| c.instance_count)
            .sum();
        assert_eq!(a_total, 3 * 2);
        assert_eq!(b_total, 2);
        // Each command's instance range is contiguous and non-overlapping.
        let mut expected_first = 0;
        for command in commands {
            assert_eq!(command.first_instance, expected_first);
            expected_first += command.instance_count;
        }
    }

    #[test]
    fn prepare_is_idempotent_per_frame_slot() {
        let mut fx = Fixture::new();
        let a = fx.mesh(&[(3, 0)]);
        fx.spawn(a);
        let frame = FrameIndex(0);
        assert!(fx.core.prepare(&mut fx.device, frame).unwrap());
        assert!(!fx.core.is_dirty(frame));
        let copies = fx.device.copies().len();
        assert!(!fx.core.prepare(&mut fx.device, frame).unwrap());
        assert_eq!(fx.device.copies().len(), copies);
        // Other frame slots remain dirty until they are prepared.
        assert!(fx.core.is_dirty(FrameIndex(1)));
    }

    #[test]
    fn mutation_re_dirties_every_frame_slot() {
        let mut fx = Fixture::new();
        let a = fx.mesh(&[(3, 0)]);
        let handle = fx.spawn(a);
        for i in 0..3 {
            fx.core.prepare(&mut fx.device, FrameIndex(i)).unwrap();
        }
        fx.core
            .set_transform(handle, Transform::from_position(crate::foundation::math::Vec3::new(1.0, 0.0, 0.0)));
        for i in 0..3 {
            assert!(fx.core.is_dirty(FrameIndex(i)));
        }
    }

    #[test]
    fn instance_records_land_in_device_buffer() {
        let mut fx = Fixture::new();
        let a = fx.mesh(&[(3, 0)]);
        let handle = fx.spawn(a);
        fx.core.set_transform(
            handle,
            Transform::from_position(crate::foundation::math::Vec3::new(4.0, 5.0, 6.0)),
        );
        let frame = FrameIndex(2);
        fx.core.prepare(&mut fx.device, frame).unwrap();

        let bytes = fx.device.buffer_bytes(fx.core.instance_buffer(frame));
        let record: &InstanceData =
            bytemuck::from_bytes(&bytes[..std::mem::size_of::<InstanceData>()]);
        assert_eq!(record.model[3][0], 4.0);
        assert_eq!(record.model[3][1], 5.0);
        assert_eq!(record.model[3][2], 6.0);
        assert_eq!(record.view_mask, u32::MAX);
    }

    #[test]
    fn empty_registry_prepares_no_commands() {
        let mut fx = Fixture::new();
        let frame = FrameIndex(0);
        // Nothing dirty, nothing to do.
        assert!(!fx.core.prepare(&mut fx.device, frame).unwrap());
        assert!(fx.core.draw_commands(frame).is_empty());
    }

    #[test]
    fn render_issues_one_draw_per_command() {
        let mut fx = Fixture::new();
        let limits = RenderLimits::default();
        let mut arena = GeometryArena::new(&mut fx.device, &limits).unwrap();
        let _geometry = arena
            .allocate(&mut fx.device, BufferKind::Vertex, &[0u8; 64], 4)
            .unwrap();

        let a = fx.mesh(&[(36, 0), (12, 144)]);
        fx.spawn(a);
        fx.spawn(a);
        let frame = FrameIndex(0);
        fx.core.prepare(&mut fx.device, frame).unwrap();

        let sets = SharedSets {
            view: fx.device.allocate_descriptor_set("view").unwrap(),
            materials: fx.device.allocate_descriptor_set("materials").unwrap(),
            bindless: fx.device.allocate_descriptor_set("bindless").unwrap(),
        };
        let vertex_buffer = arena.buffer(BufferKind::Vertex);
        let cmd = fx.device.command_list();
        cmd.begin_render_pass("test");
        fx.core.render(cmd, &arena, sets, frame);
        cmd.end_render_pass();

        let draws = fx.device.draws();
        assert_eq!(draws.len(), 2);
        assert_eq!(draws[0].command.instance_count, 2);
        assert_eq!(draws[0].vertex_buffer, Some(vertex_buffer));
    }
}
