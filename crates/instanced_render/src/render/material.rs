//! Material table
//!
//! A dense array of material records mirrored into a GPU-visible table.
//! Mutations raise per-frame dirty bits; the renderer flushes the whole
//! table through a staging buffer into the acquired frame's copy, the same
//! staging discipline the instance buffers use.

use std::collections::HashMap;

use bytemuck::Zeroable;

use crate::config::RenderLimits;
use crate::gfx::{BufferDesc, BufferId, BufferUsage, FrameIndex, GpuDevice};
use crate::render::bindless::TextureSlot;
use crate::render::frame::{DirtyBits, FrameRing};
use crate::render::RenderResult;

/// Handle to a material record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MaterialHandle(pub u64);

/// GPU-visible material record
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MaterialRecord {
    /// Base color, RGBA
    pub color: [f32; 4],
    /// Bindless slot of the albedo texture
    pub albedo_slot: u32,
    /// Bindless slot of the normal map
    pub normal_slot: u32,
    /// Pad to 32 bytes for std430 table indexing
    pub _padding: [u32; 2],
}

struct MaterialFrame {
    staging: BufferId,
    table: BufferId,
}

/// Dense material storage plus its GPU mirror
///
/// Destroyed materials leave a logical hole: the handle mapping is removed
/// but the record slot is never reused or compacted. The table grows until
/// process exit; reclamation is a recorded follow-up, not implemented here.
pub struct MaterialTable {
    records: Vec<MaterialRecord>,
    index: HashMap<MaterialHandle, usize>,
    next_handle: u64,
    capacity: usize,
    frames: FrameRing<MaterialFrame>,
    dirty: DirtyBits,
}

impl MaterialTable {
    /// Create the table and its per-frame GPU buffers
    pub fn new(device: &mut dyn GpuDevice, limits: &RenderLimits) -> RenderResult<Self> {
        let bytes = (limits.max_materials * std::mem::size_of::<MaterialRecord>()) as u64;
        let frames = FrameRing::try_new_with(|i| -> RenderResult<MaterialFrame> {
            Ok(MaterialFrame {
                staging: device
                    .create_buffer(&BufferDesc::staging(format!("materials.staging[{i}]"), bytes))?,
                table: device.create_buffer(&BufferDesc::device_local(
                    format!("materials.table[{i}]"),
                    bytes,
                    BufferUsage::STORAGE,
                ))?,
            })
        })?;
        Ok(Self {
            records: Vec::new(),
            index: HashMap::new(),
            next_handle: 0,
            capacity: limits.max_materials,
            frames,
            dirty: DirtyBits::all_clear(),
        })
    }

    /// Append a zeroed material record
    pub fn create(&mut self) -> MaterialHandle {
        assert!(
            self.records.len() < self.capacity,
            "material table exhausted at {} records",
            self.capacity
        );
        let handle = MaterialHandle(self.next_handle);
        self.next_handle += 1;
        self.index.insert(handle, self.records.len());
        self.records.push(MaterialRecord::zeroed());
        self.dirty.raise_all();
        log::debug!("created material {handle:?}");
        handle
    }

    /// Overwrite a material's parameters
    pub fn update(
        &mut self,
        handle: MaterialHandle,
        color: [f32; 4],
        albedo: TextureSlot,
        normal: TextureSlot,
    ) {
        let &position = self
            .index
            .get(&handle)
            .unwrap_or_else(|| panic!("update of unknown material {handle:?}"));
        self.records[position] = MaterialRecord {
            color,
            albedo_slot: albedo.get(),
            normal_slot: normal.get(),
            _padding: [0; 2],
        };
        self.dirty.raise_all();
    }

    /// Forget a material handle
    ///
    /// Removes only the mapping; the record slot stays occupied until
    /// process exit.
    pub fn destroy(&mut self, handle: MaterialHandle) {
        let removed = self.index.remove(&handle);
        debug_assert!(removed.is_some(), "destroy of unknown material {handle:?}");
        log::warn!("material {handle:?} destroyed; its table slot leaks until process exit");
    }

    /// Dense index of a live material, for batch records
    pub(crate) fn resolve_index(&self, handle: MaterialHandle) -> u32 {
        let &position = self
            .index
            .get(&handle)
            .unwrap_or_else(|| panic!("batch references unknown material {handle:?}"));
        position as u32
    }

    /// Stage and copy the whole table into the frame's GPU copy, if dirty
    pub fn flush(&mut self, device: &mut dyn GpuDevice, frame: FrameIndex) -> RenderResult<()> {
        if !self.dirty.check(frame) {
            return Ok(());
        }
        let frame_buffers = self.frames.get(frame);
        let bytes: &[u8] = bytemuck::cast_slice(&self.records);
        if !bytes.is_empty() {
            device.upload(frame_buffers.staging, 0, bytes)?;
            device.copy_buffer(
                frame_buffers.staging,
                0,
                frame_buffers.table,
                0,
                bytes.len() as u64,
            )?;
        }
        self.dirty.clear(frame);
        log::trace!(
            "flushed {} material record(s) to frame {}",
            self.records.len(),
            frame.get()
        );
        Ok(())
    }

    /// GPU table buffer for a frame slot
    pub fn table_buffer(&self, frame: FrameIndex) -> BufferId {
        self.frames.get(frame).table
    }

    /// Number of record slots in use (live and leaked)
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no materials were ever created
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of live (resolvable) materials
    pub fn live(&self) -> usize {
        self.index.len()
    }

    /// Whether the frame slot still needs a flush
    pub fn is_dirty(&self, frame: FrameIndex) -> bool {
        self.dirty.check(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::HeadlessDevice;

    fn table(device: &mut HeadlessDevice) -> MaterialTable {
        MaterialTable::new(device, &RenderLimits::default()).unwrap()
    }

    #[test]
    fn create_marks_every_frame_dirty() {
        let mut device = HeadlessDevice::new(3);
        let mut materials = table(&mut device);
        materials.create();
        for i in 0..3 {
            assert!(materials.is_dirty(FrameIndex(i)));
        }
    }

    #[test]
    fn flush_is_idempotent_per_frame() {
        let mut device = HeadlessDevice::new(3);
        let mut materials = table(&mut device);
        let handle = materials.create();
        materials.update(handle, [1.0, 0.5, 0.25, 1.0], TextureSlot(3), TextureSlot(4));

        let frame = FrameIndex(0);
        materials.flush(&mut device, frame).unwrap();
        assert!(!materials.is_dirty(frame));
        let copies_after_first = device.copies().len();
        materials.flush(&mut device, frame).unwrap();
        assert_eq!(device.copies().len(), copies_after_first, "second flush is a no-op");
        // Other frame slots still want their own copy.
        assert!(materials.is_dirty(FrameIndex(1)));
    }

    #[test]
    fn flushed_bytes_match_records() {
        let mut device = HeadlessDevice::new(3);
        let mut materials = table(&mut device);
        let handle = materials.create();
        materials.update(handle, [0.0, 1.0, 0.0, 1.0], TextureSlot(7), TextureSlot(8));
        let frame = FrameIndex(2);
        materials.flush(&mut device, frame).unwrap();

        let bytes = device.buffer_bytes(materials.table_buffer(frame));
        let record: &MaterialRecord =
            bytemuck::from_bytes(&bytes[..std::mem::size_of::<MaterialRecord>()]);
        assert_eq!(record.color, [0.0, 1.0, 0.0, 1.0]);
        assert_eq!(record.albedo_slot, 7);
        assert_eq!(record.normal_slot, 8);
    }

    #[test]
    fn destroy_leaves_a_logical_hole() {
        let mut device = HeadlessDevice::new(3);
        let mut materials = table(&mut device);
        let a = materials.create();
        let b = materials.create();
        let b_index = materials.resolve_index(b);
        materials.destroy(a);
        assert_eq!(materials.len(), 2, "record slots never shrink");
        assert_eq!(materials.live(), 1);
        assert_eq!(materials.resolve_index(b), b_index, "survivors keep their index");
    }

    #[test]
    #[should_panic(expected = "unknown material")]
    fn updating_destroyed_material_is_fatal() {
        let mut device = HeadlessDevice::new(3);
        let mut materials = table(&mut device);
        let handle = materials.create();
        materials.destroy(handle);
        materials.update(handle, [0.0; 4], TextureSlot(0), TextureSlot(0));
    }
}
