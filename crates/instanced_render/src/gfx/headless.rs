//! Headless recording device
//!
//! A [`GpuDevice`] implementation with no GPU behind it. Buffers are plain
//! byte vectors, copies move real bytes, and every draw and descriptor
//! operation is recorded for later inspection. The test suite and the demo
//! binary both run against this device.

use std::collections::HashMap;

use super::{
    BufferDesc, BufferId, CommandList, DescriptorSetId, DrawIndexedIndirectCommand, FrameIndex,
    GfxError, GfxResult, GpuDevice, PipelineId, TextureId,
};

/// A buffer held by the headless device
#[derive(Debug)]
struct HeadlessBuffer {
    desc: BufferDesc,
    bytes: Vec<u8>,
}

/// One recorded buffer-to-buffer copy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyRecord {
    /// Source buffer
    pub src: BufferId,
    /// Source byte offset
    pub src_offset: u64,
    /// Destination buffer
    pub dst: BufferId,
    /// Destination byte offset
    pub dst_offset: u64,
    /// Bytes copied
    pub size: u64,
}

/// One recorded upload into a host-visible buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadRecord {
    /// Destination buffer
    pub buffer: BufferId,
    /// Destination byte offset
    pub offset: u64,
    /// Bytes written
    pub size: u64,
}

/// One recorded draw with the state bound at issue time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawRecord {
    /// Pipeline bound when the draw was issued
    pub pipeline: Option<PipelineId>,
    /// Vertex buffer bound when the draw was issued
    pub vertex_buffer: Option<BufferId>,
    /// Index buffer bound when the draw was issued
    pub index_buffer: Option<BufferId>,
    /// The draw arguments
    pub command: DrawIndexedIndirectCommand,
}

/// Command list that records instead of submitting
#[derive(Debug, Default)]
pub struct HeadlessCommandList {
    bound_pipeline: Option<PipelineId>,
    bound_vertex_buffer: Option<BufferId>,
    bound_index_buffer: Option<BufferId>,
    bound_sets: HashMap<u32, DescriptorSetId>,
    draws: Vec<DrawRecord>,
    render_pass_depth: u32,
}

impl HeadlessCommandList {
    /// Draws recorded since the last [`HeadlessDevice::reset_recording`]
    pub fn draws(&self) -> &[DrawRecord] {
        &self.draws
    }

    /// Descriptor set bound at the given index, if any
    pub fn bound_set(&self, index: u32) -> Option<DescriptorSetId> {
        self.bound_sets.get(&index).copied()
    }
}

impl CommandList for HeadlessCommandList {
    fn begin_render_pass(&mut self, _label: &str) {
        self.render_pass_depth += 1;
    }

    fn end_render_pass(&mut self) {
        debug_assert!(self.render_pass_depth > 0, "end_render_pass without begin");
        self.render_pass_depth -= 1;
    }

    fn bind_pipeline(&mut self, pipeline: PipelineId) {
        self.bound_pipeline = Some(pipeline);
    }

    fn bind_descriptor_set(&mut self, index: u32, set: DescriptorSetId) {
        self.bound_sets.insert(index, set);
    }

    fn bind_vertex_buffer(&mut self, buffer: BufferId, _offset: u64) {
        self.bound_vertex_buffer = Some(buffer);
    }

    fn bind_index_buffer(&mut self, buffer: BufferId, _offset: u64) {
        self.bound_index_buffer = Some(buffer);
    }

    fn draw_indexed(&mut self, cmd: &DrawIndexedIndirectCommand) {
        debug_assert!(self.render_pass_depth > 0, "draw outside a render pass");
        self.draws.push(DrawRecord {
            pipeline: self.bound_pipeline,
            vertex_buffer: self.bound_vertex_buffer,
            index_buffer: self.bound_index_buffer,
            command: *cmd,
        });
    }
}

/// A [`GpuDevice`] that records everything and renders nothing
pub struct HeadlessDevice {
    buffers: HashMap<u64, HeadlessBuffer>,
    descriptor_sets: HashMap<u64, HashMap<u32, BufferId>>,
    texture_slots: HashMap<u32, Option<TextureId>>,
    next_id: u64,
    frames_in_flight: usize,
    frame_counter: usize,
    uploads: Vec<UploadRecord>,
    copies: Vec<CopyRecord>,
    wait_idle_calls: usize,
    command_list: HeadlessCommandList,
}

impl HeadlessDevice {
    /// Create a headless device with the given frame ring size
    pub fn new(frames_in_flight: usize) -> Self {
        Self {
            buffers: HashMap::new(),
            descriptor_sets: HashMap::new(),
            texture_slots: HashMap::new(),
            next_id: 1,
            frames_in_flight,
            frame_counter: 0,
            uploads: Vec::new(),
            copies: Vec::new(),
            wait_idle_calls: 0,
            command_list: HeadlessCommandList::default(),
        }
    }

    fn fresh_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Current contents of a buffer
    pub fn buffer_bytes(&self, buffer: BufferId) -> &[u8] {
        &self.buffers[&buffer.0].bytes
    }

    /// Uploads recorded since the last [`Self::reset_recording`]
    pub fn uploads(&self) -> &[UploadRecord] {
        &self.uploads
    }

    /// Copies recorded since the last [`Self::reset_recording`]
    pub fn copies(&self) -> &[CopyRecord] {
        &self.copies
    }

    /// Draws recorded since the last [`Self::reset_recording`]
    pub fn draws(&self) -> &[DrawRecord] {
        self.command_list.draws()
    }

    /// Texture currently written to a bindless slot
    pub fn texture_slot(&self, slot: u32) -> Option<TextureId> {
        self.texture_slots.get(&slot).copied().flatten()
    }

    /// Number of `wait_idle` calls observed
    pub fn wait_idle_calls(&self) -> usize {
        self.wait_idle_calls
    }

    /// Number of live buffers
    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Access the recording command list directly
    pub fn recording(&self) -> &HeadlessCommandList {
        &self.command_list
    }

    /// Clear recorded uploads, copies, and draws
    pub fn reset_recording(&mut self) {
        self.uploads.clear();
        self.copies.clear();
        self.command_list.draws.clear();
    }
}

impl GpuDevice for HeadlessDevice {
    fn create_buffer(&mut self, desc: &BufferDesc) -> GfxResult<BufferId> {
        let id = self.fresh_id();
        log::debug!("headless: create buffer '{}' ({} bytes)", desc.label, desc.size);
        self.buffers.insert(
            id,
            HeadlessBuffer {
                desc: desc.clone(),
                bytes: vec![0; usize::try_from(desc.size).expect("buffer size fits usize")],
            },
        );
        Ok(BufferId(id))
    }

    fn destroy_buffer(&mut self, buffer: BufferId) -> GfxResult<()> {
        self.buffers
            .remove(&buffer.0)
            .map(|_| ())
            .ok_or_else(|| GfxError::InvalidHandle(format!("{buffer:?}")))
    }

    fn upload(&mut self, buffer: BufferId, offset: u64, data: &[u8]) -> GfxResult<()> {
        let slot = self
            .buffers
            .get_mut(&buffer.0)
            .ok_or_else(|| GfxError::InvalidHandle(format!("{buffer:?}")))?;
        debug_assert!(
            slot.desc.host_visible,
            "upload targets host-visible buffers, '{}' is device-local",
            slot.desc.label
        );
        let start = usize::try_from(offset).expect("offset fits usize");
        let end = start + data.len();
        assert!(
            end as u64 <= slot.desc.size,
            "upload of {} bytes at {} overruns '{}' ({} bytes)",
            data.len(),
            offset,
            slot.desc.label,
            slot.desc.size
        );
        slot.bytes[start..end].copy_from_slice(data);
        self.uploads.push(UploadRecord {
            buffer,
            offset,
            size: data.len() as u64,
        });
        Ok(())
    }

    fn copy_buffer(
        &mut self,
        src: BufferId,
        src_offset: u64,
        dst: BufferId,
        dst_offset: u64,
        size: u64,
    ) -> GfxResult<()> {
        let src_start = usize::try_from(src_offset).expect("offset fits usize");
        let len = usize::try_from(size).expect("size fits usize");
        let data = {
            let src_buf = self
                .buffers
                .get(&src.0)
                .ok_or_else(|| GfxError::InvalidHandle(format!("{src:?}")))?;
            src_buf.bytes[src_start..src_start + len].to_vec()
        };
        let dst_buf = self
            .buffers
            .get_mut(&dst.0)
            .ok_or_else(|| GfxError::InvalidHandle(format!("{dst:?}")))?;
        let dst_start = usize::try_from(dst_offset).expect("offset fits usize");
        dst_buf.bytes[dst_start..dst_start + len].copy_from_slice(&data);
        self.copies.push(CopyRecord {
            src,
            src_offset,
            dst,
            dst_offset,
            size,
        });
        Ok(())
    }

    fn create_pipeline(&mut self, label: &str) -> GfxResult<PipelineId> {
        log::debug!("headless: create pipeline '{label}'");
        let id = self.fresh_id();
        Ok(PipelineId(id))
    }

    fn allocate_descriptor_set(&mut self, label: &str) -> GfxResult<DescriptorSetId> {
        log::debug!("headless: allocate descriptor set '{label}'");
        let id = self.fresh_id();
        self.descriptor_sets.insert(id, HashMap::new());
        Ok(DescriptorSetId(id))
    }

    fn free_descriptor_set(&mut self, set: DescriptorSetId) -> GfxResult<()> {
        self.descriptor_sets
            .remove(&set.0)
            .map(|_| ())
            .ok_or_else(|| GfxError::InvalidHandle(format!("{set:?}")))
    }

    fn bind_buffer_to_set(
        &mut self,
        set: DescriptorSetId,
        binding: u32,
        buffer: BufferId,
    ) -> GfxResult<()> {
        let bindings = self
            .descriptor_sets
            .get_mut(&set.0)
            .ok_or_else(|| GfxError::InvalidHandle(format!("{set:?}")))?;
        bindings.insert(binding, buffer);
        Ok(())
    }

    fn write_texture_slot(&mut self, slot: u32, texture: Option<TextureId>) -> GfxResult<()> {
        self.texture_slots.insert(slot, texture);
        Ok(())
    }

    fn begin_frame(&mut self) -> GfxResult<FrameIndex> {
        let index = self.frame_counter % self.frames_in_flight;
        self.frame_counter += 1;
        Ok(FrameIndex(index))
    }

    fn end_frame(&mut self) -> GfxResult<()> {
        Ok(())
    }

    fn wait_idle(&mut self) -> GfxResult<()> {
        self.wait_idle_calls += 1;
        Ok(())
    }

    fn command_list(&mut self) -> &mut dyn CommandList {
        &mut self.command_list
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::BufferUsage;

    #[test]
    fn uploads_land_in_buffer_bytes() {
        let mut device = HeadlessDevice::new(3);
        let buf = device
            .create_buffer(&BufferDesc::staging("stage", 16))
            .unwrap();
        device.upload(buf, 4, &[1, 2, 3, 4]).unwrap();
        assert_eq!(&device.buffer_bytes(buf)[4..8], &[1, 2, 3, 4]);
        assert_eq!(&device.buffer_bytes(buf)[0..4], &[0, 0, 0, 0]);
    }

    #[test]
    fn copies_move_bytes_between_buffers() {
        let mut device = HeadlessDevice::new(3);
        let src = device
            .create_buffer(&BufferDesc::staging("src", 8))
            .unwrap();
        let dst = device
            .create_buffer(&BufferDesc::device_local("dst", 8, BufferUsage::STORAGE))
            .unwrap();
        device.upload(src, 0, &[9, 8, 7, 6]).unwrap();
        device.copy_buffer(src, 0, dst, 2, 4).unwrap();
        assert_eq!(&device.buffer_bytes(dst)[2..6], &[9, 8, 7, 6]);
        assert_eq!(device.copies().len(), 1);
    }

    #[test]
    fn frame_index_cycles_through_ring() {
        let mut device = HeadlessDevice::new(3);
        let seq: Vec<usize> = (0..5).map(|_| device.begin_frame().unwrap().get()).collect();
        assert_eq!(seq, vec![0, 1, 2, 0, 1]);
    }

    #[test]
    fn destroying_unknown_buffer_is_an_error() {
        let mut device = HeadlessDevice::new(3);
        assert!(device.destroy_buffer(BufferId(42)).is_err());
    }
}
