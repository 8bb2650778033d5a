//! Geometry arena
//!
//! A monotonic bump allocator over three fixed-size device buffers: vertex,
//! index, and auxiliary data. Allocations are tagged offsets; nothing is
//! ever freed. All mesh geometry for the process lives in these three
//! buffers so that indirect draws can share one vertex/index binding.

use crate::config::RenderLimits;
use crate::gfx::{BufferDesc, BufferId, BufferUsage, GpuDevice};
use crate::render::RenderResult;

/// Which of the three backing buffers a handle refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    /// Vertex data
    Vertex,
    /// Index data
    Index,
    /// Auxiliary data (bone tables, per-batch payloads)
    Data,
}

impl BufferKind {
    const ALL: [Self; 3] = [Self::Vertex, Self::Index, Self::Data];

    fn tag(self) -> u32 {
        match self {
            Self::Vertex => 0,
            Self::Index => 1,
            Self::Data => 2,
        }
    }

    fn from_tag(tag: u32) -> Self {
        match tag {
            0 => Self::Vertex,
            1 => Self::Index,
            2 => Self::Data,
            _ => unreachable!("two-bit tag"),
        }
    }

    fn index(self) -> usize {
        self.tag() as usize
    }
}

// The kind tag occupies the two high bits; the byte offset the low 30.
const OFFSET_BITS: u32 = 30;
const OFFSET_MASK: u32 = (1 << OFFSET_BITS) - 1;

/// Largest capacity a single arena buffer may have
///
/// Offsets beyond this cannot be represented in a [`GeometryHandle`];
/// [`crate::config::RenderLimits::validate`] rejects configurations that
/// exceed it.
pub(crate) const MAX_ARENA_CAPACITY: u32 = OFFSET_MASK;

/// Tagged offset into one of the arena's backing buffers
///
/// Packs the buffer kind into the two high bits and the byte offset into the
/// remaining 30. The packing is an implementation detail of this module;
/// call sites only ever see [`BufferKind`] and byte offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GeometryHandle(u32);

impl GeometryHandle {
    fn pack(kind: BufferKind, offset: u32) -> Self {
        debug_assert!(offset <= OFFSET_MASK, "offset {offset} exceeds 30 bits");
        Self((kind.tag() << OFFSET_BITS) | offset)
    }

    /// The buffer this handle points into
    pub fn kind(self) -> BufferKind {
        BufferKind::from_tag(self.0 >> OFFSET_BITS)
    }

    /// Byte offset within the buffer
    pub fn offset(self) -> u32 {
        self.0 & OFFSET_MASK
    }
}

#[derive(Debug)]
struct ArenaBuffer {
    buffer: BufferId,
    capacity: u32,
    head: u32,
}

/// Bump allocator over the three geometry buffers
///
/// `allocate` only ever advances a head pointer; `deallocate` is a no-op.
/// Capacity is fixed for the process lifetime and exhaustion is fatal.
pub struct GeometryArena {
    buffers: [ArenaBuffer; 3],
}

impl GeometryArena {
    /// Create the three backing buffers at the configured capacities
    pub fn new(device: &mut dyn GpuDevice, limits: &RenderLimits) -> RenderResult<Self> {
        let make = |device: &mut dyn GpuDevice, kind: BufferKind| -> RenderResult<ArenaBuffer> {
            let (label, capacity, usage) = match kind {
                BufferKind::Vertex => (
                    "arena.vertex",
                    limits.vertex_arena_bytes,
                    BufferUsage::VERTEX,
                ),
                BufferKind::Index => ("arena.index", limits.index_arena_bytes, BufferUsage::INDEX),
                BufferKind::Data => ("arena.data", limits.data_arena_bytes, BufferUsage::STORAGE),
            };
            debug_assert!(capacity <= OFFSET_MASK, "arena capacity exceeds handle range");
            // Host-visible so partial updates write straight through; the
            // arena carries no per-frame copies because allocations are
            // written once before first use.
            let buffer = device.create_buffer(&BufferDesc {
                size: u64::from(capacity),
                usage: usage | BufferUsage::TRANSFER_DST,
                host_visible: true,
                label: label.to_string(),
            })?;
            Ok(ArenaBuffer {
                buffer,
                capacity,
                head: 0,
            })
        };
        let mut buffers = Vec::with_capacity(3);
        for kind in BufferKind::ALL {
            buffers.push(make(device, kind)?);
        }
        let Ok(buffers) = buffers.try_into() else {
            unreachable!("one arena buffer per kind");
        };
        Ok(Self { buffers })
    }

    /// Allocate and upload a block of geometry
    ///
    /// The head is aligned up to `alignment` (any non-zero value, not just
    /// powers of two), the bytes are uploaded at the aligned offset, and the
    /// head advances past them. Runs out of capacity fatally; there is no
    /// growth path.
    pub fn allocate(
        &mut self,
        device: &mut dyn GpuDevice,
        kind: BufferKind,
        bytes: &[u8],
        alignment: u32,
    ) -> RenderResult<GeometryHandle> {
        debug_assert!(alignment > 0, "alignment must be non-zero");
        let slot = &mut self.buffers[kind.index()];
        let mut offset = slot.head;
        let remainder = offset % alignment;
        if remainder != 0 {
            offset += alignment - remainder;
        }
        let size = u32::try_from(bytes.len()).expect("allocation fits u32");
        assert!(
            offset + size <= slot.capacity,
            "geometry arena {kind:?} exhausted: {offset}+{size} exceeds {} bytes",
            slot.capacity
        );
        device.upload(slot.buffer, u64::from(offset), bytes)?;
        slot.head = offset + size;
        log::trace!("arena {kind:?}: allocated {size} bytes at {offset}");
        Ok(GeometryHandle::pack(kind, offset))
    }

    /// Partially re-upload inside an existing allocation
    ///
    /// `offset` is relative to the allocation's start. The caller is
    /// responsible for staying inside the bytes it allocated; only the
    /// buffer capacity is checked here.
    pub fn update(
        &mut self,
        device: &mut dyn GpuDevice,
        handle: GeometryHandle,
        bytes: &[u8],
        offset: u32,
    ) -> RenderResult<()> {
        let slot = &self.buffers[handle.kind().index()];
        let base = handle.offset() + offset;
        let size = u32::try_from(bytes.len()).expect("update fits u32");
        debug_assert!(
            base + size <= slot.capacity,
            "update overruns {:?} buffer",
            handle.kind()
        );
        device.upload(slot.buffer, u64::from(base), bytes)?;
        Ok(())
    }

    /// No-op; the arena never reclaims
    ///
    /// Kept on the API so call sites record where a free would belong if a
    /// reclaiming allocator ever replaces this one.
    pub fn deallocate(&mut self, _handle: GeometryHandle) {}

    /// The backing device buffer for a kind
    pub fn buffer(&self, kind: BufferKind) -> BufferId {
        self.buffers[kind.index()].buffer
    }

    /// Current head offset for a kind
    pub fn head(&self, kind: BufferKind) -> u32 {
        self.buffers[kind.index()].head
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::HeadlessDevice;

    fn arena(device: &mut HeadlessDevice) -> GeometryArena {
        GeometryArena::new(device, &RenderLimits::default()).unwrap()
    }

    #[test]
    fn handle_round_trips_kind_and_offset() {
        let mut device = HeadlessDevice::new(3);
        let mut arena = arena(&mut device);
        let handle = arena
            .allocate(&mut device, BufferKind::Index, &[0u8; 64], 4)
            .unwrap();
        assert_eq!(handle.kind(), BufferKind::Index);
        assert_eq!(handle.offset(), 0);
        assert_eq!(handle.offset() % 4, 0);
    }

    #[test]
    fn alignment_pads_only_when_needed() {
        let mut device = HeadlessDevice::new(3);
        let mut arena = arena(&mut device);
        // 100 bytes at alignment 16 from an empty arena lands at 0.
        let first = arena
            .allocate(&mut device, BufferKind::Vertex, &[0u8; 100], 16)
            .unwrap();
        assert_eq!(first.offset(), 0);
        // 100 is already 4-aligned, so no padding before the next block.
        let second = arena
            .allocate(&mut device, BufferKind::Vertex, &[0u8; 10], 4)
            .unwrap();
        assert_eq!(second.offset(), 100);
        assert_eq!(arena.head(BufferKind::Vertex), 110);
    }

    #[test]
    fn non_power_of_two_alignment() {
        let mut device = HeadlessDevice::new(3);
        let mut arena = arena(&mut device);
        arena
            .allocate(&mut device, BufferKind::Data, &[0u8; 5], 1)
            .unwrap();
        let handle = arena
            .allocate(&mut device, BufferKind::Data, &[0u8; 12], 12)
            .unwrap();
        assert_eq!(handle.offset(), 12);
    }

    #[test]
    fn kinds_bump_independently() {
        let mut device = HeadlessDevice::new(3);
        let mut arena = arena(&mut device);
        arena
            .allocate(&mut device, BufferKind::Vertex, &[0u8; 32], 4)
            .unwrap();
        let index_handle = arena
            .allocate(&mut device, BufferKind::Index, &[0u8; 8], 4)
            .unwrap();
        assert_eq!(index_handle.offset(), 0);
        assert_eq!(arena.head(BufferKind::Vertex), 32);
        assert_eq!(arena.head(BufferKind::Index), 8);
    }

    #[test]
    fn update_mutates_exactly_the_written_bytes() {
        let mut device = HeadlessDevice::new(3);
        let mut arena = arena(&mut device);
        let handle = arena
            .allocate(&mut device, BufferKind::Data, &[1u8; 16], 4)
            .unwrap();
        arena
            .update(&mut device, handle, &[9u8, 9, 9, 9], 4)
            .unwrap();
        let bytes = device.buffer_bytes(arena.buffer(BufferKind::Data));
        assert_eq!(&bytes[0..4], &[1, 1, 1, 1]);
        assert_eq!(&bytes[4..8], &[9, 9, 9, 9]);
        assert_eq!(&bytes[8..16], &[1u8; 8]);
    }

    #[test]
    fn deallocate_reclaims_nothing() {
        let mut device = HeadlessDevice::new(3);
        let mut arena = arena(&mut device);
        let handle = arena
            .allocate(&mut device, BufferKind::Vertex, &[0u8; 40], 4)
            .unwrap();
        arena.deallocate(handle);
        let next = arena
            .allocate(&mut device, BufferKind::Vertex, &[0u8; 4], 4)
            .unwrap();
        assert_eq!(next.offset(), 40);
    }

    #[test]
    #[should_panic(expected = "exhausted")]
    fn exhaustion_is_fatal() {
        let mut device = HeadlessDevice::new(3);
        let limits = RenderLimits {
            data_arena_bytes: 64,
            ..Default::default()
        };
        let mut arena = GeometryArena::new(&mut device, &limits).unwrap();
        arena
            .allocate(&mut device, BufferKind::Data, &[0u8; 128], 4)
            .unwrap();
    }
}
