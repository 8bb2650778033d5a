//! Bindless texture table
//!
//! Shaders address textures through a fixed-capacity descriptor array by
//! integer slot. This table hands out stable slot IDs, recycles released
//! slots, and queues descriptor writes that the renderer consumes once at
//! the start of the next frame.

use std::collections::BTreeSet;

use crate::gfx::{GpuDevice, TextureId};
use crate::render::RenderResult;

/// Stable integer slot into the bindless descriptor array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureSlot(pub u32);

impl TextureSlot {
    /// The raw slot index shaders use
    pub fn get(self) -> u32 {
        self.0
    }
}

/// Slot allocator for the bindless descriptor array
pub struct BindlessTextureTable {
    free: BTreeSet<u32>,
    next: u32,
    capacity: u32,
    pending: Vec<(u32, Option<TextureId>)>,
}

impl BindlessTextureTable {
    /// Create a table with the given slot capacity
    pub fn new(capacity: u32) -> Self {
        Self {
            free: BTreeSet::new(),
            next: 0,
            capacity,
            pending: Vec::new(),
        }
    }

    /// Allocate a slot for a texture
    ///
    /// Recycles the lowest released slot if one exists, otherwise takes the
    /// next monotonically increasing ID. The descriptor write is queued, not
    /// applied; it lands at the next [`Self::flush`].
    pub fn allocate(&mut self, texture: TextureId) -> TextureSlot {
        let slot = if let Some(&recycled) = self.free.iter().next() {
            self.free.remove(&recycled);
            recycled
        } else {
            let fresh = self.next;
            assert!(
                fresh < self.capacity,
                "bindless table exhausted at {} slots",
                self.capacity
            );
            self.next += 1;
            fresh
        };
        self.pending.push((slot, Some(texture)));
        log::debug!("texture {texture:?} assigned bindless slot {slot}");
        TextureSlot(slot)
    }

    /// Release a slot back to the free set
    ///
    /// Queues a null-descriptor write so the GPU table no longer references
    /// the texture.
    pub fn release(&mut self, slot: TextureSlot) {
        let inserted = self.free.insert(slot.get());
        debug_assert!(inserted, "double release of bindless slot {}", slot.get());
        self.pending.push((slot.get(), None));
    }

    /// Apply queued descriptor writes
    pub fn flush(&mut self, device: &mut dyn GpuDevice) -> RenderResult<()> {
        for (slot, texture) in self.pending.drain(..) {
            device.write_texture_slot(slot, texture)?;
        }
        Ok(())
    }

    /// Number of queued descriptor writes
    pub fn pending_writes(&self) -> usize {
        self.pending.len()
    }

    /// Number of slots currently handed out
    pub fn live(&self) -> usize {
        self.next as usize - self.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::HeadlessDevice;

    #[test]
    fn slots_count_up_monotonically() {
        let mut table = BindlessTextureTable::new(16);
        assert_eq!(table.allocate(TextureId(10)), TextureSlot(0));
        assert_eq!(table.allocate(TextureId(11)), TextureSlot(1));
        assert_eq!(table.allocate(TextureId(12)), TextureSlot(2));
    }

    #[test]
    fn released_slots_are_recycled_lowest_first() {
        let mut table = BindlessTextureTable::new(16);
        let a = table.allocate(TextureId(1));
        let b = table.allocate(TextureId(2));
        table.allocate(TextureId(3));
        table.release(b);
        table.release(a);
        assert_eq!(table.allocate(TextureId(4)), a);
        assert_eq!(table.allocate(TextureId(5)), b);
        assert_eq!(table.allocate(TextureId(6)), TextureSlot(3));
    }

    #[test]
    fn flush_applies_queued_writes_once() {
        let mut device = HeadlessDevice::new(3);
        let mut table = BindlessTextureTable::new(16);
        let slot = table.allocate(TextureId(42));
        assert_eq!(table.pending_writes(), 1);
        table.flush(&mut device).unwrap();
        assert_eq!(table.pending_writes(), 0);
        assert_eq!(device.texture_slot(slot.get()), Some(TextureId(42)));

        table.release(slot);
        table.flush(&mut device).unwrap();
        assert_eq!(device.texture_slot(slot.get()), None);
    }

    #[test]
    #[should_panic(expected = "exhausted")]
    fn exhaustion_is_fatal() {
        let mut table = BindlessTextureTable::new(1);
        table.allocate(TextureId(1));
        table.allocate(TextureId(2));
    }
}
