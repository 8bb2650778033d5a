//! Frame-in-flight resource rings
//!
//! Up to [`MAX_FRAMES_IN_FLIGHT`] frames may be outstanding on the GPU while
//! the CPU prepares the next one. Every CPU-writable GPU resource therefore
//! exists once per ring slot, and mutations raise a dirty bit for every slot
//! so each slot re-derives its copy the next time it is acquired.

use crate::gfx::FrameIndex;

/// Number of frames that may be in flight simultaneously
///
/// Dirty-bit arrays and resource rings are fixed-size arrays of this length;
/// a configured `frames_in_flight` below this simply leaves slots unused.
pub const MAX_FRAMES_IN_FLIGHT: usize = 3;

/// One dirty bit per frame ring slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirtyBits([bool; MAX_FRAMES_IN_FLIGHT]);

impl DirtyBits {
    /// All slots dirty; freshly created state must be uploaded everywhere
    pub fn all_set() -> Self {
        Self([true; MAX_FRAMES_IN_FLIGHT])
    }

    /// All slots clean
    pub fn all_clear() -> Self {
        Self([false; MAX_FRAMES_IN_FLIGHT])
    }

    /// Mark every slot dirty
    pub fn raise_all(&mut self) {
        self.0 = [true; MAX_FRAMES_IN_FLIGHT];
    }

    /// Clear one slot
    pub fn clear(&mut self, frame: FrameIndex) {
        self.0[frame.get()] = false;
    }

    /// Whether one slot is dirty
    pub fn check(&self, frame: FrameIndex) -> bool {
        self.0[frame.get()]
    }

    /// Whether any slot is dirty
    pub fn any(&self) -> bool {
        self.0.iter().any(|&b| b)
    }
}

impl Default for DirtyBits {
    fn default() -> Self {
        Self::all_clear()
    }
}

/// A fixed array of per-frame resources indexed by [`FrameIndex`]
#[derive(Debug)]
pub struct FrameRing<T> {
    slots: [T; MAX_FRAMES_IN_FLIGHT],
}

impl<T> FrameRing<T> {
    /// Build a ring by calling `init` once per slot
    pub fn try_new_with<E>(mut init: impl FnMut(usize) -> Result<T, E>) -> Result<Self, E> {
        let mut slots = Vec::with_capacity(MAX_FRAMES_IN_FLIGHT);
        for i in 0..MAX_FRAMES_IN_FLIGHT {
            slots.push(init(i)?);
        }
        let Ok(slots) = slots.try_into() else {
            unreachable!("ring is always MAX_FRAMES_IN_FLIGHT slots");
        };
        Ok(Self { slots })
    }

    /// The resource for a frame slot
    pub fn get(&self, frame: FrameIndex) -> &T {
        &self.slots[frame.get()]
    }

    /// The resource for a frame slot, mutably
    pub fn get_mut(&mut self, frame: FrameIndex) -> &mut T {
        &mut self.slots[frame.get()]
    }

    /// Iterate over all slots
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.slots.iter()
    }
}
