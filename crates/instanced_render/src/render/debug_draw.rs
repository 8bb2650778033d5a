//! Debug draw queue
//!
//! World-space line segments accumulated by gameplay and tooling code over
//! a frame. The renderer drains the queue at the end of every frame;
//! nothing persists across frames.

use crate::foundation::math::Vec3;

/// One world-space line segment
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DebugLine {
    /// Segment start
    pub from: Vec3,
    /// Segment end
    pub to: Vec3,
    /// RGBA color
    pub color: [f32; 4],
}

/// Frame-scoped accumulator of debug geometry
#[derive(Debug, Default)]
pub struct DebugDrawQueue {
    lines: Vec<DebugLine>,
}

impl DebugDrawQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a line segment for this frame
    pub fn line(&mut self, from: Vec3, to: Vec3, color: [f32; 4]) {
        self.lines.push(DebugLine { from, to, color });
    }

    /// Queue an axis-aligned box outline for this frame
    pub fn aabb(&mut self, min: Vec3, max: Vec3, color: [f32; 4]) {
        let corners = [
            Vec3::new(min.x, min.y, min.z),
            Vec3::new(max.x, min.y, min.z),
            Vec3::new(max.x, max.y, min.z),
            Vec3::new(min.x, max.y, min.z),
            Vec3::new(min.x, min.y, max.z),
            Vec3::new(max.x, min.y, max.z),
            Vec3::new(max.x, max.y, max.z),
            Vec3::new(min.x, max.y, max.z),
        ];
        const EDGES: [(usize, usize); 12] = [
            (0, 1), (1, 2), (2, 3), (3, 0),
            (4, 5), (5, 6), (6, 7), (7, 4),
            (0, 4), (1, 5), (2, 6), (3, 7),
        ];
        for (a, b) in EDGES {
            self.line(corners[a], corners[b], color);
        }
    }

    /// Lines accumulated so far this frame
    pub fn lines(&self) -> &[DebugLine] {
        &self.lines
    }

    /// Drop everything; called once per frame by the renderer
    pub fn clear(&mut self) {
        self.lines.clear();
    }
}
