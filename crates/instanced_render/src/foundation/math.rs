//! Math utilities and types
//!
//! Provides the fundamental math types used by the rendering pipeline.

pub use nalgebra::{Matrix4, Quaternion, Unit, Vector3, Vector4};

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4D vector type
pub type Vec4 = Vector4<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// Quaternion type for rotations
pub type Quat = Unit<Quaternion<f32>>;

/// Transform representing position, rotation, and scale
#[derive(Debug, Clone, PartialEq)]
pub struct Transform {
    /// Position in 3D space
    pub position: Vec3,

    /// Rotation quaternion
    pub rotation: Quat,

    /// Scale factors
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::zeros(),
            rotation: Quat::identity(),
            scale: Vec3::new(1.0, 1.0, 1.0),
        }
    }
}

impl Transform {
    /// Create a new identity transform
    pub fn identity() -> Self {
        Self::default()
    }

    /// Create a transform with only position
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    /// Create a transform with position and rotation
    pub fn from_position_rotation(position: Vec3, rotation: Quat) -> Self {
        Self {
            position,
            rotation,
            ..Default::default()
        }
    }

    /// Convert to a transformation matrix
    pub fn to_matrix(&self) -> Mat4 {
        Mat4::new_translation(&self.position)
            * self.rotation.to_homogeneous()
            * Mat4::new_nonuniform_scaling(&self.scale)
    }

    /// Column-major array form, suitable for GPU upload
    pub fn to_column_arrays(&self) -> [[f32; 4]; 4] {
        let m = self.to_matrix();
        let mut out = [[0.0f32; 4]; 4];
        for (c, col) in m.column_iter().enumerate() {
            for r in 0..4 {
                out[c][r] = col[r];
            }
        }
        out
    }
}

/// Column-major array form of an arbitrary matrix
pub fn matrix_to_column_arrays(m: &Mat4) -> [[f32; 4]; 4] {
    let mut out = [[0.0f32; 4]; 4];
    for (c, col) in m.column_iter().enumerate() {
        for r in 0..4 {
            out[c][r] = col[r];
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn transform_translation_lands_in_last_column() {
        let t = Transform::from_position(Vec3::new(1.0, 2.0, 3.0));
        let cols = t.to_column_arrays();
        assert_relative_eq!(cols[3][0], 1.0);
        assert_relative_eq!(cols[3][1], 2.0);
        assert_relative_eq!(cols[3][2], 3.0);
        assert_relative_eq!(cols[3][3], 1.0);
    }

    #[test]
    fn identity_transform_is_identity_matrix() {
        let m = Transform::identity().to_matrix();
        assert_relative_eq!(m, Mat4::identity());
    }
}
