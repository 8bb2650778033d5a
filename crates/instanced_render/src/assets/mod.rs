//! Mesh asset descriptions
//!
//! The renderer does not load files. Meshes arrive through the
//! [`MeshSource`] trait as already-resolved descriptions: per-batch index
//! and vertex ranges inside the geometry arena, plus a material handle per
//! batch. [`MeshLibrary`] is the in-memory implementation used by tests and
//! tooling.

use std::collections::HashMap;

use crate::render::{GeometryHandle, MaterialHandle};

/// Stable identifier of a mesh asset
///
/// Many instances may share one asset. The identifier never changes for the
/// lifetime of the asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssetId(pub u64);

/// Asset errors
#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    /// The source has no mesh for the requested identifier
    #[error("no mesh registered for asset {0:?}")]
    MissingMesh(AssetId),
}

/// One sub-mesh of an asset
///
/// Offsets are byte offsets into the shared geometry arena and must be
/// aligned to the owning mesh's index/vertex stride.
#[derive(Debug, Clone)]
pub struct SubMesh {
    /// Byte offset of the first index in the index arena
    pub index_offset: u32,
    /// Number of indices
    pub index_count: u32,
    /// Byte offset of the first vertex in the vertex arena
    pub vertex_offset: u32,
    /// Material applied to this sub-mesh
    pub material: MaterialHandle,
}

/// A fully resolved mesh asset
#[derive(Debug, Clone)]
pub struct MeshAsset {
    /// Sub-meshes, one draw batch each
    pub submeshes: Vec<SubMesh>,
    /// Size of one vertex in bytes
    pub vertex_stride: u32,
    /// Size of one index in bytes (2 or 4)
    pub index_stride: u32,
    /// Number of bones; zero for static meshes
    pub bone_count: u32,
    /// Bind-pose bone table in the data arena, if skeletal
    pub bone_table: Option<GeometryHandle>,
}

impl MeshAsset {
    /// Number of sub-mesh batches
    pub fn batch_count(&self) -> usize {
        self.submeshes.len()
    }

    /// Whether the asset carries skinning data
    pub fn is_skeletal(&self) -> bool {
        self.bone_count > 0
    }
}

/// Access to resolved mesh assets
pub trait MeshSource {
    /// Look up a mesh description by asset identifier
    fn mesh(&self, id: AssetId) -> Option<&MeshAsset>;
}

/// In-memory mesh source
#[derive(Debug, Default)]
pub struct MeshLibrary {
    meshes: HashMap<AssetId, MeshAsset>,
    next_id: u64,
}

impl MeshLibrary {
    /// Create an empty library
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a mesh, returning its new asset identifier
    pub fn insert(&mut self, mesh: MeshAsset) -> AssetId {
        let id = AssetId(self.next_id);
        self.next_id += 1;
        log::debug!(
            "registered asset {:?} with {} batch(es)",
            id,
            mesh.batch_count()
        );
        self.meshes.insert(id, mesh);
        id
    }

    /// Number of registered meshes
    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    /// Whether the library is empty
    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }
}

impl MeshSource for MeshLibrary {
    fn mesh(&self, id: AssetId) -> Option<&MeshAsset> {
        self.meshes.get(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad(material: MaterialHandle) -> MeshAsset {
        MeshAsset {
            submeshes: vec![SubMesh {
                index_offset: 0,
                index_count: 6,
                vertex_offset: 0,
                material,
            }],
            vertex_stride: 32,
            index_stride: 4,
            bone_count: 0,
            bone_table: None,
        }
    }

    #[test]
    fn library_hands_out_distinct_ids() {
        let mut library = MeshLibrary::new();
        let m = MaterialHandle(0);
        let a = library.insert(quad(m));
        let b = library.insert(quad(m));
        assert_ne!(a, b);
        assert_eq!(library.len(), 2);
    }

    #[test]
    fn lookup_roundtrips() {
        let mut library = MeshLibrary::new();
        let id = library.insert(quad(MaterialHandle(7)));
        let mesh = library.mesh(id).expect("registered mesh resolves");
        assert_eq!(mesh.batch_count(), 1);
        assert!(!mesh.is_skeletal());
        assert!(library.mesh(AssetId(999)).is_none());
    }
}
