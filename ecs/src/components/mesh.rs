//! Mesh component referencing GPU geometry owned by the renderer.

/// Opaque handle to mesh geometry uploaded by the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshHandle(u32);

impl MeshHandle {
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    pub fn index(&self) -> u32 {
        self.0
    }
}

/// Component that references a mesh for rendering.
///
/// ```
/// use cyclonite_ecs::components::{Mesh, MeshHandle};
///
/// let mesh = Mesh::new(MeshHandle::new(42), 36).with_cast_shadows(false);
/// assert!(!mesh.cast_shadows);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mesh {
    pub mesh: MeshHandle,
    /// Number of indices drawn for this mesh.
    pub index_count: u32,
    /// Local-space bounding sphere radius, used for shadow frustum fitting.
    pub bounding_radius: f32,
    pub cast_shadows: bool,
}

impl Mesh {
    #[inline]
    pub fn new(mesh: MeshHandle, index_count: u32) -> Self {
        Self {
            mesh,
            index_count,
            bounding_radius: 1.0,
            cast_shadows: true,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_cast_shadows(mut self, cast: bool) -> Self {
        self.cast_shadows = cast;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_bounding_radius(mut self, radius: f32) -> Self {
        self.bounding_radius = radius;
        self
    }
}
