//! Renderable capabilities.
//!
//! An entity is drawn when it carries [`Transform`], [`Mesh`] and
//! [`Material`]; a [`Camera`] entity defines the view.

mod camera;
mod material;
mod mesh;
mod transform;

pub use camera::{Camera, CameraProjection};
pub use material::{AlphaMode, Material};
pub use mesh::{Mesh, MeshHandle};
pub use transform::Transform;
