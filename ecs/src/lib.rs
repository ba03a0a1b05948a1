//! # Cyclonite ECS
//!
//! Entity-component storage consumed by the renderer's scene traversal.
//!
//! | Type | Role |
//! |------|------|
//! | [`Entity`] | Slot index plus generation, stale handles never alias |
//! | [`SparseSet`] | Per-component sparse → dense storage with swap-remove |
//! | [`World`] | Entity allocator plus one sparse set per component type |
//! | [`components`] | Renderable capabilities: transform, mesh, material, camera |
//!
//! Entities are composed from components rather than inheriting from a
//! renderable base type; a renderable is any entity holding a
//! [`Transform`](components::Transform), a [`Mesh`](components::Mesh) and a
//! [`Material`](components::Material).
//!
//! ```
//! use cyclonite_ecs::World;
//! use cyclonite_ecs::components::{Material, Mesh, MeshHandle, Transform};
//!
//! let mut world = World::new();
//! let cube = world.spawn();
//! world.insert(cube, Transform::from_xyz(0.0, 1.0, 0.0)).unwrap();
//! world.insert(cube, Mesh::new(MeshHandle::new(0), 36)).unwrap();
//! world.insert(cube, Material::default()).unwrap();
//!
//! assert_eq!(world.query3::<Transform, Mesh, Material>().count(), 1);
//! ```

pub mod components;
mod entity;
mod sparse_set;
mod world;

pub use entity::Entity;
pub use sparse_set::SparseSet;
pub use world::{EcsError, World};
