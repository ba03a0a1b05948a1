//! Render data extracted from ECS components.
//!
//! Extraction copies what the passes need out of the [`World`] so recording
//! workers never touch the world while the simulation keeps running.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

use cyclonite_ecs::components::{Camera, Material, Mesh, MeshHandle, Transform};
use cyclonite_ecs::{Entity, World};

/// Per-instance data uploaded for each drawn renderable.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct InstanceData {
    pub model: [[f32; 4]; 4],
    pub base_color: [f32; 4],
    /// x: metallic, y: roughness, zw: unused.
    pub surface: [f32; 4],
}

impl InstanceData {
    pub fn new(model: Mat4, material: &Material) -> Self {
        Self {
            model: model.to_cols_array_2d(),
            base_color: material.base_color.to_array(),
            surface: [material.metallic, material.roughness, 0.0, 0.0],
        }
    }
}

/// A single drawable copied out of the world.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderItem {
    pub entity: Entity,
    pub mesh: MeshHandle,
    pub index_count: u32,
    pub cast_shadows: bool,
    pub world_position: Vec3,
    pub instance: InstanceData,
}

/// Camera data for the frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtractedView {
    pub entity: Entity,
    pub view_projection: Mat4,
    pub position: Vec3,
}

/// Snapshot of the renderables and the active camera of a [`World`].
///
/// Opaque items keep the world's iteration order. Transparent items are
/// sorted back-to-front relative to the camera.
#[derive(Debug, Default, Clone)]
pub struct ExtractedScene {
    opaque: Vec<RenderItem>,
    transparent: Vec<RenderItem>,
    view: Option<ExtractedView>,
}

impl ExtractedScene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extract every entity holding a `Transform`, a `Mesh` and a `Material`,
    /// plus the active camera with the highest order.
    pub fn extract(world: &World, aspect_ratio: f32) -> Self {
        cyclonite_core::profile_function!();

        let mut scene = Self::new();
        scene.view = world
            .query2::<Transform, Camera>()
            .filter(|(_, _, camera)| camera.is_active)
            .max_by_key(|(_, _, camera)| camera.order)
            .map(|(entity, transform, camera)| ExtractedView {
                entity,
                view_projection: camera.view_projection(transform, aspect_ratio),
                position: transform.translation,
            });

        for (entity, transform, mesh, material) in world.query3::<Transform, Mesh, Material>() {
            scene.push(entity, transform, mesh, material);
        }

        if let Some(eye) = scene.view.map(|v| v.position) {
            scene.transparent.sort_by(|a, b| {
                let da = a.world_position.distance_squared(eye);
                let db = b.world_position.distance_squared(eye);
                db.total_cmp(&da)
            });
        }

        log::trace!(
            "Extracted {} opaque and {} transparent items",
            scene.opaque.len(),
            scene.transparent.len()
        );
        scene
    }

    fn push(&mut self, entity: Entity, transform: &Transform, mesh: &Mesh, material: &Material) {
        let model = transform.compute_matrix();
        let item = RenderItem {
            entity,
            mesh: mesh.mesh,
            index_count: mesh.index_count,
            // Blended geometry does not write depth, so it casts no shadow.
            cast_shadows: mesh.cast_shadows && !material.is_transparent(),
            world_position: model.w_axis.truncate(),
            instance: InstanceData::new(model, material),
        };
        if material.is_transparent() {
            self.transparent.push(item);
        } else {
            self.opaque.push(item);
        }
    }

    pub fn opaque_items(&self) -> &[RenderItem] {
        &self.opaque
    }

    /// Transparent items, back-to-front.
    pub fn transparent_items(&self) -> &[RenderItem] {
        &self.transparent
    }

    pub fn items(&self) -> impl Iterator<Item = &RenderItem> {
        self.opaque.iter().chain(self.transparent.iter())
    }

    pub fn shadow_casters(&self) -> impl Iterator<Item = &RenderItem> {
        self.items().filter(|item| item.cast_shadows)
    }

    /// Check if any renderable casts a shadow, which enables the shadow pass.
    pub fn has_shadow_casters(&self) -> bool {
        self.shadow_casters().next().is_some()
    }

    pub fn view(&self) -> Option<&ExtractedView> {
        self.view.as_ref()
    }

    /// Background color used when nothing is drawn.
    pub fn clear_color(&self) -> Vec4 {
        Vec4::new(0.0, 0.0, 0.0, 1.0)
    }

    pub fn len(&self) -> usize {
        self.opaque.len() + self.transparent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Instance data of every item in draw order, ready for upload.
    pub fn instance_data(&self) -> Vec<InstanceData> {
        self.items().map(|item| item.instance).collect()
    }

    pub fn clear(&mut self) {
        self.opaque.clear();
        self.transparent.clear();
        self.view = None;
    }
}
