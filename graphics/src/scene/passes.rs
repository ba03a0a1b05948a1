//! The standard forward frame declared from an extracted scene.

use std::sync::Arc;

use crate::error::GraphicsError;
use crate::graph::{NodeId, PassDeclaration, ResourceAccess};
use crate::pipeline::{FrameContext, FramePipeline};
use crate::registry::{ResourceHandle, ResourceRegistry};
use crate::types::{ImageDescriptor, ImageFormat};

use super::{ExtractedScene, SceneUploads};

/// Shadow map resolution used by [`ScenePasses::create`].
pub const SHADOW_MAP_SIZE: u32 = 2048;

/// Node ids of the passes declared for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScenePassIds {
    /// `None` when nothing casts a shadow.
    pub shadow: Option<NodeId>,
    pub lighting: NodeId,
    pub present: NodeId,
}

/// Declares the forward frame over three images:
///
/// ```text
/// Shadow ──depth_map──► Lighting ──color_buffer──► Present ──► swapchain
/// ```
///
/// The shadow pass is only declared when a renderable casts shadows. With
/// [`with_uploads`](Self::with_uploads) the geometry passes also read the
/// instance data and draw arguments uploaded ahead of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScenePasses {
    pub depth_map: ResourceHandle,
    pub color_buffer: ResourceHandle,
    pub swapchain: ResourceHandle,
    /// Instance data and indirect draw argument buffers.
    pub uploads: Option<(ResourceHandle, ResourceHandle)>,
}

impl ScenePasses {
    pub fn new(
        depth_map: ResourceHandle,
        color_buffer: ResourceHandle,
        swapchain: ResourceHandle,
    ) -> Self {
        Self {
            depth_map,
            color_buffer,
            swapchain,
            uploads: None,
        }
    }

    /// Read the buffers filled by `uploads` from the geometry passes.
    pub fn with_uploads(mut self, uploads: &SceneUploads) -> Self {
        self.uploads = Some((uploads.instances, uploads.draw_args));
        self
    }

    fn read_uploads(&self, pass: PassDeclaration) -> PassDeclaration {
        match self.uploads {
            Some((instances, draw_args)) => pass
                .reads(instances, ResourceAccess::VertexBuffer)
                .reads(draw_args, ResourceAccess::IndirectRead),
            None => pass,
        }
    }

    /// Register the shadow map and the HDR color buffer for a `width` by
    /// `height` target. `swapchain` must already be registered as external.
    pub fn create(
        registry: &mut ResourceRegistry,
        width: u32,
        height: u32,
        swapchain: ResourceHandle,
    ) -> Self {
        let depth_map = registry.register_image(ImageDescriptor::new_2d(
            SHADOW_MAP_SIZE,
            SHADOW_MAP_SIZE,
            ImageFormat::Depth32Float,
        ));
        let color_buffer = registry.register_image(ImageDescriptor::new_2d(
            width,
            height,
            ImageFormat::Rgba16Float,
        ));
        Self::new(depth_map, color_buffer, swapchain)
    }

    /// Declare the frame's passes. Each pass records one draw per item it
    /// renders.
    pub fn declare(
        &self,
        pipeline: &FramePipeline,
        frame: &mut FrameContext,
        scene: &Arc<ExtractedScene>,
    ) -> Result<ScenePassIds, GraphicsError> {
        let shadows = scene.has_shadow_casters();

        let shadow = if shadows {
            let scene = Arc::clone(scene);
            let pass = self
                .read_uploads(PassDeclaration::new("shadow"))
                .writes(self.depth_map, ResourceAccess::DepthStencilWrite)
                .with_work(move |recorder| {
                    for item in scene.shadow_casters() {
                        recorder.draw(item.index_count, 1)?;
                    }
                    Ok(())
                });
            Some(pipeline.declare_pass(frame, pass)?)
        } else {
            None
        };

        let mut lighting = self.read_uploads(PassDeclaration::new("lighting"));
        if shadows {
            lighting = lighting.reads(self.depth_map, ResourceAccess::FragmentShaderRead);
        }
        let draw_scene = Arc::clone(scene);
        let lighting = lighting
            .writes(self.color_buffer, ResourceAccess::ColorAttachmentWrite)
            .with_work(move |recorder| {
                for item in draw_scene.items() {
                    recorder.draw(item.index_count, 1)?;
                }
                Ok(())
            });
        let lighting = pipeline.declare_pass(frame, lighting)?;

        let present = PassDeclaration::new("present")
            .reads(self.color_buffer, ResourceAccess::FragmentShaderRead)
            .writes(self.swapchain, ResourceAccess::ColorAttachmentWrite)
            .with_work(|recorder| {
                // Fullscreen triangle.
                recorder.draw(3, 1)
            });
        let present = pipeline.declare_pass(frame, present)?;

        Ok(ScenePassIds {
            shadow,
            lighting,
            present,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyBackend;
    use crate::config::PipelineConfig;
    use crate::types::ResourceState;
    use cyclonite_ecs::World;
    use cyclonite_ecs::components::{Material, Mesh, MeshHandle, Transform};

    fn setup() -> (FramePipeline, ScenePasses) {
        let mut pipeline =
            FramePipeline::new(Arc::new(DummyBackend::new()), PipelineConfig::default()).unwrap();
        let registry = pipeline.registry_mut();
        let swapchain = registry.register_external(
            ImageDescriptor::new_2d(800, 600, ImageFormat::Bgra8UnormSrgb),
            ResourceState::acquired_swapchain(),
        );
        let passes = ScenePasses::create(registry, 800, 600, swapchain);
        (pipeline, passes)
    }

    fn scene(cast_shadows: bool) -> Arc<ExtractedScene> {
        let mut world = World::new();
        let entity = world.spawn();
        world.insert(entity, Transform::IDENTITY).unwrap();
        world
            .insert(entity, Mesh::new(MeshHandle::new(0), 36).with_cast_shadows(cast_shadows))
            .unwrap();
        world.insert(entity, Material::default()).unwrap();
        Arc::new(ExtractedScene::extract(&world, 4.0 / 3.0))
    }

    #[test]
    fn test_forward_frame_with_shadows() {
        let (mut pipeline, passes) = setup();
        let mut frame = pipeline.begin_frame().unwrap();
        let ids = passes.declare(&pipeline, &mut frame, &scene(true)).unwrap();
        assert!(ids.shadow.is_some());
        assert_eq!(frame.pass_count(), 3);

        pipeline.end_frame(frame).unwrap();
        let stats = pipeline.last_frame_stats().unwrap();
        assert_eq!(stats.pass_count, 3);
        assert_eq!(stats.edge_count, 2);
        // One draw each for shadow and lighting, plus the fullscreen triangle.
        assert_eq!(stats.command_count, 3);
    }

    #[test]
    fn test_geometry_passes_wait_for_uploads() {
        let (mut pipeline, passes) = setup();
        let mut uploads = SceneUploads::create(pipeline.registry_mut(), 8);
        let passes = passes.with_uploads(&uploads);
        let scene = scene(true);
        uploads.prepare(&mut pipeline, &scene, 1).unwrap();

        let mut frame = pipeline.begin_frame().unwrap();
        let upload_ids = uploads.declare(&pipeline, &mut frame, &scene).unwrap();
        let ids = passes.declare(&pipeline, &mut frame, &scene).unwrap();
        assert_eq!(frame.pass_count(), 5);
        pipeline.end_frame(frame).unwrap();

        let stats = pipeline.last_frame_stats().unwrap();
        // Both uploads feed shadow and lighting, plus the forward chain.
        assert_eq!(stats.edge_count, 6);
        assert!(upload_ids.draw_args.is_some());
        assert!(ids.shadow.is_some());
    }

    #[test]
    fn test_shadow_pass_skipped_without_casters() {
        let (mut pipeline, passes) = setup();
        let mut frame = pipeline.begin_frame().unwrap();
        let ids = passes.declare(&pipeline, &mut frame, &scene(false)).unwrap();
        assert_eq!(ids.shadow, None);
        assert_eq!(frame.pass_count(), 2);
        pipeline.end_frame(frame).unwrap();
    }
}
