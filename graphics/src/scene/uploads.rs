//! Scene data uploads that feed the forward passes.
//!
//! Two kinds of transfer work run ahead of the draws each frame:
//!
//! | Buffer | Changes | Commands |
//! |--------|---------|----------|
//! | indirect draw arguments | when the scene layout version changes | persistent, re-recorded on change |
//! | instance data | every frame | transient, recorded with the frame |
//!
//! Both passes prefer the transfer queue. The draws that read the buffers
//! wait on them through the regular cross-queue synchronization.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};

use crate::backend::GpuCommandBuffer;
use crate::error::GraphicsError;
use crate::graph::{NodeId, PassDeclaration, ResourceAccess};
use crate::pipeline::{FrameContext, FramePipeline};
use crate::registry::{ResourceHandle, ResourceRegistry};
use crate::types::{BufferDescriptor, QueueType};

use super::{ExtractedScene, InstanceData};

/// Layout of `VkDrawIndexedIndirectCommand`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawIndexedIndirect {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub vertex_offset: i32,
    pub first_instance: u32,
}

/// Node ids of the upload passes declared for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UploadPassIds {
    pub draw_args: Option<NodeId>,
    pub instances: Option<NodeId>,
}

/// Owns the instance and draw-argument buffers of a scene and the
/// persistent commands that fill the latter.
#[derive(Debug)]
pub struct SceneUploads {
    pub instances: ResourceHandle,
    pub draw_args: ResourceHandle,
    capacity: usize,
    /// Persistent draw-argument upload and the layout version it was
    /// recorded for.
    draw_args_upload: Option<(u64, GpuCommandBuffer)>,
}

impl SceneUploads {
    /// Register buffers for up to `capacity` renderables.
    pub fn create(registry: &mut ResourceRegistry, capacity: usize) -> Self {
        let instances = registry.register_buffer(
            BufferDescriptor::new((capacity * size_of::<InstanceData>()) as u64)
                .with_label("instance_data"),
        );
        let draw_args = registry.register_buffer(
            BufferDescriptor::new((capacity * size_of::<DrawIndexedIndirect>()) as u64)
                .with_label("draw_args"),
        );
        Self {
            instances,
            draw_args,
            capacity,
            draw_args_upload: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Version the current draw-argument upload was recorded for.
    pub fn draw_args_version(&self) -> Option<u64> {
        self.draw_args_upload.map(|(version, _)| version)
    }

    /// Re-record the draw-argument upload if `layout_version` differs from
    /// the recorded one. The replaced commands are released once no frame
    /// in flight uses them.
    pub fn prepare(
        &mut self,
        pipeline: &mut FramePipeline,
        scene: &ExtractedScene,
        layout_version: u64,
    ) -> Result<(), GraphicsError> {
        if self.draw_args_version() == Some(layout_version) {
            return Ok(());
        }
        self.check_capacity(scene)?;

        let args = draw_arguments(scene);
        let buffer = pipeline.registry().native(self.draw_args)?;
        let commands = pipeline.record_persistent_commands(
            "draw_args_upload",
            QueueType::Transfer,
            move |recorder| {
                if args.is_empty() {
                    return Ok(());
                }
                recorder.update_buffer(buffer, 0, bytemuck::cast_slice(&args))
            },
        )?;

        if let Some((old_version, old)) = self.draw_args_upload.replace((layout_version, commands)) {
            log::debug!(
                "SceneUploads: draw arguments re-recorded (version {} -> {})",
                old_version,
                layout_version
            );
            pipeline.release_persistent_commands(old);
        }
        Ok(())
    }

    /// Declare the upload passes. Call before the passes reading the
    /// buffers.
    pub fn declare(
        &self,
        pipeline: &FramePipeline,
        frame: &mut FrameContext,
        scene: &Arc<ExtractedScene>,
    ) -> Result<UploadPassIds, GraphicsError> {
        self.check_capacity(scene)?;
        let mut ids = UploadPassIds::default();

        if let Some((_, commands)) = self.draw_args_upload {
            let pass = PassDeclaration::new("draw_args_upload")
                .on_queue(QueueType::Transfer)
                .writes(self.draw_args, ResourceAccess::TransferWrite)
                .with_persistent_commands(commands);
            ids.draw_args = Some(pipeline.declare_pass(frame, pass)?);
        }

        if !scene.is_empty() {
            let buffer = pipeline.registry().native(self.instances)?;
            let scene = Arc::clone(scene);
            let pass = PassDeclaration::new("instance_upload")
                .on_queue(QueueType::Transfer)
                .writes(self.instances, ResourceAccess::TransferWrite)
                .with_work(move |recorder| {
                    let data = scene.instance_data();
                    recorder.update_buffer(buffer, 0, bytemuck::cast_slice(&data))
                });
            ids.instances = Some(pipeline.declare_pass(frame, pass)?);
        }

        Ok(ids)
    }

    /// Release the buffers and the persistent commands.
    pub fn release(self, pipeline: &mut FramePipeline) -> Result<(), GraphicsError> {
        if let Some((_, commands)) = self.draw_args_upload {
            pipeline.release_persistent_commands(commands);
        }
        pipeline.release_resource(self.instances)?;
        pipeline.release_resource(self.draw_args)
    }

    fn check_capacity(&self, scene: &ExtractedScene) -> Result<(), GraphicsError> {
        if scene.len() > self.capacity {
            return Err(GraphicsError::InvalidState(format!(
                "{} renderables exceed the upload capacity of {}",
                scene.len(),
                self.capacity
            )));
        }
        Ok(())
    }
}

/// One indexed draw per item, each instancing its own slot of the
/// instance buffer.
fn draw_arguments(scene: &ExtractedScene) -> Vec<DrawIndexedIndirect> {
    scene
        .items()
        .enumerate()
        .map(|(index, item)| DrawIndexedIndirect {
            index_count: item.index_count,
            instance_count: 1,
            first_index: 0,
            vertex_offset: 0,
            first_instance: index as u32,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::{DummyBackend, RecordedCommand};
    use crate::config::PipelineConfig;
    use cyclonite_ecs::World;
    use cyclonite_ecs::components::{Material, Mesh, MeshHandle, Transform};

    fn scene(count: u32) -> Arc<ExtractedScene> {
        let mut world = World::new();
        for i in 0..count {
            let entity = world.spawn();
            world.insert(entity, Transform::from_xyz(i as f32, 0.0, 0.0)).unwrap();
            world.insert(entity, Mesh::new(MeshHandle::new(0), 36)).unwrap();
            world.insert(entity, Material::default()).unwrap();
        }
        Arc::new(ExtractedScene::extract(&world, 1.0))
    }

    fn setup(cross_queue: bool) -> (Arc<DummyBackend>, FramePipeline, SceneUploads) {
        let backend = Arc::new(DummyBackend::new());
        let config = PipelineConfig::default().with_cross_queue(cross_queue);
        let mut pipeline = FramePipeline::new(backend.clone(), config).unwrap();
        let uploads = SceneUploads::create(pipeline.registry_mut(), 16);
        pipeline.registry_mut().bind_native(uploads.instances, 11).unwrap();
        pipeline.registry_mut().bind_native(uploads.draw_args, 12).unwrap();
        (backend, pipeline, uploads)
    }

    #[test]
    fn test_draw_args_rerecorded_only_on_version_change() {
        let (backend, mut pipeline, mut uploads) = setup(true);
        let scene = scene(3);

        uploads.prepare(&mut pipeline, &scene, 1).unwrap();
        let (_, first) = uploads.draw_args_upload.unwrap();
        assert_eq!(first.queue(), QueueType::Transfer);
        assert_eq!(
            backend.recorded_commands(first).unwrap(),
            vec![RecordedCommand::UpdateBuffer {
                buffer: 12,
                offset: 0,
                size: 3 * size_of::<DrawIndexedIndirect>()
            }]
        );

        uploads.prepare(&mut pipeline, &scene, 1).unwrap();
        assert_eq!(uploads.draw_args_upload.map(|(_, c)| c), Some(first));

        // Nothing in flight, so the old commands go right away.
        uploads.prepare(&mut pipeline, &scene, 2).unwrap();
        assert_eq!(uploads.draw_args_version(), Some(2));
        assert!(backend.recorded_commands(first).is_none());
    }

    #[test]
    fn test_upload_passes_precede_draws() {
        let (backend, mut pipeline, mut uploads) = setup(true);
        let scene = scene(4);
        uploads.prepare(&mut pipeline, &scene, 1).unwrap();

        let mut frame = pipeline.begin_frame().unwrap();
        let ids = uploads.declare(&pipeline, &mut frame, &scene).unwrap();
        let draw = pipeline
            .declare_pass(
                &mut frame,
                PassDeclaration::new("draw")
                    .reads(uploads.instances, ResourceAccess::VertexBuffer)
                    .reads(uploads.draw_args, ResourceAccess::IndirectRead)
                    .with_work(|r| r.draw(36, 4)),
            )
            .unwrap();
        assert_eq!(ids.draw_args.map(|id| id.index()), Some(0));
        assert_eq!(ids.instances.map(|id| id.index()), Some(1));
        assert_eq!(draw.index(), 2);
        pipeline.end_frame(frame).unwrap();

        let stats = pipeline.last_frame_stats().unwrap();
        assert_eq!(stats.edge_count, 2);
        // Instance upload and draw; the persistent upload records nothing.
        assert_eq!(stats.command_count, 2);
        assert!(
            backend
                .submissions()
                .iter()
                .any(|s| s.queue == QueueType::Transfer)
        );
    }

    #[test]
    fn test_capacity_is_enforced() {
        let (_backend, mut pipeline, mut uploads) = setup(false);
        let err = uploads.prepare(&mut pipeline, &scene(17), 1).unwrap_err();
        assert!(matches!(err, GraphicsError::InvalidState(_)));
    }

    #[test]
    fn test_empty_scene_declares_no_instance_upload() {
        let (_backend, mut pipeline, uploads) = setup(false);
        let mut frame = pipeline.begin_frame().unwrap();
        let ids = uploads.declare(&pipeline, &mut frame, &scene(0)).unwrap();
        assert_eq!(ids, UploadPassIds::default());
        pipeline.abort_frame(frame).unwrap();
    }
}
