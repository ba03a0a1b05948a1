//! Shared fixtures for the frame pipeline integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use cyclonite_graphics::backend::dummy::{BackendCall, DummyBackend};
use cyclonite_graphics::graph::{PassDeclaration, ResourceAccess};
use cyclonite_graphics::types::{ImageDescriptor, ImageFormat};
use cyclonite_graphics::{FrameContext, FramePipeline, GraphicsError, PipelineConfig, ResourceHandle};

/// Install `env_logger` once; `RUST_LOG` controls the output.
pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A pipeline over a fresh dummy backend.
pub fn pipeline(config: PipelineConfig) -> (Arc<DummyBackend>, FramePipeline) {
    init_logger();
    let backend = Arc::new(DummyBackend::new());
    let pipeline = FramePipeline::new(backend.clone(), config).expect("pipeline");
    (backend, pipeline)
}

pub fn default_config() -> PipelineConfig {
    PipelineConfig::default()
        .with_worker_count(2)
        .with_fence_timeout(Duration::from_secs(2))
}

/// Images of the shadow / lighting / present frame.
pub struct ForwardTargets {
    pub depth_map: ResourceHandle,
    pub color_buffer: ResourceHandle,
    pub output: ResourceHandle,
}

impl ForwardTargets {
    pub fn register(pipeline: &mut FramePipeline) -> Self {
        let registry = pipeline.registry_mut();
        Self {
            depth_map: registry
                .register_image(ImageDescriptor::new_2d(1024, 1024, ImageFormat::Depth32Float)),
            color_buffer: registry
                .register_image(ImageDescriptor::new_2d(640, 480, ImageFormat::Rgba16Float)),
            output: registry
                .register_image(ImageDescriptor::new_2d(640, 480, ImageFormat::Rgba8Unorm)),
        }
    }

    /// Declare `Shadow -> Lighting -> Present`, each pass drawing once.
    pub fn declare(
        &self,
        pipeline: &FramePipeline,
        frame: &mut FrameContext,
    ) -> Result<(), GraphicsError> {
        pipeline.declare_pass(
            frame,
            PassDeclaration::new("shadow")
                .writes(self.depth_map, ResourceAccess::DepthStencilWrite)
                .with_work(|recorder| recorder.draw(36, 1)),
        )?;
        pipeline.declare_pass(
            frame,
            PassDeclaration::new("lighting")
                .reads(self.depth_map, ResourceAccess::FragmentShaderRead)
                .writes(self.color_buffer, ResourceAccess::ColorAttachmentWrite)
                .with_work(|recorder| recorder.draw(36, 1)),
        )?;
        pipeline.declare_pass(
            frame,
            PassDeclaration::new("present")
                .reads(self.color_buffer, ResourceAccess::FragmentShaderRead)
                .writes(self.output, ResourceAccess::ColorAttachmentWrite)
                .with_work(|recorder| recorder.draw(3, 1)),
        )?;
        Ok(())
    }
}

/// Number of queue submissions in a call log.
pub fn submit_count(calls: &[BackendCall]) -> usize {
    calls
        .iter()
        .filter(|c| matches!(c, BackendCall::Submit { .. }))
        .count()
}
