//! # Cyclonite Graphics
//!
//! Frame rendering pipeline: passes declared each frame are ordered by the
//! resources they touch, recorded in parallel, synchronized and submitted to
//! the GPU with several frames in flight.
//!
//! ## Overview
//!
//! | Module | Role |
//! |--------|------|
//! | [`registry`] | Resource handles and their last known GPU state |
//! | [`graph`] | Pass declarations resolved into a dependency graph |
//! | [`scheduler`] | Parallel command recording over the task-graph pool |
//! | [`sync`] | Barriers, layout transitions and semaphores between passes |
//! | [`submit`] | Grouping of recorded work into queue submissions |
//! | [`pipeline`] | Frame coordinator with in-flight slots and fences |
//! | [`scene`] | ECS renderables turned into the standard forward frame |
//! | [`backend`] | `GpuBackend` trait, dummy and Vulkan implementations |
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use cyclonite_graphics::backend::dummy::DummyBackend;
//! use cyclonite_graphics::graph::{PassDeclaration, ResourceAccess};
//! use cyclonite_graphics::types::{ImageDescriptor, ImageFormat};
//! use cyclonite_graphics::{FramePipeline, PipelineConfig};
//!
//! let mut pipeline = FramePipeline::new(Arc::new(DummyBackend::new()), PipelineConfig::default())?;
//! let depth = pipeline
//!     .registry_mut()
//!     .register_image(ImageDescriptor::new_2d(1024, 1024, ImageFormat::Depth32Float));
//!
//! let mut frame = pipeline.begin_frame()?;
//! pipeline.declare_pass(
//!     &mut frame,
//!     PassDeclaration::new("shadow").writes(depth, ResourceAccess::DepthStencilWrite),
//! )?;
//! let fence = pipeline.end_frame(frame)?;
//! fence.wait(std::time::Duration::from_secs(1))?;
//! # Ok::<(), cyclonite_graphics::GraphicsError>(())
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod graph;
pub mod pipeline;
pub mod profiling;
pub mod registry;
pub mod scene;
pub mod scheduler;
pub mod submit;
pub mod sync;
pub mod types;

// Re-export main types for convenience
pub use backend::{BackendError, GpuBackend};
pub use config::PipelineConfig;
pub use error::GraphicsError;
pub use graph::{FrameGraph, FrameGraphBuilder, NodeId, PassDeclaration, ResourceAccess};
pub use pipeline::{FrameContext, FrameFence, FramePipeline, FrameState, FrameStats};
pub use registry::{ResourceHandle, ResourceRegistry};
pub use scene::{ExtractedScene, ScenePasses, SceneUploads};
pub use sync::{SyncManager, SyncPlan};
pub use types::{ImageLayout, QueueType, ResourceState};

/// Graphics library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log the graphics library version.
pub fn init() {
    log::info!("Cyclonite Graphics v{} initialized", VERSION);
}
