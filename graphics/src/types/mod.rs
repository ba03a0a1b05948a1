//! Core graphics types shared by the registry, frame graph and backends.

mod descriptor;
mod state;

pub use descriptor::{
    BufferDescriptor, Extent3d, ImageDescriptor, ImageFormat, ResourceDescriptor, ResourceKind,
};
pub use state::{AccessFlags, ImageLayout, PipelineStages, QueueType, ResourceState};
