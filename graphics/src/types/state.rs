//! Resource usage state: image layout, pipeline stages, access mask and
//! owning queue.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Pipeline stages at which a resource is accessed.
    ///
    /// Mirrors the Vulkan synchronization2 stage flags used by the pipeline.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PipelineStages: u32 {
        const TOP_OF_PIPE = 1 << 0;
        const DRAW_INDIRECT = 1 << 1;
        const VERTEX_INPUT = 1 << 2;
        const VERTEX_SHADER = 1 << 3;
        const EARLY_FRAGMENT_TESTS = 1 << 4;
        const FRAGMENT_SHADER = 1 << 5;
        const LATE_FRAGMENT_TESTS = 1 << 6;
        const COLOR_ATTACHMENT_OUTPUT = 1 << 7;
        const COMPUTE_SHADER = 1 << 8;
        const TRANSFER = 1 << 9;
        const BOTTOM_OF_PIPE = 1 << 10;
        const ALL_COMMANDS = 1 << 11;
    }
}

bitflags! {
    /// Memory access types performed on a resource.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AccessFlags: u32 {
        const INDIRECT_COMMAND_READ = 1 << 0;
        const INDEX_READ = 1 << 1;
        const VERTEX_ATTRIBUTE_READ = 1 << 2;
        const UNIFORM_READ = 1 << 3;
        const SHADER_READ = 1 << 4;
        const SHADER_WRITE = 1 << 5;
        const COLOR_ATTACHMENT_READ = 1 << 6;
        const COLOR_ATTACHMENT_WRITE = 1 << 7;
        const DEPTH_STENCIL_ATTACHMENT_READ = 1 << 8;
        const DEPTH_STENCIL_ATTACHMENT_WRITE = 1 << 9;
        const TRANSFER_READ = 1 << 10;
        const TRANSFER_WRITE = 1 << 11;
        const MEMORY_READ = 1 << 12;
        const MEMORY_WRITE = 1 << 13;

        const ALL_WRITES = Self::SHADER_WRITE.bits()
            | Self::COLOR_ATTACHMENT_WRITE.bits()
            | Self::DEPTH_STENCIL_ATTACHMENT_WRITE.bits()
            | Self::TRANSFER_WRITE.bits()
            | Self::MEMORY_WRITE.bits();
    }
}

impl AccessFlags {
    /// Check if any write access is included.
    pub fn has_writes(self) -> bool {
        self.intersects(Self::ALL_WRITES)
    }

    /// Check if any read access is included.
    pub fn has_reads(self) -> bool {
        !(self - Self::ALL_WRITES).is_empty()
    }

    /// Only the write bits, which are what a barrier must make available.
    pub fn writes(self) -> Self {
        self & Self::ALL_WRITES
    }
}

/// Image layout states.
///
/// Buffers have no layout and always report [`ImageLayout::Undefined`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ImageLayout {
    /// Contents undefined. Can transition to any layout.
    #[default]
    Undefined,
    /// Least optimal but valid for every access (storage images, feedback loops).
    General,
    ColorAttachment,
    DepthStencilAttachment,
    DepthStencilReadOnly,
    ShaderReadOnly,
    TransferSrc,
    TransferDst,
    /// Ready to be handed to the presentation engine.
    PresentSrc,
}

/// Queue a pass executes on.
///
/// Each queue type maps to one queue family in the backend. Passes on
/// different queue types need ownership transfers and semaphores between
/// them.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub enum QueueType {
    #[default]
    Graphics,
    Compute,
    Transfer,
}

impl QueueType {
    pub const ALL: [QueueType; 3] = [QueueType::Graphics, QueueType::Compute, QueueType::Transfer];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// The (layout, stage, access, queue) state of a tracked resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ResourceState {
    pub layout: ImageLayout,
    pub stages: PipelineStages,
    pub access: AccessFlags,
    pub queue: QueueType,
}

impl ResourceState {
    /// State of a resource whose contents are undefined and that has not
    /// been used yet.
    pub const UNDEFINED: Self = Self {
        layout: ImageLayout::Undefined,
        stages: PipelineStages::empty(),
        access: AccessFlags::empty(),
        queue: QueueType::Graphics,
    };

    pub fn new(layout: ImageLayout, stages: PipelineStages, access: AccessFlags) -> Self {
        Self {
            layout,
            stages,
            access,
            queue: QueueType::Graphics,
        }
    }

    #[must_use]
    pub fn on_queue(mut self, queue: QueueType) -> Self {
        self.queue = queue;
        self
    }

    /// State of a swapchain image just handed over by the presentation engine.
    ///
    /// The contents are discarded. The stage is the one the image-acquired
    /// semaphore is waited at, so the first layout transition chains after it.
    pub fn acquired_swapchain() -> Self {
        Self::new(
            ImageLayout::Undefined,
            PipelineStages::COLOR_ATTACHMENT_OUTPUT,
            AccessFlags::empty(),
        )
    }

    /// State of a swapchain image ready for presentation.
    pub fn present() -> Self {
        Self::new(
            ImageLayout::PresentSrc,
            PipelineStages::BOTTOM_OF_PIPE,
            AccessFlags::empty(),
        )
    }

    /// Check if this state writes the resource.
    pub fn is_write(&self) -> bool {
        self.access.has_writes()
    }

    /// Check if the resource has never been used in this state's history.
    pub fn is_unused(&self) -> bool {
        self.stages.is_empty() && self.access.is_empty()
    }
}
