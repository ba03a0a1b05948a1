//! GPU backend abstraction layer.
//!
//! The frame pipeline never calls a graphics API directly. Everything it
//! needs from the device goes through the [`GpuBackend`] trait: fences,
//! semaphores, per-slot and persistent command buffers, barrier recording
//! and queue submission.
//!
//! # Available Backends
//!
//! - `dummy` (always available): records every call into an inspectable log
//!   and signals fences on submit. Used by tests and the headless demo.
//! - `vulkan-backend`: native Vulkan backend using ash and synchronization2
//!
//! Handles returned by a backend are plain identifiers. They are `Copy` and
//! are only meaningful to the backend that created them.

#[cfg(feature = "vulkan-backend")]
pub mod vulkan;

pub mod dummy;
mod error;

pub use error::BackendError;

use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "vulkan-backend")]
use ash::vk;

use crate::sync::BarrierBatch;
use crate::types::{PipelineStages, QueueType};

/// Largest write accepted by [`GpuBackend::cmd_update_buffer`].
pub const MAX_UPDATE_BUFFER_SIZE: usize = 65536;

/// Handle to a GPU fence for CPU-GPU synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuFence {
    Dummy(u64),
    #[cfg(feature = "vulkan-backend")]
    Vulkan(vk::Fence),
}

/// Handle to a GPU semaphore for GPU-GPU synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuSemaphore {
    Dummy(u64),
    #[cfg(feature = "vulkan-backend")]
    Vulkan(vk::Semaphore),
}

/// Handle to a primary command buffer, owned by one in-flight slot or
/// persistent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuCommandBuffer {
    Dummy { id: u64, queue: QueueType },
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        raw: vk::CommandBuffer,
        queue: QueueType,
    },
}

impl GpuCommandBuffer {
    /// Queue the command buffer was allocated for.
    pub fn queue(&self) -> QueueType {
        match *self {
            Self::Dummy { queue, .. } => queue,
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { queue, .. } => queue,
        }
    }
}

/// A semaphore wait attached to a queue submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemaphoreWaitInfo {
    pub semaphore: GpuSemaphore,
    /// Stages of the submitted work that must not start before the signal.
    pub stages: PipelineStages,
}

/// One `vkQueueSubmit2`-style batch.
#[derive(Debug, Clone, Copy)]
pub struct QueueSubmission<'a> {
    pub queue: QueueType,
    pub command_buffers: &'a [GpuCommandBuffer],
    pub waits: &'a [SemaphoreWaitInfo],
    pub signals: &'a [GpuSemaphore],
    pub fence: Option<GpuFence>,
}

/// GPU backend trait for abstracting different GPU APIs.
///
/// Recording calls (`begin_command_buffer`, `cmd_*`, `end_command_buffer`)
/// may be made concurrently from several threads, but never for the same
/// command buffer.
pub trait GpuBackend: Send + Sync + 'static {
    /// Get the backend name.
    fn name(&self) -> &'static str;

    /// Check if the device exposes a queue for this queue type.
    fn supports_queue(&self, queue: QueueType) -> bool;

    fn create_fence(&self, signaled: bool) -> Result<GpuFence, BackendError>;

    fn destroy_fence(&self, fence: GpuFence);

    /// Block until the fence signals.
    ///
    /// Returns [`BackendError::Timeout`] if `timeout` elapses first and
    /// [`BackendError::DeviceLost`] if the device is gone.
    fn wait_fence(&self, fence: GpuFence, timeout: Duration) -> Result<(), BackendError>;

    /// Check if a fence is signaled (non-blocking).
    fn is_fence_signaled(&self, fence: GpuFence) -> Result<bool, BackendError>;

    fn reset_fence(&self, fence: GpuFence) -> Result<(), BackendError>;

    fn create_semaphore(&self) -> Result<GpuSemaphore, BackendError>;

    fn destroy_semaphore(&self, semaphore: GpuSemaphore);

    /// Allocate a command buffer owned by in-flight slot `slot`.
    ///
    /// The buffer stays valid until [`reset_command_buffers`] is called for
    /// the same slot.
    ///
    /// [`reset_command_buffers`]: GpuBackend::reset_command_buffers
    fn allocate_command_buffer(
        &self,
        slot: usize,
        queue: QueueType,
    ) -> Result<GpuCommandBuffer, BackendError>;

    /// Recycle every command buffer allocated for `slot`.
    ///
    /// The caller guarantees the GPU has finished with them.
    fn reset_command_buffers(&self, slot: usize) -> Result<(), BackendError>;

    /// Release all command memory held for `slot`.
    fn free_slot(&self, slot: usize);

    /// Allocate a command buffer owned by no slot, to be recorded once and
    /// submitted in any number of frames.
    ///
    /// It may be submitted again while an earlier submission of it is still
    /// executing, and stays valid until [`free_command_buffer`].
    ///
    /// [`free_command_buffer`]: GpuBackend::free_command_buffer
    fn allocate_persistent_command_buffer(
        &self,
        queue: QueueType,
    ) -> Result<GpuCommandBuffer, BackendError>;

    /// Free a persistent command buffer. The caller guarantees the GPU has
    /// finished with it.
    fn free_command_buffer(&self, cmd: GpuCommandBuffer);

    fn begin_command_buffer(&self, cmd: GpuCommandBuffer) -> Result<(), BackendError>;

    fn end_command_buffer(&self, cmd: GpuCommandBuffer) -> Result<(), BackendError>;

    /// Record one pipeline barrier covering the whole batch.
    fn cmd_barriers(&self, cmd: GpuCommandBuffer, batch: &BarrierBatch) -> Result<(), BackendError>;

    fn cmd_draw(
        &self,
        cmd: GpuCommandBuffer,
        vertex_count: u32,
        instance_count: u32,
    ) -> Result<(), BackendError>;

    fn cmd_dispatch(&self, cmd: GpuCommandBuffer, x: u32, y: u32, z: u32)
    -> Result<(), BackendError>;

    /// Write up to [`MAX_UPDATE_BUFFER_SIZE`] bytes of inline data into a
    /// buffer.
    ///
    /// `buffer` is the native handle bound in the registry. `offset` and
    /// `data.len()` must be multiples of 4.
    fn cmd_update_buffer(
        &self,
        cmd: GpuCommandBuffer,
        buffer: u64,
        offset: u64,
        data: &[u8],
    ) -> Result<(), BackendError>;

    /// Submit one batch to its queue.
    fn submit(&self, submission: &QueueSubmission<'_>) -> Result<(), BackendError>;

    /// Block until every queue is idle.
    fn wait_idle(&self) -> Result<(), BackendError>;
}

/// Create the headless backend used when no device is supplied.
///
/// The Vulkan backend needs an externally created device and is built with
/// `vulkan::VulkanBackend::new` instead.
pub fn create_headless_backend() -> Arc<dyn GpuBackend> {
    log::info!("Using dummy backend");
    Arc::new(dummy::DummyBackend::new())
}

/// Check if a real GPU backend is compiled in.
pub fn has_gpu_backend() -> bool {
    cfg!(feature = "vulkan-backend")
}
