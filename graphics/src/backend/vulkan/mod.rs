//! Native Vulkan backend implementation using ash.
//!
//! The backend wraps a device created by the application (instance,
//! physical device selection and surface handling stay outside the
//! pipeline). The device must have the `synchronization2` feature enabled:
//! barriers are recorded with `vkCmdPipelineBarrier2` and batches are
//! submitted with `vkQueueSubmit2`.
//!
//! Command buffers come from one transient pool each, grouped per in-flight
//! slot (see [`command`]). Recording workers therefore never contend on a
//! pool, and recycling a slot is a reset of its pools. Persistent command
//! buffers get a pool of their own and are begun with simultaneous use, so
//! a buffer can be pending in several frames at once.
//!
//! Images and buffers are tracked by the registry as raw handles bound with
//! [`ResourceRegistry::bind_native`]. Resources without a bound handle are
//! synchronized with global memory barriers, which cannot change layouts.
//!
//! [`ResourceRegistry::bind_native`]: crate::registry::ResourceRegistry::bind_native

pub mod command;
pub(crate) mod conversion;

use std::collections::HashMap;
use std::time::Duration;

use ash::vk;
use ash::vk::Handle;
use parking_lot::Mutex;

use crate::sync::{BarrierBatch, OwnershipTransfer, ResourceBarrier};
use crate::types::{QueueType, ResourceKind};

use super::{
    BackendError, GpuBackend, GpuCommandBuffer, GpuFence, GpuSemaphore, MAX_UPDATE_BUFFER_SIZE,
    QueueSubmission,
};

use self::command::{PersistentCommandPools, SlotCommandPools};
use self::conversion::{aspect_mask, convert_access, convert_layout, convert_result, convert_stages};

/// A device queue and the family it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VulkanQueue {
    pub queue: vk::Queue,
    pub family_index: u32,
}

/// Queues handed to the backend. Compute and transfer are optional.
#[derive(Debug, Clone, Copy)]
pub struct VulkanQueues {
    pub graphics: VulkanQueue,
    pub compute: Option<VulkanQueue>,
    pub transfer: Option<VulkanQueue>,
}

/// Vulkan implementation of [`GpuBackend`].
pub struct VulkanBackend {
    device: ash::Device,
    queues: VulkanQueues,
    /// Serializes `vkQueueSubmit2` and `vkQueueWaitIdle`; queues are
    /// externally synchronized objects.
    submit_lock: Mutex<()>,
    slots: Mutex<HashMap<usize, SlotCommandPools>>,
    persistent: Mutex<PersistentCommandPools>,
}

impl VulkanBackend {
    /// Wrap an existing device.
    ///
    /// # Safety
    ///
    /// `device` must stay valid for the lifetime of the backend, the queues
    /// must belong to it, and `synchronization2` must be enabled. The
    /// backend never destroys the device.
    pub unsafe fn new(device: ash::Device, queues: VulkanQueues) -> Self {
        log::info!(
            "Vulkan backend created (graphics family {}, compute: {}, transfer: {})",
            queues.graphics.family_index,
            queues.compute.is_some(),
            queues.transfer.is_some()
        );
        Self {
            device,
            queues,
            submit_lock: Mutex::new(()),
            slots: Mutex::new(HashMap::new()),
            persistent: Mutex::new(PersistentCommandPools::default()),
        }
    }

    /// Get the Vulkan device.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    fn queue(&self, queue: QueueType) -> Result<VulkanQueue, BackendError> {
        match queue {
            QueueType::Graphics => Some(self.queues.graphics),
            QueueType::Compute => self.queues.compute,
            QueueType::Transfer => self.queues.transfer,
        }
        .ok_or_else(|| BackendError::FeatureNotSupported(format!("no {:?} queue", queue)))
    }

    fn family(&self, queue: QueueType) -> u32 {
        self.queue(queue)
            .map(|q| q.family_index)
            .unwrap_or(self.queues.graphics.family_index)
    }

    /// Queue family indices for a barrier, ignored unless ownership moves
    /// between families.
    fn families(&self, barrier: &ResourceBarrier) -> (u32, u32) {
        if barrier.ownership == OwnershipTransfer::None {
            return (vk::QUEUE_FAMILY_IGNORED, vk::QUEUE_FAMILY_IGNORED);
        }
        let src = self.family(barrier.src_queue());
        let dst = self.family(barrier.dst_queue());
        if src == dst {
            (vk::QUEUE_FAMILY_IGNORED, vk::QUEUE_FAMILY_IGNORED)
        } else {
            (src, dst)
        }
    }
}

fn raw_fence(fence: GpuFence) -> Result<vk::Fence, BackendError> {
    match fence {
        GpuFence::Vulkan(raw) => Ok(raw),
        other => Err(BackendError::InvalidHandle(format!("{:?}", other))),
    }
}

fn raw_semaphore(semaphore: GpuSemaphore) -> Result<vk::Semaphore, BackendError> {
    match semaphore {
        GpuSemaphore::Vulkan(raw) => Ok(raw),
        other => Err(BackendError::InvalidHandle(format!("{:?}", other))),
    }
}

fn raw_command_buffer(cmd: GpuCommandBuffer) -> Result<vk::CommandBuffer, BackendError> {
    match cmd {
        GpuCommandBuffer::Vulkan { raw, .. } => Ok(raw),
        other => Err(BackendError::InvalidHandle(format!("{:?}", other))),
    }
}

fn timeout_ns(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX)
}

impl GpuBackend for VulkanBackend {
    fn name(&self) -> &'static str {
        "Vulkan Backend (ash)"
    }

    fn supports_queue(&self, queue: QueueType) -> bool {
        self.queue(queue).is_ok()
    }

    fn create_fence(&self, signaled: bool) -> Result<GpuFence, BackendError> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let fence_info = vk::FenceCreateInfo::default().flags(flags);
        let fence = unsafe { self.device.create_fence(&fence_info, None) }
            .map_err(|e| convert_result(e, "create fence"))?;
        Ok(GpuFence::Vulkan(fence))
    }

    fn destroy_fence(&self, fence: GpuFence) {
        if let Ok(raw) = raw_fence(fence) {
            unsafe { self.device.destroy_fence(raw, None) };
        }
    }

    fn wait_fence(&self, fence: GpuFence, timeout: Duration) -> Result<(), BackendError> {
        cyclonite_core::profile_scope!("vulkan_wait_fence");
        let raw = raw_fence(fence)?;
        unsafe { self.device.wait_for_fences(&[raw], true, timeout_ns(timeout)) }
            .map_err(|e| convert_result(e, "wait for fence"))
    }

    fn is_fence_signaled(&self, fence: GpuFence) -> Result<bool, BackendError> {
        let raw = raw_fence(fence)?;
        unsafe { self.device.get_fence_status(raw) }
            .map_err(|e| convert_result(e, "get fence status"))
    }

    fn reset_fence(&self, fence: GpuFence) -> Result<(), BackendError> {
        let raw = raw_fence(fence)?;
        unsafe { self.device.reset_fences(&[raw]) }.map_err(|e| convert_result(e, "reset fence"))
    }

    fn create_semaphore(&self) -> Result<GpuSemaphore, BackendError> {
        let semaphore_info = vk::SemaphoreCreateInfo::default();
        let semaphore = unsafe { self.device.create_semaphore(&semaphore_info, None) }
            .map_err(|e| convert_result(e, "create semaphore"))?;
        Ok(GpuSemaphore::Vulkan(semaphore))
    }

    fn destroy_semaphore(&self, semaphore: GpuSemaphore) {
        if let Ok(raw) = raw_semaphore(semaphore) {
            unsafe { self.device.destroy_semaphore(raw, None) };
        }
    }

    fn allocate_command_buffer(
        &self,
        slot: usize,
        queue: QueueType,
    ) -> Result<GpuCommandBuffer, BackendError> {
        let family = self.queue(queue)?.family_index;
        let raw = self
            .slots
            .lock()
            .entry(slot)
            .or_default()
            .allocate(&self.device, family)?;
        Ok(GpuCommandBuffer::Vulkan { raw, queue })
    }

    fn reset_command_buffers(&self, slot: usize) -> Result<(), BackendError> {
        match self.slots.lock().get_mut(&slot) {
            Some(pools) => pools.reset(&self.device),
            None => Ok(()),
        }
    }

    fn free_slot(&self, slot: usize) {
        if let Some(mut pools) = self.slots.lock().remove(&slot) {
            log::trace!("Vulkan: freeing {} command pools of slot {}", pools.len(), slot);
            pools.destroy(&self.device);
        }
    }

    fn allocate_persistent_command_buffer(
        &self,
        queue: QueueType,
    ) -> Result<GpuCommandBuffer, BackendError> {
        let family = self.queue(queue)?.family_index;
        let raw = self.persistent.lock().allocate(&self.device, family)?;
        Ok(GpuCommandBuffer::Vulkan { raw, queue })
    }

    fn free_command_buffer(&self, cmd: GpuCommandBuffer) {
        if let Ok(raw) = raw_command_buffer(cmd)
            && !self.persistent.lock().free(&self.device, raw)
        {
            log::warn!("Vulkan: {:?} is not a persistent command buffer", raw);
        }
    }

    fn begin_command_buffer(&self, cmd: GpuCommandBuffer) -> Result<(), BackendError> {
        let raw = raw_command_buffer(cmd)?;
        let flags = if self.persistent.lock().contains(raw) {
            vk::CommandBufferUsageFlags::SIMULTANEOUS_USE
        } else {
            vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT
        };
        let begin_info = vk::CommandBufferBeginInfo::default().flags(flags);
        unsafe { self.device.begin_command_buffer(raw, &begin_info) }
            .map_err(|e| convert_result(e, "begin command buffer"))
    }

    fn end_command_buffer(&self, cmd: GpuCommandBuffer) -> Result<(), BackendError> {
        let raw = raw_command_buffer(cmd)?;
        unsafe { self.device.end_command_buffer(raw) }
            .map_err(|e| convert_result(e, "end command buffer"))
    }

    fn cmd_barriers(&self, cmd: GpuCommandBuffer, batch: &BarrierBatch) -> Result<(), BackendError> {
        let raw = raw_command_buffer(cmd)?;
        if batch.is_empty() {
            return Ok(());
        }

        let mut image_barriers = Vec::new();
        let mut buffer_barriers = Vec::new();
        let mut memory_barriers = Vec::new();

        for barrier in batch.iter() {
            let src_stage = convert_stages(barrier.src_stages());
            let src_access = convert_access(barrier.src_access());
            let dst_stage = convert_stages(barrier.dst_stages());
            let dst_access = convert_access(barrier.dst_access());
            let (src_family, dst_family) = self.families(barrier);

            if barrier.native == 0 {
                if barrier.is_layout_transition() {
                    log::warn!(
                        "Vulkan: {} has no bound image, layout transition dropped",
                        barrier.resource
                    );
                }
                memory_barriers.push(
                    vk::MemoryBarrier2::default()
                        .src_stage_mask(src_stage)
                        .src_access_mask(src_access)
                        .dst_stage_mask(dst_stage)
                        .dst_access_mask(dst_access),
                );
                continue;
            }

            match barrier.kind {
                ResourceKind::Image => image_barriers.push(
                    vk::ImageMemoryBarrier2::default()
                        .src_stage_mask(src_stage)
                        .src_access_mask(src_access)
                        .dst_stage_mask(dst_stage)
                        .dst_access_mask(dst_access)
                        .old_layout(convert_layout(barrier.old.layout))
                        .new_layout(convert_layout(barrier.new.layout))
                        .src_queue_family_index(src_family)
                        .dst_queue_family_index(dst_family)
                        .image(vk::Image::from_raw(barrier.native))
                        .subresource_range(vk::ImageSubresourceRange {
                            aspect_mask: aspect_mask(barrier.format),
                            base_mip_level: 0,
                            level_count: vk::REMAINING_MIP_LEVELS,
                            base_array_layer: 0,
                            layer_count: vk::REMAINING_ARRAY_LAYERS,
                        }),
                ),
                ResourceKind::Buffer => buffer_barriers.push(
                    vk::BufferMemoryBarrier2::default()
                        .src_stage_mask(src_stage)
                        .src_access_mask(src_access)
                        .dst_stage_mask(dst_stage)
                        .dst_access_mask(dst_access)
                        .src_queue_family_index(src_family)
                        .dst_queue_family_index(dst_family)
                        .buffer(vk::Buffer::from_raw(barrier.native))
                        .offset(0)
                        .size(vk::WHOLE_SIZE),
                ),
            }
        }

        let dependency_info = vk::DependencyInfo::default()
            .memory_barriers(&memory_barriers)
            .buffer_memory_barriers(&buffer_barriers)
            .image_memory_barriers(&image_barriers);
        unsafe { self.device.cmd_pipeline_barrier2(raw, &dependency_info) };
        Ok(())
    }

    fn cmd_draw(
        &self,
        cmd: GpuCommandBuffer,
        vertex_count: u32,
        instance_count: u32,
    ) -> Result<(), BackendError> {
        let raw = raw_command_buffer(cmd)?;
        unsafe { self.device.cmd_draw(raw, vertex_count, instance_count, 0, 0) };
        Ok(())
    }

    fn cmd_dispatch(
        &self,
        cmd: GpuCommandBuffer,
        x: u32,
        y: u32,
        z: u32,
    ) -> Result<(), BackendError> {
        let raw = raw_command_buffer(cmd)?;
        unsafe { self.device.cmd_dispatch(raw, x, y, z) };
        Ok(())
    }

    fn cmd_update_buffer(
        &self,
        cmd: GpuCommandBuffer,
        buffer: u64,
        offset: u64,
        data: &[u8],
    ) -> Result<(), BackendError> {
        let raw = raw_command_buffer(cmd)?;
        if buffer == 0 {
            return Err(BackendError::InvalidHandle("no buffer bound for update".into()));
        }
        if data.len() > MAX_UPDATE_BUFFER_SIZE || data.len() % 4 != 0 || offset % 4 != 0 {
            return Err(BackendError::Internal(format!(
                "update of {} bytes at offset {} is not a valid inline update",
                data.len(),
                offset
            )));
        }
        unsafe {
            self.device
                .cmd_update_buffer(raw, vk::Buffer::from_raw(buffer), offset, data)
        };
        Ok(())
    }

    fn submit(&self, submission: &QueueSubmission<'_>) -> Result<(), BackendError> {
        cyclonite_core::profile_scope!("vulkan_queue_submit");
        let queue = self.queue(submission.queue)?;

        let command_buffers = submission
            .command_buffers
            .iter()
            .map(|cmd| {
                raw_command_buffer(*cmd)
                    .map(|raw| vk::CommandBufferSubmitInfo::default().command_buffer(raw))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let waits = submission
            .waits
            .iter()
            .map(|wait| {
                raw_semaphore(wait.semaphore).map(|raw| {
                    vk::SemaphoreSubmitInfo::default()
                        .semaphore(raw)
                        .stage_mask(convert_stages(wait.stages))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let signals = submission
            .signals
            .iter()
            .map(|semaphore| {
                raw_semaphore(*semaphore).map(|raw| {
                    vk::SemaphoreSubmitInfo::default()
                        .semaphore(raw)
                        .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let fence = match submission.fence {
            Some(fence) => raw_fence(fence)?,
            None => vk::Fence::null(),
        };

        let submit_info = vk::SubmitInfo2::default()
            .wait_semaphore_infos(&waits)
            .command_buffer_infos(&command_buffers)
            .signal_semaphore_infos(&signals);

        let _guard = self.submit_lock.lock();
        unsafe { self.device.queue_submit2(queue.queue, &[submit_info], fence) }
            .map_err(|e| convert_result(e, "queue submit"))
    }

    fn wait_idle(&self) -> Result<(), BackendError> {
        let _guard = self.submit_lock.lock();
        unsafe { self.device.device_wait_idle() }.map_err(|e| convert_result(e, "wait idle"))
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
        }
        for (_, mut pools) in self.slots.lock().drain() {
            pools.destroy(&self.device);
        }
        self.persistent.lock().destroy(&self.device);
    }
}

impl std::fmt::Debug for VulkanBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanBackend")
            .field("queues", &self.queues)
            .field("slots", &self.slots.lock().len())
            .field("persistent_command_buffers", &self.persistent.lock().len())
            .finish_non_exhaustive()
    }
}
