//! Per-slot and persistent command pools.
//!
//! Every command buffer gets its own pool so recording workers never share a
//! pool. Slot pools are reset in bulk when their slot is recycled and then
//! reused by later allocations for the same queue family. Persistent pools
//! live until their single buffer is freed.

use std::collections::HashMap;

use ash::vk;

use crate::backend::BackendError;

use super::conversion::convert_result;

/// Create a command pool for one queue family.
pub fn create_command_pool(
    device: &ash::Device,
    queue_family_index: u32,
    flags: vk::CommandPoolCreateFlags,
) -> Result<vk::CommandPool, BackendError> {
    let pool_info = vk::CommandPoolCreateInfo::default()
        .queue_family_index(queue_family_index)
        .flags(flags);

    unsafe { device.create_command_pool(&pool_info, None) }
        .map_err(|e| convert_result(e, "create command pool"))
}

/// Allocate one primary command buffer from a fresh pool.
fn allocate_with_pool(
    device: &ash::Device,
    family: u32,
    flags: vk::CommandPoolCreateFlags,
) -> Result<(vk::CommandPool, vk::CommandBuffer), BackendError> {
    let pool = create_command_pool(device, family, flags)?;
    let alloc_info = vk::CommandBufferAllocateInfo::default()
        .command_pool(pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(1);

    match unsafe { device.allocate_command_buffers(&alloc_info) } {
        Ok(buffers) => Ok((pool, buffers[0])),
        Err(e) => {
            unsafe { device.destroy_command_pool(pool, None) };
            Err(convert_result(e, "allocate command buffer"))
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PoolEntry {
    family: u32,
    pool: vk::CommandPool,
    buffer: vk::CommandBuffer,
    in_use: bool,
}

/// Command pools owned by one in-flight slot.
#[derive(Debug, Default)]
pub struct SlotCommandPools {
    entries: Vec<PoolEntry>,
}

impl SlotCommandPools {
    /// Hand out a command buffer for `family`, reusing a free pool if any.
    pub fn allocate(
        &mut self,
        device: &ash::Device,
        family: u32,
    ) -> Result<vk::CommandBuffer, BackendError> {
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| !e.in_use && e.family == family)
        {
            entry.in_use = true;
            return Ok(entry.buffer);
        }

        let (pool, buffer) =
            allocate_with_pool(device, family, vk::CommandPoolCreateFlags::TRANSIENT)?;

        self.entries.push(PoolEntry {
            family,
            pool,
            buffer,
            in_use: true,
        });
        Ok(buffer)
    }

    /// Reset every pool. The GPU must be done with all of the slot's buffers.
    pub fn reset(&mut self, device: &ash::Device) -> Result<(), BackendError> {
        for entry in self.entries.iter_mut().filter(|e| e.in_use) {
            unsafe { device.reset_command_pool(entry.pool, vk::CommandPoolResetFlags::empty()) }
                .map_err(|e| convert_result(e, "reset command pool"))?;
            entry.in_use = false;
        }
        Ok(())
    }

    pub fn destroy(&mut self, device: &ash::Device) {
        for entry in self.entries.drain(..) {
            unsafe { device.destroy_command_pool(entry.pool, None) };
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Command buffers recorded once and submitted across frames, one pool each.
#[derive(Debug, Default)]
pub struct PersistentCommandPools {
    pools: HashMap<vk::CommandBuffer, vk::CommandPool>,
}

impl PersistentCommandPools {
    pub fn allocate(
        &mut self,
        device: &ash::Device,
        family: u32,
    ) -> Result<vk::CommandBuffer, BackendError> {
        let (pool, buffer) =
            allocate_with_pool(device, family, vk::CommandPoolCreateFlags::empty())?;
        self.pools.insert(buffer, pool);
        Ok(buffer)
    }

    pub fn contains(&self, buffer: vk::CommandBuffer) -> bool {
        self.pools.contains_key(&buffer)
    }

    /// Destroy the pool behind `buffer`. Returns `false` if it is not a
    /// persistent buffer.
    pub fn free(&mut self, device: &ash::Device, buffer: vk::CommandBuffer) -> bool {
        match self.pools.remove(&buffer) {
            Some(pool) => {
                unsafe { device.destroy_command_pool(pool, None) };
                true
            }
            None => false,
        }
    }

    pub fn destroy(&mut self, device: &ash::Device) {
        for (_, pool) in self.pools.drain() {
            unsafe { device.destroy_command_pool(pool, None) };
        }
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }
}
