//! Resource registry: bookkeeping of GPU resources and their last-known
//! usage state.
//!
//! The registry never talks to the GPU. It owns the descriptor of each
//! resource and the `(layout, stages, access, queue)` state the resource was
//! left in by the last submitted frame. The synchronization manager reads
//! that state to decide which barriers a frame needs and commits the new
//! state with [`ResourceRegistry::transition`] once planning is done.
//!
//! Handles carry a generation, so a handle to a released slot is rejected
//! with [`GraphicsError::UnknownResource`] even after the slot is reused.

use std::fmt;

use crate::error::GraphicsError;
use crate::types::{BufferDescriptor, ImageDescriptor, ResourceDescriptor, ResourceState};

/// Opaque identifier of a tracked image or buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceHandle {
    index: u32,
    generation: u32,
}

impl ResourceHandle {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index of this handle.
    pub fn index(&self) -> usize {
        self.index as usize
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Resource({}v{})", self.index, self.generation)
    }
}

#[derive(Debug)]
struct Tracked {
    descriptor: ResourceDescriptor,
    state: ResourceState,
    external: bool,
    /// Backend object (`VkImage` / `VkBuffer` as raw u64), 0 if unbound.
    native: u64,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    resource: Option<Tracked>,
}

/// Tracks every GPU resource the frame pipeline synchronizes.
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    slots: Vec<Slot>,
    free_list: Vec<u32>,
    live: usize,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource whose contents start undefined.
    pub fn register(&mut self, descriptor: impl Into<ResourceDescriptor>) -> ResourceHandle {
        self.insert(descriptor.into(), ResourceState::UNDEFINED, false)
    }

    pub fn register_image(&mut self, descriptor: ImageDescriptor) -> ResourceHandle {
        self.register(descriptor)
    }

    pub fn register_buffer(&mut self, descriptor: BufferDescriptor) -> ResourceHandle {
        self.register(descriptor)
    }

    /// Register a resource whose state is owned by another system, such as a
    /// swapchain image. Its state is refreshed each frame with
    /// [`set_external_state`](Self::set_external_state).
    pub fn register_external(
        &mut self,
        descriptor: impl Into<ResourceDescriptor>,
        initial_state: ResourceState,
    ) -> ResourceHandle {
        self.insert(descriptor.into(), initial_state, true)
    }

    fn insert(
        &mut self,
        descriptor: ResourceDescriptor,
        state: ResourceState,
        external: bool,
    ) -> ResourceHandle {
        let tracked = Tracked {
            descriptor,
            state,
            external,
            native: 0,
        };
        self.live += 1;

        let handle = if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            slot.resource = Some(tracked);
            ResourceHandle::new(index, slot.generation)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                resource: Some(tracked),
            });
            ResourceHandle::new(index, 0)
        };

        log::trace!("ResourceRegistry: registered {}", handle);
        handle
    }

    fn get(&self, handle: ResourceHandle) -> Result<&Tracked, GraphicsError> {
        self.slots
            .get(handle.index())
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.resource.as_ref())
            .ok_or(GraphicsError::UnknownResource(handle))
    }

    fn get_mut(&mut self, handle: ResourceHandle) -> Result<&mut Tracked, GraphicsError> {
        self.slots
            .get_mut(handle.index())
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.resource.as_mut())
            .ok_or(GraphicsError::UnknownResource(handle))
    }

    /// Check if the handle refers to a live resource.
    pub fn contains(&self, handle: ResourceHandle) -> bool {
        self.get(handle).is_ok()
    }

    /// Last recorded usage state of a resource.
    pub fn current_state(&self, handle: ResourceHandle) -> Result<ResourceState, GraphicsError> {
        Ok(self.get(handle)?.state)
    }

    /// Record a new state and return the prior one.
    pub fn transition(
        &mut self,
        handle: ResourceHandle,
        new_state: ResourceState,
    ) -> Result<ResourceState, GraphicsError> {
        let tracked = self.get_mut(handle)?;
        let prior = std::mem::replace(&mut tracked.state, new_state);
        log::trace!(
            "ResourceRegistry: {} {:?} -> {:?}",
            handle,
            prior.layout,
            new_state.layout
        );
        Ok(prior)
    }

    /// Overwrite the state of an external resource with the state its owner
    /// reports, e.g. a freshly acquired swapchain image.
    pub fn set_external_state(
        &mut self,
        handle: ResourceHandle,
        state: ResourceState,
    ) -> Result<(), GraphicsError> {
        let tracked = self.get_mut(handle)?;
        if !tracked.external {
            return Err(GraphicsError::InvalidState(format!(
                "{} is not an external resource",
                handle
            )));
        }
        tracked.state = state;
        Ok(())
    }

    pub fn is_external(&self, handle: ResourceHandle) -> Result<bool, GraphicsError> {
        Ok(self.get(handle)?.external)
    }

    pub fn descriptor(&self, handle: ResourceHandle) -> Result<&ResourceDescriptor, GraphicsError> {
        Ok(&self.get(handle)?.descriptor)
    }

    /// Bind the backend object backing this resource (raw `VkImage` or
    /// `VkBuffer` handle). Barriers reference it when recorded.
    pub fn bind_native(&mut self, handle: ResourceHandle, native: u64) -> Result<(), GraphicsError> {
        self.get_mut(handle)?.native = native;
        Ok(())
    }

    pub fn native(&self, handle: ResourceHandle) -> Result<u64, GraphicsError> {
        Ok(self.get(handle)?.native)
    }

    /// Stop tracking a resource. The handle and every copy of it become
    /// unknown. Resources the GPU may still be using should be released
    /// through [`FramePipeline::release_resource`] instead.
    ///
    /// [`FramePipeline::release_resource`]: crate::pipeline::FramePipeline::release_resource
    pub fn release(&mut self, handle: ResourceHandle) -> Result<ResourceDescriptor, GraphicsError> {
        self.get(handle)?;
        let slot = &mut self.slots[handle.index()];
        let tracked = slot.resource.take().ok_or(GraphicsError::UnknownResource(handle))?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free_list.push(handle.index);
        self.live -= 1;
        log::trace!("ResourceRegistry: released {}", handle);
        Ok(tracked.descriptor)
    }

    /// Forget every recorded state, e.g. after the device was lost and GPU
    /// contents are gone.
    pub fn reset_states(&mut self) {
        for tracked in self.slots.iter_mut().filter_map(|s| s.resource.as_mut()) {
            tracked.state = ResourceState::UNDEFINED;
        }
    }

    /// Number of live resources.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Iterate live resources with their descriptor and state.
    pub fn iter(
        &self,
    ) -> impl Iterator<Item = (ResourceHandle, &ResourceDescriptor, ResourceState)> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            let tracked = slot.resource.as_ref()?;
            Some((
                ResourceHandle::new(index as u32, slot.generation),
                &tracked.descriptor,
                tracked.state,
            ))
        })
    }
}
