//! In-flight frame slots.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{RwLock, RwLockReadGuard};

use crate::backend::{BackendError, GpuBackend, GpuCommandBuffer, GpuFence, GpuSemaphore};
use crate::registry::ResourceHandle;

/// Frame numbers of one slot, shared with the [`FrameFence`]s handed out for
/// it. Frame numbers start at 1, so 0 means "none".
///
/// [`FrameFence`]: super::FrameFence
#[derive(Debug, Default)]
pub(crate) struct SlotTracker {
    submitted: AtomicU64,
    completed: AtomicU64,
    /// Frame given up on when the slot was torn down with its fence
    /// unsignaled.
    abandoned: AtomicU64,
    /// Set once the slot's fence is destroyed. Held for reading across every
    /// backend query of the fence made outside the pipeline.
    fence_destroyed: RwLock<bool>,
}

impl SlotTracker {
    pub(crate) fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Acquire)
    }

    pub(crate) fn completed(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }

    pub(crate) fn abandoned(&self) -> u64 {
        self.abandoned.load(Ordering::Acquire)
    }

    pub(crate) fn fence_destroyed(&self) -> RwLockReadGuard<'_, bool> {
        self.fence_destroyed.read()
    }
}

/// Something released once the GPU is done with a slot's frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeferredRelease {
    Resource(ResourceHandle),
    Commands(GpuCommandBuffer),
}

/// One of the N rotating sets of per-frame GPU objects.
///
/// A slot's command buffers, semaphores and deferred releases are only
/// touched again after its fence has been observed signaled.
#[derive(Debug)]
pub(crate) struct FrameSlot {
    index: usize,
    fence: GpuFence,
    render_finished: GpuSemaphore,
    semaphores: Vec<GpuSemaphore>,
    deferred_releases: Vec<DeferredRelease>,
    /// Frame submitted with this slot's fence whose completion has not been
    /// observed yet.
    in_flight: Option<u64>,
    /// Fence is signaled and must be reset before the next submission.
    fence_signaled: bool,
    /// Command buffers were allocated since the last recycle.
    recorded: bool,
    tracker: Arc<SlotTracker>,
}

impl FrameSlot {
    pub(crate) fn new(backend: &dyn GpuBackend, index: usize) -> Result<Self, BackendError> {
        let fence = backend.create_fence(false)?;
        let render_finished = match backend.create_semaphore() {
            Ok(semaphore) => semaphore,
            Err(err) => {
                backend.destroy_fence(fence);
                return Err(err);
            }
        };

        Ok(Self {
            index,
            fence,
            render_finished,
            semaphores: Vec::new(),
            deferred_releases: Vec::new(),
            in_flight: None,
            fence_signaled: false,
            recorded: false,
            tracker: Arc::new(SlotTracker::default()),
        })
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn fence(&self) -> GpuFence {
        self.fence
    }

    pub(crate) fn render_finished(&self) -> GpuSemaphore {
        self.render_finished
    }

    pub(crate) fn tracker(&self) -> &Arc<SlotTracker> {
        &self.tracker
    }

    pub(crate) fn in_flight(&self) -> Option<u64> {
        self.in_flight
    }

    /// Check the fence without blocking. Returns `true` once the slot has no
    /// GPU work outstanding.
    pub(crate) fn poll(&mut self, backend: &dyn GpuBackend) -> Result<bool, BackendError> {
        let Some(frame) = self.in_flight else {
            return Ok(true);
        };
        if backend.is_fence_signaled(self.fence)? {
            self.mark_complete(frame);
            return Ok(true);
        }
        Ok(false)
    }

    /// Block until the slot has no GPU work outstanding.
    ///
    /// Returns how long the call blocked.
    pub(crate) fn wait(
        &mut self,
        backend: &dyn GpuBackend,
        timeout: Duration,
    ) -> Result<Duration, BackendError> {
        let Some(frame) = self.in_flight else {
            return Ok(Duration::ZERO);
        };
        let start = Instant::now();
        backend.wait_fence(self.fence, timeout)?;
        self.mark_complete(frame);
        Ok(start.elapsed())
    }

    fn mark_complete(&mut self, frame: u64) {
        self.tracker.completed.store(frame, Ordering::Release);
        self.in_flight = None;
        self.fence_signaled = true;
        log::trace!("FrameSlot {}: frame {} complete", self.index, frame);
    }

    /// Reset the fence and recycle command buffers. The slot must not have
    /// work in flight.
    pub(crate) fn recycle(&mut self, backend: &dyn GpuBackend) -> Result<(), BackendError> {
        debug_assert!(self.in_flight.is_none());
        if self.fence_signaled {
            backend.reset_fence(self.fence)?;
            self.fence_signaled = false;
        }
        if self.recorded {
            backend.reset_command_buffers(self.index)?;
            self.recorded = false;
        }
        Ok(())
    }

    /// Note that command buffers have been allocated for this slot.
    pub(crate) fn mark_recorded(&mut self) {
        self.recorded = true;
    }

    pub(crate) fn mark_submitted(&mut self, frame: u64) {
        self.tracker.submitted.store(frame, Ordering::Release);
        self.in_flight = Some(frame);
    }

    /// Make sure at least `count` pooled semaphores exist and return them.
    pub(crate) fn semaphores(
        &mut self,
        backend: &dyn GpuBackend,
        count: usize,
    ) -> Result<&[GpuSemaphore], BackendError> {
        while self.semaphores.len() < count {
            self.semaphores.push(backend.create_semaphore()?);
        }
        Ok(&self.semaphores[..count])
    }

    pub(crate) fn defer_release(&mut self, release: DeferredRelease) {
        self.deferred_releases.push(release);
    }

    /// Releases that became safe. Only call once the fence was observed or
    /// the slot was retired.
    pub(crate) fn take_deferred_releases(&mut self) -> Vec<DeferredRelease> {
        debug_assert!(self.in_flight.is_none());
        std::mem::take(&mut self.deferred_releases)
    }

    /// Stop tracking outstanding work ahead of [`destroy`](Self::destroy).
    ///
    /// The fence is polled once. A frame whose fence is not signaled, or
    /// cannot be queried, is recorded as abandoned.
    pub(crate) fn retire(&mut self, backend: &dyn GpuBackend) {
        let Some(frame) = self.in_flight.take() else {
            return;
        };
        match backend.is_fence_signaled(self.fence) {
            Ok(true) => {
                self.tracker.completed.store(frame, Ordering::Release);
                log::trace!("FrameSlot {}: frame {} complete", self.index, frame);
            }
            status => {
                if let Err(err) = status {
                    log::warn!("FrameSlot {}: fence query failed: {}", self.index, err);
                }
                self.tracker.abandoned.store(frame, Ordering::Release);
                log::warn!("FrameSlot {}: frame {} abandoned", self.index, frame);
            }
        }
    }

    pub(crate) fn destroy(self, backend: &dyn GpuBackend) {
        {
            let mut destroyed = self.tracker.fence_destroyed.write();
            *destroyed = true;
            backend.destroy_fence(self.fence);
        }
        backend.destroy_semaphore(self.render_finished);
        for semaphore in self.semaphores {
            backend.destroy_semaphore(semaphore);
        }
        backend.free_slot(self.index);
    }
}
