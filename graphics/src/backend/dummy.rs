//! Dummy GPU backend for testing and development.
//!
//! This backend doesn't perform actual GPU operations. It keeps every call
//! in an inspectable log, tracks the commands recorded into each command
//! buffer and signals fences on submission, so the whole frame pipeline can
//! run and be verified without GPU hardware.
//!
//! Failure injection:
//! - [`DummyBackend::set_device_lost`] makes every later call fail with
//!   [`BackendError::DeviceLost`].
//! - [`DummyBackend::set_auto_signal`] stops fences from signaling on
//!   submit, which is how tests provoke fence timeouts.
//! - [`DummyBackend::set_latency`] delays fence signaling after submit.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::{
    BackendError, GpuBackend, GpuCommandBuffer, GpuFence, GpuSemaphore, MAX_UPDATE_BUFFER_SIZE,
    QueueSubmission,
};
use crate::sync::{BarrierBatch, ResourceBarrier};
use crate::types::{PipelineStages, QueueType};

/// A backend call, as seen by the dummy backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    CreateFence { fence: u64, signaled: bool },
    DestroyFence(u64),
    WaitFence(u64),
    ResetFence(u64),
    CreateSemaphore(u64),
    DestroySemaphore(u64),
    AllocateCommandBuffer { slot: usize, id: u64, queue: QueueType },
    AllocatePersistentCommandBuffer { id: u64, queue: QueueType },
    FreeCommandBuffer(u64),
    ResetCommandBuffers { slot: usize },
    FreeSlot { slot: usize },
    Submit { queue: QueueType, command_buffers: Vec<u64> },
    WaitIdle,
}

/// A command recorded into a dummy command buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedCommand {
    Barriers(Vec<ResourceBarrier>),
    Draw { vertex_count: u32, instance_count: u32 },
    Dispatch { x: u32, y: u32, z: u32 },
    UpdateBuffer { buffer: u64, offset: u64, size: usize },
}

/// One submission, with handles reduced to their ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitRecord {
    pub queue: QueueType,
    pub command_buffers: Vec<u64>,
    pub waits: Vec<u64>,
    /// Stages of each entry of `waits`.
    pub wait_stages: Vec<PipelineStages>,
    pub signals: Vec<u64>,
    pub fence: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FenceState {
    Unsignaled,
    /// Submitted without auto-signal; waits for [`DummyBackend::signal_all_fences`].
    Pending,
    SignalsAt(Instant),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordingState {
    Initial,
    Recording,
    Executable,
}

#[derive(Debug)]
struct CommandBufferState {
    /// `None` for persistent command buffers.
    slot: Option<usize>,
    queue: QueueType,
    state: RecordingState,
    commands: Vec<RecordedCommand>,
}

#[derive(Debug)]
struct State {
    next_id: u64,
    fences: HashMap<u64, FenceState>,
    semaphores: HashMap<u64, bool>,
    command_buffers: HashMap<u64, CommandBufferState>,
    calls: Vec<BackendCall>,
    submissions: Vec<SubmitRecord>,
    device_lost: bool,
    auto_signal: bool,
    latency: Duration,
    supported_queues: Vec<QueueType>,
}

/// Dummy GPU backend.
#[derive(Debug)]
pub struct DummyBackend {
    state: Mutex<State>,
    fence_signaled: Condvar,
}

impl DummyBackend {
    /// Create a new dummy backend exposing every queue type.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_id: 1,
                fences: HashMap::new(),
                semaphores: HashMap::new(),
                command_buffers: HashMap::new(),
                calls: Vec::new(),
                submissions: Vec::new(),
                device_lost: false,
                auto_signal: true,
                latency: Duration::ZERO,
                supported_queues: QueueType::ALL.to_vec(),
            }),
            fence_signaled: Condvar::new(),
        }
    }

    /// Create a dummy backend with only a graphics queue.
    pub fn graphics_only() -> Self {
        let backend = Self::new();
        backend.state.lock().supported_queues = vec![QueueType::Graphics];
        backend
    }

    /// Simulate device loss. Every later call fails with
    /// [`BackendError::DeviceLost`].
    pub fn set_device_lost(&self, lost: bool) {
        self.state.lock().device_lost = lost;
        self.fence_signaled.notify_all();
    }

    /// Whether submitted fences signal on their own.
    pub fn set_auto_signal(&self, enabled: bool) {
        self.state.lock().auto_signal = enabled;
    }

    /// Simulated GPU execution time of each submission.
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = latency;
    }

    /// Signal every fence that was submitted but not yet signaled.
    pub fn signal_all_fences(&self) {
        let now = Instant::now();
        let mut state = self.state.lock();
        for fence in state.fences.values_mut() {
            if *fence == FenceState::Pending {
                *fence = FenceState::SignalsAt(now);
            }
        }
        drop(state);
        self.fence_signaled.notify_all();
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<BackendCall> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Every submission made so far, in order.
    pub fn submissions(&self) -> Vec<SubmitRecord> {
        self.state.lock().submissions.clone()
    }

    /// Commands recorded into a command buffer, `None` if it was recycled.
    pub fn recorded_commands(&self, cmd: GpuCommandBuffer) -> Option<Vec<RecordedCommand>> {
        let id = command_buffer_id(cmd).ok()?;
        self.state
            .lock()
            .command_buffers
            .get(&id)
            .map(|cb| cb.commands.clone())
    }

    /// Number of fences and semaphores currently alive.
    pub fn live_sync_objects(&self) -> usize {
        let state = self.state.lock();
        state.fences.len() + state.semaphores.len()
    }

    fn alive(&self) -> Result<parking_lot::MutexGuard<'_, State>, BackendError> {
        let state = self.state.lock();
        if state.device_lost {
            return Err(BackendError::DeviceLost);
        }
        Ok(state)
    }

    fn with_command_buffer<R>(
        &self,
        cmd: GpuCommandBuffer,
        f: impl FnOnce(&mut CommandBufferState) -> Result<R, BackendError>,
    ) -> Result<R, BackendError> {
        let id = command_buffer_id(cmd)?;
        let mut state = self.alive()?;
        let cb = state
            .command_buffers
            .get_mut(&id)
            .ok_or_else(|| BackendError::InvalidHandle(format!("command buffer {}", id)))?;
        f(cb)
    }

    fn record(&self, cmd: GpuCommandBuffer, command: RecordedCommand) -> Result<(), BackendError> {
        self.with_command_buffer(cmd, |cb| {
            if cb.state != RecordingState::Recording {
                return Err(BackendError::Internal(format!(
                    "{:?} recorded outside begin/end",
                    command
                )));
            }
            cb.commands.push(command);
            Ok(())
        })
    }
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn fence_id(fence: GpuFence) -> Result<u64, BackendError> {
    match fence {
        GpuFence::Dummy(id) => Ok(id),
        #[cfg(feature = "vulkan-backend")]
        other => Err(BackendError::InvalidHandle(format!("{:?}", other))),
    }
}

fn semaphore_id(semaphore: GpuSemaphore) -> Result<u64, BackendError> {
    match semaphore {
        GpuSemaphore::Dummy(id) => Ok(id),
        #[cfg(feature = "vulkan-backend")]
        other => Err(BackendError::InvalidHandle(format!("{:?}", other))),
    }
}

fn command_buffer_id(cmd: GpuCommandBuffer) -> Result<u64, BackendError> {
    match cmd {
        GpuCommandBuffer::Dummy { id, .. } => Ok(id),
        #[cfg(feature = "vulkan-backend")]
        other => Err(BackendError::InvalidHandle(format!("{:?}", other))),
    }
}

impl GpuBackend for DummyBackend {
    fn name(&self) -> &'static str {
        "Dummy Backend"
    }

    fn supports_queue(&self, queue: QueueType) -> bool {
        self.state.lock().supported_queues.contains(&queue)
    }

    fn create_fence(&self, signaled: bool) -> Result<GpuFence, BackendError> {
        let mut state = self.alive()?;
        let id = state.next_id;
        state.next_id += 1;
        let initial = if signaled {
            FenceState::SignalsAt(Instant::now())
        } else {
            FenceState::Unsignaled
        };
        state.fences.insert(id, initial);
        state.calls.push(BackendCall::CreateFence {
            fence: id,
            signaled,
        });
        Ok(GpuFence::Dummy(id))
    }

    fn destroy_fence(&self, fence: GpuFence) {
        if let Ok(id) = fence_id(fence) {
            let mut state = self.state.lock();
            state.fences.remove(&id);
            state.calls.push(BackendCall::DestroyFence(id));
        }
    }

    fn wait_fence(&self, fence: GpuFence, timeout: Duration) -> Result<(), BackendError> {
        let id = fence_id(fence)?;
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        state.calls.push(BackendCall::WaitFence(id));

        loop {
            if state.device_lost {
                return Err(BackendError::DeviceLost);
            }
            let now = Instant::now();
            let wake_at = match state.fences.get(&id) {
                None => return Err(BackendError::InvalidHandle(format!("fence {}", id))),
                Some(FenceState::SignalsAt(at)) if *at <= now => return Ok(()),
                Some(FenceState::SignalsAt(at)) => (*at).min(deadline),
                Some(_) => deadline,
            };
            if now >= deadline {
                return Err(BackendError::Timeout);
            }
            self.fence_signaled.wait_until(&mut state, wake_at);
        }
    }

    fn is_fence_signaled(&self, fence: GpuFence) -> Result<bool, BackendError> {
        let id = fence_id(fence)?;
        let state = self.alive()?;
        match state.fences.get(&id) {
            Some(FenceState::SignalsAt(at)) => Ok(*at <= Instant::now()),
            Some(_) => Ok(false),
            None => Err(BackendError::InvalidHandle(format!("fence {}", id))),
        }
    }

    fn reset_fence(&self, fence: GpuFence) -> Result<(), BackendError> {
        let id = fence_id(fence)?;
        let mut state = self.alive()?;
        let entry = state
            .fences
            .get_mut(&id)
            .ok_or_else(|| BackendError::InvalidHandle(format!("fence {}", id)))?;
        *entry = FenceState::Unsignaled;
        state.calls.push(BackendCall::ResetFence(id));
        Ok(())
    }

    fn create_semaphore(&self) -> Result<GpuSemaphore, BackendError> {
        let mut state = self.alive()?;
        let id = state.next_id;
        state.next_id += 1;
        state.semaphores.insert(id, false);
        state.calls.push(BackendCall::CreateSemaphore(id));
        Ok(GpuSemaphore::Dummy(id))
    }

    fn destroy_semaphore(&self, semaphore: GpuSemaphore) {
        if let Ok(id) = semaphore_id(semaphore) {
            let mut state = self.state.lock();
            state.semaphores.remove(&id);
            state.calls.push(BackendCall::DestroySemaphore(id));
        }
    }

    fn allocate_command_buffer(
        &self,
        slot: usize,
        queue: QueueType,
    ) -> Result<GpuCommandBuffer, BackendError> {
        let mut state = self.alive()?;
        if !state.supported_queues.contains(&queue) {
            return Err(BackendError::FeatureNotSupported(format!("{:?} queue", queue)));
        }
        let id = state.next_id;
        state.next_id += 1;
        state.command_buffers.insert(
            id,
            CommandBufferState {
                slot: Some(slot),
                queue,
                state: RecordingState::Initial,
                commands: Vec::new(),
            },
        );
        state
            .calls
            .push(BackendCall::AllocateCommandBuffer { slot, id, queue });
        Ok(GpuCommandBuffer::Dummy { id, queue })
    }

    fn reset_command_buffers(&self, slot: usize) -> Result<(), BackendError> {
        let mut state = self.alive()?;
        state.command_buffers.retain(|_, cb| cb.slot != Some(slot));
        state.calls.push(BackendCall::ResetCommandBuffers { slot });
        Ok(())
    }

    fn free_slot(&self, slot: usize) {
        let mut state = self.state.lock();
        state.command_buffers.retain(|_, cb| cb.slot != Some(slot));
        state.calls.push(BackendCall::FreeSlot { slot });
    }

    fn allocate_persistent_command_buffer(
        &self,
        queue: QueueType,
    ) -> Result<GpuCommandBuffer, BackendError> {
        let mut state = self.alive()?;
        if !state.supported_queues.contains(&queue) {
            return Err(BackendError::FeatureNotSupported(format!("{:?} queue", queue)));
        }
        let id = state.next_id;
        state.next_id += 1;
        state.command_buffers.insert(
            id,
            CommandBufferState {
                slot: None,
                queue,
                state: RecordingState::Initial,
                commands: Vec::new(),
            },
        );
        state
            .calls
            .push(BackendCall::AllocatePersistentCommandBuffer { id, queue });
        Ok(GpuCommandBuffer::Dummy { id, queue })
    }

    fn free_command_buffer(&self, cmd: GpuCommandBuffer) {
        if let Ok(id) = command_buffer_id(cmd) {
            let mut state = self.state.lock();
            state.command_buffers.remove(&id);
            state.calls.push(BackendCall::FreeCommandBuffer(id));
        }
    }

    fn begin_command_buffer(&self, cmd: GpuCommandBuffer) -> Result<(), BackendError> {
        self.with_command_buffer(cmd, |cb| {
            if cb.state != RecordingState::Initial {
                return Err(BackendError::Internal(
                    "command buffer begun twice without reset".into(),
                ));
            }
            cb.state = RecordingState::Recording;
            Ok(())
        })
    }

    fn end_command_buffer(&self, cmd: GpuCommandBuffer) -> Result<(), BackendError> {
        self.with_command_buffer(cmd, |cb| {
            if cb.state != RecordingState::Recording {
                return Err(BackendError::Internal(
                    "command buffer ended while not recording".into(),
                ));
            }
            cb.state = RecordingState::Executable;
            Ok(())
        })
    }

    fn cmd_barriers(&self, cmd: GpuCommandBuffer, batch: &BarrierBatch) -> Result<(), BackendError> {
        log::trace!("DummyBackend: {} barriers", batch.len());
        self.record(cmd, RecordedCommand::Barriers(batch.iter().copied().collect()))
    }

    fn cmd_draw(
        &self,
        cmd: GpuCommandBuffer,
        vertex_count: u32,
        instance_count: u32,
    ) -> Result<(), BackendError> {
        self.record(
            cmd,
            RecordedCommand::Draw {
                vertex_count,
                instance_count,
            },
        )
    }

    fn cmd_dispatch(
        &self,
        cmd: GpuCommandBuffer,
        x: u32,
        y: u32,
        z: u32,
    ) -> Result<(), BackendError> {
        self.record(cmd, RecordedCommand::Dispatch { x, y, z })
    }

    fn cmd_update_buffer(
        &self,
        cmd: GpuCommandBuffer,
        buffer: u64,
        offset: u64,
        data: &[u8],
    ) -> Result<(), BackendError> {
        if data.len() > MAX_UPDATE_BUFFER_SIZE || data.len() % 4 != 0 || offset % 4 != 0 {
            return Err(BackendError::Internal(format!(
                "update of {} bytes at offset {} is not a valid inline update",
                data.len(),
                offset
            )));
        }
        self.record(
            cmd,
            RecordedCommand::UpdateBuffer {
                buffer,
                offset,
                size: data.len(),
            },
        )
    }

    fn submit(&self, submission: &QueueSubmission<'_>) -> Result<(), BackendError> {
        let mut state = self.alive()?;

        let mut command_buffers = Vec::with_capacity(submission.command_buffers.len());
        for &cmd in submission.command_buffers {
            let id = command_buffer_id(cmd)?;
            match state.command_buffers.get(&id) {
                Some(cb) if cb.state == RecordingState::Executable && cb.queue == submission.queue => {}
                Some(cb) => {
                    return Err(BackendError::Internal(format!(
                        "command buffer {} is {:?} on {:?}, submitted to {:?}",
                        id, cb.state, cb.queue, submission.queue
                    )));
                }
                None => return Err(BackendError::InvalidHandle(format!("command buffer {}", id))),
            }
            command_buffers.push(id);
        }

        let waits = submission
            .waits
            .iter()
            .map(|w| semaphore_id(w.semaphore))
            .collect::<Result<Vec<_>, _>>()?;
        let wait_stages = submission.waits.iter().map(|w| w.stages).collect();
        let signals = submission
            .signals
            .iter()
            .map(|s| semaphore_id(*s))
            .collect::<Result<Vec<_>, _>>()?;
        let fence = submission.fence.map(fence_id).transpose()?;

        if let Some(id) = fence {
            let next = if state.auto_signal {
                FenceState::SignalsAt(Instant::now() + state.latency)
            } else {
                FenceState::Pending
            };
            match state.fences.get_mut(&id) {
                Some(entry) if *entry == FenceState::Unsignaled => *entry = next,
                Some(_) => {
                    return Err(BackendError::Internal(format!(
                        "fence {} submitted while not reset",
                        id
                    )));
                }
                None => return Err(BackendError::InvalidHandle(format!("fence {}", id))),
            }
        }

        log::trace!(
            "DummyBackend: submit {} command buffers to {:?}",
            command_buffers.len(),
            submission.queue
        );
        state.calls.push(BackendCall::Submit {
            queue: submission.queue,
            command_buffers: command_buffers.clone(),
        });
        state.submissions.push(SubmitRecord {
            queue: submission.queue,
            command_buffers,
            waits,
            wait_stages,
            signals,
            fence,
        });
        drop(state);
        self.fence_signaled.notify_all();
        Ok(())
    }

    fn wait_idle(&self) -> Result<(), BackendError> {
        let mut state = self.alive()?;
        state.calls.push(BackendCall::WaitIdle);
        let now = Instant::now();
        for fence in state.fences.values_mut() {
            if let FenceState::SignalsAt(at) = fence
                && *at > now
            {
                *fence = FenceState::SignalsAt(now);
            }
        }
        drop(state);
        self.fence_signaled.notify_all();
        Ok(())
    }
}
