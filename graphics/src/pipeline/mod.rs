//! Frame coordinator: drives frames through the pipeline with multiple
//! frames in flight.
//!
//! [`FramePipeline`] owns the resource registry, the in-flight slots and the
//! per-frame stages. Each frame goes through:
//!
//! ```text
//! ┌──────────────┐  begin_frame: wait for the slot fence, recycle the slot
//! │     Idle     │
//! └──────┬───────┘
//!        ▼
//! ┌──────────────┐  declare_pass (any number of times)
//! │   Building   │
//! └──────┬───────┘
//!        ▼          end_frame:
//! ┌──────────────┐    1. resolve pass dependencies (FrameGraphBuilder)
//! │  Recording   │    2. record passes in parallel (SchedulerBridge)
//! └──────┬───────┘    3. plan barriers and semaphores (SyncManager)
//!        │            4. record barrier command buffers
//!        ▼            5. submit batches, fence on the last one
//! ┌──────────────┐    6. commit final resource states to the registry
//! │  Submitted   │
//! └──────┬───────┘
//!        ▼
//!   (fence wait when the slot comes around again)
//! ```
//!
//! # Synchronization Model
//!
//! | Level | Primitive | Purpose |
//! |-------|-----------|---------|
//! | Pass → Pass, same queue | Barriers | Layout transitions and memory visibility |
//! | Pass → Pass, other queue | Semaphores + ownership transfer | Cross-queue ordering |
//! | Frame → Frame | Fences | CPU-GPU back-pressure across slots |
//!
//! # Frame Overlap (Pipelining)
//!
//! With 2 frames in flight, the CPU and GPU work in parallel:
//!
//! ```text
//! Frame 1: [CPU build] [submit] ──────────────────────────────────────────►
//!                               [GPU execute frame 1] ────────────────────►
//!
//! Frame 2:              [CPU build] [submit] ─────────────────────────────►
//!                                            [GPU execute frame 2] ───────►
//!
//! Frame 3:                          [wait F1] [CPU build] [submit] ───────►
//! ```
//!
//! The fence wait in `begin_frame` is the only blocking point. It is
//! bounded by [`PipelineConfig::fence_timeout_ms`]; exceeding it is treated
//! like device loss.
//!
//! # Persistent Work
//!
//! Commands that do not change between frames, such as a static upload on
//! the transfer queue, can be recorded once with
//! [`FramePipeline::record_persistent_commands`] and attached to a pass in
//! any later frame. The pass is ordered and synchronized like any other but
//! is never re-recorded.
//!
//! # Errors
//!
//! Errors while building or recording abort the frame before any GPU
//! submission. Errors during submission, device loss and fence timeouts are
//! pipeline-fatal: every later call fails with
//! [`GraphicsError::DeviceLost`] until [`FramePipeline::reset`]. A failed
//! [`FrameFence::wait`] latches the pipeline the same way.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use cyclonite_graphics::backend::dummy::DummyBackend;
//! use cyclonite_graphics::graph::{PassDeclaration, ResourceAccess};
//! use cyclonite_graphics::pipeline::FramePipeline;
//! use cyclonite_graphics::types::{ImageDescriptor, ImageFormat};
//! use cyclonite_graphics::PipelineConfig;
//!
//! let mut pipeline = FramePipeline::new(Arc::new(DummyBackend::new()), PipelineConfig::default())?;
//! let color = pipeline
//!     .registry_mut()
//!     .register_image(ImageDescriptor::new_2d(800, 600, ImageFormat::Rgba16Float));
//!
//! for _ in 0..3 {
//!     let mut frame = pipeline.begin_frame()?;
//!     pipeline.declare_pass(
//!         &mut frame,
//!         PassDeclaration::new("clear")
//!             .writes(color, ResourceAccess::TransferWrite)
//!             .with_work(|_| Ok(())),
//!     )?;
//!     pipeline.declare_pass(
//!         &mut frame,
//!         PassDeclaration::new("blit").reads(color, ResourceAccess::TransferRead),
//!     )?;
//!     let fence = pipeline.end_frame(frame)?;
//!     assert_eq!(fence.slot(), (pipeline.frame_number() - 1) as usize % 2);
//! }
//!
//! pipeline.wait_idle()?;
//! # Ok::<(), cyclonite_graphics::GraphicsError>(())
//! ```

mod slot;
mod stats;

pub use stats::FrameStats;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::backend::{BackendError, GpuBackend, GpuCommandBuffer, GpuFence, GpuSemaphore};
use crate::config::PipelineConfig;
use crate::error::GraphicsError;
use crate::graph::{FrameGraph, FrameGraphBuilder, NodeId, PassDeclaration, PassWork};
use crate::registry::{ResourceHandle, ResourceRegistry};
use crate::scheduler::{self, CommandRecorder, RecordingReport, SchedulerBridge};
use crate::submit::{NodeCommands, SubmissionPlan, SubmitResources};
use crate::sync::{BarrierBatch, SwapchainTarget, SyncManager, SyncPlan};
use crate::types::{QueueType, ResourceState};

use slot::{DeferredRelease, FrameSlot, SlotTracker};

/// Where the pipeline is in the frame life cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FrameState {
    /// No frame is being built and no submitted frame is known to be
    /// outstanding.
    #[default]
    Idle,
    /// A [`FrameContext`] is out; passes are being declared.
    Building,
    /// `end_frame` is recording command buffers.
    Recording,
    /// The last frame was submitted and may still execute on the GPU.
    Submitted,
}

/// A frame under construction.
///
/// Returned by [`FramePipeline::begin_frame`] and consumed by
/// [`FramePipeline::end_frame`] or [`FramePipeline::abort_frame`].
#[derive(Debug)]
pub struct FrameContext {
    frame_number: u64,
    slot: usize,
    epoch: u64,
    builder: FrameGraphBuilder,
    swapchain: Option<SwapchainTarget>,
}

impl FrameContext {
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// In-flight slot the frame will be submitted with.
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Number of passes declared so far.
    pub fn pass_count(&self) -> usize {
        self.builder.len()
    }

    /// Render into a swapchain image this frame.
    ///
    /// `image_acquired` is the semaphore the presentation engine signals
    /// when the image is ready; the first pass touching `image` waits on it.
    /// `initial_state` is the state the image is handed over in, usually
    /// [`ResourceState::acquired_swapchain`]. It replaces the present state
    /// the previous frame left the image in. The last pass touching the
    /// image leaves it ready for presentation.
    pub fn set_swapchain_target(
        &mut self,
        image: ResourceHandle,
        image_acquired: Option<GpuSemaphore>,
        initial_state: ResourceState,
    ) {
        self.swapchain = Some(SwapchainTarget {
            resource: image,
            image_acquired,
            initial_state,
        });
    }

    pub fn swapchain_target(&self) -> Option<SwapchainTarget> {
        self.swapchain
    }
}

/// Completion handle of a submitted frame.
///
/// Stays valid after the slot is reused: a later frame on the same slot
/// only starts after this one was observed complete. It also stays valid
/// across [`FramePipeline::reset`], which records whether the frame
/// completed before its fence was destroyed.
///
/// A failed wait or query latches the pipeline that issued the fence into
/// the device-lost state, like a failed wait inside the pipeline does.
pub struct FrameFence {
    backend: Arc<dyn GpuBackend>,
    fence: GpuFence,
    render_finished: Option<GpuSemaphore>,
    tracker: Arc<SlotTracker>,
    lost: Arc<AtomicBool>,
    frame_number: u64,
    slot: usize,
}

impl FrameFence {
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Semaphore signaled when rendering finished, for presentation.
    ///
    /// `None` if the frame had no swapchain target.
    pub fn render_finished(&self) -> Option<GpuSemaphore> {
        self.render_finished
    }

    /// Check if the frame finished executing (non-blocking).
    ///
    /// Fails with [`GraphicsError::DeviceLost`] if the pipeline was reset
    /// before the frame was observed complete.
    pub fn is_signaled(&self) -> Result<bool, GraphicsError> {
        let destroyed = self.tracker.fence_destroyed();
        if let Some(outcome) = self.settled(*destroyed) {
            return outcome.map(|()| true);
        }
        self.backend
            .is_fence_signaled(self.fence)
            .map_err(|err| self.latch(err.into()))
    }

    /// Block until the frame finished executing.
    ///
    /// A timeout fails with [`GraphicsError::FenceTimeout`] and, like any
    /// other failure, leaves the pipeline needing a reset.
    pub fn wait(&self, timeout: Duration) -> Result<(), GraphicsError> {
        // Held across the wait so a concurrent reset cannot destroy the fence.
        let destroyed = self.tracker.fence_destroyed();
        if let Some(outcome) = self.settled(*destroyed) {
            return outcome;
        }
        match self.backend.wait_fence(self.fence, timeout) {
            Ok(()) => Ok(()),
            Err(BackendError::Timeout) if self.tracker.completed() >= self.frame_number => Ok(()),
            Err(BackendError::Timeout) => Err(self.latch(GraphicsError::FenceTimeout(timeout))),
            Err(err) => Err(self.latch(err.into())),
        }
    }

    /// Outcome known without asking the backend.
    fn settled(&self, fence_destroyed: bool) -> Option<Result<(), GraphicsError>> {
        if self.tracker.completed() >= self.frame_number {
            return Some(Ok(()));
        }
        if self.tracker.abandoned() >= self.frame_number {
            return Some(Err(GraphicsError::DeviceLost));
        }
        // A slot only moves on, or is torn down with nothing in flight,
        // after this frame completed.
        if fence_destroyed || self.tracker.submitted() != self.frame_number {
            return Some(Ok(()));
        }
        None
    }

    fn latch(&self, err: GraphicsError) -> GraphicsError {
        self.lost.store(true, Ordering::Release);
        log::error!("FrameFence: frame {}: {}", self.frame_number, err);
        err
    }
}

impl std::fmt::Debug for FrameFence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameFence")
            .field("fence", &self.fence)
            .field("frame_number", &self.frame_number)
            .field("slot", &self.slot)
            .finish_non_exhaustive()
    }
}

/// Coordinates frames in flight over a [`GpuBackend`].
///
/// # Frame Slots
///
/// With N frames in flight there are N slots, used round-robin by frame
/// number. A slot is reused only after its fence from N frames ago has
/// signaled.
///
/// ```text
/// frames_in_flight = 2
///
/// Slot 0: [Frame 1] ──► [Frame 3] ──► [Frame 5] ──►
/// Slot 1: [Frame 2] ──► [Frame 4] ──► [Frame 6] ──►
/// ```
///
/// # Thread Safety
///
/// `FramePipeline` is `Send` but should be driven from a single thread.
/// Parallelism happens inside `end_frame`, on the recording workers.
pub struct FramePipeline {
    backend: Arc<dyn GpuBackend>,
    config: PipelineConfig,
    registry: ResourceRegistry,
    slots: Vec<FrameSlot>,
    bridge: SchedulerBridge,
    sync: SyncManager,
    state: FrameState,
    /// Number of the last frame handed out by `begin_frame`.
    frame_number: u64,
    /// Frame currently being built, if any.
    building: Option<u64>,
    /// Bumped on reset so contexts from before the reset are rejected.
    epoch: u64,
    /// Shared with the fences of the current epoch; replaced on reset.
    lost: Arc<AtomicBool>,
    pending_fence_wait: Duration,
    last_stats: Option<FrameStats>,
}

impl FramePipeline {
    /// Create a pipeline and its in-flight slots.
    pub fn new(backend: Arc<dyn GpuBackend>, config: PipelineConfig) -> Result<Self, GraphicsError> {
        config.validate()?;

        let cross_queue = config.cross_queue;
        if cross_queue {
            for queue in [QueueType::Compute, QueueType::Transfer] {
                if !backend.supports_queue(queue) {
                    log::info!(
                        "FramePipeline: backend has no {:?} queue, such passes run on graphics",
                        queue
                    );
                }
            }
        }

        let slots = create_slots(backend.as_ref(), config.frames_in_flight)?;

        log::info!(
            "FramePipeline: {} frames in flight, {} recording workers, backend '{}'",
            config.frames_in_flight,
            config.worker_count,
            backend.name()
        );

        Ok(Self {
            bridge: SchedulerBridge::new(config.worker_count),
            sync: SyncManager::new(cross_queue),
            backend,
            config,
            registry: ResourceRegistry::new(),
            slots,
            state: FrameState::Idle,
            frame_number: 0,
            building: None,
            epoch: 0,
            lost: Arc::new(AtomicBool::new(false)),
            pending_fence_wait: Duration::ZERO,
            last_stats: None,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn GpuBackend> {
        &self.backend
    }

    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    /// Mutable access for registering resources and refreshing external
    /// state.
    pub fn registry_mut(&mut self) -> &mut ResourceRegistry {
        &mut self.registry
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    /// Number of the most recently begun frame. Frame numbers start at 1.
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    /// Slot the next frame will use.
    pub fn current_slot(&self) -> usize {
        self.slot_for(self.frame_number + 1)
    }

    /// Check if the device was lost and the pipeline needs a reset.
    pub fn is_device_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }

    pub fn last_frame_stats(&self) -> Option<&FrameStats> {
        self.last_stats.as_ref()
    }

    /// Check if `slot` can be reused without blocking.
    pub fn is_slot_ready(&mut self, slot: usize) -> Result<bool, GraphicsError> {
        self.ensure_alive()?;
        let backend = Arc::clone(&self.backend);
        let frame_slot = self
            .slots
            .get_mut(slot)
            .ok_or_else(|| GraphicsError::InvalidState(format!("no slot {}", slot)))?;
        let ready = frame_slot.poll(backend.as_ref()).map_err(|e| self.fatal(e))?;
        if ready {
            self.release_deferred(slot);
        }
        Ok(ready)
    }

    /// Observe finished frames without blocking.
    ///
    /// Returns `true` if no submitted work is outstanding.
    pub fn poll(&mut self) -> Result<bool, GraphicsError> {
        self.ensure_alive()?;
        let mut all_done = true;
        for slot in 0..self.slots.len() {
            all_done &= self.is_slot_ready(slot)?;
        }
        if all_done && self.state == FrameState::Submitted {
            self.state = FrameState::Idle;
        }
        Ok(all_done)
    }

    /// Start a frame.
    ///
    /// Blocks until the frame's slot is free, then recycles the slot. If a
    /// previous context was dropped without `end_frame` or `abort_frame`,
    /// that frame is discarded.
    pub fn begin_frame(&mut self) -> Result<FrameContext, GraphicsError> {
        cyclonite_core::profile_function!();
        self.ensure_alive()?;

        match self.state {
            FrameState::Idle | FrameState::Submitted => {}
            FrameState::Building => {
                log::warn!(
                    "FramePipeline: frame {} was never ended, discarding it",
                    self.frame_number
                );
            }
            FrameState::Recording => {
                return Err(GraphicsError::InvalidState(
                    "begin_frame called while recording".into(),
                ));
            }
        }

        let frame_number = self.frame_number + 1;
        let slot = self.slot_for(frame_number);
        let timeout = self.config.fence_timeout();
        let backend = Arc::clone(&self.backend);

        let waited = self.slots[slot]
            .wait(backend.as_ref(), timeout)
            .map_err(|e| self.fatal(e))?;
        self.release_deferred(slot);
        self.slots[slot]
            .recycle(backend.as_ref())
            .map_err(|e| self.fatal(e))?;

        if waited > Duration::ZERO {
            log::trace!("FramePipeline: waited {:?} for slot {}", waited, slot);
        }

        self.frame_number = frame_number;
        self.building = Some(frame_number);
        self.pending_fence_wait = waited;
        self.state = FrameState::Building;

        log::trace!("Begin frame {} (slot {})", frame_number, slot);

        Ok(FrameContext {
            frame_number,
            slot,
            epoch: self.epoch,
            builder: FrameGraphBuilder::new().with_cross_queue(self.config.cross_queue),
            swapchain: None,
        })
    }

    /// Declare a pass for the frame.
    ///
    /// Resource handles are checked right away, so an unknown handle fails
    /// here rather than at `end_frame`.
    pub fn declare_pass(
        &self,
        frame: &mut FrameContext,
        pass: PassDeclaration,
    ) -> Result<NodeId, GraphicsError> {
        self.ensure_alive()?;
        self.check_context(frame)?;

        for access in pass.accesses() {
            self.registry.descriptor(access.resource)?;
        }

        let pass = if self.config.cross_queue && self.resolve_queue(pass.queue()) != pass.queue() {
            log::debug!(
                "FramePipeline: pass '{}' moved from {:?} to graphics",
                pass.name(),
                pass.queue()
            );
            pass.on_queue(QueueType::Graphics)
        } else {
            pass
        };

        Ok(frame.builder.add_pass(pass))
    }

    /// Discard a frame without any GPU call.
    pub fn abort_frame(&mut self, frame: FrameContext) -> Result<(), GraphicsError> {
        self.check_context(&frame)?;
        log::warn!(
            "FramePipeline: frame {} aborted with {} passes",
            frame.frame_number,
            frame.pass_count()
        );
        self.finish_without_submit();
        Ok(())
    }

    /// Build, record, synchronize and submit the frame.
    ///
    /// On a frame-level error (bad declarations, failed recording) nothing
    /// is submitted and the pipeline stays usable. Submission errors are
    /// pipeline-fatal.
    pub fn end_frame(&mut self, frame: FrameContext) -> Result<FrameFence, GraphicsError> {
        cyclonite_core::profile_function!();
        self.ensure_alive()?;
        self.check_context(&frame)?;

        self.state = FrameState::Recording;
        match self.execute_frame(frame) {
            Ok(fence) => Ok(fence),
            Err(err) => {
                if err.is_pipeline_fatal() || self.is_device_lost() {
                    self.lost.store(true, Ordering::Release);
                    log::error!("FramePipeline: frame failed fatally: {}", err);
                } else {
                    log::warn!("FramePipeline: frame aborted: {}", err);
                    self.finish_without_submit();
                }
                Err(err)
            }
        }
    }

    fn execute_frame(&mut self, frame: FrameContext) -> Result<FrameFence, GraphicsError> {
        let FrameContext {
            frame_number,
            slot,
            builder,
            swapchain,
            ..
        } = frame;

        if let Some(target) = swapchain
            && !self.registry.is_external(target.resource)?
        {
            return Err(GraphicsError::InvalidState(format!(
                "swapchain target {} is not an external resource",
                target.resource
            )));
        }

        let mut graph = builder.build(&self.registry)?;

        self.slots[slot].mark_recorded();
        let recording = self
            .bridge
            .record(&mut graph, self.backend.as_ref(), slot)?;

        let plan = self.sync.plan(&graph, &self.registry, swapchain)?;
        let (commands, entry_commands) =
            self.record_barriers(&graph, &recording, &plan, slot)?;
        let submission = SubmissionPlan::build(&graph, &plan, &commands, &entry_commands);

        let backend = Arc::clone(&self.backend);
        let fence = self.slots[slot].fence();
        let render_finished = self.slots[slot].render_finished();
        let edge_semaphores =
            self.slots[slot].semaphores(backend.as_ref(), submission.semaphore_count())?;
        let resources = SubmitResources {
            fence,
            render_finished,
            image_acquired: swapchain.and_then(|t| t.image_acquired),
            edge_semaphores,
        };

        if let Err(err) = submission.submit(backend.as_ref(), &resources) {
            // Part of the frame may already be on the GPU.
            self.lost.store(true, Ordering::Release);
            return Err(err);
        }
        self.slots[slot].mark_submitted(frame_number);

        self.sync.commit(&plan, &mut self.registry)?;

        let stats = FrameStats {
            frame_number,
            slot,
            pass_count: graph.len(),
            edge_count: graph.edge_count(),
            barrier_count: plan.barrier_count(),
            semaphore_count: submission.semaphore_count(),
            batch_count: submission.batches().len(),
            command_count: recording.command_count(),
            max_recording_concurrency: recording.max_concurrency(),
            fence_wait: self.pending_fence_wait,
        };
        stats.plot();
        cyclonite_core::frame_mark!();

        log::debug!(
            "End frame {} (slot {}): {} passes, {} edges, {} barriers, {} batches",
            frame_number,
            slot,
            stats.pass_count,
            stats.edge_count,
            stats.barrier_count,
            stats.batch_count
        );

        self.last_stats = Some(stats);
        self.building = None;
        self.state = FrameState::Submitted;

        Ok(FrameFence {
            backend,
            fence,
            render_finished: plan.present_node().map(|_| render_finished),
            tracker: Arc::clone(self.slots[slot].tracker()),
            lost: Arc::clone(&self.lost),
            frame_number,
            slot,
        })
    }

    /// Record prologue, epilogue and entry-release barrier batches into
    /// their own command buffers.
    fn record_barriers(
        &self,
        graph: &FrameGraph,
        recording: &RecordingReport,
        plan: &SyncPlan,
        slot: usize,
    ) -> Result<(Vec<NodeCommands>, Vec<GpuCommandBuffer>), GraphicsError> {
        cyclonite_core::profile_scope!("record_barriers");

        let mut commands = Vec::with_capacity(graph.len());
        for node in graph.nodes() {
            let sync = plan.node(node.id());
            commands.push(NodeCommands {
                prologue: self.record_batch(&sync.prologue, node.queue(), slot)?,
                main: recording.pass(node.id()).command_buffer,
                epilogue: self.record_batch(&sync.epilogue, node.queue(), slot)?,
            });
        }

        let mut entry_commands = Vec::with_capacity(plan.entry_releases().len());
        for entry in plan.entry_releases() {
            if let Some(cmd) = self.record_batch(&entry.batch, entry.queue, slot)? {
                entry_commands.push(cmd);
            }
        }

        Ok((commands, entry_commands))
    }

    fn record_batch(
        &self,
        batch: &BarrierBatch,
        queue: QueueType,
        slot: usize,
    ) -> Result<Option<GpuCommandBuffer>, GraphicsError> {
        if batch.is_empty() {
            return Ok(None);
        }
        let cmd = self.backend.allocate_command_buffer(slot, queue)?;
        self.backend.begin_command_buffer(cmd)?;
        self.backend.cmd_barriers(cmd, batch)?;
        self.backend.end_command_buffer(cmd)?;
        Ok(Some(cmd))
    }

    /// Release a resource once the GPU can no longer be using it.
    ///
    /// Without submitted work outstanding the release happens immediately.
    /// Otherwise it waits for the most recently submitted frame.
    pub fn release_resource(&mut self, resource: ResourceHandle) -> Result<(), GraphicsError> {
        self.ensure_alive()?;
        if !self.registry.contains(resource) {
            return Err(GraphicsError::UnknownResource(resource));
        }

        if let Some(DeferredRelease::Resource(resource)) =
            self.defer(DeferredRelease::Resource(resource))
        {
            self.registry.release(resource)?;
        }
        Ok(())
    }

    /// Record commands once, for submission by passes of later frames.
    ///
    /// The returned buffer is attached with
    /// [`PassDeclaration::with_persistent_commands`] and submitted as
    /// recorded, as often as it is attached. `queue` falls back to graphics
    /// the same way a pass queue does, so the pass must be declared on the
    /// same requested queue. Release the buffer with
    /// [`release_persistent_commands`](Self::release_persistent_commands).
    pub fn record_persistent_commands<F>(
        &self,
        name: &str,
        queue: QueueType,
        work: F,
    ) -> Result<GpuCommandBuffer, GraphicsError>
    where
        F: FnOnce(&mut CommandRecorder<'_>) -> Result<(), GraphicsError> + Send + 'static,
    {
        cyclonite_core::profile_function!();
        self.ensure_alive()?;

        let queue = if self.config.cross_queue {
            self.resolve_queue(queue)
        } else {
            QueueType::Graphics
        };
        let result = self.record_persistent(name, queue, Box::new(work));
        if let Err(err) = &result
            && err.is_pipeline_fatal()
        {
            self.lost.store(true, Ordering::Release);
        }
        result
    }

    fn record_persistent(
        &self,
        name: &str,
        queue: QueueType,
        work: PassWork,
    ) -> Result<GpuCommandBuffer, GraphicsError> {
        let cmd = self.backend.allocate_persistent_command_buffer(queue)?;
        match scheduler::record_pass(self.backend.as_ref(), cmd, name, Some(work)) {
            Ok(count) => {
                log::debug!(
                    "FramePipeline: recorded persistent '{}' on {:?} ({} commands)",
                    name,
                    queue,
                    count
                );
                Ok(cmd)
            }
            Err(err) => {
                self.backend.free_command_buffer(cmd);
                Err(err)
            }
        }
    }

    /// Free a persistent command buffer once no submitted frame uses it.
    pub fn release_persistent_commands(&mut self, commands: GpuCommandBuffer) {
        if let Some(release) = self.defer(DeferredRelease::Commands(commands)) {
            self.perform_release(release);
        }
    }

    /// Wait for all submitted work, then for the device to go idle.
    pub fn wait_idle(&mut self) -> Result<(), GraphicsError> {
        self.ensure_alive()?;
        log::trace!("Waiting for GPU idle ({} slots)", self.slots.len());

        let timeout = self.config.fence_timeout();
        let backend = Arc::clone(&self.backend);
        for slot in 0..self.slots.len() {
            self.slots[slot]
                .wait(backend.as_ref(), timeout)
                .map_err(|e| self.fatal(e))?;
            self.release_deferred(slot);
        }
        backend.wait_idle().map_err(|e| self.fatal(e))?;

        if self.state == FrameState::Submitted {
            self.state = FrameState::Idle;
        }
        log::trace!("GPU idle");
        Ok(())
    }

    /// Rebuild the pipeline after device loss or a fence timeout.
    ///
    /// Recreates every slot, forgets all recorded resource states and
    /// performs pending deferred releases. Contexts from before the reset
    /// are rejected.
    pub fn reset(&mut self) -> Result<(), GraphicsError> {
        log::info!("FramePipeline: reset (epoch {})", self.epoch + 1);

        if let Err(err) = self.backend.wait_idle() {
            log::warn!("FramePipeline: wait_idle during reset failed: {}", err);
        }

        self.teardown_slots();

        self.registry.reset_states();
        self.epoch += 1;
        self.building = None;
        self.state = FrameState::Idle;
        self.last_stats = None;

        // Fences of the old epoch keep the old flag.
        self.lost = Arc::new(AtomicBool::new(false));
        self.slots = create_slots(self.backend.as_ref(), self.config.frames_in_flight)?;
        Ok(())
    }

    fn slot_for(&self, frame_number: u64) -> usize {
        ((frame_number.saturating_sub(1)) % self.slots.len().max(1) as u64) as usize
    }

    /// Queue a pass or persistent recording requesting `requested` ends up
    /// on when cross-queue submission is enabled.
    fn resolve_queue(&self, requested: QueueType) -> QueueType {
        if self.backend.supports_queue(requested) {
            requested
        } else {
            QueueType::Graphics
        }
    }

    fn ensure_alive(&self) -> Result<(), GraphicsError> {
        if self.is_device_lost() {
            Err(GraphicsError::DeviceLost)
        } else {
            Ok(())
        }
    }

    fn check_context(&self, frame: &FrameContext) -> Result<(), GraphicsError> {
        if frame.epoch != self.epoch || self.building != Some(frame.frame_number) {
            return Err(GraphicsError::InvalidState(format!(
                "frame {} is not the frame being built",
                frame.frame_number
            )));
        }
        Ok(())
    }

    /// Latch a backend failure that happened while waiting on or recycling
    /// a slot.
    fn fatal(&mut self, err: BackendError) -> GraphicsError {
        self.lost.store(true, Ordering::Release);
        let err = match err {
            BackendError::Timeout => GraphicsError::FenceTimeout(self.config.fence_timeout()),
            other => GraphicsError::from(other),
        };
        log::error!("FramePipeline: {}", err);
        err
    }

    fn release_deferred(&mut self, slot: usize) {
        for release in self.slots[slot].take_deferred_releases() {
            self.perform_release(release);
        }
    }

    /// Attach `release` to the newest frame still in flight. Hands it back
    /// if nothing is in flight.
    fn defer(&mut self, release: DeferredRelease) -> Option<DeferredRelease> {
        let newest = self
            .slots
            .iter_mut()
            .filter_map(|s| s.in_flight().map(|frame| (frame, s)))
            .max_by_key(|(frame, _)| *frame);

        match newest {
            Some((frame, slot)) => {
                log::trace!(
                    "FramePipeline: {:?} deferred until frame {} completes",
                    release,
                    frame
                );
                slot.defer_release(release);
                None
            }
            None => Some(release),
        }
    }

    fn perform_release(&mut self, release: DeferredRelease) {
        match release {
            DeferredRelease::Resource(resource) => match self.registry.release(resource) {
                Ok(_) => log::trace!("FramePipeline: released {}", resource),
                Err(err) => log::warn!("FramePipeline: deferred release failed: {}", err),
            },
            DeferredRelease::Commands(commands) => {
                self.backend.free_command_buffer(commands);
                log::trace!("FramePipeline: freed persistent commands {:?}", commands);
            }
        }
    }

    /// Destroy every slot. Frames still in flight are retired first, so
    /// their fences report completion or abandonment afterwards.
    fn teardown_slots(&mut self) {
        let backend = Arc::clone(&self.backend);
        let mut pending = Vec::new();
        for mut slot in self.slots.drain(..) {
            slot.retire(backend.as_ref());
            pending.extend(slot.take_deferred_releases());
            slot.destroy(backend.as_ref());
        }
        for release in pending {
            self.perform_release(release);
        }
    }

    fn finish_without_submit(&mut self) {
        self.building = None;
        self.state = if self.slots.iter().any(|s| s.in_flight().is_some()) {
            FrameState::Submitted
        } else {
            FrameState::Idle
        };
    }
}

fn create_slots(backend: &dyn GpuBackend, count: usize) -> Result<Vec<FrameSlot>, GraphicsError> {
    let mut slots = Vec::with_capacity(count);
    for index in 0..count {
        match FrameSlot::new(backend, index) {
            Ok(slot) => slots.push(slot),
            Err(err) => {
                for slot in slots {
                    slot.destroy(backend);
                }
                return Err(err.into());
            }
        }
    }
    Ok(slots)
}

impl Drop for FramePipeline {
    fn drop(&mut self) {
        if !self.is_device_lost()
            && let Err(err) = self.wait_idle()
        {
            log::warn!("FramePipeline: wait_idle on drop failed: {}", err);
        }
        self.teardown_slots();
    }
}

impl std::fmt::Debug for FramePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramePipeline")
            .field("backend", &self.backend.name())
            .field("frames_in_flight", &self.slots.len())
            .field("state", &self.state)
            .field("frame_number", &self.frame_number)
            .field("lost", &self.is_device_lost())
            .finish_non_exhaustive()
    }
}

static_assertions::assert_impl_all!(FramePipeline: Send);
static_assertions::assert_impl_all!(FrameFence: Send, Sync);
static_assertions::assert_impl_all!(FrameContext: Send);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyBackend;
    use crate::graph::ResourceAccess;
    use crate::types::{ImageDescriptor, ImageFormat};

    fn pipeline(frames: usize) -> (Arc<DummyBackend>, FramePipeline) {
        let backend = Arc::new(DummyBackend::new());
        let config = PipelineConfig::default()
            .with_frames_in_flight(frames)
            .with_worker_count(2);
        let pipeline = FramePipeline::new(backend.clone(), config).unwrap();
        (backend, pipeline)
    }

    #[test]
    fn test_slots_rotate() {
        let (_backend, mut pipeline) = pipeline(3);
        let mut slots = Vec::new();
        for _ in 0..6 {
            let frame = pipeline.begin_frame().unwrap();
            slots.push(frame.slot());
            pipeline.end_frame(frame).unwrap();
        }
        assert_eq!(slots, vec![0, 1, 2, 0, 1, 2]);
        assert_eq!(pipeline.frame_number(), 6);
        assert_eq!(pipeline.current_slot(), 0);
    }

    #[test]
    fn test_state_machine() {
        let (_backend, mut pipeline) = pipeline(2);
        assert_eq!(pipeline.state(), FrameState::Idle);

        let frame = pipeline.begin_frame().unwrap();
        assert_eq!(pipeline.state(), FrameState::Building);
        pipeline.end_frame(frame).unwrap();
        assert_eq!(pipeline.state(), FrameState::Submitted);

        assert!(pipeline.poll().unwrap());
        assert_eq!(pipeline.state(), FrameState::Idle);
    }

    #[test]
    fn test_stale_context_rejected() {
        let (_backend, mut pipeline) = pipeline(2);
        let stale = pipeline.begin_frame().unwrap();
        let current = pipeline.begin_frame().unwrap();

        assert!(matches!(
            pipeline.end_frame(stale),
            Err(GraphicsError::InvalidState(_))
        ));
        pipeline.end_frame(current).unwrap();
    }

    #[test]
    fn test_declare_pass_checks_handles() {
        let (_backend, mut pipeline) = pipeline(2);
        let image = pipeline
            .registry_mut()
            .register_image(ImageDescriptor::new_2d(4, 4, ImageFormat::Rgba8Unorm));
        pipeline.registry_mut().release(image).unwrap();

        let mut frame = pipeline.begin_frame().unwrap();
        let err = pipeline
            .declare_pass(
                &mut frame,
                PassDeclaration::new("draw").writes(image, ResourceAccess::ColorAttachmentWrite),
            )
            .unwrap_err();
        assert_eq!(err, GraphicsError::UnknownResource(image));
        pipeline.abort_frame(frame).unwrap();
    }

    #[test]
    fn test_unsupported_queue_falls_back_to_graphics() {
        let backend = Arc::new(DummyBackend::graphics_only());
        let config = PipelineConfig::default().with_cross_queue(true);
        let mut pipeline = FramePipeline::new(backend.clone(), config).unwrap();

        let mut frame = pipeline.begin_frame().unwrap();
        pipeline
            .declare_pass(
                &mut frame,
                PassDeclaration::new("cull").on_queue(QueueType::Compute),
            )
            .unwrap();
        pipeline.end_frame(frame).unwrap();

        assert!(
            backend
                .submissions()
                .iter()
                .all(|s| s.queue == QueueType::Graphics)
        );
    }

    #[test]
    fn test_frame_fence_outlives_slot_reuse() {
        let (_backend, mut pipeline) = pipeline(1);
        let frame = pipeline.begin_frame().unwrap();
        let first = pipeline.end_frame(frame).unwrap();

        let frame = pipeline.begin_frame().unwrap();
        let second = pipeline.end_frame(frame).unwrap();

        assert_eq!(first.slot(), second.slot());
        assert!(first.is_signaled().unwrap());
        second.wait(Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn test_frame_fence_outlives_reset() {
        let (backend, mut pipeline) = pipeline(2);
        let frame = pipeline.begin_frame().unwrap();
        let completed = pipeline.end_frame(frame).unwrap();
        assert!(pipeline.poll().unwrap());

        backend.set_auto_signal(false);
        let frame = pipeline.begin_frame().unwrap();
        let outstanding = pipeline.end_frame(frame).unwrap();

        pipeline.reset().unwrap();
        backend.clear_calls();

        completed.wait(Duration::from_millis(10)).unwrap();
        assert!(completed.is_signaled().unwrap());
        assert_eq!(
            outstanding.wait(Duration::from_millis(10)),
            Err(GraphicsError::DeviceLost)
        );
        assert_eq!(outstanding.is_signaled(), Err(GraphicsError::DeviceLost));
        // Destroyed fences are never handed back to the backend.
        assert!(backend.calls().is_empty());
        assert!(!pipeline.is_device_lost());
    }

    #[test]
    fn test_frame_fence_timeout_latches_pipeline() {
        let (backend, mut pipeline) = pipeline(2);
        backend.set_auto_signal(false);
        let frame = pipeline.begin_frame().unwrap();
        let fence = pipeline.end_frame(frame).unwrap();

        let timeout = Duration::from_millis(10);
        assert_eq!(fence.wait(timeout), Err(GraphicsError::FenceTimeout(timeout)));
        assert!(pipeline.is_device_lost());
        assert_eq!(
            pipeline.begin_frame().unwrap_err(),
            GraphicsError::DeviceLost
        );

        backend.set_auto_signal(true);
        pipeline.reset().unwrap();
        assert!(!pipeline.is_device_lost());
        // The old fence belongs to the previous epoch.
        assert_eq!(fence.wait(timeout), Err(GraphicsError::DeviceLost));
        assert!(!pipeline.is_device_lost());
        let frame = pipeline.begin_frame().unwrap();
        pipeline.end_frame(frame).unwrap();
    }

    #[test]
    fn test_persistent_pass_submitted_without_recording() {
        use crate::backend::dummy::{BackendCall, RecordedCommand};
        use crate::types::BufferDescriptor;

        let (backend, mut pipeline) = pipeline(2);
        let instances = pipeline
            .registry_mut()
            .register_buffer(BufferDescriptor::new(256));
        let upload = pipeline
            .record_persistent_commands("upload", QueueType::Transfer, |r| {
                r.update_buffer(5, 0, &[1u8; 16])
            })
            .unwrap();
        // No cross-queue, so the upload lands on graphics.
        assert_eq!(upload.queue(), QueueType::Graphics);

        for _ in 0..2 {
            let mut frame = pipeline.begin_frame().unwrap();
            pipeline
                .declare_pass(
                    &mut frame,
                    PassDeclaration::new("upload")
                        .on_queue(QueueType::Transfer)
                        .with_persistent_commands(upload)
                        .writes(instances, ResourceAccess::TransferWrite),
                )
                .unwrap();
            pipeline
                .declare_pass(
                    &mut frame,
                    PassDeclaration::new("draw")
                        .reads(instances, ResourceAccess::VertexBuffer)
                        .with_work(|r| r.draw(3, 1)),
                )
                .unwrap();
            pipeline.end_frame(frame).unwrap();
        }

        let upload_id = match upload {
            GpuCommandBuffer::Dummy { id, .. } => id,
            #[allow(unreachable_patterns)]
            _ => unreachable!(),
        };
        let submitted = backend
            .submissions()
            .iter()
            .filter(|s| s.command_buffers.contains(&upload_id))
            .count();
        assert_eq!(submitted, 2);
        assert_eq!(
            backend.recorded_commands(upload).unwrap(),
            vec![RecordedCommand::UpdateBuffer {
                buffer: 5,
                offset: 0,
                size: 16
            }]
        );
        assert_eq!(pipeline.last_frame_stats().unwrap().command_count, 1);

        backend.set_auto_signal(false);
        let frame = pipeline.begin_frame().unwrap();
        pipeline.end_frame(frame).unwrap();
        backend.clear_calls();
        pipeline.release_persistent_commands(upload);
        assert!(!backend.calls().contains(&BackendCall::FreeCommandBuffer(upload_id)));

        backend.signal_all_fences();
        pipeline.wait_idle().unwrap();
        assert!(backend.calls().contains(&BackendCall::FreeCommandBuffer(upload_id)));
        assert!(backend.recorded_commands(upload).is_none());
    }

    #[test]
    fn test_failed_persistent_recording_frees_buffer() {
        use crate::backend::dummy::BackendCall;

        let (backend, pipeline) = pipeline(2);
        let err = pipeline
            .record_persistent_commands("upload", QueueType::Graphics, |r| {
                r.update_buffer(5, 2, &[1u8; 3])
            })
            .unwrap_err();
        assert!(matches!(err, GraphicsError::Recording { .. }));
        assert!(
            backend
                .calls()
                .iter()
                .any(|call| matches!(call, BackendCall::FreeCommandBuffer(_)))
        );
        assert!(!pipeline.is_device_lost());
    }
}
