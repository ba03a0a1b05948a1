//! Command submission: grouping recorded command buffers into queue
//! submissions.
//!
//! Batches are formed by walking the frame graph in execution order:
//!
//! - consecutive nodes on one queue share a batch, their command buffers in
//!   execution order (prologue barriers, pass, epilogue barriers)
//! - a node that waits on a semaphore starts a new batch
//! - a node that signals a semaphore ends its batch
//!
//! Batches are submitted in the order they were formed, so every semaphore
//! is submitted for signaling before the batch waiting on it. The slot fence
//! is attached to the last batch. When several queues took part, their
//! final batches signal join semaphores and a final empty batch on the
//! presenting queue waits on all of them and carries the fence.

use crate::backend::{
    GpuBackend, GpuCommandBuffer, GpuFence, GpuSemaphore, QueueSubmission, SemaphoreWaitInfo,
};
use crate::error::GraphicsError;
use crate::graph::FrameGraph;
use crate::sync::{SemaphoreId, SemaphoreWait, SyncPlan, SyncSemaphore};
use crate::types::{PipelineStages, QueueType};

/// Command buffers belonging to one node, in submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeCommands {
    pub prologue: Option<GpuCommandBuffer>,
    pub main: GpuCommandBuffer,
    pub epilogue: Option<GpuCommandBuffer>,
}

impl NodeCommands {
    pub fn iter(&self) -> impl Iterator<Item = GpuCommandBuffer> {
        self.prologue
            .into_iter()
            .chain(std::iter::once(self.main))
            .chain(self.epilogue)
    }
}

/// One queue submission of the frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitBatch {
    pub queue: QueueType,
    pub command_buffers: Vec<GpuCommandBuffer>,
    pub waits: Vec<SemaphoreWait>,
    pub signals: Vec<SyncSemaphore>,
    pub signal_fence: bool,
    pub signal_render_finished: bool,
}

impl SubmitBatch {
    fn new(queue: QueueType) -> Self {
        Self {
            queue,
            command_buffers: Vec::new(),
            waits: Vec::new(),
            signals: Vec::new(),
            signal_fence: false,
            signal_render_finished: false,
        }
    }
}

/// Synchronization objects the submitted batches refer to.
#[derive(Debug, Clone, Copy)]
pub struct SubmitResources<'a> {
    /// Slot fence, unsignaled.
    pub fence: GpuFence,
    pub render_finished: GpuSemaphore,
    pub image_acquired: Option<GpuSemaphore>,
    /// Backing semaphores for [`SyncSemaphore::Edge`], indexed by id.
    pub edge_semaphores: &'a [GpuSemaphore],
}

/// Ordered queue submissions of one frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmissionPlan {
    batches: Vec<SubmitBatch>,
    semaphore_count: usize,
}

impl SubmissionPlan {
    /// Group command buffers into batches.
    ///
    /// `commands` is indexed by node; `entry_commands` holds one command
    /// buffer per [`SyncPlan::entry_releases`] entry.
    pub fn build(
        graph: &FrameGraph,
        sync: &SyncPlan,
        commands: &[NodeCommands],
        entry_commands: &[GpuCommandBuffer],
    ) -> Self {
        let mut batches = Vec::new();

        for (entry, &cmd) in sync.entry_releases().iter().zip(entry_commands) {
            let mut batch = SubmitBatch::new(entry.queue);
            batch.command_buffers.push(cmd);
            batch.signals.push(SyncSemaphore::Edge(entry.signal));
            batches.push(batch);
        }

        let mut current: Option<SubmitBatch> = None;
        for &id in graph.topological_order() {
            let queue = graph.node(id).queue();
            let node_sync = sync.node(id);

            let breaks = current
                .as_ref()
                .is_some_and(|b| b.queue != queue || !node_sync.waits.is_empty());
            if breaks {
                batches.extend(current.take());
            }

            let batch = current.get_or_insert_with(|| SubmitBatch::new(queue));
            batch.waits.extend(node_sync.waits.iter().copied());
            batch.command_buffers.extend(commands[id.index()].iter());

            if !node_sync.signals.is_empty() {
                batch.signals.extend(node_sync.signals.iter().copied());
                batches.extend(current.take());
            }
        }
        batches.extend(current);

        let mut semaphore_count = sync.semaphore_count();
        let final_queue = if batches.iter().any(|b| b.queue == QueueType::Graphics) {
            QueueType::Graphics
        } else {
            batches.last().map_or(QueueType::Graphics, |b| b.queue)
        };

        let mut joins = Vec::new();
        for queue in QueueType::ALL {
            if queue == final_queue {
                continue;
            }
            if let Some(last) = batches.iter_mut().rev().find(|b| b.queue == queue) {
                let join = SyncSemaphore::Edge(SemaphoreId::new(semaphore_count));
                semaphore_count += 1;
                last.signals.push(join);
                joins.push(SemaphoreWait {
                    semaphore: join,
                    stages: PipelineStages::ALL_COMMANDS,
                });
            }
        }

        let final_batch = if joins.is_empty()
            && let Some(index) = batches.iter().rposition(|b| b.queue == final_queue)
        {
            &mut batches[index]
        } else {
            let mut join_batch = SubmitBatch::new(final_queue);
            join_batch.waits = joins;
            batches.push(join_batch);
            let last = batches.len() - 1;
            &mut batches[last]
        };
        final_batch.signal_fence = true;
        final_batch.signal_render_finished = sync.present_node().is_some();

        Self {
            batches,
            semaphore_count,
        }
    }

    pub fn batches(&self) -> &[SubmitBatch] {
        &self.batches
    }

    /// Edge semaphores needed, including join semaphores.
    pub fn semaphore_count(&self) -> usize {
        self.semaphore_count
    }

    /// Issue every batch in order.
    ///
    /// A failure part-way leaves earlier batches submitted; the caller must
    /// treat it as pipeline-fatal.
    pub fn submit(
        &self,
        backend: &dyn GpuBackend,
        resources: &SubmitResources<'_>,
    ) -> Result<(), GraphicsError> {
        cyclonite_core::profile_function!();

        let resolve = |semaphore: SyncSemaphore| -> Result<GpuSemaphore, GraphicsError> {
            match semaphore {
                SyncSemaphore::ImageAcquired => resources.image_acquired.ok_or_else(|| {
                    GraphicsError::InvalidState("no image-acquired semaphore".into())
                }),
                SyncSemaphore::Edge(id) => {
                    resources.edge_semaphores.get(id.index()).copied().ok_or_else(|| {
                        GraphicsError::InvalidState(format!("missing semaphore {}", id.index()))
                    })
                }
                SyncSemaphore::External(semaphore) => Ok(semaphore),
            }
        };

        for batch in &self.batches {
            let waits = batch
                .waits
                .iter()
                .map(|w| {
                    Ok(SemaphoreWaitInfo {
                        semaphore: resolve(w.semaphore)?,
                        stages: w.stages,
                    })
                })
                .collect::<Result<Vec<_>, GraphicsError>>()?;
            let mut signals = batch
                .signals
                .iter()
                .map(|s| resolve(*s))
                .collect::<Result<Vec<_>, GraphicsError>>()?;
            if batch.signal_render_finished {
                signals.push(resources.render_finished);
            }

            backend.submit(&QueueSubmission {
                queue: batch.queue,
                command_buffers: &batch.command_buffers,
                waits: &waits,
                signals: &signals,
                fence: batch.signal_fence.then_some(resources.fence),
            })?;
        }

        log::trace!("CommandSubmission: {} batches submitted", self.batches.len());
        Ok(())
    }
}
