//! Scheduler bridge: parallel command recording over the task pool.
//!
//! Every frame-graph node becomes one task of a
//! [`TaskGraph`](cyclonite_core::TaskGraph). A task's predecessors are
//! exactly its node's graph predecessors, so independent passes record
//! concurrently and dependent passes record in order. No other dependency
//! is introduced.
//!
//! Each node gets its own command buffer, allocated before any task starts.
//! Two tasks therefore never record into the same buffer. A node carrying
//! persistent commands submits those as-is; its task records nothing but
//! still orders its successors.
//!
//! # Architecture
//!
//! | Layer | Type | Purpose |
//! |-------|------|---------|
//! | Pipeline | [`FramePipeline`](crate::pipeline::FramePipeline) | Frames in flight |
//! | **Recording** | [`SchedulerBridge`] | Parallel recording (this module) |
//! | Pass | [`CommandRecorder`] | Commands of one pass |

mod recorder;

pub use recorder::CommandRecorder;

use cyclonite_core::{TaskError, TaskGraph, TaskId, TaskPool};

use crate::backend::{GpuBackend, GpuCommandBuffer};
use crate::error::GraphicsError;
use crate::graph::{FrameGraph, NodeId, PassWork};
use crate::types::QueueType;

/// A node whose commands have been recorded.
#[derive(Debug, Clone)]
pub struct RecordedPass {
    pub node: NodeId,
    pub name: String,
    pub queue: QueueType,
    pub command_buffer: GpuCommandBuffer,
    pub command_count: u32,
}

/// Result of recording one frame graph.
#[derive(Debug, Clone, Default)]
pub struct RecordingReport {
    passes: Vec<RecordedPass>,
    recording_order: Vec<NodeId>,
    max_concurrency: usize,
}

impl RecordingReport {
    /// Recorded passes, indexed by node.
    pub fn passes(&self) -> &[RecordedPass] {
        &self.passes
    }

    pub fn pass(&self, node: NodeId) -> &RecordedPass {
        &self.passes[node.index()]
    }

    /// Nodes in the order their recording finished.
    pub fn recording_order(&self) -> &[NodeId] {
        &self.recording_order
    }

    /// Most passes that were recording at the same time.
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn command_count(&self) -> u32 {
        self.passes.iter().map(|p| p.command_count).sum()
    }
}

type Outcome = Option<Result<u32, GraphicsError>>;

/// Maps frame-graph nodes onto pool tasks.
#[derive(Debug)]
pub struct SchedulerBridge {
    pool: TaskPool,
}

impl SchedulerBridge {
    pub fn new(worker_count: usize) -> Self {
        Self {
            pool: TaskPool::new(worker_count),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.pool.worker_count()
    }

    /// Record every node of `graph` into command buffers owned by `slot`.
    ///
    /// Work units are taken out of the graph. On error the frame must be
    /// discarded; command buffers already allocated stay with the slot and
    /// are recycled on its next reuse.
    pub fn record(
        &self,
        graph: &mut FrameGraph,
        backend: &dyn GpuBackend,
        slot: usize,
    ) -> Result<RecordingReport, GraphicsError> {
        cyclonite_core::profile_function!();

        let node_count = graph.len();
        let order: Vec<NodeId> = graph.topological_order().to_vec();

        let mut works: Vec<Option<PassWork>> = Vec::with_capacity(node_count);
        let mut command_buffers = Vec::with_capacity(node_count);
        for index in 0..node_count {
            let id = NodeId::new(index as u32);
            let node = graph.node(id);
            let command_buffer = match node.persistent_commands() {
                Some(persistent) => RecordTarget::Persistent(persistent),
                None => RecordTarget::Slot(backend.allocate_command_buffer(slot, node.queue())?),
            };
            works.push(graph.take_work(id));
            command_buffers.push(command_buffer);
        }

        let mut outcomes: Vec<Outcome> = (0..node_count).map(|_| None).collect();
        let task_report = {
            let graph: &FrameGraph = graph;
            let mut outcome_slots: Vec<Option<&mut Outcome>> =
                outcomes.iter_mut().map(Some).collect();
            let mut task_ids: Vec<Option<TaskId>> = vec![None; node_count];
            let mut tasks = TaskGraph::with_capacity(node_count);

            for &id in &order {
                let node = graph.node(id);
                let Some(outcome) = outcome_slots[id.index()].take() else {
                    continue;
                };
                // Topological order guarantees every predecessor already has a task.
                let predecessors: Vec<TaskId> = node
                    .predecessors()
                    .iter()
                    .filter_map(|p| task_ids[p.index()])
                    .collect();
                let work = works[id.index()].take();
                let command_buffer = command_buffers[id.index()];
                let name = node.name();

                let task = tasks.add_task(name, &predecessors, move || {
                    *outcome = Some(match command_buffer {
                        RecordTarget::Slot(command_buffer) => {
                            record_pass(backend, command_buffer, name, work)
                        }
                        RecordTarget::Persistent(_) => Ok(0),
                    });
                });
                task_ids[id.index()] = Some(task);
            }

            self.pool.run(tasks).map_err(|err| match err {
                TaskError::Panicked { name, message } => GraphicsError::Recording {
                    pass: name,
                    reason: format!("panicked: {}", message),
                },
            })?
        };

        let mut passes = Vec::with_capacity(node_count);
        for (index, outcome) in outcomes.into_iter().enumerate() {
            let node = graph.node(NodeId::new(index as u32));
            let command_count = match outcome {
                Some(Ok(count)) => count,
                Some(Err(err)) => return Err(err),
                None => {
                    return Err(GraphicsError::Recording {
                        pass: node.name().to_string(),
                        reason: "task did not run".into(),
                    });
                }
            };
            passes.push(RecordedPass {
                node: node.id(),
                name: node.name().to_string(),
                queue: node.queue(),
                command_buffer: command_buffers[index].command_buffer(),
                command_count,
            });
        }

        // Tasks were added in topological order, so task index i is order[i].
        let recording_order = task_report
            .completion_order()
            .iter()
            .map(|task| order[task.index()])
            .collect();

        log::trace!(
            "SchedulerBridge: recorded {} passes on {} workers (max concurrency {})",
            node_count,
            task_report.workers_used(),
            task_report.max_concurrency()
        );

        Ok(RecordingReport {
            passes,
            recording_order,
            max_concurrency: task_report.max_concurrency(),
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum RecordTarget {
    Slot(GpuCommandBuffer),
    Persistent(GpuCommandBuffer),
}

impl RecordTarget {
    fn command_buffer(self) -> GpuCommandBuffer {
        match self {
            Self::Slot(cmd) | Self::Persistent(cmd) => cmd,
        }
    }
}

/// Record `work` into `command_buffer`, bracketed by begin and end.
pub(crate) fn record_pass(
    backend: &dyn GpuBackend,
    command_buffer: GpuCommandBuffer,
    name: &str,
    work: Option<PassWork>,
) -> Result<u32, GraphicsError> {
    cyclonite_core::profile_scope_dynamic!(name);

    backend.begin_command_buffer(command_buffer)?;
    let mut recorder = CommandRecorder::new(backend, command_buffer, name);
    if let Some(work) = work {
        work(&mut recorder).map_err(|err| match err {
            fatal if fatal.is_pipeline_fatal() => fatal,
            recording @ GraphicsError::Recording { .. } => recording,
            other => GraphicsError::Recording {
                pass: name.to_string(),
                reason: other.to_string(),
            },
        })?;
    }
    let count = recorder.command_count();
    backend.end_command_buffer(command_buffer)?;
    Ok(count)
}
