//! Synchronization manager.
//!
//! Runs once per frame after every pass has been recorded and before
//! anything is submitted. It walks the frame graph in execution order,
//! compares the state each pass requires of each resource with the state
//! the resource was left in, and produces a [`SyncPlan`]:
//!
//! | Situation | Result |
//! |-----------|--------|
//! | same queue, layout change or write hazard | barrier in the consumer's prologue |
//! | same queue, read after read in one layout | nothing (stages merged) |
//! | different queues, producer in this frame | release after producer, acquire before consumer, semaphore pair |
//! | different queues, producer in an earlier frame | entry release on the old queue plus semaphore |
//! | swapchain image | starts each frame in its acquired state, first user waits on image acquisition, last user transitions to present |
//! | externally signaled semaphore | waited on by the declaring pass |
//!
//! [`SyncManager::commit`] then writes the final state of every touched
//! resource back into the registry. It is the only caller of
//! [`ResourceRegistry::transition`] in the pipeline.

mod barriers;

pub use barriers::{BarrierBatch, OwnershipTransfer, ResourceBarrier};

use std::collections::HashMap;

use crate::backend::GpuSemaphore;
use crate::error::GraphicsError;
use crate::graph::{FrameGraph, NodeId, ResourceUsage};
use crate::registry::{ResourceHandle, ResourceRegistry};
use crate::types::{PipelineStages, QueueType, ResourceKind, ResourceState};

/// Index of a semaphore allocated for one frame's plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SemaphoreId(u32);

impl SemaphoreId {
    pub(crate) fn new(index: usize) -> Self {
        Self(index as u32)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A semaphore referenced by a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncSemaphore {
    /// Signaled by the presentation engine when the swapchain image is ready.
    ImageAcquired,
    /// Allocated from the in-flight slot for an edge of this frame.
    Edge(SemaphoreId),
    /// Owned by the caller, typically signaled by an upload submitted
    /// outside the frame.
    External(GpuSemaphore),
}

/// A wait a node's submission must perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemaphoreWait {
    pub semaphore: SyncSemaphore,
    pub stages: PipelineStages,
}

/// Synchronization attached to one graph node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeSync {
    /// Recorded before the node's commands.
    pub prologue: BarrierBatch,
    /// Recorded after the node's commands.
    pub epilogue: BarrierBatch,
    pub waits: Vec<SemaphoreWait>,
    pub signals: Vec<SyncSemaphore>,
}

impl NodeSync {
    pub fn barrier_count(&self) -> usize {
        self.prologue.len() + self.epilogue.len()
    }
}

/// Ownership release of a resource last used on another queue in an
/// earlier frame. Submitted on `queue` before the frame's own work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryRelease {
    pub queue: QueueType,
    pub batch: BarrierBatch,
    pub signal: SemaphoreId,
}

/// The swapchain image the frame renders into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainTarget {
    pub resource: ResourceHandle,
    /// Signaled when the image has been acquired, if the windowing
    /// collaborator provides one.
    pub image_acquired: Option<GpuSemaphore>,
    /// State the image is in once acquired. Replaces whatever the previous
    /// frame left in the registry.
    pub initial_state: ResourceState,
}

/// Everything the submission step needs to order one frame.
#[derive(Debug, Clone, Default)]
pub struct SyncPlan {
    nodes: Vec<NodeSync>,
    entry_releases: Vec<EntryRelease>,
    final_states: Vec<(ResourceHandle, ResourceState)>,
    semaphore_count: usize,
    present_node: Option<NodeId>,
}

impl SyncPlan {
    pub fn node(&self, id: NodeId) -> &NodeSync {
        &self.nodes[id.index()]
    }

    pub fn nodes(&self) -> &[NodeSync] {
        &self.nodes
    }

    pub fn entry_releases(&self) -> &[EntryRelease] {
        &self.entry_releases
    }

    /// State every touched resource is left in at the end of the frame.
    pub fn final_states(&self) -> &[(ResourceHandle, ResourceState)] {
        &self.final_states
    }

    pub fn final_state(&self, resource: ResourceHandle) -> Option<ResourceState> {
        self.final_states
            .iter()
            .find(|(h, _)| *h == resource)
            .map(|(_, s)| *s)
    }

    /// Number of [`SyncSemaphore::Edge`] semaphores the plan uses.
    pub fn semaphore_count(&self) -> usize {
        self.semaphore_count
    }

    /// Node whose epilogue moves the swapchain image to the present layout.
    pub fn present_node(&self) -> Option<NodeId> {
        self.present_node
    }

    pub fn barrier_count(&self) -> usize {
        self.nodes.iter().map(NodeSync::barrier_count).sum::<usize>()
            + self
                .entry_releases
                .iter()
                .map(|r| r.batch.len())
                .sum::<usize>()
    }
}

/// Where a resource stands while walking the frame.
#[derive(Debug, Clone, Copy)]
struct Tracked {
    state: ResourceState,
    kind: ResourceKind,
    /// Node that last changed the state, `None` for state inherited from an
    /// earlier frame.
    owner: Option<NodeId>,
}

/// Computes barriers and semaphores for a recorded frame graph.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncManager {
    cross_queue: bool,
}

impl SyncManager {
    /// `cross_queue` enables queue ownership transfers. Without it a queue
    /// mismatch is treated as a plain barrier on the consumer's queue.
    pub fn new(cross_queue: bool) -> Self {
        Self { cross_queue }
    }

    pub fn cross_queue(&self) -> bool {
        self.cross_queue
    }

    /// Plan the synchronization of one frame.
    ///
    /// Reads the registry but does not modify it.
    pub fn plan(
        &self,
        graph: &FrameGraph,
        registry: &ResourceRegistry,
        swapchain: Option<SwapchainTarget>,
    ) -> Result<SyncPlan, GraphicsError> {
        cyclonite_core::profile_function!();

        let mut planner = Planner {
            cross_queue: self.cross_queue,
            registry,
            nodes: vec![NodeSync::default(); graph.len()],
            tracked: HashMap::new(),
            touch_order: Vec::new(),
            entry_releases: Vec::new(),
            entry_keys: HashMap::new(),
            edge_semaphores: HashMap::new(),
            semaphore_count: 0,
            entry_override: swapchain.map(|t| (t.resource, t.initial_state)),
        };

        let mut first_swapchain_user = None;
        let mut last_swapchain_user = None;

        for &id in graph.topological_order() {
            let node = graph.node(id);
            for wait in node.external_waits() {
                planner.nodes[id.index()].waits.push(SemaphoreWait {
                    semaphore: SyncSemaphore::External(wait.semaphore),
                    stages: wait.stages,
                });
            }
            for usage in node.usages() {
                if let Some(target) = swapchain
                    && target.resource == usage.resource
                {
                    first_swapchain_user.get_or_insert(id);
                    last_swapchain_user = Some(id);
                }
                planner.visit(id, node.queue(), usage)?;
            }
        }

        let mut present_node = None;
        if let Some(target) = swapchain {
            match (first_swapchain_user, last_swapchain_user) {
                (Some(first), Some(last)) => {
                    if target.image_acquired.is_some() {
                        planner.nodes[first.index()].waits.push(SemaphoreWait {
                            semaphore: SyncSemaphore::ImageAcquired,
                            stages: PipelineStages::COLOR_ATTACHMENT_OUTPUT,
                        });
                    }
                    planner.transition_to_present(last, target.resource)?;
                    present_node = Some(last);
                }
                _ => log::warn!(
                    "SyncManager: swapchain target {} is not used by any pass",
                    target.resource
                ),
            }
        }

        let final_states = planner
            .touch_order
            .iter()
            .map(|h| (*h, planner.tracked[h].state))
            .collect();

        let plan = SyncPlan {
            nodes: planner.nodes,
            entry_releases: planner.entry_releases,
            final_states,
            semaphore_count: planner.semaphore_count,
            present_node,
        };

        log::trace!(
            "SyncManager: {} barriers, {} semaphores, {} entry releases",
            plan.barrier_count(),
            plan.semaphore_count,
            plan.entry_releases.len()
        );
        Ok(plan)
    }

    /// Record the frame's final states in the registry.
    pub fn commit(
        &self,
        plan: &SyncPlan,
        registry: &mut ResourceRegistry,
    ) -> Result<(), GraphicsError> {
        for &(resource, state) in &plan.final_states {
            let prior = registry.transition(resource, state)?;
            log::trace!(
                "SyncManager: {} {:?} -> {:?}",
                resource,
                prior.layout,
                state.layout
            );
        }
        Ok(())
    }
}

struct Planner<'a> {
    cross_queue: bool,
    registry: &'a ResourceRegistry,
    nodes: Vec<NodeSync>,
    tracked: HashMap<ResourceHandle, Tracked>,
    touch_order: Vec<ResourceHandle>,
    entry_releases: Vec<EntryRelease>,
    entry_keys: HashMap<(QueueType, NodeId), usize>,
    edge_semaphores: HashMap<(NodeId, NodeId), SemaphoreId>,
    semaphore_count: usize,
    /// Entry state used instead of the registry's for one resource.
    entry_override: Option<(ResourceHandle, ResourceState)>,
}

impl Planner<'_> {
    fn visit(
        &mut self,
        id: NodeId,
        queue: QueueType,
        usage: &ResourceUsage,
    ) -> Result<(), GraphicsError> {
        let current = match self.tracked.get(&usage.resource) {
            Some(tracked) => *tracked,
            None => {
                let state = match self.entry_override {
                    Some((resource, state)) if resource == usage.resource => state,
                    _ => self.registry.current_state(usage.resource)?,
                };
                let tracked = Tracked {
                    state,
                    kind: usage.resource_kind,
                    owner: None,
                };
                self.touch_order.push(usage.resource);
                tracked
            }
        };

        let required = usage.state;
        let prior = current.state;
        let transfers_ownership =
            self.cross_queue && prior.queue != required.queue && !prior.is_unused();

        let next_state = if transfers_ownership {
            self.transfer(id, queue, usage, current)?;
            required
        } else {
            let layout_change =
                current.kind == ResourceKind::Image && prior.layout != required.layout;
            let hazard = !prior.is_unused() && (prior.is_write() || required.is_write());
            // Earlier writes are already available; a reader at new stages
            // still needs them made visible.
            let uncovered = !prior.is_unused()
                && !(prior.stages.contains(required.stages)
                    && prior.access.contains(required.access));

            if layout_change || hazard || uncovered {
                let barrier =
                    self.barrier(usage.resource, current.kind, prior.on_queue(queue), required)?;
                self.nodes[id.index()].prologue.add(barrier);
            }

            if layout_change || hazard {
                required
            } else {
                ResourceState {
                    stages: prior.stages | required.stages,
                    access: prior.access | required.access,
                    ..required
                }
            }
        };

        self.tracked.insert(
            usage.resource,
            Tracked {
                state: next_state,
                kind: current.kind,
                owner: Some(id),
            },
        );
        Ok(())
    }

    /// Queue ownership transfer from wherever the resource was last used to
    /// node `id`.
    fn transfer(
        &mut self,
        id: NodeId,
        queue: QueueType,
        usage: &ResourceUsage,
        current: Tracked,
    ) -> Result<(), GraphicsError> {
        let release = ResourceBarrier {
            ownership: OwnershipTransfer::Release,
            ..self.barrier(usage.resource, current.kind, current.state, usage.state)?
        };
        let acquire = ResourceBarrier {
            ownership: OwnershipTransfer::Acquire,
            ..release
        };

        let semaphore = match current.owner {
            Some(producer) => {
                self.nodes[producer.index()].epilogue.add(release);
                match self.edge_semaphores.get(&(producer, id)) {
                    Some(&existing) => existing,
                    None => {
                        let semaphore = self.allocate_semaphore();
                        self.edge_semaphores.insert((producer, id), semaphore);
                        self.nodes[producer.index()]
                            .signals
                            .push(SyncSemaphore::Edge(semaphore));
                        semaphore
                    }
                }
            }
            None => {
                let key = (current.state.queue, id);
                match self.entry_keys.get(&key) {
                    Some(&index) => {
                        let entry = &mut self.entry_releases[index];
                        entry.batch.add(release);
                        entry.signal
                    }
                    None => {
                        let semaphore = self.allocate_semaphore();
                        let mut batch = BarrierBatch::new();
                        batch.add(release);
                        self.entry_keys.insert(key, self.entry_releases.len());
                        self.entry_releases.push(EntryRelease {
                            queue: current.state.queue,
                            batch,
                            signal: semaphore,
                        });
                        semaphore
                    }
                }
            }
        };

        self.push_wait(id, semaphore, usage.state.stages);
        self.nodes[id.index()].prologue.add(acquire);
        log::trace!(
            "SyncManager: {} moves {:?} -> {:?} (semaphore {})",
            usage.resource,
            current.state.queue,
            queue,
            semaphore.index()
        );
        Ok(())
    }

    fn transition_to_present(
        &mut self,
        last: NodeId,
        resource: ResourceHandle,
    ) -> Result<(), GraphicsError> {
        let Some(tracked) = self.tracked.get_mut(&resource) else {
            return Ok(());
        };
        let current = *tracked;
        let present = ResourceState::present().on_queue(current.state.queue);
        tracked.state = present;

        let barrier = self.barrier(resource, current.kind, current.state, present)?;
        self.nodes[last.index()].epilogue.add(barrier);
        Ok(())
    }

    fn barrier(
        &self,
        resource: ResourceHandle,
        kind: ResourceKind,
        old: ResourceState,
        new: ResourceState,
    ) -> Result<ResourceBarrier, GraphicsError> {
        Ok(ResourceBarrier {
            resource,
            kind,
            native: self.registry.native(resource)?,
            format: self.registry.descriptor(resource)?.format(),
            old,
            new,
            ownership: OwnershipTransfer::None,
        })
    }

    fn allocate_semaphore(&mut self) -> SemaphoreId {
        let id = SemaphoreId::new(self.semaphore_count);
        self.semaphore_count += 1;
        id
    }

    fn push_wait(&mut self, id: NodeId, semaphore: SemaphoreId, stages: PipelineStages) {
        let waits = &mut self.nodes[id.index()].waits;
        match waits
            .iter_mut()
            .find(|w| w.semaphore == SyncSemaphore::Edge(semaphore))
        {
            Some(wait) => wait.stages |= stages,
            None => waits.push(SemaphoreWait {
                semaphore: SyncSemaphore::Edge(semaphore),
                stages,
            }),
        }
    }
}
