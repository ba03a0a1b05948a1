//! Frame-graph construction.
//!
//! Each frame, the declared passes are resolved into a [`FrameGraph`]: a
//! DAG whose edges are derived from the resources each pass touches.
//!
//! | Hazard | Edge |
//! |--------|------|
//! | read after write | last writer → reader |
//! | write after read | every reader since the last write → writer |
//! | write after write, no read between | rejected with [`GraphicsError::AmbiguousWriter`] |
//! | read after read | none |
//!
//! Edges only ever point from an earlier declaration to a later one, so the
//! graph is acyclic by construction and no cycle detection is needed.
//!
//! # Architecture
//!
//! | Layer | Type | Purpose |
//! |-------|------|---------|
//! | Pipeline | [`FramePipeline`](crate::pipeline::FramePipeline) | Frames in flight |
//! | **Graph** | [`FrameGraph`] | Pass dependencies (this module) |
//! | Pass | [`PassDeclaration`] | One unit of recorded GPU work |
//!
//! # Example
//!
//! ```
//! use cyclonite_graphics::graph::{FrameGraphBuilder, PassDeclaration, ResourceAccess};
//! use cyclonite_graphics::registry::ResourceRegistry;
//! use cyclonite_graphics::types::{ImageDescriptor, ImageFormat};
//!
//! let mut registry = ResourceRegistry::new();
//! let depth = registry.register_image(ImageDescriptor::new_2d(512, 512, ImageFormat::Depth32Float));
//! let color = registry.register_image(ImageDescriptor::new_2d(800, 600, ImageFormat::Rgba16Float));
//!
//! let mut builder = FrameGraphBuilder::new();
//! builder.add_pass(PassDeclaration::new("shadow").writes(depth, ResourceAccess::DepthStencilWrite));
//! builder.add_pass(
//!     PassDeclaration::new("lighting")
//!         .reads(depth, ResourceAccess::FragmentShaderRead)
//!         .writes(color, ResourceAccess::ColorAttachmentWrite),
//! );
//!
//! let graph = builder.build(&registry).unwrap();
//! assert_eq!(graph.edge_count(), 1);
//! ```

mod pass;
mod resource_usage;

pub use pass::{PassDeclaration, PassWork};
pub use resource_usage::{DeclaredAccess, ResourceAccess, ResourceUsage, UsageKind};

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use crate::backend::{GpuCommandBuffer, SemaphoreWaitInfo};
use crate::error::GraphicsError;
use crate::registry::{ResourceHandle, ResourceRegistry};
use crate::types::QueueType;

use pass::PassParts;

/// Handle to a node in a [`FrameGraph`].
///
/// The index equals the declaration index of the pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub(crate) fn new(index: u32) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A pass declaration plus its computed edges.
pub struct GraphNode {
    id: NodeId,
    name: String,
    queue: QueueType,
    usages: Vec<ResourceUsage>,
    predecessors: Vec<NodeId>,
    successors: Vec<NodeId>,
    work: Option<PassWork>,
    persistent: Option<GpuCommandBuffer>,
    external_waits: Vec<SemaphoreWaitInfo>,
}

impl GraphNode {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn queue(&self) -> QueueType {
        self.queue
    }

    /// Resolved resource usages, one per distinct resource.
    pub fn usages(&self) -> &[ResourceUsage] {
        &self.usages
    }

    pub fn usage(&self, resource: ResourceHandle) -> Option<&ResourceUsage> {
        self.usages.iter().find(|u| u.resource == resource)
    }

    pub fn predecessors(&self) -> &[NodeId] {
        &self.predecessors
    }

    pub fn successors(&self) -> &[NodeId] {
        &self.successors
    }

    /// Command buffer submitted for this node instead of recording one.
    pub fn persistent_commands(&self) -> Option<GpuCommandBuffer> {
        self.persistent
    }

    /// Semaphores signaled outside the frame that this node waits on.
    pub fn external_waits(&self) -> &[SemaphoreWaitInfo] {
        &self.external_waits
    }
}

impl std::fmt::Debug for GraphNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphNode")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("queue", &self.queue)
            .field("usages", &self.usages)
            .field("predecessors", &self.predecessors)
            .field("persistent", &self.persistent)
            .finish_non_exhaustive()
    }
}

/// First and last node touching a resource in one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLifetime {
    pub first_use: NodeId,
    pub last_use: NodeId,
}

/// Dependency-resolved graph of one frame's passes.
///
/// Lives for exactly one frame; the pipeline drops it after submission or
/// when the frame is aborted.
#[derive(Debug)]
pub struct FrameGraph {
    nodes: Vec<GraphNode>,
    edge_count: usize,
    order: Vec<NodeId>,
    lifetimes: HashMap<ResourceHandle, ResourceLifetime>,
}

impl FrameGraph {
    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> &GraphNode {
        &self.nodes[id.index()]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    /// Iterate `(predecessor, successor)` edges.
    pub fn edges(&self) -> impl Iterator<Item = (NodeId, NodeId)> + '_ {
        self.nodes
            .iter()
            .flat_map(|n| n.predecessors.iter().map(move |&p| (p, n.id)))
    }

    /// Execution order. Among unrelated passes, declaration order is kept.
    pub fn topological_order(&self) -> &[NodeId] {
        &self.order
    }

    pub fn lifetime(&self, resource: ResourceHandle) -> Option<ResourceLifetime> {
        self.lifetimes.get(&resource).copied()
    }

    /// Every resource touched this frame.
    pub fn resources(&self) -> impl Iterator<Item = ResourceHandle> + '_ {
        self.lifetimes.keys().copied()
    }

    /// Check if `to` is reachable from `from` along graph edges.
    pub fn has_path(&self, from: NodeId, to: NodeId) -> bool {
        if from == to {
            return true;
        }
        let mut visited = vec![false; self.nodes.len()];
        let mut stack = vec![from];
        while let Some(id) = stack.pop() {
            for &next in &self.nodes[id.index()].successors {
                if next == to {
                    return true;
                }
                if !visited[next.index()] {
                    visited[next.index()] = true;
                    stack.push(next);
                }
            }
        }
        false
    }

    /// Check that neither node can reach the other.
    pub fn are_independent(&self, a: NodeId, b: NodeId) -> bool {
        a != b && !self.has_path(a, b) && !self.has_path(b, a)
    }

    pub(crate) fn take_work(&mut self, id: NodeId) -> Option<PassWork> {
        self.nodes[id.index()].work.take()
    }
}

/// Per-resource state while walking declarations.
#[derive(Default)]
struct ResourceTrack {
    last_writer: Option<NodeId>,
    readers_since_write: Vec<NodeId>,
}

/// Collects a frame's pass declarations and resolves them into a
/// [`FrameGraph`].
#[derive(Debug, Default)]
pub struct FrameGraphBuilder {
    passes: Vec<PassDeclaration>,
    cross_queue: bool,
}

impl FrameGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Honor queue requests on passes. When disabled every pass is placed
    /// on the graphics queue.
    #[must_use]
    pub fn with_cross_queue(mut self, enabled: bool) -> Self {
        self.cross_queue = enabled;
        self
    }

    pub fn add_pass(&mut self, pass: PassDeclaration) -> NodeId {
        let id = NodeId::new(self.passes.len() as u32);
        self.passes.push(pass);
        id
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Resolve declarations into a graph in a single pass over them.
    ///
    /// Fails with [`GraphicsError::UnknownResource`] if a pass names a
    /// resource the registry does not track, with
    /// [`GraphicsError::AmbiguousWriter`] if a resource is written twice with
    /// no read in between, and with [`GraphicsError::InvalidState`] if a
    /// persistent command buffer belongs to another queue than its pass.
    pub fn build(self, registry: &ResourceRegistry) -> Result<FrameGraph, GraphicsError> {
        cyclonite_core::profile_function!();

        let mut nodes = Vec::with_capacity(self.passes.len());
        let mut tracks: HashMap<ResourceHandle, ResourceTrack> = HashMap::new();
        let mut lifetimes: HashMap<ResourceHandle, ResourceLifetime> = HashMap::new();
        let mut edge_count = 0;

        for (index, pass) in self.passes.into_iter().enumerate() {
            let id = NodeId::new(index as u32);
            let PassParts {
                name,
                queue: requested_queue,
                accesses,
                work,
                persistent,
                external_waits,
            } = pass.into_parts();

            let queue = if self.cross_queue {
                requested_queue
            } else {
                if requested_queue != QueueType::Graphics {
                    log::debug!(
                        "FrameGraph: pass '{}' requested {:?}, cross-queue disabled, using graphics",
                        name,
                        requested_queue
                    );
                }
                QueueType::Graphics
            };

            if let Some(commands) = persistent
                && commands.queue() != queue
            {
                return Err(GraphicsError::InvalidState(format!(
                    "pass '{}' runs on {:?} but its persistent commands were recorded for {:?}",
                    name,
                    queue,
                    commands.queue()
                )));
            }

            let usages = resolve_usages(&accesses, registry, queue)?;
            let mut predecessors: Vec<NodeId> = Vec::new();

            for usage in &usages {
                let track = tracks.entry(usage.resource).or_default();

                if usage.kind.reads()
                    && let Some(writer) = track.last_writer
                {
                    add_unique(&mut predecessors, writer);
                }

                if usage.kind.writes() {
                    if !usage.kind.reads()
                        && track.readers_since_write.is_empty()
                        && let Some(writer) = track.last_writer
                    {
                        return Err(GraphicsError::AmbiguousWriter {
                            resource: usage.resource,
                            first: nodes_name(&nodes, writer),
                            second: name,
                        });
                    }
                    for &reader in &track.readers_since_write {
                        add_unique(&mut predecessors, reader);
                    }
                    track.last_writer = Some(id);
                    track.readers_since_write.clear();
                } else {
                    track.readers_since_write.push(id);
                }

                lifetimes
                    .entry(usage.resource)
                    .and_modify(|l| l.last_use = id)
                    .or_insert(ResourceLifetime {
                        first_use: id,
                        last_use: id,
                    });
            }

            predecessors.sort_unstable();
            for &pred in &predecessors {
                let pred_node: &mut GraphNode = &mut nodes[pred.index()];
                pred_node.successors.push(id);
                log::trace!("FrameGraph: edge '{}' -> '{}'", pred_node.name, name);
            }
            edge_count += predecessors.len();

            nodes.push(GraphNode {
                id,
                name,
                queue,
                usages,
                predecessors,
                successors: Vec::new(),
                work,
                persistent,
                external_waits,
            });
        }

        let order = topological_sort(&nodes);
        debug_assert_eq!(order.len(), nodes.len());

        log::trace!(
            "FrameGraph: {} nodes, {} edges, {} resources",
            nodes.len(),
            edge_count,
            lifetimes.len()
        );

        Ok(FrameGraph {
            nodes,
            edge_count,
            order,
            lifetimes,
        })
    }
}

fn add_unique(list: &mut Vec<NodeId>, id: NodeId) {
    if !list.contains(&id) {
        list.push(id);
    }
}

fn nodes_name(nodes: &[GraphNode], id: NodeId) -> String {
    nodes[id.index()].name.clone()
}

/// Resolve declared accesses against the registry, merging repeated
/// declarations of the same resource.
fn resolve_usages(
    accesses: &[DeclaredAccess],
    registry: &ResourceRegistry,
    queue: QueueType,
) -> Result<Vec<ResourceUsage>, GraphicsError> {
    let mut usages: Vec<ResourceUsage> = Vec::with_capacity(accesses.len());
    for declared in accesses {
        let kind = registry.descriptor(declared.resource)?.kind();
        let usage = ResourceUsage::new(declared, kind, queue);
        match usages.iter_mut().find(|u| u.resource == declared.resource) {
            Some(existing) => existing.merge(&usage),
            None => usages.push(usage),
        }
    }
    Ok(usages)
}

/// Kahn's algorithm with the ready set ordered by declaration index.
fn topological_sort(nodes: &[GraphNode]) -> Vec<NodeId> {
    let mut in_degree: Vec<usize> = nodes.iter().map(|n| n.predecessors.len()).collect();
    let mut ready: BinaryHeap<Reverse<NodeId>> = nodes
        .iter()
        .filter(|n| n.predecessors.is_empty())
        .map(|n| Reverse(n.id))
        .collect();

    let mut order = Vec::with_capacity(nodes.len());
    while let Some(Reverse(id)) = ready.pop() {
        order.push(id);
        for &succ in &nodes[id.index()].successors {
            in_degree[succ.index()] -= 1;
            if in_degree[succ.index()] == 0 {
                ready.push(Reverse(succ));
            }
        }
    }
    order
}
