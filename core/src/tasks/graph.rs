//! Task graph construction.

/// Handle to a task inside a [`TaskGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u32);

impl TaskId {
    pub(crate) fn new(index: u32) -> Self {
        Self(index)
    }

    /// Get the index of this task in insertion order.
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

pub(crate) type TaskFn<'env> = Box<dyn FnOnce() + Send + 'env>;

pub(crate) struct TaskNode<'env> {
    pub(crate) name: String,
    pub(crate) work: TaskFn<'env>,
    pub(crate) predecessors: Vec<TaskId>,
}

/// A set of tasks with explicit predecessor lists.
///
/// Predecessors must be added before their successors, so a graph is acyclic
/// by construction.
///
/// # Example
///
/// ```
/// use cyclonite_core::{TaskGraph, TaskPool};
///
/// let mut graph = TaskGraph::new();
/// let shadow = graph.add_task("shadow", &[], || {});
/// let lighting = graph.add_task("lighting", &[shadow], || {});
/// graph.add_task("present", &[lighting], || {});
///
/// let report = TaskPool::new(2).run(graph).unwrap();
/// assert_eq!(report.completion_order().len(), 3);
/// ```
#[derive(Default)]
pub struct TaskGraph<'env> {
    nodes: Vec<TaskNode<'env>>,
}

impl<'env> TaskGraph<'env> {
    /// Create an empty task graph.
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    /// Create an empty task graph with room for `capacity` tasks.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(capacity),
        }
    }

    /// Add a task that runs after every task in `predecessors`.
    ///
    /// Duplicate predecessors are ignored.
    ///
    /// # Panics
    ///
    /// Panics if a predecessor does not belong to this graph.
    pub fn add_task<F>(
        &mut self,
        name: impl Into<String>,
        predecessors: &[TaskId],
        work: F,
    ) -> TaskId
    where
        F: FnOnce() + Send + 'env,
    {
        let id = TaskId::new(self.nodes.len() as u32);

        let mut preds = Vec::with_capacity(predecessors.len());
        for &pred in predecessors {
            assert!(
                pred.index() < self.nodes.len(),
                "predecessor {:?} must be added before its successor",
                pred
            );
            if !preds.contains(&pred) {
                preds.push(pred);
            }
        }

        self.nodes.push(TaskNode {
            name: name.into(),
            work: Box::new(work),
            predecessors: preds,
        });

        id
    }

    /// Number of tasks in the graph.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if the graph has no tasks.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Get the name of a task.
    pub fn name(&self, id: TaskId) -> Option<&str> {
        self.nodes.get(id.index()).map(|n| n.name.as_str())
    }

    /// Get the predecessors of a task.
    pub fn predecessors(&self, id: TaskId) -> &[TaskId] {
        self.nodes
            .get(id.index())
            .map(|n| n.predecessors.as_slice())
            .unwrap_or(&[])
    }

    pub(crate) fn into_nodes(self) -> Vec<TaskNode<'env>> {
        self.nodes
    }
}

impl std::fmt::Debug for TaskGraph<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.nodes.iter().map(|n| (&n.name, &n.predecessors)))
            .finish()
    }
}
