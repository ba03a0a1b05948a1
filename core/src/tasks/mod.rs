//! Dependency-driven task execution.
//!
//! A [`TaskGraph`] holds closures plus the explicit predecessors each one must
//! wait for. A [`TaskPool`] runs the graph on a fixed number of worker
//! threads: a task becomes ready once every predecessor has completed, and
//! tasks with no path between them may run concurrently.
//!
//! | Type | Role |
//! |------|------|
//! | [`TaskId`] | Dense index of a task inside its graph |
//! | [`TaskGraph`] | Tasks and their predecessor lists |
//! | [`TaskPool`] | Fixed-size worker pool executing a graph to completion |
//! | [`TaskReport`] | Completion order and observed concurrency of a run |
//! | [`TaskError`] | A task panicked |
//!
//! Tasks may borrow from the caller's stack; [`TaskPool::run`] joins every
//! worker before returning.

mod graph;
mod pool;

pub use graph::{TaskGraph, TaskId};
pub use pool::{TaskError, TaskPool, TaskReport};
