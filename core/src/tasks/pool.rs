//! Fixed-size worker pool for [`TaskGraph`] execution.

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};

use parking_lot::{Condvar, Mutex};

use super::graph::{TaskFn, TaskGraph, TaskId};

/// Error produced by a task graph run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    /// A task panicked. Every other task still ran.
    #[error("task '{name}' panicked: {message}")]
    Panicked { name: String, message: String },
}

/// Outcome of a successful [`TaskPool::run`].
#[derive(Debug, Clone, Default)]
pub struct TaskReport {
    completion_order: Vec<TaskId>,
    max_concurrency: usize,
    workers_used: usize,
}

impl TaskReport {
    /// Tasks in the order they finished.
    pub fn completion_order(&self) -> &[TaskId] {
        &self.completion_order
    }

    /// Highest number of tasks observed running at the same time.
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Number of threads that executed tasks, including the caller.
    pub fn workers_used(&self) -> usize {
        self.workers_used
    }
}

/// Executes task graphs on a fixed number of worker threads.
///
/// The calling thread participates as one of the workers, so a pool of one
/// worker runs everything inline in dependency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskPool {
    worker_count: usize,
}

impl Default for TaskPool {
    fn default() -> Self {
        Self::new(Self::default_worker_count())
    }
}

impl TaskPool {
    /// Create a pool with `worker_count` workers (at least one).
    pub fn new(worker_count: usize) -> Self {
        Self {
            worker_count: worker_count.max(1),
        }
    }

    /// One worker per hardware thread, leaving one for the caller.
    pub fn default_worker_count() -> usize {
        let hardware = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        hardware.max(2) - 1
    }

    /// Number of workers this pool runs graphs with.
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Run every task in `graph` and wait for all of them.
    ///
    /// A task starts only after all of its predecessors completed. A panic in
    /// one task is caught and reported as [`TaskError::Panicked`] once the
    /// remaining tasks have finished; successors of the panicked task still
    /// run.
    pub fn run(&self, graph: TaskGraph<'_>) -> Result<TaskReport, TaskError> {
        crate::profile_function!();

        let nodes = graph.into_nodes();
        let task_count = nodes.len();
        if task_count == 0 {
            return Ok(TaskReport::default());
        }

        let mut names = Vec::with_capacity(task_count);
        let mut works = Vec::with_capacity(task_count);
        let mut remaining = Vec::with_capacity(task_count);
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); task_count];

        for (index, node) in nodes.into_iter().enumerate() {
            remaining.push(node.predecessors.len());
            for pred in &node.predecessors {
                dependents[pred.index()].push(index);
            }
            names.push(node.name);
            works.push(Some(node.work));
        }

        let ready: VecDeque<usize> = (0..task_count).filter(|&i| remaining[i] == 0).collect();

        let shared = Shared {
            state: Mutex::new(RunState {
                ready,
                works,
                remaining,
                completed: 0,
                running: 0,
                max_running: 0,
                order: Vec::with_capacity(task_count),
                failure: None,
            }),
            wake: Condvar::new(),
            dependents,
            names,
            task_count,
        };

        let workers = self.worker_count.min(task_count);
        let mut workers_used = 1;

        log::trace!(
            "TaskPool: running {} tasks on {} workers",
            task_count,
            workers
        );

        std::thread::scope(|scope| {
            for i in 1..workers {
                let shared = &shared;
                let spawned = std::thread::Builder::new()
                    .name(format!("cyclonite-worker-{}", i))
                    .spawn_scoped(scope, move || {
                        crate::set_thread_name!("cyclonite-worker");
                        shared.work_loop();
                    });
                match spawned {
                    Ok(_) => workers_used += 1,
                    Err(e) => {
                        log::warn!("TaskPool: failed to spawn worker {}: {}", i, e);
                        break;
                    }
                }
            }
            shared.work_loop();
        });

        let state = shared.state.into_inner();
        if let Some(error) = state.failure {
            return Err(error);
        }

        Ok(TaskReport {
            completion_order: state.order,
            max_concurrency: state.max_running,
            workers_used,
        })
    }
}

struct RunState<'env> {
    ready: VecDeque<usize>,
    works: Vec<Option<TaskFn<'env>>>,
    remaining: Vec<usize>,
    completed: usize,
    running: usize,
    max_running: usize,
    order: Vec<TaskId>,
    failure: Option<TaskError>,
}

struct Shared<'env> {
    state: Mutex<RunState<'env>>,
    wake: Condvar,
    dependents: Vec<Vec<usize>>,
    names: Vec<String>,
    task_count: usize,
}

impl<'env> Shared<'env> {
    fn work_loop(&self) {
        while let Some((index, work)) = self.next_task() {
            let outcome = work.map(|w| catch_unwind(AssertUnwindSafe(w)));
            self.complete(index, outcome.and_then(Result::err).map(panic_message));
        }
    }

    /// Block until a task is ready or the whole graph has completed.
    fn next_task(&self) -> Option<(usize, Option<TaskFn<'env>>)> {
        let mut state = self.state.lock();
        loop {
            if state.completed == self.task_count {
                return None;
            }
            if let Some(index) = state.ready.pop_front() {
                let work = state.works[index].take();
                state.running += 1;
                state.max_running = state.max_running.max(state.running);
                return Some((index, work));
            }
            self.wake.wait(&mut state);
        }
    }

    fn complete(&self, index: usize, panic: Option<String>) {
        let mut state = self.state.lock();
        state.running -= 1;
        state.completed += 1;
        state.order.push(TaskId::new(index as u32));

        if let Some(message) = panic {
            log::error!("Task '{}' panicked: {}", self.names[index], message);
            if state.failure.is_none() {
                state.failure = Some(TaskError::Panicked {
                    name: self.names[index].clone(),
                    message,
                });
            }
        }

        for &dependent in &self.dependents[index] {
            state.remaining[dependent] -= 1;
            if state.remaining[dependent] == 0 {
                state.ready.push_back(dependent);
            }
        }

        drop(state);
        self.wake.notify_all();
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    const RENDEZVOUS_TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn test_empty_graph() {
        let report = TaskPool::new(4).run(TaskGraph::new()).unwrap();
        assert!(report.completion_order().is_empty());
    }

    #[test]
    fn test_worker_count_clamped() {
        assert_eq!(TaskPool::new(0).worker_count(), 1);
        assert!(TaskPool::default_worker_count() >= 1);
    }

    #[rstest]
    #[case(1)]
    #[case(2)]
    #[case(4)]
    fn test_chain_respects_predecessors(#[case] workers: usize) {
        let log = Mutex::new(Vec::new());
        let mut graph = TaskGraph::new();
        let a = graph.add_task("a", &[], || log.lock().push("a"));
        let b = graph.add_task("b", &[a], || log.lock().push("b"));
        graph.add_task("c", &[b], || log.lock().push("c"));

        let report = TaskPool::new(workers).run(graph).unwrap();
        assert_eq!(*log.lock(), vec!["a", "b", "c"]);
        assert_eq!(report.max_concurrency(), 1);
    }

    #[test]
    fn test_diamond_join_runs_last() {
        let counter = AtomicUsize::new(0);
        let seen_at_join = AtomicUsize::new(0);

        let mut graph = TaskGraph::new();
        let root = graph.add_task("root", &[], || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let left = graph.add_task("left", &[root], || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let right = graph.add_task("right", &[root], || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        graph.add_task("join", &[left, right], || {
            seen_at_join.store(counter.load(Ordering::SeqCst), Ordering::SeqCst);
        });

        let report = TaskPool::new(3).run(graph).unwrap();
        assert_eq!(seen_at_join.load(Ordering::SeqCst), 3);
        assert_eq!(report.completion_order().last(), Some(&TaskId::new(3)));
    }

    #[test]
    fn test_tasks_write_disjoint_outputs() {
        let mut outputs = vec![0u32; 8];
        let mut graph = TaskGraph::new();
        for (i, slot) in outputs.iter_mut().enumerate() {
            graph.add_task(format!("task{}", i), &[], move || *slot = i as u32 * 10);
        }

        TaskPool::new(3).run(graph).unwrap();
        assert_eq!(outputs, vec![0, 10, 20, 30, 40, 50, 60, 70]);
    }

    #[test]
    fn test_unrelated_tasks_run_concurrently() {
        // Each task waits for a message only the other one sends, so the run
        // completes only if both are in flight at once.
        let (to_b, from_a) = mpsc::channel::<u32>();
        let (to_a, from_b) = mpsc::channel::<u32>();
        let exchanged_count = AtomicUsize::new(0);
        let exchanged = &exchanged_count;

        let mut graph = TaskGraph::new();
        graph.add_task("a", &[], move || {
            to_b.send(1).unwrap();
            if from_b.recv_timeout(RENDEZVOUS_TIMEOUT).is_ok() {
                exchanged.fetch_add(1, Ordering::SeqCst);
            }
        });
        graph.add_task("b", &[], move || {
            to_a.send(2).unwrap();
            if from_a.recv_timeout(RENDEZVOUS_TIMEOUT).is_ok() {
                exchanged.fetch_add(1, Ordering::SeqCst);
            }
        });

        let report = TaskPool::new(2).run(graph).unwrap();
        assert_eq!(exchanged_count.load(Ordering::SeqCst), 2);
        assert_eq!(report.max_concurrency(), 2);
    }

    #[test]
    fn test_single_worker_runs_inline() {
        let caller = std::thread::current().id();
        let ran_on = Mutex::new(None);

        let mut graph = TaskGraph::new();
        graph.add_task("inline", &[], || {
            *ran_on.lock() = Some(std::thread::current().id());
        });

        let report = TaskPool::new(1).run(graph).unwrap();
        assert_eq!(*ran_on.lock(), Some(caller));
        assert_eq!(report.workers_used(), 1);
        assert_eq!(report.max_concurrency(), 1);
    }

    #[test]
    fn test_panic_is_reported_and_others_complete() {
        let finished = AtomicUsize::new(0);

        let mut graph = TaskGraph::new();
        graph.add_task("ok_1", &[], || {
            finished.fetch_add(1, Ordering::SeqCst);
        });
        graph.add_task("broken", &[], || panic!("recording failed"));
        graph.add_task("ok_2", &[], || {
            finished.fetch_add(1, Ordering::SeqCst);
        });

        let err = TaskPool::new(2).run(graph).unwrap_err();
        assert_eq!(
            err,
            TaskError::Panicked {
                name: "broken".to_string(),
                message: "recording failed".to_string(),
            }
        );
        assert_eq!(finished.load(Ordering::SeqCst), 2);
    }
}
