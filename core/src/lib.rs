//! # Cyclonite Core
//!
//! Engine-wide utilities shared by the ECS and graphics crates:
//!
//! - [`profiling`] - Tracy instrumentation macros (no-ops unless the
//!   `profiling` feature is enabled)
//! - [`tasks`] - Task graphs with explicit predecessors, executed on a
//!   fixed-size worker pool

pub mod profiling;
pub mod tasks;

pub use tasks::{TaskError, TaskGraph, TaskId, TaskPool, TaskReport};

/// Core library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log the core library version.
pub fn init() {
    log::info!("Cyclonite Core v{} initialized", VERSION);
}
