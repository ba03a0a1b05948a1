//! Profiling support via Tracy.
//!
//! Re-exports the CPU profiling macros from [`cyclonite_core::profiling`].
//! Enable with the `profiling` feature:
//!
//! ```toml
//! [dependencies]
//! cyclonite-graphics = { version = "0.1", features = ["profiling"] }
//! ```
//!
//! The frame pipeline plots per-frame counters (`frame: passes`,
//! `frame: barriers`, `frame: fence wait ms`, ...) and emits a frame mark
//! after each submission.

pub use cyclonite_core::profiling::*;
