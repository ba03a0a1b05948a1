//! Per-frame counters.

use std::time::Duration;

/// Counters collected while ending one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub frame_number: u64,
    pub slot: usize,
    pub pass_count: usize,
    pub edge_count: usize,
    pub barrier_count: usize,
    pub semaphore_count: usize,
    pub batch_count: usize,
    pub command_count: u32,
    /// Most passes recording at the same time.
    pub max_recording_concurrency: usize,
    /// Time `begin_frame` blocked on the slot fence.
    pub fence_wait: Duration,
}

impl FrameStats {
    /// Send the counters to the profiler.
    pub(crate) fn plot(&self) {
        cyclonite_core::profile_plot!("frame: passes", self.pass_count);
        cyclonite_core::profile_plot!("frame: edges", self.edge_count);
        cyclonite_core::profile_plot!("frame: barriers", self.barrier_count);
        cyclonite_core::profile_plot!("frame: semaphores", self.semaphore_count);
        cyclonite_core::profile_plot!("frame: submit batches", self.batch_count);
        cyclonite_core::profile_plot!("frame: fence wait ms", self.fence_wait.as_secs_f64() * 1000.0);
    }
}
