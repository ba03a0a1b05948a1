//! Frame pipeline configuration.
//!
//! [`PipelineConfig`] can be built in code or loaded from a RON document:
//!
//! ```
//! use cyclonite_graphics::PipelineConfig;
//!
//! let config = PipelineConfig::from_ron_str(
//!     "(frames_in_flight: 3, worker_count: 4, fence_timeout_ms: 500, cross_queue: false)",
//! )
//! .unwrap();
//! assert_eq!(config.frames_in_flight, 3);
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::GraphicsError;

/// Largest supported number of frames in flight.
pub const MAX_FRAMES_IN_FLIGHT: usize = 8;

/// Configuration of a [`FramePipeline`](crate::pipeline::FramePipeline).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of in-flight slots (1..=8). 2 lets the CPU build frame N+1
    /// while the GPU renders frame N.
    pub frames_in_flight: usize,
    /// Recording workers, including the thread calling `end_frame`.
    pub worker_count: usize,
    /// Bound on every fence wait. Exceeding it is treated as device loss.
    pub fence_timeout_ms: u64,
    /// Allow passes on the compute and transfer queues. When disabled every
    /// pass runs on the graphics queue.
    pub cross_queue: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            worker_count: cyclonite_core::TaskPool::default_worker_count(),
            fence_timeout_ms: 1000,
            cross_queue: false,
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames;
        self
    }

    #[must_use]
    pub fn with_worker_count(mut self, workers: usize) -> Self {
        self.worker_count = workers;
        self
    }

    #[must_use]
    pub fn with_fence_timeout(mut self, timeout: Duration) -> Self {
        self.fence_timeout_ms = timeout.as_millis() as u64;
        self
    }

    #[must_use]
    pub fn with_cross_queue(mut self, enabled: bool) -> Self {
        self.cross_queue = enabled;
        self
    }

    pub fn fence_timeout(&self) -> Duration {
        Duration::from_millis(self.fence_timeout_ms)
    }

    /// Check every value is in range.
    pub fn validate(&self) -> Result<(), GraphicsError> {
        if self.frames_in_flight == 0 || self.frames_in_flight > MAX_FRAMES_IN_FLIGHT {
            return Err(GraphicsError::InvalidConfig(format!(
                "frames_in_flight must be in 1..={}, got {}",
                MAX_FRAMES_IN_FLIGHT, self.frames_in_flight
            )));
        }
        if self.worker_count == 0 {
            return Err(GraphicsError::InvalidConfig(
                "worker_count must be at least 1".to_string(),
            ));
        }
        if self.fence_timeout_ms == 0 {
            return Err(GraphicsError::InvalidConfig(
                "fence_timeout_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse and validate a RON document. Missing fields take their defaults.
    pub fn from_ron_str(source: &str) -> Result<Self, GraphicsError> {
        let config: Self =
            ron::from_str(source).map_err(|e| GraphicsError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a RON file.
    pub fn from_ron_file(path: impl AsRef<Path>) -> Result<Self, GraphicsError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            GraphicsError::InvalidConfig(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_ron_str(&source)
    }

    /// Serialize to a pretty-printed RON document.
    pub fn to_ron_string(&self) -> Result<String, GraphicsError> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| GraphicsError::InvalidConfig(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.frames_in_flight, 2);
        assert!(config.worker_count >= 1);
        assert_eq!(config.fence_timeout(), Duration::from_secs(1));
        assert!(!config.cross_queue);
        assert!(config.validate().is_ok());
    }

    #[rstest]
    #[case(0, false)]
    #[case(1, true)]
    #[case(3, true)]
    #[case(8, true)]
    #[case(9, false)]
    fn test_frames_in_flight_range(#[case] frames: usize, #[case] valid: bool) {
        let config = PipelineConfig::default().with_frames_in_flight(frames);
        assert_eq!(config.validate().is_ok(), valid);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let config = PipelineConfig::default().with_worker_count(0);
        assert!(matches!(
            config.validate(),
            Err(GraphicsError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_ron_partial_document_uses_defaults() {
        let config = PipelineConfig::from_ron_str("(cross_queue: true)").unwrap();
        assert!(config.cross_queue);
        assert_eq!(config.frames_in_flight, 2);
    }

    #[test]
    fn test_ron_out_of_range_rejected() {
        let err = PipelineConfig::from_ron_str("(frames_in_flight: 12)").unwrap_err();
        assert!(matches!(err, GraphicsError::InvalidConfig(_)));
    }

    #[test]
    fn test_ron_round_trip() {
        let config = PipelineConfig::default()
            .with_frames_in_flight(3)
            .with_fence_timeout(Duration::from_millis(250));
        let text = config.to_ron_string().unwrap();
        assert_eq!(PipelineConfig::from_ron_str(&text).unwrap(), config);
    }
}
