//! Graphics error types.

use std::time::Duration;

use crate::backend::BackendError;
use crate::registry::ResourceHandle;

/// Errors that can occur in the frame pipeline.
///
/// Graph-construction and recording errors abort the current frame before
/// anything is submitted. [`DeviceLost`](Self::DeviceLost) and
/// [`FenceTimeout`](Self::FenceTimeout) are pipeline-fatal: the pipeline
/// refuses further frames until [`FramePipeline::reset`] is called.
///
/// [`FramePipeline::reset`]: crate::pipeline::FramePipeline::reset
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphicsError {
    /// The handle was never registered or its resource has been released.
    #[error("unknown resource {0}")]
    UnknownResource(ResourceHandle),

    /// Two passes write the same resource in one frame with no read between.
    #[error("{resource} is written by both '{first}' and '{second}' without an intervening read")]
    AmbiguousWriter {
        resource: ResourceHandle,
        first: String,
        second: String,
    },

    /// The GPU device was lost. Requires a full pipeline reset.
    #[error("GPU device lost")]
    DeviceLost,

    /// A fence did not signal within the configured timeout.
    #[error("fence wait exceeded {0:?}")]
    FenceTimeout(Duration),

    /// An operation was called in the wrong frame state.
    #[error("invalid frame state: {0}")]
    InvalidState(String),

    /// A pass work unit failed or panicked while recording.
    #[error("recording pass '{pass}' failed: {reason}")]
    Recording { pass: String, reason: String },

    /// The pipeline configuration is out of range or unparsable.
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    /// Any other error reported by the graphics API binding.
    #[error("backend error: {0}")]
    Backend(BackendError),
}

impl GraphicsError {
    /// Check if this error invalidates the whole pipeline rather than the
    /// current frame.
    pub fn is_pipeline_fatal(&self) -> bool {
        matches!(self, Self::DeviceLost | Self::FenceTimeout(_))
    }
}

impl From<BackendError> for GraphicsError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::DeviceLost => Self::DeviceLost,
            other => Self::Backend(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(GraphicsError::DeviceLost.to_string(), "GPU device lost");

        let err = GraphicsError::Recording {
            pass: "shadow".into(),
            reason: "boom".into(),
        };
        assert_eq!(err.to_string(), "recording pass 'shadow' failed: boom");
    }

    #[test]
    fn test_pipeline_fatal() {
        assert!(GraphicsError::DeviceLost.is_pipeline_fatal());
        assert!(GraphicsError::FenceTimeout(Duration::from_millis(5)).is_pipeline_fatal());
        assert!(!GraphicsError::InvalidState("x".into()).is_pipeline_fatal());
        assert!(!GraphicsError::UnknownResource(ResourceHandle::new(0, 0)).is_pipeline_fatal());
    }

    #[test]
    fn test_backend_device_lost_maps_to_device_lost() {
        assert_eq!(
            GraphicsError::from(BackendError::DeviceLost),
            GraphicsError::DeviceLost
        );
        assert_eq!(
            GraphicsError::from(BackendError::OutOfMemory),
            GraphicsError::Backend(BackendError::OutOfMemory)
        );
    }
}
