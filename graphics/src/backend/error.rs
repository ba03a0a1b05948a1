//! Backend error types.

/// Errors that can occur in backend operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("backend initialization failed: {0}")]
    InitializationFailed(String),
    #[error("feature not supported: {0}")]
    FeatureNotSupported(String),
    #[error("out of GPU memory")]
    OutOfMemory,
    #[error("GPU device lost")]
    DeviceLost,
    /// A wait did not complete within its timeout.
    #[error("wait timed out")]
    Timeout,
    /// A handle does not belong to this backend or was already destroyed.
    #[error("invalid handle: {0}")]
    InvalidHandle(String),
    #[error("internal backend error: {0}")]
    Internal(String),
}
