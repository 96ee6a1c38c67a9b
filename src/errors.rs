use thiserror::Error;

/// Session-ending failures surfaced to the caller's `on_error`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScanError {
    #[error("Permission denied error: {0}")]
    PermissionDenied(String),
    #[error("No camera available: {0}")]
    NoCameraAvailable(String),
    #[error("Stream ended: {0}")]
    StreamEnded(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ScanError {
    /// Fatal errors end the current scan; everything else is a caller mistake.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ScanError::PermissionDenied(_)
                | ScanError::NoCameraAvailable(_)
                | ScanError::StreamEnded(_)
        )
    }
}

/// Failures reported by a [`CameraBackend`](crate::platform::CameraBackend)
/// when a stream cannot be opened with the requested constraints.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AcquireError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("no matching camera: {0}")]
    NotFound(String),
    #[error("constraints cannot be satisfied: {0}")]
    ConstraintUnsatisfiable(String),
    #[error("backend failure: {0}")]
    Backend(String),
}

impl From<AcquireError> for ScanError {
    fn from(error: AcquireError) -> Self {
        match error {
            AcquireError::PermissionDenied(msg) => ScanError::PermissionDenied(msg),
            other => ScanError::NoCameraAvailable(other.to_string()),
        }
    }
}

/// Failures of an operation on an already-open stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("operation not supported by this stream: {0}")]
    Unsupported(String),
    #[error("stream is stopped")]
    Stopped,
    #[error("stream control failed: {0}")]
    Control(String),
}

/// Why a torch request did not change the torch.
///
/// `Unsupported` is an ordinary answer for most cameras, not a fault.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TorchError {
    #[error("torch not supported by the active stream")]
    Unsupported,
    #[error("no active camera session")]
    Inactive,
    #[error("torch control failed: {0}")]
    Backend(String),
}
