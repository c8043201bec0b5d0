//! Backend error types.

use crate::error::GraphicsError;

/// Errors raised while a backend executes recorded work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// A copy touched bytes outside its resource.
    OutOfBounds {
        resource: u64,
        offset: u64,
        size: u64,
        len: u64,
    },
    /// Resource creation was refused.
    CreationRefused(String),
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OutOfBounds {
                resource,
                offset,
                size,
                len,
            } => write!(
                f,
                "access {offset}+{size} out of bounds for resource {resource} of {len} bytes"
            ),
            Self::CreationRefused(msg) => write!(f, "backend refused creation: {msg}"),
        }
    }
}

impl std::error::Error for BackendError {}

impl From<BackendError> for GraphicsError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::CreationRefused(msg) => GraphicsError::ResourceCreationFailed(msg),
            other => GraphicsError::Internal(other.to_string()),
        }
    }
}
