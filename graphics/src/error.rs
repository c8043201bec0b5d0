//! Graphics error types.

use std::fmt;

use oxygen_core::ErrorKind;

/// Errors that can occur in the graphics system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphicsError {
    /// A caller broke an operation's preconditions.
    InvalidArgument(String),
    /// A staging partition or fixed-size pool cannot fit the request.
    OutOfCapacity { requested: u64, capacity: u64 },
    /// The backend refused to create a buffer or texture.
    ResourceCreationFailed(String),
    /// The resource registry rejected an entry.
    ResourceRegistrationFailed(String),
    /// A descriptor heap partition is exhausted.
    DescriptorAllocationFailed(String),
    /// Lookup miss for a resource, view, or handle.
    NotFound(String),
    /// A bounded wait on a queue timeline expired.
    Timeout { value: u64, completed: u64 },
    /// Backend failure or broken internal invariant.
    Internal(String),
}

impl GraphicsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::OutOfCapacity { .. } => ErrorKind::OutOfCapacity,
            Self::ResourceCreationFailed(_) => ErrorKind::ResourceCreationFailed,
            Self::ResourceRegistrationFailed(_) => ErrorKind::ResourceRegistrationFailed,
            Self::DescriptorAllocationFailed(_) => ErrorKind::DescriptorAllocationFailed,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl fmt::Display for GraphicsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Self::OutOfCapacity { requested, capacity } => {
                write!(f, "out of capacity: requested {requested} bytes, capacity {capacity}")
            }
            Self::ResourceCreationFailed(msg) => write!(f, "resource creation failed: {msg}"),
            Self::ResourceRegistrationFailed(msg) => {
                write!(f, "resource registration failed: {msg}")
            }
            Self::DescriptorAllocationFailed(msg) => {
                write!(f, "descriptor allocation failed: {msg}")
            }
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Timeout { value, completed } => {
                write!(f, "timed out waiting for fence {value} (completed {completed})")
            }
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for GraphicsError {}
