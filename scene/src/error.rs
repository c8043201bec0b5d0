//! Scene error types.

use std::fmt;

use oxygen_core::ErrorKind;

use crate::NodeHandle;

/// Errors raised by scene graph operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SceneError {
    /// Handle does not refer to a live node.
    NodeNotFound(NodeHandle),
    /// Operation would break the tree (cycle, self-parenting).
    InvalidHierarchy(String),
    /// A component of this type is already attached.
    ComponentExists(&'static str),
    /// No component of this type is attached.
    ComponentMissing(&'static str),
}

impl SceneError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NodeNotFound(_) | Self::ComponentMissing(_) => ErrorKind::NotFound,
            Self::InvalidHierarchy(_) | Self::ComponentExists(_) => ErrorKind::InvalidArgument,
        }
    }
}

impl fmt::Display for SceneError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NodeNotFound(h) => write!(f, "node {h:?} not found"),
            Self::InvalidHierarchy(msg) => write!(f, "invalid hierarchy: {msg}"),
            Self::ComponentExists(name) => write!(f, "component {name} already attached"),
            Self::ComponentMissing(name) => write!(f, "component {name} not attached"),
        }
    }
}

impl std::error::Error for SceneError {}
