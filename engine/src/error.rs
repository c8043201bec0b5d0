//! Engine and module error types.

use std::fmt;

use oxygen_core::ErrorKind;
use oxygen_graphics::GraphicsError;

use crate::phase::PhaseId;

/// Failure reported by a module handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleError {
    /// The handler returned or reported an error.
    Failed(String),
    /// The handler panicked; holds the panic message.
    Panicked(String),
    /// A graphics call inside the handler failed.
    Graphics(GraphicsError),
    /// The handler observed cancellation at an await point.
    Cancelled,
}

impl ModuleError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Failed(_) | Self::Panicked(_) => ErrorKind::Internal,
            Self::Graphics(err) => err.kind(),
            Self::Cancelled => ErrorKind::Internal,
        }
    }
}

impl fmt::Display for ModuleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(msg) => write!(f, "{msg}"),
            Self::Panicked(msg) => write!(f, "panicked: {msg}"),
            Self::Graphics(err) => write!(f, "graphics: {err}"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

impl std::error::Error for ModuleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Graphics(err) => Some(err),
            _ => None,
        }
    }
}

impl From<GraphicsError> for ModuleError {
    fn from(err: GraphicsError) -> Self {
        Self::Graphics(err)
    }
}

impl From<oxygen_core::compute::Cancelled> for ModuleError {
    fn from(_: oxygen_core::compute::Cancelled) -> Self {
        Self::Cancelled
    }
}

/// Errors that can occur in the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// A caller broke an operation's preconditions.
    InvalidArgument(String),
    /// Unknown module, command or CVar.
    NotFound(String),
    /// Console policy rejected a command or CVar mutation.
    Denied(String),
    /// Configuration text could not be parsed or holds invalid values.
    Config(String),
    /// A critical module failed; the frame was skipped.
    CriticalModule {
        module: String,
        phase: PhaseId,
        source: ModuleError,
    },
    /// Graphics setup or shutdown failed outside any module.
    Graphics(GraphicsError),
    /// Reading or writing a file failed.
    Io(String),
    /// The frame loop was stopped while a frame was running.
    Cancelled,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) | Self::Config(_) => ErrorKind::InvalidArgument,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Denied(_) => ErrorKind::Denied,
            Self::CriticalModule { source, .. } => source.kind(),
            Self::Graphics(err) => err.kind(),
            Self::Io(_) | Self::Cancelled => ErrorKind::Internal,
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Denied(msg) => write!(f, "denied: {msg}"),
            Self::Config(msg) => write!(f, "invalid configuration: {msg}"),
            Self::CriticalModule {
                module,
                phase,
                source,
            } => write!(f, "critical module '{module}' failed in {phase}: {source}"),
            Self::Graphics(err) => write!(f, "graphics: {err}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Cancelled => f.write_str("frame loop cancelled"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::CriticalModule { source, .. } => Some(source),
            Self::Graphics(err) => Some(err),
            _ => None,
        }
    }
}

impl From<GraphicsError> for EngineError {
    fn from(err: GraphicsError) -> Self {
        Self::Graphics(err)
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
