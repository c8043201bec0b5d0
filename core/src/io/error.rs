use std::fmt;

use crate::error::ErrorKind;

/// Stream and serialization failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// Read past the end of the stream.
    UnexpectedEof { position: u64, requested: usize },
    /// Seek target outside `[0, size]`.
    InvalidSeek { target: i64, size: u64 },
    /// Length prefix above the configured maximum.
    LengthTooLarge { length: usize, max: usize },
    /// Fixed-size stream cannot grow.
    CapacityExceeded { requested: u64, capacity: u64 },
    /// String bytes were not valid UTF-8.
    InvalidUtf8,
    /// Alignment is zero or not a power of two.
    InvalidAlignment(u64),
}

impl StreamError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::CapacityExceeded { .. } => ErrorKind::OutOfCapacity,
            _ => ErrorKind::InvalidArgument,
        }
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedEof { position, requested } => {
                write!(f, "unexpected end of stream at {position} reading {requested} bytes")
            }
            Self::InvalidSeek { target, size } => {
                write!(f, "seek to {target} outside stream of {size} bytes")
            }
            Self::LengthTooLarge { length, max } => {
                write!(f, "length {length} exceeds maximum {max}")
            }
            Self::CapacityExceeded { requested, capacity } => {
                write!(f, "write up to {requested} exceeds fixed capacity {capacity}")
            }
            Self::InvalidUtf8 => write!(f, "string is not valid UTF-8"),
            Self::InvalidAlignment(a) => write!(f, "invalid alignment {a}"),
        }
    }
}

impl std::error::Error for StreamError {}
