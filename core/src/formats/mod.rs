//! Cooked container and shader reflection formats.
//!
//! | Format | Module | Notes |
//! |--------|--------|-------|
//! | PAK container | [`pak`] | header + assets + directory + footer |
//! | Loose cooked index | [`loose`] | `container.index.bin` next to side-car files |
//! | Shader reflection | [`reflection`] | `OXRF` blob emitted by the shader baker |

pub mod loose;
pub mod pak;
pub mod reflection;

use std::fmt;

use crate::error::ErrorKind;
use crate::io::StreamError;

/// Asset category stored in directory entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum AssetType {
    #[default]
    Unknown = 0,
    Material = 1,
    Geometry = 2,
    Scene = 3,
}

impl AssetType {
    /// Unrecognized values decode as [`AssetType::Unknown`].
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Material,
            2 => Self::Geometry,
            3 => Self::Scene,
            _ => Self::Unknown,
        }
    }
}

/// Decoding failures for cooked formats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// Magic bytes did not match.
    BadMagic { expected: &'static str },
    /// Version this reader does not understand.
    UnsupportedVersion(u32),
    /// Offsets or sizes point outside the data.
    OutOfBounds { what: &'static str, offset: u64, size: u64, len: u64 },
    /// Stored hash differs from the computed one.
    HashMismatch { stored: u64, computed: u64 },
    /// Structurally invalid content.
    Malformed(String),
    /// Underlying stream failure.
    Stream(StreamError),
}

impl FormatError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidArgument
    }
}

impl From<StreamError> for FormatError {
    fn from(e: StreamError) -> Self {
        Self::Stream(e)
    }
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadMagic { expected } => write!(f, "bad magic, expected {expected}"),
            Self::UnsupportedVersion(v) => write!(f, "unsupported version {v}"),
            Self::OutOfBounds { what, offset, size, len } => {
                write!(f, "{what} [{offset}, +{size}) outside data of {len} bytes")
            }
            Self::HashMismatch { stored, computed } => {
                write!(f, "hash mismatch: stored {stored:#018x}, computed {computed:#018x}")
            }
            Self::Malformed(msg) => write!(f, "malformed data: {msg}"),
            Self::Stream(e) => write!(f, "stream error: {e}"),
        }
    }
}

impl std::error::Error for FormatError {}

/// Pads `text` with zeros into a 16-byte magic.
pub(crate) const fn magic16(text: &[u8]) -> [u8; 16] {
    let mut out = [0u8; 16];
    let mut i = 0;
    while i < text.len() && i < 16 {
        out[i] = text[i];
        i += 1;
    }
    out
}
