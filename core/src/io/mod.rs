//! Byte streams and endian-aware serialization.
//!
//! - [`Stream`]: seekable byte stream trait (object safe, so
//!   `Box<dyn Stream>` is the runtime-polymorphic [`AnyStream`])
//! - [`MemoryStream`]: growable in-memory stream
//! - [`Writer`] / [`Reader`]: typed, alignment-aware encoding on top of a stream
//!
//! Strings and arrays are length-prefixed with a `u32`; lengths above
//! [`MAX_STRING_LENGTH`] / [`MAX_ARRAY_LENGTH`] are rejected on both sides.

mod error;
mod reader;
mod stream;
mod writer;

pub use error::StreamError;
pub use reader::Reader;
pub use stream::{AnyStream, MemoryStream, Stream};
pub use writer::{Primitive, Writer};

/// Longest string accepted by [`Writer::write_string`] / [`Reader::read_string`].
pub const MAX_STRING_LENGTH: usize = 1024 * 1024;

/// Longest array accepted by [`Writer::write_array`] / [`Reader::read_array`].
pub const MAX_ARRAY_LENGTH: usize = 1024 * 1024 * 16;

/// Byte order used for primitive values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    #[default]
    Little,
    Big,
}

impl ByteOrder {
    /// True when values must be byte-swapped relative to the host.
    pub(crate) fn needs_swap(self) -> bool {
        match self {
            ByteOrder::Little => cfg!(target_endian = "big"),
            ByteOrder::Big => cfg!(target_endian = "little"),
        }
    }
}

/// Rounds `value` up to the next multiple of `alignment` (a power of two).
#[inline]
pub fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two(), "alignment must be a power of two");
    (value + alignment - 1) & !(alignment - 1)
}
