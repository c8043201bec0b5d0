//! Strongly typed wrappers for integer identifiers.
//!
//! The [`strong_type!`](crate::strong_type) macro produces a newtype with
//! `get()`, `From` conversions to the raw value, ordering, hashing and a
//! `Display` that prints the raw value. Wrapping keeps heap indices, fence
//! values and frame numbers from being mixed up.

use std::fmt;

/// Declares a `Copy` newtype around an integer.
///
/// ```ignore
/// strong_type!(
///     /// Index into a descriptor heap.
///     pub struct HeapIndex(u32);
/// );
/// let index = HeapIndex::new(4);
/// assert_eq!(index.get(), 4);
/// ```
#[macro_export]
macro_rules! strong_type {
    ($(#[$meta:meta])* $vis:vis struct $name:ident($inner:ty);) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        #[repr(transparent)]
        $vis struct $name(pub $inner);

        impl $name {
            /// Wraps a raw value.
            #[inline]
            pub const fn new(value: $inner) -> Self {
                Self(value)
            }

            /// Returns the raw value.
            #[inline]
            pub const fn get(self) -> $inner {
                self.0
            }
        }

        impl From<$inner> for $name {
            #[inline]
            fn from(value: $inner) -> Self {
                Self(value)
            }
        }

        impl From<$name> for $inner {
            #[inline]
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                std::fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

strong_type!(
    /// Engine-stable identifier of a texture resource.
    ///
    /// Two values are reserved: [`ResourceKey::FALLBACK`] (no texture authored)
    /// and [`ResourceKey::PLACEHOLDER`] (explicitly neutral). Neither ever gets
    /// a per-entry descriptor.
    pub struct ResourceKey(u64);
);

impl ResourceKey {
    /// No texture was authored for the slot.
    pub const FALLBACK: Self = Self(0);
    /// Explicit request for the neutral placeholder texture.
    pub const PLACEHOLDER: Self = Self(u64::MAX);

    /// Returns true for [`FALLBACK`](Self::FALLBACK) and [`PLACEHOLDER`](Self::PLACEHOLDER).
    pub const fn is_reserved(self) -> bool {
        self.0 == Self::FALLBACK.0 || self.0 == Self::PLACEHOLDER.0
    }
}

/// 128-bit asset identifier as stored in cooked containers.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct AssetKey(pub [u8; 16]);

impl AssetKey {
    /// The all-zero key, never assigned to a real asset.
    pub const NONE: Self = Self([0; 16]);

    /// Builds a key from two 64-bit halves (little-endian).
    pub fn from_parts(high: u64, low: u64) -> Self {
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&low.to_le_bytes());
        bytes[8..].copy_from_slice(&high.to_le_bytes());
        Self(bytes)
    }

    /// Convenience for tests and procedural assets.
    pub fn from_u64(value: u64) -> Self {
        Self::from_parts(0, value)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn is_none(&self) -> bool {
        *self == Self::NONE
    }
}

impl fmt::Debug for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AssetKey({self})")
    }
}

impl fmt::Display for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.0.iter().rev().enumerate() {
            if i == 4 || i == 6 || i == 8 || i == 10 {
                f.write_str("-")?;
            }
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}
