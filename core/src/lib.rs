//! # Oxygen Engine Core
//!
//! Leaf utilities shared by every Oxygen crate:
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`types`] | `strong_type!` newtypes, [`ResourceKey`], [`AssetKey`] |
//! | [`frame`] | [`SequenceNumber`], [`Slot`], [`FrameIdentity`] |
//! | [`error`] | [`ErrorKind`] taxonomy and `contract_violation!` |
//! | [`io`] | streams, endian-aware reader/writer |
//! | [`formats`] | PAK, loose cooked index, OXRF reflection |
//! | [`compute`] | coroutines, events, cancellation, thread pool |
//! | [`math`] | nalgebra aliases, bounding volumes, frustum |
//! | [`hash`] | stable content hashing |
//! | [`input`] | frozen action/axis snapshot |
//! | [`profiling`] | Tracy macros (feature `profiling`) |

pub mod compute;
pub mod error;
pub mod formats;
pub mod frame;
pub mod hash;
pub mod input;
pub mod io;
pub mod math;
pub mod profiling;
pub mod types;

pub use error::ErrorKind;
pub use frame::{FRAMES_IN_FLIGHT, FrameIdentity, SequenceNumber, Slot};
pub use types::{AssetKey, ResourceKey};

#[doc(hidden)]
pub use log as __log;

/// Core library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
