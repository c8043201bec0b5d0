//! Upload subsystem.
//!
//! - [`StagingProvider`] / [`RingBufferStaging`]: per-frame bump-allocated
//!   upload memory
//! - [`UploadCoordinator`]: batched uploads with [`UploadTicket`]s
//! - [`InlineTransfersCoordinator`]: copies recorded on the caller's recorder
//! - [`AtlasBuffer`]: growable device-local structured buffer
//! - [`TransientStructuredBuffer`]: per-slot CPU-written structured buffer

mod atlas;
mod coordinator;
mod inline;
mod ring_buffer;
mod staging;
mod transient;

pub use atlas::{AtlasBuffer, EnsureCapacity};
pub use coordinator::{
    UploadCoordinator, UploadDestination, UploadRequest, UploadResult, UploadStats, UploadTicket,
    UploadTracker, UploadWait,
};
pub use inline::InlineTransfersCoordinator;
pub use ring_buffer::RingBufferStaging;
pub(crate) use ring_buffer::align_up;
pub use staging::{StagingAllocation, StagingProvider, StagingStats};
pub use transient::TransientStructuredBuffer;
