//! Timeline-gated recycling of bindless slots.
//!
//! A released slot is only handed back to the allocator once the queue it
//! was released against has completed the release fence. Each reclaim bumps
//! the slot's generation so stale [`VersionedBindlessHandle`]s can be
//! detected.
//!
//! [`VersionedBindlessHandle`]: crate::types::VersionedBindlessHandle

mod generation;
mod slot_reuse;

pub use generation::GenerationTracker;
pub use slot_reuse::{SlotReuseStats, TimelineGatedSlotReuse};
