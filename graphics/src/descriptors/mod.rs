//! Global descriptor heap: partitioned allocation and RAII handles.
//!
//! The flat [`HeapIndex`](crate::types::HeapIndex) space is split into one
//! contiguous range per [`DescriptorDomain`](crate::types::DescriptorDomain).
//! Shader-visible domains of the same heap family share one shader index
//! space, so a [`ShaderVisibleIndex`](crate::types::ShaderVisibleIndex) is
//! the partition's shader base plus the slot's offset in it.

mod allocator;
mod handle;

pub use allocator::{DEFAULT_LAYOUT, DescriptorAllocator, PartitionInfo};
pub use handle::DescriptorHandle;

use crate::resources::ResourceId;
use crate::types::ViewDescription;

/// What a heap slot points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorContents {
    pub resource: ResourceId,
    pub view: ViewDescription,
}

impl DescriptorContents {
    pub fn new(resource: ResourceId, view: ViewDescription) -> Self {
        Self { resource, view }
    }
}
