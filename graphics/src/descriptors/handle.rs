//! RAII descriptor slot.

use std::sync::Arc;

use super::DescriptorAllocator;
use crate::types::{DescriptorDomain, HeapIndex, ShaderVisibleIndex};

/// Owns one slot of the global heap and returns it on drop.
pub struct DescriptorHandle {
    allocator: Arc<DescriptorAllocator>,
    domain: DescriptorDomain,
    index: HeapIndex,
}

impl DescriptorHandle {
    pub(super) fn new(
        allocator: Arc<DescriptorAllocator>,
        domain: DescriptorDomain,
        index: HeapIndex,
    ) -> Self {
        Self {
            allocator,
            domain,
            index,
        }
    }

    pub fn index(&self) -> HeapIndex {
        self.index
    }

    pub fn domain(&self) -> DescriptorDomain {
        self.domain
    }

    pub fn is_valid(&self) -> bool {
        self.index.is_valid()
    }

    pub fn shader_visible_index(&self) -> ShaderVisibleIndex {
        self.allocator.shader_visible_index(self.index)
    }

    /// Gives up ownership; the caller becomes responsible for freeing the slot.
    pub fn into_raw(mut self) -> HeapIndex {
        std::mem::replace(&mut self.index, HeapIndex::INVALID)
    }
}

impl Drop for DescriptorHandle {
    fn drop(&mut self) {
        if self.index.is_valid()
            && let Err(err) = self.allocator.free_raw(self.domain, self.index)
        {
            log::error!("DescriptorHandle: failed to free {}: {err}", self.index);
        }
    }
}

impl std::fmt::Debug for DescriptorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorHandle")
            .field("domain", &self.domain)
            .field("index", &self.index)
            .finish()
    }
}
