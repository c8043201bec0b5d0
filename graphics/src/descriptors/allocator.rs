//! Partitioned descriptor allocator.

use std::sync::Arc;

use parking_lot::Mutex;

use super::{DescriptorContents, DescriptorHandle};
use crate::backend::GpuBackend;
use crate::error::GraphicsError;
use crate::types::{
    DescriptorDomain, DescriptorVisibility, HeapFamily, HeapIndex, ShaderVisibleIndex, ViewType,
};

/// Partition layout of the global heap, in heap order.
///
/// New domains are only ever appended so indices stored by shaders and
/// caches keep their meaning across builds.
pub const DEFAULT_LAYOUT: &[(DescriptorDomain, u32)] = &[
    (DescriptorDomain::SRV, 16_384),
    (DescriptorDomain::UAV, 4_096),
    (DescriptorDomain::CBV, 1_024),
    (DescriptorDomain::shader_visible(ViewType::Sampler), 256),
    (DescriptorDomain::cpu_only(ViewType::Srv), 1_024),
    (DescriptorDomain::cpu_only(ViewType::Rtv), 256),
    (DescriptorDomain::cpu_only(ViewType::Dsv), 64),
];

/// Static description of one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionInfo {
    pub domain: DescriptorDomain,
    /// First [`HeapIndex`] of the partition.
    pub base: u32,
    pub capacity: u32,
    /// First shader-visible index, for shader-visible domains.
    pub shader_base: Option<u32>,
}

impl PartitionInfo {
    fn contains(&self, index: HeapIndex) -> bool {
        index.get() >= self.base && index.get() - self.base < self.capacity
    }
}

#[derive(Debug, Default)]
struct PartitionState {
    /// Next never-used offset.
    next: u32,
    /// Returned offsets, reused last-in first-out.
    free: Vec<u32>,
    allocated: u32,
}

/// Allocates slots of the global descriptor heap.
///
/// Thread-safe; each partition is a bump pointer plus a free list.
pub struct DescriptorAllocator {
    backend: Arc<dyn GpuBackend>,
    partitions: Vec<PartitionInfo>,
    states: Mutex<Vec<PartitionState>>,
}

impl DescriptorAllocator {
    /// Allocator with [`DEFAULT_LAYOUT`].
    pub fn new(backend: Arc<dyn GpuBackend>) -> Result<Self, GraphicsError> {
        Self::with_layout(backend, DEFAULT_LAYOUT)
    }

    /// Allocator with a custom partition table.
    pub fn with_layout(
        backend: Arc<dyn GpuBackend>,
        layout: &[(DescriptorDomain, u32)],
    ) -> Result<Self, GraphicsError> {
        let mut partitions: Vec<PartitionInfo> = Vec::with_capacity(layout.len());
        let mut base = 0u32;
        // Running shader-visible base per heap family.
        let mut family_bases: Vec<(HeapFamily, u32)> = Vec::new();

        for &(domain, capacity) in layout {
            if capacity == 0 {
                return Err(GraphicsError::InvalidArgument(format!(
                    "descriptor partition {domain} has zero capacity"
                )));
            }
            if partitions.iter().any(|p| p.domain == domain) {
                return Err(GraphicsError::InvalidArgument(format!(
                    "descriptor partition {domain} declared twice"
                )));
            }
            let shader_base = (domain.visibility == DescriptorVisibility::ShaderVisible).then(|| {
                let family = domain.view_type.heap_family();
                match family_bases.iter_mut().find(|(f, _)| *f == family) {
                    Some((_, next)) => {
                        let start = *next;
                        *next += capacity;
                        start
                    }
                    None => {
                        family_bases.push((family, capacity));
                        0
                    }
                }
            });
            partitions.push(PartitionInfo {
                domain,
                base,
                capacity,
                shader_base,
            });
            base = base.checked_add(capacity).ok_or_else(|| {
                GraphicsError::InvalidArgument("descriptor heap layout overflows u32".into())
            })?;
        }

        let states = partitions.iter().map(|_| PartitionState::default()).collect();
        log::debug!(
            "DescriptorAllocator: {} partitions, {} descriptors total",
            partitions.len(),
            base
        );
        Ok(Self {
            backend,
            partitions,
            states: Mutex::new(states),
        })
    }

    pub fn partitions(&self) -> &[PartitionInfo] {
        &self.partitions
    }

    fn partition_of(&self, domain: DescriptorDomain) -> Result<usize, GraphicsError> {
        self.partitions
            .iter()
            .position(|p| p.domain == domain)
            .ok_or_else(|| {
                GraphicsError::DescriptorAllocationFailed(format!("no partition for {domain}"))
            })
    }

    fn partition_containing(&self, index: HeapIndex) -> Option<&PartitionInfo> {
        self.partitions.iter().find(|p| p.contains(index))
    }

    /// Allocates a slot without an owning handle.
    pub fn allocate_raw(&self, domain: DescriptorDomain) -> Result<HeapIndex, GraphicsError> {
        let p = self.partition_of(domain)?;
        let info = self.partitions[p];
        let mut states = self.states.lock();
        let state = &mut states[p];
        let offset = match state.free.pop() {
            Some(offset) => offset,
            None if state.next < info.capacity => {
                state.next += 1;
                state.next - 1
            }
            None => {
                return Err(GraphicsError::DescriptorAllocationFailed(format!(
                    "partition {domain} exhausted ({} descriptors)",
                    info.capacity
                )));
            }
        };
        state.allocated += 1;
        Ok(HeapIndex::new(info.base + offset))
    }

    /// Returns a slot obtained from [`allocate_raw`](Self::allocate_raw).
    ///
    /// The slot's descriptor is cleared.
    pub fn free_raw(&self, domain: DescriptorDomain, index: HeapIndex) -> Result<(), GraphicsError> {
        let p = self.partition_of(domain)?;
        let info = self.partitions[p];
        if !info.contains(index) {
            return Err(GraphicsError::InvalidArgument(format!(
                "heap index {index} is outside partition {domain}"
            )));
        }
        let offset = index.get() - info.base;
        {
            let mut states = self.states.lock();
            let state = &mut states[p];
            if offset >= state.next || state.free.contains(&offset) {
                oxygen_core::contract_violation!(
                    GraphicsError::InvalidArgument(format!("heap index {index} is not allocated")),
                    "freeing unallocated heap index {index} in {domain}"
                );
            }
            state.free.push(offset);
            state.allocated -= 1;
        }
        self.backend.write_descriptor(index, None);
        Ok(())
    }

    /// Allocates a slot owned by the returned handle.
    pub fn allocate(
        self: &Arc<Self>,
        domain: DescriptorDomain,
    ) -> Result<DescriptorHandle, GraphicsError> {
        let index = self.allocate_raw(domain)?;
        Ok(DescriptorHandle::new(Arc::clone(self), domain, index))
    }

    /// Points a slot at a view, or clears it.
    pub fn write(&self, index: HeapIndex, contents: Option<DescriptorContents>) {
        self.backend.write_descriptor(index, contents);
    }

    /// Shader index of a slot, or the invalid sentinel for CPU-only slots.
    pub fn shader_visible_index(&self, index: HeapIndex) -> ShaderVisibleIndex {
        self.partition_containing(index)
            .and_then(|p| p.shader_base.map(|sb| sb + (index.get() - p.base)))
            .map_or(ShaderVisibleIndex::INVALID, ShaderVisibleIndex::new)
    }

    pub fn domain_of(&self, index: HeapIndex) -> Option<DescriptorDomain> {
        self.partition_containing(index).map(|p| p.domain)
    }

    pub fn capacity(&self, domain: DescriptorDomain) -> u32 {
        self.partition_of(domain)
            .map_or(0, |p| self.partitions[p].capacity)
    }

    pub fn allocated_count(&self, domain: DescriptorDomain) -> u32 {
        match self.partition_of(domain) {
            Ok(p) => self.states.lock()[p].allocated,
            Err(_) => 0,
        }
    }

    /// Slots still available in a domain.
    pub fn remaining(&self, domain: DescriptorDomain) -> u32 {
        self.capacity(domain) - self.allocated_count(domain)
    }
}

impl std::fmt::Debug for DescriptorAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorAllocator")
            .field("partitions", &self.partitions)
            .finish()
    }
}

static_assertions::assert_impl_all!(DescriptorAllocator: Send, Sync);
