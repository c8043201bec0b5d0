//! Bindless indices, fence values and descriptor domains.
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`HeapIndex`] | Slot in the allocator's flat index space |
//! | [`ShaderVisibleIndex`] | Index a shader reads from the bindless table |
//! | [`VersionedBindlessHandle`] | `HeapIndex` plus the generation it was allocated in |
//! | [`FenceValue`] | Point on a queue timeline |

use oxygen_core::strong_type;

strong_type!(
    /// Slot in the descriptor allocator's flat index space.
    pub struct HeapIndex(u32);
);

strong_type!(
    /// Flattened index a shader uses to reach a descriptor.
    pub struct ShaderVisibleIndex(u32);
);

strong_type!(
    /// Reuse counter of a heap slot.
    pub struct Generation(u32);
);

strong_type!(
    /// Monotone value on a queue timeline.
    pub struct FenceValue(u64);
);

/// Sentinel for "no shader-visible descriptor".
pub const INVALID_SHADER_VISIBLE_INDEX: ShaderVisibleIndex = ShaderVisibleIndex(u32::MAX);

/// Sentinel for "no heap slot".
pub const INVALID_HEAP_INDEX: HeapIndex = HeapIndex(u32::MAX);

impl ShaderVisibleIndex {
    pub const INVALID: Self = INVALID_SHADER_VISIBLE_INDEX;

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl HeapIndex {
    pub const INVALID: Self = INVALID_HEAP_INDEX;

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl FenceValue {
    pub const ZERO: Self = FenceValue(0);

    pub fn next(self) -> Self {
        FenceValue(self.0 + 1)
    }
}

/// Heap slot stamped with the generation it was allocated in.
///
/// A handle is current while its generation matches the tracker's value for
/// the index; reclaiming the slot bumps the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VersionedBindlessHandle {
    pub index: HeapIndex,
    pub generation: Generation,
}

impl VersionedBindlessHandle {
    pub const fn new(index: HeapIndex, generation: Generation) -> Self {
        Self { index, generation }
    }
}

/// Kind of view a descriptor holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ViewType {
    Cbv,
    Srv,
    Uav,
    Sampler,
    Rtv,
    Dsv,
}

impl ViewType {
    /// Physical heap family the view type is stored in.
    pub fn heap_family(self) -> HeapFamily {
        match self {
            Self::Cbv | Self::Srv | Self::Uav => HeapFamily::CbvSrvUav,
            Self::Sampler => HeapFamily::Sampler,
            Self::Rtv => HeapFamily::Rtv,
            Self::Dsv => HeapFamily::Dsv,
        }
    }
}

/// Physical descriptor heap family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HeapFamily {
    CbvSrvUav,
    Sampler,
    Rtv,
    Dsv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DescriptorVisibility {
    /// Readable from shaders through the bindless table.
    ShaderVisible,
    /// Staging copies and attachment views.
    CpuOnly,
}

/// `(view_type, visibility)` pair selecting a heap partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DescriptorDomain {
    pub view_type: ViewType,
    pub visibility: DescriptorVisibility,
}

impl DescriptorDomain {
    pub const fn new(view_type: ViewType, visibility: DescriptorVisibility) -> Self {
        Self {
            view_type,
            visibility,
        }
    }

    pub const fn shader_visible(view_type: ViewType) -> Self {
        Self::new(view_type, DescriptorVisibility::ShaderVisible)
    }

    pub const fn cpu_only(view_type: ViewType) -> Self {
        Self::new(view_type, DescriptorVisibility::CpuOnly)
    }

    pub const SRV: Self = Self::shader_visible(ViewType::Srv);
    pub const UAV: Self = Self::shader_visible(ViewType::Uav);
    pub const CBV: Self = Self::shader_visible(ViewType::Cbv);

    pub fn is_shader_visible(&self) -> bool {
        self.visibility == DescriptorVisibility::ShaderVisible
    }
}

impl std::fmt::Display for DescriptorDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}/{:?}", self.view_type, self.visibility)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinels() {
        assert!(!INVALID_SHADER_VISIBLE_INDEX.is_valid());
        assert!(ShaderVisibleIndex::new(0).is_valid());
        assert_eq!(FenceValue::ZERO.next(), FenceValue::new(1));
    }

    #[test]
    fn test_heap_families() {
        assert_eq!(ViewType::Uav.heap_family(), HeapFamily::CbvSrvUav);
        assert_eq!(ViewType::Dsv.heap_family(), HeapFamily::Dsv);
        assert_eq!(DescriptorDomain::SRV.to_string(), "Srv/ShaderVisible");
    }
}
