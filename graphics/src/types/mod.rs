//! Common types and descriptors for graphics resources.
//!
//! This module contains format enums, usage flags, bindless index types and
//! the descriptor structs used throughout the graphics system.

mod bindless;
mod buffer;
mod common;
mod texture;
mod view;

pub use bindless::{
    DescriptorDomain, DescriptorVisibility, FenceValue, Generation, HeapFamily, HeapIndex,
    INVALID_HEAP_INDEX, INVALID_SHADER_VISIBLE_INDEX, ShaderVisibleIndex, VersionedBindlessHandle,
    ViewType,
};
pub use buffer::{BufferDescriptor, BufferUsage};
pub use common::{ClearValue, Extent3d, MemoryType, ResourceState, Viewport};
pub use texture::{TextureDescriptor, TextureFormat, TextureUsage};
pub use view::ViewDescription;
