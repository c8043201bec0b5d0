//! Per-draw records read by shaders through the `draw_index` root constant.

use std::collections::HashMap;
use std::sync::Arc;

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use oxygen_core::{Slot, strong_type};

use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::types::ShaderVisibleIndex;
use crate::upload::TransientStructuredBuffer;

strong_type!(
    /// Identifies one view (camera) of the prepared frame.
    pub struct ViewId(u32);
);

bitflags! {
    /// Passes a draw participates in.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PassMask: u32 {
        const OPAQUE = 1 << 0;
        const MASKED = 1 << 1;
        const TRANSPARENT = 1 << 2;
        const SHADOW_CASTER = 1 << 3;
        const DOUBLE_SIDED = 1 << 4;
    }
}

/// One draw, as laid out in `StructuredBuffer<DrawMetadata>`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawMetadata {
    pub vertex_buffer_index: u32,
    pub index_buffer_index: u32,
    pub first_index: u32,
    pub base_vertex: u32,
    pub is_indexed: u32,
    pub instance_count: u32,
    pub index_count: u32,
    pub vertex_count: u32,
    pub material_handle: u32,
    pub transform_index: u32,
    /// [`PassMask`] bits.
    pub flags: u32,
    pub submesh_index: u32,
}

static_assertions::const_assert_eq!(std::mem::size_of::<DrawMetadata>(), 48);

impl DrawMetadata {
    /// Vertices the draw call emits: the index count for indexed draws.
    pub fn draw_vertex_count(&self) -> u32 {
        if self.is_indexed != 0 {
            self.index_count
        } else {
            self.vertex_count
        }
    }

    pub fn pass_mask(&self) -> PassMask {
        PassMask::from_bits_truncate(self.flags)
    }
}

/// Uploads each view's draw records into its own per-slot buffer.
pub struct DrawMetadataEmitter {
    device: Arc<GraphicsDevice>,
    views: HashMap<ViewId, TransientStructuredBuffer>,
}

impl DrawMetadataEmitter {
    pub fn new(device: Arc<GraphicsDevice>) -> Self {
        Self {
            device,
            views: HashMap::new(),
        }
    }

    /// Writes `records` for `view` and returns the SRV of its buffer.
    ///
    /// The index is stable per `(view, slot)`.
    pub fn emit(
        &mut self,
        view: ViewId,
        slot: Slot,
        records: &[DrawMetadata],
    ) -> Result<ShaderVisibleIndex, GraphicsError> {
        let buffer = self.views.entry(view).or_insert_with(|| {
            TransientStructuredBuffer::new(
                Arc::clone(&self.device),
                format!("draw_metadata_view{view}"),
                std::mem::size_of::<DrawMetadata>() as u32,
            )
        });
        buffer.write_elements(slot, records)
    }

    pub fn srv_index(&self, view: ViewId, slot: Slot) -> ShaderVisibleIndex {
        self.views
            .get(&view)
            .map_or(ShaderVisibleIndex::INVALID, |b| b.srv_index(slot))
    }

    /// Drops buffers of views not listed in `live`.
    pub fn retain_views(&mut self, live: &[ViewId]) {
        self.views.retain(|view, _| live.contains(view));
    }
}

impl std::fmt::Debug for DrawMetadataEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrawMetadataEmitter")
            .field("views", &self.views.len())
            .finish()
    }
}
