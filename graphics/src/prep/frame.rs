//! Prepared frame: what the passes of one view draw.

use oxygen_scene::NodeHandle;

use crate::binders::{DrawMetadata, GeometryHandle, PassMask, ViewId};
use crate::types::ShaderVisibleIndex;

/// Draw records for one view plus parallel per-record arrays.
///
/// Record `i` is selected in shaders with `draw_index == i`. The partition
/// lists hold record indices: opaque and masked sorted front to back,
/// transparent back to front.
#[derive(Debug, Clone, Default)]
pub struct PreparedSceneFrame {
    view: ViewId,
    records: Vec<DrawMetadata>,
    view_depths: Vec<f32>,
    nodes: Vec<NodeHandle>,
    geometry: Vec<GeometryHandle>,
    opaque: Vec<u32>,
    masked: Vec<u32>,
    transparent: Vec<u32>,
    draw_metadata_srv: ShaderVisibleIndex,
}

impl PreparedSceneFrame {
    pub fn new(view: ViewId) -> Self {
        Self {
            view,
            draw_metadata_srv: ShaderVisibleIndex::INVALID,
            ..Self::default()
        }
    }

    pub(crate) fn push(
        &mut self,
        record: DrawMetadata,
        view_depth: f32,
        node: NodeHandle,
        geometry: GeometryHandle,
    ) -> u32 {
        let index = self.records.len() as u32;
        let mask = record.pass_mask();
        if mask.contains(PassMask::TRANSPARENT) {
            self.transparent.push(index);
        } else if mask.contains(PassMask::MASKED) {
            self.masked.push(index);
        } else if mask.contains(PassMask::OPAQUE) {
            self.opaque.push(index);
        }
        self.records.push(record);
        self.view_depths.push(view_depth);
        self.nodes.push(node);
        self.geometry.push(geometry);
        index
    }

    /// Orders the partition lists by view depth.
    pub(crate) fn sort_partitions(&mut self) {
        let depths = &self.view_depths;
        let depth = |i: &u32| depths[*i as usize];
        self.opaque.sort_by(|a, b| depth(a).total_cmp(&depth(b)));
        self.masked.sort_by(|a, b| depth(a).total_cmp(&depth(b)));
        self.transparent.sort_by(|a, b| depth(b).total_cmp(&depth(a)));
    }

    pub(crate) fn set_draw_metadata_srv(&mut self, index: ShaderVisibleIndex) {
        self.draw_metadata_srv = index;
    }

    pub fn view(&self) -> ViewId {
        self.view
    }

    pub fn records(&self) -> &[DrawMetadata] {
        &self.records
    }

    pub fn record(&self, draw_index: u32) -> Option<&DrawMetadata> {
        self.records.get(draw_index as usize)
    }

    /// Packed `DrawMetadata` bytes as uploaded for this view.
    pub fn draw_metadata_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.records)
    }

    pub fn view_depths(&self) -> &[f32] {
        &self.view_depths
    }

    pub fn nodes(&self) -> &[NodeHandle] {
        &self.nodes
    }

    pub fn geometry_handles(&self) -> &[GeometryHandle] {
        &self.geometry
    }

    pub fn opaque_draws(&self) -> &[u32] {
        &self.opaque
    }

    pub fn masked_draws(&self) -> &[u32] {
        &self.masked
    }

    pub fn transparent_draws(&self) -> &[u32] {
        &self.transparent
    }

    /// Record indices whose pass mask intersects `mask`, in record order.
    pub fn draws_matching(&self, mask: PassMask) -> Vec<u32> {
        (0..self.records.len() as u32)
            .filter(|i| self.records[*i as usize].pass_mask().intersects(mask))
            .collect()
    }

    pub fn draw_metadata_srv(&self) -> ShaderVisibleIndex {
        self.draw_metadata_srv
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytemuck::Zeroable;

    fn record(mask: PassMask) -> DrawMetadata {
        DrawMetadata {
            flags: mask.bits(),
            instance_count: 1,
            ..DrawMetadata::zeroed()
        }
    }

    #[test]
    fn test_partitions_sort_by_depth() {
        let mut frame = PreparedSceneFrame::new(ViewId::new(0));
        let node = NodeHandle::default();
        let geometry = GeometryHandle::new(0);
        frame.push(record(PassMask::OPAQUE), 5.0, node, geometry);
        frame.push(record(PassMask::TRANSPARENT), 2.0, node, geometry);
        frame.push(record(PassMask::OPAQUE), 1.0, node, geometry);
        frame.push(record(PassMask::TRANSPARENT), 9.0, node, geometry);
        frame.push(record(PassMask::MASKED | PassMask::SHADOW_CASTER), 3.0, node, geometry);
        frame.sort_partitions();

        assert_eq!(frame.opaque_draws(), &[2, 0]);
        assert_eq!(frame.transparent_draws(), &[3, 1]);
        assert_eq!(frame.masked_draws(), &[4]);
        assert_eq!(frame.draws_matching(PassMask::SHADOW_CASTER), vec![4]);
        assert_eq!(frame.draw_metadata_bytes().len(), 5 * 48);
        assert!(!frame.draw_metadata_srv().is_valid());
    }
}
