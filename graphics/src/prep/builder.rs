//! Turns collected render items into a view's prepared frame.

use oxygen_scene::asset::MeshView;
use oxygen_scene::{MaterialDomain, NodeHandle};

use super::PreparedSceneFrame;
use crate::binders::{DrawMetadata, GeometryHandle, GeometryUploader, MaterialHandle, PassMask, TransformHandle, ViewId};

/// One visible submesh range of one view, with its deduplicated handles.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderItem {
    pub node: NodeHandle,
    pub geometry: GeometryHandle,
    pub transform: TransformHandle,
    pub material: MaterialHandle,
    pub submesh_index: u32,
    pub range: MeshView,
    pub is_indexed: bool,
    pub mask: PassMask,
    /// Distance from the view to the bounds centre.
    pub view_depth: f32,
}

/// Passes a material domain draws in.
pub fn domain_pass_mask(domain: MaterialDomain) -> PassMask {
    match domain {
        MaterialDomain::Opaque => PassMask::OPAQUE,
        MaterialDomain::AlphaMasked => PassMask::MASKED,
        MaterialDomain::Transparent | MaterialDomain::Decal => PassMask::TRANSPARENT,
    }
}

/// Accumulates one view's draw records.
///
/// Items whose geometry has no shader-visible buffers yet (pending or
/// evicted) are dropped for this frame; they appear once the upload has
/// published its indices.
#[derive(Debug)]
pub struct RenderListBuilder {
    frame: PreparedSceneFrame,
    dropped: usize,
}

impl RenderListBuilder {
    pub fn new(view: ViewId) -> Self {
        Self {
            frame: PreparedSceneFrame::new(view),
            dropped: 0,
        }
    }

    /// Appends `item`; returns its draw index, or `None` if it was dropped.
    pub fn push(&mut self, item: &RenderItem, geometry: &GeometryUploader) -> Option<u32> {
        let indices = geometry.get_shader_visible_indices(item.geometry);
        if !indices.vertex_buffer.is_valid() || (item.is_indexed && !indices.index_buffer.is_valid()) {
            self.dropped += 1;
            return None;
        }
        let range = &item.range;
        let record = DrawMetadata {
            vertex_buffer_index: indices.vertex_buffer.get(),
            index_buffer_index: indices.index_buffer.get(),
            first_index: range.first_index,
            base_vertex: range.first_vertex,
            is_indexed: u32::from(item.is_indexed),
            instance_count: 1,
            index_count: if item.is_indexed { range.index_count } else { 0 },
            vertex_count: range.vertex_count,
            material_handle: item.material.get(),
            transform_index: item.transform.get(),
            flags: item.mask.bits(),
            submesh_index: item.submesh_index,
        };
        if record.draw_vertex_count() == 0 {
            self.dropped += 1;
            return None;
        }
        Some(self.frame.push(record, item.view_depth, item.node, item.geometry))
    }

    pub fn len(&self) -> usize {
        self.frame.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.is_empty()
    }

    pub fn dropped_count(&self) -> usize {
        self.dropped
    }

    pub fn finish(mut self, sort_partitions: bool) -> PreparedSceneFrame {
        if sort_partitions {
            self.frame.sort_partitions();
        }
        self.frame
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use oxygen_core::AssetKey;
    use oxygen_scene::{GeometryAsset, Mesh};

    use super::*;
    use crate::backend::HeadlessBackend;
    use crate::config::{GraphicsConfig, StagingConfig};
    use crate::device::GraphicsDevice;
    use crate::upload::{RingBufferStaging, UploadCoordinator};

    fn item(geometry: GeometryHandle, mask: PassMask, depth: f32) -> RenderItem {
        RenderItem {
            node: NodeHandle::default(),
            geometry,
            transform: TransformHandle::new(3),
            material: MaterialHandle::new(7),
            submesh_index: 0,
            range: MeshView {
                first_index: 6,
                index_count: 30,
                first_vertex: 0,
                vertex_count: 24,
            },
            is_indexed: true,
            mask,
            view_depth: depth,
        }
    }

    #[test]
    fn test_pending_geometry_is_dropped_until_published() {
        let device = GraphicsDevice::new(Arc::new(HeadlessBackend::new()), GraphicsConfig::default()).unwrap();
        let staging = RingBufferStaging::new(device.clone(), 3, &StagingConfig::default()).unwrap();
        let mut uploads = UploadCoordinator::new(device.clone(), Box::new(staging));
        let mut geometry = GeometryUploader::new(device);
        let asset = Arc::new(GeometryAsset::new(
            AssetKey::from_u64(5),
            "cube",
            vec![Arc::new(Mesh::cube("lod0", 1.0, None))],
        ));
        let handle = geometry.get_or_allocate(&asset, 0, true).unwrap();

        let mut builder = RenderListBuilder::new(ViewId::new(1));
        assert_eq!(builder.push(&item(handle, PassMask::OPAQUE, 1.0), &geometry), None);
        assert_eq!(builder.dropped_count(), 1);

        geometry.ensure_frame_resources(&mut uploads).unwrap();
        let mut builder = RenderListBuilder::new(ViewId::new(1));
        assert_eq!(builder.push(&item(handle, PassMask::OPAQUE, 4.0), &geometry), Some(0));
        assert_eq!(builder.push(&item(handle, PassMask::OPAQUE, 2.0), &geometry), Some(1));
        assert_eq!(
            builder.push(&item(handle, PassMask::TRANSPARENT | PassMask::DOUBLE_SIDED, 3.0), &geometry),
            Some(2)
        );
        let frame = builder.finish(true);

        assert_eq!(frame.view(), ViewId::new(1));
        assert_eq!(frame.opaque_draws(), &[1, 0]);
        assert_eq!(frame.transparent_draws(), &[2]);
        let record = frame.record(0).unwrap();
        let indices = geometry.get_shader_visible_indices(handle);
        assert_eq!(record.vertex_buffer_index, indices.vertex_buffer.get());
        assert_eq!(record.index_buffer_index, indices.index_buffer.get());
        assert_eq!((record.first_index, record.index_count), (6, 30));
        assert_eq!((record.material_handle, record.transform_index), (7, 3));
    }

    #[test]
    fn test_domain_masks() {
        assert_eq!(domain_pass_mask(MaterialDomain::Opaque), PassMask::OPAQUE);
        assert_eq!(domain_pass_mask(MaterialDomain::AlphaMasked), PassMask::MASKED);
        assert_eq!(domain_pass_mask(MaterialDomain::Decal), PassMask::TRANSPARENT);
    }
}
