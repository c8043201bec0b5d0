//! Per-view scene constants bound at root slot 1.

use bytemuck::{Pod, Zeroable};
use oxygen_core::math::{Mat4, mat4_to_cols_array};

use crate::types::ShaderVisibleIndex;

/// `cbuffer SceneConstants : register(b1, space0)`.
///
/// Every bindless index defaults to the invalid sentinel so shaders can
/// test for missing data.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SceneConstants {
    pub view: [f32; 16],
    pub projection: [f32; 16],
    pub view_projection: [f32; 16],
    pub camera_position: [f32; 3],
    pub time_seconds: f32,
    pub viewport: [f32; 2],
    pub z_near: f32,
    pub z_far: f32,

    pub frame_slot: u32,
    pub frame_sequence: u32,
    pub draw_metadata_srv: u32,
    pub world_transforms_srv: u32,

    pub normal_transforms_srv: u32,
    pub material_constants_srv: u32,
    pub directional_lights_srv: u32,
    pub directional_light_count: u32,

    pub positional_lights_srv: u32,
    pub positional_light_count: u32,
    pub cluster_grid_srv: u32,
    pub light_index_list_srv: u32,

    pub cluster_dims: [u32; 3],
    pub cluster_tile_size_px: u32,

    pub cluster_z_scale: f32,
    pub cluster_z_near: f32,
    pub hdr_color_srv: u32,
    pub exposure_state_srv: u32,

    /// Exposure multiplier used when no exposure state buffer is bound.
    pub manual_exposure: f32,
    pub tone_mapper: u32,
    pub _pad: [u32; 2],
}

static_assertions::const_assert_eq!(std::mem::size_of::<SceneConstants>(), 320);

impl Default for SceneConstants {
    fn default() -> Self {
        let invalid = ShaderVisibleIndex::INVALID.get();
        Self {
            draw_metadata_srv: invalid,
            world_transforms_srv: invalid,
            normal_transforms_srv: invalid,
            material_constants_srv: invalid,
            directional_lights_srv: invalid,
            positional_lights_srv: invalid,
            cluster_grid_srv: invalid,
            light_index_list_srv: invalid,
            hdr_color_srv: invalid,
            exposure_state_srv: invalid,
            manual_exposure: 1.0,
            ..Zeroable::zeroed()
        }
    }
}

impl SceneConstants {
    /// Size of one constant buffer slice; CBVs are 256-byte aligned.
    pub const ALIGNED_SIZE: u64 = 512;

    pub fn set_camera(&mut self, view: &Mat4, projection: &Mat4, position: [f32; 3]) {
        self.view = mat4_to_cols_array(view);
        self.projection = mat4_to_cols_array(projection);
        self.view_projection = mat4_to_cols_array(&(projection * view));
        self.camera_position = position;
    }
}
