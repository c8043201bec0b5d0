//! Per-frame world and normal matrix arrays with deduplication.

use std::collections::HashMap;
use std::sync::Arc;

use oxygen_core::Slot;
use oxygen_core::math::{Mat4, mat4_to_cols_array, normal_matrix};
use oxygen_core::strong_type;

use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::types::ShaderVisibleIndex;
use crate::upload::TransientStructuredBuffer;

strong_type!(
    /// Index of a matrix in this frame's transform arrays.
    pub struct TransformHandle(u32);
);

/// Quantization applied to diagonal elements for the fast key.
pub const QUANTIZATION_SCALE: f32 = 1024.0;

const MATRIX_STRIDE: u32 = 64;

/// 64-bit fast key: the four diagonal elements quantized to 16 bits each.
///
/// Matrices with equal keys are compared exactly before being shared.
pub fn quantized_key(m: &Mat4) -> u64 {
    (0..4).fold(0u64, |key, i| {
        let q = (m[(i, i)] * QUANTIZATION_SCALE).round() as i32 as u16;
        (key << 16) | u64::from(q)
    })
}

/// Deduplicating transform uploader.
///
/// Handles are valid for the frame they were allocated in;
/// [`begin_frame`](Self::begin_frame) starts a fresh array.
pub struct TransformUploader {
    worlds: Vec<[f32; 16]>,
    normals: Vec<[f32; 16]>,
    by_key: HashMap<u64, Vec<TransformHandle>>,
    world_buffer: TransientStructuredBuffer,
    normal_buffer: TransientStructuredBuffer,
    slot: Slot,
    dedup_hits: u64,
    collisions: u64,
}

impl TransformUploader {
    pub fn new(device: Arc<GraphicsDevice>) -> Self {
        Self {
            worlds: Vec::new(),
            normals: Vec::new(),
            by_key: HashMap::new(),
            world_buffer: TransientStructuredBuffer::new(device.clone(), "world_transforms", MATRIX_STRIDE),
            normal_buffer: TransientStructuredBuffer::new(device, "normal_transforms", MATRIX_STRIDE),
            slot: Slot::new(0),
            dedup_hits: 0,
            collisions: 0,
        }
    }

    pub fn begin_frame(&mut self, slot: Slot) {
        self.slot = slot;
        self.worlds.clear();
        self.normals.clear();
        self.by_key.clear();
    }

    /// Handle of `world` in this frame, shared by identical matrices.
    pub fn get_or_allocate(&mut self, world: &Mat4) -> TransformHandle {
        let cols = mat4_to_cols_array(world);
        let key = quantized_key(world);
        let candidates = self.by_key.entry(key).or_default();
        for &handle in candidates.iter() {
            if bytemuck::bytes_of(&self.worlds[handle.get() as usize]) == bytemuck::bytes_of(&cols) {
                self.dedup_hits += 1;
                return handle;
            }
        }
        if !candidates.is_empty() {
            self.collisions += 1;
        }
        let handle = TransformHandle::new(self.worlds.len() as u32);
        candidates.push(handle);
        self.worlds.push(cols);
        self.normals.push(mat4_to_cols_array(&normal_matrix(world)));
        handle
    }

    pub fn world(&self, handle: TransformHandle) -> Option<&[f32; 16]> {
        self.worlds.get(handle.get() as usize)
    }

    pub fn count(&self) -> usize {
        self.worlds.len()
    }

    /// Key collisions between distinct matrices seen so far.
    pub fn collisions(&self) -> u64 {
        self.collisions
    }

    pub fn dedup_hits(&self) -> u64 {
        self.dedup_hits
    }

    /// Writes this frame's matrices into the current slot's buffers.
    pub fn ensure_frame_resources(&mut self) -> Result<(), GraphicsError> {
        self.world_buffer.write_elements(self.slot, &self.worlds)?;
        self.normal_buffer.write_elements(self.slot, &self.normals)?;
        Ok(())
    }

    pub fn worlds_srv(&self) -> ShaderVisibleIndex {
        self.world_buffer.srv_index(self.slot)
    }

    pub fn normals_srv(&self) -> ShaderVisibleIndex {
        self.normal_buffer.srv_index(self.slot)
    }
}

impl std::fmt::Debug for TransformUploader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformUploader")
            .field("slot", &self.slot)
            .field("count", &self.worlds.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;
    use crate::config::GraphicsConfig;
    use oxygen_core::math::{Vec3, mat4_from_translation};

    fn uploader() -> TransformUploader {
        let device =
            GraphicsDevice::new(Arc::new(HeadlessBackend::new()), GraphicsConfig::default()).unwrap();
        TransformUploader::new(device)
    }

    #[test]
    fn test_identical_matrices_share_handle() {
        let mut transforms = uploader();
        let m = mat4_from_translation(Vec3::new(1.0, 2.0, 3.0));
        let a = transforms.get_or_allocate(&m);
        assert_eq!(transforms.get_or_allocate(&m), a);
        assert_eq!(transforms.count(), 1);
    }

    #[test]
    fn test_key_collision_resolved_exactly() {
        let mut transforms = uploader();
        // Same diagonal, different translation.
        let a = transforms.get_or_allocate(&mat4_from_translation(Vec3::new(1.0, 0.0, 0.0)));
        let b = transforms.get_or_allocate(&mat4_from_translation(Vec3::new(2.0, 0.0, 0.0)));
        assert_ne!(a, b);
        assert_eq!(transforms.collisions(), 1);
    }

    #[test]
    fn test_frame_reset_and_upload() {
        let mut transforms = uploader();
        transforms.begin_frame(Slot::new(1));
        let h = transforms.get_or_allocate(&Mat4::identity());
        transforms.ensure_frame_resources().unwrap();
        assert!(transforms.worlds_srv().is_valid());
        assert_ne!(transforms.worlds_srv(), transforms.normals_srv());
        assert_eq!(transforms.world(h).unwrap()[0], 1.0);

        transforms.begin_frame(Slot::new(2));
        assert_eq!(transforms.count(), 0);
    }
}
