//! Local TRS with a cached world matrix.

use oxygen_core::math::{Mat4, Quat, Vec3, mat4_from_scale_rotation_translation, quat_identity};

/// Transform of a scene node.
///
/// Setters mark the transform dirty; the world matrix is recomputed during
/// transform propagation, which bumps [`version`](Self::version).
#[derive(Debug, Clone)]
pub struct TransformComponent {
    position: Vec3,
    rotation: Quat,
    scale: Vec3,
    dirty: bool,
    world: Mat4,
    version: u64,
}

impl Default for TransformComponent {
    fn default() -> Self {
        Self {
            position: Vec3::zeros(),
            rotation: quat_identity(),
            scale: Vec3::repeat(1.0),
            dirty: true,
            world: Mat4::identity(),
            version: 0,
        }
    }
}

impl TransformComponent {
    pub fn new(position: Vec3, rotation: Quat, scale: Vec3) -> Self {
        Self {
            position,
            rotation,
            scale,
            ..Self::default()
        }
    }

    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn rotation(&self) -> Quat {
        self.rotation
    }

    pub fn scale(&self) -> Vec3 {
        self.scale
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
        self.dirty = true;
    }

    pub fn set_rotation(&mut self, rotation: Quat) {
        self.rotation = rotation;
        self.dirty = true;
    }

    pub fn set_scale(&mut self, scale: Vec3) {
        self.scale = scale;
        self.dirty = true;
    }

    pub fn translate(&mut self, offset: Vec3) {
        self.position += offset;
        self.dirty = true;
    }

    pub fn local_matrix(&self) -> Mat4 {
        mat4_from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// World matrix as of the last propagation.
    pub fn world_matrix(&self) -> &Mat4 {
        &self.world
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Recomputes the world matrix from `parent_world`.
    pub(crate) fn update_world(&mut self, parent_world: &Mat4) -> &Mat4 {
        self.world = parent_world * self.local_matrix();
        self.dirty = false;
        self.version += 1;
        &self.world
    }
}
