//! View description used by scene preparation.

use oxygen_core::math::{Frustum, Mat4, Vec3, look_at_rh, perspective_rh};

/// Right-handed perspective camera with `[0, 1]` depth.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerspectiveCamera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    /// Vertical field of view in radians.
    pub fov_y: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for PerspectiveCamera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 5.0),
            target: Vec3::zeros(),
            up: Vec3::y(),
            fov_y: std::f32::consts::FRAC_PI_3,
            near: 0.1,
            far: 1000.0,
        }
    }
}

impl PerspectiveCamera {
    pub fn looking_at(position: Vec3, target: Vec3) -> Self {
        Self {
            position,
            target,
            ..Default::default()
        }
    }

    pub fn view_matrix(&self) -> Mat4 {
        look_at_rh(&self.position, &self.target, &self.up)
    }

    pub fn projection_matrix(&self, aspect: f32) -> Mat4 {
        perspective_rh(self.fov_y, aspect.max(f32::EPSILON), self.near, self.far)
    }

    pub fn view_projection(&self, aspect: f32) -> Mat4 {
        self.projection_matrix(aspect) * self.view_matrix()
    }

    pub fn frustum(&self, aspect: f32) -> Frustum {
        Frustum::from_view_projection(&self.view_projection(aspect))
    }

    /// Radius of a sphere at `distance` projected to pixels for a viewport of
    /// `viewport_height` pixels.
    pub fn projected_radius_px(&self, radius: f32, distance: f32, viewport_height: f32) -> f32 {
        if distance <= radius {
            return f32::MAX;
        }
        let cot = 1.0 / (self.fov_y * 0.5).tan();
        radius * cot / (distance * distance - radius * radius).sqrt() * viewport_height * 0.5
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxygen_core::math::BoundingSphere;

    #[test]
    fn test_frustum_contains_target() {
        let camera = PerspectiveCamera::default();
        let frustum = camera.frustum(16.0 / 9.0);
        assert!(frustum.intersects_sphere(&BoundingSphere::new(Vec3::zeros(), 1.0)));
        assert!(!frustum.intersects_sphere(&BoundingSphere::new(Vec3::new(0.0, 0.0, 50.0), 1.0)));
    }

    #[test]
    fn test_projected_radius_shrinks_with_distance() {
        let camera = PerspectiveCamera::default();
        let near = camera.projected_radius_px(1.0, 5.0, 1080.0);
        let far = camera.projected_radius_px(1.0, 50.0, 1080.0);
        assert!(near > far);
        assert_eq!(camera.projected_radius_px(1.0, 0.5, 1080.0), f32::MAX);
    }
}
