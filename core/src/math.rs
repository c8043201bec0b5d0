//! Math aliases and geometric helpers for rendering.
//!
//! All rendering math is `f32` and column-vector (`clip = proj * view * p`).
//! Projections use the `[0, 1]` depth range.

pub use nalgebra;

/// 2D vector (f32).
pub type Vec2 = nalgebra::Vector2<f32>;

/// 3D vector (f32).
pub type Vec3 = nalgebra::Vector3<f32>;

/// 4D vector (f32).
pub type Vec4 = nalgebra::Vector4<f32>;

/// 3x3 matrix (f32).
pub type Mat3 = nalgebra::Matrix3<f32>;

/// 4x4 matrix (f32).
pub type Mat4 = nalgebra::Matrix4<f32>;

/// Quaternion (f32). Construct with [`quat_from_xyzw`] or `Quaternion::new(w, x, y, z)`.
pub type Quat = nalgebra::Quaternion<f32>;

// ============================================================================
// Matrices
// ============================================================================

/// Builds a TRS matrix from scale, rotation and translation.
pub fn mat4_from_scale_rotation_translation(scale: Vec3, rotation: Quat, translation: Vec3) -> Mat4 {
    let r = nalgebra::UnitQuaternion::new_normalize(rotation).to_rotation_matrix();
    let rm = r.matrix();
    #[rustfmt::skip]
    let result = Mat4::new(
        rm[(0, 0)] * scale.x, rm[(0, 1)] * scale.y, rm[(0, 2)] * scale.z, translation.x,
        rm[(1, 0)] * scale.x, rm[(1, 1)] * scale.y, rm[(1, 2)] * scale.z, translation.y,
        rm[(2, 0)] * scale.x, rm[(2, 1)] * scale.y, rm[(2, 2)] * scale.z, translation.z,
        0.0,                  0.0,                  0.0,                  1.0,
    );
    result
}

/// Right-handed perspective projection, depth `[0, 1]`.
pub fn perspective_rh(yfov: f32, aspect: f32, znear: f32, zfar: f32) -> Mat4 {
    let f = 1.0 / (yfov * 0.5).tan();
    let nf = 1.0 / (znear - zfar);
    #[rustfmt::skip]
    let result = Mat4::new(
        f / aspect, 0.0, 0.0,       0.0,
        0.0,        f,   0.0,       0.0,
        0.0,        0.0, zfar * nf, znear * zfar * nf,
        0.0,        0.0, -1.0,      0.0,
    );
    result
}

/// Right-handed look-at view matrix.
pub fn look_at_rh(eye: &Vec3, target: &Vec3, up: &Vec3) -> Mat4 {
    let eye_point = nalgebra::Point3::from(*eye);
    let target_point = nalgebra::Point3::from(*target);
    nalgebra::Isometry3::look_at_rh(&eye_point, &target_point, up).to_homogeneous()
}

/// Translation-only matrix.
pub fn mat4_from_translation(t: Vec3) -> Mat4 {
    Mat4::new_translation(&t)
}

/// Returns the translation column of an affine matrix.
pub fn mat4_translation(m: &Mat4) -> Vec3 {
    Vec3::new(m[(0, 3)], m[(1, 3)], m[(2, 3)])
}

/// Largest axis scale of an affine matrix.
pub fn mat4_max_scale(m: &Mat4) -> f32 {
    let sx = Vec3::new(m[(0, 0)], m[(1, 0)], m[(2, 0)]).norm();
    let sy = Vec3::new(m[(0, 1)], m[(1, 1)], m[(2, 1)]).norm();
    let sz = Vec3::new(m[(0, 2)], m[(1, 2)], m[(2, 2)]).norm();
    sx.max(sy).max(sz)
}

/// Inverse-transpose of the upper 3x3 embedded in a 4x4, for normals.
///
/// Singular matrices yield identity.
pub fn normal_matrix(world: &Mat4) -> Mat4 {
    let upper: Mat3 = world.fixed_view::<3, 3>(0, 0).into_owned();
    let inv_t = upper.try_inverse().map(|m| m.transpose()).unwrap_or_else(Mat3::identity);
    inv_t.to_homogeneous()
}

/// Matrix as a column-major `[f32; 16]`.
pub fn mat4_to_cols_array(m: &Mat4) -> [f32; 16] {
    let mut out = [0.0; 16];
    out.copy_from_slice(m.as_slice());
    out
}

// ============================================================================
// Quaternions
// ============================================================================

/// Quaternion from x, y, z, w components.
pub fn quat_from_xyzw(x: f32, y: f32, z: f32, w: f32) -> Quat {
    nalgebra::Quaternion::new(w, x, y, z)
}

/// Identity rotation.
pub fn quat_identity() -> Quat {
    nalgebra::Quaternion::identity()
}

/// Rotation of `angle` radians around the Y axis.
pub fn quat_from_rotation_y(angle: f32) -> Quat {
    nalgebra::UnitQuaternion::from_axis_angle(&nalgebra::Vector3::y_axis(), angle).into_inner()
}

/// Rotates a vector by a quaternion.
pub fn quat_rotate_vec3(q: Quat, v: Vec3) -> Vec3 {
    nalgebra::UnitQuaternion::new_normalize(q) * v
}

// ============================================================================
// Bounding volumes
// ============================================================================

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Box that contains nothing; growing it by any point yields that point.
    pub fn empty() -> Self {
        Self {
            min: Vec3::repeat(f32::MAX),
            max: Vec3::repeat(f32::MIN),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    /// Smallest box containing all points.
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Vec3>) -> Self {
        let mut aabb = Self::empty();
        for p in points {
            aabb.grow(p);
        }
        aabb
    }

    pub fn grow(&mut self, p: &Vec3) {
        self.min = self.min.inf(p);
        self.max = self.max.sup(p);
    }

    pub fn merge(&self, other: &Aabb) -> Aabb {
        Aabb::new(self.min.inf(&other.min), self.max.sup(&other.max))
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    /// Transforms all eight corners and returns their bounds.
    pub fn transformed(&self, m: &Mat4) -> Aabb {
        if self.is_empty() {
            return *self;
        }
        let mut out = Aabb::empty();
        for i in 0..8 {
            let corner = Vec3::new(
                if i & 1 == 0 { self.min.x } else { self.max.x },
                if i & 2 == 0 { self.min.y } else { self.max.y },
                if i & 4 == 0 { self.min.z } else { self.max.z },
            );
            out.grow(&m.transform_point(&corner.into()).coords);
        }
        out
    }

    /// Sphere enclosing this box.
    pub fn bounding_sphere(&self) -> BoundingSphere {
        if self.is_empty() {
            return BoundingSphere::new(Vec3::zeros(), 0.0);
        }
        BoundingSphere::new(self.center(), self.extents().norm())
    }
}

/// Bounding sphere, packed as `vec4(center.xyz, radius)` on the GPU.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingSphere {
    pub center: Vec3,
    pub radius: f32,
}

impl BoundingSphere {
    pub fn new(center: Vec3, radius: f32) -> Self {
        Self { center, radius }
    }

    /// Transforms by an affine matrix; the radius scales by the largest axis scale.
    pub fn transformed(&self, m: &Mat4) -> BoundingSphere {
        let center = m.transform_point(&self.center.into()).coords;
        BoundingSphere::new(center, self.radius * mat4_max_scale(m))
    }

    pub fn to_vec4(&self) -> Vec4 {
        Vec4::new(self.center.x, self.center.y, self.center.z, self.radius)
    }
}

/// Six normalized planes `(n.xyz, d)` with inside meaning `dot(n, p) + d >= 0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frustum {
    pub planes: [Vec4; 6],
}

impl Frustum {
    /// Extracts planes from a view-projection matrix (`[0, 1]` depth).
    pub fn from_view_projection(m: &Mat4) -> Self {
        let r0 = m.row(0).transpose();
        let r1 = m.row(1).transpose();
        let r2 = m.row(2).transpose();
        let r3 = m.row(3).transpose();
        let mut planes = [r3 + r0, r3 - r0, r3 + r1, r3 - r1, r2, r3 - r2];
        for plane in &mut planes {
            let len = plane.xyz().norm();
            if len > f32::EPSILON {
                *plane /= len;
            }
        }
        Self { planes }
    }

    /// True if the sphere is at least partially inside.
    pub fn intersects_sphere(&self, sphere: &BoundingSphere) -> bool {
        self.planes
            .iter()
            .all(|p| p.xyz().dot(&sphere.center) + p.w >= -sphere.radius)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trs_identity_rotation() {
        let m = mat4_from_scale_rotation_translation(
            Vec3::new(2.0, 2.0, 2.0),
            quat_identity(),
            Vec3::new(1.0, 2.0, 3.0),
        );
        assert_eq!(mat4_translation(&m), Vec3::new(1.0, 2.0, 3.0));
        assert!((mat4_max_scale(&m) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_aabb_sphere() {
        let aabb = Aabb::new(Vec3::new(-1.0, -1.0, -1.0), Vec3::new(1.0, 1.0, 1.0));
        let sphere = aabb.bounding_sphere();
        assert_eq!(sphere.center, Vec3::zeros());
        assert!((sphere.radius - 3.0f32.sqrt()).abs() < 1e-6);
        assert!(Aabb::empty().is_empty());
    }

    #[test]
    fn test_frustum_culls_behind_camera() {
        let proj = perspective_rh(std::f32::consts::FRAC_PI_2, 1.0, 0.1, 100.0);
        let view = look_at_rh(&Vec3::zeros(), &Vec3::new(0.0, 0.0, -1.0), &Vec3::y());
        let frustum = Frustum::from_view_projection(&(proj * view));

        let ahead = BoundingSphere::new(Vec3::new(0.0, 0.0, -10.0), 1.0);
        let behind = BoundingSphere::new(Vec3::new(0.0, 0.0, 10.0), 1.0);
        let far_away = BoundingSphere::new(Vec3::new(0.0, 0.0, -500.0), 1.0);
        assert!(frustum.intersects_sphere(&ahead));
        assert!(!frustum.intersects_sphere(&behind));
        assert!(!frustum.intersects_sphere(&far_away));
    }

    #[test]
    fn test_normal_matrix_of_uniform_scale() {
        let m = mat4_from_scale_rotation_translation(
            Vec3::repeat(2.0),
            quat_identity(),
            Vec3::new(5.0, 0.0, 0.0),
        );
        let n = normal_matrix(&m);
        assert!((n[(0, 0)] - 0.5).abs() < 1e-6);
        assert_eq!(n[(0, 3)], 0.0);
    }
}
