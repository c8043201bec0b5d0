//! Light components attached to scene nodes.
//!
//! Lights take their position and direction from the owning node's world
//! matrix: position is the translation column, direction is the node's
//! forward axis (`-Z`).

use oxygen_core::math::{Mat4, Vec3, mat4_translation};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommonLightProperties {
    /// Linear RGB.
    pub color: [f32; 3],
    pub intensity: f32,
    pub affects_world: bool,
    pub casts_shadows: bool,
}

impl Default for CommonLightProperties {
    fn default() -> Self {
        Self {
            color: [1.0, 1.0, 1.0],
            intensity: 1.0,
            affects_world: true,
            casts_shadows: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectionalLight {
    /// Angular diameter in radians.
    pub angular_size: f32,
    pub is_sun: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointLight {
    pub range: f32,
    pub source_radius: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpotLight {
    pub range: f32,
    /// Half-angles in radians, `inner <= outer`.
    pub inner_cone_angle: f32,
    pub outer_cone_angle: f32,
}

/// Rectangular emitter, culled as a sphere of `range` around its centre.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AreaLight {
    pub width: f32,
    pub height: f32,
    pub range: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LightKind {
    Directional(DirectionalLight),
    Point(PointLight),
    Spot(SpotLight),
    Area(AreaLight),
}

impl LightKind {
    /// Directional lights are never culled.
    pub fn is_positional(&self) -> bool {
        !matches!(self, Self::Directional(_))
    }

    /// Influence radius for positional lights.
    pub fn range(&self) -> Option<f32> {
        match self {
            Self::Directional(_) => None,
            Self::Point(p) => Some(p.range),
            Self::Spot(s) => Some(s.range),
            Self::Area(a) => Some(a.range),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightComponent {
    pub common: CommonLightProperties,
    pub kind: LightKind,
}

impl LightComponent {
    pub fn directional(intensity: f32) -> Self {
        Self {
            common: CommonLightProperties {
                intensity,
                ..Default::default()
            },
            kind: LightKind::Directional(DirectionalLight {
                angular_size: 0.0093,
                is_sun: true,
            }),
        }
    }

    pub fn point(range: f32, intensity: f32) -> Self {
        Self {
            common: CommonLightProperties {
                intensity,
                ..Default::default()
            },
            kind: LightKind::Point(PointLight {
                range: range.max(0.0),
                source_radius: 0.0,
            }),
        }
    }

    pub fn spot(range: f32, inner_cone_angle: f32, outer_cone_angle: f32) -> Self {
        let outer = outer_cone_angle.clamp(0.0, std::f32::consts::FRAC_PI_2);
        Self {
            common: CommonLightProperties::default(),
            kind: LightKind::Spot(SpotLight {
                range: range.max(0.0),
                inner_cone_angle: inner_cone_angle.clamp(0.0, outer),
                outer_cone_angle: outer,
            }),
        }
    }

    pub fn area(width: f32, height: f32, range: f32) -> Self {
        Self {
            common: CommonLightProperties::default(),
            kind: LightKind::Area(AreaLight {
                width,
                height,
                range: range.max(0.0),
            }),
        }
    }

    pub fn with_color(mut self, color: [f32; 3]) -> Self {
        self.common.color = color;
        self
    }

    pub fn with_shadows(mut self, casts_shadows: bool) -> Self {
        self.common.casts_shadows = casts_shadows;
        self
    }
}

/// World-space position of a light owned by a node with this world matrix.
pub fn light_position(world: &Mat4) -> Vec3 {
    mat4_translation(world)
}

/// World-space forward (`-Z`) direction, normalized.
pub fn light_direction(world: &Mat4) -> Vec3 {
    let forward = world.transform_vector(&Vec3::new(0.0, 0.0, -1.0));
    let len = forward.norm();
    if len > f32::EPSILON {
        forward / len
    } else {
        Vec3::new(0.0, 0.0, -1.0)
    }
}
