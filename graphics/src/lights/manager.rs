//! Per-frame light collection and GPU light arrays.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use oxygen_core::Slot;
use oxygen_core::math::{BoundingSphere, Mat4};
use oxygen_scene::light::{light_direction, light_position};
use oxygen_scene::{LightComponent, LightKind};

use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::types::ShaderVisibleIndex;
use crate::upload::TransientStructuredBuffer;

pub const LIGHT_FLAG_CASTS_SHADOWS: u32 = 1 << 0;
pub const LIGHT_FLAG_SUN: u32 = 1 << 1;

/// Positional light kinds as encoded in [`PositionalLightData::kind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PositionalKind {
    Point = 0,
    Spot = 1,
    Area = 2,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct DirectionalLightData {
    pub direction: [f32; 3],
    pub intensity: f32,
    pub color: [f32; 3],
    pub angular_size: f32,
    pub flags: u32,
    pub _pad: [u32; 3],
}

static_assertions::const_assert_eq!(std::mem::size_of::<DirectionalLightData>(), 48);

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PositionalLightData {
    pub position: [f32; 3],
    pub range: f32,
    pub color: [f32; 3],
    pub intensity: f32,
    pub direction: [f32; 3],
    pub source_radius: f32,
    /// Cosines of the spot cone angles; 1 and -1 for point lights.
    pub inner_cone_cos: f32,
    pub outer_cone_cos: f32,
    pub kind: u32,
    pub flags: u32,
    /// Area light extents; zero otherwise.
    pub extent: [f32; 2],
    pub _pad: [u32; 2],
}

static_assertions::const_assert_eq!(std::mem::size_of::<PositionalLightData>(), 80);

impl PositionalLightData {
    /// Sphere enclosing the light's influence.
    pub fn bounds(&self) -> BoundingSphere {
        BoundingSphere::new(self.position.into(), self.range)
    }
}

/// Collects lights offered by scene prep and publishes them as two
/// structured buffers.
///
/// Directional lights are never culled. Positional lights carry an
/// influence sphere used by the cluster assignment.
pub struct LightManager {
    directional: Vec<DirectionalLightData>,
    positional: Vec<PositionalLightData>,
    directional_buffer: TransientStructuredBuffer,
    positional_buffer: TransientStructuredBuffer,
    slot: Slot,
    skipped: u32,
}

impl LightManager {
    pub fn new(device: Arc<GraphicsDevice>) -> Self {
        Self {
            directional: Vec::new(),
            positional: Vec::new(),
            directional_buffer: TransientStructuredBuffer::new(
                device.clone(),
                "directional_lights",
                std::mem::size_of::<DirectionalLightData>() as u32,
            ),
            positional_buffer: TransientStructuredBuffer::new(
                device,
                "positional_lights",
                std::mem::size_of::<PositionalLightData>() as u32,
            ),
            slot: Slot::new(0),
            skipped: 0,
        }
    }

    pub fn begin_frame(&mut self, slot: Slot) {
        self.slot = slot;
        self.directional.clear();
        self.positional.clear();
        self.skipped = 0;
    }

    /// Records a light owned by a node with world matrix `world`.
    ///
    /// Lights that do not affect the world, or positional lights with zero
    /// range, are skipped.
    pub fn add_light(&mut self, light: &LightComponent, world: &Mat4) {
        let common = &light.common;
        if !common.affects_world || common.intensity <= 0.0 {
            self.skipped += 1;
            return;
        }
        let mut flags = 0;
        if common.casts_shadows {
            flags |= LIGHT_FLAG_CASTS_SHADOWS;
        }
        let position: [f32; 3] = light_position(world).into();
        let direction: [f32; 3] = light_direction(world).into();

        let (kind, range, source_radius, cones, extent) = match light.kind {
            LightKind::Directional(d) => {
                if d.is_sun {
                    flags |= LIGHT_FLAG_SUN;
                }
                self.directional.push(DirectionalLightData {
                    direction,
                    intensity: common.intensity,
                    color: common.color,
                    angular_size: d.angular_size,
                    flags,
                    _pad: [0; 3],
                });
                return;
            }
            LightKind::Point(p) => (PositionalKind::Point, p.range, p.source_radius, (1.0, -1.0), [0.0; 2]),
            LightKind::Spot(s) => (
                PositionalKind::Spot,
                s.range,
                0.0,
                (s.inner_cone_angle.cos(), s.outer_cone_angle.cos()),
                [0.0; 2],
            ),
            LightKind::Area(a) => (PositionalKind::Area, a.range, 0.0, (1.0, -1.0), [a.width, a.height]),
        };
        if range <= 0.0 {
            self.skipped += 1;
            return;
        }
        self.positional.push(PositionalLightData {
            position,
            range,
            color: common.color,
            intensity: common.intensity,
            direction,
            source_radius,
            inner_cone_cos: cones.0,
            outer_cone_cos: cones.1,
            kind: kind as u32,
            flags,
            extent,
            _pad: [0; 2],
        });
    }

    pub fn directional_lights(&self) -> &[DirectionalLightData] {
        &self.directional
    }

    pub fn positional_lights(&self) -> &[PositionalLightData] {
        &self.positional
    }

    /// Lights rejected since the frame began.
    pub fn skipped_count(&self) -> u32 {
        self.skipped
    }

    /// Writes both arrays into the current slot's buffers.
    pub fn ensure_frame_resources(&mut self) -> Result<(), GraphicsError> {
        self.directional_buffer.write_elements(self.slot, &self.directional)?;
        self.positional_buffer.write_elements(self.slot, &self.positional)?;
        log::trace!(
            "LightManager: {} directional, {} positional lights",
            self.directional.len(),
            self.positional.len()
        );
        Ok(())
    }

    pub fn directional_srv(&self) -> ShaderVisibleIndex {
        self.directional_buffer.srv_index(self.slot)
    }

    pub fn positional_srv(&self) -> ShaderVisibleIndex {
        self.positional_buffer.srv_index(self.slot)
    }

    pub fn bindings(&self) -> LightBindings {
        LightBindings {
            directional_srv: self.directional_srv(),
            directional_count: self.directional.len() as u32,
            positional_srv: self.positional_srv(),
            positional_count: self.positional.len() as u32,
        }
    }
}

/// Light array indices and counts for the scene constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LightBindings {
    pub directional_srv: ShaderVisibleIndex,
    pub directional_count: u32,
    pub positional_srv: ShaderVisibleIndex,
    pub positional_count: u32,
}

impl std::fmt::Debug for LightManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LightManager")
            .field("directional", &self.directional.len())
            .field("positional", &self.positional.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;
    use crate::config::GraphicsConfig;
    use oxygen_core::math::{Vec3, mat4_from_translation};

    fn manager() -> LightManager {
        let device =
            GraphicsDevice::new(Arc::new(HeadlessBackend::new()), GraphicsConfig::default()).unwrap();
        LightManager::new(device)
    }

    #[test]
    fn test_lights_are_split_by_kind() {
        let mut lights = manager();
        lights.begin_frame(Slot::new(0));
        let world = mat4_from_translation(Vec3::new(1.0, 2.0, 3.0));
        lights.add_light(&LightComponent::directional(3.0), &Mat4::identity());
        lights.add_light(&LightComponent::point(5.0, 10.0), &world);
        lights.add_light(&LightComponent::spot(8.0, 0.2, 0.4), &world);
        lights.add_light(&LightComponent::point(0.0, 10.0), &world);

        assert_eq!(lights.directional_lights().len(), 1);
        assert_eq!(lights.directional_lights()[0].flags & LIGHT_FLAG_SUN, LIGHT_FLAG_SUN);
        assert_eq!(lights.positional_lights().len(), 2);
        assert_eq!(lights.skipped_count(), 1);
        let point = lights.positional_lights()[0];
        assert_eq!(point.position, [1.0, 2.0, 3.0]);
        assert_eq!(point.bounds().radius, 5.0);
        assert_eq!(lights.positional_lights()[1].kind, PositionalKind::Spot as u32);

        lights.ensure_frame_resources().unwrap();
        assert!(lights.positional_srv().is_valid());
        assert_ne!(lights.positional_srv(), lights.directional_srv());
    }
}
