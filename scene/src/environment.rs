//! Scene-wide environment systems.
//!
//! A [`SceneEnvironment`] holds zero or one value of each environment system
//! type. Systems are plain data; renderers sample them every frame.

use oxygen_core::math::Vec3;

use crate::SceneError;
use crate::component::Composition;

/// Marker implemented by every environment system type.
pub trait EnvironmentSystem: Send + Sync + 'static {}

#[derive(Debug, Default)]
pub struct SceneEnvironment {
    systems: Composition,
}

impl SceneEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<T: EnvironmentSystem>(&mut self, system: T) -> Result<&mut T, SceneError> {
        self.systems.add(system)
    }

    /// Swaps the `Old` system for `new`; fails if `Old` is absent.
    pub fn replace<Old: EnvironmentSystem, New: EnvironmentSystem>(
        &mut self,
        new: New,
    ) -> Result<Old, SceneError> {
        self.systems.replace::<Old, New>(new)
    }

    /// Inserts or overwrites by type.
    pub fn set<T: EnvironmentSystem>(&mut self, system: T) -> Option<T> {
        self.systems.set(system)
    }

    pub fn remove<T: EnvironmentSystem>(&mut self) -> Option<T> {
        self.systems.remove::<T>()
    }

    pub fn get<T: EnvironmentSystem>(&self) -> Option<&T> {
        self.systems.get::<T>()
    }

    pub fn get_mut<T: EnvironmentSystem>(&mut self) -> Option<&mut T> {
        self.systems.get_mut::<T>()
    }

    pub fn has<T: EnvironmentSystem>(&self) -> bool {
        self.systems.has::<T>()
    }

    pub fn len(&self) -> usize {
        self.systems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }
}

// ============================================================================
// Systems
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkyAtmosphere {
    pub planet_radius_km: f32,
    pub atmosphere_height_km: f32,
    pub rayleigh_scattering: [f32; 3],
    pub mie_scattering: f32,
    pub sun_disk_enabled: bool,
}

impl Default for SkyAtmosphere {
    fn default() -> Self {
        Self {
            planet_radius_km: 6360.0,
            atmosphere_height_km: 80.0,
            rayleigh_scattering: [5.802e-3, 13.558e-3, 33.1e-3],
            mie_scattering: 3.996e-3,
            sun_disk_enabled: true,
        }
    }
}

impl EnvironmentSystem for SkyAtmosphere {}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkyLight {
    pub tint: [f32; 3],
    pub intensity: f32,
    pub diffuse_intensity: f32,
    pub specular_intensity: f32,
}

impl Default for SkyLight {
    fn default() -> Self {
        Self {
            tint: [1.0, 1.0, 1.0],
            intensity: 1.0,
            diffuse_intensity: 1.0,
            specular_intensity: 1.0,
        }
    }
}

impl EnvironmentSystem for SkyLight {}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fog {
    pub albedo: Vec3,
    pub density: f32,
    pub height_falloff: f32,
    pub start_distance: f32,
}

impl Default for Fog {
    fn default() -> Self {
        Self {
            albedo: Vec3::new(0.7, 0.75, 0.8),
            density: 0.01,
            height_falloff: 0.2,
            start_distance: 0.0,
        }
    }
}

impl EnvironmentSystem for Fog {}

/// Tone-mapping operator applied by the post pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ToneMapper {
    #[default]
    Aces,
    Reinhard,
    Filmic,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExposureMode {
    /// `manual_ev100` is used as is.
    Manual,
    #[default]
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AutoExposureSettings {
    pub min_log_luminance: f32,
    pub max_log_luminance: f32,
    /// Fractions in `[0, 1]` of the histogram kept for averaging.
    pub low_percentile: f32,
    pub high_percentile: f32,
    /// Adaptation speeds in EV per second.
    pub speed_up: f32,
    pub speed_down: f32,
    pub target_luminance: f32,
}

impl Default for AutoExposureSettings {
    fn default() -> Self {
        Self {
            min_log_luminance: -8.0,
            max_log_luminance: 4.0,
            low_percentile: 0.1,
            high_percentile: 0.9,
            speed_up: 3.0,
            speed_down: 1.0,
            target_luminance: 0.18,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PostProcessVolume {
    pub tone_mapper: ToneMapper,
    pub exposure_mode: ExposureMode,
    pub manual_ev100: f32,
    pub exposure_compensation_ev: f32,
    pub auto_exposure: AutoExposureSettings,
}

impl Default for PostProcessVolume {
    fn default() -> Self {
        Self {
            tone_mapper: ToneMapper::default(),
            exposure_mode: ExposureMode::default(),
            manual_ev100: 9.7,
            exposure_compensation_ev: 0.0,
            auto_exposure: AutoExposureSettings::default(),
        }
    }
}

impl EnvironmentSystem for PostProcessVolume {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_system_per_type() {
        let mut env = SceneEnvironment::new();
        env.add(SkyAtmosphere::default()).unwrap();
        assert!(env.add(SkyAtmosphere::default()).is_err());
        assert_eq!(env.len(), 1);
    }

    #[test]
    fn test_replace_by_type() {
        let mut env = SceneEnvironment::new();
        env.add(SkyLight::default()).unwrap();
        let old: SkyLight = env.replace::<SkyLight, Fog>(Fog::default()).unwrap();
        assert_eq!(old.intensity, 1.0);
        assert!(!env.has::<SkyLight>());
        assert!(env.has::<Fog>());
        assert!(env.replace::<SkyLight, SkyAtmosphere>(SkyAtmosphere::default()).is_err());
    }

    #[test]
    fn test_post_process_defaults() {
        let mut env = SceneEnvironment::new();
        env.set(PostProcessVolume::default());
        let volume = env.get_mut::<PostProcessVolume>().unwrap();
        volume.tone_mapper = ToneMapper::Reinhard;
        assert_eq!(env.get::<PostProcessVolume>().unwrap().tone_mapper, ToneMapper::Reinhard);
    }
}
