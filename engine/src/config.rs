//! Engine configuration loaded from TOML.
//!
//! ```toml
//! frames_in_flight = 2
//! max_frames = 600
//! shipping_build = true
//!
//! [graphics.staging]
//! partition_size = 8388608
//!
//! [light_culling]
//! cluster_dim_z = 24
//! ```

use std::path::Path;

use oxygen_graphics::{AutoExposureConfig, GraphicsConfig, GraphicsError, LightCullingConfig, RendererConfig};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Frames the CPU may record ahead of the GPU: 2 or 3.
    pub frames_in_flight: u32,
    /// Stop after this many frames. Runs until stopped when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_frames: Option<u64>,
    /// Worker threads for the parallel phase; 0 picks the core count.
    pub parallel_workers: usize,
    /// Applies the shipping console policy.
    pub shipping_build: bool,
    /// Lets local console sources run cheat commands in shipping builds.
    pub allow_cheats: bool,
    /// When false, a critical module failure skips the frame and the loop
    /// continues; when true, `run` returns the error.
    pub stop_on_critical_error: bool,
    /// Target CPU time per frame in milliseconds.
    pub frame_budget_ms: f32,
    /// Uses this delta instead of wall-clock time when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixed_delta_seconds: Option<f32>,
    /// Seed combined with the frame sequence each frame.
    pub random_seed: u64,
    /// Longest wait for a frame slot's previous submission.
    pub slot_wait_timeout_ms: u64,
    pub graphics: GraphicsConfig,
    pub light_culling: LightCullingConfig,
    pub auto_exposure: AutoExposureConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: oxygen_core::FRAMES_IN_FLIGHT,
            max_frames: None,
            parallel_workers: 0,
            shipping_build: false,
            allow_cheats: false,
            stop_on_critical_error: true,
            frame_budget_ms: 16.6,
            fixed_delta_seconds: None,
            random_seed: 0x6f78_7967_656e,
            slot_wait_timeout_ms: RendererConfig::default().slot_wait_timeout_ms,
            graphics: GraphicsConfig::default(),
            light_culling: LightCullingConfig::default(),
            auto_exposure: AutoExposureConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses and validates TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, EngineError> {
        let config: Self = toml::from_str(text).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Io(format!("failed to read {}: {e}", path.display())))?;
        let config = Self::from_toml_str(&text)?;
        log::info!("EngineConfig: loaded {}", path.display());
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, EngineError> {
        toml::to_string_pretty(self).map_err(|e| EngineError::Config(e.to_string()))
    }

    pub fn with_frames_in_flight(mut self, frames: u32) -> Self {
        self.frames_in_flight = frames;
        self
    }

    pub fn with_max_frames(mut self, frames: u64) -> Self {
        self.max_frames = Some(frames);
        self
    }

    pub fn with_parallel_workers(mut self, workers: usize) -> Self {
        self.parallel_workers = workers;
        self
    }

    pub fn with_shipping_build(mut self, shipping: bool) -> Self {
        self.shipping_build = shipping;
        self
    }

    pub fn with_allow_cheats(mut self, allow: bool) -> Self {
        self.allow_cheats = allow;
        self
    }

    pub fn with_stop_on_critical_error(mut self, stop: bool) -> Self {
        self.stop_on_critical_error = stop;
        self
    }

    pub fn with_frame_budget_ms(mut self, budget: f32) -> Self {
        self.frame_budget_ms = budget;
        self
    }

    pub fn with_fixed_delta_seconds(mut self, delta: f32) -> Self {
        self.fixed_delta_seconds = Some(delta);
        self
    }

    pub fn with_random_seed(mut self, seed: u64) -> Self {
        self.random_seed = seed;
        self
    }

    pub fn with_slot_wait_timeout_ms(mut self, ms: u64) -> Self {
        self.slot_wait_timeout_ms = ms;
        self
    }

    pub fn with_graphics(mut self, graphics: GraphicsConfig) -> Self {
        self.graphics = graphics;
        self
    }

    pub fn with_light_culling(mut self, config: LightCullingConfig) -> Self {
        self.light_culling = config;
        self
    }

    pub fn with_auto_exposure(mut self, config: AutoExposureConfig) -> Self {
        self.auto_exposure = config;
        self
    }

    /// Checks value ranges; errors name the offending key.
    pub fn validate(&self) -> Result<(), EngineError> {
        if !(2..=oxygen_core::frame::MAX_FRAMES_IN_FLIGHT).contains(&self.frames_in_flight) {
            return Err(EngineError::Config(format!(
                "frames_in_flight must be 2 or 3, got {}",
                self.frames_in_flight
            )));
        }
        if self.max_frames == Some(0) {
            return Err(EngineError::Config("max_frames must be greater than zero".to_string()));
        }
        if !(self.frame_budget_ms > 0.0) {
            return Err(EngineError::Config(format!(
                "frame_budget_ms must be positive, got {}",
                self.frame_budget_ms
            )));
        }
        if let Some(delta) = self.fixed_delta_seconds
            && !(delta > 0.0)
        {
            return Err(EngineError::Config(format!(
                "fixed_delta_seconds must be positive, got {delta}"
            )));
        }
        self.graphics.validate().map_err(config_error)?;
        self.renderer_config().validate().map_err(config_error)?;
        Ok(())
    }

    /// Renderer settings derived from this configuration.
    pub fn renderer_config(&self) -> RendererConfig {
        RendererConfig::default()
            .with_light_culling(self.light_culling.clone())
            .with_auto_exposure(self.auto_exposure.clone())
            .with_slot_wait_timeout_ms(self.slot_wait_timeout_ms)
    }
}

fn config_error(err: GraphicsError) -> EngineError {
    match err {
        GraphicsError::InvalidArgument(msg) => EngineError::Config(msg),
        other => EngineError::Graphics(other),
    }
}

#[cfg(test)]
mod tests {
    use oxygen_graphics::queue::QueueExecution;

    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.frames_in_flight, 3);
        assert!(config.max_frames.is_none());
    }

    #[test]
    fn test_parse_nested_sections() {
        let config = EngineConfig::from_toml_str(
            r#"
            frames_in_flight = 2
            max_frames = 10
            shipping_build = true

            [graphics]
            queue_execution = "deferred"

            [auto_exposure]
            enabled = false
            "#,
        )
        .unwrap();
        assert_eq!(config.frames_in_flight, 2);
        assert_eq!(config.max_frames, Some(10));
        assert!(config.shipping_build);
        assert_eq!(config.graphics.queue_execution, QueueExecution::Deferred);
        assert!(!config.renderer_config().auto_exposure.enabled);
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let err = EngineConfig::from_toml_str("frame_in_flight = 2").unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn test_invalid_values_name_the_key() {
        let err = EngineConfig::from_toml_str("frames_in_flight = 4").unwrap_err();
        assert!(err.to_string().contains("frames_in_flight"));

        let err = EngineConfig::from_toml_str("[auto_exposure]\nhistogram_bins = 3").unwrap_err();
        assert!(err.to_string().contains("auto_exposure.histogram_bins"));
    }

    #[test]
    fn test_toml_round_trip_keeps_values() {
        let config = EngineConfig::default().with_max_frames(5).with_shipping_build(true);
        let text = config.to_toml_string().unwrap();
        assert_eq!(EngineConfig::from_toml_str(&text).unwrap(), config);
    }
}
