//! Renderer configuration.
//!
//! All structs deserialize with `#[serde(default)]` so a partial TOML table
//! only overrides what it names; unknown keys are rejected.

use serde::{Deserialize, Serialize};

use crate::descriptors::DEFAULT_LAYOUT;
use crate::error::GraphicsError;
use crate::queue::QueueExecution;
use crate::types::{DescriptorDomain, ViewType};

/// Ring-buffer staging settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StagingConfig {
    /// Bytes per frame partition.
    pub partition_size: u64,
    /// Allocation alignment; a power of two.
    pub alignment: u64,
    /// Growth multiplier applied by `ensure_capacity`.
    pub slack_factor: f32,
    /// Idle frames, with peak usage under a quarter of capacity, before shrinking.
    pub shrink_after_idle_frames: u32,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            partition_size: 4 * 1024 * 1024,
            alignment: 256,
            slack_factor: 1.5,
            shrink_after_idle_frames: 120,
        }
    }
}

impl StagingConfig {
    pub fn with_partition_size(mut self, size: u64) -> Self {
        self.partition_size = size;
        self
    }

    pub fn with_alignment(mut self, alignment: u64) -> Self {
        self.alignment = alignment;
        self
    }

    pub fn with_shrink_after_idle_frames(mut self, frames: u32) -> Self {
        self.shrink_after_idle_frames = frames;
        self
    }
}

/// Capacities of the global descriptor heap partitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DescriptorHeapConfig {
    pub srv: u32,
    pub uav: u32,
    pub cbv: u32,
    pub sampler: u32,
    pub cpu_srv: u32,
    pub rtv: u32,
    pub dsv: u32,
}

impl Default for DescriptorHeapConfig {
    fn default() -> Self {
        let capacity = |domain: DescriptorDomain| {
            DEFAULT_LAYOUT
                .iter()
                .find(|(d, _)| *d == domain)
                .map_or(0, |(_, c)| *c)
        };
        Self {
            srv: capacity(DescriptorDomain::SRV),
            uav: capacity(DescriptorDomain::UAV),
            cbv: capacity(DescriptorDomain::CBV),
            sampler: capacity(DescriptorDomain::shader_visible(ViewType::Sampler)),
            cpu_srv: capacity(DescriptorDomain::cpu_only(ViewType::Srv)),
            rtv: capacity(DescriptorDomain::cpu_only(ViewType::Rtv)),
            dsv: capacity(DescriptorDomain::cpu_only(ViewType::Dsv)),
        }
    }
}

impl DescriptorHeapConfig {
    /// Partition table in heap order.
    pub fn layout(&self) -> Vec<(DescriptorDomain, u32)> {
        vec![
            (DescriptorDomain::SRV, self.srv),
            (DescriptorDomain::UAV, self.uav),
            (DescriptorDomain::CBV, self.cbv),
            (DescriptorDomain::shader_visible(ViewType::Sampler), self.sampler),
            (DescriptorDomain::cpu_only(ViewType::Srv), self.cpu_srv),
            (DescriptorDomain::cpu_only(ViewType::Rtv), self.rtv),
            (DescriptorDomain::cpu_only(ViewType::Dsv), self.dsv),
        ]
    }
}

/// Device-level configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GraphicsConfig {
    pub queue_execution: QueueExecution,
    pub staging: StagingConfig,
    pub descriptor_heap: DescriptorHeapConfig,
}

impl GraphicsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_queue_execution(mut self, execution: QueueExecution) -> Self {
        self.queue_execution = execution;
        self
    }

    pub fn with_staging(mut self, staging: StagingConfig) -> Self {
        self.staging = staging;
        self
    }

    pub fn with_descriptor_heap(mut self, heap: DescriptorHeapConfig) -> Self {
        self.descriptor_heap = heap;
        self
    }

    /// Checks value ranges; errors name the offending key.
    pub fn validate(&self) -> Result<(), GraphicsError> {
        let invalid = |key: &str, why: &str| {
            Err(GraphicsError::InvalidArgument(format!("graphics.{key} {why}")))
        };
        if self.staging.partition_size == 0 {
            return invalid("staging.partition_size", "must be greater than zero");
        }
        if !self.staging.alignment.is_power_of_two() {
            return invalid("staging.alignment", "must be a power of two");
        }
        if self.staging.slack_factor.is_nan() || self.staging.slack_factor < 1.0 {
            return invalid("staging.slack_factor", "must be at least 1.0");
        }
        let heap = &self.descriptor_heap;
        for (key, value) in [
            ("srv", heap.srv),
            ("uav", heap.uav),
            ("cbv", heap.cbv),
            ("sampler", heap.sampler),
            ("cpu_srv", heap.cpu_srv),
            ("rtv", heap.rtv),
            ("dsv", heap.dsv),
        ] {
            if value == 0 {
                return invalid(&format!("descriptor_heap.{key}"), "must be greater than zero");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_heap_matches_layout() {
        assert_eq!(DescriptorHeapConfig::default().layout(), DEFAULT_LAYOUT.to_vec());
        assert!(GraphicsConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_toml_overrides() {
        let config: GraphicsConfig = toml::from_str(
            r#"
            queue_execution = "deferred"
            [staging]
            partition_size = 1024
            "#,
        )
        .unwrap();
        assert_eq!(config.queue_execution, QueueExecution::Deferred);
        assert_eq!(config.staging.partition_size, 1024);
        assert_eq!(config.staging.alignment, 256);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let result: Result<GraphicsConfig, _> = toml::from_str("bogus = 1");
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_names_key() {
        let config = GraphicsConfig::new().with_staging(StagingConfig::default().with_alignment(3));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("graphics.staging.alignment"));
    }
}
