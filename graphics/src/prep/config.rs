//! Knobs of the collection and finalization stages.

use serde::{Deserialize, Serialize};

use crate::error::GraphicsError;

/// What the frame and view phases keep.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CollectionConfig {
    /// Cull renderables whose world bounding sphere is outside the frustum.
    pub frustum_culling: bool,
    /// Skip nodes and submeshes whose effective visibility is off.
    pub honor_visibility: bool,
    /// Offer light components to the light manager.
    pub collect_lights: bool,
    /// Geometry closer than this normalized distance uploads as critical.
    pub critical_distance: f32,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            frustum_culling: true,
            honor_visibility: true,
            collect_lights: true,
            critical_distance: 8.0,
        }
    }
}

impl CollectionConfig {
    pub fn with_frustum_culling(mut self, enabled: bool) -> Self {
        self.frustum_culling = enabled;
        self
    }

    pub fn with_honor_visibility(mut self, enabled: bool) -> Self {
        self.honor_visibility = enabled;
        self
    }

    pub fn with_collect_lights(mut self, enabled: bool) -> Self {
        self.collect_lights = enabled;
        self
    }

    pub fn with_critical_distance(mut self, distance: f32) -> Self {
        self.critical_distance = distance;
        self
    }

    pub fn validate(&self) -> Result<(), GraphicsError> {
        if !(self.critical_distance >= 0.0) {
            return Err(GraphicsError::InvalidArgument(format!(
                "collection.critical_distance must be >= 0, got {}",
                self.critical_distance
            )));
        }
        Ok(())
    }
}

/// What finalization does with the collected items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FinalizationConfig {
    /// Sort the pass partitions by view depth.
    pub sort_partitions: bool,
    /// Upload per-view draw metadata and publish its SRV.
    pub emit_draw_metadata: bool,
}

impl Default for FinalizationConfig {
    fn default() -> Self {
        Self {
            sort_partitions: true,
            emit_draw_metadata: true,
        }
    }
}

impl FinalizationConfig {
    pub fn with_sort_partitions(mut self, enabled: bool) -> Self {
        self.sort_partitions = enabled;
        self
    }

    pub fn with_emit_draw_metadata(mut self, enabled: bool) -> Self {
        self.emit_draw_metadata = enabled;
        self
    }
}
