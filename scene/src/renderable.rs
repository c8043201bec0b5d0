//! Renderable component: geometry, LOD policy and per-submesh state.
//!
//! # LOD selection
//!
//! | Policy | Input | Rule |
//! |--------|-------|------|
//! | [`LodPolicy::Fixed`] | none | always the configured LOD |
//! | [`LodPolicy::Distance`] | [`NormalizedDistance`] | number of thresholds below the distance |
//! | [`LodPolicy::ScreenSpaceError`] | [`ScreenSpaceError`] | number of thresholds above the projected size |
//!
//! Both adaptive policies keep the current LOD while the input stays inside
//! the band `[t * (1 - h), t * (1 + h)]` around a threshold `t`, where `h` is
//! the hysteresis ratio.

use std::sync::{Arc, OnceLock};

use oxygen_core::math::{Aabb, BoundingSphere, Mat4};

use crate::asset::{GeometryAsset, MaterialAsset, Mesh};

/// Distance from the view to the bounds centre divided by the bounds radius.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct NormalizedDistance(pub f32);

/// Projected bounding-sphere radius in pixels.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct ScreenSpaceError(pub f32);

#[derive(Debug, Clone, PartialEq)]
pub struct FixedPolicy {
    pub lod: usize,
}

/// Thresholds in normalized distance, ascending.
#[derive(Debug, Clone, PartialEq)]
pub struct DistancePolicy {
    pub thresholds: Vec<f32>,
    pub hysteresis_ratio: f32,
}

impl DistancePolicy {
    pub fn new(thresholds: Vec<f32>, hysteresis_ratio: f32) -> Self {
        Self {
            thresholds,
            hysteresis_ratio: hysteresis_ratio.max(0.0),
        }
    }

    /// LOD for `distance` given the `current` one.
    pub fn select(&self, distance: NormalizedDistance, current: usize, lod_count: usize) -> usize {
        let d = distance.0;
        let h = self.hysteresis_ratio;
        let coarser = self.thresholds.iter().filter(|t| **t * (1.0 + h) < d).count();
        let finer = self.thresholds.iter().filter(|t| **t * (1.0 - h) <= d).count();
        pick(current, coarser, finer, lod_count)
    }
}

/// Thresholds in projected pixels, descending.
#[derive(Debug, Clone, PartialEq)]
pub struct ScreenSpaceErrorPolicy {
    pub thresholds: Vec<f32>,
    pub hysteresis_ratio: f32,
}

impl ScreenSpaceErrorPolicy {
    pub fn new(thresholds: Vec<f32>, hysteresis_ratio: f32) -> Self {
        Self {
            thresholds,
            hysteresis_ratio: hysteresis_ratio.max(0.0),
        }
    }

    pub fn select(&self, sse: ScreenSpaceError, current: usize, lod_count: usize) -> usize {
        let p = sse.0;
        let h = self.hysteresis_ratio;
        let coarser = self.thresholds.iter().filter(|t| **t * (1.0 - h) > p).count();
        let finer = self.thresholds.iter().filter(|t| **t * (1.0 + h) >= p).count();
        pick(current, coarser, finer, lod_count)
    }
}

fn pick(current: usize, coarser: usize, finer: usize, lod_count: usize) -> usize {
    let max = lod_count.saturating_sub(1);
    let current = current.min(max);
    let coarser = coarser.min(max);
    let finer = finer.min(max);
    if coarser > current {
        coarser
    } else if finer < current {
        finer
    } else {
        current
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LodPolicy {
    Fixed(FixedPolicy),
    Distance(DistancePolicy),
    ScreenSpaceError(ScreenSpaceErrorPolicy),
}

impl Default for LodPolicy {
    fn default() -> Self {
        Self::Fixed(FixedPolicy { lod: 0 })
    }
}

/// What an LOD decision is based on for one view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LodInput {
    Distance(NormalizedDistance),
    ScreenSpace(ScreenSpaceError),
}

impl LodPolicy {
    /// Pure selection; the renderable's cached LOD is not touched.
    pub fn select(&self, input: LodInput, current: usize, lod_count: usize) -> usize {
        match (self, input) {
            (Self::Fixed(p), _) => p.lod.min(lod_count.saturating_sub(1)),
            (Self::Distance(p), LodInput::Distance(d)) => p.select(d, current, lod_count),
            (Self::ScreenSpaceError(p), LodInput::ScreenSpace(s)) => p.select(s, current, lod_count),
            _ => current.min(lod_count.saturating_sub(1)),
        }
    }

    /// Which input this policy consumes, if any.
    pub fn wants_screen_space(&self) -> bool {
        matches!(self, Self::ScreenSpaceError(_))
    }
}

/// Per-submesh overrides.
#[derive(Debug, Clone, Default)]
pub struct SubmeshState {
    pub visible: bool,
    pub material_override: Option<Arc<MaterialAsset>>,
}

/// Geometry attached to a scene node.
#[derive(Debug)]
pub struct RenderableComponent {
    geometry: Arc<GeometryAsset>,
    policy: LodPolicy,
    active_lod: usize,
    submesh_state: Vec<Vec<SubmeshState>>,
    world_matrix: Mat4,
    world_sphere: BoundingSphere,
    submesh_aabbs: Vec<Vec<OnceLock<Aabb>>>,
}

impl RenderableComponent {
    pub fn new(geometry: Arc<GeometryAsset>) -> Self {
        let submesh_state = geometry
            .meshes()
            .iter()
            .map(|m| {
                vec![
                    SubmeshState {
                        visible: true,
                        material_override: None,
                    };
                    m.submeshes().len()
                ]
            })
            .collect();
        let submesh_aabbs = empty_aabb_cache(&geometry);
        let world_sphere = geometry.bounds().bounding_sphere();
        Self {
            geometry,
            policy: LodPolicy::default(),
            active_lod: 0,
            submesh_state,
            world_matrix: Mat4::identity(),
            world_sphere,
            submesh_aabbs,
        }
    }

    pub fn with_policy(mut self, policy: LodPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn geometry(&self) -> &Arc<GeometryAsset> {
        &self.geometry
    }

    pub fn policy(&self) -> &LodPolicy {
        &self.policy
    }

    pub fn set_policy(&mut self, policy: LodPolicy) {
        self.policy = policy;
    }

    pub fn lod_count(&self) -> usize {
        self.geometry.lod_count()
    }

    pub fn active_lod(&self) -> usize {
        self.active_lod
    }

    pub fn active_mesh(&self) -> Option<&Arc<Mesh>> {
        self.geometry.mesh(self.active_lod)
    }

    /// Selects and caches the LOD for a distance-driven policy.
    pub fn select_active_mesh_distance(&mut self, distance: NormalizedDistance) -> usize {
        self.active_lod = self
            .policy
            .select(LodInput::Distance(distance), self.active_lod, self.lod_count());
        self.active_lod
    }

    /// Selects and caches the LOD for a screen-space-error policy.
    pub fn select_active_mesh_sse(&mut self, sse: ScreenSpaceError) -> usize {
        self.active_lod = self
            .policy
            .select(LodInput::ScreenSpace(sse), self.active_lod, self.lod_count());
        self.active_lod
    }

    /// Updates world data after transform propagation.
    pub fn on_world_transform_updated(&mut self, world: &Mat4) {
        self.world_matrix = *world;
        self.world_sphere = self.geometry.bounds().bounding_sphere().transformed(world);
        self.submesh_aabbs = empty_aabb_cache(&self.geometry);
    }

    pub fn world_matrix(&self) -> &Mat4 {
        &self.world_matrix
    }

    pub fn world_bounding_sphere(&self) -> BoundingSphere {
        self.world_sphere
    }

    /// World-space bounds of one submesh, computed on first use.
    pub fn submesh_world_aabb(&self, lod: usize, submesh: usize) -> Option<Aabb> {
        let cell = self.submesh_aabbs.get(lod)?.get(submesh)?;
        let local = self.geometry.mesh(lod)?.submeshes().get(submesh)?.bounds;
        Some(*cell.get_or_init(|| local.transformed(&self.world_matrix)))
    }

    pub fn submesh_state(&self, lod: usize, submesh: usize) -> Option<&SubmeshState> {
        self.submesh_state.get(lod)?.get(submesh)
    }

    pub fn is_submesh_visible(&self, lod: usize, submesh: usize) -> bool {
        self.submesh_state(lod, submesh).is_some_and(|s| s.visible)
    }

    pub fn set_submesh_visible(&mut self, lod: usize, submesh: usize, visible: bool) -> bool {
        match self.submesh_state.get_mut(lod).and_then(|l| l.get_mut(submesh)) {
            Some(state) => {
                state.visible = visible;
                true
            }
            None => false,
        }
    }

    pub fn set_material_override(
        &mut self,
        lod: usize,
        submesh: usize,
        material: Option<Arc<MaterialAsset>>,
    ) -> bool {
        match self.submesh_state.get_mut(lod).and_then(|l| l.get_mut(submesh)) {
            Some(state) => {
                state.material_override = material;
                true
            }
            None => false,
        }
    }

    /// Override, then the submesh's own material, then the default material.
    pub fn effective_material(&self, lod: usize, submesh: usize) -> Arc<MaterialAsset> {
        if let Some(m) = self
            .submesh_state(lod, submesh)
            .and_then(|s| s.material_override.clone())
        {
            return m;
        }
        self.geometry
            .mesh(lod)
            .and_then(|mesh| mesh.submeshes().get(submesh))
            .and_then(|s| s.material.clone())
            .unwrap_or_else(MaterialAsset::default_material)
    }
}

fn empty_aabb_cache(geometry: &GeometryAsset) -> Vec<Vec<OnceLock<Aabb>>> {
    geometry
        .meshes()
        .iter()
        .map(|m| (0..m.submeshes().len()).map(|_| OnceLock::new()).collect())
        .collect()
}
