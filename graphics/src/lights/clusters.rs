//! Cluster grid math shared by the light culling pass and its CPU
//! reference.
//!
//! The view frustum is split into screen tiles of `tile_size_px` pixels
//! and `cluster_dim_z` depth slices distributed logarithmically between
//! `z_near` and `z_far`:
//!
//! ```text
//! slice(z) = floor(log2(z / z_near) * dim_z / log2(z_far / z_near))
//! ```
//!
//! Cluster index is `x + dim_x * (y + dim_y * slice)`.

use serde::{Deserialize, Serialize};

use oxygen_core::math::{Mat4, Vec3};

use super::PositionalLightData;
use crate::error::GraphicsError;

/// Light culling settings, `[light_culling]` in the engine config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LightCullingConfig {
    pub tile_size_px: u32,
    pub cluster_dim_z: u32,
    pub z_near: f32,
    pub z_far: f32,
    pub max_lights_per_cluster: u32,
}

impl Default for LightCullingConfig {
    fn default() -> Self {
        Self {
            tile_size_px: 16,
            cluster_dim_z: 24,
            z_near: 0.1,
            z_far: 1000.0,
            max_lights_per_cluster: 64,
        }
    }
}

impl LightCullingConfig {
    pub fn with_tile_size(mut self, pixels: u32) -> Self {
        self.tile_size_px = pixels;
        self
    }

    pub fn with_depth_slices(mut self, slices: u32) -> Self {
        self.cluster_dim_z = slices;
        self
    }

    pub fn with_depth_range(mut self, z_near: f32, z_far: f32) -> Self {
        self.z_near = z_near;
        self.z_far = z_far;
        self
    }

    pub fn with_max_lights_per_cluster(mut self, count: u32) -> Self {
        self.max_lights_per_cluster = count;
        self
    }

    pub fn validate(&self) -> Result<(), GraphicsError> {
        let invalid = |key: &str, why: &str| {
            Err(GraphicsError::InvalidArgument(format!("light_culling.{key} {why}")))
        };
        if self.tile_size_px == 0 {
            return invalid("tile_size_px", "must be greater than zero");
        }
        if self.cluster_dim_z == 0 {
            return invalid("cluster_dim_z", "must be greater than zero");
        }
        if !(self.z_near > 0.0) {
            return invalid("z_near", "must be positive");
        }
        if !(self.z_far > self.z_near) {
            return invalid("z_far", "must be greater than z_near");
        }
        if self.max_lights_per_cluster == 0 {
            return invalid("max_lights_per_cluster", "must be greater than zero");
        }
        Ok(())
    }
}

/// Grid dimensions for one viewport.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterGrid {
    pub dim_x: u32,
    pub dim_y: u32,
    pub dim_z: u32,
    pub tile_size_px: u32,
    pub width: u32,
    pub height: u32,
    pub z_near: f32,
    pub z_far: f32,
    /// `dim_z / log2(z_far / z_near)`.
    pub z_scale: f32,
}

impl ClusterGrid {
    pub fn new(config: &LightCullingConfig, width: u32, height: u32) -> Result<Self, GraphicsError> {
        config.validate()?;
        if width == 0 || height == 0 {
            return Err(GraphicsError::InvalidArgument(format!(
                "cluster grid for empty viewport {width}x{height}"
            )));
        }
        let tile = config.tile_size_px;
        Ok(Self {
            dim_x: width.div_ceil(tile),
            dim_y: height.div_ceil(tile),
            dim_z: config.cluster_dim_z,
            tile_size_px: tile,
            width,
            height,
            z_near: config.z_near,
            z_far: config.z_far,
            z_scale: config.cluster_dim_z as f32 / (config.z_far / config.z_near).log2(),
        })
    }

    pub fn cluster_count(&self) -> u32 {
        self.dim_x * self.dim_y * self.dim_z
    }

    /// Depth slice of a positive view-space distance, clamped to the grid.
    pub fn slice_for_depth(&self, depth: f32) -> u32 {
        if depth <= self.z_near {
            return 0;
        }
        let slice = ((depth / self.z_near).log2() * self.z_scale).floor();
        (slice.max(0.0) as u32).min(self.dim_z - 1)
    }

    /// Near distance of `slice`; `slice == dim_z` yields `z_far`.
    pub fn slice_near(&self, slice: u32) -> f32 {
        self.z_near * (self.z_far / self.z_near).powf(slice as f32 / self.dim_z as f32)
    }

    pub fn cluster_index(&self, x: u32, y: u32, slice: u32) -> u32 {
        x + self.dim_x * (y + self.dim_y * slice)
    }

    /// View-space AABB of a cluster for a right-handed perspective
    /// projection (camera looks down `-Z`).
    pub fn cluster_bounds(&self, projection: &Mat4, x: u32, y: u32, slice: u32) -> (Vec3, Vec3) {
        let to_ndc_x = |px: u32| -1.0 + 2.0 * (px.min(self.width) as f32) / self.width as f32;
        let to_ndc_y = |py: u32| 1.0 - 2.0 * (py.min(self.height) as f32) / self.height as f32;
        let (x0, x1) = (to_ndc_x(x * self.tile_size_px), to_ndc_x((x + 1) * self.tile_size_px));
        let (y0, y1) = (to_ndc_y(y * self.tile_size_px), to_ndc_y((y + 1) * self.tile_size_px));
        let (sx, sy) = (projection[(0, 0)], projection[(1, 1)]);

        let mut min = Vec3::repeat(f32::MAX);
        let mut max = Vec3::repeat(f32::MIN);
        for depth in [self.slice_near(slice), self.slice_near(slice + 1)] {
            for (nx, ny) in [(x0, y0), (x1, y0), (x0, y1), (x1, y1)] {
                let p = Vec3::new(nx * depth / sx, ny * depth / sy, -depth);
                min = min.inf(&p);
                max = max.sup(&p);
            }
        }
        (min, max)
    }
}

/// Output of the cluster assignment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterLists {
    /// `(offset, count)` into `light_indices`, one per cluster.
    pub grid: Vec<[u32; 2]>,
    /// Light indices packed in cluster order.
    pub light_indices: Vec<u32>,
    /// Lights dropped because a cluster was full.
    pub overflowed: u32,
}

impl ClusterLists {
    pub fn lights_in(&self, cluster: u32) -> &[u32] {
        self.grid.get(cluster as usize).map_or(&[][..], |&[offset, count]| {
            &self.light_indices[offset as usize..(offset + count) as usize]
        })
    }
}

fn sphere_intersects_aabb(center: &Vec3, radius: f32, min: &Vec3, max: &Vec3) -> bool {
    let closest = center.sup(min).inf(max);
    (closest - center).norm_squared() <= radius * radius
}

/// CPU reference of the light culling compute shader.
///
/// Lights are tested as influence spheres against every cluster's
/// view-space AABB. Each cluster keeps at most `max_lights_per_cluster`
/// lights in ascending light index order.
pub fn build_cluster_lists(
    grid: &ClusterGrid,
    config: &LightCullingConfig,
    view: &Mat4,
    projection: &Mat4,
    lights: &[PositionalLightData],
) -> ClusterLists {
    let view_space: Vec<(Vec3, f32)> = lights
        .iter()
        .map(|l| {
            let center = view.transform_point(&Vec3::from(l.position).into()).coords;
            (center, l.range)
        })
        .collect();

    let mut lists = ClusterLists {
        grid: Vec::with_capacity(grid.cluster_count() as usize),
        ..ClusterLists::default()
    };
    for slice in 0..grid.dim_z {
        for y in 0..grid.dim_y {
            for x in 0..grid.dim_x {
                let (min, max) = grid.cluster_bounds(projection, x, y, slice);
                let offset = lists.light_indices.len() as u32;
                let mut count = 0;
                for (index, (center, radius)) in view_space.iter().enumerate() {
                    if !sphere_intersects_aabb(center, *radius, &min, &max) {
                        continue;
                    }
                    if count == config.max_lights_per_cluster {
                        lists.overflowed += 1;
                        continue;
                    }
                    lists.light_indices.push(index as u32);
                    count += 1;
                }
                lists.grid.push([offset, count]);
            }
        }
    }
    lists
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxygen_core::math::perspective_rh;

    fn light_at(position: [f32; 3], range: f32) -> PositionalLightData {
        PositionalLightData {
            position,
            range,
            ..bytemuck::Zeroable::zeroed()
        }
    }

    #[test]
    fn test_grid_dims_round_up() {
        let grid = ClusterGrid::new(&LightCullingConfig::default(), 1920, 1080).unwrap();
        assert_eq!((grid.dim_x, grid.dim_y, grid.dim_z), (120, 68, 24));
        assert_eq!(grid.cluster_count(), 120 * 68 * 24);
        assert!(ClusterGrid::new(&LightCullingConfig::default(), 0, 10).is_err());
        assert!(ClusterGrid::new(&LightCullingConfig::default().with_depth_range(1.0, 1.0), 8, 8).is_err());
    }

    #[test]
    fn test_slices_are_logarithmic() {
        let config = LightCullingConfig::default().with_depth_slices(4).with_depth_range(1.0, 16.0);
        let grid = ClusterGrid::new(&config, 16, 16).unwrap();
        assert_eq!(grid.slice_for_depth(0.5), 0);
        assert_eq!(grid.slice_for_depth(1.5), 0);
        assert_eq!(grid.slice_for_depth(2.5), 1);
        assert_eq!(grid.slice_for_depth(5.0), 2);
        assert_eq!(grid.slice_for_depth(9.0), 3);
        assert_eq!(grid.slice_for_depth(100.0), 3);
        assert!((grid.slice_near(2) - 4.0).abs() < 1e-4);
    }

    #[test]
    fn test_light_lands_in_its_clusters() {
        let config = LightCullingConfig::default()
            .with_tile_size(32)
            .with_depth_slices(4)
            .with_depth_range(1.0, 16.0)
            .with_max_lights_per_cluster(1);
        let grid = ClusterGrid::new(&config, 64, 64).unwrap();
        let projection = perspective_rh(std::f32::consts::FRAC_PI_2, 1.0, 1.0, 16.0);
        let lights = [light_at([0.0, 0.0, -3.0], 0.5), light_at([0.0, 0.0, -3.0], 0.5)];
        let lists = build_cluster_lists(&grid, &config, &Mat4::identity(), &projection, &lights);

        assert_eq!(lists.grid.len(), grid.cluster_count() as usize);
        let slice = grid.slice_for_depth(3.0);
        // The light sits on the screen center, touching all four tiles.
        for (x, y) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
            assert_eq!(lists.lights_in(grid.cluster_index(x, y, slice)), &[0]);
        }
        assert!(lists.lights_in(grid.cluster_index(0, 0, 3)).is_empty());
        assert!(lists.overflowed >= 4);
    }
}
