//! Clustered light assignment on the GPU.
//!
//! The compute shader mirrors [`build_cluster_lists`](crate::lights::build_cluster_lists):
//! one thread group per cluster writes `uint2(offset, count)` into the
//! cluster grid and packs light indices into the index list.

use std::collections::HashMap;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use oxygen_core::compute::{Co, co};

use super::{DepthPrePass, KnownPass, PassConstantsRing, PassId, PassPipeline, RenderPass};
use crate::binders::ViewId;
use crate::commands::CommandRecorder;
use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::graph::RenderContext;
use crate::lights::{ClusterGrid, LightCullingConfig};
use crate::pipeline::{ComputePipelineDesc, PipelineStateDesc, ShaderRef};
use crate::resources::Buffer;
use crate::types::{
    BufferDescriptor, BufferUsage, DescriptorDomain, ResourceState, ShaderVisibleIndex, ViewDescription,
};

const SHADER: &str = "Passes/Lighting/LightCulling.hlsl";
const GRID_STRIDE: u32 = 8;
const INDEX_STRIDE: u32 = 4;

/// Root constants of the culling shader, bound in place of the scene
/// constants.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct LightCullingConstants {
    view: [f32; 16],
    projection: [f32; 16],
    positional_lights_srv: u32,
    positional_light_count: u32,
    cluster_grid_uav: u32,
    light_index_list_uav: u32,
    cluster_dims: [u32; 3],
    tile_size_px: u32,
    z_near: f32,
    z_far: f32,
    z_scale: f32,
    max_lights_per_cluster: u32,
    viewport: [f32; 2],
    _pad: [u32; 2],
}

static_assertions::const_assert_eq!(std::mem::size_of::<LightCullingConstants>(), 192);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightCullingOutputs {
    pub grid: ClusterGrid,
    pub cluster_grid_srv: ShaderVisibleIndex,
    pub light_index_list_srv: ShaderVisibleIndex,
}

/// One structured buffer with a fixed SRV and UAV slot.
#[derive(Debug)]
struct ClusterBuffer {
    buffer: Arc<Buffer>,
    stride: u32,
    elements: u64,
    srv: ShaderVisibleIndex,
    uav: ShaderVisibleIndex,
}

impl ClusterBuffer {
    fn create(device: &GraphicsDevice, label: &str, stride: u32, elements: u64) -> Result<Self, GraphicsError> {
        let buffer = Self::allocate(device, label, stride, elements)?;
        let registry = device.registry();
        registry.register(&buffer)?;
        let srv = registry.register_view(
            buffer.id(),
            registry.allocator().allocate(DescriptorDomain::SRV)?,
            ViewDescription::structured_srv(elements, stride),
        )?;
        let uav = registry.register_view(
            buffer.id(),
            registry.allocator().allocate(DescriptorDomain::UAV)?,
            ViewDescription::structured_uav(elements, stride),
        )?;
        Ok(Self {
            buffer,
            stride,
            elements,
            srv: srv.shader_visible_index,
            uav: uav.shader_visible_index,
        })
    }

    fn allocate(device: &GraphicsDevice, label: &str, stride: u32, elements: u64) -> Result<Arc<Buffer>, GraphicsError> {
        device.create_buffer(
            &BufferDescriptor::new(elements.max(1) * u64::from(stride), BufferUsage::STORAGE)
                .with_label(label.to_string()),
        )
    }

    /// Swaps in a buffer of `elements`, keeping both descriptor slots.
    fn resize(&mut self, device: &GraphicsDevice, elements: u64) -> Result<(), GraphicsError> {
        if elements == self.elements {
            return Ok(());
        }
        let label = self.buffer.label().unwrap_or("cluster_buffer").to_string();
        let buffer = Self::allocate(device, &label, self.stride, elements)?;
        let replaced = device
            .registry()
            .replace(self.buffer.id(), &buffer, |desc| Some(desc.with_element_count(elements)))?;
        device.reclaimer().defer_release_resource(replaced);
        log::debug!("LightCullingPass: {label} resized to {elements} elements");
        self.buffer = buffer;
        self.elements = elements;
        Ok(())
    }
}

#[derive(Debug)]
struct ViewClusters {
    grid: ClusterGrid,
    cluster_grid: ClusterBuffer,
    index_list: ClusterBuffer,
}

/// Builds the cluster grid and light index list for the current view.
///
/// Buffers are kept per view and resized in place when the viewport
/// changes, so their SRV indices stay stable across frames.
#[derive(Debug)]
pub struct LightCullingPass {
    config: LightCullingConfig,
    pipeline: PassPipeline,
    views: HashMap<ViewId, ViewClusters>,
    constants: PassConstantsRing,
}

impl Default for LightCullingPass {
    fn default() -> Self {
        Self::new(LightCullingConfig::default())
    }
}

impl LightCullingPass {
    pub fn new(config: LightCullingConfig) -> Self {
        Self {
            config,
            pipeline: PassPipeline::default(),
            views: HashMap::new(),
            constants: PassConstantsRing::new("light_culling_constants"),
        }
    }

    pub fn config(&self) -> &LightCullingConfig {
        &self.config
    }

    fn ensure_view_buffers(&mut self, ctx: &RenderContext) -> Result<&ViewClusters, GraphicsError> {
        let view = ctx.current_view()?;
        let (width, height) = view.extent();
        let grid = ClusterGrid::new(&self.config, width, height)?;
        let clusters = u64::from(grid.cluster_count());
        let indices = clusters * u64::from(self.config.max_lights_per_cluster);
        let device = ctx.device();

        if let Some(existing) = self.views.get_mut(&view.id()) {
            existing.cluster_grid.resize(device, clusters)?;
            existing.index_list.resize(device, indices)?;
            existing.grid = grid;
        } else {
            let prefix = format!("light_culling[{}]", view.id());
            let entry = ViewClusters {
                grid,
                cluster_grid: ClusterBuffer::create(device, &format!("{prefix}.cluster_grid"), GRID_STRIDE, clusters)?,
                index_list: ClusterBuffer::create(device, &format!("{prefix}.light_index_list"), INDEX_STRIDE, indices)?,
            };
            self.views.insert(view.id(), entry);
        }
        self.views
            .get(&view.id())
            .ok_or_else(|| GraphicsError::Internal("cluster buffers vanished".into()))
    }

    /// SRV slots of `view`'s buffers, once created.
    pub fn view_srvs(&self, view: ViewId) -> Option<(ShaderVisibleIndex, ShaderVisibleIndex)> {
        self.views
            .get(&view)
            .map(|v| (v.cluster_grid.srv, v.index_list.srv))
    }
}

impl KnownPass for LightCullingPass {
    const ID: PassId = PassId::LightCulling;
    type Outputs = LightCullingOutputs;
}

impl RenderPass for LightCullingPass {
    fn name(&self) -> &str {
        "LightCullingPass"
    }

    fn validate_config(&self) -> Result<(), GraphicsError> {
        self.config.validate()
    }

    fn create_pipeline_state_desc(&self, _ctx: &RenderContext) -> Result<PipelineStateDesc, GraphicsError> {
        Ok(ComputePipelineDesc::new("light_culling", ShaderRef::compute(SHADER)).into())
    }

    fn pipeline(&self) -> &PassPipeline {
        &self.pipeline
    }

    fn pipeline_mut(&mut self) -> &mut PassPipeline {
        &mut self.pipeline
    }

    fn prepare_resources<'a>(
        &'a mut self,
        ctx: &'a RenderContext,
        recorder: &'a mut CommandRecorder,
    ) -> Co<'a, Result<(), GraphicsError>> {
        co(async move {
            self.rebuild_pipeline_state_if_needed(ctx)?;
            let clusters = self.ensure_view_buffers(ctx)?;
            for buffer in [&clusters.cluster_grid.buffer, &clusters.index_list.buffer] {
                recorder.begin_tracking_resource_state(buffer, ResourceState::Common, false);
                recorder.require_resource_state(buffer, ResourceState::UnorderedAccess)?;
            }
            if let Some(depth) = ctx.pass_outputs::<DepthPrePass>() {
                recorder.begin_tracking_resource_state(&depth.depth, ResourceState::DepthWrite, true);
                recorder.require_resource_state(&depth.depth, ResourceState::ShaderResource)?;
            }
            recorder.flush_barriers();
            Ok(())
        })
    }

    fn execute<'a>(
        &'a mut self,
        ctx: &'a RenderContext,
        recorder: &'a mut CommandRecorder,
    ) -> Co<'a, Result<(), GraphicsError>> {
        co(async move {
            let view = ctx.current_view()?;
            let clusters = self
                .views
                .get(&view.id())
                .ok_or_else(|| GraphicsError::Internal("LightCullingPass executed before prepare".into()))?;
            let grid = clusters.grid;
            let outputs = LightCullingOutputs {
                grid,
                cluster_grid_srv: clusters.cluster_grid.srv,
                light_index_list_srv: clusters.index_list.srv,
            };
            let scene = view.scene_constants();
            let constants = LightCullingConstants {
                view: scene.view,
                projection: scene.projection,
                positional_lights_srv: scene.positional_lights_srv,
                positional_light_count: scene.positional_light_count,
                cluster_grid_uav: clusters.cluster_grid.uav.get(),
                light_index_list_uav: clusters.index_list.uav.get(),
                cluster_dims: [grid.dim_x, grid.dim_y, grid.dim_z],
                tile_size_px: grid.tile_size_px,
                z_near: grid.z_near,
                z_far: grid.z_far,
                z_scale: grid.z_scale,
                max_lights_per_cluster: self.config.max_lights_per_cluster,
                viewport: [grid.width as f32, grid.height as f32],
                _pad: [0; 2],
            };
            let (buffer, offset) = self.constants.write(ctx, &constants)?;

            // Shading passes read the cluster data through the scene constants.
            ctx.update_scene_constants(|c| {
                c.cluster_grid_srv = outputs.cluster_grid_srv.get();
                c.light_index_list_srv = outputs.light_index_list_srv.get();
                c.cluster_dims = [grid.dim_x, grid.dim_y, grid.dim_z];
                c.cluster_tile_size_px = grid.tile_size_px;
                c.cluster_z_scale = grid.z_scale;
                c.cluster_z_near = grid.z_near;
            })?;

            self.pipeline.bind_with_constants(recorder, &buffer, offset)?;
            recorder.dispatch(grid.dim_x, grid.dim_y, grid.dim_z);

            for buffer in [&clusters.cluster_grid.buffer, &clusters.index_list.buffer] {
                recorder.require_resource_state(buffer, ResourceState::ShaderResource)?;
            }
            recorder.flush_barriers();
            log::trace!(
                "LightCullingPass: {}x{}x{} clusters for view {}",
                grid.dim_x,
                grid.dim_y,
                grid.dim_z,
                view.id()
            );
            ctx.publish::<Self>(outputs)
        })
    }
}
