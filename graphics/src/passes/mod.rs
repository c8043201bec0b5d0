//! Render passes.
//!
//! A pass is two coroutines over a shared [`RenderContext`]:
//!
//! - `prepare_resources` declares and transitions every resource the pass
//!   touches and rebuilds its pipeline description when its inputs
//!   changed. It never draws.
//! - `execute` assumes the states are in place, binds the pipeline, the
//!   bindless table and the scene constants, then issues its work.
//!
//! Passes keep no state across frames besides their configuration, their
//! last built pipeline description and the GPU buffers they own.
//!
//! | Pass | Kind | Reads | Writes |
//! |------|------|-------|--------|
//! | [`DepthPrePass`] | graphics | opaque draws | depth |
//! | [`LightCullingPass`] | compute | positional lights, depth | cluster grid, light index list |
//! | [`ShaderPass`] | graphics | opaque + masked draws, clusters | HDR color |
//! | [`TransparentPass`] | graphics | transparent draws | HDR color |
//! | [`AutoExposurePass`] | compute | HDR color | exposure state |
//! | [`ToneMapPass`] | graphics | HDR color, exposure state | output |

mod auto_exposure;
mod depth_pre;
pub mod exposure;
mod light_culling;
mod shader;
mod tone_map;
mod transparent;

pub use auto_exposure::{AutoExposureConfig, AutoExposureOutputs, AutoExposurePass};
pub use depth_pre::{DepthPrePass, DepthPrePassOutputs};
pub use light_culling::{LightCullingOutputs, LightCullingPass};
pub use shader::{ShaderPass, ShaderPassConfig, ShaderPassOutputs};
pub use tone_map::{ToneMapPass, ToneMapPassConfig};
pub use transparent::TransparentPass;

use std::collections::HashMap;
use std::sync::Arc;

use oxygen_core::compute::Co;
use oxygen_core::frame::MAX_FRAMES_IN_FLIGHT;

use crate::binders::{DrawMetadata, ViewId};
use crate::commands::CommandRecorder;
use crate::error::GraphicsError;
use crate::graph::RenderContext;
use crate::pipeline::PipelineStateDesc;
use crate::resources::Buffer;
use crate::types::{BufferDescriptor, BufferUsage};

/// Closed set of passes that publish outputs other passes read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PassId {
    DepthPre,
    LightCulling,
    Shader,
    Transparent,
    AutoExposure,
    ToneMap,
}

/// A pass type with a fixed slot in the context's output registry.
pub trait KnownPass: RenderPass {
    const ID: PassId;
    type Outputs: Clone + Send + 'static;
}

/// Last pipeline description a pass built.
#[derive(Debug, Clone, Default)]
pub struct PassPipeline {
    built: Option<PipelineStateDesc>,
    rebuilds: u32,
}

impl PassPipeline {
    pub fn built(&self) -> Option<&PipelineStateDesc> {
        self.built.as_ref()
    }

    pub fn rebuild_count(&self) -> u32 {
        self.rebuilds
    }

    fn rebuild(&mut self, desc: PipelineStateDesc) {
        self.built = Some(desc);
        self.rebuilds += 1;
    }

    /// Binds the built pipeline and the shared root arguments.
    pub fn bind(
        &self,
        recorder: &mut CommandRecorder,
        ctx: &RenderContext,
    ) -> Result<u64, GraphicsError> {
        self.bind_with_constants(recorder, ctx.current_view()?.constants_buffer(), 0)
    }

    /// Like [`bind`](Self::bind) with pass-specific constants at root slot 1.
    pub fn bind_with_constants(
        &self,
        recorder: &mut CommandRecorder,
        constants: &Arc<Buffer>,
        offset: u64,
    ) -> Result<u64, GraphicsError> {
        let desc = self
            .built
            .as_ref()
            .ok_or_else(|| GraphicsError::Internal("pass executed before its pipeline was built".into()))?;
        let hash = recorder.set_pipeline_state(desc);
        recorder.set_bindless_table();
        recorder.set_scene_constants(constants, offset);
        Ok(hash)
    }
}

/// Per-view constants written once per frame, one slice per frame slot.
///
/// A slot's slice is only rewritten after the fence of the frame that last
/// used it has completed.
#[derive(Debug)]
pub(crate) struct PassConstantsRing {
    label: &'static str,
    buffers: HashMap<ViewId, Arc<Buffer>>,
}

impl PassConstantsRing {
    pub(crate) const STRIDE: u64 = 256;

    pub(crate) fn new(label: &'static str) -> Self {
        Self {
            label,
            buffers: HashMap::new(),
        }
    }

    /// Writes `value` into the current slot's slice of the current view's
    /// buffer and returns the buffer and offset to bind.
    pub(crate) fn write<T: bytemuck::Pod>(
        &mut self,
        ctx: &RenderContext,
        value: &T,
    ) -> Result<(Arc<Buffer>, u64), GraphicsError> {
        debug_assert!(std::mem::size_of::<T>() as u64 <= Self::STRIDE);
        let view = ctx.current_view()?.id();
        let buffer = match self.buffers.get(&view) {
            Some(buffer) => Arc::clone(buffer),
            None => {
                let buffer = ctx.device().create_buffer(
                    &BufferDescriptor::upload(Self::STRIDE * MAX_FRAMES_IN_FLIGHT as u64, BufferUsage::CONSTANT)
                        .with_label(format!("{}[{view}]", self.label)),
                )?;
                self.buffers.insert(view, Arc::clone(&buffer));
                buffer
            }
        };
        let offset = ctx.frame().slot.index() as u64 * Self::STRIDE;
        buffer.write(offset, bytemuck::bytes_of(value))?;
        Ok((buffer, offset))
    }
}

/// One stage of the render graph.
pub trait RenderPass: Send {
    fn name(&self) -> &str;

    fn validate_config(&self) -> Result<(), GraphicsError> {
        Ok(())
    }

    /// Pipeline description for the current inputs.
    fn create_pipeline_state_desc(&self, ctx: &RenderContext) -> Result<PipelineStateDesc, GraphicsError>;

    fn pipeline(&self) -> &PassPipeline;

    fn pipeline_mut(&mut self) -> &mut PassPipeline;

    /// True when nothing was built yet or the inputs produce a different
    /// description than the last one built.
    fn need_rebuild_pipeline_state(&self, ctx: &RenderContext) -> bool {
        match (self.pipeline().built(), self.create_pipeline_state_desc(ctx)) {
            (Some(built), Ok(desc)) => *built != desc,
            _ => true,
        }
    }

    /// Rebuilds the pipeline description if needed. Returns whether it did.
    fn rebuild_pipeline_state_if_needed(&mut self, ctx: &RenderContext) -> Result<bool, GraphicsError> {
        if !self.need_rebuild_pipeline_state(ctx) {
            return Ok(false);
        }
        let desc = self.create_pipeline_state_desc(ctx)?;
        log::debug!("{}: pipeline state rebuilt ({:#018x})", self.name(), desc.content_hash());
        self.pipeline_mut().rebuild(desc);
        Ok(true)
    }

    fn prepare_resources<'a>(
        &'a mut self,
        ctx: &'a RenderContext,
        recorder: &'a mut CommandRecorder,
    ) -> Co<'a, Result<(), GraphicsError>>;

    fn execute<'a>(
        &'a mut self,
        ctx: &'a RenderContext,
        recorder: &'a mut CommandRecorder,
    ) -> Co<'a, Result<(), GraphicsError>>;
}

/// Draws `order` one record at a time, selecting each with `draw_index`.
///
/// Geometry is pulled in the vertex shader, so every record is a
/// non-indexed draw of its vertex count. Returns the number of draws.
pub fn issue_draw_calls(recorder: &mut CommandRecorder, records: &[DrawMetadata], order: &[u32]) -> u32 {
    let mut issued = 0;
    for &draw_index in order {
        let Some(record) = records.get(draw_index as usize) else {
            log::warn!("issue_draw_calls: draw index {draw_index} out of {} records", records.len());
            continue;
        };
        let vertices = record.draw_vertex_count();
        if vertices == 0 || record.instance_count == 0 {
            continue;
        }
        recorder.set_draw_index(draw_index);
        recorder.draw(vertices, record.instance_count, 0, 0);
        issued += 1;
    }
    issued
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Headless device plus a context with one prepared view.

    use std::sync::Arc;

    use bytemuck::Zeroable;
    use oxygen_core::FrameIdentity;
    use oxygen_scene::{NodeHandle, PerspectiveCamera, PostProcessVolume};

    use crate::backend::HeadlessBackend;
    use crate::binders::{DrawMetadata, GeometryHandle, PassMask, ViewId};
    use crate::config::GraphicsConfig;
    use crate::device::GraphicsDevice;
    use crate::graph::{RenderContext, RenderView, SceneConstants, ViewTargets};
    use crate::prep::PreparedSceneFrame;
    use crate::types::{
        BufferDescriptor, BufferUsage, ResourceState, ShaderVisibleIndex, TextureDescriptor,
        TextureFormat, TextureUsage,
    };

    pub fn device() -> (Arc<HeadlessBackend>, Arc<GraphicsDevice>) {
        let backend = Arc::new(HeadlessBackend::new());
        let device = GraphicsDevice::new(backend.clone(), GraphicsConfig::default()).unwrap();
        (backend, device)
    }

    pub fn record(mask: PassMask, vertices: u32) -> DrawMetadata {
        DrawMetadata {
            is_indexed: 1,
            index_count: vertices,
            instance_count: 1,
            flags: mask.bits(),
            ..DrawMetadata::zeroed()
        }
    }

    pub fn context(device: &Arc<GraphicsDevice>, records: &[(DrawMetadata, f32)]) -> RenderContext {
        let hdr = device
            .create_texture(
                &TextureDescriptor::new_2d(
                    64,
                    32,
                    TextureFormat::Rgba16Float,
                    TextureUsage::RENDER_TARGET | TextureUsage::SHADER_RESOURCE,
                )
                .with_label("hdr")
                .with_initial_state(ResourceState::RenderTarget),
            )
            .unwrap();
        let depth = device
            .create_texture(
                &TextureDescriptor::new_2d(
                    64,
                    32,
                    TextureFormat::Depth32Float,
                    TextureUsage::DEPTH_STENCIL | TextureUsage::SHADER_RESOURCE,
                )
                .with_label("depth"),
            )
            .unwrap();
        let output = device
            .create_texture(
                &TextureDescriptor::new_2d(64, 32, TextureFormat::Rgba8Unorm, TextureUsage::RENDER_TARGET)
                    .with_label("output"),
            )
            .unwrap();
        let constants = device
            .create_buffer(&BufferDescriptor::upload(
                SceneConstants::ALIGNED_SIZE,
                BufferUsage::CONSTANT,
            ))
            .unwrap();

        let mut prepared = PreparedSceneFrame::new(ViewId::new(0));
        for (record, depth) in records {
            prepared.push(*record, *depth, NodeHandle::default(), GeometryHandle::new(0));
        }
        prepared.sort_partitions();

        let mut frame = FrameIdentity::initial(3);
        frame.advance();
        let mut ctx = RenderContext::new(device.clone(), frame);
        ctx.begin_frame(frame, 1.0 / 60.0);
        ctx.add_view(RenderView::new(
            PerspectiveCamera::default(),
            ViewTargets {
                hdr_color: hdr,
                hdr_color_srv: ShaderVisibleIndex::INVALID,
                depth,
                output: Some(output),
            },
            PostProcessVolume::default(),
            prepared,
            SceneConstants::default(),
            constants,
        ))
        .unwrap();
        ctx.set_current_view(ViewId::new(0)).unwrap();
        ctx
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::binders::PassMask;
    use crate::commands::Command;

    #[test]
    fn test_issue_draw_calls_sets_draw_index() {
        let (_backend, device) = device();
        let records = [record(PassMask::OPAQUE, 36), record(PassMask::OPAQUE, 0), record(PassMask::OPAQUE, 6)];
        let mut recorder = device.create_recorder("draws");
        let issued = issue_draw_calls(&mut recorder, &records, &[2, 1, 0, 7]);
        assert_eq!(issued, 2);

        let list = recorder.finish();
        let indices: Vec<u32> = list
            .commands()
            .iter()
            .filter_map(|c| match c {
                Command::SetRootConstant { slot: 2, value } => Some(*value),
                _ => None,
            })
            .collect();
        assert_eq!(indices, vec![2, 0]);
        assert!(list.commands().iter().any(|c| matches!(c, Command::Draw { vertex_count: 6, .. })));
    }
}
