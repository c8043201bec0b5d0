//! Fullscreen HDR to display resolve.

use std::sync::Arc;

use oxygen_core::compute::{Co, co};
use oxygen_scene::ToneMapper;

use super::{AutoExposurePass, KnownPass, PassId, PassPipeline, RenderPass};
use crate::commands::CommandRecorder;
use crate::error::GraphicsError;
use crate::framebuffer::Framebuffer;
use crate::graph::RenderContext;
use crate::pipeline::{
    CullMode, DepthStencilDesc, GraphicsPipelineDesc, PipelineStateDesc, RasterizerDesc, ShaderRef, ShaderStage,
};
use crate::types::{ResourceState, ShaderVisibleIndex};

const VERTEX_SHADER: &str = "Passes/Post/FullScreenTriangle.hlsl";
const PIXEL_SHADER: &str = "Passes/Post/ToneMap.hlsl";

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ToneMapPassConfig {
    /// Replaces the view's post-process tone mapper when set.
    pub tone_mapper_override: Option<ToneMapper>,
}

impl ToneMapPassConfig {
    pub fn with_tone_mapper_override(mut self, tone_mapper: Option<ToneMapper>) -> Self {
        self.tone_mapper_override = tone_mapper;
        self
    }
}

fn entry_point(tone_mapper: ToneMapper) -> &'static str {
    match tone_mapper {
        ToneMapper::Aces => "PS_Aces",
        ToneMapper::Reinhard => "PS_Reinhard",
        ToneMapper::Filmic => "PS_Filmic",
        ToneMapper::None => "PS_None",
    }
}

/// Shader-side tone mapper selector, as stored in the scene constants.
pub(crate) fn tone_mapper_code(tone_mapper: ToneMapper) -> u32 {
    match tone_mapper {
        ToneMapper::Aces => 0,
        ToneMapper::Reinhard => 1,
        ToneMapper::Filmic => 2,
        ToneMapper::None => 3,
    }
}

/// Applies exposure and the tone mapper, writing the view's output target.
///
/// Views without an output target are skipped.
#[derive(Debug, Default)]
pub struct ToneMapPass {
    config: ToneMapPassConfig,
    pipeline: PassPipeline,
    framebuffer: Option<Framebuffer>,
}

impl ToneMapPass {
    pub fn new(config: ToneMapPassConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config_mut(&mut self) -> &mut ToneMapPassConfig {
        &mut self.config
    }

    fn tone_mapper(&self, ctx: &RenderContext) -> Result<ToneMapper, GraphicsError> {
        Ok(self
            .config
            .tone_mapper_override
            .unwrap_or(ctx.current_view()?.post_process().tone_mapper))
    }
}

impl KnownPass for ToneMapPass {
    const ID: PassId = PassId::ToneMap;
    type Outputs = ToneMapper;
}

impl RenderPass for ToneMapPass {
    fn name(&self) -> &str {
        "ToneMapPass"
    }

    fn create_pipeline_state_desc(&self, ctx: &RenderContext) -> Result<PipelineStateDesc, GraphicsError> {
        let view = ctx.current_view()?;
        let output = view
            .targets()
            .output
            .as_ref()
            .ok_or_else(|| GraphicsError::InvalidArgument(format!("view {} has no output target", view.id())))?;
        let tone_mapper = self.tone_mapper(ctx)?;
        Ok(GraphicsPipelineDesc::new("tone_map", ShaderRef::vertex(VERTEX_SHADER))
            .with_pixel(ShaderRef::new(ShaderStage::Pixel, PIXEL_SHADER, entry_point(tone_mapper)))
            .with_rasterizer(RasterizerDesc {
                cull_mode: CullMode::None,
                ..RasterizerDesc::default()
            })
            .with_depth_stencil(DepthStencilDesc::disabled())
            .with_color_format(output.format())
            .into())
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
            let view = ctx.current_view()?;
            let Some(output) = view.targets().output.as_ref() else {
                log::trace!("ToneMapPass: view {} has no output, skipped", view.id());
                self.framebuffer = None;
                return Ok(());
            };
            self.rebuild_pipeline_state_if_needed(ctx)?;
            let hdr = &view.targets().hdr_color;
            recorder.begin_tracking_resource_state(hdr, ResourceState::Present, true);
            recorder.require_resource_state(hdr, ResourceState::ShaderResource)?;
            let framebuffer = Framebuffer::new().with_color(Arc::clone(output));
            framebuffer.prepare_for_render(recorder, ResourceState::DepthRead)?;
            self.framebuffer = Some(framebuffer);
            Ok(())
        })
    }

    fn execute<'a>(
        &'a mut self,
        ctx: &'a RenderContext,
        recorder: &'a mut CommandRecorder,
    ) -> Co<'a, Result<(), GraphicsError>> {
        co(async move {
            let Some(framebuffer) = self.framebuffer.take() else {
                return Ok(());
            };
            let view = ctx.current_view()?;
            let tone_mapper = self.tone_mapper(ctx)?;
            let exposure_srv = ctx
                .pass_outputs::<AutoExposurePass>()
                .map_or(ShaderVisibleIndex::INVALID, |o| o.exposure_state_srv);
            ctx.update_scene_constants(|c| {
                c.tone_mapper = tone_mapper_code(tone_mapper);
                c.exposure_state_srv = exposure_srv.get();
                c.hdr_color_srv = view.targets().hdr_color_srv.get();
            })?;

            recorder.bind_framebuffer(&framebuffer);
            self.pipeline.bind(recorder, ctx)?;
            // Single triangle covering the viewport, generated from SV_VertexID.
            recorder.draw(3, 1, 0, 0);
            ctx.publish::<Self>(tone_mapper)
        })
    }
}
