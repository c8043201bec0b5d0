//! Forward shading of opaque and alpha-masked draws.

use std::sync::Arc;

use oxygen_core::compute::{Co, co};

use super::{DepthPrePass, KnownPass, LightCullingPass, PassId, PassPipeline, RenderPass, issue_draw_calls};
use crate::commands::CommandRecorder;
use crate::error::GraphicsError;
use crate::framebuffer::Framebuffer;
use crate::graph::RenderContext;
use crate::pipeline::{
    CompareOp, DepthStencilDesc, FillMode, GraphicsPipelineDesc, PipelineStateDesc, RasterizerDesc,
    ShaderRef,
};
use crate::types::ResourceState;

const SHADER: &str = "Passes/Forward/ForwardMesh.hlsl";

#[derive(Debug, Clone, PartialEq)]
pub struct ShaderPassConfig {
    /// Written to the first color attachment before drawing.
    pub clear_color: Option<[f32; 4]>,
    pub wireframe: bool,
}

impl Default for ShaderPassConfig {
    fn default() -> Self {
        Self {
            clear_color: Some([0.0, 0.0, 0.0, 1.0]),
            wireframe: false,
        }
    }
}

impl ShaderPassConfig {
    pub fn with_clear_color(mut self, color: Option<[f32; 4]>) -> Self {
        self.clear_color = color;
        self
    }

    pub fn with_wireframe(mut self, wireframe: bool) -> Self {
        self.wireframe = wireframe;
        self
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ShaderPassOutputs {
    pub draws: u32,
}

/// Shades opaque then masked draws into the HDR target.
///
/// With a depth pre-pass this frame the depth buffer is only tested
/// (`EQUAL`); otherwise the pass clears and writes depth itself.
#[derive(Debug, Default)]
pub struct ShaderPass {
    config: ShaderPassConfig,
    pipeline: PassPipeline,
    framebuffer: Option<Framebuffer>,
}

impl ShaderPass {
    pub fn new(config: ShaderPassConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &ShaderPassConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut ShaderPassConfig {
        &mut self.config
    }

    fn depth_ready(ctx: &RenderContext) -> bool {
        ctx.pass_outputs::<DepthPrePass>().is_some()
    }
}

impl KnownPass for ShaderPass {
    const ID: PassId = PassId::Shader;
    type Outputs = ShaderPassOutputs;
}

impl RenderPass for ShaderPass {
    fn name(&self) -> &str {
        "ShaderPass"
    }

    fn validate_config(&self) -> Result<(), GraphicsError> {
        if let Some(color) = self.config.clear_color
            && color.iter().any(|c| !c.is_finite())
        {
            return Err(GraphicsError::InvalidArgument(format!(
                "ShaderPass clear color {color:?} is not finite"
            )));
        }
        Ok(())
    }

    fn create_pipeline_state_desc(&self, ctx: &RenderContext) -> Result<PipelineStateDesc, GraphicsError> {
        let targets = ctx.current_view()?.targets();
        let depth_stencil = if Self::depth_ready(ctx) {
            DepthStencilDesc {
                compare: CompareOp::Equal,
                ..DepthStencilDesc::read_only()
            }
        } else {
            DepthStencilDesc::default()
        };
        let rasterizer = RasterizerDesc {
            fill_mode: if self.config.wireframe {
                FillMode::Wireframe
            } else {
                FillMode::Solid
            },
            ..RasterizerDesc::default()
        };
        Ok(GraphicsPipelineDesc::new("forward_opaque", ShaderRef::vertex(SHADER))
            .with_pixel(ShaderRef::pixel(SHADER))
            .with_rasterizer(rasterizer)
            .with_depth_stencil(depth_stencil)
            .with_color_format(targets.hdr_color.format())
            .with_depth_format(targets.depth.format())
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
            self.rebuild_pipeline_state_if_needed(ctx)?;
            let targets = ctx.current_view()?.targets();
            let framebuffer = Framebuffer::new()
                .with_color(Arc::clone(&targets.hdr_color))
                .with_depth(Arc::clone(&targets.depth));
            let depth_state = if Self::depth_ready(ctx) {
                ResourceState::DepthRead
            } else {
                ResourceState::DepthWrite
            };
            framebuffer.prepare_for_render(recorder, depth_state)?;
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
            let view = ctx.current_view()?;
            let framebuffer = self
                .framebuffer
                .take()
                .ok_or_else(|| GraphicsError::Internal("ShaderPass executed before prepare".into()))?;

            recorder.bind_framebuffer(&framebuffer);
            if let (Some(color), Some(target)) = (self.config.clear_color, framebuffer.color_attachments().first()) {
                recorder.clear_color(target, color);
            }
            if !Self::depth_ready(ctx) {
                recorder.clear_depth(&view.targets().depth, 1.0);
            }
            if ctx.pass_outputs::<LightCullingPass>().is_none() {
                log::trace!("ShaderPass: no light clusters for view {}", view.id());
            }

            self.pipeline.bind(recorder, ctx)?;
            let prepared = view.prepared();
            let mut draws = issue_draw_calls(recorder, prepared.records(), prepared.opaque_draws());
            draws += issue_draw_calls(recorder, prepared.records(), prepared.masked_draws());
            ctx.publish::<Self>(ShaderPassOutputs { draws })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::binders::PassMask;
    use crate::commands::Command;
    use crate::passes::DepthPrePassOutputs;
    use oxygen_core::compute::block_on;

    fn run(
        pass: &mut ShaderPass,
        ctx: &RenderContext,
        device: &Arc<crate::device::GraphicsDevice>,
    ) -> crate::commands::CommandList {
        let mut recorder = device.create_recorder("shader");
        block_on(pass.prepare_resources(ctx, &mut recorder)).unwrap();
        block_on(pass.execute(ctx, &mut recorder)).unwrap();
        recorder.finish()
    }

    #[test]
    fn test_clears_first_attachment_and_draws_opaque_then_masked() {
        let (_backend, device) = device();
        let ctx = context(
            &device,
            &[
                (record(PassMask::MASKED, 6), 1.0),
                (record(PassMask::OPAQUE, 36), 3.0),
                (record(PassMask::TRANSPARENT, 6), 2.0),
            ],
        );
        let mut pass = ShaderPass::new(ShaderPassConfig::default().with_clear_color(Some([0.1, 0.2, 0.3, 1.0])));
        let list = run(&mut pass, &ctx, &device);

        let clear = list.commands().iter().find_map(|c| match c {
            Command::ClearColor { color, .. } => Some(*color),
            _ => None,
        });
        assert_eq!(clear, Some([0.1, 0.2, 0.3, 1.0]));
        let draw_indices: Vec<u32> = list
            .commands()
            .iter()
            .filter_map(|c| match c {
                Command::SetRootConstant { slot: 2, value } => Some(*value),
                _ => None,
            })
            .collect();
        assert_eq!(draw_indices, vec![1, 0]);
        assert_eq!(ctx.pass_outputs::<ShaderPass>().unwrap().draws, 2);
    }

    #[test]
    fn test_depth_prepass_switches_pipeline_to_read_only_depth() {
        let (_backend, device) = device();
        let ctx = context(&device, &[(record(PassMask::OPAQUE, 3), 1.0)]);
        let mut pass = ShaderPass::new(ShaderPassConfig::default());
        run(&mut pass, &ctx, &device);
        assert!(!pass.need_rebuild_pipeline_state(&ctx));

        let depth = Arc::clone(&ctx.current_view().unwrap().targets().depth);
        ctx.publish::<DepthPrePass>(DepthPrePassOutputs { depth }).unwrap();
        assert!(pass.need_rebuild_pipeline_state(&ctx));
        let list = run(&mut pass, &ctx, &device);
        assert_eq!(pass.pipeline().rebuild_count(), 2);
        assert!(!list.commands().iter().any(|c| matches!(c, Command::ClearDepth { .. })));
    }

    #[test]
    fn test_rejects_non_finite_clear_color() {
        let pass = ShaderPass::new(ShaderPassConfig::default().with_clear_color(Some([f32::NAN, 0.0, 0.0, 1.0])));
        assert!(pass.validate_config().is_err());
    }
}
