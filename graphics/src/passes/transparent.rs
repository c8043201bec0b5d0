//! Blended transparent draws, back to front.

use std::sync::Arc;

use oxygen_core::compute::{Co, co};

use super::{KnownPass, PassId, PassPipeline, RenderPass, issue_draw_calls};
use crate::commands::CommandRecorder;
use crate::error::GraphicsError;
use crate::framebuffer::Framebuffer;
use crate::graph::RenderContext;
use crate::pipeline::{BlendMode, CullMode, DepthStencilDesc, GraphicsPipelineDesc, PipelineStateDesc, RasterizerDesc, ShaderRef};
use crate::types::ResourceState;

const SHADER: &str = "Passes/Forward/ForwardMesh.hlsl";

#[derive(Debug, Default)]
pub struct TransparentPass {
    pipeline: PassPipeline,
    framebuffer: Option<Framebuffer>,
}

impl TransparentPass {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KnownPass for TransparentPass {
    const ID: PassId = PassId::Transparent;
    type Outputs = u32;
}

impl RenderPass for TransparentPass {
    fn name(&self) -> &str {
        "TransparentPass"
    }

    fn create_pipeline_state_desc(&self, ctx: &RenderContext) -> Result<PipelineStateDesc, GraphicsError> {
        let targets = ctx.current_view()?.targets();
        Ok(GraphicsPipelineDesc::new("forward_transparent", ShaderRef::vertex(SHADER))
            .with_pixel(ShaderRef::pixel(SHADER))
            .with_rasterizer(RasterizerDesc {
                cull_mode: CullMode::None,
                ..RasterizerDesc::default()
            })
            .with_blend(BlendMode::AlphaBlend)
            .with_depth_stencil(DepthStencilDesc::read_only())
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
            let view = ctx.current_view()?;
            let framebuffer = self
                .framebuffer
                .take()
                .ok_or_else(|| GraphicsError::Internal("TransparentPass executed before prepare".into()))?;
            let prepared = view.prepared();
            if prepared.transparent_draws().is_empty() {
                return ctx.publish::<Self>(0);
            }
            recorder.bind_framebuffer(&framebuffer);
            self.pipeline.bind(recorder, ctx)?;
            let draws = issue_draw_calls(recorder, prepared.records(), prepared.transparent_draws());
            ctx.publish::<Self>(draws)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::binders::PassMask;
    use crate::commands::Command;
    use oxygen_core::compute::block_on;

    #[test]
    fn test_back_to_front_with_blending() {
        let (_backend, device) = device();
        let ctx = context(
            &device,
            &[
                (record(PassMask::TRANSPARENT, 6), 1.0),
                (record(PassMask::OPAQUE, 6), 5.0),
                (record(PassMask::TRANSPARENT, 6), 8.0),
                (record(PassMask::TRANSPARENT, 6), 3.0),
            ],
        );
        let mut pass = TransparentPass::new();
        let mut recorder = device.create_recorder("transparent");
        block_on(pass.prepare_resources(&ctx, &mut recorder)).unwrap();
        block_on(pass.execute(&ctx, &mut recorder)).unwrap();
        assert_eq!(ctx.pass_outputs::<TransparentPass>(), Some(3));

        let Some(PipelineStateDesc::Graphics(desc)) = pass.pipeline().built() else {
            panic!("graphics pipeline expected");
        };
        assert_eq!(desc.blend, BlendMode::AlphaBlend);
        assert!(!desc.depth_stencil.depth_write);

        let list = recorder.finish();
        let order: Vec<u32> = list
            .commands()
            .iter()
            .filter_map(|c| match c {
                Command::SetRootConstant { slot: 2, value } => Some(*value),
                _ => None,
            })
            .collect();
        assert_eq!(order, vec![2, 3, 0]);
    }

    #[test]
    fn test_no_transparent_draws_records_nothing() {
        let (_backend, device) = device();
        let ctx = context(&device, &[(record(PassMask::OPAQUE, 6), 5.0)]);
        let mut pass = TransparentPass::new();
        let mut recorder = device.create_recorder("transparent");
        block_on(pass.prepare_resources(&ctx, &mut recorder)).unwrap();
        block_on(pass.execute(&ctx, &mut recorder)).unwrap();
        assert_eq!(recorder.draw_call_count(), 0);
    }
}
