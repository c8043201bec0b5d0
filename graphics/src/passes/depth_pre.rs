//! Depth-only rendering of the opaque draw list.

use std::sync::Arc;

use oxygen_core::compute::{Co, co};

use super::{KnownPass, PassId, PassPipeline, RenderPass, issue_draw_calls};
use crate::commands::CommandRecorder;
use crate::error::GraphicsError;
use crate::framebuffer::Framebuffer;
use crate::graph::RenderContext;
use crate::pipeline::{DepthStencilDesc, GraphicsPipelineDesc, PipelineStateDesc, ShaderRef};
use crate::resources::Texture;
use crate::types::ResourceState;

const SHADER: &str = "Passes/Depth/DepthPrePass.hlsl";

#[derive(Debug, Clone)]
pub struct DepthPrePassOutputs {
    pub depth: Arc<Texture>,
}

/// Fills the view's depth target so later passes shade each pixel once.
#[derive(Debug, Default)]
pub struct DepthPrePass {
    pipeline: PassPipeline,
    framebuffer: Option<Framebuffer>,
}

impl DepthPrePass {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KnownPass for DepthPrePass {
    const ID: PassId = PassId::DepthPre;
    type Outputs = DepthPrePassOutputs;
}

impl RenderPass for DepthPrePass {
    fn name(&self) -> &str {
        "DepthPrePass"
    }

    fn create_pipeline_state_desc(&self, ctx: &RenderContext) -> Result<PipelineStateDesc, GraphicsError> {
        let depth = &ctx.current_view()?.targets().depth;
        Ok(GraphicsPipelineDesc::new("depth_pre_pass", ShaderRef::vertex(SHADER))
            .with_depth_stencil(DepthStencilDesc::default())
            .with_depth_format(depth.format())
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
            let view = ctx.current_view()?;
            let framebuffer = Framebuffer::new().with_depth(Arc::clone(&view.targets().depth));
            framebuffer.prepare_for_render(recorder, ResourceState::DepthWrite)?;
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
                .ok_or_else(|| GraphicsError::Internal("DepthPrePass executed before prepare".into()))?;
            let depth = Arc::clone(&view.targets().depth);

            recorder.bind_framebuffer(&framebuffer);
            recorder.clear_depth(&depth, 1.0);
            self.pipeline.bind(recorder, ctx)?;
            let prepared = view.prepared();
            let draws = issue_draw_calls(recorder, prepared.records(), prepared.opaque_draws());
            log::trace!("DepthPrePass: {draws} draws for view {}", view.id());

            ctx.publish::<Self>(DepthPrePassOutputs { depth })
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
    fn test_draws_opaque_only_and_publishes_depth() {
        let (_backend, device) = device();
        let ctx = context(
            &device,
            &[
                (record(PassMask::OPAQUE, 36), 4.0),
                (record(PassMask::TRANSPARENT, 6), 1.0),
                (record(PassMask::OPAQUE, 12), 2.0),
            ],
        );
        let mut pass = DepthPrePass::new();
        let mut recorder = device.create_recorder("depth");
        block_on(pass.prepare_resources(&ctx, &mut recorder)).unwrap();
        assert_eq!(
            recorder.resource_state(&ctx.current_view().unwrap().targets().depth),
            Some(ResourceState::DepthWrite)
        );
        block_on(pass.execute(&ctx, &mut recorder)).unwrap();
        assert_eq!(recorder.draw_call_count(), 2);
        assert_eq!(pass.pipeline().rebuild_count(), 1);

        let outputs = ctx.pass_outputs::<DepthPrePass>().unwrap();
        assert!(Arc::ptr_eq(&outputs.depth, &ctx.current_view().unwrap().targets().depth));

        let list = recorder.finish();
        let draw_indices: Vec<u32> = list
            .commands()
            .iter()
            .filter_map(|c| match c {
                Command::SetRootConstant { slot: 2, value } => Some(*value),
                _ => None,
            })
            .collect();
        // Front to back.
        assert_eq!(draw_indices, vec![2, 0]);
        assert!(list.commands().iter().any(|c| matches!(c, Command::ClearDepth { .. })));
    }

    #[test]
    fn test_pipeline_is_not_rebuilt_for_same_inputs() {
        let (_backend, device) = device();
        let ctx = context(&device, &[]);
        let mut pass = DepthPrePass::new();
        for _ in 0..3 {
            let mut recorder = device.create_recorder("depth");
            block_on(pass.prepare_resources(&ctx, &mut recorder)).unwrap();
            block_on(pass.execute(&ctx, &mut recorder)).unwrap();
        }
        assert_eq!(pass.pipeline().rebuild_count(), 1);
    }
}
