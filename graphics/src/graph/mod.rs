//! Render graph: an ordered set of passes over a shared [`RenderContext`].
//!
//! Passes are added once and linked with explicit dependencies. The graph
//! orders them topologically (ties keep insertion order) and runs, for every
//! pass in order, `prepare_resources` then `execute` against the current
//! view. Passes disabled through [`RenderContext::set_pass_enabled`] are
//! skipped without touching their state.
//!
//! ```ignore
//! let mut graph = RenderGraph::new();
//! let depth = graph.add_pass(DepthPrePass::new());
//! let shading = graph.add_pass(ShaderPass::new(ShaderPassConfig::default()));
//! graph.add_dependency(shading, depth)?;
//! block_on(graph.execute(&ctx, &mut recorder))?;
//! ```

mod constants;
mod context;

pub use constants::SceneConstants;
pub use context::{RenderContext, RenderView, ViewTargets};

use oxygen_core::compute::{Co, co};

use crate::commands::CommandRecorder;
use crate::error::GraphicsError;
use crate::passes::RenderPass;

/// Handle to a pass in the render graph.
///
/// `PassHandle` is `Copy` and cheap to pass around. It is only valid within
/// the `RenderGraph` that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PassHandle(u32);

impl PassHandle {
    fn new(index: u32) -> Self {
        Self(index)
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Default)]
pub struct RenderGraph {
    passes: Vec<Box<dyn RenderPass>>,
    /// Dependency edges stored as (dependent, dependency) pairs.
    edges: Vec<(PassHandle, PassHandle)>,
    order: Vec<PassHandle>,
    dirty: bool,
}

impl RenderGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_pass(&mut self, pass: impl RenderPass + 'static) -> PassHandle {
        let handle = PassHandle::new(self.passes.len() as u32);
        log::debug!("RenderGraph: added pass '{}'", pass.name());
        self.passes.push(Box::new(pass));
        self.dirty = true;
        handle
    }

    fn check_handle(&self, handle: PassHandle) -> Result<(), GraphicsError> {
        if handle.index() < self.passes.len() {
            Ok(())
        } else {
            Err(GraphicsError::InvalidArgument(format!(
                "pass handle {} out of {} passes",
                handle.0,
                self.passes.len()
            )))
        }
    }

    /// `dependent` runs after `dependency`. Duplicate edges are ignored.
    pub fn add_dependency(&mut self, dependent: PassHandle, dependency: PassHandle) -> Result<(), GraphicsError> {
        self.check_handle(dependent)?;
        self.check_handle(dependency)?;
        if dependent == dependency {
            return Err(GraphicsError::InvalidArgument(format!(
                "pass '{}' cannot depend on itself",
                self.passes[dependent.index()].name()
            )));
        }
        let exists = self
            .edges
            .iter()
            .any(|&(d, dep)| d == dependent && dep == dependency);
        if !exists {
            self.edges.push((dependent, dependency));
            self.dirty = true;
        }
        Ok(())
    }

    pub fn dependencies(&self, handle: PassHandle) -> impl Iterator<Item = PassHandle> + '_ {
        self.edges
            .iter()
            .filter(move |&&(dependent, _)| dependent == handle)
            .map(|&(_, dependency)| dependency)
    }

    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    pub fn pass_name(&self, handle: PassHandle) -> Option<&str> {
        self.passes.get(handle.index()).map(|p| p.name())
    }

    pub fn find(&self, name: &str) -> Option<PassHandle> {
        self.passes
            .iter()
            .position(|p| p.name() == name)
            .map(|i| PassHandle::new(i as u32))
    }

    /// Mutable access to a pass, e.g. to change its configuration.
    pub fn pass_mut(&mut self, handle: PassHandle) -> Option<&mut (dyn RenderPass + 'static)> {
        self.passes.get_mut(handle.index()).map(|p| p.as_mut())
    }

    /// Orders the passes so every dependency runs first.
    ///
    /// Among passes whose dependencies are satisfied, the one added first
    /// runs first. A cycle is an `InvalidArgument` error.
    pub fn compile(&mut self) -> Result<&[PassHandle], GraphicsError> {
        if !self.dirty && self.order.len() == self.passes.len() {
            return Ok(&self.order);
        }
        let count = self.passes.len();
        let mut remaining = vec![0usize; count];
        for &(dependent, _) in &self.edges {
            remaining[dependent.index()] += 1;
        }
        let mut done = vec![false; count];
        let mut order = Vec::with_capacity(count);
        while order.len() < count {
            let Some(next) = (0..count).find(|&i| !done[i] && remaining[i] == 0) else {
                let stuck: Vec<&str> = (0..count)
                    .filter(|&i| !done[i])
                    .map(|i| self.passes[i].name())
                    .collect();
                return Err(GraphicsError::InvalidArgument(format!(
                    "render graph has a dependency cycle among {stuck:?}"
                )));
            };
            done[next] = true;
            let handle = PassHandle::new(next as u32);
            for &(dependent, dependency) in &self.edges {
                if dependency == handle {
                    remaining[dependent.index()] -= 1;
                }
            }
            order.push(handle);
        }
        self.order = order;
        self.dirty = false;
        Ok(&self.order)
    }

    /// Runs every enabled pass for the context's current view.
    ///
    /// Returns the number of passes that ran.
    pub fn execute<'a>(
        &'a mut self,
        ctx: &'a RenderContext,
        recorder: &'a mut CommandRecorder,
    ) -> Co<'a, Result<usize, GraphicsError>> {
        co(async move {
            let order = self.compile()?.to_vec();
            let mut ran = 0;
            for handle in order {
                let pass = &mut self.passes[handle.index()];
                if !ctx.is_pass_enabled(pass.name()) {
                    log::trace!("RenderGraph: '{}' disabled", pass.name());
                    continue;
                }
                pass.validate_config()?;
                let label = pass.name().to_string();
                recorder.begin_event(label.as_str());
                pass.prepare_resources(ctx, recorder).await?;
                pass.execute(ctx, recorder).await?;
                recorder.end_event();
                ran += 1;
            }
            Ok(ran)
        })
    }
}

impl std::fmt::Debug for RenderGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.passes.iter().map(|p| p.name()).collect();
        f.debug_struct("RenderGraph")
            .field("passes", &names)
            .field("edges", &self.edges)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::Command;
    use crate::passes::test_support::*;
    use crate::passes::{DepthPrePass, PassPipeline, ShaderPass, ShaderPassConfig, TransparentPass};
    use crate::pipeline::{ComputePipelineDesc, PipelineStateDesc, ShaderRef};
    use oxygen_core::compute::block_on;

    /// Pass that records a marker event.
    #[derive(Debug, Default)]
    struct Marker {
        name: &'static str,
        pipeline: PassPipeline,
    }

    impl Marker {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                pipeline: PassPipeline::default(),
            }
        }
    }

    impl RenderPass for Marker {
        fn name(&self) -> &str {
            self.name
        }

        fn create_pipeline_state_desc(&self, _ctx: &RenderContext) -> Result<PipelineStateDesc, GraphicsError> {
            Ok(ComputePipelineDesc::new(self.name, ShaderRef::compute("Test/Marker.hlsl")).into())
        }

        fn pipeline(&self) -> &PassPipeline {
            &self.pipeline
        }

        fn pipeline_mut(&mut self) -> &mut PassPipeline {
            &mut self.pipeline
        }

        fn prepare_resources<'a>(
            &'a mut self,
            _ctx: &'a RenderContext,
            _recorder: &'a mut CommandRecorder,
        ) -> Co<'a, Result<(), GraphicsError>> {
            co(async { Ok(()) })
        }

        fn execute<'a>(
            &'a mut self,
            _ctx: &'a RenderContext,
            recorder: &'a mut CommandRecorder,
        ) -> Co<'a, Result<(), GraphicsError>> {
            co(async move {
                recorder.begin_event(format!("marker:{}", self.name));
                recorder.end_event();
                Ok(())
            })
        }
    }

    fn names(graph: &mut RenderGraph) -> Vec<String> {
        let order = graph.compile().unwrap().to_vec();
        order
            .into_iter()
            .map(|h| graph.pass_name(h).unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_dependencies_order_passes() {
        let mut graph = RenderGraph::new();
        let tone = graph.add_pass(Marker::new("tone"));
        let shade = graph.add_pass(Marker::new("shade"));
        let depth = graph.add_pass(Marker::new("depth"));
        graph.add_dependency(shade, depth).unwrap();
        graph.add_dependency(tone, shade).unwrap();
        graph.add_dependency(tone, shade).unwrap();
        assert_eq!(graph.dependencies(tone).count(), 1);
        assert_eq!(names(&mut graph), ["depth", "shade", "tone"]);
    }

    #[test]
    fn test_independent_passes_keep_insertion_order() {
        let mut graph = RenderGraph::new();
        for name in ["a", "b", "c"] {
            graph.add_pass(Marker::new(name));
        }
        assert_eq!(names(&mut graph), ["a", "b", "c"]);
    }

    #[test]
    fn test_cycle_and_bad_handles_are_rejected() {
        let mut graph = RenderGraph::new();
        let a = graph.add_pass(Marker::new("a"));
        let b = graph.add_pass(Marker::new("b"));
        graph.add_dependency(a, b).unwrap();
        graph.add_dependency(b, a).unwrap();
        assert!(graph.compile().is_err());
        assert!(graph.add_dependency(a, a).is_err());
        assert!(graph.add_dependency(a, PassHandle::new(9)).is_err());
    }

    #[test]
    fn test_disabled_pass_is_skipped() {
        let (_backend, device) = device();
        let mut ctx = context(&device, &[]);
        ctx.set_pass_enabled("b", false);
        let mut graph = RenderGraph::new();
        for name in ["a", "b", "c"] {
            graph.add_pass(Marker::new(name));
        }
        let mut recorder = device.create_recorder("graph");
        let ran = block_on(graph.execute(&ctx, &mut recorder)).unwrap();
        assert_eq!(ran, 2);

        let list = recorder.finish();
        let markers: Vec<&str> = list
            .commands()
            .iter()
            .filter_map(|c| match c {
                Command::BeginEvent(label) => label.strip_prefix("marker:"),
                _ => None,
            })
            .collect();
        assert_eq!(markers, ["a", "c"]);
    }

    #[test]
    fn test_forward_passes_share_one_recorder() {
        let (_backend, device) = device();
        let ctx = context(
            &device,
            &[
                (record(crate::binders::PassMask::OPAQUE, 36), 2.0),
                (record(crate::binders::PassMask::TRANSPARENT, 6), 1.0),
            ],
        );
        let mut graph = RenderGraph::new();
        let depth = graph.add_pass(DepthPrePass::new());
        let shade = graph.add_pass(ShaderPass::new(ShaderPassConfig::default()));
        let transparent = graph.add_pass(TransparentPass::new());
        graph.add_dependency(shade, depth).unwrap();
        graph.add_dependency(transparent, shade).unwrap();

        let mut recorder = device.create_recorder("graph");
        assert_eq!(block_on(graph.execute(&ctx, &mut recorder)).unwrap(), 3);
        // Depth and shading each draw the opaque record; blending adds one.
        assert_eq!(recorder.draw_call_count(), 3);
        assert!(ctx.pass_outputs::<DepthPrePass>().is_some());
        assert_eq!(ctx.pass_outputs::<TransparentPass>(), Some(1));
    }
}
