//! Histogram-based automatic exposure.
//!
//! Two compute stages per view. The histogram stage bins the luminance of
//! the HDR target; the adaptation stage reduces the histogram and moves the
//! view's persistent [`ExposureState`] toward it. Both mirror the CPU
//! reference in [`exposure`](super::exposure).

use std::collections::HashMap;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use oxygen_core::compute::{Co, co};
use oxygen_scene::environment::ExposureMode;
use serde::{Deserialize, Serialize};

use super::exposure::ExposureState;
use super::{KnownPass, PassConstantsRing, PassId, PassPipeline, RenderPass};
use crate::binders::ViewId;
use crate::commands::CommandRecorder;
use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::graph::RenderContext;
use crate::pipeline::{ComputePipelineDesc, PipelineStateDesc, ShaderRef, ShaderStage};
use crate::resources::Buffer;
use crate::types::{
    BufferDescriptor, BufferUsage, DescriptorDomain, ResourceState, ShaderVisibleIndex, ViewDescription,
};

const SHADER: &str = "Passes/Post/AutoExposure.hlsl";

/// Auto-exposure settings, `[auto_exposure]` in the engine config.
///
/// Per-view tuning (percentiles, speeds, target) lives on the scene's
/// `PostProcessVolume`; this only shapes the GPU work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AutoExposureConfig {
    pub enabled: bool,
    pub histogram_bins: u32,
    pub workgroup_size: u32,
}

impl Default for AutoExposureConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            histogram_bins: 256,
            workgroup_size: 16,
        }
    }
}

impl AutoExposureConfig {
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_histogram_bins(mut self, bins: u32) -> Self {
        self.histogram_bins = bins;
        self
    }

    pub fn with_workgroup_size(mut self, size: u32) -> Self {
        self.workgroup_size = size;
        self
    }

    pub fn validate(&self) -> Result<(), GraphicsError> {
        if !(16..=1024).contains(&self.histogram_bins) || !self.histogram_bins.is_power_of_two() {
            return Err(GraphicsError::InvalidArgument(format!(
                "auto_exposure.histogram_bins must be a power of two in 16..=1024, got {}",
                self.histogram_bins
            )));
        }
        if !(1..=32).contains(&self.workgroup_size) {
            return Err(GraphicsError::InvalidArgument(format!(
                "auto_exposure.workgroup_size must be in 1..=32, got {}",
                self.workgroup_size
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AutoExposureOutputs {
    /// Invalid when the view uses manual exposure.
    pub exposure_state_srv: ShaderVisibleIndex,
    pub mode: ExposureMode,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct ExposureConstants {
    hdr_color_srv: u32,
    histogram_uav: u32,
    exposure_state_uav: u32,
    bins: u32,
    width: u32,
    height: u32,
    min_log_luminance: f32,
    log_luminance_range: f32,
    low_percentile: f32,
    high_percentile: f32,
    speed_up: f32,
    speed_down: f32,
    target_luminance: f32,
    compensation_ev: f32,
    delta_seconds: f32,
    _pad: u32,
}

static_assertions::const_assert_eq!(std::mem::size_of::<ExposureConstants>(), 64);

#[derive(Debug)]
struct ViewExposure {
    histogram: Arc<Buffer>,
    histogram_uav: ShaderVisibleIndex,
    /// Upload-heap zeros copied over the histogram before each frame.
    histogram_zeros: Arc<Buffer>,
    state: Arc<Buffer>,
    state_srv: ShaderVisibleIndex,
    state_uav: ShaderVisibleIndex,
    initialized: bool,
}

impl ViewExposure {
    fn create(device: &GraphicsDevice, view: ViewId, bins: u32) -> Result<Self, GraphicsError> {
        let registry = device.registry();
        let histogram_size = u64::from(bins) * 4;
        let histogram = device.create_buffer(
            &BufferDescriptor::new(histogram_size, BufferUsage::STORAGE | BufferUsage::COPY_DST)
                .with_label(format!("exposure_histogram[{view}]")),
        )?;
        registry.register(&histogram)?;
        let histogram_uav = registry.register_view(
            histogram.id(),
            registry.allocator().allocate(DescriptorDomain::UAV)?,
            ViewDescription::structured_uav(u64::from(bins), 4),
        )?;
        let histogram_zeros = device.create_buffer(
            &BufferDescriptor::upload(histogram_size, BufferUsage::empty())
                .with_label(format!("exposure_histogram_zeros[{view}]")),
        )?;
        histogram_zeros.write(0, &vec![0u8; histogram_size as usize])?;

        let state_size = std::mem::size_of::<ExposureState>() as u32;
        let state = device.create_buffer(
            &BufferDescriptor::new(u64::from(state_size), BufferUsage::STORAGE | BufferUsage::COPY_DST)
                .with_label(format!("exposure_state[{view}]")),
        )?;
        registry.register(&state)?;
        let state_srv = registry.register_view(
            state.id(),
            registry.allocator().allocate(DescriptorDomain::SRV)?,
            ViewDescription::structured_srv(1, state_size),
        )?;
        let state_uav = registry.register_view(
            state.id(),
            registry.allocator().allocate(DescriptorDomain::UAV)?,
            ViewDescription::structured_uav(1, state_size),
        )?;
        log::debug!("AutoExposurePass: created exposure resources for view {view} ({bins} bins)");
        Ok(Self {
            histogram,
            histogram_uav: histogram_uav.shader_visible_index,
            histogram_zeros,
            state,
            state_srv: state_srv.shader_visible_index,
            state_uav: state_uav.shader_visible_index,
            initialized: false,
        })
    }
}

/// Measures the HDR target and adapts the view's exposure over time.
#[derive(Debug)]
pub struct AutoExposurePass {
    config: AutoExposureConfig,
    pipeline: PassPipeline,
    views: HashMap<ViewId, ViewExposure>,
    constants: PassConstantsRing,
}

impl Default for AutoExposurePass {
    fn default() -> Self {
        Self::new(AutoExposureConfig::default())
    }
}

impl AutoExposurePass {
    pub fn new(config: AutoExposureConfig) -> Self {
        Self {
            config,
            pipeline: PassPipeline::default(),
            views: HashMap::new(),
            constants: PassConstantsRing::new("auto_exposure_constants"),
        }
    }

    pub fn config(&self) -> &AutoExposureConfig {
        &self.config
    }

    fn adaptation_desc() -> ComputePipelineDesc {
        ComputePipelineDesc::new(
            "auto_exposure_adapt",
            ShaderRef::new(ShaderStage::Compute, SHADER, "CS_Adapt"),
        )
    }

    fn mode(&self, ctx: &RenderContext) -> Result<ExposureMode, GraphicsError> {
        if !self.config.enabled {
            return Ok(ExposureMode::Manual);
        }
        Ok(ctx.current_view()?.post_process().exposure_mode)
    }
}

impl KnownPass for AutoExposurePass {
    const ID: PassId = PassId::AutoExposure;
    type Outputs = AutoExposureOutputs;
}

impl RenderPass for AutoExposurePass {
    fn name(&self) -> &str {
        "AutoExposurePass"
    }

    fn validate_config(&self) -> Result<(), GraphicsError> {
        self.config.validate()
    }

    fn create_pipeline_state_desc(&self, _ctx: &RenderContext) -> Result<PipelineStateDesc, GraphicsError> {
        Ok(ComputePipelineDesc::new(
            "auto_exposure_histogram",
            ShaderRef::new(ShaderStage::Compute, SHADER, "CS_Histogram"),
        )
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
            if self.mode(ctx)? == ExposureMode::Manual {
                return Ok(());
            }
            self.rebuild_pipeline_state_if_needed(ctx)?;
            let view = ctx.current_view()?;
            if !self.views.contains_key(&view.id()) {
                let created = ViewExposure::create(ctx.device(), view.id(), self.config.histogram_bins)?;
                self.views.insert(view.id(), created);
            }
            let hdr = &view.targets().hdr_color;
            recorder.begin_tracking_resource_state(hdr, ResourceState::Present, true);
            recorder.require_resource_state(hdr, ResourceState::ShaderResource)?;
            if let Some(exposure) = self.views.get(&view.id()) {
                recorder.begin_tracking_resource_state(&exposure.histogram, ResourceState::Common, false);
                recorder.require_resource_state(&exposure.histogram, ResourceState::CopyDest)?;
                recorder.begin_tracking_resource_state(&exposure.state, ResourceState::Common, false);
                let state_before = if exposure.initialized {
                    ResourceState::UnorderedAccess
                } else {
                    ResourceState::CopyDest
                };
                recorder.require_resource_state(&exposure.state, state_before)?;
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
            let volume = *view.post_process();
            if self.mode(ctx)? == ExposureMode::Manual {
                let manual = ExposureState::manual(&volume);
                ctx.update_scene_constants(|c| {
                    c.exposure_state_srv = ShaderVisibleIndex::INVALID.get();
                    c.manual_exposure = manual.exposure;
                })?;
                return ctx.publish::<Self>(AutoExposureOutputs {
                    exposure_state_srv: ShaderVisibleIndex::INVALID,
                    mode: ExposureMode::Manual,
                });
            }

            let exposure = self
                .views
                .get_mut(&view.id())
                .ok_or_else(|| GraphicsError::Internal("AutoExposurePass executed before prepare".into()))?;
            if !exposure.initialized {
                let initial = ExposureState::initial(&volume.auto_exposure);
                let staging = ctx.device().create_buffer(
                    &BufferDescriptor::upload(exposure.state.size(), BufferUsage::empty())
                        .with_label(format!("exposure_state_init[{}]", view.id())),
                )?;
                staging.write(0, bytemuck::bytes_of(&initial))?;
                recorder.copy_buffer(&staging, 0, &exposure.state, 0, exposure.state.size());
                ctx.device().reclaimer().defer_release(staging, "exposure_state_init");
                recorder.require_resource_state(&exposure.state, ResourceState::UnorderedAccess)?;
                exposure.initialized = true;
            }
            recorder.copy_buffer(
                &exposure.histogram_zeros,
                0,
                &exposure.histogram,
                0,
                exposure.histogram.size(),
            );
            recorder.require_resource_state(&exposure.histogram, ResourceState::UnorderedAccess)?;

            let (width, height) = view.extent();
            let settings = volume.auto_exposure;
            let constants = ExposureConstants {
                hdr_color_srv: view.targets().hdr_color_srv.get(),
                histogram_uav: exposure.histogram_uav.get(),
                exposure_state_uav: exposure.state_uav.get(),
                bins: self.config.histogram_bins,
                width,
                height,
                min_log_luminance: settings.min_log_luminance,
                log_luminance_range: settings.max_log_luminance - settings.min_log_luminance,
                low_percentile: settings.low_percentile,
                high_percentile: settings.high_percentile,
                speed_up: settings.speed_up,
                speed_down: settings.speed_down,
                target_luminance: settings.target_luminance,
                compensation_ev: volume.exposure_compensation_ev,
                delta_seconds: ctx.delta_seconds(),
                _pad: 0,
            };
            let (buffer, offset) = self.constants.write(ctx, &constants)?;

            let group = self.config.workgroup_size;
            self.pipeline.bind_with_constants(recorder, &buffer, offset)?;
            recorder.dispatch(width.div_ceil(group), height.div_ceil(group), 1);
            recorder.set_compute_pipeline(&Self::adaptation_desc());
            recorder.dispatch(1, 1, 1);

            let exposure = self
                .views
                .get(&view.id())
                .ok_or_else(|| GraphicsError::Internal("exposure resources vanished".into()))?;
            recorder.require_resource_state(&exposure.state, ResourceState::ShaderResource)?;
            recorder.flush_barriers();

            let srv = exposure.state_srv;
            ctx.update_scene_constants(|c| {
                c.exposure_state_srv = srv.get();
                c.hdr_color_srv = view.targets().hdr_color_srv.get();
            })?;
            ctx.publish::<Self>(AutoExposureOutputs {
                exposure_state_srv: srv,
                mode: ExposureMode::Auto,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::commands::Command;
    use oxygen_core::compute::block_on;

    fn run(pass: &mut AutoExposurePass, ctx: &RenderContext, device: &Arc<GraphicsDevice>) -> crate::commands::CommandList {
        let mut recorder = device.create_recorder("auto_exposure");
        block_on(pass.prepare_resources(ctx, &mut recorder)).unwrap();
        block_on(pass.execute(ctx, &mut recorder)).unwrap();
        recorder.finish()
    }

    fn dispatches(list: &crate::commands::CommandList) -> Vec<(u32, u32, u32)> {
        list.commands()
            .iter()
            .filter_map(|c| match c {
                Command::Dispatch { x, y, z } => Some((*x, *y, *z)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_histogram_then_adaptation() {
        let (_backend, device) = device();
        let ctx = context(&device, &[]);
        let mut pass = AutoExposurePass::default();
        let list = run(&mut pass, &ctx, &device);

        // 64x32 target in 16x16 groups.
        assert_eq!(dispatches(&list), vec![(4, 2, 1), (1, 1, 1)]);
        let outputs = ctx.pass_outputs::<AutoExposurePass>().unwrap();
        assert_eq!(outputs.mode, ExposureMode::Auto);
        assert!(outputs.exposure_state_srv.is_valid());
        assert_eq!(
            ctx.current_view().unwrap().scene_constants().exposure_state_srv,
            outputs.exposure_state_srv.get()
        );
    }

    #[test]
    fn test_state_is_initialized_once() {
        let (_backend, device) = device();
        let ctx = context(&device, &[]);
        let mut pass = AutoExposurePass::default();
        let copies = |list: &crate::commands::CommandList| {
            list.commands()
                .iter()
                .filter(|c| matches!(c, Command::CopyBuffer { .. }))
                .count()
        };
        // Initial state plus histogram clear, then only the clear.
        assert_eq!(copies(&run(&mut pass, &ctx, &device)), 2);
        assert_eq!(copies(&run(&mut pass, &ctx, &device)), 1);
    }

    #[test]
    fn test_disabled_pass_falls_back_to_manual_exposure() {
        let (_backend, device) = device();
        let ctx = context(&device, &[]);
        let mut pass = AutoExposurePass::new(AutoExposureConfig::default().with_enabled(false));
        let list = run(&mut pass, &ctx, &device);
        assert!(dispatches(&list).is_empty());

        let outputs = ctx.pass_outputs::<AutoExposurePass>().unwrap();
        assert_eq!(outputs.mode, ExposureMode::Manual);
        let constants = ctx.current_view().unwrap().scene_constants();
        let volume = ctx.current_view().unwrap().post_process();
        assert_eq!(constants.manual_exposure, ExposureState::manual(volume).exposure);
    }

    #[rstest::rstest]
    #[case::too_few_bins(AutoExposureConfig::default().with_histogram_bins(8))]
    #[case::not_power_of_two(AutoExposureConfig::default().with_histogram_bins(100))]
    #[case::zero_workgroup(AutoExposureConfig::default().with_workgroup_size(0))]
    fn test_invalid_config(#[case] config: AutoExposureConfig) {
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("auto_exposure."));
    }
}
