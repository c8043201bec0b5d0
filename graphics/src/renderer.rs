//! Frame renderer: scene prep, per-view targets and the render graph.
//!
//! ```ignore
//! let mut renderer = Renderer::new(device, RendererConfig::default(), Box::new(NoTextureSource))?;
//! let view = ViewRequest::new(ViewId::new(0), camera, 1280, 720);
//! let report = renderer.render_frame(&scene, frame, dt, &[view])?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use oxygen_core::frame::MAX_FRAMES_IN_FLIGHT;
use oxygen_core::{FrameIdentity, Slot};
use oxygen_scene::{PerspectiveCamera, PostProcessVolume, Scene};
use serde::{Deserialize, Serialize};

use crate::binders::{TextureSource, ViewId};
use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::graph::{PassHandle, RenderContext, RenderGraph, RenderView, SceneConstants, ViewTargets};
use crate::lights::LightCullingConfig;
use crate::passes::{
    AutoExposureConfig, AutoExposurePass, DepthPrePass, LightCullingPass, ShaderPass, ShaderPassConfig,
    ToneMapPass, ToneMapPassConfig, TransparentPass,
};
use crate::prep::{CollectionConfig, FinalizationConfig, PrepView, ScenePrepState, ScenePrepStats};
use crate::resources::{Buffer, Texture};
use crate::types::{
    BufferDescriptor, BufferUsage, DescriptorDomain, FenceValue, ResourceState, ShaderVisibleIndex,
    TextureDescriptor, TextureFormat, TextureUsage, ViewDescription,
};
use crate::upload::{RingBufferStaging, UploadCoordinator};

/// Renderer settings beyond the device configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RendererConfig {
    pub light_culling: LightCullingConfig,
    pub auto_exposure: AutoExposureConfig,
    pub collection: CollectionConfig,
    pub finalization: FinalizationConfig,
    /// Longest wait for a frame slot's previous submission.
    pub slot_wait_timeout_ms: u64,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            light_culling: LightCullingConfig::default(),
            auto_exposure: AutoExposureConfig::default(),
            collection: CollectionConfig::default(),
            finalization: FinalizationConfig::default(),
            slot_wait_timeout_ms: 2000,
        }
    }
}

impl RendererConfig {
    pub fn with_light_culling(mut self, config: LightCullingConfig) -> Self {
        self.light_culling = config;
        self
    }

    pub fn with_auto_exposure(mut self, config: AutoExposureConfig) -> Self {
        self.auto_exposure = config;
        self
    }

    pub fn with_collection(mut self, config: CollectionConfig) -> Self {
        self.collection = config;
        self
    }

    pub fn with_finalization(mut self, config: FinalizationConfig) -> Self {
        self.finalization = config;
        self
    }

    pub fn with_slot_wait_timeout_ms(mut self, ms: u64) -> Self {
        self.slot_wait_timeout_ms = ms;
        self
    }

    pub fn validate(&self) -> Result<(), GraphicsError> {
        self.light_culling.validate()?;
        self.auto_exposure.validate()?;
        self.collection.validate()
    }
}

/// One camera to render this frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewRequest {
    pub id: ViewId,
    pub camera: PerspectiveCamera,
    pub width: u32,
    pub height: u32,
    /// Replaces the scene's post-process volume for this view.
    pub post_process: Option<PostProcessVolume>,
}

impl ViewRequest {
    pub fn new(id: ViewId, camera: PerspectiveCamera, width: u32, height: u32) -> Self {
        Self {
            id,
            camera,
            width,
            height,
            post_process: None,
        }
    }

    pub fn with_post_process(mut self, volume: PostProcessVolume) -> Self {
        self.post_process = Some(volume);
        self
    }
}

/// What one call to [`Renderer::render_frame`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameReport {
    pub fence: FenceValue,
    pub views: usize,
    pub passes_run: usize,
    pub draw_calls: u32,
    pub prep: ScenePrepStats,
}

/// Handles of the passes in the default graph.
#[derive(Debug, Clone, Copy)]
pub struct DefaultPasses {
    pub depth_pre: PassHandle,
    pub light_culling: PassHandle,
    pub shader: PassHandle,
    pub transparent: PassHandle,
    pub auto_exposure: PassHandle,
    pub tone_map: PassHandle,
}

pub struct Renderer {
    device: Arc<GraphicsDevice>,
    config: RendererConfig,
    uploads: UploadCoordinator,
    prep: ScenePrepState,
    graph: RenderGraph,
    passes: DefaultPasses,
    ctx: RenderContext,
    targets: HashMap<ViewId, ViewTargets>,
    /// Scene constants per view, one buffer per frame slot.
    constants: HashMap<(ViewId, Slot), Arc<Buffer>>,
    slot_fences: [Option<FenceValue>; MAX_FRAMES_IN_FLIGHT as usize],
    frames_rendered: u64,
}

impl Renderer {
    pub fn new(
        device: Arc<GraphicsDevice>,
        config: RendererConfig,
        texture_source: Box<dyn TextureSource>,
    ) -> Result<Self, GraphicsError> {
        config.validate()?;
        let staging = RingBufferStaging::new(Arc::clone(&device), MAX_FRAMES_IN_FLIGHT, &device.config().staging)?;
        let mut uploads = UploadCoordinator::new(Arc::clone(&device), Box::new(staging));
        let prep = ScenePrepState::new(Arc::clone(&device), &mut uploads, texture_source)?
            .with_collection_config(config.collection)
            .with_finalization_config(config.finalization);
        let (graph, passes) = Self::default_graph(&config)?;
        let ctx = RenderContext::new(Arc::clone(&device), FrameIdentity::initial(MAX_FRAMES_IN_FLIGHT));
        log::info!("Renderer: created with {} passes", graph.pass_count());
        Ok(Self {
            device,
            config,
            uploads,
            prep,
            graph,
            passes,
            ctx,
            targets: HashMap::new(),
            constants: HashMap::new(),
            slot_fences: [None; MAX_FRAMES_IN_FLIGHT as usize],
            frames_rendered: 0,
        })
    }

    /// Depth, light culling, shading, transparency, exposure, tone map.
    fn default_graph(config: &RendererConfig) -> Result<(RenderGraph, DefaultPasses), GraphicsError> {
        let mut graph = RenderGraph::new();
        let passes = DefaultPasses {
            depth_pre: graph.add_pass(DepthPrePass::new()),
            light_culling: graph.add_pass(LightCullingPass::new(config.light_culling.clone())),
            shader: graph.add_pass(ShaderPass::new(ShaderPassConfig::default())),
            transparent: graph.add_pass(TransparentPass::new()),
            auto_exposure: graph.add_pass(AutoExposurePass::new(config.auto_exposure.clone())),
            tone_map: graph.add_pass(ToneMapPass::new(ToneMapPassConfig::default())),
        };
        graph.add_dependency(passes.light_culling, passes.depth_pre)?;
        graph.add_dependency(passes.shader, passes.depth_pre)?;
        graph.add_dependency(passes.shader, passes.light_culling)?;
        graph.add_dependency(passes.transparent, passes.shader)?;
        graph.add_dependency(passes.auto_exposure, passes.transparent)?;
        graph.add_dependency(passes.tone_map, passes.auto_exposure)?;
        graph.compile()?;
        Ok((graph, passes))
    }

    pub fn device(&self) -> &Arc<GraphicsDevice> {
        &self.device
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn graph(&self) -> &RenderGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut RenderGraph {
        &mut self.graph
    }

    pub fn passes(&self) -> DefaultPasses {
        self.passes
    }

    pub fn context(&self) -> &RenderContext {
        &self.ctx
    }

    pub fn scene_prep(&self) -> &ScenePrepState {
        &self.prep
    }

    pub fn scene_prep_mut(&mut self) -> &mut ScenePrepState {
        &mut self.prep
    }

    pub fn uploads(&self) -> &UploadCoordinator {
        &self.uploads
    }

    pub fn set_pass_enabled(&mut self, pass: impl Into<String>, enabled: bool) {
        self.ctx.set_pass_enabled(pass, enabled);
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    /// Targets of `view` as of its last rendered frame.
    pub fn view_targets(&self, view: ViewId) -> Option<&ViewTargets> {
        self.targets.get(&view)
    }

    /// Waits until the previous submission that used `slot` completed.
    fn wait_for_slot(&self, slot: Slot) -> Result<(), GraphicsError> {
        let Some(fence) = self.slot_fences[slot.index()] else {
            return Ok(());
        };
        let queue = self.device.graphics_queue();
        if !queue.is_complete(fence) {
            log::trace!("Renderer: waiting for slot {slot} (fence {fence})");
            queue.wait(fence, Some(Duration::from_millis(self.config.slot_wait_timeout_ms)))?;
        }
        Ok(())
    }

    fn create_targets(
        &self,
        view: ViewId,
        width: u32,
        height: u32,
    ) -> Result<(Arc<Texture>, Arc<Texture>, Arc<Texture>), GraphicsError> {
        let hdr = self.device.create_texture(
            &TextureDescriptor::new_2d(
                width,
                height,
                TextureFormat::Rgba16Float,
                TextureUsage::RENDER_TARGET | TextureUsage::SHADER_RESOURCE | TextureUsage::UNORDERED_ACCESS,
            )
            .with_label(format!("hdr_color[{view}]"))
            .with_initial_state(ResourceState::Common),
        )?;
        let depth = self.device.create_texture(
            &TextureDescriptor::new_2d(
                width,
                height,
                TextureFormat::Depth32Float,
                TextureUsage::DEPTH_STENCIL | TextureUsage::SHADER_RESOURCE,
            )
            .with_label(format!("depth[{view}]"))
            .with_initial_state(ResourceState::Common),
        )?;
        let output = self.device.create_texture(
            &TextureDescriptor::new_2d(
                width,
                height,
                TextureFormat::Rgba8Unorm,
                TextureUsage::RENDER_TARGET | TextureUsage::COPY_SRC,
            )
            .with_label(format!("output[{view}]"))
            .with_initial_state(ResourceState::Common),
        )?;
        Ok((hdr, depth, output))
    }

    /// Creates or resizes the targets of `view`.
    ///
    /// On resize the HDR texture is swapped under its registered SRV, so
    /// the bindless index stays the same.
    fn ensure_targets(&mut self, view: ViewId, width: u32, height: u32) -> Result<ViewTargets, GraphicsError> {
        if let Some(cached) = self.targets.get(&view)
            && cached.extent() == (width, height)
        {
            return Ok(cached.clone());
        }
        let (hdr, depth, output) = self.create_targets(view, width, height)?;
        let registry = self.device.registry();
        let reclaimer = self.device.reclaimer();
        let hdr_color_srv = match self.targets.remove(&view) {
            Some(old) => {
                let replaced = registry.replace(old.hdr_color.id(), &hdr, |desc| Some(*desc))?;
                reclaimer.defer_release_resource(replaced);
                reclaimer.defer_release_resource(old.depth);
                if let Some(output) = old.output {
                    reclaimer.defer_release_resource(output);
                }
                log::debug!("Renderer: view {view} resized to {width}x{height}");
                old.hdr_color_srv
            }
            None => {
                registry.register(&hdr)?;
                let handle = registry.allocator().allocate(DescriptorDomain::SRV)?;
                let srv = registry
                    .register_view(hdr.id(), handle, ViewDescription::texture_srv(hdr.format()))?
                    .shader_visible_index;
                log::debug!("Renderer: view {view} targets {width}x{height}, HDR SRV {srv}");
                srv
            }
        };
        let targets = ViewTargets {
            hdr_color: hdr,
            hdr_color_srv,
            depth,
            output: Some(output),
        };
        self.targets.insert(view, targets.clone());
        Ok(targets)
    }

    fn constants_buffer(&mut self, view: ViewId, slot: Slot) -> Result<Arc<Buffer>, GraphicsError> {
        if let Some(buffer) = self.constants.get(&(view, slot)) {
            return Ok(Arc::clone(buffer));
        }
        let buffer = self.device.create_buffer(
            &BufferDescriptor::upload(SceneConstants::ALIGNED_SIZE, BufferUsage::CONSTANT)
                .with_label(format!("scene_constants[{view}][{slot}]")),
        )?;
        self.constants.insert((view, slot), Arc::clone(&buffer));
        Ok(buffer)
    }

    /// Renders `views` of `scene` and submits the frame.
    pub fn render_frame(
        &mut self,
        scene: &Scene,
        frame: FrameIdentity,
        delta_seconds: f32,
        views: &[ViewRequest],
    ) -> Result<FrameReport, GraphicsError> {
        oxygen_core::profile_function!();
        let slot = frame.slot;
        self.wait_for_slot(slot)?;
        self.device.on_begin_frame();
        self.uploads.on_frame_start(slot);

        let prep_views: Vec<PrepView> = views
            .iter()
            .map(|v| PrepView::new(v.id, v.camera, v.width, v.height))
            .collect();
        let prepared = self.prep.prepare_frame(scene, &prep_views, slot, &mut self.uploads)?;
        self.uploads.flush()?;

        let scene_volume = scene.environment().get::<PostProcessVolume>().copied().unwrap_or_default();
        let bindings = self.prep.bindings();
        self.ctx.begin_frame(frame, delta_seconds);
        for (request, prepared) in views.iter().zip(prepared) {
            let targets = self.ensure_targets(request.id, request.width.max(1), request.height.max(1))?;
            let buffer = self.constants_buffer(request.id, slot)?;
            let aspect = request.width.max(1) as f32 / request.height.max(1) as f32;
            let camera = &request.camera;
            let mut constants = SceneConstants::default();
            constants.set_camera(&camera.view_matrix(), &camera.projection_matrix(aspect), camera.position.into());
            constants.viewport = [request.width as f32, request.height as f32];
            constants.z_near = camera.near;
            constants.z_far = camera.far;
            constants.frame_slot = slot.get();
            constants.frame_sequence = frame.sequence.get() as u32;
            constants.time_seconds = delta_seconds;
            constants.draw_metadata_srv = prepared.draw_metadata_srv().get();
            constants.hdr_color_srv = targets.hdr_color_srv.get();
            bindings.apply(&mut constants);
            buffer.write(0, bytemuck::bytes_of(&constants))?;

            self.ctx.add_view(RenderView::new(
                *camera,
                targets,
                request.post_process.unwrap_or(scene_volume),
                prepared,
                constants,
                buffer,
            ))?;
        }

        let mut recorder = self.device.create_recorder(format!("frame{}", frame.sequence.get()));
        let mut passes_run = 0;
        for request in views {
            self.ctx.set_current_view(request.id)?;
            passes_run += oxygen_core::compute::block_on(self.graph.execute(&self.ctx, &mut recorder))?;
        }
        let draw_calls = recorder.draw_call_count();
        let graphics = self.device.graphics_queue();
        // Draws read what this frame uploaded.
        let transfer = self.uploads.queue();
        if !Arc::ptr_eq(transfer, graphics) {
            graphics.wait_for_queue(transfer, transfer.current_value())?;
        }
        let fence = graphics.submit(&mut [recorder.finish()])?;
        self.slot_fences[slot.index()] = Some(fence);
        self.frames_rendered += 1;

        let live: Vec<ViewId> = views.iter().map(|v| v.id).collect();
        self.retire_views(&live)?;
        oxygen_core::frame_mark!();
        log::trace!(
            "Renderer: frame {} slot {slot}: {} views, {draw_calls} draws, fence {fence}",
            frame.sequence.get(),
            views.len()
        );
        Ok(FrameReport {
            fence,
            views: views.len(),
            passes_run,
            draw_calls,
            prep: self.prep.stats(),
        })
    }

    /// Releases targets and constants of views not rendered this frame.
    ///
    /// Every stale view is released even when one fails; the first failure
    /// is returned.
    fn retire_views(&mut self, live: &[ViewId]) -> Result<(), GraphicsError> {
        let reclaimer = self.device.reclaimer();
        let stale: Vec<ViewId> = self.targets.keys().filter(|v| !live.contains(v)).copied().collect();
        let mut result = Ok(());
        for view in stale {
            if let Some(targets) = self.targets.remove(&view) {
                if let Err(err) = self.device.retire_resource(targets.hdr_color)
                    && result.is_ok()
                {
                    result = Err(err);
                }
                reclaimer.defer_release_resource(targets.depth);
                if let Some(output) = targets.output {
                    reclaimer.defer_release_resource(output);
                }
                log::debug!("Renderer: view {view} retired");
            }
        }
        self.constants.retain(|(view, _), _| live.contains(view));
        result
    }

    /// Waits for all submitted work and releases everything deferred.
    pub fn shutdown(&mut self) {
        if let Err(err) = self.retire_views(&[]) {
            log::warn!("Renderer: failed to retire views at shutdown: {err}");
        }
        self.device.shutdown();
    }
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("graph", &self.graph)
            .field("views", &self.targets.len())
            .field("frames_rendered", &self.frames_rendered)
            .finish()
    }
}
