//! Frame-wide state shared by every pass of the render graph.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use oxygen_core::FrameIdentity;
use oxygen_core::math::Mat4;
use oxygen_scene::{PerspectiveCamera, PostProcessVolume};
use parking_lot::Mutex;

use super::SceneConstants;
use crate::binders::ViewId;
use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::passes::{KnownPass, PassId};
use crate::prep::PreparedSceneFrame;
use crate::resources::{Buffer, Texture};
use crate::types::{ShaderVisibleIndex, Viewport};

/// Render targets of one view. Passes borrow them through framebuffers.
#[derive(Debug, Clone)]
pub struct ViewTargets {
    pub hdr_color: Arc<Texture>,
    pub hdr_color_srv: ShaderVisibleIndex,
    pub depth: Arc<Texture>,
    /// Display target written by the tone map pass.
    pub output: Option<Arc<Texture>>,
}

impl ViewTargets {
    pub fn extent(&self) -> (u32, u32) {
        (self.hdr_color.width(), self.hdr_color.height())
    }
}

/// Everything the passes need to render one view.
pub struct RenderView {
    id: ViewId,
    camera: PerspectiveCamera,
    targets: ViewTargets,
    post_process: PostProcessVolume,
    prepared: PreparedSceneFrame,
    constants: Mutex<SceneConstants>,
    constants_buffer: Arc<Buffer>,
}

impl RenderView {
    pub fn new(
        camera: PerspectiveCamera,
        targets: ViewTargets,
        post_process: PostProcessVolume,
        prepared: PreparedSceneFrame,
        constants: SceneConstants,
        constants_buffer: Arc<Buffer>,
    ) -> Self {
        Self {
            id: prepared.view(),
            camera,
            targets,
            post_process,
            prepared,
            constants: Mutex::new(constants),
            constants_buffer,
        }
    }

    pub fn id(&self) -> ViewId {
        self.id
    }

    pub fn camera(&self) -> &PerspectiveCamera {
        &self.camera
    }

    pub fn targets(&self) -> &ViewTargets {
        &self.targets
    }

    pub fn post_process(&self) -> &PostProcessVolume {
        &self.post_process
    }

    pub fn prepared(&self) -> &PreparedSceneFrame {
        &self.prepared
    }

    pub fn extent(&self) -> (u32, u32) {
        self.targets.extent()
    }

    pub fn viewport(&self) -> Viewport {
        let (w, h) = self.extent();
        Viewport::from_dimensions(w, h)
    }

    pub fn view_matrix(&self) -> Mat4 {
        self.camera.view_matrix()
    }

    pub fn projection_matrix(&self) -> Mat4 {
        self.camera.projection_matrix(self.viewport().aspect_ratio())
    }

    pub fn constants_buffer(&self) -> &Arc<Buffer> {
        &self.constants_buffer
    }

    pub fn scene_constants(&self) -> SceneConstants {
        *self.constants.lock()
    }
}

impl std::fmt::Debug for RenderView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderView")
            .field("id", &self.id)
            .field("extent", &self.extent())
            .field("draws", &self.prepared.len())
            .finish()
    }
}

/// Shared state of one frame of rendering.
///
/// Passes receive it by shared reference. Inter-pass data flows through
/// [`publish`](Self::publish) and [`pass_outputs`](Self::pass_outputs),
/// keyed by the current view and the publishing pass type.
pub struct RenderContext {
    device: Arc<GraphicsDevice>,
    frame: FrameIdentity,
    delta_seconds: f32,
    views: Vec<RenderView>,
    current: Option<usize>,
    enabled: HashMap<String, bool>,
    outputs: Mutex<HashMap<(ViewId, PassId), Box<dyn Any + Send>>>,
}

impl RenderContext {
    pub fn new(device: Arc<GraphicsDevice>, frame: FrameIdentity) -> Self {
        Self {
            device,
            frame,
            delta_seconds: 0.0,
            views: Vec::new(),
            current: None,
            enabled: HashMap::new(),
            outputs: Mutex::new(HashMap::new()),
        }
    }

    pub fn device(&self) -> &Arc<GraphicsDevice> {
        &self.device
    }

    pub fn frame(&self) -> FrameIdentity {
        self.frame
    }

    pub fn delta_seconds(&self) -> f32 {
        self.delta_seconds
    }

    /// Drops last frame's views and outputs. Pass enable flags persist.
    pub fn begin_frame(&mut self, frame: FrameIdentity, delta_seconds: f32) {
        self.frame = frame;
        self.delta_seconds = delta_seconds.max(0.0);
        self.views.clear();
        self.current = None;
        self.outputs.get_mut().clear();
    }

    pub fn add_view(&mut self, view: RenderView) -> Result<(), GraphicsError> {
        if self.views.iter().any(|v| v.id == view.id) {
            return Err(GraphicsError::InvalidArgument(format!(
                "view {} added twice",
                view.id
            )));
        }
        self.views.push(view);
        Ok(())
    }

    pub fn views(&self) -> &[RenderView] {
        &self.views
    }

    pub fn view(&self, id: ViewId) -> Option<&RenderView> {
        self.views.iter().find(|v| v.id == id)
    }

    /// Prepared frame of `view`.
    pub fn prepared_frame(&self, view: ViewId) -> Option<&PreparedSceneFrame> {
        self.view(view).map(RenderView::prepared)
    }

    pub fn set_current_view(&mut self, id: ViewId) -> Result<(), GraphicsError> {
        let index = self
            .views
            .iter()
            .position(|v| v.id == id)
            .ok_or_else(|| GraphicsError::NotFound(format!("view {id}")))?;
        self.current = Some(index);
        Ok(())
    }

    /// View the graph is currently rendering.
    pub fn current_view(&self) -> Result<&RenderView, GraphicsError> {
        self.current
            .and_then(|i| self.views.get(i))
            .ok_or_else(|| GraphicsError::InvalidArgument("no current view".to_string()))
    }

    // ========================================================================
    // Pass enable flags
    // ========================================================================

    pub fn set_pass_enabled(&mut self, pass: impl Into<String>, enabled: bool) {
        self.enabled.insert(pass.into(), enabled);
    }

    /// Passes are enabled unless explicitly disabled.
    pub fn is_pass_enabled(&self, pass: &str) -> bool {
        self.enabled.get(pass).copied().unwrap_or(true)
    }

    // ========================================================================
    // Inter-pass data
    // ========================================================================

    /// Publishes `P`'s outputs for the current view.
    pub fn publish<P: KnownPass>(&self, outputs: P::Outputs) -> Result<(), GraphicsError> {
        let view = self.current_view()?.id;
        self.outputs.lock().insert((view, P::ID), Box::new(outputs));
        Ok(())
    }

    /// Outputs `P` published for the current view this frame.
    pub fn pass_outputs<P: KnownPass>(&self) -> Option<P::Outputs> {
        let view = self.current_view().ok()?.id;
        self.outputs
            .lock()
            .get(&(view, P::ID))
            .and_then(|o| o.downcast_ref::<P::Outputs>())
            .cloned()
    }

    // ========================================================================
    // Scene constants
    // ========================================================================

    /// Applies `update` to the current view's constants and rewrites its
    /// constant buffer.
    pub fn update_scene_constants(
        &self,
        update: impl FnOnce(&mut SceneConstants),
    ) -> Result<(), GraphicsError> {
        let view = self.current_view()?;
        let mut constants = view.constants.lock();
        update(&mut constants);
        view.constants_buffer.write(0, bytemuck::bytes_of(&*constants))
    }
}

impl std::fmt::Debug for RenderContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderContext")
            .field("frame", &self.frame)
            .field("views", &self.views)
            .field("enabled", &self.enabled)
            .finish()
    }
}

static_assertions::assert_impl_all!(RenderContext: Send, Sync);
