//! Render target sets.

use std::sync::Arc;

use crate::commands::CommandRecorder;
use crate::error::GraphicsError;
use crate::resources::Texture;
use crate::types::{ResourceState, TextureFormat, Viewport};

/// Zero or more color attachments plus an optional depth attachment.
///
/// Color attachments rest in [`ResourceState::Present`] between frames and
/// depth rests in [`ResourceState::DepthWrite`].
#[derive(Debug, Clone, Default)]
pub struct Framebuffer {
    colors: Vec<Arc<Texture>>,
    depth: Option<Arc<Texture>>,
}

impl Framebuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_color(mut self, texture: Arc<Texture>) -> Self {
        self.colors.push(texture);
        self
    }

    pub fn with_depth(mut self, texture: Arc<Texture>) -> Self {
        self.depth = Some(texture);
        self
    }

    pub fn color_attachments(&self) -> &[Arc<Texture>] {
        &self.colors
    }

    pub fn depth_attachment(&self) -> Option<&Arc<Texture>> {
        self.depth.as_ref()
    }

    pub fn color_formats(&self) -> Vec<TextureFormat> {
        self.colors.iter().map(|t| t.format()).collect()
    }

    pub fn depth_format(&self) -> Option<TextureFormat> {
        self.depth.as_ref().map(|t| t.format())
    }

    /// Size of the first attachment.
    pub fn extent(&self) -> (u32, u32) {
        self.colors
            .first()
            .or(self.depth.as_ref())
            .map_or((0, 0), |t| (t.width(), t.height()))
    }

    pub fn viewport(&self) -> Viewport {
        let (w, h) = self.extent();
        Viewport::from_dimensions(w, h)
    }

    /// Transitions every attachment for rendering and flushes the barriers.
    ///
    /// Colors go to `RenderTarget`; depth goes to `depth_state`. Colors are
    /// returned to `Present` when the recorder finishes.
    pub fn prepare_for_render(
        &self,
        recorder: &mut CommandRecorder,
        depth_state: ResourceState,
    ) -> Result<(), GraphicsError> {
        for color in &self.colors {
            recorder.begin_tracking_resource_state(color, ResourceState::Present, true);
            recorder.require_resource_state(color, ResourceState::RenderTarget)?;
        }
        if let Some(depth) = &self.depth {
            recorder.begin_tracking_resource_state(depth, ResourceState::DepthWrite, true);
            recorder.require_resource_state(depth, depth_state)?;
        }
        recorder.flush_barriers();
        Ok(())
    }
}
