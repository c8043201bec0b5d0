//! Frame-loop adapter around [`Renderer`].

use std::sync::Arc;

use oxygen_core::compute::{Co, co};
use oxygen_graphics::{GraphicsDevice, GraphicsError, Renderer, RendererConfig, TextureSource};
use parking_lot::{Mutex, MutexGuard};

use crate::context::FrameContext;
use crate::module::{EngineModule, ModulePriority, ModuleResult};
use crate::phase::PhaseMask;

/// Renders the views requested during the frame and retires released
/// GPU objects.
///
/// Critical: a failed frame submission skips the frame instead of
/// unregistering the renderer. The renderer sits behind a mutex so the
/// module is `Sync`; frame handlers reach it through `&mut self` without
/// locking.
pub struct RendererModule {
    renderer: Mutex<Renderer>,
    reclaimed: u64,
}

impl RendererModule {
    pub const NAME: &'static str = "Renderer";

    pub fn new(
        device: Arc<GraphicsDevice>,
        config: RendererConfig,
        texture_source: Box<dyn TextureSource>,
    ) -> Result<Self, GraphicsError> {
        Ok(Self::from_renderer(Renderer::new(device, config, texture_source)?))
    }

    pub fn from_renderer(renderer: Renderer) -> Self {
        Self {
            renderer: Mutex::new(renderer),
            reclaimed: 0,
        }
    }

    pub fn renderer(&self) -> MutexGuard<'_, Renderer> {
        self.renderer.lock()
    }

    pub fn renderer_mut(&mut self) -> &mut Renderer {
        self.renderer.get_mut()
    }

    /// Objects returned to the device by the async poll phase.
    pub fn reclaimed(&self) -> u64 {
        self.reclaimed
    }
}

impl EngineModule for RendererModule {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn priority(&self) -> ModulePriority {
        ModulePriority::LOW
    }

    fn supported_phases(&self) -> PhaseMask {
        PhaseMask::COMMAND_RECORD | PhaseMask::ASYNC_POLL
    }

    fn is_critical(&self) -> bool {
        true
    }

    fn on_shutdown(&mut self) {
        let renderer = self.renderer.get_mut();
        renderer.shutdown();
        log::info!("RendererModule: shut down after {} frames", renderer.frames_rendered());
    }

    fn on_command_record<'a>(&'a mut self, ctx: &'a mut FrameContext) -> Co<'a, ModuleResult> {
        co(async move {
            ctx.checkpoint().await?;
            let report = self
                .renderer
                .get_mut()
                .render_frame(ctx.scene(), ctx.frame(), ctx.delta_seconds(), ctx.views())?;
            ctx.set_frame_report(report);
            Ok(())
        })
    }

    fn on_async_poll(&mut self, _ctx: &mut FrameContext) -> ModuleResult {
        let released = self.renderer.get_mut().device().process_deferred();
        self.reclaimed += released as u64;
        if released > 0 {
            log::trace!("RendererModule: reclaimed {released} objects");
        }
        Ok(())
    }
}

impl std::fmt::Debug for RendererModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RendererModule")
            .field("frames_rendered", &self.renderer.lock().frames_rendered())
            .field("reclaimed", &self.reclaimed)
            .finish()
    }
}
