//! The contract every engine module implements.

use oxygen_core::compute::{Co, ready};
use oxygen_core::strong_type;

use crate::context::FrameContext;
use crate::error::ModuleError;
use crate::phase::PhaseMask;
use crate::snapshot::UnifiedSnapshot;

strong_type!(
    /// Dispatch order within a phase; lower runs earlier.
    pub struct ModulePriority(u32);
);

impl ModulePriority {
    pub const HIGHEST: Self = Self(0);
    pub const HIGH: Self = Self(100);
    pub const NORMAL: Self = Self(500);
    pub const LOW: Self = Self(900);
    pub const LOWEST: Self = Self(u32::MAX);
}

/// Result of a module handler.
pub type ModuleResult = Result<(), ModuleError>;

/// A unit of engine functionality driven by the frame loop.
///
/// The engine calls a handler only for phases present in
/// [`supported_phases`](Self::supported_phases). Ordered handlers run
/// inline; async handlers return a [`Co`] the engine awaits before moving
/// on to the next module. [`on_parallel_tasks`](Self::on_parallel_tasks)
/// runs on a worker thread and sees only the frozen snapshot.
///
/// A non-critical module that fails (returns `Err`, reports through
/// [`FrameContext::report_error`], or panics) is unregistered. A critical
/// module's failure skips the rest of the frame.
#[allow(unused_variables)]
pub trait EngineModule: Send + Sync {
    /// Unique name within a [`ModuleManager`](crate::ModuleManager).
    fn name(&self) -> &str;

    fn priority(&self) -> ModulePriority {
        ModulePriority::NORMAL
    }

    fn supported_phases(&self) -> PhaseMask;

    fn is_critical(&self) -> bool {
        false
    }

    /// Called once on registration. An error rejects the registration.
    fn on_attached(&mut self) -> ModuleResult {
        Ok(())
    }

    /// Called once when the module leaves the manager.
    fn on_shutdown(&mut self) {}

    // Ordered phases.

    fn on_frame_start(&mut self, ctx: &mut FrameContext) -> ModuleResult {
        Ok(())
    }

    fn on_fixed_simulation(&mut self, ctx: &mut FrameContext) -> ModuleResult {
        Ok(())
    }

    /// Contributes data to the unified snapshot. Must not spawn work.
    fn on_snapshot(&mut self, ctx: &mut FrameContext) -> ModuleResult {
        Ok(())
    }

    /// Merges results of the parallel phase back into frame state.
    fn on_post_parallel(&mut self, ctx: &mut FrameContext) -> ModuleResult {
        Ok(())
    }

    fn on_async_poll(&mut self, ctx: &mut FrameContext) -> ModuleResult {
        Ok(())
    }

    fn on_frame_end(&mut self, ctx: &mut FrameContext) -> ModuleResult {
        Ok(())
    }

    // Async phases.

    fn on_input<'a>(&'a mut self, ctx: &'a mut FrameContext) -> Co<'a, ModuleResult> {
        ready(Ok(()))
    }

    fn on_gameplay<'a>(&'a mut self, ctx: &'a mut FrameContext) -> Co<'a, ModuleResult> {
        ready(Ok(()))
    }

    fn on_scene_mutation<'a>(&'a mut self, ctx: &'a mut FrameContext) -> Co<'a, ModuleResult> {
        ready(Ok(()))
    }

    fn on_transform_propagation<'a>(&'a mut self, ctx: &'a mut FrameContext) -> Co<'a, ModuleResult> {
        ready(Ok(()))
    }

    fn on_frame_graph<'a>(&'a mut self, ctx: &'a mut FrameContext) -> Co<'a, ModuleResult> {
        ready(Ok(()))
    }

    fn on_command_record<'a>(&'a mut self, ctx: &'a mut FrameContext) -> Co<'a, ModuleResult> {
        ready(Ok(()))
    }

    // Parallel and detached.

    fn on_parallel_tasks(&self, snapshot: &UnifiedSnapshot) -> ModuleResult {
        Ok(())
    }

    /// Started once when the frame loop starts.
    fn on_detached_service<'a>(&'a mut self) -> Co<'a, ModuleResult> {
        ready(Ok(()))
    }
}
