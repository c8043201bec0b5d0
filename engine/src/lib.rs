//! Oxygen frame engine.
//!
//! The [`AsyncEngine`] walks a closed sequence of [`PhaseId`]s every frame.
//! Functionality plugs in as [`EngineModule`]s registered with a
//! [`ModuleManager`]; each module declares the phases it handles and a
//! priority that orders it within each phase.
//!
//! Per frame, modules see a [`FrameContext`]. After the snapshot phase the
//! engine publishes a read-only [`UnifiedSnapshot`] which the parallel
//! phase fans out to the thread pool. Rendering is a regular critical
//! module, [`RendererModule`], wrapping `oxygen_graphics::Renderer`.
//!
//! ```ignore
//! use oxygen_engine::{AsyncEngine, EngineConfig};
//!
//! let config = EngineConfig::from_toml_str("max_frames = 3")?;
//! let mut engine = AsyncEngine::new(config, Scene::new("main"))?;
//! engine.attach_renderer(oxygen_graphics::create_backend()?, Box::new(NoTextureSource))?;
//! engine.run_blocking()?;
//! ```

pub mod config;
pub mod console;
pub mod context;
pub mod engine;
pub mod error;
pub mod manager;
pub mod module;
pub mod phase;
pub mod renderer_module;
pub mod snapshot;

pub use config::EngineConfig;
pub use console::{
    CVarDefinition, CVarValue, CommandHandler, CommandSource, Console, ConsoleFlags, ConsolePolicy,
};
pub use context::{FrameBudget, FrameContext};
pub use engine::{AsyncEngine, EngineStats, FRAME_BUDGET_CVAR};
pub use error::{EngineError, ModuleError};
pub use manager::ModuleManager;
pub use module::{EngineModule, ModulePriority, ModuleResult};
pub use phase::{PhaseId, PhaseKind, PhaseMask};
pub use renderer_module::RendererModule;
pub use snapshot::{NodeSnapshot, SnapshotBuilder, UnifiedSnapshot};

/// Engine version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

static_assertions::assert_impl_all!(ModuleManager: Send, Sync);
static_assertions::assert_impl_all!(RendererModule: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
