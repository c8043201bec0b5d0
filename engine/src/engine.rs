//! The frame loop coordinator.

use std::sync::Arc;
use std::time::Instant;

use oxygen_core::compute::{CancellationToken, Event, ThreadPool, block_on};
use oxygen_core::hash::hash_combine;
use oxygen_core::input::InputSnapshot;
use oxygen_core::FrameIdentity;
use oxygen_graphics::{GpuBackend, GraphicsDevice, TextureSource, ViewRequest};
use oxygen_scene::Scene;

use crate::config::EngineConfig;
use crate::console::{CVarDefinition, CVarValue, Console, ConsoleFlags, ConsolePolicy};
use crate::context::{FrameBudget, FrameContext};
use crate::error::EngineError;
use crate::manager::ModuleManager;
use crate::module::EngineModule;
use crate::phase::PhaseId;
use crate::renderer_module::RendererModule;

/// CVar holding the frame time target read by the budget phase.
pub const FRAME_BUDGET_CVAR: &str = "engine.frame_budget_ms";

/// Counters of the frame loop.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineStats {
    /// Frames whose sequence number was issued.
    pub frames_started: u64,
    /// Frames that ran every phase.
    pub frames_completed: u64,
    /// Frames aborted by a critical failure or cancellation.
    pub frames_skipped: u64,
    /// Frames that reached the present phase.
    pub frames_presented: u64,
    /// Non-critical modules unregistered after a failure.
    pub modules_removed: usize,
    /// Most recent frame-aborting error.
    pub last_error: Option<EngineError>,
}

/// Drives modules through the closed phase sequence, one frame at a time.
///
/// The loop is cooperative and single threaded: async phases are awaited
/// module by module on the calling thread, and only the parallel phase
/// fans out to the thread pool.
///
/// ```ignore
/// let mut engine = AsyncEngine::new(EngineConfig::default().with_max_frames(3), Scene::new("main"))?;
/// engine.register_module(Box::new(MyModule::default()))?;
/// engine.run_blocking()?;
/// assert!(engine.completed().is_triggered());
/// ```
pub struct AsyncEngine {
    config: EngineConfig,
    modules: ModuleManager,
    ctx: FrameContext,
    pool: ThreadPool,
    cancellation: CancellationToken,
    completed: Event,
    console: Console,
    stats: EngineStats,
    frame: FrameIdentity,
    views: Vec<ViewRequest>,
    pending_input: Option<InputSnapshot>,
    last_frame_at: Option<Instant>,
    elapsed_seconds: f64,
    running: bool,
}

impl AsyncEngine {
    pub fn new(config: EngineConfig, scene: Scene) -> Result<Self, EngineError> {
        config.validate()?;
        let cancellation = CancellationToken::new();
        let pool = match config.parallel_workers {
            0 => ThreadPool::default_threads(),
            n => ThreadPool::new(n),
        };
        let mut console = Console::new(ConsolePolicy {
            shipping_build: config.shipping_build,
            allow_cheats: config.allow_cheats,
        });
        Self::register_engine_cvars(&mut console, &config)?;
        let ctx = FrameContext::new(
            scene,
            config.frames_in_flight,
            cancellation.clone(),
            FrameBudget::new(config.frame_budget_ms),
        );
        log::info!(
            "AsyncEngine: created ({} frames in flight, {} parallel workers, shipping {})",
            config.frames_in_flight,
            pool.num_threads(),
            config.shipping_build
        );
        Ok(Self {
            frame: FrameIdentity::initial(config.frames_in_flight),
            config,
            modules: ModuleManager::new(),
            ctx,
            pool,
            cancellation,
            completed: Event::new(),
            console,
            stats: EngineStats::default(),
            views: Vec::new(),
            pending_input: None,
            last_frame_at: None,
            elapsed_seconds: 0.0,
            running: false,
        })
    }

    fn register_engine_cvars(console: &mut Console, config: &EngineConfig) -> Result<(), EngineError> {
        console.register_cvar(
            CVarDefinition::new(FRAME_BUDGET_CVAR, CVarValue::Float(f64::from(config.frame_budget_ms)))
                .with_help("target CPU time per frame in milliseconds")
                .with_flags(ConsoleFlags::ARCHIVE)
                .with_range(1.0, 1000.0),
        )?;
        console.register_cvar(
            CVarDefinition::new("engine.frames_in_flight", CVarValue::Int(i64::from(config.frames_in_flight)))
                .with_help("frames the CPU may record ahead of the GPU")
                .with_flags(ConsoleFlags::READ_ONLY),
        )?;
        console.register_cvar(
            CVarDefinition::new("engine.shipping_build", CVarValue::Bool(config.shipping_build))
                .with_flags(ConsoleFlags::READ_ONLY),
        )?;
        Ok(())
    }

    /// Creates a device on `backend` and registers a [`RendererModule`].
    pub fn attach_renderer(
        &mut self,
        backend: Arc<dyn GpuBackend>,
        texture_source: Box<dyn TextureSource>,
    ) -> Result<Arc<GraphicsDevice>, EngineError> {
        let device = GraphicsDevice::new(backend, self.config.graphics.clone())?;
        let module = RendererModule::new(Arc::clone(&device), self.config.renderer_config(), texture_source)?;
        self.register_module(Box::new(module))?;
        Ok(device)
    }

    pub fn register_module(&mut self, module: Box<dyn EngineModule>) -> Result<(), EngineError> {
        self.modules.register_module(module)
    }

    pub fn unregister_module(&mut self, name: &str) -> Result<(), EngineError> {
        self.modules.unregister_module(name)
    }

    pub fn modules(&self) -> &ModuleManager {
        &self.modules
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn console(&self) -> &Console {
        &self.console
    }

    pub fn console_mut(&mut self) -> &mut Console {
        &mut self.console
    }

    pub fn context(&self) -> &FrameContext {
        &self.ctx
    }

    pub fn scene(&self) -> &Scene {
        self.ctx.scene()
    }

    /// Scene access between frames.
    pub fn scene_mut(&mut self) -> &mut Scene {
        self.ctx.scene_for_engine()
    }

    /// Identity of the most recently started frame.
    pub fn frame(&self) -> FrameIdentity {
        self.frame
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            modules_removed: self.modules.removed_modules().len(),
            ..self.stats.clone()
        }
    }

    /// Adds a view rendered every frame, replacing one with the same id.
    pub fn add_view(&mut self, view: ViewRequest) {
        if let Some(existing) = self.views.iter_mut().find(|v| v.id == view.id) {
            *existing = view;
        } else {
            self.views.push(view);
        }
    }

    pub fn clear_views(&mut self) {
        self.views.clear();
    }

    /// Input published at the start of the next frame's input phase.
    pub fn queue_input(&mut self, input: InputSnapshot) {
        self.pending_input = Some(input);
    }

    /// Triggered once the frame loop decides to stop.
    pub fn completed(&self) -> Event {
        self.completed.clone()
    }

    /// Token that stops the loop when cancelled; usable from other threads.
    pub fn stop_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Stops the loop. Handlers unwind at their next await point.
    pub fn stop(&self) {
        log::info!("AsyncEngine: stop requested");
        self.cancellation.cancel();
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Runs frames until stopped, `max_frames` is reached, or a module
    /// requests a stop.
    ///
    /// With `stop_on_critical_error`, the first critical module failure
    /// ends the loop and is returned. Otherwise the frame is skipped and the
    /// loop continues.
    pub async fn run(&mut self) -> Result<(), EngineError> {
        self.running = true;
        self.completed.reset();
        log::info!("AsyncEngine: frame loop started with {} modules", self.modules.module_count());
        let result = self.frame_loop().await;
        self.running = false;
        self.completed.trigger();
        log::info!(
            "AsyncEngine: frame loop finished after {} frames ({} skipped)",
            self.stats.frames_started,
            self.stats.frames_skipped
        );
        result
    }

    /// [`run`](Self::run) on the current thread.
    pub fn run_blocking(&mut self) -> Result<(), EngineError> {
        block_on(self.run())
    }

    async fn frame_loop(&mut self) -> Result<(), EngineError> {
        self.ctx.enter_phase(Some(PhaseId::DetachedService));
        let detached = self.modules.run_phase(PhaseId::DetachedService, &mut self.ctx).await;
        self.ctx.enter_phase(None);
        match detached {
            Ok(()) => {}
            Err(EngineError::Cancelled) => return Ok(()),
            Err(err) => return Err(err),
        }

        while self.next_frame() {
            match self.run_frame().await {
                Ok(()) => self.stats.frames_completed += 1,
                Err(EngineError::Cancelled) => {
                    self.stats.frames_skipped += 1;
                    log::debug!("AsyncEngine: frame {} cancelled", self.frame.sequence);
                    break;
                }
                Err(err) => {
                    self.stats.frames_skipped += 1;
                    log::error!("AsyncEngine: frame {} skipped: {err}", self.frame.sequence);
                    self.stats.last_error = Some(err.clone());
                    if self.config.stop_on_critical_error {
                        return Err(err);
                    }
                }
            }
            self.ctx.enter_phase(None);
        }
        Ok(())
    }

    /// Decides whether another frame runs and, if so, issues its identity.
    fn next_frame(&mut self) -> bool {
        if self.cancellation.is_cancelled() || self.ctx.stop_requested() {
            return false;
        }
        if self.config.max_frames.is_some_and(|max| self.stats.frames_started >= max) {
            return false;
        }

        let now = Instant::now();
        let delta = match (self.config.fixed_delta_seconds, self.last_frame_at) {
            (Some(fixed), _) => fixed,
            (None, Some(last)) => (now - last).as_secs_f32(),
            (None, None) => self.config.frame_budget_ms / 1000.0,
        };
        self.last_frame_at = Some(now);
        self.elapsed_seconds += f64::from(delta);

        self.frame.advance();
        self.stats.frames_started += 1;
        self.ctx.begin_frame(self.frame, delta, self.elapsed_seconds);
        for view in &self.views {
            self.ctx.add_view(*view);
        }
        true
    }

    async fn run_frame(&mut self) -> Result<(), EngineError> {
        oxygen_core::profile_scope!("engine_frame");
        let frame_start = Instant::now();
        for phase in PhaseId::FRAME_ORDER {
            if self.cancellation.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            self.ctx.enter_phase(Some(phase));
            match phase {
                PhaseId::Input => {
                    if let Some(input) = self.pending_input.take() {
                        self.ctx.replace_input(input);
                    }
                    self.modules.run_phase(phase, &mut self.ctx).await?;
                }
                // No replication layer is attached; the phase keeps its slot
                // in the sequence.
                PhaseId::NetworkReconciliation => {}
                PhaseId::RandomSeedManagement => {
                    let seed = hash_combine(self.config.random_seed, self.frame.sequence.get());
                    self.ctx.set_random_seed(seed);
                }
                PhaseId::TransformPropagation => {
                    self.modules.run_phase(phase, &mut self.ctx).await?;
                    let updated = self.ctx.scene_for_engine().update_transforms();
                    log::trace!("AsyncEngine: propagated {updated} transforms");
                }
                PhaseId::Snapshot => {
                    self.modules.run_phase(phase, &mut self.ctx).await?;
                    self.ctx.publish_snapshot();
                }
                PhaseId::ParallelTasks => {
                    if let Some(snapshot) = self.ctx.snapshot().cloned() {
                        self.modules.run_parallel(&self.pool, &snapshot)?;
                    }
                }
                PhaseId::Present => self.stats.frames_presented += 1,
                PhaseId::BudgetAdapt => self.adapt_budget(frame_start),
                _ => self.modules.run_phase(phase, &mut self.ctx).await?,
            }
        }
        Ok(())
    }

    fn adapt_budget(&mut self, frame_start: Instant) {
        let target = self
            .console
            .cvar_float(FRAME_BUDGET_CVAR)
            .map_or(self.config.frame_budget_ms, |ms| ms as f32);
        let frame_ms = frame_start.elapsed().as_secs_f32() * 1000.0;
        let budget = self.ctx.budget_mut();
        budget.target_ms = target;
        budget.record(frame_ms);
        if budget.over_budget_frames > 0 && budget.over_budget_frames % 60 == 0 {
            log::debug!(
                "AsyncEngine: {} frames over the {target:.1} ms budget (average {:.2} ms)",
                budget.over_budget_frames,
                budget.average_ms
            );
        }
    }

    /// Shuts every module down. The engine can not run afterwards.
    pub fn shutdown(&mut self) {
        self.cancellation.cancel();
        self.modules.shutdown_all();
        log::info!("AsyncEngine: shut down");
    }
}

impl Drop for AsyncEngine {
    fn drop(&mut self) {
        self.modules.shutdown_all();
    }
}

impl std::fmt::Debug for AsyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncEngine")
            .field("frame", &self.frame)
            .field("modules", &self.modules)
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;
    use crate::context::FrameContext;
    use crate::module::ModuleResult;
    use crate::phase::PhaseMask;
    use crate::snapshot::UnifiedSnapshot;

    #[derive(Default)]
    struct SeedProbe {
        seeds: Vec<u64>,
        parallel_frames: Arc<AtomicU64>,
    }

    impl EngineModule for SeedProbe {
        fn name(&self) -> &str {
            "seed_check"
        }

        fn supported_phases(&self) -> PhaseMask {
            PhaseMask::FIXED_SIM | PhaseMask::PARALLEL_TASKS
        }

        fn on_fixed_simulation(&mut self, ctx: &mut FrameContext) -> ModuleResult {
            self.seeds.push(ctx.random_seed());
            Ok(())
        }

        fn on_parallel_tasks(&self, snapshot: &UnifiedSnapshot) -> ModuleResult {
            self.parallel_frames
                .fetch_max(snapshot.frame().sequence.get(), Ordering::Relaxed);
            Ok(())
        }
    }

    #[test]
    fn test_frames_advance_with_derived_seeds() {
        let config = EngineConfig::default()
            .with_max_frames(4)
            .with_fixed_delta_seconds(0.01)
            .with_random_seed(7);
        let mut engine = AsyncEngine::new(config, Scene::new("engine")).unwrap();
        let parallel_frames = Arc::new(AtomicU64::new(0));
        engine
            .register_module(Box::new(SeedProbe {
                seeds: Vec::new(),
                parallel_frames: parallel_frames.clone(),
            }))
            .unwrap();

        engine.run_blocking().unwrap();

        let stats = engine.stats();
        assert_eq!(stats.frames_completed, 4);
        assert_eq!(stats.frames_presented, 4);
        assert_eq!(engine.frame().sequence.get(), 4);
        assert_eq!(parallel_frames.load(Ordering::Relaxed), 4);
        assert!((engine.context().elapsed_seconds() - 0.04).abs() < 1e-6);
        assert_eq!(engine.context().random_seed(), hash_combine(7, 4));
    }

    #[test]
    fn test_stop_before_run_completes_immediately() {
        let mut engine = AsyncEngine::new(EngineConfig::default(), Scene::new("engine")).unwrap();
        engine.stop();
        engine.run_blocking().unwrap();
        assert!(engine.completed().is_triggered());
        assert_eq!(engine.stats().frames_started, 0);
    }

    #[test]
    fn test_budget_target_follows_cvar() {
        let mut engine = AsyncEngine::new(EngineConfig::default().with_max_frames(1), Scene::new("engine")).unwrap();
        engine
            .console_mut()
            .execute("engine.frame_budget_ms 33", crate::console::CommandSource::LocalConsole)
            .unwrap();
        engine.run_blocking().unwrap();
        assert_eq!(engine.context().budget().target_ms, 33.0);
    }
}
