//! Module registry and per-phase dispatch.

use std::panic::{AssertUnwindSafe, catch_unwind};

use oxygen_core::compute::{Co, ThreadPool, catch_panic, panic_message};

use crate::context::FrameContext;
use crate::error::{EngineError, ModuleError};
use crate::module::{EngineModule, ModulePriority, ModuleResult};
use crate::phase::{PhaseId, PhaseKind, PhaseMask};
use crate::snapshot::UnifiedSnapshot;

struct ModuleEntry {
    name: String,
    priority: ModulePriority,
    phases: PhaseMask,
    critical: bool,
    module: Box<dyn EngineModule>,
}

/// Owns the registered modules and invokes them phase by phase.
///
/// Modules are kept sorted by priority, ties broken by registration order.
/// The per-phase dispatch lists are rebuilt on every registration change.
pub struct ModuleManager {
    modules: Vec<ModuleEntry>,
    dispatch: [Vec<usize>; PhaseId::ALL.len()],
    removed: Vec<String>,
}

impl Default for ModuleManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleManager {
    pub fn new() -> Self {
        Self {
            modules: Vec::new(),
            dispatch: std::array::from_fn(|_| Vec::new()),
            removed: Vec::new(),
        }
    }

    /// Adds a module and calls its `on_attached`.
    ///
    /// Fails with `InvalidArgument` when the name is taken, the module
    /// declares no phases, or it claims an engine-only phase.
    pub fn register_module(&mut self, mut module: Box<dyn EngineModule>) -> Result<(), EngineError> {
        let name = module.name().to_string();
        let phases = module.supported_phases();
        if name.is_empty() {
            return Err(EngineError::InvalidArgument("module name is empty".to_string()));
        }
        if self.contains(&name) {
            return Err(EngineError::InvalidArgument(format!(
                "module '{name}' is already registered"
            )));
        }
        if phases.is_empty() {
            return Err(EngineError::InvalidArgument(format!(
                "module '{name}' declares no supported phases"
            )));
        }
        if phases.intersects(PhaseMask::ENGINE_ONLY) {
            let claimed: Vec<_> = (phases & PhaseMask::ENGINE_ONLY).phases().map(PhaseId::name).collect();
            return Err(EngineError::InvalidArgument(format!(
                "module '{name}' claims engine-only phases {claimed:?}"
            )));
        }
        module.on_attached().map_err(|err| {
            EngineError::InvalidArgument(format!("module '{name}' failed to attach: {err}"))
        })?;

        let priority = module.priority();
        let entry = ModuleEntry {
            name,
            priority,
            phases,
            critical: module.is_critical(),
            module,
        };
        log::info!(
            "ModuleManager: registered '{}' (priority {}, critical {}, phases {:?})",
            entry.name,
            entry.priority,
            entry.critical,
            entry.phases.phases().map(PhaseId::name).collect::<Vec<_>>()
        );
        let at = self.modules.partition_point(|m| m.priority <= priority);
        self.modules.insert(at, entry);
        self.rebuild_dispatch();
        Ok(())
    }

    /// Removes a module and calls its `on_shutdown`.
    pub fn unregister_module(&mut self, name: &str) -> Result<(), EngineError> {
        let Some(index) = self.modules.iter().position(|m| m.name == name) else {
            return Err(EngineError::NotFound(format!("module '{name}'")));
        };
        let mut entry = self.modules.remove(index);
        self.rebuild_dispatch();
        Self::shutdown_entry(&mut entry);
        log::info!("ModuleManager: unregistered '{name}'");
        Ok(())
    }

    /// Shuts every module down, last registered priority first.
    pub fn shutdown_all(&mut self) {
        while let Some(mut entry) = self.modules.pop() {
            Self::shutdown_entry(&mut entry);
        }
        self.rebuild_dispatch();
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.iter().any(|m| m.name == name)
    }

    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    /// Module names dispatched for `phase`, in call order.
    pub fn modules_for(&self, phase: PhaseId) -> Vec<&str> {
        self.dispatch[phase as usize]
            .iter()
            .map(|&i| self.modules[i].name.as_str())
            .collect()
    }

    /// Names of modules removed after a failure, oldest first.
    pub fn removed_modules(&self) -> &[String] {
        &self.removed
    }

    /// Runs every handler of an ordered, async or detached phase.
    ///
    /// A failed non-critical module is unregistered once the phase ends.
    /// A critical failure returns immediately with
    /// [`EngineError::CriticalModule`]; a handler that observed cancellation
    /// ends the phase with [`EngineError::Cancelled`].
    pub async fn run_phase(&mut self, phase: PhaseId, ctx: &mut FrameContext) -> Result<(), EngineError> {
        if phase.kind() == PhaseKind::Parallel {
            oxygen_core::contract_violation!(
                EngineError::InvalidArgument(format!("{phase} must run through run_parallel")),
                "{phase} dispatched as a sequential phase"
            );
        }

        let order = self.dispatch[phase as usize].clone();
        let mut failed = Vec::new();
        let mut outcome = Ok(());
        for index in order {
            let entry = &mut self.modules[index];
            ctx.begin_module(&entry.name);
            let result = match phase.kind() {
                PhaseKind::Ordered => {
                    let module = &mut entry.module;
                    let ctx_ref = &mut *ctx;
                    catch_unwind(AssertUnwindSafe(move || call_ordered(module, phase, ctx_ref)))
                        .unwrap_or_else(|payload| Err(ModuleError::Panicked(panic_message(&payload))))
                }
                _ => {
                    let module = &mut entry.module;
                    let ctx_ref = &mut *ctx;
                    match catch_unwind(AssertUnwindSafe(move || {
                        let (module, ctx_ref) = (module, ctx_ref);
                        call_async(module, phase, ctx_ref)
                    })) {
                        Ok(co) => catch_panic(co)
                            .await
                            .unwrap_or_else(|payload| Err(ModuleError::Panicked(panic_message(&payload)))),
                        Err(payload) => Err(ModuleError::Panicked(panic_message(&payload))),
                    }
                }
            };
            let reported = ctx.end_module();
            let error = match result {
                Err(err) => Some(err),
                Ok(()) => reported.into_iter().next(),
            };
            let Some(error) = error else {
                continue;
            };

            if error == ModuleError::Cancelled {
                log::debug!("ModuleManager: '{}' observed cancellation in {phase}", entry.name);
                outcome = Err(EngineError::Cancelled);
                break;
            }
            if entry.critical {
                log::error!("ModuleManager: critical module '{}' failed in {phase}: {error}", entry.name);
                outcome = Err(EngineError::CriticalModule {
                    module: entry.name.clone(),
                    phase,
                    source: error,
                });
                break;
            }
            log::warn!(
                "ModuleManager: module '{}' failed in {phase} and will be removed: {error}",
                entry.name
            );
            failed.push(entry.name.clone());
        }

        self.remove_failed(failed);
        outcome
    }

    /// Fans `on_parallel_tasks` out to `pool` with the frozen snapshot.
    pub fn run_parallel(&mut self, pool: &ThreadPool, snapshot: &UnifiedSnapshot) -> Result<(), EngineError> {
        let order = self.dispatch[PhaseId::ParallelTasks as usize].clone();
        if order.is_empty() {
            return Ok(());
        }
        let modules: Vec<&dyn EngineModule> = order.iter().map(|&i| self.modules[i].module.as_ref()).collect();
        let results: Vec<ModuleResult> = pool.map(&modules, |module| {
            catch_unwind(AssertUnwindSafe(|| module.on_parallel_tasks(snapshot)))
                .unwrap_or_else(|payload| Err(ModuleError::Panicked(panic_message(&payload))))
        });

        let mut failed = Vec::new();
        let mut outcome = Ok(());
        for (index, result) in order.into_iter().zip(results) {
            let Err(error) = result else {
                continue;
            };
            let entry = &self.modules[index];
            if entry.critical {
                log::error!(
                    "ModuleManager: critical module '{}' failed in ParallelTasks: {error}",
                    entry.name
                );
                if outcome.is_ok() {
                    outcome = Err(EngineError::CriticalModule {
                        module: entry.name.clone(),
                        phase: PhaseId::ParallelTasks,
                        source: error,
                    });
                }
            } else {
                log::warn!(
                    "ModuleManager: module '{}' failed in ParallelTasks and will be removed: {error}",
                    entry.name
                );
                failed.push(entry.name.clone());
            }
        }
        self.remove_failed(failed);
        outcome
    }

    fn remove_failed(&mut self, failed: Vec<String>) {
        for name in failed {
            if self.unregister_module(&name).is_ok() {
                self.removed.push(name);
            }
        }
    }

    fn rebuild_dispatch(&mut self) {
        for list in &mut self.dispatch {
            list.clear();
        }
        for (index, entry) in self.modules.iter().enumerate() {
            for phase in entry.phases.phases() {
                self.dispatch[phase as usize].push(index);
            }
        }
    }

    fn shutdown_entry(entry: &mut ModuleEntry) {
        if catch_unwind(AssertUnwindSafe(|| entry.module.on_shutdown())).is_err() {
            log::error!("ModuleManager: '{}' panicked in on_shutdown", entry.name);
        }
    }
}

impl std::fmt::Debug for ModuleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleManager")
            .field("modules", &self.modules.iter().map(|m| m.name.as_str()).collect::<Vec<_>>())
            .field("removed", &self.removed)
            .finish()
    }
}

fn call_ordered(module: &mut Box<dyn EngineModule>, phase: PhaseId, ctx: &mut FrameContext) -> ModuleResult {
    match phase {
        PhaseId::FrameStart => module.on_frame_start(ctx),
        PhaseId::FixedSim => module.on_fixed_simulation(ctx),
        PhaseId::Snapshot => module.on_snapshot(ctx),
        PhaseId::PostParallel => module.on_post_parallel(ctx),
        PhaseId::AsyncPoll => module.on_async_poll(ctx),
        PhaseId::FrameEnd => module.on_frame_end(ctx),
        _ => Ok(()),
    }
}

fn call_async<'a>(
    module: &'a mut Box<dyn EngineModule>,
    phase: PhaseId,
    ctx: &'a mut FrameContext,
) -> Co<'a, ModuleResult> {
    match phase {
        PhaseId::Input => module.on_input(ctx),
        PhaseId::Gameplay => module.on_gameplay(ctx),
        PhaseId::SceneMutation => module.on_scene_mutation(ctx),
        PhaseId::TransformPropagation => module.on_transform_propagation(ctx),
        PhaseId::FrameGraph => module.on_frame_graph(ctx),
        PhaseId::CommandRecord => module.on_command_record(ctx),
        PhaseId::DetachedService => module.on_detached_service(),
        _ => oxygen_core::compute::ready(Ok(())),
    }
}
