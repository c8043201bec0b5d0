//! Frame loop, module failure and console policy tests.

mod common;

use std::sync::Arc;

use oxygen_core::AssetKey;
use oxygen_core::compute::{Co, co};
use oxygen_core::math::Vec3;
use oxygen_engine::{
    AsyncEngine, CVarDefinition, CVarValue, CommandSource, Console, ConsoleFlags, ConsolePolicy, EngineConfig,
    EngineError, EngineModule, FrameContext, ModuleError, ModuleResult, PhaseId, PhaseMask, RendererModule,
    UnifiedSnapshot,
};
use oxygen_graphics::{HeadlessBackend, NoTextureSource, ViewId, ViewRequest};
use oxygen_scene::{GeometryAsset, Mesh, PerspectiveCamera, RenderableComponent, Scene, TransformComponent};
use parking_lot::Mutex;
use rstest::rstest;

use common::{RecordingModule, call_log, init_logging, sequences, temp_path};

fn engine(config: EngineConfig) -> AsyncEngine {
    init_logging();
    AsyncEngine::new(config.with_fixed_delta_seconds(1.0 / 60.0), Scene::new("test")).unwrap()
}

#[test]
fn test_critical_module_sees_three_frames() {
    let log = call_log();
    let mut engine = engine(EngineConfig::default().with_max_frames(3));
    engine
        .register_module(Box::new(
            RecordingModule::new("core", PhaseMask::FRAME_START | PhaseMask::FRAME_END, &log).critical(),
        ))
        .unwrap();
    let completed = engine.completed();
    assert!(!completed.is_triggered());

    engine.run_blocking().unwrap();

    assert_eq!(sequences(&log, "core", PhaseId::FrameStart), [1, 2, 3]);
    assert_eq!(sequences(&log, "core", PhaseId::FrameEnd), [1, 2, 3]);
    assert!(completed.is_triggered());
    assert_eq!(engine.stats().frames_completed, 3);
}

#[test]
fn test_phases_run_in_declared_order() {
    let log = call_log();
    let mut engine = engine(EngineConfig::default().with_max_frames(1));
    let all = PhaseMask::all() - PhaseMask::ENGINE_ONLY - PhaseMask::PARALLEL_TASKS - PhaseMask::DETACHED_SERVICE;
    engine
        .register_module(Box::new(RecordingModule::new("all", all, &log)))
        .unwrap();
    engine.run_blocking().unwrap();

    let phases: Vec<PhaseId> = log.lock().iter().map(|(_, p, _)| *p).collect();
    let expected: Vec<PhaseId> = PhaseId::FRAME_ORDER.into_iter().filter(|p| all.contains(p.mask())).collect();
    assert_eq!(phases, expected);
}

#[test]
fn test_priority_orders_modules_within_a_phase() {
    let log = call_log();
    let mut engine = engine(EngineConfig::default().with_max_frames(1));
    for (name, priority) in [("c", 300), ("a", 100), ("b", 200)] {
        engine
            .register_module(Box::new(
                RecordingModule::new(name, PhaseMask::GAMEPLAY, &log).with_priority(priority),
            ))
            .unwrap();
    }
    engine.run_blocking().unwrap();

    let names: Vec<String> = log.lock().iter().map(|(m, _, _)| m.clone()).collect();
    assert_eq!(names, ["a", "b", "c"]);
}

#[rstest]
#[case::ordered(PhaseId::FrameStart)]
#[case::async_phase(PhaseId::Gameplay)]
fn test_non_critical_failure_unregisters_module(#[case] phase: PhaseId) {
    let log = call_log();
    let mut engine = engine(EngineConfig::default().with_max_frames(3));
    engine
        .register_module(Box::new(
            RecordingModule::new("flaky", phase.mask() | PhaseMask::FRAME_END, &log).failing_at(phase, 2),
        ))
        .unwrap();
    engine
        .register_module(Box::new(RecordingModule::new("steady", PhaseMask::FRAME_END, &log)))
        .unwrap();

    engine.run_blocking().unwrap();

    assert_eq!(sequences(&log, "flaky", PhaseId::FrameEnd), [1]);
    assert_eq!(sequences(&log, "steady", PhaseId::FrameEnd), [1, 2, 3]);
    assert!(!engine.modules().contains("flaky"));
    let stats = engine.stats();
    assert_eq!(stats.modules_removed, 1);
    assert_eq!(stats.frames_completed, 3);
}

#[test]
fn test_critical_failure_skips_frame_and_continues() {
    let log = call_log();
    let mut engine = engine(
        EngineConfig::default()
            .with_max_frames(3)
            .with_stop_on_critical_error(false),
    );
    engine
        .register_module(Box::new(
            RecordingModule::new("core", PhaseMask::GAMEPLAY | PhaseMask::FRAME_END, &log)
                .critical()
                .failing_at(PhaseId::Gameplay, 2),
        ))
        .unwrap();

    engine.run_blocking().unwrap();

    assert_eq!(sequences(&log, "core", PhaseId::Gameplay), [1, 2, 3]);
    assert_eq!(sequences(&log, "core", PhaseId::FrameEnd), [1, 3]);
    let stats = engine.stats();
    assert_eq!(stats.frames_skipped, 1);
    assert_eq!(stats.frames_presented, 2);
    assert_eq!(engine.frame().sequence.get(), 3);
    assert!(matches!(
        stats.last_error,
        Some(EngineError::CriticalModule { phase: PhaseId::Gameplay, .. })
    ));
    assert!(engine.modules().contains("core"));
}

#[test]
fn test_critical_failure_surfaces_from_run() {
    let log = call_log();
    let mut engine = engine(EngineConfig::default().with_max_frames(5));
    engine
        .register_module(Box::new(
            RecordingModule::new("core", PhaseMask::FIXED_SIM, &log)
                .critical()
                .failing_at(PhaseId::FixedSim, 2),
        ))
        .unwrap();

    let err = engine.run_blocking().unwrap_err();

    assert!(matches!(err, EngineError::CriticalModule { ref module, .. } if module == "core"));
    assert!(engine.completed().is_triggered());
    assert_eq!(engine.stats().frames_started, 2);
}

#[test]
fn test_module_can_request_stop() {
    let log = call_log();
    let mut engine = engine(EngineConfig::default());
    engine
        .register_module(Box::new(
            RecordingModule::new("quit", PhaseMask::FRAME_END, &log).stopping_at(2),
        ))
        .unwrap();
    engine.run_blocking().unwrap();
    assert_eq!(sequences(&log, "quit", PhaseId::FrameEnd), [1, 2]);
}

// ---------------------------------------------------------------------------
// Scene access and snapshots
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
struct SpawnedCount(usize);

struct Spawner {
    parallel_seen: Arc<Mutex<Vec<(u64, usize, usize)>>>,
}

impl EngineModule for Spawner {
    fn name(&self) -> &str {
        "spawner"
    }

    fn supported_phases(&self) -> PhaseMask {
        PhaseMask::SCENE_MUTATION | PhaseMask::SNAPSHOT | PhaseMask::PARALLEL_TASKS
    }

    fn is_critical(&self) -> bool {
        true
    }

    fn on_scene_mutation<'a>(&'a mut self, ctx: &'a mut FrameContext) -> Co<'a, ModuleResult> {
        co(async move {
            let name = format!("spawned{}", ctx.sequence());
            let scene = ctx.scene_mut()?;
            let node = scene.create_node(name);
            if let Some(node) = scene.node_mut(node) {
                *node.transform_mut() = TransformComponent::from_position(Vec3::new(1.0, 0.0, 0.0));
            }
            Ok(())
        })
    }

    fn on_snapshot(&mut self, ctx: &mut FrameContext) -> ModuleResult {
        let count = ctx.scene().node_count();
        ctx.snapshot_builder().insert(SpawnedCount(count));
        Ok(())
    }

    fn on_parallel_tasks(&self, snapshot: &UnifiedSnapshot) -> ModuleResult {
        let count = snapshot
            .get::<SpawnedCount>()
            .ok_or_else(|| ModuleError::failed("snapshot is missing the spawn count"))?;
        self.parallel_seen
            .lock()
            .push((snapshot.frame().sequence.get(), count.0, snapshot.nodes().len()));
        Ok(())
    }
}

#[test]
fn test_parallel_tasks_read_the_published_snapshot() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut engine = engine(EngineConfig::default().with_max_frames(2).with_parallel_workers(2));
    engine
        .register_module(Box::new(Spawner {
            parallel_seen: seen.clone(),
        }))
        .unwrap();

    engine.run_blocking().unwrap();

    assert_eq!(*seen.lock(), [(1, 1, 1), (2, 2, 2)]);
    let snapshot = engine.context().snapshot().unwrap();
    assert!(snapshot.nodes().iter().all(|n| n.world[(0, 3)] == 1.0));
}

struct Trespasser;

impl EngineModule for Trespasser {
    fn name(&self) -> &str {
        "trespasser"
    }

    fn supported_phases(&self) -> PhaseMask {
        PhaseMask::GAMEPLAY
    }

    fn on_gameplay<'a>(&'a mut self, ctx: &'a mut FrameContext) -> Co<'a, ModuleResult> {
        co(async move {
            if let Err(err) = ctx.scene_mut() {
                ctx.report_error(err);
            }
            Ok(())
        })
    }
}

#[test]
fn test_scene_mutation_outside_its_phase_is_reported() {
    let mut engine = engine(EngineConfig::default().with_max_frames(2));
    engine.register_module(Box::new(Trespasser)).unwrap();
    engine.run_blocking().unwrap();
    assert_eq!(engine.modules().removed_modules(), ["trespasser"]);
    assert_eq!(engine.scene().node_count(), 0);
}

#[test]
fn test_engine_only_phase_claims_are_rejected() {
    let log = call_log();
    let mut engine = engine(EngineConfig::default());
    let err = engine
        .register_module(Box::new(RecordingModule::new(
            "seed",
            PhaseMask::RANDOM_SEED_MANAGEMENT,
            &log,
        )))
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidArgument(_)));
}

// ---------------------------------------------------------------------------
// Renderer module
// ---------------------------------------------------------------------------

#[test]
fn test_renderer_module_draws_requested_views() {
    let mut engine = engine(EngineConfig::default().with_max_frames(3));
    engine
        .attach_renderer(Arc::new(HeadlessBackend::new()), Box::new(NoTextureSource))
        .unwrap();

    let geometry = Arc::new(GeometryAsset::new(
        AssetKey::from_u64(11),
        "cube",
        vec![Arc::new(Mesh::cube("cube", 1.0, None))],
    ));
    let scene = engine.scene_mut();
    let node = scene.create_node("cube");
    scene.add_component(node, RenderableComponent::new(geometry)).unwrap();
    scene.update_transforms();
    engine.add_view(ViewRequest::new(
        ViewId::new(0),
        PerspectiveCamera::looking_at(Vec3::new(0.0, 0.0, 5.0), Vec3::zeros()),
        320,
        240,
    ));

    engine.run_blocking().unwrap();

    assert!(engine.modules().contains(RendererModule::NAME));
    let report = engine.context().frame_report().unwrap();
    assert_eq!(report.views, 1);
    assert!(report.draw_calls > 0);
    assert_eq!(engine.stats().frames_completed, 3);
    engine.shutdown();
    assert_eq!(engine.modules().module_count(), 0);
}

// ---------------------------------------------------------------------------
// Console
// ---------------------------------------------------------------------------

fn policy_console(shipping_build: bool) -> Console {
    let mut console = Console::new(ConsolePolicy {
        shipping_build,
        allow_cheats: false,
    });
    console
        .register_command("r.dump_targets", "lists render targets", ConsoleFlags::DEV_ONLY, |_| {
            Ok("dumped".to_string())
        })
        .unwrap();
    console
        .register_command("stat", "prints frame stats", ConsoleFlags::empty(), |_| Ok("ok".to_string()))
        .unwrap();
    console
}

#[rstest]
#[case::shipping(true)]
#[case::development(false)]
fn test_shipping_policy(#[case] shipping_build: bool) {
    let mut console = policy_console(shipping_build);

    let dev_only = console.execute("r.dump_targets", CommandSource::LocalConsole);
    let normal = console.execute("stat", CommandSource::LocalConsole);

    if shipping_build {
        assert!(matches!(dev_only, Err(EngineError::Denied(_))));
    } else {
        assert_eq!(dev_only.unwrap(), "dumped");
    }
    assert_eq!(normal.unwrap(), "ok");
}

#[test]
fn test_engine_console_follows_shipping_config() {
    let mut engine = engine(EngineConfig::default().with_shipping_build(true));
    let err = engine
        .console_mut()
        .execute("engine.shipping_build false", CommandSource::LocalConsole)
        .unwrap_err();
    assert!(matches!(err, EngineError::Denied(_)));
    assert!(engine.console().policy().shipping_build);
}

#[test]
fn test_archive_round_trip() {
    let path = temp_path("archive.toml");
    let define = |console: &mut Console| {
        console
            .register_cvar(
                CVarDefinition::new("r.gamma", CVarValue::Float(2.2))
                    .with_flags(ConsoleFlags::ARCHIVE)
                    .with_range(1.0, 3.0),
            )
            .unwrap();
        console
            .register_cvar(CVarDefinition::new("r.vsync", CVarValue::Bool(true)).with_flags(ConsoleFlags::ARCHIVE))
            .unwrap();
        console
            .register_cvar(CVarDefinition::new("net.peers", CVarValue::Int(4)))
            .unwrap();
    };

    let mut saved = Console::default();
    define(&mut saved);
    saved.execute("r.gamma 2.5", CommandSource::LocalConsole).unwrap();
    saved.execute("r.vsync off", CommandSource::LocalConsole).unwrap();
    saved.execute("net.peers 8", CommandSource::LocalConsole).unwrap();
    assert_eq!(saved.save_archive(&path).unwrap(), 2);

    let mut restored = Console::default();
    define(&mut restored);
    assert_eq!(restored.load_archive(&path).unwrap(), 2);
    assert_eq!(restored.cvar("r.gamma"), Some(&CVarValue::Float(2.5)));
    assert_eq!(restored.cvar("r.vsync"), Some(&CVarValue::Bool(false)));
    assert_eq!(restored.cvar("net.peers"), Some(&CVarValue::Int(4)));

    let _ = std::fs::remove_file(&path);
}

#[test]
fn test_missing_archive_is_an_io_error() {
    let mut console = Console::default();
    let err = console.load_archive(temp_path("missing.toml")).unwrap_err();
    assert!(matches!(err, EngineError::Io(_)));
}
