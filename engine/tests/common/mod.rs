//! Shared modules and helpers for frame loop tests.

#![allow(dead_code)]

use std::sync::Arc;

use oxygen_core::compute::{Co, co};
use oxygen_engine::{EngineModule, FrameContext, ModuleError, ModulePriority, ModuleResult, PhaseId, PhaseMask};
use parking_lot::Mutex;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// `(module, phase, sequence)` triples in call order.
pub type CallLog = Arc<Mutex<Vec<(String, PhaseId, u64)>>>;

pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Calls of `phase` recorded in `log`, as sequence numbers.
pub fn sequences(log: &CallLog, module: &str, phase: PhaseId) -> Vec<u64> {
    log.lock()
        .iter()
        .filter(|(m, p, _)| m == module && *p == phase)
        .map(|(_, _, s)| *s)
        .collect()
}

/// Module that records every handler call and can fail on demand.
pub struct RecordingModule {
    name: String,
    phases: PhaseMask,
    priority: u32,
    critical: bool,
    log: CallLog,
    fail_at: Option<(PhaseId, u64)>,
    stop_at: Option<u64>,
}

impl RecordingModule {
    pub fn new(name: &str, phases: PhaseMask, log: &CallLog) -> Self {
        Self {
            name: name.to_string(),
            phases,
            priority: ModulePriority::NORMAL.get(),
            critical: false,
            log: log.clone(),
            fail_at: None,
            stop_at: None,
        }
    }

    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Fails `phase` on frame `sequence`.
    pub fn failing_at(mut self, phase: PhaseId, sequence: u64) -> Self {
        self.fail_at = Some((phase, sequence));
        self
    }

    /// Requests a stop during frame end of `sequence`.
    pub fn stopping_at(mut self, sequence: u64) -> Self {
        self.stop_at = Some(sequence);
        self
    }

    fn record(&self, phase: PhaseId, ctx: &mut FrameContext) -> ModuleResult {
        let sequence = ctx.sequence().get();
        self.log.lock().push((self.name.clone(), phase, sequence));
        if self.fail_at == Some((phase, sequence)) {
            return Err(ModuleError::failed(format!("{} failed on purpose", self.name)));
        }
        if phase == PhaseId::FrameEnd && self.stop_at == Some(sequence) {
            ctx.request_stop();
        }
        Ok(())
    }
}

impl EngineModule for RecordingModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> ModulePriority {
        ModulePriority::new(self.priority)
    }

    fn supported_phases(&self) -> PhaseMask {
        self.phases
    }

    fn is_critical(&self) -> bool {
        self.critical
    }

    fn on_frame_start(&mut self, ctx: &mut FrameContext) -> ModuleResult {
        self.record(PhaseId::FrameStart, ctx)
    }

    fn on_fixed_simulation(&mut self, ctx: &mut FrameContext) -> ModuleResult {
        self.record(PhaseId::FixedSim, ctx)
    }

    fn on_snapshot(&mut self, ctx: &mut FrameContext) -> ModuleResult {
        self.record(PhaseId::Snapshot, ctx)
    }

    fn on_post_parallel(&mut self, ctx: &mut FrameContext) -> ModuleResult {
        self.record(PhaseId::PostParallel, ctx)
    }

    fn on_async_poll(&mut self, ctx: &mut FrameContext) -> ModuleResult {
        self.record(PhaseId::AsyncPoll, ctx)
    }

    fn on_frame_end(&mut self, ctx: &mut FrameContext) -> ModuleResult {
        self.record(PhaseId::FrameEnd, ctx)
    }

    fn on_input<'a>(&'a mut self, ctx: &'a mut FrameContext) -> Co<'a, ModuleResult> {
        co(async move { self.record(PhaseId::Input, ctx) })
    }

    fn on_gameplay<'a>(&'a mut self, ctx: &'a mut FrameContext) -> Co<'a, ModuleResult> {
        co(async move {
            ctx.checkpoint().await?;
            self.record(PhaseId::Gameplay, ctx)
        })
    }

    fn on_scene_mutation<'a>(&'a mut self, ctx: &'a mut FrameContext) -> Co<'a, ModuleResult> {
        co(async move { self.record(PhaseId::SceneMutation, ctx) })
    }

    fn on_transform_propagation<'a>(&'a mut self, ctx: &'a mut FrameContext) -> Co<'a, ModuleResult> {
        co(async move { self.record(PhaseId::TransformPropagation, ctx) })
    }

    fn on_frame_graph<'a>(&'a mut self, ctx: &'a mut FrameContext) -> Co<'a, ModuleResult> {
        co(async move { self.record(PhaseId::FrameGraph, ctx) })
    }

    fn on_command_record<'a>(&'a mut self, ctx: &'a mut FrameContext) -> Co<'a, ModuleResult> {
        co(async move { self.record(PhaseId::CommandRecord, ctx) })
    }
}

/// Unique file path under the system temp directory.
pub fn temp_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("oxygen-engine-{}-{name}", std::process::id()))
}
