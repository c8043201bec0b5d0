//! Per-frame state shared with module handlers.

use std::sync::Arc;

use oxygen_core::compute::{CancellationToken, Checkpoint};
use oxygen_core::input::InputSnapshot;
use oxygen_core::{FrameIdentity, SequenceNumber, Slot};
use oxygen_graphics::{FrameReport, ViewRequest};
use oxygen_scene::Scene;

use crate::error::ModuleError;
use crate::phase::PhaseId;
use crate::snapshot::{SnapshotBuilder, UnifiedSnapshot};

/// CPU time accounting of the frame loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameBudget {
    /// Target CPU time per frame.
    pub target_ms: f32,
    /// CPU time of the last completed frame.
    pub last_frame_ms: f32,
    /// Exponential average of frame CPU time.
    pub average_ms: f32,
    /// Consecutive frames over target.
    pub over_budget_frames: u32,
}

impl FrameBudget {
    pub fn new(target_ms: f32) -> Self {
        Self {
            target_ms,
            last_frame_ms: 0.0,
            average_ms: 0.0,
            over_budget_frames: 0,
        }
    }

    pub(crate) fn record(&mut self, frame_ms: f32) {
        self.last_frame_ms = frame_ms;
        self.average_ms = if self.average_ms == 0.0 {
            frame_ms
        } else {
            self.average_ms * 0.9 + frame_ms * 0.1
        };
        if frame_ms > self.target_ms {
            self.over_budget_frames += 1;
        } else {
            self.over_budget_frames = 0;
        }
    }

    pub fn is_over_budget(&self) -> bool {
        self.over_budget_frames > 0
    }
}

/// Frame state passed to every module handler.
///
/// The scene may only be mutated during [`PhaseId::SceneMutation`]; after
/// the snapshot phase, parallel tasks read the published
/// [`UnifiedSnapshot`] instead of this context.
pub struct FrameContext {
    frame: FrameIdentity,
    delta_seconds: f32,
    elapsed_seconds: f64,
    random_seed: u64,
    scene: Scene,
    input: InputSnapshot,
    snapshot_builder: SnapshotBuilder,
    snapshot: Option<Arc<UnifiedSnapshot>>,
    views: Vec<ViewRequest>,
    frame_report: Option<FrameReport>,
    phase: Option<PhaseId>,
    module: Option<String>,
    reported: Vec<ModuleError>,
    cancellation: CancellationToken,
    stop_requested: bool,
    budget: FrameBudget,
}

impl FrameContext {
    pub(crate) fn new(scene: Scene, frames_in_flight: u32, cancellation: CancellationToken, budget: FrameBudget) -> Self {
        Self {
            frame: FrameIdentity::initial(frames_in_flight),
            delta_seconds: 0.0,
            elapsed_seconds: 0.0,
            random_seed: 0,
            scene,
            input: InputSnapshot::default(),
            snapshot_builder: SnapshotBuilder::default(),
            snapshot: None,
            views: Vec::new(),
            frame_report: None,
            phase: None,
            module: None,
            reported: Vec::new(),
            cancellation,
            stop_requested: false,
            budget,
        }
    }

    pub fn frame(&self) -> FrameIdentity {
        self.frame
    }

    pub fn sequence(&self) -> SequenceNumber {
        self.frame.sequence
    }

    pub fn slot(&self) -> Slot {
        self.frame.slot
    }

    pub fn delta_seconds(&self) -> f32 {
        self.delta_seconds
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.elapsed_seconds
    }

    /// Deterministic seed of this frame.
    pub fn random_seed(&self) -> u64 {
        self.random_seed
    }

    pub fn current_phase(&self) -> Option<PhaseId> {
        self.phase
    }

    /// Name of the module whose handler is running.
    pub fn current_module(&self) -> Option<&str> {
        self.module.as_deref()
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    /// Mutable scene access, granted during the scene mutation phase only.
    pub fn scene_mut(&mut self) -> Result<&mut Scene, ModuleError> {
        match self.phase {
            Some(PhaseId::SceneMutation) | None => Ok(&mut self.scene),
            Some(phase) => Err(ModuleError::Failed(format!(
                "scene mutation is not allowed during {phase}"
            ))),
        }
    }

    pub fn input(&self) -> &InputSnapshot {
        &self.input
    }

    /// Publishes this frame's input, during the input phase only.
    pub fn set_input(&mut self, input: InputSnapshot) -> Result<(), ModuleError> {
        match self.phase {
            Some(PhaseId::Input) | None => {
                self.input = input;
                Ok(())
            }
            Some(phase) => Err(ModuleError::Failed(format!(
                "input can only be published during Input, not {phase}"
            ))),
        }
    }

    pub fn snapshot_builder(&mut self) -> &mut SnapshotBuilder {
        &mut self.snapshot_builder
    }

    /// Snapshot published at the end of this frame's snapshot phase.
    pub fn snapshot(&self) -> Option<&Arc<UnifiedSnapshot>> {
        self.snapshot.as_ref()
    }

    /// Requests a view to be rendered this frame.
    pub fn add_view(&mut self, view: ViewRequest) {
        if let Some(existing) = self.views.iter_mut().find(|v| v.id == view.id) {
            *existing = view;
        } else {
            self.views.push(view);
        }
    }

    pub fn views(&self) -> &[ViewRequest] {
        &self.views
    }

    pub fn frame_report(&self) -> Option<&FrameReport> {
        self.frame_report.as_ref()
    }

    pub fn set_frame_report(&mut self, report: FrameReport) {
        self.frame_report = Some(report);
    }

    /// Reports a failure of the running module without returning early.
    ///
    /// The module manager treats it like an `Err` returned by the handler.
    pub fn report_error(&mut self, error: impl Into<ModuleError>) {
        let error = error.into();
        log::warn!(
            "FrameContext: {} reported an error in {:?}: {error}",
            self.module.as_deref().unwrap_or("engine"),
            self.phase
        );
        self.reported.push(error);
    }

    /// Ends the frame loop after the current frame.
    pub fn request_stop(&mut self) {
        self.stop_requested = true;
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Await point that fails once the frame loop is stopped.
    pub fn checkpoint(&self) -> Checkpoint {
        self.cancellation.checkpoint()
    }

    pub fn budget(&self) -> &FrameBudget {
        &self.budget
    }

    pub(crate) fn begin_frame(&mut self, frame: FrameIdentity, delta_seconds: f32, elapsed_seconds: f64) {
        self.frame = frame;
        self.delta_seconds = delta_seconds;
        self.elapsed_seconds = elapsed_seconds;
        self.snapshot = None;
        self.snapshot_builder = SnapshotBuilder::default();
        self.views.clear();
        self.frame_report = None;
        self.reported.clear();
        self.phase = None;
        self.module = None;
    }

    pub(crate) fn replace_input(&mut self, input: InputSnapshot) {
        self.input = input;
    }

    pub(crate) fn set_random_seed(&mut self, seed: u64) {
        self.random_seed = seed;
    }

    pub(crate) fn enter_phase(&mut self, phase: Option<PhaseId>) {
        self.phase = phase;
    }

    pub(crate) fn begin_module(&mut self, name: &str) {
        self.module = Some(name.to_string());
        self.reported.clear();
    }

    /// Errors reported by the module that just finished.
    pub(crate) fn end_module(&mut self) -> Vec<ModuleError> {
        self.module = None;
        std::mem::take(&mut self.reported)
    }

    pub(crate) fn publish_snapshot(&mut self) -> Arc<UnifiedSnapshot> {
        let snapshot = self.snapshot_builder.build(
            self.frame,
            self.delta_seconds,
            self.elapsed_seconds,
            self.random_seed,
            &self.input,
            &self.scene,
        );
        self.snapshot = Some(Arc::clone(&snapshot));
        snapshot
    }

    pub(crate) fn scene_for_engine(&mut self) -> &mut Scene {
        &mut self.scene
    }

    pub(crate) fn budget_mut(&mut self) -> &mut FrameBudget {
        &mut self.budget
    }
}

impl std::fmt::Debug for FrameContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameContext")
            .field("frame", &self.frame)
            .field("phase", &self.phase)
            .field("module", &self.module)
            .field("views", &self.views.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> FrameContext {
        FrameContext::new(Scene::new("ctx"), 3, CancellationToken::new(), FrameBudget::new(16.0))
    }

    #[test]
    fn test_scene_mutation_is_phase_gated() {
        let mut ctx = context();
        ctx.enter_phase(Some(PhaseId::SceneMutation));
        assert!(ctx.scene_mut().is_ok());
        ctx.enter_phase(Some(PhaseId::Gameplay));
        assert!(ctx.scene_mut().is_err());
        assert!(ctx.set_input(InputSnapshot::new()).is_err());
    }

    #[test]
    fn test_reported_errors_belong_to_the_running_module() {
        let mut ctx = context();
        ctx.begin_module("first");
        ctx.report_error(ModuleError::failed("bad"));
        assert_eq!(ctx.end_module(), vec![ModuleError::failed("bad")]);
        ctx.begin_module("second");
        assert!(ctx.end_module().is_empty());
    }

    #[test]
    fn test_budget_tracks_overruns() {
        let mut budget = FrameBudget::new(10.0);
        budget.record(12.0);
        budget.record(14.0);
        assert_eq!(budget.over_budget_frames, 2);
        budget.record(5.0);
        assert!(!budget.is_over_budget());
        assert!(budget.average_ms > 5.0);
    }
}
