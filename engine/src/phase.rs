//! The closed set of frame phases.
//!
//! Every frame walks [`PhaseId::FRAME_ORDER`] once. Modules declare the
//! phases they handle with a [`PhaseMask`]; the engine owns the phases in
//! [`PhaseMask::ENGINE_ONLY`] itself and rejects modules that claim them.

use std::fmt;

use bitflags::bitflags;

/// One step of the frame pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PhaseId {
    FrameStart,
    Input,
    NetworkReconciliation,
    RandomSeedManagement,
    FixedSim,
    Gameplay,
    SceneMutation,
    TransformPropagation,
    Snapshot,
    ParallelTasks,
    PostParallel,
    FrameGraph,
    CommandRecord,
    Present,
    AsyncPoll,
    BudgetAdapt,
    FrameEnd,
    /// Long-running services started once with the frame loop.
    DetachedService,
}

/// How the engine invokes a phase's handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseKind {
    /// Inline on the frame thread, one module after another.
    Ordered,
    /// Coroutines awaited one module after another.
    Async,
    /// Fanned out to the thread pool with the frozen snapshot.
    Parallel,
    /// Not part of the per-frame walk.
    Detached,
}

impl PhaseId {
    /// Per-frame execution order. `DetachedService` is not part of it.
    pub const FRAME_ORDER: [PhaseId; 17] = [
        Self::FrameStart,
        Self::Input,
        Self::NetworkReconciliation,
        Self::RandomSeedManagement,
        Self::FixedSim,
        Self::Gameplay,
        Self::SceneMutation,
        Self::TransformPropagation,
        Self::Snapshot,
        Self::ParallelTasks,
        Self::PostParallel,
        Self::FrameGraph,
        Self::CommandRecord,
        Self::Present,
        Self::AsyncPoll,
        Self::BudgetAdapt,
        Self::FrameEnd,
    ];

    pub const ALL: [PhaseId; 18] = [
        Self::FrameStart,
        Self::Input,
        Self::NetworkReconciliation,
        Self::RandomSeedManagement,
        Self::FixedSim,
        Self::Gameplay,
        Self::SceneMutation,
        Self::TransformPropagation,
        Self::Snapshot,
        Self::ParallelTasks,
        Self::PostParallel,
        Self::FrameGraph,
        Self::CommandRecord,
        Self::Present,
        Self::AsyncPoll,
        Self::BudgetAdapt,
        Self::FrameEnd,
        Self::DetachedService,
    ];

    pub fn kind(self) -> PhaseKind {
        match self {
            Self::Input
            | Self::Gameplay
            | Self::SceneMutation
            | Self::TransformPropagation
            | Self::FrameGraph
            | Self::CommandRecord => PhaseKind::Async,
            Self::ParallelTasks => PhaseKind::Parallel,
            Self::DetachedService => PhaseKind::Detached,
            _ => PhaseKind::Ordered,
        }
    }

    pub fn mask(self) -> PhaseMask {
        PhaseMask::from_bits_retain(1 << self as u32)
    }

    pub fn is_engine_only(self) -> bool {
        PhaseMask::ENGINE_ONLY.contains(self.mask())
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::FrameStart => "FrameStart",
            Self::Input => "Input",
            Self::NetworkReconciliation => "NetworkReconciliation",
            Self::RandomSeedManagement => "RandomSeedManagement",
            Self::FixedSim => "FixedSim",
            Self::Gameplay => "Gameplay",
            Self::SceneMutation => "SceneMutation",
            Self::TransformPropagation => "TransformPropagation",
            Self::Snapshot => "Snapshot",
            Self::ParallelTasks => "ParallelTasks",
            Self::PostParallel => "PostParallel",
            Self::FrameGraph => "FrameGraph",
            Self::CommandRecord => "CommandRecord",
            Self::Present => "Present",
            Self::AsyncPoll => "AsyncPoll",
            Self::BudgetAdapt => "BudgetAdapt",
            Self::FrameEnd => "FrameEnd",
            Self::DetachedService => "DetachedService",
        }
    }
}

impl fmt::Display for PhaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

bitflags! {
    /// Set of phases a module handles.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PhaseMask: u32 {
        const FRAME_START = 1 << PhaseId::FrameStart as u32;
        const INPUT = 1 << PhaseId::Input as u32;
        const NETWORK_RECONCILIATION = 1 << PhaseId::NetworkReconciliation as u32;
        const RANDOM_SEED_MANAGEMENT = 1 << PhaseId::RandomSeedManagement as u32;
        const FIXED_SIM = 1 << PhaseId::FixedSim as u32;
        const GAMEPLAY = 1 << PhaseId::Gameplay as u32;
        const SCENE_MUTATION = 1 << PhaseId::SceneMutation as u32;
        const TRANSFORM_PROPAGATION = 1 << PhaseId::TransformPropagation as u32;
        const SNAPSHOT = 1 << PhaseId::Snapshot as u32;
        const PARALLEL_TASKS = 1 << PhaseId::ParallelTasks as u32;
        const POST_PARALLEL = 1 << PhaseId::PostParallel as u32;
        const FRAME_GRAPH = 1 << PhaseId::FrameGraph as u32;
        const COMMAND_RECORD = 1 << PhaseId::CommandRecord as u32;
        const PRESENT = 1 << PhaseId::Present as u32;
        const ASYNC_POLL = 1 << PhaseId::AsyncPoll as u32;
        const BUDGET_ADAPT = 1 << PhaseId::BudgetAdapt as u32;
        const FRAME_END = 1 << PhaseId::FrameEnd as u32;
        const DETACHED_SERVICE = 1 << PhaseId::DetachedService as u32;

        /// Phases run by the engine itself.
        const ENGINE_ONLY = Self::NETWORK_RECONCILIATION.bits()
            | Self::RANDOM_SEED_MANAGEMENT.bits()
            | Self::PRESENT.bits()
            | Self::BUDGET_ADAPT.bits();
    }
}

impl PhaseMask {
    /// Phases of the mask in execution order.
    pub fn phases(self) -> impl Iterator<Item = PhaseId> {
        PhaseId::ALL.into_iter().filter(move |p| self.contains(p.mask()))
    }
}

impl From<PhaseId> for PhaseMask {
    fn from(phase: PhaseId) -> Self {
        phase.mask()
    }
}

impl FromIterator<PhaseId> for PhaseMask {
    fn from_iter<I: IntoIterator<Item = PhaseId>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), |mask, p| mask | p.mask())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_order_is_declaration_order() {
        let mut sorted = PhaseId::FRAME_ORDER;
        sorted.sort();
        assert_eq!(sorted, PhaseId::FRAME_ORDER);
        assert!(!PhaseId::FRAME_ORDER.contains(&PhaseId::DetachedService));
    }

    #[test]
    fn test_engine_only_phases() {
        let engine_only: Vec<PhaseId> = PhaseId::ALL.into_iter().filter(|p| p.is_engine_only()).collect();
        assert_eq!(
            engine_only,
            [
                PhaseId::NetworkReconciliation,
                PhaseId::RandomSeedManagement,
                PhaseId::Present,
                PhaseId::BudgetAdapt
            ]
        );
    }

    #[test]
    fn test_mask_round_trips_through_phases() {
        let mask: PhaseMask = [PhaseId::FrameEnd, PhaseId::Input, PhaseId::CommandRecord]
            .into_iter()
            .collect();
        assert_eq!(
            mask.phases().collect::<Vec<_>>(),
            [PhaseId::Input, PhaseId::CommandRecord, PhaseId::FrameEnd]
        );
        assert_eq!(PhaseId::Snapshot.kind(), PhaseKind::Ordered);
        assert_eq!(PhaseId::Gameplay.kind(), PhaseKind::Async);
    }
}
