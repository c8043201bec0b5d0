//! Read-only frame state handed to parallel tasks.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use oxygen_core::FrameIdentity;
use oxygen_core::input::InputSnapshot;
use oxygen_core::math::Mat4;
use oxygen_scene::{NodeFlags, NodeHandle, Scene};

/// World state of one node at snapshot time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeSnapshot {
    pub handle: NodeHandle,
    pub world: Mat4,
    /// Effective flags (ancestor chain applied).
    pub flags: NodeFlags,
}

/// Everything parallel tasks may read for one frame.
///
/// Built once at the end of the snapshot phase and never mutated
/// afterwards. Modules add their own data through
/// [`SnapshotBuilder::insert`] during the snapshot phase.
#[derive(Debug)]
pub struct UnifiedSnapshot {
    frame: FrameIdentity,
    delta_seconds: f32,
    elapsed_seconds: f64,
    random_seed: u64,
    input: InputSnapshot,
    nodes: Vec<NodeSnapshot>,
    extensions: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl UnifiedSnapshot {
    pub fn frame(&self) -> FrameIdentity {
        self.frame
    }

    pub fn delta_seconds(&self) -> f32 {
        self.delta_seconds
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.elapsed_seconds
    }

    pub fn random_seed(&self) -> u64 {
        self.random_seed
    }

    pub fn input(&self) -> &InputSnapshot {
        &self.input
    }

    pub fn nodes(&self) -> &[NodeSnapshot] {
        &self.nodes
    }

    pub fn node(&self, handle: NodeHandle) -> Option<&NodeSnapshot> {
        self.nodes.iter().find(|n| n.handle == handle)
    }

    /// Data a module contributed during the snapshot phase.
    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.extensions
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref())
    }
}

/// Collects module contributions until the engine publishes the snapshot.
#[derive(Default)]
pub struct SnapshotBuilder {
    extensions: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl SnapshotBuilder {
    /// Adds `value`, replacing an earlier value of the same type.
    pub fn insert<T: Any + Send + Sync>(&mut self, value: T) {
        self.extensions.insert(TypeId::of::<T>(), Box::new(value));
    }

    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    pub(crate) fn build(
        &mut self,
        frame: FrameIdentity,
        delta_seconds: f32,
        elapsed_seconds: f64,
        random_seed: u64,
        input: &InputSnapshot,
        scene: &Scene,
    ) -> Arc<UnifiedSnapshot> {
        oxygen_core::profile_scope!("publish_snapshot");
        let nodes = scene
            .iter()
            .map(|(handle, node)| NodeSnapshot {
                handle,
                world: *node.transform().world_matrix(),
                flags: scene.effective_flags(handle),
            })
            .collect();
        Arc::new(UnifiedSnapshot {
            frame,
            delta_seconds,
            elapsed_seconds,
            random_seed,
            input: input.clone(),
            nodes,
            extensions: std::mem::take(&mut self.extensions),
        })
    }
}

impl std::fmt::Debug for SnapshotBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotBuilder")
            .field("extensions", &self.extensions.len())
            .finish()
    }
}

static_assertions::assert_impl_all!(UnifiedSnapshot: Send, Sync);

#[cfg(test)]
mod tests {
    use oxygen_core::math::Vec3;
    use oxygen_scene::TransformComponent;

    use super::*;

    #[derive(Debug, PartialEq)]
    struct Score(u32);

    #[test]
    fn test_snapshot_captures_world_state_and_extensions() {
        let mut scene = Scene::new("snap");
        let node = scene.create_node("a");
        *scene.node_mut(node).unwrap().transform_mut() = TransformComponent::from_position(Vec3::new(1.0, 2.0, 3.0));
        scene.update_transforms();

        let mut builder = SnapshotBuilder::default();
        builder.insert(Score(7));
        let mut frame = FrameIdentity::initial(3);
        frame.advance();
        let input = InputSnapshot::new().with_axis("move_x", 0.5);
        let snapshot = builder.build(frame, 0.016, 1.0, 42, &input, &scene);

        assert!(builder.is_empty());
        assert_eq!(snapshot.get::<Score>(), Some(&Score(7)));
        assert_eq!(snapshot.input().axis("move_x"), 0.5);
        let captured = snapshot.node(node).unwrap();
        assert_eq!(captured.world[(0, 3)], 1.0);
        assert!(captured.flags.contains(NodeFlags::VISIBLE));
    }
}
