//! The scene: a node arena plus its environment.

use oxygen_core::math::Mat4;
use slotmap::SlotMap;

use crate::component::Component;
use crate::environment::SceneEnvironment;
use crate::node::{NodeFlags, NodeHandle, SceneNode};
use crate::renderable::RenderableComponent;
use crate::SceneError;

/// A tree of [`SceneNode`]s stored in a generational arena.
///
/// Mutation happens during the scene-mutation phase; transform propagation
/// ([`update_transforms`](Self::update_transforms)) then refreshes world
/// matrices top-down for dirty subtrees.
#[derive(Debug, Default)]
pub struct Scene {
    name: String,
    nodes: SlotMap<NodeHandle, SceneNode>,
    roots: Vec<NodeHandle>,
    environment: SceneEnvironment,
}

impl Scene {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // ========================================================================
    // Nodes
    // ========================================================================

    /// Creates a root node.
    pub fn create_node(&mut self, name: impl Into<String>) -> NodeHandle {
        let handle = self.nodes.insert(SceneNode::new(name.into()));
        self.roots.push(handle);
        handle
    }

    /// Creates a node under `parent`.
    pub fn create_child(
        &mut self,
        parent: NodeHandle,
        name: impl Into<String>,
    ) -> Result<NodeHandle, SceneError> {
        if !self.nodes.contains_key(parent) {
            return Err(SceneError::NodeNotFound(parent));
        }
        let mut node = SceneNode::new(name.into());
        node.parent = Some(parent);
        let handle = self.nodes.insert(node);
        if let Some(p) = self.nodes.get_mut(parent) {
            p.children.push(handle);
        }
        Ok(handle)
    }

    /// Destroys a node and its whole subtree. Returns the number removed.
    pub fn destroy_node(&mut self, handle: NodeHandle) -> Result<usize, SceneError> {
        let parent = self
            .nodes
            .get(handle)
            .ok_or(SceneError::NodeNotFound(handle))?
            .parent;
        self.detach(handle, parent);

        let mut removed = 0;
        let mut stack = vec![handle];
        while let Some(h) = stack.pop() {
            if let Some(node) = self.nodes.remove(h) {
                stack.extend(node.children);
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Moves `handle` under `new_parent` (or to the roots for `None`).
    ///
    /// The local transform is kept, so the world transform changes with the
    /// new parent.
    pub fn reparent(
        &mut self,
        handle: NodeHandle,
        new_parent: Option<NodeHandle>,
    ) -> Result<(), SceneError> {
        let old_parent = self
            .nodes
            .get(handle)
            .ok_or(SceneError::NodeNotFound(handle))?
            .parent;
        if let Some(p) = new_parent {
            if !self.nodes.contains_key(p) {
                return Err(SceneError::NodeNotFound(p));
            }
            if p == handle || self.is_ancestor(handle, p) {
                return Err(SceneError::InvalidHierarchy(format!(
                    "cannot parent {handle:?} under its own descendant {p:?}"
                )));
            }
        }

        self.detach(handle, old_parent);
        match new_parent {
            Some(p) => {
                if let Some(parent) = self.nodes.get_mut(p) {
                    parent.children.push(handle);
                }
            }
            None => self.roots.push(handle),
        }
        if let Some(node) = self.nodes.get_mut(handle) {
            node.parent = new_parent;
            node.transform.mark_dirty();
        }
        Ok(())
    }

    fn detach(&mut self, handle: NodeHandle, parent: Option<NodeHandle>) {
        match parent {
            Some(p) => {
                if let Some(parent) = self.nodes.get_mut(p) {
                    parent.children.retain(|c| *c != handle);
                }
            }
            None => self.roots.retain(|r| *r != handle),
        }
    }

    /// True if `ancestor` is on the parent chain of `node`.
    pub fn is_ancestor(&self, ancestor: NodeHandle, node: NodeHandle) -> bool {
        let mut current = self.nodes.get(node).and_then(|n| n.parent);
        while let Some(h) = current {
            if h == ancestor {
                return true;
            }
            current = self.nodes.get(h).and_then(|n| n.parent);
        }
        false
    }

    pub fn node(&self, handle: NodeHandle) -> Option<&SceneNode> {
        self.nodes.get(handle)
    }

    pub fn node_mut(&mut self, handle: NodeHandle) -> Option<&mut SceneNode> {
        self.nodes.get_mut(handle)
    }

    pub fn contains(&self, handle: NodeHandle) -> bool {
        self.nodes.contains_key(handle)
    }

    pub fn roots(&self) -> &[NodeHandle] {
        &self.roots
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// All nodes in table order (not hierarchy order).
    pub fn iter(&self) -> impl Iterator<Item = (NodeHandle, &SceneNode)> {
        self.nodes.iter()
    }

    /// Nodes in depth-first pre-order, parents before children.
    pub fn depth_first(&self) -> Vec<NodeHandle> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<NodeHandle> = self.roots.iter().rev().copied().collect();
        while let Some(h) = stack.pop() {
            if let Some(node) = self.nodes.get(h) {
                out.push(h);
                stack.extend(node.children.iter().rev().copied());
            }
        }
        out
    }

    /// Flags AND-ed over the node and all of its ancestors.
    pub fn effective_flags(&self, handle: NodeHandle) -> NodeFlags {
        let mut flags = NodeFlags::all();
        let mut current = Some(handle);
        while let Some(h) = current {
            match self.nodes.get(h) {
                Some(node) => {
                    flags &= node.flags();
                    current = node.parent;
                }
                None => return NodeFlags::empty(),
            }
        }
        flags
    }

    // ========================================================================
    // Components
    // ========================================================================

    pub fn add_component<T: Component>(
        &mut self,
        handle: NodeHandle,
        component: T,
    ) -> Result<&mut T, SceneError> {
        let node = self.nodes.get_mut(handle).ok_or(SceneError::NodeNotFound(handle))?;
        // New components observe the world matrix on the next propagation.
        node.transform_mut().mark_dirty();
        node.components_mut().add(component)
    }

    pub fn replace_component<Old: Component, New: Component>(
        &mut self,
        handle: NodeHandle,
        component: New,
    ) -> Result<Old, SceneError> {
        let node = self.nodes.get_mut(handle).ok_or(SceneError::NodeNotFound(handle))?;
        node.components_mut().replace::<Old, New>(component)
    }

    pub fn remove_component<T: Component>(&mut self, handle: NodeHandle) -> Option<T> {
        self.nodes.get_mut(handle)?.components_mut().remove::<T>()
    }

    pub fn component<T: Component>(&self, handle: NodeHandle) -> Option<&T> {
        self.nodes.get(handle)?.get::<T>()
    }

    pub fn component_mut<T: Component>(&mut self, handle: NodeHandle) -> Option<&mut T> {
        self.nodes.get_mut(handle)?.get_mut::<T>()
    }

    // ========================================================================
    // Transforms
    // ========================================================================

    /// Recomputes world matrices for dirty nodes and their descendants.
    ///
    /// Renderables on updated nodes are notified so their world bounds
    /// follow. Returns the number of nodes whose world matrix changed.
    pub fn update_transforms(&mut self) -> usize {
        oxygen_core::profile_scope!("scene_update_transforms");
        let mut updated = 0;
        let mut stack: Vec<(NodeHandle, Mat4, bool)> = self
            .roots
            .iter()
            .map(|r| (*r, Mat4::identity(), false))
            .collect();

        while let Some((handle, parent_world, parent_changed)) = stack.pop() {
            let Some(node) = self.nodes.get_mut(handle) else {
                continue;
            };
            let changed = parent_changed || node.transform.is_dirty();
            if changed {
                let world = *node.transform.update_world(&parent_world);
                if let Some(renderable) = node.get_mut::<RenderableComponent>() {
                    renderable.on_world_transform_updated(&world);
                }
                updated += 1;
            }
            let world = *node.transform.world_matrix();
            for child in &node.children {
                stack.push((*child, world, changed));
            }
        }
        updated
    }

    // ========================================================================
    // Environment
    // ========================================================================

    pub fn environment(&self) -> &SceneEnvironment {
        &self.environment
    }

    pub fn environment_mut(&mut self) -> &mut SceneEnvironment {
        &mut self.environment
    }
}
