//! Scene nodes and node flags.

use bitflags::bitflags;
use slotmap::new_key_type;

use crate::component::{Component, Composition};
use crate::transform::TransformComponent;

new_key_type! {
    /// Handle into the scene's node table.
    pub struct NodeHandle;
}

bitflags! {
    /// Per-node flags. The effective value of a flag is the AND of the
    /// node's own value and every ancestor's.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct NodeFlags: u32 {
        const VISIBLE = 1 << 0;
        const CASTS_SHADOWS = 1 << 1;
        const RECEIVES_SHADOWS = 1 << 2;
        const SELECTABLE = 1 << 3;
    }
}

impl Default for NodeFlags {
    fn default() -> Self {
        Self::all()
    }
}

/// One node of the scene tree.
///
/// Parents own children through the scene table; the parent link is a
/// plain handle resolved through the same table.
#[derive(Debug)]
pub struct SceneNode {
    name: String,
    pub(crate) parent: Option<NodeHandle>,
    pub(crate) children: Vec<NodeHandle>,
    flags: NodeFlags,
    pub(crate) transform: TransformComponent,
    components: Composition,
}

impl SceneNode {
    pub(crate) fn new(name: String) -> Self {
        Self {
            name,
            parent: None,
            children: Vec::new(),
            flags: NodeFlags::default(),
            transform: TransformComponent::default(),
            components: Composition::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn parent(&self) -> Option<NodeHandle> {
        self.parent
    }

    pub fn children(&self) -> &[NodeHandle] {
        &self.children
    }

    /// The node's own flags (not the effective value).
    pub fn flags(&self) -> NodeFlags {
        self.flags
    }

    pub fn set_flags(&mut self, flags: NodeFlags) {
        self.flags = flags;
    }

    pub fn set_flag(&mut self, flag: NodeFlags, value: bool) {
        self.flags.set(flag, value);
    }

    pub fn transform(&self) -> &TransformComponent {
        &self.transform
    }

    pub fn transform_mut(&mut self) -> &mut TransformComponent {
        &mut self.transform
    }

    pub fn components(&self) -> &Composition {
        &self.components
    }

    pub fn components_mut(&mut self) -> &mut Composition {
        &mut self.components
    }

    pub fn get<T: Component>(&self) -> Option<&T> {
        self.components.get::<T>()
    }

    pub fn get_mut<T: Component>(&mut self) -> Option<&mut T> {
        self.components.get_mut::<T>()
    }
}
