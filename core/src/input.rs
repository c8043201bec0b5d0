//! Frozen input state handed to the frame snapshot.
//!
//! The input system itself lives outside the core. It publishes an
//! [`InputSnapshot`] of named actions and axes once per frame during the
//! input phase; everything after that phase reads the snapshot only.

use std::collections::HashMap;

/// Per-frame state of a digital action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActionState {
    /// Went down this frame.
    pub pressed: bool,
    /// Is down (including the frame it was pressed).
    pub held: bool,
    /// Went up this frame.
    pub released: bool,
}

/// Immutable view of all actions and axes for one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputSnapshot {
    actions: HashMap<String, ActionState>,
    axes: HashMap<String, f32>,
}

impl InputSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_action(mut self, name: impl Into<String>, state: ActionState) -> Self {
        self.actions.insert(name.into(), state);
        self
    }

    pub fn with_axis(mut self, name: impl Into<String>, value: f32) -> Self {
        self.axes.insert(name.into(), value);
        self
    }

    pub fn action(&self, name: &str) -> ActionState {
        self.actions.get(name).copied().unwrap_or_default()
    }

    /// Axis value, `0.0` when the axis is unknown.
    pub fn axis(&self, name: &str) -> f32 {
        self.axes.get(name).copied().unwrap_or(0.0)
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty() && self.axes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_inputs_default() {
        let snapshot = InputSnapshot::new()
            .with_action(
                "jump",
                ActionState {
                    pressed: true,
                    held: true,
                    released: false,
                },
            )
            .with_axis("move_x", -0.5);
        assert!(snapshot.action("jump").pressed);
        assert_eq!(snapshot.action("fire"), ActionState::default());
        assert_eq!(snapshot.axis("move_x"), -0.5);
        assert_eq!(snapshot.axis("move_y"), 0.0);
    }
}
