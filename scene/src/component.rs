//! Typed composition: at most one value per type.
//!
//! Nodes and the scene environment both hold a small bag of typed parts.
//! Adding a second value of a type fails; replacement is explicit and keyed
//! by type.

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;

use crate::SceneError;

/// Marker for values storable in a [`Composition`].
pub trait Component: Any + Send + Sync {}

impl<T: Any + Send + Sync> Component for T {}

#[derive(Default)]
pub struct Composition {
    parts: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Composition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches `value`; fails if a `T` is already present.
    pub fn add<T: Component>(&mut self, value: T) -> Result<&mut T, SceneError> {
        let id = TypeId::of::<T>();
        if self.parts.contains_key(&id) {
            return Err(SceneError::ComponentExists(type_name::<T>()));
        }
        let slot = self.parts.entry(id).or_insert_with(|| Box::new(value));
        slot.downcast_mut::<T>()
            .ok_or(SceneError::ComponentMissing(type_name::<T>()))
    }

    /// Removes the `Old` part and attaches `new` in its place.
    pub fn replace<Old: Component, New: Component>(&mut self, new: New) -> Result<Old, SceneError> {
        let old_id = TypeId::of::<Old>();
        let new_id = TypeId::of::<New>();
        if old_id != new_id && self.parts.contains_key(&new_id) {
            return Err(SceneError::ComponentExists(type_name::<New>()));
        }
        let old = self
            .parts
            .remove(&old_id)
            .ok_or(SceneError::ComponentMissing(type_name::<Old>()))?;
        self.parts.insert(new_id, Box::new(new));
        old.downcast::<Old>()
            .map(|b| *b)
            .map_err(|_| SceneError::ComponentMissing(type_name::<Old>()))
    }

    /// Inserts or overwrites the `T` part, returning the previous value.
    pub fn set<T: Component>(&mut self, value: T) -> Option<T> {
        self.parts
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|old| old.downcast::<T>().ok().map(|b| *b))
    }

    pub fn remove<T: Component>(&mut self) -> Option<T> {
        self.parts
            .remove(&TypeId::of::<T>())
            .and_then(|b| b.downcast::<T>().ok().map(|b| *b))
    }

    pub fn get<T: Component>(&self) -> Option<&T> {
        self.parts.get(&TypeId::of::<T>()).and_then(|b| b.downcast_ref::<T>())
    }

    pub fn get_mut<T: Component>(&mut self) -> Option<&mut T> {
        self.parts
            .get_mut(&TypeId::of::<T>())
            .and_then(|b| b.downcast_mut::<T>())
    }

    pub fn has<T: Component>(&self) -> bool {
        self.parts.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

impl std::fmt::Debug for Composition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Composition").field("parts", &self.parts.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Health(u32);
    #[derive(Debug, PartialEq)]
    struct Shield(u32);

    #[test]
    fn test_add_rejects_duplicates() {
        let mut c = Composition::new();
        c.add(Health(3)).unwrap();
        assert_eq!(c.add(Health(4)).unwrap_err(), SceneError::ComponentExists(type_name::<Health>()));
        assert_eq!(c.get::<Health>(), Some(&Health(3)));
    }

    #[test]
    fn test_replace_by_type() {
        let mut c = Composition::new();
        c.add(Health(3)).unwrap();
        let old = c.replace::<Health, Shield>(Shield(9)).unwrap();
        assert_eq!(old, Health(3));
        assert!(!c.has::<Health>());
        assert_eq!(c.get::<Shield>(), Some(&Shield(9)));
        assert!(c.replace::<Health, Shield>(Shield(1)).is_err());
    }

    #[test]
    fn test_set_and_remove() {
        let mut c = Composition::new();
        assert!(c.set(Health(1)).is_none());
        assert_eq!(c.set(Health(2)), Some(Health(1)));
        c.get_mut::<Health>().unwrap().0 = 5;
        assert_eq!(c.remove::<Health>(), Some(Health(5)));
        assert!(c.is_empty());
    }
}
