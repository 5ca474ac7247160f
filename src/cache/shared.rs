use std::sync::{Arc, Weak};

use dashmap::DashMap;

use crate::snowflake::Snowflake;

/// Two tier id keyed store.
///
/// `models` owns the authoritative record of every entity. `handles` is a fast
/// tier of weak shared handles: a lookup hands out the live `Arc` while any
/// caller still holds one, and rebuilds it from the model otherwise. Writing a
/// model always drops its handle so a later lookup never sees stale data.
///
/// Lock order is always `models` then `handles`.
#[derive(Debug)]
pub struct SharedStore<T> {
    models: DashMap<Snowflake, T>,
    handles: DashMap<Snowflake, Weak<T>>,
}

impl<T: Clone> Default for SharedStore<T> {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

impl<T: Clone> SharedStore<T> {
    /// Create a store pre-sized for `capacity` entities
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            models: DashMap::with_capacity(capacity),
            handles: DashMap::new(),
        }
    }

    /// Get a shared handle of an entity
    pub fn get(&self, id: Snowflake) -> Option<Arc<T>> {
        if let Some(shared) = self.handles.get(&id).and_then(|weak| weak.upgrade()) {
            return Some(shared);
        }

        let model = self.models.get(&id)?;
        let shared = Arc::new(model.value().clone());
        self.handles.insert(id, Arc::downgrade(&shared));
        Some(shared)
    }

    /// Get a copy of the model without touching the handle tier
    pub fn get_model(&self, id: Snowflake) -> Option<T> {
        self.models.get(&id).map(|m| m.value().clone())
    }

    /// Insert or replace a model, returning the replaced one
    pub fn insert(&self, id: Snowflake, model: T) -> Option<T> {
        let old = self.models.insert(id, model);
        self.handles.remove(&id);
        old
    }

    /// Insert or replace a model and return a fresh shared handle of it
    pub fn put(&self, id: Snowflake, model: T) -> Arc<T> {
        let shared = Arc::new(model.clone());
        let _model = self.models.entry(id).insert(model);
        self.handles.insert(id, Arc::downgrade(&shared));
        shared
    }

    /// Get the entity, inserting the model built by `f` when absent
    pub fn get_or_insert_with<F: FnOnce() -> T>(&self, id: Snowflake, f: F) -> Arc<T> {
        let model = self.models.entry(id).or_insert_with(f);
        if let Some(shared) = self.handles.get(&id).and_then(|weak| weak.upgrade()) {
            return shared;
        }
        let shared = Arc::new(model.value().clone());
        self.handles.insert(id, Arc::downgrade(&shared));
        shared
    }

    /// Modify a model in place, returns false if the entity is not present
    pub fn update<F: FnOnce(&mut T)>(&self, id: Snowflake, f: F) -> bool {
        match self.models.get_mut(&id) {
            Some(mut model) => {
                f(model.value_mut());
                self.handles.remove(&id);
                true
            }
            None => false,
        }
    }

    /// Remove an entity, returning its model
    pub fn remove(&self, id: Snowflake) -> Option<T> {
        let removed = self.models.remove(&id).map(|(_, model)| model);
        self.handles.remove(&id);
        removed
    }

    /// Whether the entity is present
    pub fn contains(&self, id: Snowflake) -> bool {
        self.models.contains_key(&id)
    }

    /// Number of entities
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Ids of all entities
    pub fn ids(&self) -> Vec<Snowflake> {
        self.models.iter().map(|m| *m.key()).collect()
    }

    /// Number of handles in the fast tier, dead ones included
    pub fn handle_count(&self) -> usize {
        self.handles.len()
    }

    /// Drop fast tier entries whose entity is no longer held by anyone
    pub fn purge_dead(&self) -> usize {
        let before = self.handles.len();
        self.handles.retain(|_, weak| weak.strong_count() > 0);
        before.saturating_sub(self.handles.len())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_shared_handle_is_reused_while_alive() {
        let store = SharedStore::with_capacity(4);
        store.insert(Snowflake(1), "a".to_string());

        let first = store.get(Snowflake(1)).unwrap();
        let second = store.get(Snowflake(1)).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_handle_rebuilt_after_drop() {
        let store = SharedStore::with_capacity(4);
        store.insert(Snowflake(1), "a".to_string());

        drop(store.get(Snowflake(1)).unwrap());
        assert_eq!(store.purge_dead(), 1);
        assert_eq!(store.handle_count(), 0);
        assert_eq!(*store.get(Snowflake(1)).unwrap(), "a");
    }

    #[test]
    fn test_write_invalidates_handle() {
        let store = SharedStore::with_capacity(4);
        store.insert(Snowflake(1), "a".to_string());
        let old = store.get(Snowflake(1)).unwrap();

        store.insert(Snowflake(1), "b".to_string());
        assert_eq!(*store.get(Snowflake(1)).unwrap(), "b");
        assert_eq!(*old, "a");

        assert!(store.update(Snowflake(1), |v| v.push('c')));
        assert_eq!(*store.get(Snowflake(1)).unwrap(), "bc");
    }

    #[test]
    fn test_remove_and_get_or_insert() {
        let store = SharedStore::with_capacity(4);
        let created = store.get_or_insert_with(Snowflake(7), || 7u32);
        assert_eq!(*created, 7);
        assert_eq!(*store.get_or_insert_with(Snowflake(7), || 8u32), 7);

        assert_eq!(store.remove(Snowflake(7)), Some(7));
        assert!(store.get(Snowflake(7)).is_none());
        assert!(!store.update(Snowflake(7), |v| *v += 1));
    }
}
