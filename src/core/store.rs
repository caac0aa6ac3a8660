//! Copy-on-write controller storage.
//!
//! Readers copy an `Arc<Controller>` out of the map and release the lock immediately; they
//! never evaluate policy while holding it. Writers replace whole entries: an update is a pure
//! function from the current controller to its successor, run inside a short write section.
use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc, PoisonError, RwLock, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

use crate::core::controller::Controller;

/// Pure successor function; `None` means nothing changed and no swap happens.
pub type ControllerUpdate<'a> = Box<dyn FnOnce(&Controller) -> Option<Controller> + 'a>;

/// Concurrent `name -> Controller` map with whole-entry replacement.
pub trait ControllerStore: Send + Sync {
    fn get(&self, name: &str) -> Option<Arc<Controller>>;

    /// Insert a new entry. Returns `false`, leaving the store unchanged, if the name exists.
    fn insert(&self, controller: Controller) -> bool;

    /// Insert or replace, returning the previous entry.
    fn upsert(&self, controller: Controller) -> Option<Arc<Controller>>;

    /// Replace the entry for `name` with the successor computed by `update`. Returns the
    /// published successor, or `None` if the name is absent or `update` declined.
    fn update(&self, name: &str, update: ControllerUpdate<'_>) -> Option<Arc<Controller>>;

    fn remove(&self, name: &str) -> Option<Arc<Controller>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn names(&self) -> Vec<String>;
}

/// `RwLock<HashMap>` implementation of [`ControllerStore`].
#[derive(Default)]
pub struct SharedStore {
    controllers: RwLock<HashMap<String, Arc<Controller>>>,
    generation: AtomicU64,
}

impl SharedStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn stamp(&self, mut controller: Controller) -> Arc<Controller> {
        controller.generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        Arc::new(controller)
    }
}

// Entries are immutable snapshots, so a writer that panicked never leaves a half-written
// value behind and poisoning can be ignored.
impl ControllerStore for SharedStore {
    fn get(&self, name: &str) -> Option<Arc<Controller>> {
        self.controllers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn insert(&self, controller: Controller) -> bool {
        let mut map = self
            .controllers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if map.contains_key(controller.name()) {
            return false;
        }
        let name = controller.name().to_string();
        map.insert(name, self.stamp(controller));
        true
    }

    fn upsert(&self, controller: Controller) -> Option<Arc<Controller>> {
        let name = controller.name().to_string();
        let entry = self.stamp(controller);
        self.controllers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, entry)
    }

    fn update(&self, name: &str, update: ControllerUpdate<'_>) -> Option<Arc<Controller>> {
        let mut map = self
            .controllers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let current = map.get(name)?;
        let next = self.stamp(update(current)?);
        map.insert(name.to_string(), Arc::clone(&next));
        Some(next)
    }

    fn remove(&self, name: &str) -> Option<Arc<Controller>> {
        self.controllers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }

    fn len(&self) -> usize {
        self.controllers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn names(&self) -> Vec<String> {
        self.controllers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

/// Back-reference from a behavior to the store entry it belongs to, used to publish a
/// successor controller when the behavior is reconfigured.
#[derive(Clone)]
pub struct RouteHandle {
    key: Arc<str>,
    store: Option<Weak<dyn ControllerStore>>,
}

impl RouteHandle {
    pub fn new(key: &str, store: &Arc<dyn ControllerStore>) -> Self {
        Self {
            key: Arc::from(key),
            store: Some(Arc::downgrade(store)),
        }
    }

    /// Handle that publishes nowhere, for controllers that live outside a store.
    pub fn detached(key: &str) -> Self {
        Self {
            key: Arc::from(key),
            store: None,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_detached(&self) -> bool {
        self.store.is_none()
    }

    /// Clone the current controller, apply `change` to the clone and swap it in. `change`
    /// returns whether it modified anything; when it did not, no new generation is published.
    pub fn publish<F>(&self, change: F) -> Option<Arc<Controller>>
    where
        F: FnOnce(&mut Controller) -> bool,
    {
        let store = self.store.as_ref()?.upgrade()?;
        store.update(
            &self.key,
            Box::new(move |current| {
                let mut next = current.clone();
                change(&mut next).then_some(next)
            }),
        )
    }
}

impl fmt::Debug for RouteHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteHandle")
            .field("key", &self.key)
            .field("detached", &self.is_detached())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::route::Route;

    fn store() -> Arc<dyn ControllerStore> {
        Arc::new(SharedStore::new())
    }

    fn controller(store: &Arc<dyn ControllerStore>, name: &str) -> Controller {
        Controller::from_route(&Route::egress(name), RouteHandle::new(name, store))
    }

    #[test]
    fn test_insert_rejects_duplicates() {
        let store = store();
        assert!(store.insert(controller(&store, "a")));
        assert!(!store.insert(controller(&store, "a")));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_update_publishes_new_generation() {
        let store = store();
        store.insert(controller(&store, "a"));
        let before = store.get("a").unwrap();

        let after = store
            .update("a", Box::new(|c| Some(c.clone())))
            .unwrap();
        assert!(after.generation() > before.generation());
        assert!(!Arc::ptr_eq(&before, &store.get("a").unwrap()));
    }

    #[test]
    fn test_declined_update_keeps_entry() {
        let store = store();
        store.insert(controller(&store, "a"));
        let before = store.get("a").unwrap();

        assert!(store.update("a", Box::new(|_| None)).is_none());
        assert!(store.update("missing", Box::new(|c| Some(c.clone()))).is_none());
        assert!(Arc::ptr_eq(&before, &store.get("a").unwrap()));
    }

    #[test]
    fn test_detached_handle_publishes_nothing() {
        let handle = RouteHandle::detached("a");
        assert!(handle.is_detached());
        assert!(handle.publish(|_| true).is_none());
    }

    #[test]
    fn test_remove_and_names() {
        let store = store();
        store.insert(controller(&store, "a"));
        store.insert(controller(&store, "b"));
        let mut names = store.names();
        names.sort();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
        assert!(store.remove("a").is_some());
        assert!(store.get("a").is_none());
        assert_eq!(store.len(), 1);
    }
}
