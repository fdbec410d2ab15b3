//! Keyed store of saga instances.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use tracing::trace;

use crate::correlation::CorrelationId;

/// Exclusive handle to one saga instance.
///
/// Holding the lock serializes all transitions for that instance; the
/// repository hands out the same cell for the same correlation id, so two
/// messages for one protocol run never interleave their transitions.
pub type SagaCell<S> = Arc<Mutex<S>>;

/// At-most-one live instance per correlation id.
///
/// Lookups take a shared lock on the outer map, so messages for distinct
/// correlation ids proceed fully in parallel; only the per-instance lock
/// inside each [`SagaCell`] is exclusive.
pub struct SagaRepository<S> {
    instances: RwLock<HashMap<CorrelationId, SagaCell<S>>>,
}

impl<S> Default for SagaRepository<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> SagaRepository<S> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            instances: RwLock::new(HashMap::new()),
        }
    }

    /// The live instance for `id`, creating it from `factory` if absent.
    pub fn get_or_create(&self, id: CorrelationId, factory: impl FnOnce() -> S) -> SagaCell<S> {
        if let Some(cell) = self.instances.read().expect("lock poisoned").get(&id) {
            return Arc::clone(cell);
        }

        let mut instances = self.instances.write().expect("lock poisoned");
        Arc::clone(instances.entry(id).or_insert_with(|| {
            trace!(%id, "creating saga instance");
            Arc::new(Mutex::new(factory()))
        }))
    }

    /// The live instance for `id`, if any.
    pub fn find(&self, id: CorrelationId) -> Option<SagaCell<S>> {
        self.instances
            .read()
            .expect("lock poisoned")
            .get(&id)
            .map(Arc::clone)
    }

    /// Retire the instance for `id`.
    ///
    /// In-flight holders of the cell finish their transition on the
    /// detached instance; later lookups see nothing.
    pub fn remove(&self, id: CorrelationId) -> Option<SagaCell<S>> {
        let removed = self.instances.write().expect("lock poisoned").remove(&id);
        if removed.is_some() {
            trace!(%id, "retired saga instance");
        }
        removed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.read().expect("lock poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn same_id_yields_same_instance() {
        let repo = SagaRepository::new();
        let id = CorrelationId::new();

        let first = repo.get_or_create(id, || 1u32);
        let second = repo.get_or_create(id, || 2u32);

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(*second.lock().unwrap(), 1);
        assert_eq!(repo.len(), 1);
    }

    #[test]
    fn find_does_not_create() {
        let repo = SagaRepository::<u32>::new();
        assert!(repo.find(CorrelationId::new()).is_none());
        assert!(repo.is_empty());
    }

    #[test]
    fn remove_retires_the_instance() {
        let repo = SagaRepository::new();
        let id = CorrelationId::new();
        repo.get_or_create(id, || 7u32);

        assert!(repo.remove(id).is_some());
        assert!(repo.find(id).is_none());
        assert!(repo.remove(id).is_none());
    }

    #[test]
    fn concurrent_get_or_create_runs_the_factory_once() {
        let repo = Arc::new(SagaRepository::new());
        let id = CorrelationId::new();
        let created = Arc::new(AtomicUsize::new(0));

        std::thread::scope(|scope| {
            for _ in 0..8 {
                let repo = Arc::clone(&repo);
                let created = Arc::clone(&created);
                scope.spawn(move || {
                    repo.get_or_create(id, || {
                        created.fetch_add(1, Ordering::SeqCst);
                        0u32
                    });
                });
            }
        });

        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert_eq!(repo.len(), 1);
    }

    #[test]
    fn distinct_ids_are_independent() {
        let repo = SagaRepository::new();
        let a = CorrelationId::new();
        let b = CorrelationId::new();

        *repo.get_or_create(a, || 0u32).lock().unwrap() = 10;
        *repo.get_or_create(b, || 0u32).lock().unwrap() = 20;

        assert_eq!(*repo.find(a).unwrap().lock().unwrap(), 10);
        assert_eq!(*repo.find(b).unwrap().lock().unwrap(), 20);
    }
}
