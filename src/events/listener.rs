use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use super::{EventKind, ModelEvent};
use crate::model::EntityKind;

/// Receives the events of committed transactions.
///
/// Implement [`ModelListener::on_events`] to see the whole batch, or the three
/// `entities_*` hooks to get it pre-split by event kind. Closures taking
/// `&[ModelEvent]` are listeners too.
pub trait ModelListener: Send + Sync {
    fn entities_added(&self, _events: &[&ModelEvent]) {}

    fn entities_updated(&self, _events: &[&ModelEvent]) {}

    fn entities_removed(&self, _events: &[&ModelEvent]) {}

    fn on_events(&self, events: &[ModelEvent]) {
        let mut added = Vec::new();
        let mut updated = Vec::new();
        let mut removed = Vec::new();
        for event in events {
            match event.kind() {
                EventKind::Persisted => added.push(event),
                EventKind::Updated => updated.push(event),
                EventKind::Removed => removed.push(event),
            }
        }
        if !added.is_empty() {
            self.entities_added(&added);
        }
        if !updated.is_empty() {
            self.entities_updated(&updated);
        }
        if !removed.is_empty() {
            self.entities_removed(&removed);
        }
    }
}

impl<F> ModelListener for F
where
    F: Fn(&[ModelEvent]) + Send + Sync,
{
    fn on_events(&self, events: &[ModelEvent]) {
        self(events)
    }
}

/// Listeners per entity kind, plus catch-all listeners that see every batch.
#[derive(Default)]
pub struct ListenerRegistry {
    by_kind: RwLock<HashMap<EntityKind, Vec<Arc<dyn ModelListener>>>>,
    catch_all: RwLock<Vec<Arc<dyn ModelListener>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, kind: EntityKind, listener: Arc<dyn ModelListener>) {
        self.by_kind
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .push(listener);
    }

    pub fn add_catch_all(&self, listener: Arc<dyn ModelListener>) {
        self.catch_all
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Removes `listener` wherever it was registered. Returns whether it was found.
    pub fn remove(&self, listener: &Arc<dyn ModelListener>) -> bool {
        let mut found = false;
        for listeners in self
            .by_kind
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .values_mut()
        {
            let before = listeners.len();
            listeners.retain(|l| !Arc::ptr_eq(l, listener));
            found |= listeners.len() != before;
        }
        let mut catch_all = self.catch_all.write().unwrap_or_else(PoisonError::into_inner);
        let before = catch_all.len();
        catch_all.retain(|l| !Arc::ptr_eq(l, listener));
        found | (catch_all.len() != before)
    }

    pub fn len(&self) -> usize {
        let by_kind: usize = self
            .by_kind
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(Vec::len)
            .sum();
        by_kind + self.catch_all.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delivers `events` synchronously, in order.
    ///
    /// Each entity kind is delivered as one batch, kinds in order of first
    /// appearance; catch-all listeners then get the full batch. Listeners may
    /// register further listeners while being called.
    pub fn dispatch(&self, events: &[ModelEvent]) {
        if events.is_empty() {
            return;
        }

        let mut kinds: Vec<EntityKind> = Vec::new();
        for event in events {
            let kind = event.entity_kind();
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }

        for kind in kinds {
            let listeners = self
                .by_kind
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&kind)
                .cloned()
                .unwrap_or_default();
            if listeners.is_empty() {
                continue;
            }
            let batch: Vec<ModelEvent> = events
                .iter()
                .filter(|e| e.entity_kind() == kind)
                .cloned()
                .collect();
            tracing::debug!(%kind, events = batch.len(), listeners = listeners.len(), "Dispatching events");
            for listener in &listeners {
                listener.on_events(&batch);
            }
        }

        let catch_all = self
            .catch_all
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in &catch_all {
            listener.on_events(events);
        }
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.len())
            .finish()
    }
}
