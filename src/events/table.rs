use std::collections::HashMap;

use super::{EventKind, Lifecycle, ModelEvent};
use crate::model::EntityKey;
use crate::store::Record;

#[derive(Debug, Clone)]
struct Pending {
    kind: EventKind,
    previous: Option<Record>,
    current: Record,
    root: bool,
}

/// Transaction-scoped table of pending events, one per entity.
///
/// Repeated callbacks for the same entity collapse into a single event that
/// keeps the position of the first one:
///
/// - persisted, then updated: persisted with the latest snapshot
/// - updated, then updated: updated from the earliest to the latest snapshot
/// - persisted, then removed: nothing (listeners never saw the entity)
/// - anything else, then removed: removed
#[derive(Debug, Clone, Default)]
pub struct EventTable {
    order: Vec<EntityKey>,
    pending: HashMap<EntityKey, Pending>,
}

impl EventTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one lifecycle callback into the table.
    pub fn handle(&mut self, callback: Lifecycle) {
        match callback {
            Lifecycle::Creating(key) => {
                tracing::trace!(entity = %key, "creating");
            }
            Lifecycle::Deleting(key) => {
                tracing::trace!(entity = %key, "deleting");
            }
            Lifecycle::Activated(key) => {
                tracing::trace!(entity = %key, "activated");
            }
            Lifecycle::Created { record, root } => {
                self.put(EventKind::Persisted, None, record, root);
            }
            Lifecycle::Updated {
                previous,
                current,
                root,
            } => {
                self.put(EventKind::Updated, Some(previous), current, root);
            }
            Lifecycle::Deleted { record, root } => {
                self.put(EventKind::Removed, None, record, root);
            }
        }
    }

    fn put(&mut self, kind: EventKind, previous: Option<Record>, current: Record, root: bool) {
        let Some(key) = current.key() else {
            tracing::warn!(kind = %current.kind(), "Dropping event for entity without id");
            return;
        };

        let Some(existing) = self.pending.remove(&key) else {
            self.order.push(key);
            self.pending.insert(
                key,
                Pending {
                    kind,
                    previous,
                    current,
                    root,
                },
            );
            return;
        };

        let root = existing.root || root;
        let collapsed = match (existing.kind, kind) {
            (EventKind::Persisted, EventKind::Removed) => None,
            (EventKind::Persisted, _) => Some(Pending {
                kind: EventKind::Persisted,
                previous: None,
                current,
                root,
            }),
            (_, EventKind::Removed) => Some(Pending {
                kind: EventKind::Removed,
                previous: existing.previous,
                current,
                root,
            }),
            (EventKind::Updated, _) => Some(Pending {
                kind: EventKind::Updated,
                previous: existing.previous.or(previous),
                current,
                root,
            }),
            // Written again after a removal in the same transaction.
            (EventKind::Removed, _) => Some(Pending {
                kind: EventKind::Updated,
                previous: Some(existing.current),
                current,
                root,
            }),
        };

        match collapsed {
            Some(pending) => {
                self.pending.insert(key, pending);
            }
            None => {
                self.order.retain(|k| *k != key);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Typed events in first-callback order.
    pub fn drain(&mut self) -> Vec<ModelEvent> {
        let order = std::mem::take(&mut self.order);
        let mut pending = std::mem::take(&mut self.pending);
        order
            .into_iter()
            .filter_map(|key| pending.remove(&key))
            .map(|p| ModelEvent::build(p.kind, p.previous, p.current, p.root))
            .collect()
    }

    /// Discards every pending event.
    pub fn clear(&mut self) {
        self.order.clear();
        self.pending.clear();
    }
}
