use std::collections::{BTreeMap, HashMap, HashSet};

use super::{PersistenceContext, PersistenceError};
use crate::events::{EventTable, Lifecycle, ModelEvent};
use crate::model::{EntityId, EntityKey, EntityKind, ModelError};
use crate::store::{Record, StoreError, StoredObject, WriteOp};

/// One unit of work against a [`PersistenceContext`].
///
/// Reads see the transaction's own buffered writes. Nothing reaches the store
/// until [`commit`](Self::commit); dropping the transaction without committing
/// discards its writes and events.
pub struct Transaction<'c> {
    pub(super) ctx: &'c PersistenceContext,
    writes: Vec<WriteOp>,
    /// Records written (`Some`) or deleted (`None`) in this transaction.
    overlay: HashMap<EntityKey, Option<Record>>,
    /// Overlay entries replaced by each write, newest last.
    journal: Vec<(EntityKey, Option<Option<Record>>)>,
    pub(super) events: EventTable,
    /// Entities whose deletion has started in the running operation, so a
    /// cascade visits each only once.
    pub(super) deleting: HashSet<EntityKey>,
    /// Nesting depth of [`Transaction::guarded`].
    depth: u32,
    finished: bool,
}

/// Transaction state at the start of a public operation.
struct Checkpoint {
    writes: usize,
    journal: usize,
    events: EventTable,
}

impl<'c> Transaction<'c> {
    pub(super) fn new(ctx: &'c PersistenceContext) -> Self {
        Self {
            ctx,
            writes: Vec::new(),
            overlay: HashMap::new(),
            journal: Vec::new(),
            events: EventTable::new(),
            deleting: HashSet::new(),
            depth: 0,
            finished: false,
        }
    }

    /// Number of buffered store writes.
    pub fn pending_writes(&self) -> usize {
        self.writes.len()
    }

    /// Number of events that a commit would dispatch right now.
    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    /// Applies all buffered writes atomically, then dispatches the collapsed
    /// events to the registered listeners and returns them.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the batch was rejected. No event is
    /// dispatched in that case.
    pub fn commit(mut self) -> Result<Vec<ModelEvent>, PersistenceError> {
        self.finished = true;
        let writes = std::mem::take(&mut self.writes);
        if let Err(e) = self.ctx.store.apply(&writes) {
            tracing::warn!(error = %e, writes = writes.len(), "Commit failed");
            return Err(e.into());
        }

        let events = self.events.drain();
        tracing::info!(writes = writes.len(), events = events.len(), "Committed transaction");
        self.ctx.listeners().dispatch(&events);
        Ok(events)
    }

    /// Discards all buffered writes and events.
    pub fn rollback(mut self) {
        self.discard();
    }

    fn discard(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        if !self.writes.is_empty() {
            tracing::debug!(writes = self.writes.len(), "Rolled back transaction");
        }
        self.writes.clear();
        self.overlay.clear();
        self.journal.clear();
        self.events.clear();
        self.deleting.clear();
    }

    /// Runs one public operation as a unit.
    ///
    /// If `op` fails, every write, overlay entry and event it buffered is
    /// dropped again, so the transaction is left as it was before the call and
    /// can still be committed. The deletion guard is reset either way. Nested
    /// calls run inside the outermost operation.
    pub(super) fn guarded<T>(
        &mut self,
        op: impl FnOnce(&mut Self) -> Result<T, PersistenceError>,
    ) -> Result<T, PersistenceError> {
        if self.depth > 0 {
            return op(self);
        }

        let checkpoint = Checkpoint {
            writes: self.writes.len(),
            journal: self.journal.len(),
            events: self.events.clone(),
        };
        self.depth += 1;
        let result = op(self);
        self.depth -= 1;
        self.deleting.clear();

        if let Err(e) = &result {
            tracing::warn!(
                error = %e,
                discarded = self.writes.len() - checkpoint.writes,
                "Operation failed, discarding its writes"
            );
            self.restore(checkpoint);
        }
        result
    }

    fn restore(&mut self, checkpoint: Checkpoint) {
        self.writes.truncate(checkpoint.writes);
        for (key, replaced) in self.journal.drain(checkpoint.journal..).rev() {
            match replaced {
                Some(entry) => {
                    self.overlay.insert(key, entry);
                }
                None => {
                    self.overlay.remove(&key);
                }
            }
        }
        self.events = checkpoint.events;
    }

    fn put_overlay(&mut self, key: EntityKey, entry: Option<Record>) {
        let replaced = self.overlay.insert(key, entry);
        self.journal.push((key, replaced));
    }

    // ------------------------------------------------------------------
    // Record access
    // ------------------------------------------------------------------

    pub(super) fn read_record(&self, key: EntityKey) -> Result<Option<Record>, PersistenceError> {
        if let Some(entry) = self.overlay.get(&key) {
            return Ok(entry.clone());
        }
        let Some(object) = self.ctx.store.load(key)? else {
            return Ok(None);
        };
        Ok(Some(decode(&object)?))
    }

    /// Every record of `kind`, ordered by id.
    pub(super) fn records(&self, kind: EntityKind) -> Result<Vec<Record>, PersistenceError> {
        let mut records = BTreeMap::new();
        for object in self.ctx.store.list(kind)? {
            if !self.overlay.contains_key(&object.key) {
                records.insert(object.key.id, decode(&object)?);
            }
        }
        for (key, entry) in &self.overlay {
            match entry {
                Some(record) if key.kind == kind => {
                    records.insert(key.id, record.clone());
                }
                _ => {}
            }
        }
        Ok(records.into_values().collect())
    }

    pub(super) fn keys_by_link(
        &self,
        kind: EntityKind,
        link_text: &str,
    ) -> Result<Vec<EntityKey>, PersistenceError> {
        let mut keys: Vec<EntityKey> = self
            .ctx
            .store
            .find_by_link(kind, link_text)?
            .into_iter()
            .filter(|key| !self.overlay.contains_key(key))
            .collect();
        for (key, entry) in &self.overlay {
            let Some(record) = entry else { continue };
            if key.kind == kind && record.link_text().as_deref() == Some(link_text) {
                keys.push(*key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Assigns an id to a new entity. Existing ids are kept.
    pub(super) fn assign_id(&mut self, kind: EntityKind, id: &EntityId) -> i64 {
        if let Some(id) = id.get() {
            return id;
        }
        let ctx = self.ctx;
        let assigned = id.get_or_assign(|| ctx.next_id());
        self.events
            .handle(Lifecycle::Creating(EntityKey::new(kind, assigned)));
        assigned
    }

    /// Buffers `record` and raises the created or updated callback.
    ///
    /// A record identical to the stored one is not written and raises nothing.
    pub(super) fn write(&mut self, record: Record, root: bool) -> Result<EntityKey, PersistenceError> {
        let kind = record.kind();
        let key = record.key().ok_or(ModelError::Unsaved(kind.as_str()))?;
        let previous = self.read_record(key)?;
        if previous.as_ref().is_some_and(|p| p.same_snapshot(&record)) {
            tracing::trace!(entity = %key, "Skipping unchanged record");
            return Ok(key);
        }

        let body = record.encode().map_err(StoreError::Encode)?;
        self.writes.push(WriteOp::Put(StoredObject {
            key,
            link_text: record.link_text(),
            body,
        }));
        self.put_overlay(key, Some(record.clone()));

        let callback = match previous {
            None => Lifecycle::Created { record, root },
            Some(previous) => Lifecycle::Updated {
                previous,
                current: record,
                root,
            },
        };
        self.events.handle(callback);
        Ok(key)
    }

    /// Buffers the deletion of `record` and raises the deleted callback.
    pub(super) fn remove(&mut self, record: Record, root: bool) -> Result<(), PersistenceError> {
        let kind = record.kind();
        let key = record.key().ok_or(ModelError::Unsaved(kind.as_str()))?;
        self.writes.push(WriteOp::Delete(key));
        self.put_overlay(key, None);
        self.events.handle(Lifecycle::Deleted { record, root });
        Ok(())
    }

    pub(super) fn activate(&mut self, key: EntityKey) -> Result<Option<Record>, PersistenceError> {
        let record = self.read_record(key)?;
        if record.is_some() {
            self.events.handle(Lifecycle::Activated(key));
        }
        Ok(record)
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        self.discard();
    }
}

impl std::fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("writes", &self.writes.len())
            .field("events", &self.events.len())
            .field("deleting", &self.deleting.len())
            .finish()
    }
}

fn decode(object: &StoredObject) -> Result<Record, StoreError> {
    Record::decode(object.key.kind, &object.body).map_err(|source| StoreError::Corrupt {
        key: object.key,
        source,
    })
}
