use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{ObjectStore, StoreError, StoredObject, WriteOp};
use crate::model::{EntityKey, EntityKind};

/// Object store kept entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<EntityKey, StoredObject>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn objects(&self) -> MutexGuard<'_, BTreeMap<EntityKey, StoredObject>> {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of stored objects of `kind`.
    pub fn count(&self, kind: EntityKind) -> usize {
        self.objects().keys().filter(|k| k.kind == kind).count()
    }

    pub fn len(&self) -> usize {
        self.objects().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects().is_empty()
    }
}

impl ObjectStore for MemoryStore {
    fn load(&self, key: EntityKey) -> Result<Option<StoredObject>, StoreError> {
        Ok(self.objects().get(&key).cloned())
    }

    fn find_by_link(&self, kind: EntityKind, link_text: &str) -> Result<Vec<EntityKey>, StoreError> {
        Ok(self
            .objects()
            .values()
            .filter(|o| o.key.kind == kind && o.link_text.as_deref() == Some(link_text))
            .map(|o| o.key)
            .collect())
    }

    fn list(&self, kind: EntityKind) -> Result<Vec<StoredObject>, StoreError> {
        Ok(self
            .objects()
            .values()
            .filter(|o| o.key.kind == kind)
            .cloned()
            .collect())
    }

    fn apply(&self, batch: &[WriteOp]) -> Result<(), StoreError> {
        let mut objects = self.objects();
        for op in batch {
            match op {
                WriteOp::Put(object) => {
                    objects.insert(object.key, object.clone());
                }
                WriteOp::Delete(key) => {
                    objects.remove(key);
                }
            }
        }
        Ok(())
    }

    fn max_id(&self) -> Result<i64, StoreError> {
        Ok(self.objects().keys().map(|k| k.id).max().unwrap_or(0))
    }
}
