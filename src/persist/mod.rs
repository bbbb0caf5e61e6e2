//! Persistence context and cascading transactions.
//!
//! A [`PersistenceContext`] owns the object store, the id generator and the
//! listener registry. Every unit of work runs in a [`Transaction`] obtained
//! from [`PersistenceContext::begin`]; writes are buffered in the transaction
//! and applied atomically by [`Transaction::commit`], after which the collapsed
//! events are dispatched.

mod cascade;
mod load;
mod transaction;

pub use transaction::Transaction;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

use crate::events::{ListenerRegistry, ModelListener};
use crate::model::{EntityKey, EntityKind, ModelError, SearchProvider};
use crate::store::{IdGenerator, ObjectStore, SequenceIdGenerator, StoreError};

#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Another feed is already stored under this link.
    #[error("A feed with link {link} already exists (id {existing_id})")]
    UniqueConstraint { link: String, existing_id: i64 },

    #[error("{0} not found")]
    NotFound(EntityKey),

    #[error("Persistence context has not been started")]
    NotStarted,

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Explicit replacement for a process-wide database singleton.
pub struct PersistenceContext {
    store: Arc<dyn ObjectStore>,
    ids: Arc<dyn IdGenerator>,
    /// Set when ids come from the built-in sequence, which is seeded at startup.
    sequence: Option<Arc<SequenceIdGenerator>>,
    listeners: ListenerRegistry,
    search: Option<Arc<dyn SearchProvider>>,
    started: AtomicBool,
}

impl PersistenceContext {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        let sequence = Arc::new(SequenceIdGenerator::default());
        Self {
            store,
            ids: sequence.clone(),
            sequence: Some(sequence),
            listeners: ListenerRegistry::new(),
            search: None,
            started: AtomicBool::new(false),
        }
    }

    /// Uses an external id generator instead of the built-in sequence.
    ///
    /// The caller is responsible for not handing out ids already in the store.
    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self.sequence = None;
        self
    }

    /// Search engine used to compute saved-search results on demand.
    pub fn with_search_provider(mut self, provider: Arc<dyn SearchProvider>) -> Self {
        self.search = Some(provider);
        self
    }

    /// Seeds the id sequence from the store and opens the context for work.
    pub fn startup(&self) -> Result<(), PersistenceError> {
        if let Some(sequence) = &self.sequence {
            let max_id = self.store.max_id()?;
            sequence.advance_past(max_id);
            tracing::debug!(max_id, "Seeded id sequence");
        }
        self.started.store(true, Ordering::SeqCst);
        tracing::info!("Persistence context started");
        Ok(())
    }

    /// Closes the store. Further [`begin`](Self::begin) calls fail.
    pub fn shutdown(&self) -> Result<(), PersistenceError> {
        if !self.started.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.store.close()?;
        tracing::info!("Persistence context shut down");
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn begin(&self) -> Result<Transaction<'_>, PersistenceError> {
        if !self.is_started() {
            return Err(PersistenceError::NotStarted);
        }
        Ok(Transaction::new(self))
    }

    pub fn add_listener(&self, kind: EntityKind, listener: Arc<dyn ModelListener>) {
        self.listeners.add(kind, listener);
    }

    pub fn add_catch_all_listener(&self, listener: Arc<dyn ModelListener>) {
        self.listeners.add_catch_all(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn ModelListener>) -> bool {
        self.listeners.remove(listener)
    }

    pub fn store(&self) -> &dyn ObjectStore {
        self.store.as_ref()
    }

    pub(crate) fn next_id(&self) -> i64 {
        self.ids.next_id()
    }

    pub(crate) fn search_provider(&self) -> Option<&Arc<dyn SearchProvider>> {
        self.search.as_ref()
    }

    pub(crate) fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }
}

impl std::fmt::Debug for PersistenceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceContext")
            .field("started", &self.is_started())
            .field("listeners", &self.listeners)
            .field("search", &self.search.is_some())
            .finish()
    }
}
