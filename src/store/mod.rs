//! The object-store collaborator.
//!
//! The persistence layer talks to storage only through [`ObjectStore`]: load a
//! record by key, look records up by their indexed link, list a kind, and
//! apply a batch of writes atomically. Records travel as JSON bodies next to
//! an indexed `link_text` column, the string form of the entity's URI.
//!
//! Two engines are provided: [`MemoryStore`] for tests and ephemeral use, and
//! [`SqliteStore`] for a database file.

mod ids;
mod memory;
mod record;
mod sqlite;

use thiserror::Error;

use crate::model::{EntityKey, EntityKind};

pub use ids::{IdGenerator, SequenceIdGenerator};
pub use memory::MemoryStore;
pub use record::{FeedRecord, NewsBinRecord, NewsRecord, Record, SearchMarkRecord};
pub use sqlite::SqliteStore;

// ============================================================================
// Error Types
// ============================================================================

/// Failures of the storage engine, surfaced unchanged to the caller.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another process holds the database lock
    #[error("Another instance appears to be using the store. Please close it and try again.")]
    InstanceLocked,

    /// Schema migration failed
    #[error("Store migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The runtime driving the database could not be started
    #[error("Failed to start store runtime: {0}")]
    Runtime(#[from] std::io::Error),

    /// A stored body could not be decoded
    #[error("Corrupt record {key}: {source}")]
    Corrupt {
        key: EntityKey,
        #[source]
        source: serde_json::Error,
    },

    /// A record could not be encoded
    #[error("Failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),

    /// The engine rejected the operation for a reason of its own
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Map sqlx errors that indicate a locked database to [`StoreError::InstanceLocked`].
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_CANTOPEN (14)
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return StoreError::InstanceLocked;
        }

        StoreError::Database(err)
    }
}

// ============================================================================
// Store Contract
// ============================================================================

/// One stored entity as the engine sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub key: EntityKey,
    /// Indexed string form of the entity's URI, if it has one.
    pub link_text: Option<String>,
    /// JSON encoding of the entity's [`Record`].
    pub body: String,
}

/// A single write inside an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Put(StoredObject),
    Delete(EntityKey),
}

/// Storage engine used by [`crate::persist::PersistenceContext`].
pub trait ObjectStore: Send + Sync {
    fn load(&self, key: EntityKey) -> Result<Option<StoredObject>, StoreError>;

    /// Keys of every entity of `kind` whose indexed link equals `link_text`.
    fn find_by_link(&self, kind: EntityKind, link_text: &str) -> Result<Vec<EntityKey>, StoreError>;

    fn list(&self, kind: EntityKind) -> Result<Vec<StoredObject>, StoreError>;

    /// Applies every write or none of them.
    fn apply(&self, batch: &[WriteOp]) -> Result<(), StoreError>;

    /// Highest id in use across all kinds, or 0 for an empty store.
    fn max_id(&self) -> Result<i64, StoreError>;

    /// Releases engine resources. Further calls may fail.
    fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
