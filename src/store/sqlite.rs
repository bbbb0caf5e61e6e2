use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;
use tokio::runtime::{Builder, Runtime};

use super::{ObjectStore, StoreError, StoredObject, WriteOp};
use crate::model::{EntityKey, EntityKind};

// ============================================================================
// SQLite Store
// ============================================================================

/// Object store backed by a single SQLite table.
///
/// sqlx is async; the store owns a current-thread runtime and blocks on it so
/// the persistence core stays synchronous. Do not call it from inside another
/// tokio runtime.
pub struct SqliteStore {
    pool: SqlitePool,
    runtime: Runtime,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and run migrations.
    ///
    /// `":memory:"` opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InstanceLocked` if another process has the database
    /// locked, `StoreError::Migration` if the schema could not be created.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let pool = runtime.block_on(Self::connect(path))?;
        let store = Self { pool, runtime };
        store
            .runtime
            .block_on(store.migrate())
            .map_err(|e| match StoreError::from_sqlx(e) {
                StoreError::InstanceLocked => StoreError::InstanceLocked,
                other => StoreError::Migration(other.to_string()),
            })?;
        tracing::info!(path = %path, "Opened SQLite store");
        Ok(store)
    }

    async fn connect(path: &str) -> Result<SqlitePool, StoreError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        // busy_timeout=5000: wait up to 5 seconds for a competing writer before SQLITE_BUSY.
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(StoreError::from_sqlx)?
            .pragma("busy_timeout", "5000")
            .foreign_keys(true);

        let pool_options = if path == ":memory:" {
            // One long-lived connection, or the database vanishes with it.
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .acquire_timeout(Duration::from_secs(10))
        };
        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(StoreError::from_sqlx)?;

        Ok(pool)
    }

    /// Create the schema inside one transaction. Idempotent.
    async fn migrate(&self) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS objects (
                kind TEXT NOT NULL,
                id INTEGER NOT NULL,
                link_text TEXT,
                body TEXT NOT NULL,
                PRIMARY KEY (kind, id)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_objects_link ON objects(kind, link_text)")
            .execute(&mut *tx)
            .await?;

        // No two feeds may share a link
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_objects_feed_link ON objects(link_text) WHERE kind = 'feed'",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn apply_batch(&self, batch: &[WriteOp]) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        for op in batch {
            match op {
                WriteOp::Put(object) => {
                    sqlx::query(
                        r#"
                        INSERT INTO objects (kind, id, link_text, body)
                        VALUES (?, ?, ?, ?)
                        ON CONFLICT(kind, id) DO UPDATE SET
                            link_text = excluded.link_text,
                            body = excluded.body
                    "#,
                    )
                    .bind(object.key.kind.as_str())
                    .bind(object.key.id)
                    .bind(object.link_text.as_deref())
                    .bind(&object.body)
                    .execute(&mut *tx)
                    .await?;
                }
                WriteOp::Delete(key) => {
                    sqlx::query("DELETE FROM objects WHERE kind = ? AND id = ?")
                        .bind(key.kind.as_str())
                        .bind(key.id)
                        .execute(&mut *tx)
                        .await?;
                }
            }
        }

        tx.commit().await?;
        Ok(())
    }
}

impl ObjectStore for SqliteStore {
    fn load(&self, key: EntityKey) -> Result<Option<StoredObject>, StoreError> {
        let row: Option<(Option<String>, String)> = self
            .runtime
            .block_on(
                sqlx::query_as("SELECT link_text, body FROM objects WHERE kind = ? AND id = ?")
                    .bind(key.kind.as_str())
                    .bind(key.id)
                    .fetch_optional(&self.pool),
            )
            .map_err(StoreError::from_sqlx)?;

        Ok(row.map(|(link_text, body)| StoredObject {
            key,
            link_text,
            body,
        }))
    }

    fn find_by_link(&self, kind: EntityKind, link_text: &str) -> Result<Vec<EntityKey>, StoreError> {
        let rows: Vec<(i64,)> = self
            .runtime
            .block_on(
                sqlx::query_as("SELECT id FROM objects WHERE kind = ? AND link_text = ? ORDER BY id")
                    .bind(kind.as_str())
                    .bind(link_text)
                    .fetch_all(&self.pool),
            )
            .map_err(StoreError::from_sqlx)?;

        Ok(rows
            .into_iter()
            .map(|(id,)| EntityKey::new(kind, id))
            .collect())
    }

    fn list(&self, kind: EntityKind) -> Result<Vec<StoredObject>, StoreError> {
        let rows: Vec<(i64, Option<String>, String)> = self
            .runtime
            .block_on(
                sqlx::query_as("SELECT id, link_text, body FROM objects WHERE kind = ? ORDER BY id")
                    .bind(kind.as_str())
                    .fetch_all(&self.pool),
            )
            .map_err(StoreError::from_sqlx)?;

        Ok(rows
            .into_iter()
            .map(|(id, link_text, body)| StoredObject {
                key: EntityKey::new(kind, id),
                link_text,
                body,
            })
            .collect())
    }

    fn apply(&self, batch: &[WriteOp]) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        self.runtime
            .block_on(self.apply_batch(batch))
            .map_err(StoreError::from_sqlx)?;
        tracing::debug!(writes = batch.len(), "Applied write batch");
        Ok(())
    }

    fn max_id(&self) -> Result<i64, StoreError> {
        let (max,): (i64,) = self
            .runtime
            .block_on(sqlx::query_as("SELECT COALESCE(MAX(id), 0) FROM objects").fetch_one(&self.pool))
            .map_err(StoreError::from_sqlx)?;
        Ok(max)
    }

    fn close(&self) -> Result<(), StoreError> {
        self.runtime.block_on(self.pool.close());
        Ok(())
    }
}
