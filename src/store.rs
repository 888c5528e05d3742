//! Durable persistence for [`SchedulerState`], plus the `Transactor` wrapper
//! that provides the serialized read-modify-write operation the scheduler
//! core relies on throughout.
//!
//! `SqliteStateStore` follows `manager/src/database/mod.rs`'s `Database::new`
//! (step-logged table creation, `sqlx::query` rather than the `query!`
//! macro so no build-time `DATABASE_URL` is needed) but persists a single
//! JSON blob row instead of a relational schema, since the whole scheduler
//! state is always read and written as one unit (spec-mandated atomicity),
//! never queried piecemeal.

use crate::errors::SchedulerError;
use crate::model::SchedulerState;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Row, Sqlite, SqlitePool};
use std::path::Path;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, info};

/// Durable storage for the whole scheduler state snapshot.
///
/// Deliberately minimal (`load`/`save` only) so it stays object-safe behind
/// `Arc<dyn StateStore>`; the serialized, generic `transaction` operation
/// lives on [`Transactor`] instead.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self) -> Result<Option<SchedulerState>, SchedulerError>;
    async fn save(&self, state: &SchedulerState) -> Result<(), SchedulerError>;
}

/// SQLite-backed store: a single row in a `scheduler_state` table holding
/// the whole state as a JSON blob.
pub struct SqliteStateStore {
    pool: Pool<Sqlite>,
}

impl SqliteStateStore {
    pub async fn new(database_path: &str) -> Result<Self, SchedulerError> {
        info!("initializing scheduler state store at {}", database_path);

        if let Some(parent) = Path::new(database_path).parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    error!("failed to create parent directory {:?}: {}", parent, e);
                    return Err(SchedulerError::Storage { reason: e.to_string() });
                }
            }
        }

        let database_url = format!("sqlite:{}?mode=rwc", database_path);
        let pool = SqlitePool::connect(&database_url).await.map_err(|e| {
            error!("failed to connect to state store: {}", e);
            SchedulerError::Storage { reason: e.to_string() }
        })?;

        let store = Self { pool };
        store.initialize_tables().await?;
        Ok(store)
    }

    async fn initialize_tables(&self) -> Result<(), SchedulerError> {
        let sql = r#"
            CREATE TABLE IF NOT EXISTS scheduler_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                payload TEXT NOT NULL
            )
        "#;
        sqlx::query(sql).execute(&self.pool).await.map_err(|e| {
            error!("failed to create scheduler_state table: {}", e);
            SchedulerError::Storage { reason: e.to_string() }
        })?;
        Ok(())
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn load(&self) -> Result<Option<SchedulerState>, SchedulerError> {
        let row = sqlx::query("SELECT payload FROM scheduler_state WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| SchedulerError::Storage { reason: e.to_string() })?;

        match row {
            None => Ok(None),
            Some(row) => {
                let payload: String = row.try_get("payload").map_err(|e| SchedulerError::Storage {
                    reason: e.to_string(),
                })?;
                let state: SchedulerState = serde_json::from_str(&payload)
                    .map_err(|e| SchedulerError::Storage { reason: format!("corrupt state: {}", e) })?;
                Ok(Some(state))
            }
        }
    }

    async fn save(&self, state: &SchedulerState) -> Result<(), SchedulerError> {
        let payload = serde_json::to_string(state)
            .map_err(|e| SchedulerError::Storage { reason: format!("failed to encode state: {}", e) })?;

        sqlx::query(
            "INSERT INTO scheduler_state (id, payload) VALUES (1, ?1)
             ON CONFLICT(id) DO UPDATE SET payload = excluded.payload",
        )
        .bind(payload)
        .execute(&self.pool)
        .await
        .map_err(|e| SchedulerError::Storage { reason: e.to_string() })?;

        Ok(())
    }
}

/// In-process store for tests, grounded in the `Arc<RwLock<...>>` pattern
/// `manager/src/maintenance_tracker.rs` uses for its in-memory operation
/// table.
#[derive(Clone, Default)]
pub struct InMemoryStateStore {
    inner: Arc<RwLock<Option<SchedulerState>>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn load(&self) -> Result<Option<SchedulerState>, SchedulerError> {
        Ok(self.inner.read().expect("state store lock poisoned").clone())
    }

    async fn save(&self, state: &SchedulerState) -> Result<(), SchedulerError> {
        *self.inner.write().expect("state store lock poisoned") = Some(state.clone());
        Ok(())
    }
}

/// Wraps a [`StateStore`] with the serialized, generic `transaction`
/// operation spec §4.2 requires.
///
/// This lives outside the trait itself: `StateStore::load`/`save` must stay
/// object-safe so it can be held as `Arc<dyn StateStore>`, but a generic
/// `transaction<F, T>(f: F)` method cannot appear on a trait used that way.
/// The internal `tokio::sync::Mutex<()>` makes the whole read-mutate-write
/// cycle atomic with respect to other callers of `transaction`, which is
/// what prevents the read-modify-write race spec §9 calls out.
pub struct Transactor {
    store: Arc<dyn StateStore>,
    lock: AsyncMutex<()>,
    start_time_if_empty: DateTime<Utc>,
}

impl Transactor {
    pub fn new(store: Arc<dyn StateStore>, start_time_if_empty: DateTime<Utc>) -> Self {
        Self {
            store,
            lock: AsyncMutex::new(()),
            start_time_if_empty,
        }
    }

    /// Runs `f` against a freshly loaded snapshot of the state. The mutated
    /// snapshot is persisted only if `f` returns `Ok`; an `Err` rolls back,
    /// leaving persisted state untouched, which is what lets
    /// `reconcile` abort `initialize` without a partial write. Concurrent
    /// callers serialize on the internal mutex; a later transaction always
    /// observes every earlier transaction's committed write.
    pub async fn transaction<F, T>(&self, f: F) -> Result<T, SchedulerError>
    where
        F: FnOnce(&mut SchedulerState) -> Result<T, SchedulerError>,
    {
        let _guard = self.lock.lock().await;

        let mut state = match self.store.load().await? {
            Some(state) => state,
            None => SchedulerState::empty(self.start_time_if_empty),
        };

        let result = f(&mut state)?;
        self.store.save(&state).await?;
        Ok(result)
    }
}
