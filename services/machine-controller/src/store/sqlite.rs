//! SQLite-backed object store.
//!
//! Objects of every kind share one table, keyed by (kind, namespace, name),
//! with the full object stored as JSON. Each write is a read-modify-write
//! under the connection lock, so version checks are atomic.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use capi_incus_reconcile::{ObjectKey, Resource};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::{
    prepare_create, prepare_delete, prepare_status_update, prepare_update, ObjectStore, Outcome,
    StoreError,
};

/// SQLite object store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;

        Ok(store)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Initialize database schema.
    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS objects (
                kind TEXT NOT NULL,
                namespace TEXT NOT NULL,
                name TEXT NOT NULL,
                resource_version INTEGER NOT NULL,
                body TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (kind, namespace, name)
            );
            "#,
        )?;

        debug!("Object store schema initialized");
        Ok(())
    }
}

fn read<T>(conn: &Connection, key: &ObjectKey) -> Result<Option<T>, StoreError>
where
    T: Resource + DeserializeOwned,
{
    let body: Option<String> = conn
        .query_row(
            "SELECT body FROM objects WHERE kind = ?1 AND namespace = ?2 AND name = ?3",
            params![T::KIND, key.namespace, key.name],
            |row| row.get(0),
        )
        .optional()?;

    match body {
        Some(body) => Ok(Some(serde_json::from_str(&body)?)),
        None => Ok(None),
    }
}

fn read_existing<T>(conn: &Connection, key: &ObjectKey) -> Result<T, StoreError>
where
    T: Resource + DeserializeOwned,
{
    read(conn, key)?.ok_or_else(|| StoreError::NotFound {
        kind: T::KIND,
        key: key.clone(),
    })
}

fn write<T>(conn: &Connection, object: &T) -> Result<(), StoreError>
where
    T: Resource + Serialize,
{
    let key = object.key();
    let body = serde_json::to_string(object)?;
    let now = chrono::Utc::now().timestamp();
    conn.execute(
        r#"
        INSERT INTO objects (kind, namespace, name, resource_version, body, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT(kind, namespace, name) DO UPDATE SET
            resource_version = excluded.resource_version,
            body = excluded.body,
            updated_at = excluded.updated_at
        "#,
        params![
            T::KIND,
            key.namespace,
            key.name,
            object.meta().resource_version as i64,
            body,
            now,
        ],
    )?;
    Ok(())
}

fn remove<T: Resource>(conn: &Connection, key: &ObjectKey) -> Result<(), StoreError> {
    conn.execute(
        "DELETE FROM objects WHERE kind = ?1 AND namespace = ?2 AND name = ?3",
        params![T::KIND, key.namespace, key.name],
    )?;
    debug!(kind = T::KIND, key = %key, "Object purged");
    Ok(())
}

fn apply<T>(conn: &Connection, outcome: Outcome<T>) -> Result<T, StoreError>
where
    T: Resource + Serialize,
{
    match outcome {
        Outcome::Stored(next) => {
            write(conn, &next)?;
            Ok(next)
        }
        Outcome::Purged(last) => {
            remove::<T>(conn, &last.key())?;
            Ok(last)
        }
        Outcome::Unchanged(current) => Ok(current),
    }
}

#[async_trait]
impl<T> ObjectStore<T> for SqliteStore
where
    T: Resource + Serialize + DeserializeOwned,
{
    async fn get(&self, key: &ObjectKey) -> Result<Option<T>, StoreError> {
        read(&self.conn(), key)
    }

    async fn list(&self) -> Result<Vec<ObjectKey>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT namespace, name FROM objects WHERE kind = ?1 ORDER BY namespace, name",
        )?;

        let keys = stmt
            .query_map(params![T::KIND], |row| {
                Ok(ObjectKey {
                    namespace: row.get(0)?,
                    name: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(keys)
    }

    async fn create(&self, object: &T) -> Result<T, StoreError> {
        let conn = self.conn();
        let existing: Option<T> = read(&conn, &object.key())?;
        let next = prepare_create(object, existing.as_ref())?;
        write(&conn, &next)?;
        Ok(next)
    }

    async fn update(&self, object: &T) -> Result<T, StoreError> {
        let conn = self.conn();
        let current: T = read_existing(&conn, &object.key())?;
        let outcome = prepare_update(&current, object)?;
        apply(&conn, outcome)
    }

    async fn update_status(&self, object: &T) -> Result<T, StoreError> {
        let conn = self.conn();
        let current: T = read_existing(&conn, &object.key())?;
        let next = prepare_status_update(&current, object)?;
        write(&conn, &next)?;
        Ok(next)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<Option<T>, StoreError> {
        let conn = self.conn();
        let current: T = read_existing(&conn, key)?;
        match prepare_delete(&current) {
            outcome @ Outcome::Purged(_) => {
                apply(&conn, outcome)?;
                Ok(None)
            }
            outcome => Ok(Some(apply(&conn, outcome)?)),
        }
    }
}
