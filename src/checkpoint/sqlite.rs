//! SQLite-backed checkpoint store

use super::{Checkpoint, CheckpointError, CheckpointResult, CheckpointStore, Revision};
use crate::conversation::ConversationState;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// SQL schema for initialization
const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS checkpoints (
    thread_id TEXT PRIMARY KEY,
    generation INTEGER NOT NULL DEFAULT 0,
    version INTEGER NOT NULL DEFAULT 0,
    state TEXT,
    updated_at TEXT NOT NULL
);
";

impl From<rusqlite::Error> for CheckpointError {
    fn from(e: rusqlite::Error) -> Self {
        CheckpointError::Storage(e.to_string())
    }
}

/// Thread-safe database handle
#[derive(Clone)]
pub struct SqliteCheckpointStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCheckpointStore {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> CheckpointResult<Self> {
        Self::init(Connection::open(path)?)
    }

    /// Open an in-memory database
    pub fn open_in_memory() -> CheckpointResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> CheckpointResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> CheckpointResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| CheckpointError::Storage("connection lock poisoned".to_string()))
    }
}

fn to_sql(n: u64) -> CheckpointResult<i64> {
    i64::try_from(n).map_err(|_| CheckpointError::Storage(format!("revision overflow: {n}")))
}

fn from_sql(n: i64) -> CheckpointResult<u64> {
    u64::try_from(n).map_err(|_| CheckpointError::Storage(format!("negative revision: {n}")))
}

fn read_revision(conn: &Connection, thread_id: &str) -> CheckpointResult<Option<(Revision, Option<String>)>> {
    let row = conn
        .query_row(
            "SELECT generation, version, state FROM checkpoints WHERE thread_id = ?1",
            params![thread_id],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            },
        )
        .optional()?;

    row.map(|(generation, version, state)| {
        Ok((Revision::new(from_sql(generation)?, from_sql(version)?), state))
    })
    .transpose()
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn save(
        &self,
        thread_id: &str,
        state: &ConversationState,
        expected: Revision,
    ) -> CheckpointResult<Revision> {
        let json = serde_json::to_string(state)?;
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let actual = read_revision(&tx, thread_id)?.map_or(Revision::default(), |(rev, _)| rev);
        if actual != expected {
            return Err(CheckpointError::VersionConflict {
                thread_id: thread_id.to_string(),
                expected,
                actual,
            });
        }

        let revision = actual.next();
        tx.execute(
            "INSERT INTO checkpoints (thread_id, generation, version, state, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(thread_id) DO UPDATE SET
                generation = excluded.generation,
                version = excluded.version,
                state = excluded.state,
                updated_at = excluded.updated_at",
            params![
                thread_id,
                to_sql(revision.generation)?,
                to_sql(revision.version)?,
                json,
                Utc::now().to_rfc3339()
            ],
        )?;
        tx.commit()?;

        tracing::debug!(thread_id = %thread_id, revision = %revision, "Checkpoint saved");
        Ok(revision)
    }

    async fn load(&self, thread_id: &str) -> CheckpointResult<Checkpoint> {
        let conn = self.conn()?;
        match read_revision(&conn, thread_id)? {
            Some((revision, Some(json))) => Ok(Checkpoint {
                thread_id: thread_id.to_string(),
                state: serde_json::from_str(&json)?,
                revision,
            }),
            Some((revision, None)) => Ok(Checkpoint::empty(thread_id, revision)),
            None => Ok(Checkpoint::empty(thread_id, Revision::default())),
        }
    }

    async fn clear(&self, thread_id: &str) -> CheckpointResult<Revision> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current = read_revision(&tx, thread_id)?.map_or(Revision::default(), |(rev, _)| rev);
        let revision = current.cleared();
        tx.execute(
            "INSERT INTO checkpoints (thread_id, generation, version, state, updated_at)
             VALUES (?1, ?2, 0, NULL, ?3)
             ON CONFLICT(thread_id) DO UPDATE SET
                generation = excluded.generation,
                version = 0,
                state = NULL,
                updated_at = excluded.updated_at",
            params![thread_id, to_sql(revision.generation)?, Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;

        tracing::debug!(thread_id = %thread_id, revision = %revision, "Checkpoint cleared");
        Ok(revision)
    }
}
