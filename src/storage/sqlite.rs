//! SQLite experiment store.
//!
//! Schema: one `experiments` row per experiment and one
//! `dataset_partitions` row per experiment dataset, both holding JSON.
//! Calls block the current thread for the duration of the statement.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::traits::ExperimentStore;
use crate::dataset::Dataset;
use crate::error::Result;
use crate::experiment::Experiment;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS experiments (
    id TEXT PRIMARY KEY,
    created_at TEXT NOT NULL,
    body TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS dataset_partitions (
    experiment_id TEXT PRIMARY KEY,
    record_count INTEGER NOT NULL,
    body TEXT NOT NULL
);
";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

#[async_trait]
impl ExperimentStore for SqliteStore {
    async fn persist_experiment(&self, experiment: &Experiment) -> Result<()> {
        let body = serde_json::to_string(experiment)?;
        self.conn.lock().execute(
            "INSERT INTO experiments (id, created_at, body) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET body = excluded.body",
            params![
                experiment.id.to_string(),
                experiment.created_at.to_rfc3339(),
                body
            ],
        )?;
        Ok(())
    }

    async fn persist_dataset_partition(&self, experiment_id: Uuid, dataset: &Dataset) -> Result<()> {
        let body = serde_json::to_string(dataset)?;
        self.conn.lock().execute(
            "INSERT INTO dataset_partitions (experiment_id, record_count, body) VALUES (?1, ?2, ?3)
             ON CONFLICT(experiment_id) DO UPDATE SET
                record_count = excluded.record_count, body = excluded.body",
            params![experiment_id.to_string(), dataset.len() as i64, body],
        )?;
        Ok(())
    }

    async fn load_experiment(&self, id: Uuid) -> Result<Option<Experiment>> {
        let body: Option<String> = self
            .conn
            .lock()
            .query_row(
                "SELECT body FROM experiments WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        body.map(|b| serde_json::from_str(&b).map_err(Into::into))
            .transpose()
    }

    async fn load_dataset(&self, experiment_id: Uuid) -> Result<Option<Arc<Dataset>>> {
        let body: Option<String> = self
            .conn
            .lock()
            .query_row(
                "SELECT body FROM dataset_partitions WHERE experiment_id = ?1",
                params![experiment_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        match body {
            Some(b) => Ok(Some(Arc::new(serde_json::from_str(&b)?))),
            None => Ok(None),
        }
    }

    async fn list_experiments(&self) -> Result<Vec<Experiment>> {
        let bodies: Vec<String> = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare("SELECT body FROM experiments ORDER BY created_at, id")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        bodies
            .iter()
            .map(|b| serde_json::from_str(b).map_err(Into::into))
            .collect()
    }

    async fn delete_experiment(&self, id: Uuid) -> Result<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM dataset_partitions WHERE experiment_id = ?1",
            params![id.to_string()],
        )?;
        let removed = tx.execute("DELETE FROM experiments WHERE id = ?1", params![id.to_string()])?;
        tx.commit()?;
        Ok(removed > 0)
    }
}
