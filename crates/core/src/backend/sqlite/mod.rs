//! SQLite-backed versioned object store.
//!
//! Every `put` appends a row; a path's version chain is its rows ordered by
//! timestamp then insertion order, newest first. Timestamps are stored as
//! RFC 3339 at second precision, so lexical order is chronological order.

mod migrations;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use tokio_rusqlite::rusqlite::OptionalExtension;
use tokio_rusqlite::{Connection, params};

use super::{BackendProvider, ObjectStore};
use crate::config::AppConfig;
use crate::error::BackendError;
use crate::selector::VersionRef;

const PRAGMAS: &str = "PRAGMA journal_mode=WAL;
     PRAGMA synchronous=NORMAL;
     PRAGMA temp_store=MEMORY;
     PRAGMA foreign_keys=ON;";

/// Versioned object store in a SQLite database.
///
/// Wraps a tokio-rusqlite Connection that runs database operations
/// on a background thread.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open a database at the specified path.
    ///
    /// Creates the file if it doesn't exist, applies performance pragmas,
    /// and runs any pending migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, BackendError> {
        let conn = Connection::open(path).await.map_err(|e| BackendError::Database(e.into()))?;
        Self::prepare(conn).await
    }

    /// Open an in-memory database for testing.
    pub async fn open_in_memory() -> Result<Self, BackendError> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| BackendError::Database(e.into()))?;
        Self::prepare(conn).await
    }

    async fn prepare(conn: Connection) -> Result<Self, BackendError> {
        conn.call(|conn| conn.execute_batch(PRAGMAS))
            .await
            .map_err(BackendError::Database)?;

        migrations::run(&conn).await?;

        Ok(Self { conn })
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, BackendError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| BackendError::Transport(format!("corrupt timestamp {raw:?}: {e}")))
}

#[async_trait]
impl ObjectStore for SqliteStore {
    async fn list_versions(&self, path: &str) -> Result<Vec<VersionRef>, BackendError> {
        let path = path.to_string();
        let rows = self
            .conn
            .call(move |conn| -> Result<Vec<(i64, String)>, BackendError> {
                let mut stmt = conn.prepare(
                    "SELECT seq, last_modified FROM object_versions
                     WHERE path = ?1
                     ORDER BY last_modified DESC, seq DESC",
                )?;
                let rows = stmt
                    .query_map(params![path], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(BackendError::from)?;

        rows.into_iter()
            .map(|(seq, raw)| Ok(VersionRef::new(seq.to_string(), parse_timestamp(&raw)?)))
            .collect()
    }

    async fn get_version(&self, path: &str, version_id: &str) -> Result<Option<Vec<u8>>, BackendError> {
        let Ok(seq) = version_id.parse::<i64>() else {
            return Ok(None);
        };
        let path = path.to_string();
        self.conn
            .call(move |conn| -> Result<Option<Vec<u8>>, BackendError> {
                let body = conn
                    .query_row(
                        "SELECT body FROM object_versions WHERE path = ?1 AND seq = ?2",
                        params![path, seq],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(body)
            })
            .await
            .map_err(BackendError::from)
    }

    async fn put(
        &self, path: &str, body: Vec<u8>, content_type: &str, metadata: BTreeMap<String, String>,
    ) -> Result<VersionRef, BackendError> {
        let path = path.to_string();
        let content_type = content_type.to_string();
        let last_modified = Utc::now().trunc_subsecs(0);
        let stamp = last_modified.to_rfc3339_opts(SecondsFormat::Secs, true);
        let metadata_json =
            serde_json::to_string(&metadata).map_err(|e| BackendError::Transport(format!("metadata: {e}")))?;

        let seq = self
            .conn
            .call(move |conn| -> Result<i64, BackendError> {
                conn.execute(
                    "INSERT INTO object_versions (path, last_modified, content_type, metadata_json, body)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![path, stamp, content_type, metadata_json, body],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
            .map_err(BackendError::from)?;

        Ok(VersionRef::new(seq.to_string(), last_modified))
    }

    async fn close(&self) -> Result<(), BackendError> {
        // Shuts down the shared background thread; later calls on any clone
        // fail with BackendError::Closed.
        self.conn.clone().close().await.map_err(|e| BackendError::Database(e.into()))
    }
}

/// Opens `{db_dir}/{bucket}.sqlite`, creating the directory if needed.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteProvider;

#[async_trait]
impl BackendProvider for SqliteProvider {
    async fn connect(&self, config: &AppConfig) -> Result<Arc<dyn ObjectStore>, BackendError> {
        let bucket = config.bucket.as_deref().ok_or_else(|| BackendError::NotFound("bucket".into()))?;
        std::fs::create_dir_all(&config.db_dir)
            .map_err(|e| BackendError::Transport(format!("{}: {e}", config.db_dir.display())))?;

        let path = config.db_dir.join(format!("{bucket}.sqlite"));
        tracing::info!(path = %path.display(), "opening sqlite history store");
        Ok(Arc::new(SqliteStore::open(path).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn provider_config(dir: &TempDir) -> AppConfig {
        AppConfig { bucket: Some("history".into()), db_dir: dir.path().join("nested/db"), ..Default::default() }
    }

    #[tokio::test]
    async fn test_provider_creates_bucket_database() {
        let dir = TempDir::new().unwrap();
        let config = provider_config(&dir);

        let store = SqliteProvider.connect(&config).await.unwrap();
        store.put("ns/cache/k", b"kept".to_vec(), "application/json", BTreeMap::new()).await.unwrap();
        store.close().await.unwrap();

        assert!(dir.path().join("nested/db/history.sqlite").is_file());
    }

    #[tokio::test]
    async fn test_provider_reopen_keeps_versions() {
        let dir = TempDir::new().unwrap();
        let config = provider_config(&dir);

        let store = SqliteProvider.connect(&config).await.unwrap();
        let first = store.put("ns/cache/k", b"one".to_vec(), "application/json", BTreeMap::new()).await.unwrap();
        store.close().await.unwrap();

        let reopened = SqliteProvider.connect(&config).await.unwrap();
        let second = reopened.put("ns/cache/k", b"two".to_vec(), "application/json", BTreeMap::new()).await.unwrap();
        let listed = reopened.list_versions("ns/cache/k").await.unwrap();
        assert_eq!(listed, vec![second, first.clone()]);

        let body = reopened.get_version("ns/cache/k", &first.version_id).await.unwrap();
        assert_eq!(body.as_deref(), Some(&b"one"[..]));
        reopened.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_provider_requires_bucket() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig { bucket: None, ..provider_config(&dir) };
        assert!(matches!(SqliteProvider.connect(&config).await, Err(BackendError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_open_in_memory() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let version = store
            .conn
            .call(|conn| conn.query_row("SELECT sqlite_version()", [], |row| row.get::<_, String>(0)))
            .await
            .unwrap();
        assert!(!version.is_empty());
    }

    #[tokio::test]
    async fn test_put_appends_versions() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let first = store.put("ns/cache/k", b"one".to_vec(), "application/json", BTreeMap::new()).await.unwrap();
        let second = store.put("ns/cache/k", b"two".to_vec(), "application/json", BTreeMap::new()).await.unwrap();
        assert_ne!(first.version_id, second.version_id);

        let listed = store.list_versions("ns/cache/k").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].version_id, second.version_id);
        assert_eq!(listed[1].version_id, first.version_id);

        let body = store.get_version("ns/cache/k", &first.version_id).await.unwrap();
        assert_eq!(body.as_deref(), Some(&b"one"[..]));
    }

    #[tokio::test]
    async fn test_list_unknown_path_is_empty() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        assert!(store.list_versions("nothing/here").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_unknown_version() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let v = store.put("p", b"x".to_vec(), "", BTreeMap::new()).await.unwrap();
        assert!(store.get_version("p", "999").await.unwrap().is_none());
        assert!(store.get_version("p", "not-a-seq").await.unwrap().is_none());
        assert!(store.get_version("other", &v.version_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_timestamps_are_second_precision() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let v = store.put("p", b"x".to_vec(), "", BTreeMap::new()).await.unwrap();
        let listed = store.list_versions("p").await.unwrap();
        assert_eq!(listed[0].last_modified, v.last_modified);
        assert_eq!(v.last_modified.timestamp_subsec_nanos(), 0);
    }
}
