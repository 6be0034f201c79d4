//! In-process versioned object store.
//!
//! Keeps every version in memory. Used by tests and by dry runs where
//! nothing should leave the process.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use tokio::sync::RwLock;

use super::{BackendProvider, ObjectStore};
use crate::config::AppConfig;
use crate::error::BackendError;
use crate::selector::VersionRef;

#[derive(Debug, Clone)]
struct StoredVersion {
    seq: u64,
    version: VersionRef,
    body: Vec<u8>,
    metadata: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct Inner {
    objects: RwLock<HashMap<String, Vec<StoredVersion>>>,
    next_seq: AtomicU64,
    closed: AtomicBool,
}

/// Versioned object store held in memory.
///
/// Clones share the same objects.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a version with an explicit timestamp.
    pub async fn insert_version_at(
        &self, path: &str, body: Vec<u8>, last_modified: DateTime<Utc>,
    ) -> Result<VersionRef, BackendError> {
        self.append(path, body, BTreeMap::new(), last_modified).await
    }

    /// Drop a version, as a bucket lifecycle rule would.
    pub async fn expire_version(&self, path: &str, version_id: &str) -> bool {
        let mut objects = self.inner.objects.write().await;
        let Some(versions) = objects.get_mut(path) else {
            return false;
        };
        let before = versions.len();
        versions.retain(|v| v.version.version_id != version_id);
        before != versions.len()
    }

    /// Store-level metadata of a version.
    pub async fn metadata(&self, path: &str, version_id: &str) -> Option<BTreeMap<String, String>> {
        let objects = self.inner.objects.read().await;
        objects
            .get(path)?
            .iter()
            .find(|v| v.version.version_id == version_id)
            .map(|v| v.metadata.clone())
    }

    /// Every path holding at least one version.
    pub async fn paths(&self) -> Vec<String> {
        let objects = self.inner.objects.read().await;
        let mut paths: Vec<String> = objects.iter().filter(|(_, v)| !v.is_empty()).map(|(k, _)| k.clone()).collect();
        paths.sort();
        paths
    }

    fn ensure_open(&self) -> Result<(), BackendError> {
        if self.inner.closed.load(Ordering::Acquire) { Err(BackendError::Closed) } else { Ok(()) }
    }

    async fn append(
        &self, path: &str, body: Vec<u8>, metadata: BTreeMap<String, String>, last_modified: DateTime<Utc>,
    ) -> Result<VersionRef, BackendError> {
        self.ensure_open()?;
        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let version = VersionRef::new(format!("mem-{seq:08}"), last_modified);

        let mut objects = self.inner.objects.write().await;
        objects
            .entry(path.to_string())
            .or_default()
            .push(StoredVersion { seq, version: version.clone(), body, metadata });
        Ok(version)
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list_versions(&self, path: &str) -> Result<Vec<VersionRef>, BackendError> {
        self.ensure_open()?;
        let objects = self.inner.objects.read().await;
        let mut versions: Vec<&StoredVersion> = objects.get(path).map(|v| v.iter().collect()).unwrap_or_default();
        versions.sort_by(|a, b| b.version.last_modified.cmp(&a.version.last_modified).then(b.seq.cmp(&a.seq)));
        Ok(versions.into_iter().map(|v| v.version.clone()).collect())
    }

    async fn get_version(&self, path: &str, version_id: &str) -> Result<Option<Vec<u8>>, BackendError> {
        self.ensure_open()?;
        let objects = self.inner.objects.read().await;
        Ok(objects
            .get(path)
            .and_then(|versions| versions.iter().find(|v| v.version.version_id == version_id))
            .map(|v| v.body.clone()))
    }

    async fn put(
        &self, path: &str, body: Vec<u8>, _content_type: &str, metadata: BTreeMap<String, String>,
    ) -> Result<VersionRef, BackendError> {
        // Listings only expose second precision.
        self.append(path, body, metadata, Utc::now().trunc_subsecs(0)).await
    }

    async fn close(&self) -> Result<(), BackendError> {
        self.inner.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// Provider handing out one shared [`MemoryStore`].
///
/// Each connect reopens the shared store so sessions can be cycled.
#[derive(Debug, Clone, Default)]
pub struct MemoryProvider {
    store: MemoryStore,
}

impl MemoryProvider {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl BackendProvider for MemoryProvider {
    async fn connect(&self, _config: &AppConfig) -> Result<Arc<dyn ObjectStore>, BackendError> {
        self.store.inner.closed.store(false, Ordering::Release);
        Ok(Arc::new(self.store.clone()))
    }
}
