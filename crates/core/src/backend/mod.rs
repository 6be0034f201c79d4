//! Versioned object store abstraction.
//!
//! The cache only needs four things from a backend: list the versions of a
//! path newest-first, read one version, append a new version, and release
//! the connection. Native versioning of the backend is the only persistence
//! mechanism; nothing here overwrites or deletes.

pub mod memory;
pub mod sqlite;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{AppConfig, ConfigError};
use crate::error::BackendError;
use crate::selector::VersionRef;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// An append-only, natively versioned object store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List every version stored at exactly `path`, newest first.
    async fn list_versions(&self, path: &str) -> Result<Vec<VersionRef>, BackendError>;

    /// Read one version. `Ok(None)` means it no longer exists.
    async fn get_version(&self, path: &str, version_id: &str) -> Result<Option<Vec<u8>>, BackendError>;

    /// Write a new version at `path` with store-level metadata.
    async fn put(
        &self, path: &str, body: Vec<u8>, content_type: &str, metadata: BTreeMap<String, String>,
    ) -> Result<VersionRef, BackendError>;

    /// Release the connection. Further calls may fail with `BackendError::Closed`.
    async fn close(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

/// Constructs an [`ObjectStore`] when a session opens.
#[async_trait]
pub trait BackendProvider: Send + Sync {
    async fn connect(&self, config: &AppConfig) -> Result<Arc<dyn ObjectStore>, BackendError>;
}

/// Name to provider mapping, resolved once at startup.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    providers: HashMap<String, Arc<dyn BackendProvider>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the backends shipped in this crate: `sqlite` and `memory`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("sqlite", Arc::new(sqlite::SqliteProvider));
        registry.register("memory", Arc::new(memory::MemoryProvider::default()));
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn BackendProvider>) {
        self.providers.insert(name.into(), provider);
    }

    /// Look up a provider by name.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::UnknownBackend` if nothing is registered under `name`.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn BackendProvider>, ConfigError> {
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownBackend(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry").field("providers", &self.names()).finish()
    }
}
