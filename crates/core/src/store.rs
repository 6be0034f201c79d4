//! Cache store: key computation, version lookup and archival.
//!
//! [`CacheStorage`] is the closed state: a resolved backend provider plus
//! configuration. [`CacheStorage::open`] connects the backend for one crawl
//! session and returns a [`CacheSession`], which serves `retrieve` and
//! `store` until it is closed.

use std::sync::Arc;

use crate::Error;
use crate::backend::{BackendProvider, BackendRegistry, ObjectStore};
use crate::config::{AppConfig, ConfigError};
use crate::epoch::Epoch;
use crate::fingerprint::fingerprint;
use crate::http::{HISTORIC_FLAG, HttpRequest, HttpResponse};
use crate::record::{CacheRecord, MAX_OBJECT_KEY_LEN, MAX_PATH_URL_LEN, truncate, truncate_encoded};
use crate::selector::{VersionRef, select};
use crate::session::SessionInfo;

const RECORD_CONTENT_TYPE: &str = "application/json";
const SOURCE_CONTENT_TYPE: &str = "application/octet-stream";

/// Outcome of a history lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// A stored version was selected and decoded.
    Hit { response: HttpResponse, version: VersionRef },
    /// Nothing usable is stored for this request and epoch.
    Miss,
}

impl Lookup {
    pub fn is_hit(&self) -> bool {
        matches!(self, Lookup::Hit { .. })
    }
}

/// Closed storage: knows how to connect, holds no connection.
#[derive(Clone)]
pub struct CacheStorage {
    provider: Arc<dyn BackendProvider>,
    config: AppConfig,
}

impl CacheStorage {
    /// Resolve the configured backend.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::NotConfigured` when mandatory settings are
    /// missing, or `ConfigError::UnknownBackend` for an unregistered name.
    pub fn from_config(config: &AppConfig, registry: &BackendRegistry) -> Result<Self, ConfigError> {
        config.require_mandatory()?;
        let provider = registry.resolve(&config.backend)?;
        Ok(Self { provider, config: config.clone() })
    }

    /// Connect the backend and resolve the snapshot path for `session`.
    ///
    /// A session without a job id takes the configured one.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for a bad template and `Error::Backend` if the
    /// backend cannot be reached.
    pub async fn open(&self, session: &SessionInfo) -> Result<CacheSession, Error> {
        let source_prefix = match (&session.job_id, &self.config.job_id) {
            (None, Some(job_id)) => session.clone().with_job_id(job_id.clone()).render(&self.config.source_template)?,
            _ => session.render(&self.config.source_template)?,
        };
        let backend = self.provider.connect(&self.config).await?;
        tracing::info!(
            session = %session.name,
            backend = %self.config.backend,
            source_prefix = %source_prefix,
            "history storage opened"
        );
        Ok(CacheSession { backend, namespace: session.name.clone(), source_prefix })
    }
}

impl std::fmt::Debug for CacheStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStorage").field("backend", &self.config.backend).finish()
    }
}

/// Open storage for one crawl session.
///
/// All methods take `&self` and may run concurrently; the backend is the
/// only shared state.
pub struct CacheSession {
    backend: Arc<dyn ObjectStore>,
    namespace: String,
    source_prefix: String,
}

impl CacheSession {
    /// Build a session over an already connected backend.
    pub fn new(backend: Arc<dyn ObjectStore>, session: &SessionInfo, source_template: &str) -> Result<Self, ConfigError> {
        Ok(Self { backend, namespace: session.name.clone(), source_prefix: session.render(source_template)? })
    }

    /// Fingerprint of `request`, the key of its version chain.
    pub fn compute_key(&self, request: &HttpRequest) -> String {
        fingerprint(request)
    }

    /// Object path of the primary records for `key`.
    pub fn record_path(&self, key: &str) -> String {
        format!("{}/cache/{key}", self.namespace)
    }

    /// Object path of the raw-body snapshot for `key`.
    pub fn source_path(&self, key: &str, url: &str) -> String {
        let url = truncate(url, MAX_PATH_URL_LEN);
        let quoted: String = url::form_urlencoded::byte_serialize(url.as_bytes()).collect();
        let head = format!("{}/source/{key}__", self.source_prefix);
        let quoted = truncate_encoded(&quoted, MAX_OBJECT_KEY_LEN.saturating_sub(head.len()));
        format!("{head}{quoted}")
    }

    /// Resolved snapshot write-path prefix.
    pub fn source_prefix(&self) -> &str {
        &self.source_prefix
    }

    /// The version chain of `request`, newest first.
    ///
    /// # Errors
    ///
    /// Returns `Error::Backend` if listing fails.
    pub async fn versions(&self, request: &HttpRequest) -> Result<Vec<VersionRef>, Error> {
        let path = self.record_path(&self.compute_key(request));
        Ok(self.backend.list_versions(&path).await?)
    }

    /// Look up the version of `request` selected by `epoch`.
    ///
    /// A version that disappears between listing and fetching, or that no
    /// longer decodes, is a miss.
    ///
    /// # Errors
    ///
    /// Returns `Error::Backend` if listing or fetching fails.
    pub async fn retrieve(&self, request: &HttpRequest, epoch: &Epoch) -> Result<Lookup, Error> {
        if !epoch.is_enabled() {
            return Ok(Lookup::Miss);
        }

        let key = self.compute_key(request);
        let path = self.record_path(&key);
        let versions = self.backend.list_versions(&path).await?;

        let Some(version) = select(versions, epoch) else {
            tracing::debug!(%key, url = %request.url, "no stored versions");
            return Ok(Lookup::Miss);
        };

        tracing::debug!(%key, version_id = %version.version_id, last_modified = %version.last_modified, "retrieving version");

        let bytes = match self.backend.get_version(&path, &version.version_id).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                tracing::debug!(%key, version_id = %version.version_id, "selected version vanished");
                return Ok(Lookup::Miss);
            }
            Err(e) if e.is_not_found() => {
                tracing::debug!(%key, version_id = %version.version_id, "selected version vanished");
                return Ok(Lookup::Miss);
            }
            Err(e) => return Err(e.into()),
        };

        let decoded = CacheRecord::from_slice(&bytes).and_then(|record| record.decode());
        match decoded {
            Ok(mut response) => {
                if response.kind.is_text() {
                    tracing::debug!(%key, "retrieved textual body");
                } else {
                    tracing::debug!(%key, "retrieved binary body");
                }
                response.flags.push(HISTORIC_FLAG.to_string());
                Ok(Lookup::Hit { response, version })
            }
            Err(e) => {
                tracing::warn!(%key, version_id = %version.version_id, error = %e, "stored record unreadable");
                Ok(Lookup::Miss)
            }
        }
    }

    /// Archive `response` as a new version of `request`'s key.
    ///
    /// The raw body is also written to the snapshot path; that write is best
    /// effort and never fails the call once the record is stored.
    ///
    /// # Errors
    ///
    /// Returns `Error::Encode` if the response cannot be encoded and
    /// `Error::Backend` if the record write fails.
    pub async fn store(&self, request: &HttpRequest, response: &HttpResponse) -> Result<VersionRef, Error> {
        let key = self.compute_key(request);
        let record = CacheRecord::encode(request, response)?;
        let data = record.to_vec()?;
        tracing::debug!(%key, url = %request.url, size_kb = data.len() / 1024, "storing response");

        let version = self
            .backend
            .put(&self.record_path(&key), data, RECORD_CONTENT_TYPE, record.object_metadata())
            .await?;

        let source_path = self.source_path(&key, &request.url);
        match self
            .backend
            .put(&source_path, response.body.clone(), SOURCE_CONTENT_TYPE, Default::default())
            .await
        {
            Ok(_) => tracing::debug!(path = %source_path, body_kb = response.body.len() / 1024, "saved source snapshot"),
            Err(e) => tracing::warn!(path = %source_path, error = %e, "source snapshot not saved"),
        }

        Ok(version)
    }

    /// Release the backend connection.
    ///
    /// # Errors
    ///
    /// Returns `Error::Backend` if the backend fails to close cleanly.
    pub async fn close(&self) -> Result<(), Error> {
        self.backend.close().await?;
        tracing::info!(session = %self.namespace, "history storage closed");
        Ok(())
    }
}

impl std::fmt::Debug for CacheSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheSession")
            .field("namespace", &self.namespace)
            .field("source_prefix", &self.source_prefix)
            .finish()
    }
}
