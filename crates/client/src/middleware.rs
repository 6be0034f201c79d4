//! Request/response interception around the cache store.
//!
//! [`HistoryMiddleware::on_request`] decides whether a request is answered
//! from history, and [`HistoryMiddleware::on_response`] archives live
//! responses. Neither ever fails the crawl: store failures are logged and
//! counted, and retrieval failures degrade to a live fetch unless strict mode
//! (`ignore_missing`) is on.

use std::sync::Arc;

use rewind_core::policy::{PolicyRegistry, RetrievePolicy, StorePolicy};
use rewind_core::{
    AppConfig, BackendRegistry, CacheSession, CacheStorage, ConfigError, Epoch, Error, HttpRequest, HttpResponse,
    Lookup, SessionInfo, VersionRef,
};
use tokio::sync::RwLock;

use crate::stats::{HistoryStats, StatsSnapshot};

/// What to do with an outgoing request.
#[derive(Debug)]
pub enum Decision {
    /// Continue with a live fetch.
    Pass,
    /// Answer with this historical response.
    Serve(HttpResponse),
    /// Abandon the request.
    Reject(Error),
}

struct OpenSession {
    info: SessionInfo,
    cache: CacheSession,
}

/// History subsystem for one crawler process.
pub struct HistoryMiddleware {
    storage: CacheStorage,
    epoch: Epoch,
    ignore_missing: bool,
    retrieve_policy: Arc<dyn RetrievePolicy>,
    store_policy: Arc<dyn StorePolicy>,
    stats: HistoryStats,
    session: RwLock<Option<Arc<OpenSession>>>,
}

impl HistoryMiddleware {
    /// Build the middleware from configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::NotConfigured` when mandatory settings are
    /// missing; the subsystem must then stay inactive. Unknown backend or
    /// policy names and unparseable epochs are also rejected here.
    pub fn from_config(
        config: &AppConfig, backends: &BackendRegistry, policies: &PolicyRegistry,
    ) -> Result<Self, ConfigError> {
        let storage = CacheStorage::from_config(config, backends)?;
        let epoch = config.epoch()?;
        let (retrieve_policy, store_policy) = policies.resolve(config)?;

        tracing::debug!(
            ?epoch,
            backend = %config.backend,
            retrieve_if = %config.retrieve_if,
            store_if = %config.store_if,
            ignore_missing = config.ignore_missing,
            "history middleware configured"
        );

        Ok(Self {
            storage,
            epoch,
            ignore_missing: config.ignore_missing,
            retrieve_policy,
            store_policy,
            stats: HistoryStats::new(),
            session: RwLock::new(None),
        })
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub async fn is_open(&self) -> bool {
        self.session.read().await.is_some()
    }

    /// Open storage for a crawl session. An already open session is closed first.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be connected or the snapshot
    /// path template does not render.
    pub async fn open_session(&self, info: SessionInfo) -> Result<(), Error> {
        if self.is_open().await {
            tracing::warn!(session = %info.name, "history session already open, closing it first");
            self.close_session().await?;
        }

        let cache = self.storage.open(&info).await?;
        self.retrieve_policy.session_opened(&info);
        self.store_policy.session_opened(&info);
        *self.session.write().await = Some(Arc::new(OpenSession { info, cache }));
        Ok(())
    }

    /// Close the current session, if any.
    ///
    /// # Errors
    ///
    /// Returns `Error::Backend` if the backend fails to close. The session is
    /// dropped either way.
    pub async fn close_session(&self) -> Result<(), Error> {
        let Some(open) = self.session.write().await.take() else {
            return Ok(());
        };

        self.retrieve_policy.session_closed(&open.info);
        self.store_policy.session_closed(&open.info);
        let snapshot = self.stats.snapshot();
        tracing::info!(
            session = %open.info.name,
            retrieved = snapshot.retrieved,
            missed = snapshot.missed,
            cached = snapshot.cached,
            "history session finished"
        );
        open.cache.close().await
    }

    async fn current(&self) -> Option<Arc<OpenSession>> {
        self.session.read().await.clone()
    }

    /// Decide how to handle `request`.
    ///
    /// With an active epoch and no open session the request is rejected
    /// before the retrieve predicate runs, since predicates are evaluated
    /// against the open session.
    pub async fn on_request(&self, request: &HttpRequest) -> Decision {
        if !self.epoch.is_enabled() {
            return Decision::Pass;
        }

        let Some(open) = self.current().await else {
            self.stats.record_rejected();
            tracing::warn!(url = %request.url, "history storage not open, rejecting request");
            return Decision::Reject(Error::SessionClosed);
        };

        let approved = match self.retrieve_policy.should_retrieve(&open.info, request) {
            Ok(approved) => approved,
            Err(e) => {
                self.stats.record_error();
                tracing::warn!(url = %request.url, error = %e, "retrieve policy failed");
                false
            }
        };
        if !approved {
            return Decision::Pass;
        }

        match open.cache.retrieve(request, &self.epoch).await {
            Ok(Lookup::Hit { response, version }) => {
                self.stats.record_retrieved();
                tracing::debug!(url = %request.url, version_id = %version.version_id, "served from history");
                Decision::Serve(response)
            }
            Ok(Lookup::Miss) => {
                self.stats.record_missed();
                if self.ignore_missing {
                    self.stats.record_rejected();
                    tracing::debug!(url = %request.url, "not in history, rejecting");
                    Decision::Reject(Error::NotInHistory(request.to_string()))
                } else {
                    Decision::Pass
                }
            }
            Err(e) => {
                self.stats.record_error();
                if self.ignore_missing {
                    self.stats.record_rejected();
                    tracing::warn!(url = %request.url, error = %e, "history lookup failed, rejecting");
                    Decision::Reject(e)
                } else {
                    tracing::warn!(url = %request.url, error = %e, "history lookup failed, fetching live");
                    Decision::Pass
                }
            }
        }
    }

    /// Archive `response` if the store policy approves. Always hands the
    /// response back unchanged.
    pub async fn on_response(&self, request: &HttpRequest, response: HttpResponse) -> HttpResponse {
        let Some(open) = self.current().await else {
            tracing::debug!(url = %request.url, "history storage not open, response not archived");
            return response;
        };

        match self.store_policy.should_store(&open.info, request, &response) {
            Ok(true) => {}
            Ok(false) => return response,
            Err(e) => {
                self.stats.record_error();
                tracing::warn!(url = %request.url, error = %e, "store policy failed");
                return response;
            }
        }

        match open.cache.store(request, &response).await {
            Ok(version) => {
                self.stats.record_cached();
                tracing::debug!(url = %request.url, version_id = %version.version_id, "archived response");
            }
            Err(e) => {
                self.stats.record_store_failed();
                tracing::error!(url = %request.url, error = %e, "failed to archive response");
            }
        }
        response
    }

    /// Version chain of `request` with the entry the configured epoch selects.
    ///
    /// # Errors
    ///
    /// Returns `Error::SessionClosed` outside a session, or `Error::Backend`
    /// if listing fails.
    pub async fn versions(&self, request: &HttpRequest) -> Result<(Vec<VersionRef>, Option<VersionRef>), Error> {
        let open = self.current().await.ok_or(Error::SessionClosed)?;
        let versions = open.cache.versions(request).await?;
        let selected = if self.epoch.is_enabled() {
            rewind_core::select(versions.iter().cloned(), &self.epoch)
        } else {
            None
        };
        Ok((versions, selected))
    }

    /// Fingerprint used as the cache key of `request`.
    pub fn compute_key(&self, request: &HttpRequest) -> String {
        rewind_core::fingerprint(request)
    }
}

impl std::fmt::Debug for HistoryMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryMiddleware")
            .field("storage", &self.storage)
            .field("epoch", &self.epoch)
            .field("ignore_missing", &self.ignore_missing)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rewind_core::backend::memory::MemoryProvider;
    use rewind_core::error::PolicyError;
    use rewind_core::{EpochSetting, Headers, MemoryStore, ObjectStore};

    fn config(epoch: EpochSetting) -> AppConfig {
        AppConfig {
            bucket: Some("history".into()),
            access_key_id: Some("id".into()),
            secret_access_key: Some("secret".into()),
            backend: "memory".into(),
            retrieve_if: "always".into(),
            epoch,
            ..Default::default()
        }
    }

    fn backends(store: &MemoryStore) -> BackendRegistry {
        let mut registry = BackendRegistry::new();
        registry.register("memory", Arc::new(MemoryProvider::new(store.clone())));
        registry
    }

    fn middleware(config: &AppConfig, store: &MemoryStore) -> HistoryMiddleware {
        HistoryMiddleware::from_config(config, &backends(store), &PolicyRegistry::default()).unwrap()
    }

    fn request() -> HttpRequest {
        HttpRequest::get("https://example.com/page")
    }

    fn live(status: u16, body: &str) -> HttpResponse {
        let headers: Headers = [("Content-Type", "text/plain; charset=utf-8")].into_iter().collect();
        HttpResponse::new("https://example.com/page", status, headers, body.as_bytes().to_vec())
    }

    #[test]
    fn test_unconfigured_does_not_activate() {
        let store = MemoryStore::new();
        let config = AppConfig { backend: "memory".into(), ..Default::default() };
        let result = HistoryMiddleware::from_config(&config, &backends(&store), &PolicyRegistry::default());
        assert!(matches!(result, Err(ConfigError::NotConfigured(missing)) if missing.contains("bucket")));
    }

    #[test]
    fn test_unknown_policy_rejected() {
        let store = MemoryStore::new();
        let config = AppConfig { store_if: "sometimes".into(), ..config(true.into()) };
        let result = HistoryMiddleware::from_config(&config, &backends(&store), &PolicyRegistry::default());
        assert!(matches!(result, Err(ConfigError::UnknownPolicy(_))));
    }

    #[tokio::test]
    async fn test_no_history_passes_without_session() {
        let store = MemoryStore::new();
        let mw = middleware(&config(false.into()), &store);
        assert!(matches!(mw.on_request(&request()).await, Decision::Pass));
    }

    #[tokio::test]
    async fn test_closed_session_rejects() {
        let store = MemoryStore::new();
        let mw = middleware(&config(true.into()), &store);
        assert!(matches!(mw.on_request(&request()).await, Decision::Reject(Error::SessionClosed)));
        assert_eq!(mw.stats().rejected, 1);
    }

    #[tokio::test]
    async fn test_closed_session_rejects_before_predicate() {
        let store = MemoryStore::new();
        let config = AppConfig { retrieve_if: "never".into(), ..config(true.into()) };
        let mw = middleware(&config, &store);
        assert!(matches!(mw.on_request(&request()).await, Decision::Reject(Error::SessionClosed)));
        assert_eq!(mw.stats().errors, 0);
    }

    #[tokio::test]
    async fn test_archive_then_serve() {
        let store = MemoryStore::new();
        let mw = middleware(&config(true.into()), &store);
        mw.open_session(SessionInfo::new("crawler")).await.unwrap();

        assert!(matches!(mw.on_request(&request()).await, Decision::Pass));
        let delivered = mw.on_response(&request(), live(200, "fresh")).await;
        assert_eq!(delivered.body, b"fresh");
        assert!(!delivered.is_historic());

        match mw.on_request(&request()).await {
            Decision::Serve(response) => {
                assert!(response.is_historic());
                assert_eq!(response.body, b"fresh");
            }
            other => panic!("expected Serve, got {other:?}"),
        }

        let stats = mw.stats();
        assert_eq!(stats.missed, 1);
        assert_eq!(stats.cached, 1);
        assert_eq!(stats.retrieved, 1);
        mw.close_session().await.unwrap();
    }

    #[tokio::test]
    async fn test_historic_response_not_rearchived() {
        let store = MemoryStore::new();
        let mw = middleware(&config(true.into()), &store);
        mw.open_session(SessionInfo::new("crawler")).await.unwrap();
        mw.on_response(&request(), live(200, "once")).await;

        let Decision::Serve(replayed) = mw.on_request(&request()).await else {
            panic!("expected Serve");
        };
        mw.on_response(&request(), replayed).await;

        let (versions, _) = mw.versions(&request()).await.unwrap();
        assert_eq!(versions.len(), 1);
    }

    #[tokio::test]
    async fn test_strict_mode_rejects_misses() {
        let store = MemoryStore::new();
        let config = AppConfig { ignore_missing: true, ..config(true.into()) };
        let mw = middleware(&config, &store);
        mw.open_session(SessionInfo::new("crawler")).await.unwrap();

        assert!(matches!(mw.on_request(&request()).await, Decision::Reject(Error::NotInHistory(_))));
        let stats = mw.stats();
        assert_eq!(stats.missed, 1);
        assert_eq!(stats.rejected, 1);
    }

    #[tokio::test]
    async fn test_retrieve_never_passes() {
        let store = MemoryStore::new();
        let config = AppConfig { retrieve_if: "never".into(), ..config(true.into()) };
        let mw = middleware(&config, &store);
        mw.open_session(SessionInfo::new("crawler")).await.unwrap();
        mw.on_response(&request(), live(200, "stored")).await;

        assert!(matches!(mw.on_request(&request()).await, Decision::Pass));
        assert_eq!(mw.stats().retrieved, 0);
    }

    #[tokio::test]
    async fn test_store_failure_keeps_response() {
        let store = MemoryStore::new();
        let mw = middleware(&config(true.into()), &store);
        mw.open_session(SessionInfo::new("crawler")).await.unwrap();
        store.close().await.unwrap();

        let delivered = mw.on_response(&request(), live(200, "body")).await;
        assert_eq!(delivered.body, b"body");
        assert_eq!(mw.stats().store_failed, 1);
    }

    #[tokio::test]
    async fn test_lookup_failure_falls_back_to_live() {
        let store = MemoryStore::new();
        let mw = middleware(&config(true.into()), &store);
        mw.open_session(SessionInfo::new("crawler")).await.unwrap();
        store.close().await.unwrap();

        assert!(matches!(mw.on_request(&request()).await, Decision::Pass));
        assert_eq!(mw.stats().errors, 1);
    }

    #[tokio::test]
    async fn test_lookup_failure_rejects_in_strict_mode() {
        let store = MemoryStore::new();
        let config = AppConfig { ignore_missing: true, ..config(true.into()) };
        let mw = middleware(&config, &store);
        mw.open_session(SessionInfo::new("crawler")).await.unwrap();
        store.close().await.unwrap();

        assert!(matches!(mw.on_request(&request()).await, Decision::Reject(Error::Backend(_))));
    }

    #[tokio::test]
    async fn test_predicate_error_means_no() {
        struct Broken;
        impl RetrievePolicy for Broken {
            fn should_retrieve(&self, _s: &SessionInfo, _r: &HttpRequest) -> Result<bool, PolicyError> {
                Err(PolicyError::new("broken", "boom"))
            }
        }

        let store = MemoryStore::new();
        let mut policies = PolicyRegistry::default();
        policies.register_retrieve("broken", Arc::new(Broken));
        let config = AppConfig { retrieve_if: "broken".into(), ..config(true.into()) };
        let mw = HistoryMiddleware::from_config(&config, &backends(&store), &policies).unwrap();
        mw.open_session(SessionInfo::new("crawler")).await.unwrap();

        assert!(matches!(mw.on_request(&request()).await, Decision::Pass));
        assert_eq!(mw.stats().errors, 1);
    }

    #[tokio::test]
    async fn test_store_successful_skips_errors() {
        let store = MemoryStore::new();
        let config = AppConfig { store_if: "successful".into(), ..config(true.into()) };
        let mw = middleware(&config, &store);
        mw.open_session(SessionInfo::new("crawler")).await.unwrap();

        mw.on_response(&request(), live(500, "oops")).await;
        assert_eq!(mw.stats().cached, 0);
        mw.on_response(&request(), live(200, "ok")).await;
        assert_eq!(mw.stats().cached, 1);
    }

    #[tokio::test]
    async fn test_versions_marks_selection() {
        let store = MemoryStore::new();
        let mw = middleware(&config(true.into()), &store);
        mw.open_session(SessionInfo::new("crawler")).await.unwrap();
        mw.on_response(&request(), live(200, "a")).await;
        mw.on_response(&request(), live(200, "b")).await;

        let (versions, selected) = mw.versions(&request()).await.unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(selected.as_ref(), versions.first());
    }

    #[tokio::test]
    async fn test_close_session_is_idempotent() {
        let store = MemoryStore::new();
        let mw = middleware(&config(true.into()), &store);
        mw.close_session().await.unwrap();
        mw.open_session(SessionInfo::new("crawler")).await.unwrap();
        assert!(mw.is_open().await);
        mw.close_session().await.unwrap();
        assert!(!mw.is_open().await);
        assert!(matches!(mw.versions(&request()).await, Err(Error::SessionClosed)));
    }
}
