//! Pluggable retrieve/store decision predicates.
//!
//! The glue asks a [`RetrievePolicy`] whether a request may be answered from
//! history, and a [`StorePolicy`] whether a response should be archived.
//! Policies are picked by name from a [`PolicyRegistry`] at startup.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{AppConfig, ConfigError};
use crate::error::PolicyError;
use crate::http::{HttpRequest, HttpResponse};
use crate::session::SessionInfo;

/// Decides whether a request should be looked up in history.
pub trait RetrievePolicy: Send + Sync {
    fn should_retrieve(&self, session: &SessionInfo, request: &HttpRequest) -> Result<bool, PolicyError>;

    fn session_opened(&self, _session: &SessionInfo) {}

    fn session_closed(&self, _session: &SessionInfo) {}
}

/// Decides whether a response should be archived.
pub trait StorePolicy: Send + Sync {
    fn should_store(
        &self, session: &SessionInfo, request: &HttpRequest, response: &HttpResponse,
    ) -> Result<bool, PolicyError>;

    fn session_opened(&self, _session: &SessionInfo) {}

    fn session_closed(&self, _session: &SessionInfo) {}
}

/// Never consult history.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetrieveNever;

impl RetrievePolicy for RetrieveNever {
    fn should_retrieve(&self, _session: &SessionInfo, _request: &HttpRequest) -> Result<bool, PolicyError> {
        Ok(false)
    }
}

/// Always consult history.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetrieveAlways;

impl RetrievePolicy for RetrieveAlways {
    fn should_retrieve(&self, _session: &SessionInfo, _request: &HttpRequest) -> Result<bool, PolicyError> {
        Ok(true)
    }
}

/// Archive every response that did not come from history.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreAlways;

impl StorePolicy for StoreAlways {
    fn should_store(
        &self, _session: &SessionInfo, _request: &HttpRequest, response: &HttpResponse,
    ) -> Result<bool, PolicyError> {
        Ok(!response.is_historic())
    }
}

/// Never archive.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreNever;

impl StorePolicy for StoreNever {
    fn should_store(
        &self, _session: &SessionInfo, _request: &HttpRequest, _response: &HttpResponse,
    ) -> Result<bool, PolicyError> {
        Ok(false)
    }
}

/// Archive live 2xx responses only.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreSuccessful;

impl StorePolicy for StoreSuccessful {
    fn should_store(
        &self, _session: &SessionInfo, _request: &HttpRequest, response: &HttpResponse,
    ) -> Result<bool, PolicyError> {
        Ok(response.is_success() && !response.is_historic())
    }
}

/// Named retrieve and store predicates.
#[derive(Clone)]
pub struct PolicyRegistry {
    retrieve: HashMap<String, Arc<dyn RetrievePolicy>>,
    store: HashMap<String, Arc<dyn StorePolicy>>,
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        let mut registry = Self { retrieve: HashMap::new(), store: HashMap::new() };
        registry.register_retrieve("never", Arc::new(RetrieveNever));
        registry.register_retrieve("always", Arc::new(RetrieveAlways));
        registry.register_store("always", Arc::new(StoreAlways));
        registry.register_store("never", Arc::new(StoreNever));
        registry.register_store("successful", Arc::new(StoreSuccessful));
        registry
    }
}

impl PolicyRegistry {
    pub fn register_retrieve(&mut self, name: impl Into<String>, policy: Arc<dyn RetrievePolicy>) {
        self.retrieve.insert(name.into(), policy);
    }

    pub fn register_store(&mut self, name: impl Into<String>, policy: Arc<dyn StorePolicy>) {
        self.store.insert(name.into(), policy);
    }

    /// # Errors
    ///
    /// Returns `ConfigError::UnknownPolicy` if `name` is not registered.
    pub fn retrieve(&self, name: &str) -> Result<Arc<dyn RetrievePolicy>, ConfigError> {
        self.retrieve
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownPolicy(format!("retrieve_if={name}")))
    }

    /// # Errors
    ///
    /// Returns `ConfigError::UnknownPolicy` if `name` is not registered.
    pub fn store(&self, name: &str) -> Result<Arc<dyn StorePolicy>, ConfigError> {
        self.store
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownPolicy(format!("store_if={name}")))
    }

    /// Resolve both predicates named by the configuration.
    pub fn resolve(&self, config: &AppConfig) -> Result<(Arc<dyn RetrievePolicy>, Arc<dyn StorePolicy>), ConfigError> {
        Ok((self.retrieve(&config.retrieve_if)?, self.store(&config.store_if)?))
    }
}
