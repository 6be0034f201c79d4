//! Core types and shared functionality for rewind.
//!
//! This crate provides:
//! - Epoch parsing and version selection
//! - Request fingerprints and the persisted record format
//! - The versioned object store abstraction with SQLite and in-memory backends
//! - The cache store that ties them together
//! - Retrieve/store policies, configuration and unified error types

pub mod backend;
pub mod config;
pub mod epoch;
pub mod error;
pub mod fingerprint;
pub mod http;
pub mod policy;
pub mod record;
pub mod selector;
pub mod session;
pub mod store;

pub use backend::{BackendProvider, BackendRegistry, MemoryStore, ObjectStore, SqliteStore};
pub use config::{AppConfig, ConfigError};
pub use epoch::{Epoch, EpochSetting};
pub use error::{BackendError, Error, PolicyError};
pub use fingerprint::{canonical_url, compute_cache_key, fingerprint};
pub use http::{HISTORIC_FLAG, Headers, HttpRequest, HttpResponse, ResponseKind};
pub use policy::{PolicyRegistry, RetrievePolicy, StorePolicy};
pub use record::CacheRecord;
pub use selector::{VersionRef, select};
pub use session::SessionInfo;
pub use store::{CacheSession, CacheStorage, Lookup};
