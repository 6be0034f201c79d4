//! History cache configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (REWIND_*)
//! 2. TOML config file (if REWIND_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::epoch::{Epoch, EpochSetting};

mod validation;

pub use validation::ConfigError;

/// Default snapshot write-path template: spider name, session start and job id.
pub const DEFAULT_SOURCE_TEMPLATE: &str = "{name}/{time}_{jobid}";

/// History cache configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (REWIND_*)
/// 2. TOML config file (if REWIND_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Bucket holding the version chains. Mandatory.
    ///
    /// Set via REWIND_BUCKET environment variable.
    #[serde(default)]
    pub bucket: Option<String>,

    /// Object store access key. Mandatory.
    ///
    /// Set via REWIND_ACCESS_KEY_ID environment variable.
    #[serde(default)]
    pub access_key_id: Option<String>,

    /// Object store secret key. Mandatory.
    ///
    /// Set via REWIND_SECRET_ACCESS_KEY environment variable.
    #[serde(default)]
    pub secret_access_key: Option<String>,

    /// Region of the bucket.
    #[serde(default = "default_region")]
    pub region: String,

    /// Custom endpoint for S3-compatible stores (MinIO, R2, ...).
    #[serde(default)]
    pub endpoint_url: Option<String>,

    /// Use path-style bucket addressing.
    #[serde(default)]
    pub force_path_style: bool,

    /// Which history to serve: bool, `YYYYMMDD`, or a relative phrase.
    ///
    /// Set via REWIND_EPOCH environment variable.
    #[serde(default)]
    pub epoch: EpochSetting,

    /// Name of the retrieve-decision predicate.
    #[serde(default = "default_retrieve_if")]
    pub retrieve_if: String,

    /// Name of the store-decision predicate.
    #[serde(default = "default_store_if")]
    pub store_if: String,

    /// Name of the object store backend.
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Abort requests that are not in history instead of fetching them live.
    ///
    /// Set via REWIND_IGNORE_MISSING environment variable.
    #[serde(default)]
    pub ignore_missing: bool,

    /// Scheduler job id used when a session does not carry one.
    ///
    /// Set via REWIND_JOB_ID environment variable.
    #[serde(default)]
    pub job_id: Option<String>,

    /// Write-path template for source snapshots.
    #[serde(default = "default_source_template")]
    pub source_template: String,

    /// Directory holding the sqlite backend database files.
    #[serde(default = "default_db_dir")]
    pub db_dir: PathBuf,

    /// User-Agent string for live fetches.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Live fetch timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_region() -> String {
    "us-east-1".into()
}

fn default_retrieve_if() -> String {
    "never".into()
}

fn default_store_if() -> String {
    "always".into()
}

fn default_backend() -> String {
    "s3".into()
}

fn default_source_template() -> String {
    DEFAULT_SOURCE_TEMPLATE.into()
}

fn default_db_dir() -> PathBuf {
    PathBuf::from("./rewind-history")
}

fn default_user_agent() -> String {
    "rewind/0.1".into()
}

fn default_timeout_ms() -> u64 {
    20_000
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bucket: None,
            access_key_id: None,
            secret_access_key: None,
            region: default_region(),
            endpoint_url: None,
            force_path_style: false,
            epoch: EpochSetting::default(),
            retrieve_if: default_retrieve_if(),
            store_if: default_store_if(),
            backend: default_backend(),
            ignore_missing: false,
            job_id: None,
            source_template: default_source_template(),
            db_dir: default_db_dir(),
            user_agent: default_user_agent(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl AppConfig {
    /// Timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `REWIND_`
    /// 2. TOML file from `REWIND_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// Mandatory settings are not checked here; see [`AppConfig::require_mandatory`].
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("REWIND_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("REWIND_")
                .ignore(&["config_file"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// Resolve the configured epoch setting.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::UnparseableEpoch` if the setting is not understood.
    pub fn epoch(&self) -> Result<Epoch, ConfigError> {
        Epoch::parse(self.epoch.clone())
    }

    /// Check that every mandatory setting is present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::NotConfigured` naming all missing settings.
    pub fn require_mandatory(&self) -> Result<(), ConfigError> {
        let missing: Vec<&str> = [
            ("bucket", &self.bucket),
            ("access_key_id", &self.access_key_id),
            ("secret_access_key", &self.secret_access_key),
        ]
        .into_iter()
        .filter(|(_, value)| value.as_deref().is_none_or(str::is_empty))
        .map(|(name, _)| name)
        .collect();

        if missing.is_empty() { Ok(()) } else { Err(ConfigError::NotConfigured(missing.join(","))) }
    }

    /// Bucket name, once mandatory settings have been checked.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if the bucket is not set.
    pub fn require_bucket(&self) -> Result<&str, ConfigError> {
        self.bucket.as_deref().ok_or_else(|| ConfigError::Missing {
            field: "bucket".into(),
            hint: "Set REWIND_BUCKET environment variable".into(),
        })
    }
}
