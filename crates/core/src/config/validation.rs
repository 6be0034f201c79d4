//! Checks applied to an [`AppConfig`] once every layer is merged.

use std::ops::RangeInclusive;

use crate::config::AppConfig;

/// Accepted live-fetch timeout, in milliseconds.
pub const TIMEOUT_RANGE_MS: RangeInclusive<u64> = 100..=300_000;

/// Configuration errors. All of them keep the history subsystem inactive.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },

    #[error("missing required configuration: {field} ({hint})")]
    Missing { field: String, hint: String },

    #[error("not configured: {0} are mandatory settings")]
    NotConfigured(String),

    #[error("could not parse epoch: {0}")]
    UnparseableEpoch(String),

    #[error("unknown backend: {0}")]
    UnknownBackend(String),

    #[error("unknown policy: {0}")]
    UnknownPolicy(String),
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid { field: field.to_string(), reason: reason.into() }
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// Mandatory credentials are deliberately not checked here so that
    /// tooling can load a partial configuration; see
    /// [`AppConfig::require_mandatory`].
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` for an out-of-range timeout, an empty
    /// user agent, region or template, or an endpoint that is not a URL.
    /// Returns `ConfigError::UnparseableEpoch` if the epoch is not understood.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !TIMEOUT_RANGE_MS.contains(&self.timeout_ms) {
            return Err(invalid(
                "timeout_ms",
                format!("must be between {}ms and {}ms", TIMEOUT_RANGE_MS.start(), TIMEOUT_RANGE_MS.end()),
            ));
        }

        for (field, value) in [
            ("user_agent", &self.user_agent),
            ("region", &self.region),
            ("source_template", &self.source_template),
        ] {
            if value.trim().is_empty() {
                return Err(invalid(field, "must not be empty"));
            }
        }

        if let Some(endpoint) = self.endpoint_url.as_deref() {
            url::Url::parse(endpoint).map_err(|e| invalid("endpoint_url", e.to_string()))?;
        }

        self.epoch()?;

        if self.ignore_missing && self.retrieve_if == "never" {
            tracing::warn!(
                retrieve_if = %self.retrieve_if,
                "ignore_missing is set but retrieve_if never approves; strict mode has no effect"
            );
        }

        Ok(())
    }
}
