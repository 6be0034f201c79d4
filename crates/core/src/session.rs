//! Crawl session identity and write-path templating.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::{DateTime, SubsecRound, Utc};
use regex::Regex;

use crate::config::ConfigError;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid regex"));

/// Identity of one crawl session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Crawler name; namespaces the primary records.
    pub name: String,
    /// Scheduler job identifier, if any.
    pub job_id: Option<String>,
    /// When the session started.
    pub start_time: DateTime<Utc>,
    /// Extra attributes available to path templates.
    pub attributes: BTreeMap<String, String>,
}

impl SessionInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), job_id: None, start_time: Utc::now(), attributes: BTreeMap::new() }
    }

    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    pub fn with_start_time(mut self, start_time: DateTime<Utc>) -> Self {
        self.start_time = start_time;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Values available to write-path templates.
    ///
    /// `name`, `time` and `jobid` override attributes of the same name.
    pub fn template_params(&self) -> BTreeMap<String, String> {
        let mut params = self.attributes.clone();
        params.insert("name".into(), self.name.clone());
        params.insert("time".into(), path_timestamp(self.start_time));

        let job_id = self.job_id.as_deref().unwrap_or_default();
        params.insert("jobid".into(), job_id.replace('/', "_"));
        params
    }

    /// Render a `{placeholder}` template against this session.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if the template names an unknown placeholder.
    pub fn render(&self, template: &str) -> Result<String, ConfigError> {
        let params = self.template_params();

        if let Some(unknown) = PLACEHOLDER.captures_iter(template).find(|c| !params.contains_key(&c[1])) {
            return Err(ConfigError::Invalid {
                field: "source_template".into(),
                reason: format!("unknown placeholder {{{}}}", &unknown[1]),
            });
        }

        Ok(PLACEHOLDER.replace_all(template, |caps: &regex::Captures| params[&caps[1]].clone()).into_owned())
    }
}

/// Session start rendered for object paths: seconds precision, no colons.
fn path_timestamp(at: DateTime<Utc>) -> String {
    at.trunc_subsecs(0).naive_utc().format("%Y-%m-%dT%H-%M-%S").to_string()
}
