//! Amazon S3 (and S3-compatible) history backend.
//!
//! Relies on bucket versioning: every `put_object` on a versioned bucket
//! keeps the previous object as an older version, and listing the versions of
//! a key returns them newest first.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, SdkConfig};
use aws_config::timeout::TimeoutConfig;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use chrono::{DateTime, SubsecRound, Utc};
use rewind_core::backend::{BackendProvider, ObjectStore};
use rewind_core::{AppConfig, BackendError, VersionRef};

/// Version id S3 reports for objects written while versioning was off.
pub const NULL_VERSION_ID: &str = "null";

const CREDENTIALS_PROVIDER: &str = "rewind";

/// Versioned object store on one S3 bucket.
#[derive(Debug, Clone)]
pub struct S3Store {
    client: Client,
    bucket: String,
}

impl S3Store {
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self { client, bucket: bucket.into() }
    }

    /// Check that the bucket exists and is reachable with these credentials.
    ///
    /// # Errors
    ///
    /// Returns `BackendError::NotFound` or `BackendError::Forbidden` for a
    /// missing or inaccessible bucket.
    pub async fn check_bucket(&self) -> Result<(), BackendError> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| sdk_error(&e, &self.bucket))?;
        Ok(())
    }

    /// `LastModified` of one stored version, as the listing reports it.
    async fn last_modified(&self, path: &str, version_id: &str) -> Result<DateTime<Utc>, BackendError> {
        let versioned = (version_id != NULL_VERSION_ID).then(|| version_id.to_string());
        let head = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(path)
            .set_version_id(versioned)
            .send()
            .await
            .map_err(|e| sdk_error(&e, path))?;

        match head.last_modified() {
            Some(at) => to_chrono(at),
            None => Ok(Utc::now().trunc_subsecs(0)),
        }
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn list_versions(&self, path: &str) -> Result<Vec<VersionRef>, BackendError> {
        let mut versions = Vec::new();
        let mut key_marker: Option<String> = None;
        let mut version_marker: Option<String> = None;

        // Keys sharing the prefix sort after the exact key, so the first
        // foreign key ends the listing.
        loop {
            let page = self
                .client
                .list_object_versions()
                .bucket(&self.bucket)
                .prefix(path)
                .set_key_marker(key_marker.take())
                .set_version_id_marker(version_marker.take())
                .send()
                .await
                .map_err(|e| sdk_error(&e, path))?;

            let mut foreign_key = false;
            for version in page.versions() {
                if version.key() != Some(path) {
                    foreign_key = true;
                    break;
                }
                let (Some(id), Some(modified)) = (version.version_id(), version.last_modified()) else {
                    continue;
                };
                versions.push(VersionRef::new(id, to_chrono(modified)?));
            }

            if foreign_key || !page.is_truncated().unwrap_or(false) {
                break;
            }
            key_marker = page.next_key_marker().map(str::to_string);
            version_marker = page.next_version_id_marker().map(str::to_string);
            if key_marker.is_none() && version_marker.is_none() {
                break;
            }
        }

        tracing::trace!(bucket = %self.bucket, path, count = versions.len(), "listed versions");
        Ok(versions)
    }

    async fn get_version(&self, path: &str, version_id: &str) -> Result<Option<Vec<u8>>, BackendError> {
        let output = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(path)
            .version_id(version_id)
            .send()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                let err = sdk_error(&e, path);
                if err.is_not_found() {
                    return Ok(None);
                }
                return Err(err);
            }
        };

        let body = output
            .body
            .collect()
            .await
            .map_err(|e| BackendError::Transport(format!("{path}: {e}")))?;
        Ok(Some(body.into_bytes().to_vec()))
    }

    async fn put(
        &self, path: &str, body: Vec<u8>, content_type: &str, metadata: BTreeMap<String, String>,
    ) -> Result<VersionRef, BackendError> {
        let output = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(path)
            .content_type(content_type)
            .set_metadata(Some(metadata.into_iter().collect::<HashMap<_, _>>()))
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| sdk_error(&e, path))?;

        let version_id = output.version_id().unwrap_or(NULL_VERSION_ID);
        let modified = self.last_modified(path, version_id).await?;
        Ok(VersionRef::new(version_id, modified))
    }
}

/// Connects to the configured bucket.
#[derive(Debug, Clone, Copy, Default)]
pub struct S3Provider;

#[async_trait]
impl BackendProvider for S3Provider {
    async fn connect(&self, config: &AppConfig) -> Result<Arc<dyn ObjectStore>, BackendError> {
        let bucket = config.require_bucket().map_err(|e| BackendError::NotFound(e.to_string()))?;
        let credentials = Credentials::new(
            config.access_key_id.clone().unwrap_or_default(),
            config.secret_access_key.clone().unwrap_or_default(),
            None,
            None,
            CREDENTIALS_PROVIDER,
        );

        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .timeout_config(TimeoutConfig::builder().operation_timeout(config.timeout()).build())
            .load()
            .await;

        let store = S3Store::new(Client::from_conf(client_config(&sdk_config, config)), bucket);
        store.check_bucket().await?;
        tracing::info!(
            bucket,
            region = %config.region,
            endpoint = config.endpoint_url.as_deref().unwrap_or("aws"),
            "connected to s3 history bucket"
        );
        Ok(Arc::new(store))
    }
}

fn client_config(sdk_config: &SdkConfig, config: &AppConfig) -> aws_sdk_s3::Config {
    let mut builder = aws_sdk_s3::config::Builder::from(sdk_config).force_path_style(config.force_path_style);
    builder.set_endpoint_url(config.endpoint_url.clone());
    builder.build()
}

fn to_chrono(at: &aws_sdk_s3::primitives::DateTime) -> Result<DateTime<Utc>, BackendError> {
    DateTime::from_timestamp(at.secs(), at.subsec_nanos())
        .ok_or_else(|| BackendError::Transport(format!("timestamp out of range: {}", at.secs())))
}

fn sdk_error<E>(err: &SdkError<E, HttpResponse>, subject: &str) -> BackendError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    let status = err.raw_response().map(|raw| raw.status().as_u16());
    classify(err.code(), status, format!("{subject}: {}", DisplayErrorContext(err)))
}

/// Map an S3 error code and HTTP status onto the backend error kinds.
fn classify(code: Option<&str>, status: Option<u16>, message: String) -> BackendError {
    match (code, status) {
        (Some("NoSuchKey" | "NoSuchVersion" | "NoSuchBucket" | "NotFound"), _) | (_, Some(404)) => {
            BackendError::NotFound(message)
        }
        (Some("AccessDenied" | "Forbidden" | "InvalidAccessKeyId" | "SignatureDoesNotMatch"), _) | (_, Some(403)) => {
            BackendError::Forbidden(message)
        }
        _ => BackendError::Transport(message),
    }
}
