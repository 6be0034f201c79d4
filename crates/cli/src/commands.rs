//! Subcommand implementations.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use rewind_client::{FetchConfig, HistoryClient, HistoryMiddleware, LiveFetcher, default_backends};
use rewind_core::{AppConfig, EpochSetting, HttpRequest, HttpResponse, PolicyRegistry, ResponseKind, SessionInfo};
use serde::Serialize;

/// Options shared by every subcommand that opens a session.
#[derive(Args, Debug)]
pub struct SessionArgs {
    /// Crawler name; namespaces the stored records
    #[arg(long, default_value = "rewind")]
    pub name: String,

    /// Epoch override: true, false, YYYYMMDD, or a relative phrase like "2 weeks ago"
    #[arg(long)]
    pub epoch: Option<String>,

    /// Job identifier used in snapshot paths
    #[arg(long)]
    pub job_id: Option<String>,
}

#[derive(Args, Debug)]
pub struct FetchArgs {
    /// URLs to fetch
    #[arg(required = true)]
    pub urls: Vec<String>,

    /// HTTP method
    #[arg(long, default_value = "GET")]
    pub method: String,

    /// Retrieve policy override (never, always)
    #[arg(long)]
    pub retrieve_if: Option<String>,

    /// Store policy override (always, never, successful)
    #[arg(long)]
    pub store_if: Option<String>,

    #[command(flatten)]
    pub session: SessionArgs,
}

#[derive(Args, Debug)]
pub struct VersionsArgs {
    /// URL whose version chain is listed
    pub url: String,

    /// HTTP method of the stored request
    #[arg(long, default_value = "GET")]
    pub method: String,

    #[command(flatten)]
    pub session: SessionArgs,
}

#[derive(Debug, Serialize)]
struct FetchSummary<'a> {
    url: &'a str,
    final_url: &'a str,
    status: u16,
    historic: bool,
    kind: ResponseKind,
    content_type: Option<&'a str>,
    bytes: usize,
}

impl<'a> FetchSummary<'a> {
    fn new(request: &'a HttpRequest, response: &'a HttpResponse) -> Self {
        Self {
            url: &request.url,
            final_url: &response.url,
            status: response.status,
            historic: response.is_historic(),
            kind: response.kind,
            content_type: response.headers.get("content-type"),
            bytes: response.body.len(),
        }
    }
}

#[derive(Debug, Serialize)]
struct FetchFailure<'a> {
    url: &'a str,
    error: String,
}

#[derive(Debug, Serialize)]
struct VersionLine<'a> {
    key: &'a str,
    version_id: &'a str,
    last_modified: DateTime<Utc>,
    selected: bool,
}

fn load_config(session: &SessionArgs) -> Result<AppConfig> {
    let mut config = AppConfig::load().context("loading configuration")?;
    if let Some(epoch) = &session.epoch {
        config.epoch = EpochSetting::from(epoch.as_str());
    }
    Ok(config)
}

fn session_info(args: &SessionArgs) -> SessionInfo {
    let info = SessionInfo::new(args.name.clone());
    match &args.job_id {
        Some(job_id) => info.with_job_id(job_id.clone()),
        None => info,
    }
}

fn build_middleware(config: &AppConfig) -> Result<HistoryMiddleware> {
    HistoryMiddleware::from_config(config, &default_backends(), &PolicyRegistry::default())
        .context("history storage is not usable")
}

fn print_line<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

pub async fn fetch(args: FetchArgs) -> Result<()> {
    let mut config = load_config(&args.session)?;
    if let Some(retrieve_if) = args.retrieve_if {
        config.retrieve_if = retrieve_if;
    }
    if let Some(store_if) = args.store_if {
        config.store_if = store_if;
    }

    let middleware = Arc::new(build_middleware(&config)?);
    let client = HistoryClient::new(middleware.clone(), LiveFetcher::new(FetchConfig::from_app(&config))?);

    middleware.open_session(session_info(&args.session)).await?;

    for url in &args.urls {
        let request = HttpRequest::new(args.method.as_str(), url.as_str());
        match client.fetch(&request).await {
            Ok(response) => print_line(&FetchSummary::new(&request, &response))?,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "fetch failed");
                print_line(&FetchFailure { url, error: e.to_string() })?;
            }
        }
    }

    let stats = middleware.stats();
    middleware.close_session().await?;
    tracing::info!(
        retrieved = stats.retrieved,
        missed = stats.missed,
        rejected = stats.rejected,
        cached = stats.cached,
        store_failed = stats.store_failed,
        errors = stats.errors,
        "fetch finished"
    );
    Ok(())
}

pub async fn versions(args: VersionsArgs) -> Result<()> {
    let mut config = load_config(&args.session)?;
    if args.session.epoch.is_none() && !config.epoch()?.is_enabled() {
        // Listing should still show which version is current.
        config.epoch = EpochSetting::Flag(true);
    }

    let middleware = build_middleware(&config)?;
    middleware.open_session(session_info(&args.session)).await?;

    let request = HttpRequest::new(args.method.as_str(), args.url.as_str());
    let key = middleware.compute_key(&request);
    let listed = middleware.versions(&request).await;
    middleware.close_session().await?;
    let (versions, selected) = listed?;

    if versions.is_empty() {
        tracing::info!(url = %args.url, %key, "no stored versions");
    }
    for version in &versions {
        print_line(&VersionLine {
            key: &key,
            version_id: &version.version_id,
            last_modified: version.last_modified,
            selected: selected.as_ref() == Some(version),
        })?;
    }
    Ok(())
}
