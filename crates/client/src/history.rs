//! Fetch client that answers from history first.

use std::sync::Arc;

use rewind_core::{Error, HttpRequest, HttpResponse};

use crate::fetch::LiveFetcher;
use crate::middleware::{Decision, HistoryMiddleware};

/// Runs requests through the history middleware, fetching live on a pass.
#[derive(Debug, Clone)]
pub struct HistoryClient {
    middleware: Arc<HistoryMiddleware>,
    fetcher: LiveFetcher,
}

impl HistoryClient {
    pub fn new(middleware: Arc<HistoryMiddleware>, fetcher: LiveFetcher) -> Self {
        Self { middleware, fetcher }
    }

    pub fn middleware(&self) -> &HistoryMiddleware {
        &self.middleware
    }

    /// Resolve `request` from history or the network.
    ///
    /// Live responses are offered to the store policy before being returned.
    ///
    /// # Errors
    ///
    /// Returns the rejection reason when the middleware abandons the request,
    /// or `Error::HttpError` if the live fetch fails.
    pub async fn fetch(&self, request: &HttpRequest) -> Result<HttpResponse, Error> {
        match self.middleware.on_request(request).await {
            Decision::Serve(response) => Ok(response),
            Decision::Reject(reason) => Err(reason),
            Decision::Pass => {
                let response = self.fetcher.fetch(request).await?;
                Ok(self.middleware.on_response(request, response).await)
            }
        }
    }
}
