use std::time::Duration;

use reqwest::Client;
use url::Url;

use trawl_core::error::AppError;
use trawl_core::request::PageRequest;
use trawl_core::traits::PageFetcher;

pub const DEFAULT_USER_AGENT: &str = concat!("trawl/", env!("CARGO_PKG_VERSION"));

/// A page request that knows which Steam endpoint serves it.
pub trait SteamRequest: PageRequest {
    fn url(&self) -> Result<Url, AppError>;
}

/// HTTP fetcher for Steam endpoints using reqwest.
///
/// Issues exactly one GET per call. Failed pages are retried by channel
/// redelivery, never here.
#[derive(Clone)]
pub struct SteamFetcher {
    client: Client,
    timeout_secs: u64,
}

impl SteamFetcher {
    pub fn new() -> Result<Self, AppError> {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, AppError> {
        Self::with_options(timeout, DEFAULT_USER_AGENT)
    }

    pub fn with_options(timeout: Duration, user_agent: &str) -> Result<Self, AppError> {
        let timeout_secs = timeout.as_secs();
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            timeout_secs,
        })
    }

    /// GET `url` and return the raw body of a 2xx response.
    pub async fn fetch_url(&self, url: &Url) -> Result<Vec<u8>, AppError> {
        tracing::debug!(%url, "Fetching page");

        let response = self.client.get(url.clone()).send().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Timeout(self.timeout_secs)
            } else if e.is_connect() {
                AppError::NetworkError(format!("Connection failed: {e}"))
            } else {
                AppError::HttpError(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::HttpError(format!(
                "HTTP {} for {}",
                status.as_u16(),
                url
            )));
        }

        let body = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Timeout(self.timeout_secs)
            } else {
                AppError::HttpError(format!("Failed to read response body: {e}"))
            }
        })?;
        Ok(body.to_vec())
    }
}

impl<R: SteamRequest> PageFetcher<R> for SteamFetcher {
    async fn fetch(&self, request: &R) -> Result<Vec<u8>, AppError> {
        let url = request.url()?;
        self.fetch_url(&url).await
    }
}
