//! User reviews, paginated by Steam's opaque review cursor.

use serde::{Deserialize, Serialize};
use url::Url;

use trawl_core::error::AppError;
use trawl_core::request::{CursorRequest, FIRST_PAGE_CURSOR, PageRequest};

use crate::fetcher::SteamRequest;

const APP_REVIEWS_URL: &str = "https://store.steampowered.com/appreviews/";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRequest {
    pub app_id: u32,
    pub cursor: String,
    pub language: String,
    pub filter: String,
    pub num_per_page: u32,
}

impl ReviewRequest {
    /// First page of the most recent reviews in every language.
    pub fn new(app_id: u32) -> Self {
        Self {
            app_id,
            cursor: FIRST_PAGE_CURSOR.to_string(),
            language: "all".to_string(),
            filter: "recent".to_string(),
            num_per_page: 100,
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    pub fn with_num_per_page(mut self, num_per_page: u32) -> Self {
        self.num_per_page = num_per_page;
        self
    }
}

/// Aggregate counts reported alongside the first page.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReviewSummary {
    #[serde(default)]
    pub num_reviews: u32,
    #[serde(default)]
    pub review_score_desc: String,
    #[serde(default)]
    pub total_positive: u64,
    #[serde(default)]
    pub total_negative: u64,
    #[serde(default)]
    pub total_reviews: u64,
}

#[derive(Deserialize)]
struct ReviewResponse {
    #[serde(default)]
    success: i64,
    #[serde(default)]
    cursor: String,
    #[serde(default)]
    query_summary: ReviewSummary,
}

impl PageRequest for ReviewRequest {
    fn resource_id(&self) -> String {
        self.app_id.to_string()
    }
}

impl CursorRequest for ReviewRequest {
    fn cursor(&self) -> &str {
        &self.cursor
    }

    fn with_cursor(&self, cursor: String) -> Self {
        Self {
            cursor,
            ..self.clone()
        }
    }

    fn response_cursor(&self, body: &[u8]) -> Result<String, AppError> {
        let response: ReviewResponse = serde_json::from_slice(body)?;
        if response.success != 1 {
            return Err(AppError::ValidationError(format!(
                "invalid review data for app {} and cursor {}",
                self.app_id, self.cursor
            )));
        }
        tracing::trace!(
            app_id = self.app_id,
            reviews = response.query_summary.num_reviews,
            "Review page"
        );
        Ok(response.cursor)
    }
}

impl SteamRequest for ReviewRequest {
    fn url(&self) -> Result<Url, AppError> {
        let mut url = Url::parse(APP_REVIEWS_URL)
            .and_then(|base| base.join(&self.app_id.to_string()))
            .map_err(|e| AppError::Generic(format!("Invalid URL: {e}")))?;
        url.query_pairs_mut()
            .append_pair("json", "1")
            .append_pair("filter", &self.filter)
            .append_pair("language", &self.language)
            .append_pair("num_per_page", &self.num_per_page.to_string())
            .append_pair("cursor", &self.cursor);
        Ok(url)
    }
}
