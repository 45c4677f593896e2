//! App news, paginated backwards in time by `enddate`.

use serde::{Deserialize, Serialize};
use url::Url;

use trawl_core::error::AppError;
use trawl_core::request::{PageRequest, WindowedRequest};

use crate::fetcher::SteamRequest;

const APP_NEWS_URL: &str = "https://api.steampowered.com/ISteamNews/GetNewsForApp/v2/";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppNewsRequest {
    pub app_id: u32,
    /// Truncate item contents to this many characters. 0 returns full contents.
    #[serde(default)]
    pub max_length: u32,
    /// Items per page. 0 leaves the server default (20).
    #[serde(default)]
    pub count: u32,
    /// Only items posted before this unix timestamp. `None` means now; any
    /// `Some` value, zero included, is sent as-is.
    #[serde(default)]
    pub end_date: Option<i64>,
    #[serde(default)]
    pub feeds: Vec<String>,
}

impl AppNewsRequest {
    pub fn new(app_id: u32) -> Self {
        Self {
            app_id,
            max_length: 0,
            count: 0,
            end_date: None,
            feeds: Vec::new(),
        }
    }

    pub fn with_count(mut self, count: u32) -> Self {
        self.count = count;
        self
    }

    pub fn with_max_length(mut self, max_length: u32) -> Self {
        self.max_length = max_length;
        self
    }

    pub fn with_feeds(mut self, feeds: Vec<String>) -> Self {
        self.feeds = feeds;
        self
    }
}

/// One entry of a news page.
#[derive(Debug, Clone, Deserialize)]
pub struct NewsItem {
    pub gid: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub feedname: String,
    pub date: i64,
}

#[derive(Deserialize)]
struct NewsResponse {
    appnews: NewsPage,
}

#[derive(Deserialize)]
struct NewsPage {
    #[serde(default)]
    newsitems: Vec<NewsItem>,
}

impl PageRequest for AppNewsRequest {
    fn resource_id(&self) -> String {
        self.app_id.to_string()
    }
}

impl WindowedRequest for AppNewsRequest {
    fn watermark(&self) -> Option<i64> {
        self.end_date
    }

    fn with_watermark(&self, watermark: Option<i64>) -> Self {
        Self {
            end_date: watermark,
            ..self.clone()
        }
    }

    fn item_timestamps(&self, body: &[u8]) -> Result<Vec<i64>, AppError> {
        let response: NewsResponse = serde_json::from_slice(body)?;
        Ok(response.appnews.newsitems.iter().map(|item| item.date).collect())
    }
}

impl SteamRequest for AppNewsRequest {
    fn url(&self) -> Result<Url, AppError> {
        let mut url =
            Url::parse(APP_NEWS_URL).map_err(|e| AppError::Generic(format!("Invalid URL: {e}")))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("appid", &self.app_id.to_string());
            if self.max_length != 0 {
                query.append_pair("maxlength", &self.max_length.to_string());
            }
            if let Some(end_date) = self.end_date {
                query.append_pair("enddate", &end_date.to_string());
            }
            if self.count != 0 {
                query.append_pair("count", &self.count.to_string());
            }
            if !self.feeds.is_empty() {
                query.append_pair("feeds", &self.feeds.join(","));
            }
        }
        Ok(url)
    }
}
