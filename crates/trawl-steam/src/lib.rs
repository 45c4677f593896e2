pub mod details;
pub mod fetcher;
pub mod news;
pub mod reviews;

pub use details::AppDetailsRequest;
pub use fetcher::{DEFAULT_USER_AGENT, SteamFetcher, SteamRequest};
pub use news::{AppNewsRequest, NewsItem};
pub use reviews::{ReviewRequest, ReviewSummary};
