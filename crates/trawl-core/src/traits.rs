use std::future::Future;

use crate::error::AppError;
use crate::request::PageRequest;

/// Fetches the raw body of one page.
///
/// Implementations issue exactly one request per call: retrying is left to
/// channel redelivery.
pub trait PageFetcher<R: PageRequest>: Send + Sync + Clone {
    fn fetch(&self, request: &R) -> impl Future<Output = Result<Vec<u8>, AppError>> + Send;
}

/// Persists fetched pages.
pub trait PageSink: Send + Sync + Clone {
    /// Save one page. `page_key` is empty for single-page resources and
    /// otherwise distinguishes pages of the same resource; it is not escaped.
    fn save(
        &self,
        body: &[u8],
        resource_id: &str,
        page_key: &str,
    ) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// A no-op PageSink for dry runs.
#[derive(Debug, Clone)]
pub struct NullSink;

impl PageSink for NullSink {
    async fn save(&self, _body: &[u8], _resource_id: &str, _page_key: &str) -> Result<(), AppError> {
        Ok(())
    }
}
