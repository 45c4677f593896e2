//! Page request codec.
//!
//! A page request carries everything needed to fetch one page of one
//! resource. It travels through the channel as a JSON object, and the copy
//! read back from the channel is authoritative: producer and consumer of a
//! message may be different processes.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::AppError;

/// Cursor value meaning "first page" for cursor-token pagination.
pub const FIRST_PAGE_CURSOR: &str = "*";

/// Parameters for fetching one page of a resource.
pub trait PageRequest: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Identifier of the resource being paginated (app id, feed id, ...).
    fn resource_id(&self) -> String;

    /// Serialize into a channel payload.
    fn encode(&self) -> Result<Vec<u8>, AppError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize from a channel payload.
    fn decode(payload: &[u8]) -> Result<Self, AppError> {
        Ok(serde_json::from_slice(payload)?)
    }
}

/// A request for a resource that has exactly one page.
pub trait SinglePageRequest: PageRequest {
    /// Check the remote API's success flag. A missing or false flag is a
    /// [`AppError::ValidationError`].
    fn validate(&self, body: &[u8]) -> Result<(), AppError>;
}

/// A request paginated by a descending timestamp watermark
/// ("items older than T").
pub trait WindowedRequest: PageRequest {
    /// Current watermark. `None` means "now".
    fn watermark(&self) -> Option<i64>;

    fn with_watermark(&self, watermark: Option<i64>) -> Self;

    /// Timestamps of the items contained in a response body. Also validates
    /// the body; an empty vector means the window held no items.
    fn item_timestamps(&self, body: &[u8]) -> Result<Vec<i64>, AppError>;
}

/// A request paginated by an opaque continuation token.
pub trait CursorRequest: PageRequest {
    fn cursor(&self) -> &str;

    fn with_cursor(&self, cursor: String) -> Self;

    /// Validate a response body and return the cursor it carries.
    fn response_cursor(&self, body: &[u8]) -> Result<String, AppError>;
}
