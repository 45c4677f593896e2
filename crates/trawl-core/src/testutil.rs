//! Test utilities: sample requests and mock implementations of core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::driver::{DriveEvent, DriveReporter};
use crate::error::AppError;
use crate::request::{
    CursorRequest, FIRST_PAGE_CURSOR, PageRequest, SinglePageRequest, WindowedRequest,
};
use crate::traits::{PageFetcher, PageSink};

fn parse(body: &[u8]) -> Result<serde_json::Value, AppError> {
    Ok(serde_json::from_slice(body)?)
}

// ---------------------------------------------------------------------------
// Sample requests
// ---------------------------------------------------------------------------

/// Single-page request. Valid bodies look like `{"success": true}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSingleRequest {
    pub app_id: String,
}

impl TestSingleRequest {
    pub fn new(app_id: &str) -> Self {
        Self {
            app_id: app_id.to_string(),
        }
    }
}

impl PageRequest for TestSingleRequest {
    fn resource_id(&self) -> String {
        self.app_id.clone()
    }
}

impl SinglePageRequest for TestSingleRequest {
    fn validate(&self, body: &[u8]) -> Result<(), AppError> {
        match parse(body)?.get("success").and_then(|v| v.as_bool()) {
            Some(true) => Ok(()),
            Some(false) => Err(AppError::ValidationError(format!(
                "app {} reported failure",
                self.app_id
            ))),
            None => Err(AppError::ValidationError("missing success flag".into())),
        }
    }
}

/// Watermark request. Bodies look like `{"items": [200, 150, 100]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestWindowRequest {
    pub app_id: String,
    pub end_date: Option<i64>,
}

impl TestWindowRequest {
    pub fn new(app_id: &str) -> Self {
        Self {
            app_id: app_id.to_string(),
            end_date: None,
        }
    }
}

impl PageRequest for TestWindowRequest {
    fn resource_id(&self) -> String {
        self.app_id.clone()
    }
}

impl WindowedRequest for TestWindowRequest {
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
        let value = parse(body)?;
        let items = value
            .get("items")
            .and_then(|v| v.as_array())
            .ok_or_else(|| AppError::ValidationError("missing items".into()))?;
        Ok(items.iter().filter_map(|v| v.as_i64()).collect())
    }
}

/// Cursor request. Bodies look like `{"success": 1, "cursor": "abc"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCursorRequest {
    pub app_id: String,
    pub cursor: String,
    pub language: String,
}

impl TestCursorRequest {
    pub fn new(app_id: &str) -> Self {
        Self {
            app_id: app_id.to_string(),
            cursor: FIRST_PAGE_CURSOR.to_string(),
            language: "all".to_string(),
        }
    }
}

impl PageRequest for TestCursorRequest {
    fn resource_id(&self) -> String {
        self.app_id.clone()
    }
}

impl CursorRequest for TestCursorRequest {
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
        let value = parse(body)?;
        let success = value.get("success").and_then(|v| v.as_i64());
        if success != Some(1) {
            return Err(AppError::ValidationError(format!(
                "success={success:?} for app {} at cursor {}",
                self.app_id, self.cursor
            )));
        }
        Ok(value
            .get("cursor")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string())
    }
}

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

/// Mock fetcher that returns queued bodies and records every request.
#[derive(Clone, Default)]
pub struct MockFetcher {
    /// Queue of responses. Each call pops the first element.
    responses: Arc<Mutex<Vec<Result<Vec<u8>, AppError>>>>,
    /// Requests seen, as JSON.
    pub requests: Arc<Mutex<Vec<serde_json::Value>>>,
}

impl MockFetcher {
    pub fn new(body: &str) -> Self {
        Self::with_responses(vec![Ok(body.as_bytes().to_vec())])
    }

    pub fn with_error(error: AppError) -> Self {
        Self::with_responses(vec![Err(error)])
    }

    pub fn with_bodies(bodies: &[&str]) -> Self {
        Self::with_responses(bodies.iter().map(|b| Ok(b.as_bytes().to_vec())).collect())
    }

    pub fn with_responses(responses: Vec<Result<Vec<u8>, AppError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl<R: PageRequest> PageFetcher<R> for MockFetcher {
    async fn fetch(&self, request: &R) -> Result<Vec<u8>, AppError> {
        self.requests
            .lock()
            .unwrap()
            .push(serde_json::to_value(request)?);
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Err(AppError::Generic("no mock response queued".into()))
        } else {
            responses.remove(0)
        }
    }
}

// ---------------------------------------------------------------------------
// MockSink
// ---------------------------------------------------------------------------

/// A page recorded by [`MockSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedPage {
    pub resource_id: String,
    pub page_key: String,
    pub body: Vec<u8>,
}

/// Mock sink that records saves.
#[derive(Clone, Default)]
pub struct MockSink {
    pub saved: Arc<Mutex<Vec<SavedPage>>>,
    save_error: Arc<Mutex<Option<AppError>>>,
}

impl MockSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink whose next save fails with `error`.
    pub fn with_save_error(error: AppError) -> Self {
        Self {
            saved: Arc::new(Mutex::new(Vec::new())),
            save_error: Arc::new(Mutex::new(Some(error))),
        }
    }

    pub fn page_keys(&self) -> Vec<String> {
        self.saved
            .lock()
            .unwrap()
            .iter()
            .map(|p| p.page_key.clone())
            .collect()
    }
}

impl PageSink for MockSink {
    async fn save(&self, body: &[u8], resource_id: &str, page_key: &str) -> Result<(), AppError> {
        if let Some(e) = self.save_error.lock().unwrap().take() {
            return Err(e);
        }
        self.saved.lock().unwrap().push(SavedPage {
            resource_id: resource_id.to_string(),
            page_key: page_key.to_string(),
            body: body.to_vec(),
        });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Mock drive reporter that records event labels.
#[derive(Default)]
pub struct MockReporter {
    pub events: Arc<Mutex<Vec<String>>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn labels(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl DriveReporter for MockReporter {
    fn report(&self, event: DriveEvent<'_>) {
        let label = match &event {
            DriveEvent::Started => "Started",
            DriveEvent::PageQueued { .. } => "PageQueued",
            DriveEvent::PageScraped { .. } => "PageScraped",
            DriveEvent::Finished { .. } => "Finished",
            DriveEvent::Failed { .. } => "Failed",
            DriveEvent::Cancelled { .. } => "Cancelled",
        };
        self.events.lock().unwrap().push(label.to_string());
    }
}
