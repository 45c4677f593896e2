//! Pagination policies.
//!
//! Each policy looks at a fetched body and decides whether it is a page to
//! persist, what the next request is, or whether the resource is exhausted.
//! Policies are pure: all state lives in the task that drives them.

use crate::error::AppError;
use crate::request::{CursorRequest, PageRequest, SinglePageRequest, WindowedRequest};

/// Outcome of inspecting one fetched body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step<R> {
    /// The body is a page to persist under `page_key`. `next` is the request
    /// for the following page, or `None` when this was the last one.
    Page { page_key: String, next: Option<R> },
    /// Nothing left to fetch. The body is not persisted.
    Exhausted,
}

/// How a resource kind moves from one page to the next.
pub trait Pagination<R: PageRequest>: Send + Sync {
    /// Whether a task that has not fetched anything yet reports more pages.
    fn initially_has_next(&self) -> bool {
        true
    }

    fn step(&self, request: &R, body: &[u8]) -> Result<Step<R>, AppError>;
}

/// One request, one page.
#[derive(Debug, Default, Clone, Copy)]
pub struct SinglePage;

impl<R: SinglePageRequest> Pagination<R> for SinglePage {
    fn step(&self, request: &R, body: &[u8]) -> Result<Step<R>, AppError> {
        request.validate(body)?;
        Ok(Step::Page {
            page_key: String::new(),
            next: None,
        })
    }
}

/// Descending timestamp watermark.
///
/// The next window starts one unit below the oldest item of the current
/// page, so that item is never fetched twice. This assumes whole-unit
/// timestamps (seconds for the APIs we scrape).
#[derive(Debug, Default, Clone, Copy)]
pub struct TimeWindow;

impl<R: WindowedRequest> Pagination<R> for TimeWindow {
    fn step(&self, request: &R, body: &[u8]) -> Result<Step<R>, AppError> {
        let timestamps = request.item_timestamps(body)?;
        let (Some(&oldest), Some(&newest)) = (timestamps.iter().min(), timestamps.iter().max())
        else {
            tracing::debug!(watermark = ?request.watermark(), "Empty window, resource exhausted");
            return Ok(Step::Exhausted);
        };

        Ok(Step::Page {
            page_key: format!("{newest}-{oldest}"),
            next: Some(request.with_watermark(Some(oldest.saturating_sub(1)))),
        })
    }
}

/// Opaque continuation token. The API hands back the submitted cursor once
/// there is nothing left.
#[derive(Debug, Default, Clone, Copy)]
pub struct CursorToken;

impl<R: CursorRequest> Pagination<R> for CursorToken {
    fn step(&self, request: &R, body: &[u8]) -> Result<Step<R>, AppError> {
        let returned = request.response_cursor(body)?;
        if returned.is_empty() {
            return Err(AppError::ValidationError(format!(
                "empty cursor returned for resource {} at cursor {}",
                request.resource_id(),
                request.cursor()
            )));
        }
        if returned == request.cursor() {
            return Ok(Step::Exhausted);
        }

        Ok(Step::Page {
            page_key: returned.clone(),
            next: Some(request.with_cursor(returned)),
        })
    }
}
