//! Scrape tasks: the per-resource pagination state machine.
//!
//! A task owns the current page request between loop iterations. It pushes
//! that request into the channel, drains one request back out, fetches and
//! inspects the page, persists it, and only then advances its cursor.

use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::channel::Channel;
use crate::error::AppError;
use crate::pagination::{CursorToken, Pagination, SinglePage, Step, TimeWindow};
use crate::request::PageRequest;
use crate::traits::{PageFetcher, PageSink};

/// Capability set the driver loop depends on.
pub trait ScrapeTask: Send {
    /// Whether another page remains.
    fn has_next(&self) -> bool;

    /// Enqueue the current request. Never mutates the task.
    fn add_to_queue(&self) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Drain one request from the channel, fetch and persist its page, and
    /// advance the cursor. On error the task state is left untouched and the
    /// message is handed back to the channel.
    fn scrape_from_queue(&mut self) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Scrape task generic over channel, fetcher, sink, request type and
/// pagination policy.
pub struct PagedTask<Q, F, S, R, P>
where
    Q: Channel,
    F: PageFetcher<R>,
    S: PageSink,
    R: PageRequest,
    P: Pagination<R>,
{
    channel: Q,
    fetcher: F,
    sink: S,
    pagination: P,
    request: R,
    has_next: bool,
    pages_saved: u64,
    cancel: CancellationToken,
}

/// Task for a resource with exactly one page.
pub type SinglePageTask<Q, F, S, R> = PagedTask<Q, F, S, R, SinglePage>;

/// Task for a resource paginated by a descending timestamp watermark.
pub type TimeWindowTask<Q, F, S, R> = PagedTask<Q, F, S, R, TimeWindow>;

/// Task for a resource paginated by a continuation token.
pub type CursorTask<Q, F, S, R> = PagedTask<Q, F, S, R, CursorToken>;

impl<Q, F, S, R, P> PagedTask<Q, F, S, R, P>
where
    Q: Channel,
    F: PageFetcher<R>,
    S: PageSink,
    R: PageRequest,
    P: Pagination<R>,
{
    pub fn new(channel: Q, fetcher: F, sink: S, pagination: P, request: R) -> Self {
        let has_next = pagination.initially_has_next();
        Self {
            channel,
            fetcher,
            sink,
            pagination,
            request,
            has_next,
            pages_saved: 0,
            cancel: CancellationToken::new(),
        }
    }

    /// Abort blocking dequeues when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// The request the next `add_to_queue` will enqueue.
    pub fn request(&self) -> &R {
        &self.request
    }

    pub fn pages_saved(&self) -> u64 {
        self.pages_saved
    }

    pub fn channel(&self) -> &Q {
        &self.channel
    }

    /// Decode, fetch, inspect and persist one message. Pure with respect to
    /// task state.
    async fn process(&self, payload: &[u8]) -> Result<(R, Step<R>), AppError> {
        let request = R::decode(payload)?;
        let resource_id = request.resource_id();

        let body = self.fetcher.fetch(&request).await?;
        tracing::debug!(%resource_id, bytes = body.len(), "Fetched page");

        let step = self.pagination.step(&request, &body)?;
        match &step {
            Step::Page { page_key, .. } => {
                self.sink.save(&body, &resource_id, page_key).await?;
                tracing::info!(%resource_id, %page_key, "Saved page");
            }
            Step::Exhausted => {
                tracing::info!(%resource_id, "No more pages");
            }
        }
        Ok((request, step))
    }

    fn apply(&mut self, request: R, step: Step<R>) {
        match step {
            Step::Page { next, .. } => {
                self.pages_saved += 1;
                match next {
                    Some(next) => {
                        self.request = next;
                        self.has_next = true;
                    }
                    None => {
                        self.request = request;
                        self.has_next = false;
                    }
                }
            }
            Step::Exhausted => {
                self.request = request;
                self.has_next = false;
            }
        }
    }
}

impl<Q, F, S, R, P> ScrapeTask for PagedTask<Q, F, S, R, P>
where
    Q: Channel,
    F: PageFetcher<R>,
    S: PageSink,
    R: PageRequest,
    P: Pagination<R>,
{
    fn has_next(&self) -> bool {
        self.has_next
    }

    async fn add_to_queue(&self) -> Result<(), AppError> {
        let payload = self.request.encode()?;
        self.channel.enqueue(&payload).await?;
        tracing::debug!(
            channel = %self.channel.name(),
            resource_id = %self.request.resource_id(),
            "Queued page request"
        );
        Ok(())
    }

    async fn scrape_from_queue(&mut self) -> Result<(), AppError> {
        let delivery = self.channel.lease(&self.cancel).await?;
        let outcome = self.process(delivery.payload()).await;
        let (request, step) = self.channel.settle(delivery, outcome).await?;
        self.apply(request, step);
        Ok(())
    }
}
