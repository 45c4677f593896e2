//! Durable FIFO channel contract.
//!
//! A channel carries opaque byte payloads between the producer and consumer
//! side of a scrape loop. Delivery is **at-least-once**: a message handed out
//! by [`Channel::lease`] is invisible to other consumers until it is either
//! acknowledged (never delivered again) or negatively acknowledged (made
//! deliverable again). Nothing is ever dropped on a failed attempt.
//!
//! ```text
//! enqueue ──► [ pending ] ──lease──► [ in flight ] ──ack──► gone
//!                 ▲                        │
//!                 └──────────nack──────────┘
//! ```

use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::error::AppError;

/// A message leased from a channel, paired with the backend-specific handle
/// needed to acknowledge it.
#[derive(Debug)]
pub struct Delivery<H> {
    pub payload: Vec<u8>,
    pub handle: H,
}

impl<H> Delivery<H> {
    pub fn new(payload: Vec<u8>, handle: H) -> Self {
        Self { payload, handle }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

/// At-least-once work channel.
///
/// Implementations must be safe to share between unrelated producers and
/// consumers: all mutual exclusion lives inside the backend.
pub trait Channel: Send + Sync + Clone {
    /// Backend-specific delivery metadata (list position, partition/offset, ...).
    type Handle: Send;

    /// Logical channel name (list key, topic, ...), used for logging.
    fn name(&self) -> &str;

    /// Append a payload. Returns once the backend has acknowledged the write.
    ///
    /// There is no deduplication: enqueuing the same bytes twice yields two
    /// independent messages.
    fn enqueue(&self, payload: &[u8]) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Wait for the next message and lease it to the caller.
    ///
    /// Suspends without busy-waiting until a message is available. Returns
    /// [`AppError::Cancelled`] once `cancel` fires.
    fn lease(
        &self,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<Delivery<Self::Handle>, AppError>> + Send;

    /// Durably acknowledge a leased message. It will not be redelivered.
    fn ack(
        &self,
        delivery: Delivery<Self::Handle>,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Return a leased message to the channel so a later lease redelivers it.
    fn nack(
        &self,
        delivery: Delivery<Self::Handle>,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Release underlying connections.
    fn close(&self) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Ack `delivery` when `outcome` is a success, nack it otherwise, and hand
    /// `outcome` back. An ack failure replaces the success; a nack failure is
    /// logged and the processing error is kept.
    fn settle<T: Send>(
        &self,
        delivery: Delivery<Self::Handle>,
        outcome: Result<T, AppError>,
    ) -> impl Future<Output = Result<T, AppError>> + Send {
        async move {
            match outcome {
                Ok(value) => {
                    self.ack(delivery).await?;
                    Ok(value)
                }
                Err(e) => {
                    tracing::warn!(channel = %self.name(), error = %e, "Processing failed, returning message");
                    if let Err(nack_err) = self.nack(delivery).await {
                        tracing::error!(channel = %self.name(), error = %nack_err, "Failed to return message");
                    }
                    Err(e)
                }
            }
        }
    }

    /// Lease a message, run `process` on it, then ack on success or nack on
    /// failure.
    ///
    /// Returns the payload when `process` succeeded. A processing failure is
    /// returned to the caller after the message has been handed back.
    fn dequeue<P, Fut>(
        &self,
        cancel: &CancellationToken,
        process: P,
    ) -> impl Future<Output = Result<Vec<u8>, AppError>> + Send
    where
        P: FnOnce(Vec<u8>) -> Fut + Send,
        Fut: Future<Output = Result<(), AppError>> + Send,
    {
        async move {
            let delivery = self.lease(cancel).await?;
            let payload = delivery.payload.clone();
            let outcome = process(payload.clone()).await.map(|()| payload);
            self.settle(delivery, outcome).await
        }
    }
}
