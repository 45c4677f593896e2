//! Redis list-backed channel.
//!
//! Pending messages live in a list; a lease atomically moves the head of the
//! list onto a companion `<key>:processing` list with `BLMOVE`, so a message
//! popped by a consumer that dies mid-lease is still in Redis and can be
//! recovered. Ack removes it from the processing list; nack moves it back to
//! the **tail** of the pending list, behind work that was already queued.
//!
//! Each channel holds two connections: a multiplexed one for enqueue, ack and
//! introspection, and a dedicated one for the blocking pop, shared by clones
//! and dropped on [`close`](Channel::close).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use redis::Client;
use redis::aio::MultiplexedConnection;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use trawl_core::channel::{Channel, Delivery};
use trawl_core::error::AppError;

use crate::config::RedisChannelConfig;

fn channel_error(context: &str, e: redis::RedisError) -> AppError {
    AppError::ChannelError(format!("{context}: {e}"))
}

/// At-least-once channel over a Redis list.
#[derive(Clone)]
pub struct RedisListChannel {
    conn: MultiplexedConnection,
    blocking: Arc<Mutex<Option<MultiplexedConnection>>>,
    key: Arc<str>,
    processing_key: Arc<str>,
    poll_window_secs: f64,
    closed: Arc<AtomicBool>,
}

impl RedisListChannel {
    /// Connect to Redis with the given configuration.
    pub async fn connect(config: &RedisChannelConfig) -> Result<Self, AppError> {
        let client = Client::open(config.url.as_str())
            .map_err(|e| AppError::ConfigError(format!("Invalid REDIS_URL: {e}")))?;
        let conn = open_connection(&client, &config.client_name).await?;
        // Blocking pops get their own connection so they never stall
        // enqueues and acks multiplexed on the shared one.
        let blocking = open_connection(&client, &config.client_name).await?;

        tracing::info!(key = %config.key, client = %config.client_name, "Connected to Redis");

        Ok(Self {
            conn,
            blocking: Arc::new(Mutex::new(Some(blocking))),
            key: config.key.as_str().into(),
            processing_key: format!("{}:processing", config.key).into(),
            poll_window_secs: config.poll_window.as_secs_f64().max(0.01),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Key of the list holding leased, unacknowledged messages.
    pub fn processing_key(&self) -> &str {
        &self.processing_key
    }

    /// Number of messages waiting to be leased.
    pub async fn len(&self) -> Result<u64, AppError> {
        let mut conn = self.conn.clone();
        let len: u64 = redis::cmd("LLEN")
            .arg(&*self.key)
            .query_async(&mut conn)
            .await
            .map_err(|e| channel_error("LLEN failed", e))?;
        Ok(len)
    }

    /// Number of messages leased but not yet acked or nacked.
    pub async fn in_flight(&self) -> Result<u64, AppError> {
        let mut conn = self.conn.clone();
        let len: u64 = redis::cmd("LLEN")
            .arg(&*self.processing_key)
            .query_async(&mut conn)
            .await
            .map_err(|e| channel_error("LLEN failed", e))?;
        Ok(len)
    }

    /// Move every message stranded on the processing list back to the tail
    /// of the pending list. Returns how many were moved.
    ///
    /// Only call this while no consumer holds a lease on this key, e.g. at
    /// startup after a crash: live leases would be delivered twice.
    pub async fn recover(&self) -> Result<u64, AppError> {
        let mut conn = self.conn.clone();
        let mut moved = 0u64;
        loop {
            let entry: Option<Vec<u8>> = redis::cmd("LMOVE")
                .arg(&*self.processing_key)
                .arg(&*self.key)
                .arg("LEFT")
                .arg("RIGHT")
                .query_async(&mut conn)
                .await
                .map_err(|e| channel_error("LMOVE failed", e))?;
            if entry.is_none() {
                break;
            }
            moved += 1;
        }
        if moved > 0 {
            tracing::warn!(key = %self.key, %moved, "Recovered stranded messages");
        }
        Ok(moved)
    }

    fn ensure_open(&self) -> Result<(), AppError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(AppError::ChannelError(format!(
                "channel '{}' is closed",
                self.key
            )));
        }
        Ok(())
    }
}

async fn open_connection(client: &Client, name: &str) -> Result<MultiplexedConnection, AppError> {
    let mut conn = client
        .get_multiplexed_async_connection()
        .await
        .map_err(|e| channel_error("Failed to connect to Redis", e))?;
    let _: () = redis::cmd("CLIENT")
        .arg("SETNAME")
        .arg(name)
        .query_async(&mut conn)
        .await
        .map_err(|e| channel_error("CLIENT SETNAME failed", e))?;
    Ok(conn)
}

impl Channel for RedisListChannel {
    type Handle = ();

    fn name(&self) -> &str {
        &self.key
    }

    async fn enqueue(&self, payload: &[u8]) -> Result<(), AppError> {
        self.ensure_open()?;
        let mut conn = self.conn.clone();
        let _: u64 = redis::cmd("RPUSH")
            .arg(&*self.key)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| channel_error("RPUSH failed", e))?;
        Ok(())
    }

    async fn lease(&self, cancel: &CancellationToken) -> Result<Delivery<()>, AppError> {
        // The pop is never abandoned mid-flight (a dropped BLMOVE could move a
        // message nobody receives), so cancellation is checked between
        // bounded waits.
        loop {
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled);
            }
            self.ensure_open()?;

            let popped: Option<Vec<u8>> = {
                let mut blocking = self.blocking.lock().await;
                let Some(conn) = blocking.as_mut() else {
                    return Err(AppError::ChannelError(format!(
                        "channel '{}' is closed",
                        self.key
                    )));
                };
                redis::cmd("BLMOVE")
                    .arg(&*self.key)
                    .arg(&*self.processing_key)
                    .arg("LEFT")
                    .arg("RIGHT")
                    .arg(self.poll_window_secs)
                    .query_async(conn)
                    .await
                    .map_err(|e| channel_error("BLMOVE failed", e))?
            };

            if let Some(payload) = popped {
                tracing::debug!(key = %self.key, bytes = payload.len(), "Leased message");
                return Ok(Delivery::new(payload, ()));
            }
        }
    }

    async fn ack(&self, delivery: Delivery<()>) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let removed: i64 = redis::cmd("LREM")
            .arg(&*self.processing_key)
            .arg(1)
            .arg(delivery.payload())
            .query_async(&mut conn)
            .await
            .map_err(|e| channel_error("LREM failed", e))?;
        if removed == 0 {
            tracing::warn!(key = %self.key, "Acked message was no longer in flight");
        }
        Ok(())
    }

    async fn nack(&self, delivery: Delivery<()>) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .cmd("LREM")
            .arg(&*self.processing_key)
            .arg(1)
            .arg(delivery.payload())
            .ignore()
            .cmd("RPUSH")
            .arg(&*self.key)
            .arg(delivery.payload())
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                channel_error("Error putting message back in the queue", e)
            })?;
        tracing::debug!(key = %self.key, "Requeued message at tail");
        Ok(())
    }

    async fn close(&self) -> Result<(), AppError> {
        self.closed.store(true, Ordering::Release);
        // Waits for an in-progress pop window to finish. The multiplexed
        // connection goes with the last clone.
        self.blocking.lock().await.take();
        tracing::debug!(key = %self.key, "Closed channel");
        Ok(())
    }
}
