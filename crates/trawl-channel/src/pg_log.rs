//! PostgreSQL log-backed channel.
//!
//! Records are appended to one of `partitions` ordered partitions of a topic.
//! Each consumer group keeps one committed offset per partition. A lease
//! locks a partition's offset row (`FOR UPDATE SKIP LOCKED`) inside a
//! transaction and reads the record at the committed offset, so no two
//! consumers of a group see the same record at once.
//!
//! - ack advances the offset past the record and commits;
//! - nack rolls back: the offset stays put and the very next lease of that
//!   partition, in this session or any other, redelivers the record.
//!
//! Waiting leases hold no pool connection. One `LISTEN` connection per
//! channel, outside the pool, turns appends into wakeups; the pool only
//! serves appends and lease transactions.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::postgres::{PgListener, PgPoolOptions};
use sqlx::{PgPool, Postgres, Transaction};
use tokio::sync::{Notify, OnceCell};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use trawl_core::channel::{Channel, Delivery};
use trawl_core::error::AppError;

use crate::config::LogChannelConfig;

/// `LISTEN` channel used to wake consumers of every topic. The
/// notification payload is the topic name.
const NOTIFY_CHANNEL: &str = "trawl_channel_log";

fn db_error(e: sqlx::Error) -> AppError {
    AppError::ChannelError(e.to_string())
}

/// Handle for a record leased from a [`PgLogChannel`].
///
/// Holds the open transaction that locks the partition for this group.
pub struct LogLease {
    pub partition: i32,
    pub offset: i64,
    tx: Transaction<'static, Postgres>,
}

impl std::fmt::Debug for LogLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogLease")
            .field("partition", &self.partition)
            .field("offset", &self.offset)
            .finish_non_exhaustive()
    }
}

/// A record as stored in the log.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LogRecord {
    pub partition_id: i32,
    pub record_offset: i64,
    pub payload: Vec<u8>,
    pub producer_id: String,
    pub created_at: DateTime<Utc>,
}

/// Append notifications for one topic, fed by a background `LISTEN` task.
struct Wakeups {
    notify: Arc<Notify>,
    listener_pool: PgPool,
    task: JoinHandle<()>,
}

/// At-least-once channel over a partitioned PostgreSQL log.
#[derive(Clone)]
pub struct PgLogChannel {
    pool: PgPool,
    topic: String,
    group_id: String,
    client_id: String,
    partitions: u32,
    poll_interval: Duration,
    wakeups: Arc<OnceCell<Wakeups>>,
}

impl PgLogChannel {
    /// Connect to PostgreSQL with the given configuration.
    ///
    /// Call [`migrate`](Self::migrate) before first use.
    pub async fn connect(config: &LogChannelConfig) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.database_url)
            .await
            .map_err(|e| AppError::ChannelError(format!("Failed to connect: {e}")))?;

        Ok(Self::from_pool(pool, config))
    }

    /// Create a channel from an existing pool (useful for testing).
    pub fn from_pool(pool: PgPool, config: &LogChannelConfig) -> Self {
        Self {
            pool,
            topic: config.topic.clone(),
            group_id: config.group_id.clone(),
            client_id: config.client_id.clone(),
            partitions: config.partitions.max(1),
            poll_interval: config.poll_interval,
            wakeups: Arc::new(OnceCell::new()),
        }
    }

    /// Run pending migrations, then register this topic's partitions and
    /// this group's offsets.
    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::ChannelError(format!("Migration failed: {e}")))?;
        self.register().await
    }

    async fn register(&self) -> Result<(), AppError> {
        for partition in 0..self.partitions as i32 {
            sqlx::query(
                r#"
                INSERT INTO channel_partitions (topic, partition_id)
                VALUES ($1, $2)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(&self.topic)
            .bind(partition)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

            sqlx::query(
                r#"
                INSERT INTO channel_group_offsets (topic, group_id, partition_id)
                VALUES ($1, $2, $3)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(&self.topic)
            .bind(&self.group_id)
            .bind(partition)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        }
        Ok(())
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// Partition a payload is appended to. Stable across processes.
    pub fn partition_for(&self, payload: &[u8]) -> i32 {
        let digest = Sha256::digest(payload);
        let head = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
        (head % self.partitions) as i32
    }

    /// Records not yet committed by this group, across all partitions.
    pub async fn lag(&self) -> Result<i64, AppError> {
        let (lag,): (i64,) = sqlx::query_as(
            r#"
            SELECT COALESCE(SUM(p.next_offset - o.committed_offset), 0)::BIGINT
            FROM channel_partitions p
            JOIN channel_group_offsets o
              ON o.topic = p.topic AND o.partition_id = p.partition_id
            WHERE p.topic = $1 AND o.group_id = $2
            "#,
        )
        .bind(&self.topic)
        .bind(&self.group_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(lag)
    }

    /// Read records of one partition starting at `from_offset`, oldest first.
    pub async fn records(
        &self,
        partition: i32,
        from_offset: i64,
        limit: usize,
    ) -> Result<Vec<LogRecord>, AppError> {
        sqlx::query_as::<_, LogRecord>(
            r#"
            SELECT partition_id, record_offset, payload, producer_id, created_at
            FROM channel_records
            WHERE topic = $1 AND partition_id = $2 AND record_offset >= $3
            ORDER BY record_offset ASC
            LIMIT $4
            "#,
        )
        .bind(&self.topic)
        .bind(partition)
        .bind(from_offset)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)
    }

    /// Start the `LISTEN` task on first use.
    ///
    /// The listener lives on its own single-connection pool built from the
    /// main pool's connect options, so it never competes with leases.
    async fn wakeups(&self) -> Result<&Wakeups, AppError> {
        self.wakeups
            .get_or_try_init(|| async {
                let options = (*self.pool.connect_options()).clone();
                let listener_pool = PgPoolOptions::new()
                    .max_connections(1)
                    .max_lifetime(None)
                    .idle_timeout(None)
                    .connect_with(options)
                    .await
                    .map_err(db_error)?;

                let mut listener = PgListener::connect_with(&listener_pool)
                    .await
                    .map_err(db_error)?;
                listener.listen(NOTIFY_CHANNEL).await.map_err(db_error)?;

                let notify = Arc::new(Notify::new());
                let task = tokio::spawn(forward_appends(
                    listener,
                    self.topic.clone(),
                    notify.clone(),
                    self.poll_interval,
                ));
                tracing::debug!(topic = %self.topic, "Listening for appends");

                Ok::<_, AppError>(Wakeups {
                    notify,
                    listener_pool,
                    task,
                })
            })
            .await
    }

    /// Lock the oldest uncommitted record of any partition not currently
    /// leased by another consumer of this group.
    async fn try_lease(&self) -> Result<Option<Delivery<LogLease>>, AppError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let row: Option<(i32, i64, Vec<u8>)> = sqlx::query_as(
            r#"
            SELECT o.partition_id, o.committed_offset, r.payload
            FROM channel_group_offsets o
            JOIN channel_records r
              ON r.topic = o.topic
             AND r.partition_id = o.partition_id
             AND r.record_offset = o.committed_offset
            WHERE o.topic = $1 AND o.group_id = $2
            ORDER BY r.created_at ASC
            LIMIT 1
            FOR UPDATE OF o SKIP LOCKED
            "#,
        )
        .bind(&self.topic)
        .bind(&self.group_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error)?;

        match row {
            Some((partition, offset, payload)) => {
                tracing::debug!(topic = %self.topic, %partition, %offset, "Leased record");
                Ok(Some(Delivery::new(
                    payload,
                    LogLease {
                        partition,
                        offset,
                        tx,
                    },
                )))
            }
            None => {
                tx.rollback().await.map_err(db_error)?;
                Ok(None)
            }
        }
    }
}

impl Channel for PgLogChannel {
    type Handle = LogLease;

    fn name(&self) -> &str {
        &self.topic
    }

    async fn enqueue(&self, payload: &[u8]) -> Result<(), AppError> {
        let partition = self.partition_for(payload);
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let (offset,): (i64,) = sqlx::query_as(
            r#"
            UPDATE channel_partitions
            SET next_offset = next_offset + 1
            WHERE topic = $1 AND partition_id = $2
            RETURNING next_offset - 1
            "#,
        )
        .bind(&self.topic)
        .bind(partition)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error)?
        .ok_or_else(|| {
            AppError::ChannelError(format!(
                "topic '{}' partition {partition} is not registered; run migrate first",
                self.topic
            ))
        })?;

        sqlx::query(
            r#"
            INSERT INTO channel_records (topic, partition_id, record_offset, payload, producer_id)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&self.topic)
        .bind(partition)
        .bind(offset)
        .bind(payload)
        .bind(&self.client_id)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        // Delivered to listeners on commit.
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(NOTIFY_CHANNEL)
            .bind(&self.topic)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        tracing::debug!(topic = %self.topic, %partition, %offset, "Appended record");
        Ok(())
    }

    async fn lease(&self, cancel: &CancellationToken) -> Result<Delivery<LogLease>, AppError> {
        let wakeups = self.wakeups().await?;

        loop {
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled);
            }
            // Register before looking, so an append committed in between
            // still wakes us.
            let appended = wakeups.notify.notified();
            tokio::pin!(appended);
            appended.as_mut().enable();

            if let Some(delivery) = self.try_lease().await? {
                return Ok(delivery);
            }

            tokio::select! {
                () = &mut appended => {
                    tracing::trace!(topic = %self.topic, "Woken by append");
                }
                () = tokio::time::sleep(self.poll_interval) => {}
                () = cancel.cancelled() => return Err(AppError::Cancelled),
            }
        }
    }

    async fn ack(&self, delivery: Delivery<LogLease>) -> Result<(), AppError> {
        let LogLease {
            partition,
            offset,
            mut tx,
        } = delivery.handle;

        sqlx::query(
            r#"
            UPDATE channel_group_offsets
            SET committed_offset = $4 + 1, consumer_id = $5, updated_at = NOW()
            WHERE topic = $1 AND group_id = $2 AND partition_id = $3 AND committed_offset = $4
            "#,
        )
        .bind(&self.topic)
        .bind(&self.group_id)
        .bind(partition)
        .bind(offset)
        .bind(&self.client_id)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        tracing::debug!(topic = %self.topic, %partition, %offset, "Committed offset");
        Ok(())
    }

    async fn nack(&self, delivery: Delivery<LogLease>) -> Result<(), AppError> {
        let LogLease {
            partition,
            offset,
            tx,
        } = delivery.handle;
        tx.rollback().await.map_err(db_error)?;
        tracing::debug!(topic = %self.topic, %partition, %offset, "Rewound to uncommitted record");
        Ok(())
    }

    async fn close(&self) -> Result<(), AppError> {
        if let Some(wakeups) = self.wakeups.get() {
            wakeups.task.abort();
            wakeups.listener_pool.close().await;
        }
        self.pool.close().await;
        Ok(())
    }
}

/// Wake waiting leases whenever a record is appended to `topic`.
async fn forward_appends(
    mut listener: PgListener,
    topic: String,
    notify: Arc<Notify>,
    retry_after: Duration,
) {
    loop {
        match listener.recv().await {
            Ok(notification) if notification.payload() == topic => notify.notify_waiters(),
            Ok(_) => {}
            Err(e) => {
                // Leases fall back to polling until the listener reconnects.
                tracing::warn!(%topic, error = %e, "Append listener failed");
                tokio::time::sleep(retry_after).await;
            }
        }
    }
}
