//! In-process list-backed channel.
//!
//! Same contract as the Redis list backend: leases pop from the front, a
//! nack pushes the payload to the back so retries queue up behind work that
//! was already pending. Nothing survives the process, so this backend is
//! meant for tests and single-process runs.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::channel::{Channel, Delivery};
use crate::error::AppError;

/// Handle for a message leased from a [`MemoryChannel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryLease {
    pub id: Uuid,
}

#[derive(Default)]
struct State {
    pending: VecDeque<Vec<u8>>,
    in_flight: HashMap<Uuid, Vec<u8>>,
}

struct Inner {
    state: Mutex<State>,
    available: Notify,
    closed: AtomicBool,
}

/// Thread-safe in-memory FIFO channel.
#[derive(Clone)]
pub struct MemoryChannel {
    name: Arc<str>,
    inner: Arc<Inner>,
}

impl MemoryChannel {
    pub fn new(name: impl Into<String>) -> Self {
        let name: String = name.into();
        Self {
            name: name.into(),
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                available: Notify::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Number of messages waiting to be leased.
    pub fn len(&self) -> usize {
        self.state().map(|s| s.pending.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of messages leased but not yet acked or nacked.
    pub fn in_flight(&self) -> usize {
        self.state().map(|s| s.in_flight.len()).unwrap_or(0)
    }

    fn state(&self) -> Result<MutexGuard<'_, State>, AppError> {
        self.inner
            .state
            .lock()
            .map_err(|_| AppError::ChannelError(format!("channel '{}' state poisoned", self.name)))
    }

    fn ensure_open(&self) -> Result<(), AppError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(AppError::ChannelError(format!(
                "channel '{}' is closed",
                self.name
            )));
        }
        Ok(())
    }

    fn try_lease(&self) -> Result<Option<Delivery<MemoryLease>>, AppError> {
        let mut state = self.state()?;
        let Some(payload) = state.pending.pop_front() else {
            return Ok(None);
        };
        let lease = MemoryLease { id: Uuid::new_v4() };
        state.in_flight.insert(lease.id, payload.clone());
        Ok(Some(Delivery::new(payload, lease)))
    }
}

impl Channel for MemoryChannel {
    type Handle = MemoryLease;

    fn name(&self) -> &str {
        &self.name
    }

    async fn enqueue(&self, payload: &[u8]) -> Result<(), AppError> {
        self.ensure_open()?;
        self.state()?.pending.push_back(payload.to_vec());
        self.inner.available.notify_one();
        Ok(())
    }

    async fn lease(&self, cancel: &CancellationToken) -> Result<Delivery<MemoryLease>, AppError> {
        loop {
            // Register before checking, so a close or enqueue landing between
            // the check and the wait still wakes us.
            let notified = self.inner.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            self.ensure_open()?;
            if let Some(delivery) = self.try_lease()? {
                tracing::debug!(channel = %self.name, lease = %delivery.handle.id, "Leased message");
                return Ok(delivery);
            }
            tokio::select! {
                () = &mut notified => {}
                () = cancel.cancelled() => return Err(AppError::Cancelled),
            }
        }
    }

    async fn ack(&self, delivery: Delivery<MemoryLease>) -> Result<(), AppError> {
        let removed = self.state()?.in_flight.remove(&delivery.handle.id);
        match removed {
            Some(_) => Ok(()),
            None => Err(AppError::ChannelError(format!(
                "lease {} is not in flight on '{}'",
                delivery.handle.id, self.name
            ))),
        }
    }

    async fn nack(&self, delivery: Delivery<MemoryLease>) -> Result<(), AppError> {
        {
            let mut state = self.state()?;
            let payload = state
                .in_flight
                .remove(&delivery.handle.id)
                .unwrap_or(delivery.payload);
            state.pending.push_back(payload);
        }
        tracing::debug!(channel = %self.name, lease = %delivery.handle.id, "Requeued message");
        self.inner.available.notify_one();
        Ok(())
    }

    async fn close(&self) -> Result<(), AppError> {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.available.notify_waiters();
        Ok(())
    }
}
