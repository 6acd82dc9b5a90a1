//! Per-sendpost fan-out of run status labels to live observers.
//!
//! A pool exists only while a run of its sendpost is active. Observers that
//! fail a delivery are evicted and closed; the others keep receiving.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use sendpost_core::{SendpostId, StateType};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::error::NotifyError;

/// Frame sent to an observer that subscribed to a sendpost with no run.
pub const NOT_FOUND_FRAME: &str = "sendpost not found";

/// A live subscriber, typically one WebSocket connection.
#[async_trait]
pub trait Observer: Send + Sync {
    /// Deliver one text frame.
    async fn send(&self, frame: &str) -> Result<(), NotifyError>;
    /// Close the underlying connection. Called at most once by the hub.
    async fn close(&self);
}

#[derive(Default)]
struct ObserverPool {
    inner: tokio::sync::Mutex<PoolState>,
}

#[derive(Default)]
struct PoolState {
    observers: Vec<Arc<dyn Observer>>,
    /// Set once the run is deregistered. A closed pool accepts no observers.
    closed: bool,
}

pub struct NotificationHub {
    pools: Mutex<HashMap<SendpostId, Arc<ObserverPool>>>,
    subscribe_attempts: u32,
    subscribe_backoff: Duration,
}

impl NotificationHub {
    pub fn new(subscribe_attempts: u32, subscribe_backoff: Duration) -> Self {
        Self {
            pools: Mutex::new(HashMap::new()),
            subscribe_attempts: subscribe_attempts.max(1),
            subscribe_backoff,
        }
    }

    fn pools(&self) -> MutexGuard<'_, HashMap<SendpostId, Arc<ObserverPool>>> {
        self.pools.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pool(&self, sendpost_id: SendpostId) -> Option<Arc<ObserverPool>> {
        self.pools().get(&sendpost_id).cloned()
    }

    /// Open a fresh, empty pool for a starting run.
    pub fn register_run(&self, sendpost_id: SendpostId) {
        self.pools()
            .insert(sendpost_id, Arc::new(ObserverPool::default()));
        debug!(sendpost_id, "notification pool registered");
    }

    /// Drop the pool and close every observer still in it.
    pub async fn deregister_run(&self, sendpost_id: SendpostId) {
        let Some(pool) = self.pools().remove(&sendpost_id) else {
            return;
        };
        let observers = {
            let mut state = pool.inner.lock().await;
            state.closed = true;
            std::mem::take(&mut state.observers)
        };
        for observer in &observers {
            observer.close().await;
        }
        debug!(sendpost_id, closed = observers.len(), "notification pool deregistered");
    }

    pub fn is_registered(&self, sendpost_id: SendpostId) -> bool {
        self.pools().contains_key(&sendpost_id)
    }

    pub async fn observer_count(&self, sendpost_id: SendpostId) -> usize {
        match self.pool(sendpost_id) {
            Some(pool) => pool.inner.lock().await.observers.len(),
            None => 0,
        }
    }

    /// Attach an observer to a sendpost's run.
    ///
    /// A run that is about to start may not have its pool yet, so a missing
    /// pool is retried a bounded number of times before the observer is told
    /// the sendpost was not found.
    pub async fn subscribe(
        &self,
        sendpost_id: SendpostId,
        observer: Arc<dyn Observer>,
    ) -> Result<(), NotifyError> {
        for attempt in 1..=self.subscribe_attempts {
            if let Some(pool) = self.pool(sendpost_id) {
                let mut state = pool.inner.lock().await;
                if state.closed {
                    // The run finished between the lookup and the lock.
                    break;
                }
                state.observers.push(Arc::clone(&observer));
                debug!(sendpost_id, attempt, "observer subscribed");
                return Ok(());
            }
            info!(sendpost_id, attempt, "no active run yet, retrying subscribe");
            if attempt < self.subscribe_attempts {
                tokio::time::sleep(self.subscribe_backoff).await;
            }
        }

        if let Err(e) = observer.send(NOT_FOUND_FRAME).await {
            debug!(sendpost_id, error = %e, "could not tell observer the run is missing");
        }
        Err(NotifyError::RunNotFound(sendpost_id))
    }

    /// Send a state label to every observer of the sendpost's run.
    pub async fn publish(&self, sendpost_id: SendpostId, state: StateType) -> Result<(), NotifyError> {
        let pool = self
            .pool(sendpost_id)
            .ok_or(NotifyError::RunNotFound(sendpost_id))?;

        let mut inner = pool.inner.lock().await;
        if inner.closed {
            return Err(NotifyError::RunNotFound(sendpost_id));
        }
        let mut kept = Vec::with_capacity(inner.observers.len());
        for observer in inner.observers.drain(..) {
            match observer.send(state.as_str()).await {
                Ok(()) => kept.push(observer),
                Err(e) => {
                    warn!(sendpost_id, error = %e, "dropping observer after failed delivery");
                    observer.close().await;
                }
            }
        }
        inner.observers = kept;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ChannelObserver
// ---------------------------------------------------------------------------

/// In-process observer feeding a bounded channel.
///
/// A full buffer counts as a failed delivery, so a stalled reader is evicted
/// instead of holding up the run.
pub struct ChannelObserver {
    tx: Mutex<Option<mpsc::Sender<String>>>,
}

impl ChannelObserver {
    pub fn new(capacity: usize) -> (Arc<Self>, ReceiverStream<String>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let observer = Arc::new(Self {
            tx: Mutex::new(Some(tx)),
        });
        (observer, ReceiverStream::new(rx))
    }

    fn sender(&self) -> Option<mpsc::Sender<String>> {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Observer for ChannelObserver {
    async fn send(&self, frame: &str) -> Result<(), NotifyError> {
        let tx = self
            .sender()
            .ok_or_else(|| NotifyError::Delivery("observer closed".into()))?;
        tx.try_send(frame.to_string())
            .map_err(|e| NotifyError::Delivery(e.to_string()))
    }

    async fn close(&self) {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}
