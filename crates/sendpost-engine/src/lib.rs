//! Orchestration of sendpost runs.
//!
//! [`Engine`] wires the pieces together: a [`RunCoordinator`] walking stage
//! chains, a [`NotificationHub`] broadcasting run progress, and a
//! [`DelayScheduler`] feeding due schedules to a worker pool.

mod coordinator;
mod error;
mod notify;
pub mod runner;
mod scheduler;
mod store;
mod sync;
mod worker;

#[cfg(test)]
mod testing;

pub use coordinator::{RunCoordinator, RunTicket};
pub use error::{NotifyError, Result, RunError};
pub use notify::{ChannelObserver, NotificationHub, Observer, NOT_FOUND_FRAME};
pub use scheduler::{DelayScheduler, ScheduleQueue};
pub use store::AsyncStore;
pub use sync::ScheduleSync;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sendpost_core::config::EngineConfig;
use sendpost_core::{sendpost, Schedule, SendpostId, StageExecutor, Store};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct Engine {
    store: AsyncStore,
    coordinator: Arc<RunCoordinator>,
    hub: Arc<NotificationHub>,
    scheduler: Arc<DelayScheduler>,
    queue: ScheduleQueue,
    config: EngineConfig,
}

impl Engine {
    pub fn new(
        store: Arc<dyn Store>,
        executor: Arc<dyn StageExecutor>,
        config: &EngineConfig,
    ) -> Self {
        let hub = Arc::new(NotificationHub::new(
            config.subscribe_attempts,
            config.subscribe_backoff,
        ));
        let coordinator = Arc::new(RunCoordinator::new(
            Arc::clone(&store),
            executor,
            Arc::clone(&hub),
            config.poll_interval,
            config.stage_timeout,
        ));
        let (scheduler, queue) = DelayScheduler::new(config.queue_capacity);
        Self {
            store: AsyncStore::new(store),
            coordinator,
            hub,
            scheduler,
            queue,
            config: config.clone(),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        self.store.inner()
    }

    /// Start a run now, outside of any schedule.
    pub async fn start_run(&self, sendpost_id: SendpostId) -> Result<RunTicket> {
        self.coordinator.start(sendpost_id).await
    }

    pub fn cancel_run(&self, sendpost_id: SendpostId) -> bool {
        self.coordinator.cancel(sendpost_id)
    }

    pub fn is_running(&self, sendpost_id: SendpostId) -> bool {
        self.coordinator.is_running(sendpost_id)
    }

    pub async fn subscribe(
        &self,
        sendpost_id: SendpostId,
        observer: Arc<dyn Observer>,
    ) -> std::result::Result<(), NotifyError> {
        self.hub.subscribe(sendpost_id, observer).await
    }

    /// Persist a plan for the sendpost and arm it, replacing any earlier one.
    pub async fn schedule_run(
        &self,
        sendpost_id: SendpostId,
        planned_at: DateTime<Utc>,
    ) -> Result<Schedule> {
        let schedule = self
            .store
            .call(move |s| sendpost::plan(s, sendpost_id, planned_at))
            .await?;
        self.scheduler.schedule(schedule.clone()).await;
        Ok(schedule)
    }

    /// Withdraw the sendpost's plan while it still waits for its time.
    /// Returns the removed record.
    ///
    /// A schedule that already reached the worker queue is left to run and
    /// nothing is removed.
    pub async fn cancel_schedule(&self, sendpost_id: SendpostId) -> Result<Option<Schedule>> {
        if !self.scheduler.cancel(sendpost_id) {
            let pending = self
                .store
                .call(move |s| s.schedule_for_sendpost(sendpost_id))
                .await?
                .filter(Schedule::is_pending);
            if let Some(queued) = pending {
                if self.scheduler.submitted(sendpost_id).map(|(id, _)| id) == Some(queued.id) {
                    info!(
                        sendpost_id,
                        schedule_id = queued.id,
                        "schedule already enqueued, leaving it to run"
                    );
                    return Ok(None);
                }
            }
        }
        self.store
            .call(move |s| sendpost::unplan(s, sendpost_id))
            .await
    }

    /// Start the configured number of workers on the schedule queue.
    pub fn spawn_workers(&self, shutdown: CancellationToken) -> JoinSet<()> {
        worker::spawn_workers(
            self.config.workers,
            self.queue.clone(),
            Arc::clone(&self.coordinator),
            Arc::clone(self.store.inner()),
            shutdown,
        )
    }

    pub fn schedule_sync(&self) -> ScheduleSync {
        ScheduleSync::new(Arc::clone(self.store.inner()), Arc::clone(&self.scheduler))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}
