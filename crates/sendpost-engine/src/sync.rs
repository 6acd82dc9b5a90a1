//! Periodic reconciliation of persisted schedules with the delay scheduler.
//!
//! Schedules written by another process (or before a restart) only reach
//! the queue through here.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sendpost_core::{Schedule, SendpostId, Store};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::scheduler::DelayScheduler;
use crate::store::AsyncStore;

/// `tokio::time::interval` rejects a zero period.
const MIN_SYNC_INTERVAL: Duration = Duration::from_millis(1);

pub struct ScheduleSync {
    store: AsyncStore,
    scheduler: Arc<DelayScheduler>,
}

impl ScheduleSync {
    pub fn new(store: Arc<dyn Store>, scheduler: Arc<DelayScheduler>) -> Self {
        Self {
            store: AsyncStore::new(store),
            scheduler,
        }
    }

    /// Submit the latest pending schedule of every sendpost the scheduler
    /// has not seen yet. Sendposts without a pending schedule lose their
    /// waiting timer and their submission record. Returns how many schedules
    /// were submitted.
    pub async fn reconcile(&self) -> Result<usize> {
        let mut latest: HashMap<SendpostId, Schedule> = HashMap::new();
        for schedule in self.store.call(|s| s.pending_schedules()).await? {
            match latest.get(&schedule.sendpost_id) {
                Some(kept) if kept.id >= schedule.id => {}
                _ => {
                    latest.insert(schedule.sendpost_id, schedule);
                }
            }
        }

        for sendpost_id in self.scheduler.tracked() {
            if latest.contains_key(&sendpost_id) {
                continue;
            }
            if self.scheduler.cancel(sendpost_id) {
                info!(sendpost_id, "pending schedule disappeared from store");
            } else {
                self.scheduler.forget(sendpost_id);
            }
        }

        let mut submitted = 0;
        for (sendpost_id, schedule) in latest {
            if self.scheduler.submitted(sendpost_id) == Some((schedule.id, schedule.planned_at)) {
                continue;
            }
            self.scheduler.schedule(schedule).await;
            submitted += 1;
        }
        if submitted > 0 {
            debug!(submitted, "schedules reconciled");
        }
        Ok(submitted)
    }

    /// Reconcile now and then on every `interval` until `shutdown` fires.
    pub async fn run(self, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval.max(MIN_SYNC_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.reconcile().await {
                        warn!(error = %e, "schedule reconciliation failed");
                    }
                }
            }
        }
        debug!("schedule sync stopped");
    }
}
