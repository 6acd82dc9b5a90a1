//! Delayed submission of schedules to the worker queue.
//!
//! At most one timer per sendpost waits at any time. Scheduling again
//! replaces the waiting timer, so a superseded schedule never reaches the
//! queue. Once a timer fires its entry is dropped; what remains is the
//! record of the last schedule submitted for the sendpost, which
//! [`ScheduleSync`](crate::ScheduleSync) compares against the store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use sendpost_core::{Schedule, ScheduleId, SendpostId};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A timer waiting for its planned time.
struct Armed {
    schedule_id: ScheduleId,
    generation: u64,
    timer: CancellationToken,
}

#[derive(Default)]
struct Tables {
    armed: HashMap<SendpostId, Armed>,
    /// Last schedule handed to [`DelayScheduler::schedule`], armed or fired.
    submitted: HashMap<SendpostId, (ScheduleId, DateTime<Utc>)>,
}

pub struct DelayScheduler {
    tables: Mutex<Tables>,
    queue_tx: mpsc::Sender<Schedule>,
    next_generation: AtomicU64,
}

/// Receiving side of the schedule queue, shared by all workers.
#[derive(Clone)]
pub struct ScheduleQueue {
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Schedule>>>,
}

impl ScheduleQueue {
    /// Next due schedule, or `None` once every sender is gone.
    pub async fn next(&self) -> Option<Schedule> {
        self.rx.lock().await.recv().await
    }
}

impl DelayScheduler {
    pub fn new(queue_capacity: usize) -> (Arc<Self>, ScheduleQueue) {
        let (queue_tx, rx) = mpsc::channel(queue_capacity.max(1));
        let scheduler = Arc::new(Self {
            tables: Mutex::new(Tables::default()),
            queue_tx,
            next_generation: AtomicU64::new(1),
        });
        let queue = ScheduleQueue {
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
        };
        (scheduler, queue)
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Submit `schedule` for its sendpost, superseding a waiting timer.
    ///
    /// A planned time in the past (or now) is enqueued immediately; a future
    /// one arms a timer.
    pub async fn schedule(self: &Arc<Self>, schedule: Schedule) {
        let sendpost_id = schedule.sendpost_id;
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let delay = (schedule.planned_at - Utc::now()).to_std().ok().filter(|d| !d.is_zero());
        let timer = delay.map(|_| CancellationToken::new());

        let previous = {
            let mut tables = self.tables();
            tables
                .submitted
                .insert(sendpost_id, (schedule.id, schedule.planned_at));
            match &timer {
                Some(timer) => tables.armed.insert(
                    sendpost_id,
                    Armed {
                        schedule_id: schedule.id,
                        generation,
                        timer: timer.clone(),
                    },
                ),
                None => tables.armed.remove(&sendpost_id),
            }
        };
        if let Some(old) = previous {
            old.timer.cancel();
            info!(
                sendpost_id,
                replaced = old.schedule_id,
                schedule_id = schedule.id,
                "schedule superseded"
            );
        }

        match (delay, timer) {
            (Some(delay), Some(timer)) => {
                debug!(sendpost_id, schedule_id = schedule.id, ?delay, "schedule armed");
                let this = Arc::clone(self);
                tokio::spawn(async move {
                    tokio::select! {
                        _ = timer.cancelled() => {
                            debug!(sendpost_id, schedule_id = schedule.id, "schedule timer cancelled");
                        }
                        _ = tokio::time::sleep(delay) => {
                            if this.fire(sendpost_id, generation) {
                                this.enqueue(schedule).await;
                            }
                        }
                    }
                });
            }
            _ => self.enqueue(schedule).await,
        }
    }

    /// Drop the armed entry if it is still the one the timer was armed for.
    fn fire(&self, sendpost_id: SendpostId, generation: u64) -> bool {
        let mut tables = self.tables();
        let current = tables
            .armed
            .get(&sendpost_id)
            .is_some_and(|armed| armed.generation == generation);
        if current {
            tables.armed.remove(&sendpost_id);
        }
        current
    }

    async fn enqueue(&self, schedule: Schedule) {
        let (sendpost_id, schedule_id) = (schedule.sendpost_id, schedule.id);
        match self.queue_tx.send(schedule).await {
            Ok(()) => debug!(sendpost_id, schedule_id, "schedule enqueued"),
            Err(_) => warn!(sendpost_id, schedule_id, "schedule queue closed, dropping"),
        }
    }

    /// Disarm the sendpost's waiting timer.
    ///
    /// Returns false when no timer was waiting. A schedule that already
    /// reached the queue is not recalled.
    pub fn cancel(&self, sendpost_id: SendpostId) -> bool {
        let armed = {
            let mut tables = self.tables();
            let armed = tables.armed.remove(&sendpost_id);
            if armed.is_some() {
                tables.submitted.remove(&sendpost_id);
            }
            armed
        };
        let Some(armed) = armed else {
            return false;
        };
        armed.timer.cancel();
        info!(sendpost_id, schedule_id = armed.schedule_id, "schedule cancelled");
        true
    }

    /// Drop the submission record of a sendpost with no waiting timer.
    pub fn forget(&self, sendpost_id: SendpostId) {
        let mut tables = self.tables();
        if !tables.armed.contains_key(&sendpost_id) {
            tables.submitted.remove(&sendpost_id);
        }
    }

    /// True while a timer of the sendpost waits for its time.
    pub fn is_pending(&self, sendpost_id: SendpostId) -> bool {
        self.tables().armed.contains_key(&sendpost_id)
    }

    /// Last schedule submitted for a sendpost.
    pub fn submitted(&self, sendpost_id: SendpostId) -> Option<(ScheduleId, DateTime<Utc>)> {
        self.tables().submitted.get(&sendpost_id).copied()
    }

    /// Sendposts with a submission record.
    pub fn tracked(&self) -> Vec<SendpostId> {
        let mut ids: Vec<_> = self.tables().submitted.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Sendposts with a waiting timer.
    pub fn armed(&self) -> Vec<SendpostId> {
        let mut ids: Vec<_> = self.tables().armed.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}
