//! Worker pool draining the schedule queue.

use std::sync::Arc;

use chrono::Utc;
use sendpost_core::{Schedule, Store};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::coordinator::RunCoordinator;
use crate::error::RunError;
use crate::scheduler::ScheduleQueue;
use crate::store::AsyncStore;

/// Spawn `count` workers. Each runs one due schedule at a time until
/// `shutdown` fires or the queue closes.
pub fn spawn_workers(
    count: usize,
    queue: ScheduleQueue,
    coordinator: Arc<RunCoordinator>,
    store: Arc<dyn Store>,
    shutdown: CancellationToken,
) -> JoinSet<()> {
    let store = AsyncStore::new(store);
    let mut workers = JoinSet::new();
    for worker in 0..count {
        let queue = queue.clone();
        let coordinator = Arc::clone(&coordinator);
        let store = store.clone();
        let shutdown = shutdown.clone();
        workers.spawn(async move {
            debug!(worker, "schedule worker started");
            loop {
                let schedule = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    next = queue.next() => match next {
                        Some(schedule) => schedule,
                        None => break,
                    },
                };
                execute(worker, &store, &coordinator, schedule).await;
            }
            debug!(worker, "schedule worker stopped");
        });
    }
    workers
}

async fn execute(
    worker: usize,
    store: &AsyncStore,
    coordinator: &Arc<RunCoordinator>,
    queued: Schedule,
) {
    // The record may have been withdrawn or replaced after it was queued.
    let schedule_id = queued.id;
    let schedule = match store.call(move |s| s.get_schedule(schedule_id)).await {
        Ok(s) if s.is_pending() => s,
        Ok(_) => {
            debug!(worker, schedule_id, "schedule already started, skipping");
            return;
        }
        Err(RunError::Store(e)) if e.is_not_found() => {
            info!(worker, schedule_id, "schedule withdrawn before it ran");
            return;
        }
        Err(e) => {
            error!(worker, schedule_id, error = %e, "could not load schedule");
            return;
        }
    };

    let schedule = match stamp(store, schedule, |s| s.started_at = Some(Utc::now())).await {
        Ok(s) => s,
        Err(e) => {
            error!(worker, schedule_id, error = %e, "could not stamp schedule start");
            return;
        }
    };
    info!(worker, schedule_id = schedule.id, sendpost_id = schedule.sendpost_id, "running scheduled sendpost");

    match coordinator.start(schedule.sendpost_id).await {
        Ok(ticket) => {
            let state = ticket.wait().await;
            info!(worker, schedule_id = schedule.id, state = %state, "scheduled run finished");
        }
        Err(RunError::AlreadyRunning(id)) => {
            warn!(worker, schedule_id = schedule.id, sendpost_id = id, "sendpost already running, schedule skipped");
        }
        Err(e) => {
            error!(worker, schedule_id = schedule.id, error = %e, "scheduled run could not start");
        }
    }

    if let Err(e) = stamp(store, schedule, |s| s.completed_at = Some(Utc::now())).await {
        warn!(worker, schedule_id, error = %e, "could not stamp schedule completion");
    }
}

async fn stamp(
    store: &AsyncStore,
    mut schedule: Schedule,
    set: impl FnOnce(&mut Schedule),
) -> Result<Schedule, RunError> {
    set(&mut schedule);
    store
        .call(move |s| {
            s.save_schedule(&mut schedule)?;
            Ok(schedule)
        })
        .await
}
