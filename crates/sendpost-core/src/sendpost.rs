//! Sendpost-level bookkeeping on top of the [`Store`].

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::{Result, SendpostError};
use crate::graph;
use crate::model::{Parameters, Schedule, Sendpost, SendpostId};
use crate::store::Store;
use crate::types::StateType;

pub fn create(
    store: &dyn Store,
    name: &str,
    description: Option<String>,
    parameters: Parameters,
) -> Result<Sendpost> {
    let name = name.trim();
    if name.is_empty() {
        return Err(SendpostError::EmptyName);
    }
    let mut sendpost = Sendpost::new(name);
    sendpost.description = description;
    sendpost.global_parameters = parameters;
    store.save_sendpost(&mut sendpost)?;
    debug!(sendpost_id = sendpost.id, "sendpost created");
    Ok(sendpost)
}

/// Insert or overwrite one global parameter.
pub fn set_parameter(
    store: &dyn Store,
    id: SendpostId,
    key: &str,
    value: serde_json::Value,
) -> Result<Sendpost> {
    let mut sendpost = store.get_sendpost(id)?;
    sendpost.global_parameters.insert(key.to_string(), value);
    store.save_sendpost(&mut sendpost)?;
    Ok(sendpost)
}

/// Remove one global parameter. Removing an absent key is a no-op.
pub fn remove_parameter(store: &dyn Store, id: SendpostId, key: &str) -> Result<Sendpost> {
    let mut sendpost = store.get_sendpost(id)?;
    if sendpost.global_parameters.remove(key).is_some() {
        store.save_sendpost(&mut sendpost)?;
    }
    Ok(sendpost)
}

pub fn set_state(store: &dyn Store, id: SendpostId, state: StateType) -> Result<()> {
    let mut sendpost = store.get_sendpost(id)?;
    sendpost.state = state;
    store.save_sendpost(&mut sendpost)?;
    debug!(sendpost_id = id, state = %state, "sendpost state updated");
    Ok(())
}

/// Duplicate a sendpost with its whole stage graph.
///
/// The copy gets the source's global parameters overlaid with `extra`, and
/// every stage starts over as never run.
pub fn copy(
    store: &dyn Store,
    id: SendpostId,
    name: &str,
    description: Option<String>,
    extra: Parameters,
) -> Result<Sendpost> {
    let source = store.get_sendpost(id)?;
    if name.trim().is_empty() {
        return Err(SendpostError::EmptyName);
    }
    let mut copy = source.duplicate(name.trim(), description);
    copy.global_parameters.extend(extra);
    store.save_sendpost(&mut copy)?;

    graph::copy_stages(store, id, copy.id)?;
    // Stage insertion moved the first-stage reference; reload it.
    let copy = store.get_sendpost(copy.id)?;
    debug!(source = id, sendpost_id = copy.id, "sendpost copied");
    Ok(copy)
}

/// Delete a sendpost with every stage it owns and every schedule for it.
pub fn delete(store: &dyn Store, id: SendpostId) -> Result<()> {
    for stage in graph::chain(store, id)? {
        graph::delete_stage(store, stage.id)?;
    }
    for schedule in store.list_schedules()? {
        if schedule.sendpost_id == id {
            store.delete_schedule(schedule.id)?;
        }
    }
    store.delete_sendpost(id)?;
    debug!(sendpost_id = id, "sendpost deleted");
    Ok(())
}

/// Record a planned run, replacing any pending plan for the same sendpost.
///
/// Schedules already picked up by a worker are history and stay untouched.
pub fn plan(store: &dyn Store, sendpost_id: SendpostId, planned_at: DateTime<Utc>) -> Result<Schedule> {
    store.get_sendpost(sendpost_id)?;
    for stale in store.pending_schedules()? {
        if stale.sendpost_id == sendpost_id {
            store.delete_schedule(stale.id)?;
        }
    }
    let mut schedule = Schedule::new(sendpost_id, planned_at);
    store.save_schedule(&mut schedule)?;
    debug!(sendpost_id, schedule_id = schedule.id, %planned_at, "run planned");
    Ok(schedule)
}

/// Drop the pending plan of a sendpost, if there is one.
pub fn unplan(store: &dyn Store, sendpost_id: SendpostId) -> Result<Option<Schedule>> {
    let mut removed = None;
    for pending in store.pending_schedules()? {
        if pending.sendpost_id == sendpost_id {
            store.delete_schedule(pending.id)?;
            removed = Some(pending);
        }
    }
    Ok(removed)
}
