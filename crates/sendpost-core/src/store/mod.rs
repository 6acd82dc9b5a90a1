//! Persistence collaborator contract.
//!
//! Every method is one atomic call against the backing store. Multi-step
//! updates (relinking a chain, cascading deletes) are sequences of these
//! calls and are not rolled back if a later step fails.

mod memory;
mod db;

pub use self::memory::MemoryStore;
pub use self::db::RedbStore;

use crate::error::{Result, SendpostError};
use crate::model::{
    Parameters, Schedule, ScheduleId, Sendpost, SendpostId, Stage, StageId,
};
use crate::types::StateType;

pub trait Store: Send + Sync {
    /// Insert (when `id == 0`, assigning a fresh id) or overwrite a sendpost.
    fn save_sendpost(&self, sendpost: &mut Sendpost) -> Result<()>;
    fn get_sendpost(&self, id: SendpostId) -> Result<Sendpost>;
    fn list_sendposts(&self) -> Result<Vec<Sendpost>>;
    fn delete_sendpost(&self, id: SendpostId) -> Result<()>;

    /// Insert (when `id == 0`, assigning a fresh id) or overwrite a stage.
    fn save_stage(&self, stage: &mut Stage) -> Result<()>;
    fn get_stage(&self, id: StageId) -> Result<Stage>;
    /// Direct children of `parent_id`, in no particular order.
    fn sub_stages(&self, parent_id: StageId) -> Result<Vec<Stage>>;
    /// The chain stage whose `next_stage_id` is `id`, if any.
    fn previous_stage(&self, id: StageId) -> Result<Option<Stage>>;
    fn delete_stage(&self, id: StageId) -> Result<()>;

    /// Insert (when `id == 0`, assigning a fresh id) or overwrite a schedule.
    fn save_schedule(&self, schedule: &mut Schedule) -> Result<()>;
    fn get_schedule(&self, id: ScheduleId) -> Result<Schedule>;
    /// All schedules, ordered by id.
    fn list_schedules(&self) -> Result<Vec<Schedule>>;
    fn delete_schedule(&self, id: ScheduleId) -> Result<()>;

    fn first_stage(&self, sendpost_id: SendpostId) -> Result<Option<Stage>> {
        match self.get_sendpost(sendpost_id)?.first_stage_id {
            Some(id) => self.get_stage(id).map(Some),
            None => Ok(None),
        }
    }

    fn global_parameters(&self, sendpost_id: SendpostId) -> Result<Parameters> {
        Ok(self.get_sendpost(sendpost_id)?.global_parameters)
    }

    /// Most recent schedule recorded for a sendpost.
    fn schedule_for_sendpost(&self, sendpost_id: SendpostId) -> Result<Option<Schedule>> {
        Ok(self
            .list_schedules()?
            .into_iter()
            .filter(|s| s.sendpost_id == sendpost_id)
            .max_by_key(|s| s.id))
    }

    /// Schedules no worker has started yet.
    fn pending_schedules(&self) -> Result<Vec<Schedule>> {
        Ok(self
            .list_schedules()?
            .into_iter()
            .filter(Schedule::is_pending)
            .collect())
    }

    /// Set a stage's state and persist it.
    fn update_stage_state(&self, stage: &mut Stage, state: StateType) -> Result<()> {
        stage.state = state;
        self.save_stage(stage)
    }
}

/// Map a missing record onto its not-found error.
pub(crate) fn found<T>(value: Option<T>, missing: impl FnOnce() -> SendpostError) -> Result<T> {
    value.ok_or_else(missing)
}
