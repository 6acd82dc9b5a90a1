use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{found, Store};
use crate::error::{Result, SendpostError};
use crate::model::{Schedule, ScheduleId, Sendpost, SendpostId, Stage, StageId};

#[derive(Default)]
struct Tables {
    next_id: u64,
    sendposts: BTreeMap<SendpostId, Sendpost>,
    stages: BTreeMap<StageId, Stage>,
    schedules: BTreeMap<ScheduleId, Schedule>,
}

impl Tables {
    fn assign(&mut self, id: &mut u64) {
        if *id == 0 {
            self.next_id += 1;
            *id = self.next_id;
        }
    }
}

/// Process-local store. Used by tests and by `--store :memory:`.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Store for MemoryStore {
    fn save_sendpost(&self, sendpost: &mut Sendpost) -> Result<()> {
        let mut t = self.lock();
        t.assign(&mut sendpost.id);
        t.sendposts.insert(sendpost.id, sendpost.clone());
        Ok(())
    }

    fn get_sendpost(&self, id: SendpostId) -> Result<Sendpost> {
        let t = self.lock();
        found(t.sendposts.get(&id).cloned(), || {
            SendpostError::SendpostNotFound(id)
        })
    }

    fn list_sendposts(&self) -> Result<Vec<Sendpost>> {
        Ok(self.lock().sendposts.values().cloned().collect())
    }

    fn delete_sendpost(&self, id: SendpostId) -> Result<()> {
        self.lock().sendposts.remove(&id);
        Ok(())
    }

    fn save_stage(&self, stage: &mut Stage) -> Result<()> {
        let mut t = self.lock();
        t.assign(&mut stage.id);
        t.stages.insert(stage.id, stage.clone());
        Ok(())
    }

    fn get_stage(&self, id: StageId) -> Result<Stage> {
        let t = self.lock();
        found(t.stages.get(&id).cloned(), || SendpostError::StageNotFound(id))
    }

    fn sub_stages(&self, parent_id: StageId) -> Result<Vec<Stage>> {
        Ok(self
            .lock()
            .stages
            .values()
            .filter(|s| s.parent_stage_id == Some(parent_id))
            .cloned()
            .collect())
    }

    fn previous_stage(&self, id: StageId) -> Result<Option<Stage>> {
        Ok(self
            .lock()
            .stages
            .values()
            .find(|s| s.next_stage_id == Some(id))
            .cloned())
    }

    fn delete_stage(&self, id: StageId) -> Result<()> {
        self.lock().stages.remove(&id);
        Ok(())
    }

    fn save_schedule(&self, schedule: &mut Schedule) -> Result<()> {
        let mut t = self.lock();
        t.assign(&mut schedule.id);
        t.schedules.insert(schedule.id, schedule.clone());
        Ok(())
    }

    fn get_schedule(&self, id: ScheduleId) -> Result<Schedule> {
        let t = self.lock();
        found(t.schedules.get(&id).cloned(), || {
            SendpostError::ScheduleNotFound(id)
        })
    }

    fn list_schedules(&self) -> Result<Vec<Schedule>> {
        Ok(self.lock().schedules.values().cloned().collect())
    }

    fn delete_schedule(&self, id: ScheduleId) -> Result<()> {
        self.lock().schedules.remove(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::contract;

    #[test]
    fn save_assigns_ids_and_roundtrips() {
        contract::save_assigns_ids_and_roundtrips(&MemoryStore::new());
    }

    #[test]
    fn missing_records_are_not_found() {
        contract::missing_records_are_not_found(&MemoryStore::new());
    }

    #[test]
    fn stage_queries() {
        contract::stage_queries(&MemoryStore::new());
    }

    #[test]
    fn schedule_queries() {
        contract::schedule_queries(&MemoryStore::new());
    }
}
