//! Durable store backed by redb.
//!
//! redb locks its file exclusively for as long as a `Database` is open. The
//! daemon and the operator CLI share one file, so every call opens the
//! database, runs one transaction and closes it again. An open that finds the
//! file locked by another process retries for a bounded time.
//!
//! # Table design
//!
//! One table per entity, keyed by its `u64` id with the JSON-encoded record
//! as value. A `sequences` table holds the last id handed out per entity so
//! ids stay unique across restarts. Id assignment and the insert happen in
//! the same write transaction.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use redb::{Database, DatabaseError, ReadableTable, TableDefinition};
use serde::{de::DeserializeOwned, Serialize};

use super::Store;
use crate::error::{Result, SendpostError};
use crate::model::{Schedule, ScheduleId, Sendpost, SendpostId, Stage, StageId};

// ---------------------------------------------------------------------------
// Table definitions
// ---------------------------------------------------------------------------

type RecordTable = TableDefinition<'static, u64, &'static [u8]>;

const SENDPOSTS: RecordTable = TableDefinition::new("sendposts");
const STAGES: RecordTable = TableDefinition::new("stages");
const SCHEDULES: RecordTable = TableDefinition::new("schedules");
const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences");

const LOCK_ATTEMPTS: u32 = 200;
const LOCK_BACKOFF: Duration = Duration::from_millis(10);

fn db_err(e: impl std::fmt::Display) -> SendpostError {
    SendpostError::Store(e.to_string())
}

/// Ties an entity type to its table.
trait Record: Serialize + DeserializeOwned {
    const TABLE: RecordTable;
    const SEQUENCE: &'static str;

    fn id_mut(&mut self) -> &mut u64;
    fn not_found(id: u64) -> SendpostError;
}

impl Record for Sendpost {
    const TABLE: RecordTable = SENDPOSTS;
    const SEQUENCE: &'static str = "sendpost";

    fn id_mut(&mut self) -> &mut u64 {
        &mut self.id
    }

    fn not_found(id: u64) -> SendpostError {
        SendpostError::SendpostNotFound(id)
    }
}

impl Record for Stage {
    const TABLE: RecordTable = STAGES;
    const SEQUENCE: &'static str = "stage";

    fn id_mut(&mut self) -> &mut u64 {
        &mut self.id
    }

    fn not_found(id: u64) -> SendpostError {
        SendpostError::StageNotFound(id)
    }
}

impl Record for Schedule {
    const TABLE: RecordTable = SCHEDULES;
    const SEQUENCE: &'static str = "schedule";

    fn id_mut(&mut self) -> &mut u64 {
        &mut self.id
    }

    fn not_found(id: u64) -> SendpostError {
        SendpostError::ScheduleNotFound(id)
    }
}

// ---------------------------------------------------------------------------
// RedbStore
// ---------------------------------------------------------------------------

pub struct RedbStore {
    path: PathBuf,
    /// One open handle per process at a time.
    open_lock: Mutex<()>,
}

/// The database, open for the length of one call.
struct Session<'a> {
    db: Database,
    _guard: MutexGuard<'a, ()>,
}

impl RedbStore {
    /// Create the database at `path` if needed, with every table, so read
    /// transactions never hit a missing table.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let store = Self {
            path: path.to_path_buf(),
            open_lock: Mutex::new(()),
        };
        {
            let session = store.session()?;
            let wt = session.db.begin_write().map_err(db_err)?;
            for table in [SENDPOSTS, STAGES, SCHEDULES] {
                wt.open_table(table).map_err(db_err)?;
            }
            wt.open_table(SEQUENCES).map_err(db_err)?;
            wt.commit().map_err(db_err)?;
        }
        Ok(store)
    }

    fn session(&self) -> Result<Session<'_>> {
        let guard = self.open_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut attempt = 1;
        loop {
            match Database::create(&self.path) {
                Ok(db) => return Ok(Session { db, _guard: guard }),
                Err(DatabaseError::DatabaseAlreadyOpen) if attempt < LOCK_ATTEMPTS => {
                    attempt += 1;
                    std::thread::sleep(LOCK_BACKOFF);
                }
                Err(e) => return Err(db_err(e)),
            }
        }
    }

    fn save<T: Record>(&self, record: &mut T) -> Result<()> {
        let session = self.session()?;
        let wt = session.db.begin_write().map_err(db_err)?;
        {
            if *record.id_mut() == 0 {
                let mut seq = wt.open_table(SEQUENCES).map_err(db_err)?;
                let last = seq
                    .get(T::SEQUENCE)
                    .map_err(db_err)?
                    .map(|g| g.value())
                    .unwrap_or(0);
                seq.insert(T::SEQUENCE, last + 1).map_err(db_err)?;
                *record.id_mut() = last + 1;
            }
            let id = *record.id_mut();
            let value = serde_json::to_vec(record)?;
            let mut table = wt.open_table(T::TABLE).map_err(db_err)?;
            table.insert(id, value.as_slice()).map_err(db_err)?;
        }
        wt.commit().map_err(db_err)?;
        Ok(())
    }

    fn load<T: Record>(&self, id: u64) -> Result<T> {
        let session = self.session()?;
        let rt = session.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(T::TABLE).map_err(db_err)?;
        match table.get(id).map_err(db_err)? {
            Some(v) => Ok(serde_json::from_slice(v.value())?),
            None => Err(T::not_found(id)),
        }
    }

    /// Every record of a table, in id order.
    fn scan<T: Record>(&self) -> Result<Vec<T>> {
        let session = self.session()?;
        let rt = session.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(T::TABLE).map_err(db_err)?;
        let mut result = Vec::new();
        for entry in table.iter().map_err(db_err)? {
            let (_, v) = entry.map_err(db_err)?;
            result.push(serde_json::from_slice(v.value())?);
        }
        Ok(result)
    }

    fn remove<T: Record>(&self, id: u64) -> Result<()> {
        let session = self.session()?;
        let wt = session.db.begin_write().map_err(db_err)?;
        {
            let mut table = wt.open_table(T::TABLE).map_err(db_err)?;
            table.remove(id).map_err(db_err)?;
        }
        wt.commit().map_err(db_err)?;
        Ok(())
    }
}

impl Store for RedbStore {
    fn save_sendpost(&self, sendpost: &mut Sendpost) -> Result<()> {
        self.save(sendpost)
    }

    fn get_sendpost(&self, id: SendpostId) -> Result<Sendpost> {
        self.load(id)
    }

    fn list_sendposts(&self) -> Result<Vec<Sendpost>> {
        self.scan()
    }

    fn delete_sendpost(&self, id: SendpostId) -> Result<()> {
        self.remove::<Sendpost>(id)
    }

    fn save_stage(&self, stage: &mut Stage) -> Result<()> {
        self.save(stage)
    }

    fn get_stage(&self, id: StageId) -> Result<Stage> {
        self.load(id)
    }

    fn sub_stages(&self, parent_id: StageId) -> Result<Vec<Stage>> {
        Ok(self
            .scan::<Stage>()?
            .into_iter()
            .filter(|s| s.parent_stage_id == Some(parent_id))
            .collect())
    }

    fn previous_stage(&self, id: StageId) -> Result<Option<Stage>> {
        Ok(self
            .scan::<Stage>()?
            .into_iter()
            .find(|s| s.next_stage_id == Some(id)))
    }

    fn delete_stage(&self, id: StageId) -> Result<()> {
        self.remove::<Stage>(id)
    }

    fn save_schedule(&self, schedule: &mut Schedule) -> Result<()> {
        self.save(schedule)
    }

    fn get_schedule(&self, id: ScheduleId) -> Result<Schedule> {
        self.load(id)
    }

    fn list_schedules(&self) -> Result<Vec<Schedule>> {
        self.scan()
    }

    fn delete_schedule(&self, id: ScheduleId) -> Result<()> {
        self.remove::<Schedule>(id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
