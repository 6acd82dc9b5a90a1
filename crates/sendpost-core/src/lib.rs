pub mod config;
pub mod error;
pub mod executor;
pub mod graph;
pub mod model;
pub mod sendpost;
pub mod store;
pub mod types;

pub use error::{ExecutorError, Result, SendpostError};
pub use executor::{StageExecutor, SubmittedRun};
pub use model::{
    merge_global_parameters, Parameters, Schedule, ScheduleId, Sendpost, SendpostId, Stage,
    StageId,
};
pub use store::{MemoryStore, RedbStore, Store};
pub use types::{StageType, StateType};
