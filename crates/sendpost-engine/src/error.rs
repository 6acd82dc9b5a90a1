use std::time::Duration;

use sendpost_core::{ExecutorError, SendpostError, SendpostId, StageId, StateType};
use thiserror::Error;

/// Why a stage, and with it a sendpost run, did not complete.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("stage {stage_id}: submission failed: {source}")]
    SubmissionFailed {
        stage_id: StageId,
        #[source]
        source: ExecutorError,
    },

    #[error("stage {stage_id}: status check failed: {source}")]
    StatusCheckFailed {
        stage_id: StageId,
        #[source]
        source: ExecutorError,
    },

    #[error("stage {0} has no bound run id to check")]
    NoRunId(StageId),

    #[error("stage {stage_id} did not reach a terminal state within {timeout:?}")]
    Timeout { stage_id: StageId, timeout: Duration },

    #[error("stage {stage_id} ended in remote state {state}")]
    RemoteFailureState { stage_id: StageId, state: StateType },

    #[error("stage {stage_id}: completion window not satisfied: {source}")]
    WindowNotSatisfied {
        stage_id: StageId,
        #[source]
        source: ExecutorError,
    },

    #[error(transparent)]
    Store(#[from] SendpostError),

    #[error("sendpost {0} has no stages")]
    NoFirstStage(SendpostId),

    #[error("sendpost {0} is already running")]
    AlreadyRunning(SendpostId),

    #[error("run of sendpost {0} was cancelled")]
    Cancelled(SendpostId),

    #[error("stage task failed: {0}")]
    Join(String),
}

impl RunError {
    /// State a stage or sendpost settles in when this error ends its run.
    pub fn settled_state(&self) -> StateType {
        match self {
            RunError::Cancelled(_) => StateType::Cancelled,
            _ => StateType::Failed,
        }
    }
}

pub type Result<T> = std::result::Result<T, RunError>;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("sendpost {0} has no active run")]
    RunNotFound(SendpostId),

    #[error("delivery failed: {0}")]
    Delivery(String),
}
