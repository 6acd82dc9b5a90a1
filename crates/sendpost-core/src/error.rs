use thiserror::Error;

use crate::model::{ScheduleId, SendpostId, StageId};
use crate::types::StateType;

#[derive(Debug, Error)]
pub enum SendpostError {
    #[error("sendpost not found: {0}")]
    SendpostNotFound(SendpostId),

    #[error("stage not found: {0}")]
    StageNotFound(StageId),

    #[error("schedule not found: {0}")]
    ScheduleNotFound(ScheduleId),

    #[error("sendpost name must not be empty")]
    EmptyName,

    #[error("stage {0} is not a parallel stage")]
    NotParallel(StageId),

    #[error("stage {0} cannot have both a next stage and a parent stage")]
    LinkConflict(StageId),

    #[error("stage {stage} belongs to sendpost {owner}, not {expected}")]
    ForeignStage {
        stage: StageId,
        owner: SendpostId,
        expected: SendpostId,
    },

    #[error("stage chain of sendpost {sendpost} loops back to stage {stage}")]
    ChainCycle { sendpost: SendpostId, stage: StageId },

    #[error("unknown state type: {0}")]
    UnknownState(String),

    #[error("store error: {0}")]
    Store(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl SendpostError {
    /// True for lookups that found nothing, as opposed to storage failures.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::SendpostNotFound(_) | Self::StageNotFound(_) | Self::ScheduleNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SendpostError>;

/// Failures reported by a [`StageExecutor`](crate::executor::StageExecutor).
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("{context}: unexpected status {status}")]
    UnexpectedStatus { status: u16, context: String },

    #[error("response deployment id {got} doesn't match requested {expected}")]
    DeploymentMismatch { expected: String, got: String },

    #[error("flow run was not scheduled (initial state {0})")]
    NotScheduled(StateType),

    #[error("deployment {0} has no completed run in the requested window")]
    NotCompletedInWindow(String),

    #[error("failed to decode response: {0}")]
    Decode(String),
}
