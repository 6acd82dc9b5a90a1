use sendpost_core::{ExecutorError, StateType};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PrefectError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{context}: unexpected status {status}")]
    UnexpectedStatus {
        status: reqwest::StatusCode,
        context: &'static str,
    },

    #[error("response deployment id {got} doesn't match requested {expected}")]
    DeploymentMismatch { expected: String, got: String },

    #[error("flow run was not scheduled (initial state {0})")]
    NotScheduled(StateType),

    #[error("deployment {0} has no completed flow run in the requested window")]
    NoCompletedRun(String),
}

pub type Result<T> = std::result::Result<T, PrefectError>;

impl From<PrefectError> for ExecutorError {
    fn from(e: PrefectError) -> Self {
        match e {
            PrefectError::Http(e) if e.is_decode() => ExecutorError::Decode(e.to_string()),
            PrefectError::Http(e) => ExecutorError::Request(e.to_string()),
            PrefectError::UnexpectedStatus { status, context } => ExecutorError::UnexpectedStatus {
                status: status.as_u16(),
                context: context.to_string(),
            },
            PrefectError::DeploymentMismatch { expected, got } => {
                ExecutorError::DeploymentMismatch { expected, got }
            }
            PrefectError::NotScheduled(state) => ExecutorError::NotScheduled(state),
            PrefectError::NoCompletedRun(deployment) => {
                ExecutorError::NotCompletedInWindow(deployment)
            }
        }
    }
}
