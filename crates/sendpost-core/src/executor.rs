use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::ExecutorError;
use crate::model::Parameters;
use crate::types::StateType;

/// A freshly submitted remote run.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmittedRun {
    pub run_id: String,
    pub state: StateType,
}

/// The external workflow executor stages are dispatched to.
///
/// Implementations must be cheap to share across tasks; the engine holds one
/// behind an `Arc` for its whole lifetime.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    /// Submit a run of `deployment_id` with the given parameters.
    async fn run_deployment(
        &self,
        deployment_id: &str,
        parameters: &Parameters,
    ) -> Result<SubmittedRun, ExecutorError>;

    /// Current state of a previously submitted run.
    async fn run_status(&self, run_id: &str) -> Result<StateType, ExecutorError>;

    /// Succeeds when the deployment has at least one run that reached
    /// `COMPLETED` between `start` and `end`.
    async fn check_completed_in_window(
        &self,
        deployment_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<(), ExecutorError>;

    /// Default parameters the deployment declares.
    async fn deployment_parameters(&self, deployment_id: &str)
        -> Result<Parameters, ExecutorError>;
}
