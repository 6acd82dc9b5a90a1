//! Execution strategies for a single stage.
//!
//! Every runner follows the same two-phase contract: `start` dispatches the
//! stage's work, `check_state` waits until the stage is terminal. Both phases
//! persist the stage's state as it moves and, on failure, leave the stage in
//! `FAILED` (or `CANCELLED`) and return a [`RunError`] instead of panicking.

mod factory;
mod observer;
mod parallel;
mod sequential;

pub use self::factory::runner_for;
pub use self::observer::ObserverRunner;
pub use self::parallel::ParallelRunner;
pub use self::sequential::SequentialRunner;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sendpost_core::{Stage, StageExecutor, StateType};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{Result, RunError};
use crate::store::AsyncStore;

/// Everything a runner needs besides the stage itself. Cheap to clone into
/// child tasks.
#[derive(Clone)]
pub struct RunContext {
    pub store: AsyncStore,
    pub executor: Arc<dyn StageExecutor>,
    pub poll_interval: Duration,
    pub stage_timeout: Duration,
    /// Cancelled when the owning sendpost run is cancelled.
    pub cancel: CancellationToken,
}

#[async_trait]
pub trait StageRunner: Send + Sync {
    async fn start(&self, ctx: &RunContext, stage: &mut Stage) -> Result<()>;
    async fn check_state(&self, ctx: &RunContext, stage: &mut Stage) -> Result<()>;
}

/// Record a stage's terminal failure and hand back the error that caused it.
///
/// If persisting the failed state itself fails, that store error wins.
pub(crate) async fn settle_failure(ctx: &RunContext, stage: &mut Stage, err: RunError) -> RunError {
    let state = err.settled_state();
    warn!(
        sendpost_id = stage.sendpost_id,
        stage_id = stage.id,
        state = %state,
        error = %err,
        "stage failed"
    );
    stage.run_id = None;
    match ctx.store.update_stage_state(stage, state).await {
        Ok(()) => err,
        Err(e) => e,
    }
}

/// Persist a successful terminal state.
pub(crate) async fn settle_completed(ctx: &RunContext, stage: &mut Stage) -> Result<()> {
    stage.run_id = None;
    ctx.store
        .update_stage_state(stage, StateType::Completed)
        .await?;
    tracing::info!(
        sendpost_id = stage.sendpost_id,
        stage_id = stage.id,
        "stage completed"
    );
    Ok(())
}
