use async_trait::async_trait;
use sendpost_core::{Stage, StateType};
use tokio::task::JoinSet;
use tracing::debug;

use super::{settle_completed, settle_failure, RunContext, SequentialRunner, StageRunner};
use crate::error::{Result, RunError};

/// Fans a stage out over its children and joins them all.
///
/// Children that are themselves parallel recurse; every other child goes
/// through the sequential logic. No child is aborted when a sibling fails:
/// all are awaited and the first error to come back decides the parent.
pub struct ParallelRunner;

#[derive(Clone, Copy)]
enum Phase {
    Start,
    Check,
}

#[async_trait]
impl StageRunner for ParallelRunner {
    async fn start(&self, ctx: &RunContext, stage: &mut Stage) -> Result<()> {
        ctx.store
            .update_stage_state(stage, StateType::Running)
            .await?;
        match fan_out(ctx, stage, Phase::Start).await {
            Ok(()) => Ok(()),
            Err(err) => Err(settle_failure(ctx, stage, err).await),
        }
    }

    async fn check_state(&self, ctx: &RunContext, stage: &mut Stage) -> Result<()> {
        match fan_out(ctx, stage, Phase::Check).await {
            Ok(()) => settle_completed(ctx, stage).await,
            Err(err) => Err(settle_failure(ctx, stage, err).await),
        }
    }
}

async fn fan_out(ctx: &RunContext, parent: &Stage, phase: Phase) -> Result<()> {
    let parent_id = parent.id;
    let children = ctx.store.call(move |s| s.sub_stages(parent_id)).await?;
    debug!(stage_id = parent.id, children = children.len(), "fanning out");

    let mut tasks = JoinSet::new();
    for mut child in children {
        let ctx = ctx.clone();
        tasks.spawn(async move {
            let runner: &dyn StageRunner = if child.is_parallel() {
                &ParallelRunner
            } else {
                &SequentialRunner
            };
            match phase {
                Phase::Start => runner.start(&ctx, &mut child).await,
                Phase::Check => runner.check_state(&ctx, &mut child).await,
            }
        });
    }

    let mut first_error = None;
    while let Some(joined) = tasks.join_next().await {
        let outcome = joined.unwrap_or_else(|e| Err(RunError::Join(e.to_string())));
        if let Err(err) = outcome {
            first_error.get_or_insert(err);
        }
    }

    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
