use std::time::Duration;

use async_trait::async_trait;
use sendpost_core::{Stage, StateType};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

use super::{settle_completed, settle_failure, RunContext, StageRunner};
use crate::error::{Result, RunError};

/// `interval_at` rejects a zero period.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Submits the stage as one remote run and polls it to completion.
pub struct SequentialRunner;

#[async_trait]
impl StageRunner for SequentialRunner {
    async fn start(&self, ctx: &RunContext, stage: &mut Stage) -> Result<()> {
        debug!(stage_id = stage.id, deployment_id = %stage.deployment_id, "submitting stage");

        let submitted = match ctx
            .executor
            .run_deployment(&stage.deployment_id, &stage.parameters)
            .await
        {
            Ok(run) => run,
            Err(source) => {
                let err = RunError::SubmissionFailed {
                    stage_id: stage.id,
                    source,
                };
                return Err(settle_failure(ctx, stage, err).await);
            }
        };

        stage.run_id = Some(submitted.run_id);
        if let Err(e) = ctx.store.update_stage_state(stage, submitted.state).await {
            return Err(settle_failure(ctx, stage, e).await);
        }
        Ok(())
    }

    async fn check_state(&self, ctx: &RunContext, stage: &mut Stage) -> Result<()> {
        let Some(run_id) = stage.run_id.clone() else {
            return Err(settle_failure(ctx, stage, RunError::NoRunId(stage.id)).await);
        };

        let outcome = tokio::select! {
            _ = ctx.cancel.cancelled() => None,
            res = tokio::time::timeout(ctx.stage_timeout, poll_until_terminal(ctx, stage, &run_id)) => Some(res),
        };

        match outcome {
            None => Err(settle_failure(ctx, stage, RunError::Cancelled(stage.sendpost_id)).await),
            Some(Err(_elapsed)) => {
                let err = RunError::Timeout {
                    stage_id: stage.id,
                    timeout: ctx.stage_timeout,
                };
                Err(settle_failure(ctx, stage, err).await)
            }
            Some(Ok(Err(err))) => Err(settle_failure(ctx, stage, err).await),
            Some(Ok(Ok(()))) => settle_completed(ctx, stage).await,
        }
    }
}

/// Poll once per interval until the remote run is terminal. Intermediate
/// states are persisted as they change.
async fn poll_until_terminal(ctx: &RunContext, stage: &mut Stage, run_id: &str) -> Result<()> {
    let period = ctx.poll_interval.max(MIN_POLL_INTERVAL);
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let state = ctx
            .executor
            .run_status(run_id)
            .await
            .map_err(|source| RunError::StatusCheckFailed {
                stage_id: stage.id,
                source,
            })?;
        debug!(stage_id = stage.id, run_id, state = %state, "polled stage");

        if state.is_failure() {
            return Err(RunError::RemoteFailureState {
                stage_id: stage.id,
                state,
            });
        }
        if state == StateType::Completed {
            return Ok(());
        }
        if state != stage.state {
            ctx.store.update_stage_state(stage, state).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::test_support::Fixture;
    use sendpost_core::StageType;

    #[tokio::test]
    async fn start_binds_run_id() {
        let fx = Fixture::new();
        let mut stage = fx.top(StageType::Sequential, "mailer");

        SequentialRunner.start(&fx.ctx(), &mut stage).await.unwrap();

        let stored = fx.reload(&stage);
        assert_eq!(stored.state, StateType::Scheduled);
        assert!(stored.run_id.is_some());
        assert_eq!(fx.executor.submitted().len(), 1);
    }

    #[tokio::test]
    async fn submission_failure_marks_failed() {
        let fx = Fixture::new();
        fx.executor.fails_submit("broken");
        let mut stage = fx.top(StageType::Sequential, "broken");

        let err = SequentialRunner.start(&fx.ctx(), &mut stage).await.unwrap_err();

        assert!(matches!(err, RunError::SubmissionFailed { .. }));
        assert_eq!(fx.reload(&stage).state, StateType::Failed);
    }

    #[tokio::test]
    async fn check_state_follows_remote_states_to_completion() {
        let fx = Fixture::new();
        fx.executor.statuses(
            "mailer",
            vec![StateType::Pending, StateType::Running, StateType::Completed],
        );
        let mut stage = fx.top(StageType::Sequential, "mailer");
        let ctx = fx.ctx();

        SequentialRunner.start(&ctx, &mut stage).await.unwrap();
        SequentialRunner.check_state(&ctx, &mut stage).await.unwrap();

        let stored = fx.reload(&stage);
        assert_eq!(stored.state, StateType::Completed);
        assert_eq!(stored.run_id, None, "run id unbound once terminal");
    }

    #[tokio::test]
    async fn remote_failure_state_is_reported() {
        let fx = Fixture::new();
        fx.executor.statuses("mailer", vec![StateType::Running, StateType::Crashed]);
        let mut stage = fx.top(StageType::Sequential, "mailer");
        let ctx = fx.ctx();

        SequentialRunner.start(&ctx, &mut stage).await.unwrap();
        let err = SequentialRunner.check_state(&ctx, &mut stage).await.unwrap_err();

        assert!(matches!(
            err,
            RunError::RemoteFailureState {
                state: StateType::Crashed,
                ..
            }
        ));
        assert_eq!(fx.reload(&stage).state, StateType::Failed);
    }

    #[tokio::test]
    async fn never_terminal_run_times_out() {
        let fx = Fixture::new();
        fx.executor.statuses("stuck", vec![StateType::Running]);
        let mut stage = fx.top(StageType::Sequential, "stuck");
        let mut ctx = fx.ctx();
        ctx.stage_timeout = Duration::from_millis(100);

        SequentialRunner.start(&ctx, &mut stage).await.unwrap();
        let started = std::time::Instant::now();
        let err = SequentialRunner.check_state(&ctx, &mut stage).await.unwrap_err();

        assert!(matches!(err, RunError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(2));
        let stored = fx.reload(&stage);
        assert_eq!(stored.state, StateType::Failed);
        assert!(fx.executor.status_calls() > 1, "polled more than once before giving up");
    }

    #[tokio::test]
    async fn cancellation_interrupts_polling() {
        let fx = Fixture::new();
        fx.executor.statuses("stuck", vec![StateType::Running]);
        let mut stage = fx.top(StageType::Sequential, "stuck");
        let ctx = fx.ctx();

        SequentialRunner.start(&ctx, &mut stage).await.unwrap();
        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            cancel.cancel();
        });
        let err = SequentialRunner.check_state(&ctx, &mut stage).await.unwrap_err();

        assert!(matches!(err, RunError::Cancelled(_)));
        assert_eq!(fx.reload(&stage).state, StateType::Cancelled);
    }

    #[tokio::test]
    async fn zero_poll_interval_still_polls() {
        let fx = Fixture::new();
        fx.executor
            .statuses("mailer", vec![StateType::Running, StateType::Completed]);
        let mut stage = fx.top(StageType::Sequential, "mailer");
        let mut ctx = fx.ctx();
        ctx.poll_interval = Duration::ZERO;

        SequentialRunner.start(&ctx, &mut stage).await.unwrap();
        SequentialRunner.check_state(&ctx, &mut stage).await.unwrap();

        assert_eq!(fx.reload(&stage).state, StateType::Completed);
    }

    #[tokio::test]
    async fn check_without_run_id_fails() {
        let fx = Fixture::new();
        let mut stage = fx.top(StageType::Sequential, "never-started");

        let err = SequentialRunner
            .check_state(&fx.ctx(), &mut stage)
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::NoRunId(_)));
        assert_eq!(fx.reload(&stage).state, StateType::Failed);
    }
}
