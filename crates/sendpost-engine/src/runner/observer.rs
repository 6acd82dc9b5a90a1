use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use sendpost_core::{Stage, StateType};
use tracing::debug;

use super::{settle_completed, settle_failure, RunContext, StageRunner};
use crate::error::{Result, RunError};

/// Watches a deployment that runs on its own schedule outside this system.
///
/// Nothing is submitted. The stage completes when the deployment has a
/// completed run between local midnight and now.
pub struct ObserverRunner;

#[async_trait]
impl StageRunner for ObserverRunner {
    async fn start(&self, ctx: &RunContext, stage: &mut Stage) -> Result<()> {
        ctx.store.update_stage_state(stage, StateType::Running).await
    }

    async fn check_state(&self, ctx: &RunContext, stage: &mut Stage) -> Result<()> {
        let end = Utc::now();
        let start = start_of_today().unwrap_or(end);
        debug!(stage_id = stage.id, %start, %end, "checking completion window");

        match ctx
            .executor
            .check_completed_in_window(&stage.deployment_id, start, end)
            .await
        {
            Ok(()) => settle_completed(ctx, stage).await,
            Err(source) => {
                let err = RunError::WindowNotSatisfied {
                    stage_id: stage.id,
                    source,
                };
                Err(settle_failure(ctx, stage, err).await)
            }
        }
    }
}

/// Local midnight of the current day, in UTC.
fn start_of_today() -> Option<DateTime<Utc>> {
    Local::now()
        .date_naive()
        .and_hms_opt(0, 0, 0)?
        .and_local_timezone(Local)
        .earliest()
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::test_support::Fixture;
    use sendpost_core::StageType;

    #[tokio::test]
    async fn start_does_not_contact_executor() {
        let fx = Fixture::new();
        let mut stage = fx.top(StageType::Observer, "external");

        ObserverRunner.start(&fx.ctx(), &mut stage).await.unwrap();

        assert_eq!(fx.reload(&stage).state, StateType::Running);
        assert!(fx.executor.submitted().is_empty());
    }

    #[tokio::test]
    async fn completed_in_window_completes_stage() {
        let fx = Fixture::new();
        let mut stage = fx.top(StageType::Observer, "external");
        let ctx = fx.ctx();

        ObserverRunner.start(&ctx, &mut stage).await.unwrap();
        ObserverRunner.check_state(&ctx, &mut stage).await.unwrap();

        assert_eq!(fx.reload(&stage).state, StateType::Completed);
        let (deployment, start, end) = fx.executor.window_checks().pop().unwrap();
        assert_eq!(deployment, "external");
        assert!(start <= end);
        assert!(end - start <= chrono::Duration::hours(25));
    }

    #[tokio::test]
    async fn missing_completion_fails_stage() {
        let fx = Fixture::new();
        fx.executor.window("external", false);
        let mut stage = fx.top(StageType::Observer, "external");
        let ctx = fx.ctx();

        ObserverRunner.start(&ctx, &mut stage).await.unwrap();
        let err = ObserverRunner.check_state(&ctx, &mut stage).await.unwrap_err();

        assert!(matches!(err, RunError::WindowNotSatisfied { .. }));
        assert_eq!(fx.reload(&stage).state, StateType::Failed);
    }

    #[test]
    fn window_starts_at_local_midnight() {
        let start = start_of_today().unwrap().with_timezone(&Local);
        assert_eq!(start.date_naive(), Local::now().date_naive());
        assert_eq!(start.time(), chrono::NaiveTime::MIN);
    }
}
