use sendpost_core::StageType;

use super::{ObserverRunner, ParallelRunner, SequentialRunner, StageRunner};

/// Runner for a stage type. Runners are stateless, so the same instance
/// serves every call.
pub fn runner_for(stage_type: StageType) -> &'static dyn StageRunner {
    match stage_type {
        StageType::Sequential => &SequentialRunner,
        StageType::Parallel => &ParallelRunner,
        StageType::Observer => &ObserverRunner,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::test_support::Fixture;
    use sendpost_core::StateType;

    #[tokio::test]
    async fn observer_type_maps_to_observer_runner() {
        let fx = Fixture::new();
        let mut stage = fx.top(StageType::Observer, "watched");
        runner_for(stage.stage_type)
            .start(&fx.ctx(), &mut stage)
            .await
            .unwrap();
        // Only the observer starts without a submission.
        assert!(fx.executor.submitted().is_empty());
        assert_eq!(fx.reload(&stage).state, StateType::Running);
    }

    #[tokio::test]
    async fn unknown_type_label_runs_sequentially() {
        let fx = Fixture::new();
        let mut stage = fx.top(StageType::parse("SOMETHING_ELSE"), "job");
        runner_for(stage.stage_type)
            .start(&fx.ctx(), &mut stage)
            .await
            .unwrap();
        assert_eq!(fx.executor.submitted().len(), 1);
    }
}
