//! Drives whole sendpost runs: one background task per active sendpost
//! walking its top-level chain stage by stage.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use sendpost_core::{
    graph, merge_global_parameters, sendpost, Parameters, SendpostId, Stage, StageExecutor,
    StateType, Store,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Result, RunError};
use crate::notify::NotificationHub;
use crate::runner::{runner_for, RunContext};
use crate::store::AsyncStore;

pub struct RunCoordinator {
    store: AsyncStore,
    executor: Arc<dyn StageExecutor>,
    hub: Arc<NotificationHub>,
    poll_interval: Duration,
    stage_timeout: Duration,
    active: Mutex<HashMap<SendpostId, CancellationToken>>,
}

/// Handle on a run started in the background.
#[derive(Debug)]
pub struct RunTicket {
    pub sendpost_id: SendpostId,
    handle: JoinHandle<StateType>,
}

impl RunTicket {
    /// Wait for the run to settle and return the sendpost's final state.
    pub async fn wait(self) -> StateType {
        match self.handle.await {
            Ok(state) => state,
            Err(e) => {
                error!(sendpost_id = self.sendpost_id, error = %e, "run supervisor died");
                StateType::Failed
            }
        }
    }
}

impl RunCoordinator {
    pub fn new(
        store: Arc<dyn Store>,
        executor: Arc<dyn StageExecutor>,
        hub: Arc<NotificationHub>,
        poll_interval: Duration,
        stage_timeout: Duration,
    ) -> Self {
        Self {
            store: AsyncStore::new(store),
            executor,
            hub,
            poll_interval,
            stage_timeout,
            active: Mutex::new(HashMap::new()),
        }
    }

    fn active(&self) -> MutexGuard<'_, HashMap<SendpostId, CancellationToken>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_running(&self, sendpost_id: SendpostId) -> bool {
        self.active().contains_key(&sendpost_id)
    }

    /// Start a run of the sendpost in the background.
    ///
    /// The notification pool is registered before this returns, so an
    /// observer subscribing right after sees every label of the run.
    pub async fn start(self: &Arc<Self>, sendpost_id: SendpostId) -> Result<RunTicket> {
        self.store
            .call(move |s| s.get_sendpost(sendpost_id))
            .await?;

        let cancel = CancellationToken::new();
        {
            let mut active = self.active();
            if active.contains_key(&sendpost_id) {
                return Err(RunError::AlreadyRunning(sendpost_id));
            }
            active.insert(sendpost_id, cancel.clone());
        }
        self.hub.register_run(sendpost_id);
        info!(sendpost_id, "sendpost run started");

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let inner = Arc::clone(&this);
            let token = cancel.clone();
            let outcome = tokio::spawn(async move { inner.run(sendpost_id, token).await })
                .await
                .unwrap_or_else(|e| Err(RunError::Join(e.to_string())));
            this.finish(sendpost_id, outcome).await
        });

        Ok(RunTicket {
            sendpost_id,
            handle,
        })
    }

    /// Ask an active run to stop. Returns false when nothing was running.
    pub fn cancel(&self, sendpost_id: SendpostId) -> bool {
        match self.active().get(&sendpost_id) {
            Some(token) => {
                token.cancel();
                info!(sendpost_id, "sendpost run cancellation requested");
                true
            }
            None => false,
        }
    }

    async fn run(&self, sendpost_id: SendpostId, cancel: CancellationToken) -> Result<()> {
        let first = self
            .store
            .call(move |s| s.first_stage(sendpost_id))
            .await?
            .ok_or(RunError::NoFirstStage(sendpost_id))?;
        self.store
            .call(move |s| sendpost::set_state(s, sendpost_id, StateType::Running))
            .await?;

        let ctx = RunContext {
            store: self.store.clone(),
            executor: Arc::clone(&self.executor),
            poll_interval: self.poll_interval,
            stage_timeout: self.stage_timeout,
            cancel: cancel.clone(),
        };

        let mut next = Some(first.id);
        while let Some(stage_id) = next {
            if cancel.is_cancelled() {
                return Err(RunError::Cancelled(sendpost_id));
            }
            let mut stage = self
                .store
                .call(move |s| {
                    let mut stage = s.get_stage(stage_id)?;
                    let globals = s.global_parameters(sendpost_id)?;
                    apply_globals(s, &mut stage, &globals)?;
                    Ok(stage)
                })
                .await?;
            next = stage.next_stage_id;

            debug!(sendpost_id, stage_id, stage_type = %stage.stage_type, "running stage");
            let runner = runner_for(stage.stage_type);
            runner.start(&ctx, &mut stage).await?;
            self.notify(sendpost_id, StateType::Updated).await;
            runner.check_state(&ctx, &mut stage).await?;
            self.notify(sendpost_id, StateType::Updated).await;
        }
        Ok(())
    }

    async fn finish(&self, sendpost_id: SendpostId, outcome: Result<()>) -> StateType {
        let state = match &outcome {
            Ok(()) => StateType::Completed,
            Err(e) => e.settled_state(),
        };
        match outcome {
            Ok(()) => info!(sendpost_id, "sendpost run completed"),
            Err(e) => warn!(sendpost_id, error = %e, state = %state, "sendpost run ended early"),
        }

        if let Err(e) = self
            .store
            .call(move |s| sendpost::set_state(s, sendpost_id, state))
            .await
        {
            error!(sendpost_id, error = %e, "could not persist final sendpost state");
        }
        self.notify(sendpost_id, state).await;
        self.hub.deregister_run(sendpost_id).await;
        self.active().remove(&sendpost_id);
        state
    }

    async fn notify(&self, sendpost_id: SendpostId, state: StateType) {
        if let Err(e) = self.hub.publish(sendpost_id, state).await {
            debug!(sendpost_id, error = %e, "no observers notified");
        }
    }
}

/// Merge globals into a stage and, for a parallel stage, into every
/// descendant, persisting each.
fn apply_globals(
    store: &dyn Store,
    stage: &mut Stage,
    globals: &Parameters,
) -> sendpost_core::Result<()> {
    merge_global_parameters(&mut stage.parameters, globals);
    store.save_stage(stage)?;
    if stage.is_parallel() {
        for mut child in graph::children(store, stage.id)? {
            apply_globals(store, &mut child, globals)?;
        }
    }
    Ok(())
}
