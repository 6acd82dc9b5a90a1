//! Store access from async code.
//!
//! [`Store`] implementations are synchronous and a redb commit syncs to disk,
//! so the engine never calls them on a runtime worker thread. Every call goes
//! through [`AsyncStore::call`], which runs it on the blocking pool.

use std::sync::Arc;

use sendpost_core::{Stage, StateType, Store};

use crate::error::{Result, RunError};

#[derive(Clone)]
pub struct AsyncStore {
    inner: Arc<dyn Store>,
}

impl AsyncStore {
    pub fn new(inner: Arc<dyn Store>) -> Self {
        Self { inner }
    }

    /// The wrapped store, for callers outside the runtime.
    pub fn inner(&self) -> &Arc<dyn Store> {
        &self.inner
    }

    /// Run `f` against the store on the blocking pool.
    pub async fn call<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&dyn Store) -> sendpost_core::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || f(&*store))
            .await
            .map_err(|e| RunError::Join(format!("store task: {e}")))?
            .map_err(RunError::from)
    }

    /// Set a stage's state and persist it. `stage` is only updated once the
    /// write succeeded.
    pub async fn update_stage_state(&self, stage: &mut Stage, state: StateType) -> Result<()> {
        let mut updated = stage.clone();
        *stage = self
            .call(move |store| {
                store.update_stage_state(&mut updated, state)?;
                Ok(updated)
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sendpost_core::{MemoryStore, Parameters, Sendpost, StageType};

    #[tokio::test]
    async fn calls_reach_the_wrapped_store() {
        let store = AsyncStore::new(Arc::new(MemoryStore::new()));
        let sp = store
            .call(|s| {
                let mut sp = Sendpost::new("async");
                s.save_sendpost(&mut sp)?;
                Ok(sp)
            })
            .await
            .unwrap();

        assert_eq!(store.inner().get_sendpost(sp.id).unwrap().name, "async");
    }

    #[tokio::test]
    async fn store_errors_surface_as_run_errors() {
        let store = AsyncStore::new(Arc::new(MemoryStore::new()));
        let err = store.call(|s| s.get_stage(7)).await.unwrap_err();
        assert!(matches!(err, RunError::Store(e) if e.is_not_found()));
    }

    #[tokio::test]
    async fn update_stage_state_persists_and_updates_the_copy() {
        let store = AsyncStore::new(Arc::new(MemoryStore::new()));
        let mut stage = Stage::new(1, StageType::Sequential, "dep", Parameters::new());
        store.inner().save_stage(&mut stage).unwrap();

        store
            .update_stage_state(&mut stage, StateType::Running)
            .await
            .unwrap();

        assert_eq!(stage.state, StateType::Running);
        assert_eq!(store.inner().get_stage(stage.id).unwrap().state, StateType::Running);
    }
}
