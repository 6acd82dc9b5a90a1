//! Scripted [`StageExecutor`] for engine tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sendpost_core::{ExecutorError, Parameters, StageExecutor, StateType, SubmittedRun};

#[derive(Clone)]
struct Script {
    fail_submit: bool,
    submit_delay: Duration,
    statuses: Vec<StateType>,
    window_ok: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            fail_submit: false,
            submit_delay: Duration::ZERO,
            statuses: vec![StateType::Completed],
            window_ok: true,
        }
    }
}

/// Every deployment completes on the first poll unless scripted otherwise.
/// The last scripted status repeats forever.
#[derive(Default)]
pub struct FakeExecutor {
    scripts: Mutex<HashMap<String, Script>>,
    runs: Mutex<HashMap<String, VecDeque<StateType>>>,
    submitted: Mutex<Vec<(String, Parameters)>>,
    window_checks: Mutex<Vec<(String, DateTime<Utc>, DateTime<Utc>)>>,
    next_run: AtomicU64,
    status_calls: AtomicUsize,
}

impl FakeExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn script(&self, deployment: &str, edit: impl FnOnce(&mut Script)) {
        let mut scripts = self.scripts.lock().unwrap();
        edit(scripts.entry(deployment.to_string()).or_default());
    }

    pub fn fails_submit(&self, deployment: &str) {
        self.script(deployment, |s| s.fail_submit = true);
    }

    pub fn submit_delay(&self, deployment: &str, delay: Duration) {
        self.script(deployment, |s| s.submit_delay = delay);
    }

    pub fn statuses(&self, deployment: &str, statuses: Vec<StateType>) {
        self.script(deployment, |s| s.statuses = statuses);
    }

    pub fn window(&self, deployment: &str, ok: bool) {
        self.script(deployment, |s| s.window_ok = ok);
    }

    /// Successful submissions, in completion order.
    pub fn submitted(&self) -> Vec<(String, Parameters)> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn window_checks(&self) -> Vec<(String, DateTime<Utc>, DateTime<Utc>)> {
        self.window_checks.lock().unwrap().clone()
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    fn lookup(&self, deployment: &str) -> Script {
        self.scripts
            .lock()
            .unwrap()
            .get(deployment)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl StageExecutor for FakeExecutor {
    async fn run_deployment(
        &self,
        deployment_id: &str,
        parameters: &Parameters,
    ) -> Result<SubmittedRun, ExecutorError> {
        let script = self.lookup(deployment_id);
        if !script.submit_delay.is_zero() {
            tokio::time::sleep(script.submit_delay).await;
        }
        if script.fail_submit {
            return Err(ExecutorError::Request(format!("{deployment_id} refused")));
        }

        let run_id = format!("run-{}", self.next_run.fetch_add(1, Ordering::SeqCst));
        self.runs
            .lock()
            .unwrap()
            .insert(run_id.clone(), script.statuses.into_iter().collect());
        self.submitted
            .lock()
            .unwrap()
            .push((deployment_id.to_string(), parameters.clone()));
        Ok(SubmittedRun {
            run_id,
            state: StateType::Scheduled,
        })
    }

    async fn run_status(&self, run_id: &str) -> Result<StateType, ExecutorError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let mut runs = self.runs.lock().unwrap();
        let queue = runs
            .get_mut(run_id)
            .ok_or_else(|| ExecutorError::Request(format!("unknown run {run_id}")))?;
        let state = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().copied()
        };
        state.ok_or_else(|| ExecutorError::Decode("empty script".into()))
    }

    async fn check_completed_in_window(
        &self,
        deployment_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<(), ExecutorError> {
        self.window_checks
            .lock()
            .unwrap()
            .push((deployment_id.to_string(), start, end));
        if self.lookup(deployment_id).window_ok {
            Ok(())
        } else {
            Err(ExecutorError::NotCompletedInWindow(deployment_id.to_string()))
        }
    }

    async fn deployment_parameters(&self, _deployment_id: &str) -> Result<Parameters, ExecutorError> {
        Ok(Parameters::new())
    }
}
