use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::StatusCode;
use tracing::debug;

use sendpost_core::config::ExecutorConfig;
use sendpost_core::{ExecutorError, Parameters, StageExecutor, StateType, SubmittedRun};

use crate::error::{PrefectError, Result};
use crate::types::{CreateFlowRun, Deployment, FlowRun, HistoryInterval, HistoryQuery};

/// Client for the subset of the Prefect 2 API that stage execution needs.
#[derive(Debug, Clone)]
pub struct PrefectClient {
    base_url: String,
    http: reqwest::Client,
}

impl PrefectClient {
    pub fn new(config: &ExecutorConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .danger_accept_invalid_certs(config.insecure_tls)
            .build()?;

        Ok(Self {
            base_url: config.api_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// `POST deployments/{id}/create_flow_run`.
    pub async fn create_flow_run(
        &self,
        deployment_id: &str,
        parameters: &Parameters,
    ) -> Result<FlowRun> {
        let resp = self
            .http
            .post(self.url(&format!("deployments/{deployment_id}/create_flow_run")))
            .json(&CreateFlowRun { parameters })
            .send()
            .await?;
        expect_status(resp.status(), StatusCode::CREATED, "create flow run")?;
        let run: FlowRun = resp.json().await?;
        debug!(deployment_id, run_id = %run.id, state = %run.state_type, "flow run created");
        Ok(run)
    }

    /// `GET flow_runs/{id}`.
    pub async fn flow_run(&self, run_id: &str) -> Result<FlowRun> {
        let resp = self
            .http
            .get(self.url(&format!("flow_runs/{run_id}")))
            .send()
            .await?;
        expect_status(resp.status(), StatusCode::OK, "read flow run")?;
        Ok(resp.json().await?)
    }

    /// `POST flow_runs/history`.
    pub async fn flow_run_history(&self, query: &HistoryQuery) -> Result<Vec<HistoryInterval>> {
        let resp = self
            .http
            .post(self.url("flow_runs/history"))
            .json(query)
            .send()
            .await?;
        expect_status(resp.status(), StatusCode::OK, "read flow run history")?;
        Ok(resp.json().await?)
    }

    /// `GET deployments/{id}`.
    pub async fn deployment(&self, deployment_id: &str) -> Result<Deployment> {
        let resp = self
            .http
            .get(self.url(&format!("deployments/{deployment_id}")))
            .send()
            .await?;
        expect_status(resp.status(), StatusCode::OK, "read deployment")?;
        Ok(resp.json().await?)
    }

    async fn submit(&self, deployment_id: &str, parameters: &Parameters) -> Result<SubmittedRun> {
        let run = self.create_flow_run(deployment_id, parameters).await?;
        let echoed = run.deployment_id.unwrap_or_default();
        if echoed != deployment_id {
            return Err(PrefectError::DeploymentMismatch {
                expected: deployment_id.to_string(),
                got: echoed,
            });
        }
        if run.state_type != StateType::Scheduled {
            return Err(PrefectError::NotScheduled(run.state_type));
        }
        Ok(SubmittedRun {
            run_id: run.id,
            state: run.state_type,
        })
    }

    async fn completed_in_window(
        &self,
        deployment_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<()> {
        let query = HistoryQuery::completed_runs(deployment_id, start, end);
        let intervals = self.flow_run_history(&query).await?;
        if intervals.iter().any(|i| !i.states.is_empty()) {
            Ok(())
        } else {
            Err(PrefectError::NoCompletedRun(deployment_id.to_string()))
        }
    }
}

fn expect_status(got: StatusCode, want: StatusCode, context: &'static str) -> Result<()> {
    if got == want {
        Ok(())
    } else {
        Err(PrefectError::UnexpectedStatus {
            status: got,
            context,
        })
    }
}

#[async_trait]
impl StageExecutor for PrefectClient {
    async fn run_deployment(
        &self,
        deployment_id: &str,
        parameters: &Parameters,
    ) -> std::result::Result<SubmittedRun, ExecutorError> {
        Ok(self.submit(deployment_id, parameters).await?)
    }

    async fn run_status(&self, run_id: &str) -> std::result::Result<StateType, ExecutorError> {
        Ok(self.flow_run(run_id).await?.state_type)
    }

    async fn check_completed_in_window(
        &self,
        deployment_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> std::result::Result<(), ExecutorError> {
        Ok(self.completed_in_window(deployment_id, start, end).await?)
    }

    async fn deployment_parameters(
        &self,
        deployment_id: &str,
    ) -> std::result::Result<Parameters, ExecutorError> {
        Ok(self.deployment(deployment_id).await?.parameters)
    }
}
