//! Request and response bodies of the Prefect 2 REST API, reduced to the
//! fields the executor reads or sends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sendpost_core::{Parameters, StateType};

/// Interval width of a history query, in seconds.
pub const HISTORY_INTERVAL_SECONDS: u64 = 3600;

#[derive(Debug, Serialize)]
pub struct CreateFlowRun<'a> {
    pub parameters: &'a Parameters,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlowRun {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub deployment_id: Option<String>,
    pub state_type: StateType,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Deployment {
    #[serde(default)]
    pub parameters: Parameters,
}

// ---------------------------------------------------------------------------
// flow_runs/history
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HistoryQuery {
    pub history_start: DateTime<Utc>,
    pub history_end: DateTime<Utc>,
    pub history_interval_seconds: u64,
    pub flow_runs: FlowRunFilter,
    pub sort: &'static str,
    pub limit: u32,
}

impl HistoryQuery {
    /// Latest completed run of one deployment that started inside the window.
    pub fn completed_runs(deployment_id: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            history_start: start,
            history_end: end,
            history_interval_seconds: HISTORY_INTERVAL_SECONDS,
            flow_runs: FlowRunFilter {
                deployment_id: AnyOf {
                    any_: vec![deployment_id.to_string()],
                },
                state: StateFilter {
                    type_: AnyOf {
                        any_: vec![StateType::Completed.as_str().to_string()],
                    },
                },
                start_time: TimeWindow {
                    after_: start,
                    before_: end,
                },
            },
            sort: "START_TIME_DESC",
            limit: 1,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FlowRunFilter {
    pub deployment_id: AnyOf,
    pub state: StateFilter,
    pub start_time: TimeWindow,
}

#[derive(Debug, Serialize)]
pub struct AnyOf {
    pub any_: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct StateFilter {
    #[serde(rename = "type")]
    pub type_: AnyOf,
}

#[derive(Debug, Serialize)]
pub struct TimeWindow {
    pub after_: DateTime<Utc>,
    pub before_: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryInterval {
    pub interval_start: DateTime<Utc>,
    pub interval_end: DateTime<Utc>,
    #[serde(default)]
    pub states: Vec<HistoryState>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryState {
    pub state_type: String,
    #[serde(default)]
    pub state_name: String,
    #[serde(default)]
    pub count_runs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn history_query_wire_shape() {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let v = serde_json::to_value(HistoryQuery::completed_runs("dep", start, end)).unwrap();

        assert_eq!(v["history_interval_seconds"], 3600);
        assert_eq!(v["flow_runs"]["deployment_id"]["any_"][0], "dep");
        assert_eq!(v["flow_runs"]["state"]["type"]["any_"][0], "COMPLETED");
        assert_eq!(v["flow_runs"]["start_time"]["after_"], "2024-05-01T00:00:00Z");
        assert_eq!(v["sort"], "START_TIME_DESC");
        assert_eq!(v["limit"], 1);
    }

    #[test]
    fn flow_run_tolerates_extra_fields() {
        let run: FlowRun = serde_json::from_str(
            r#"{"id":"r1","name":"n","deployment_id":"d","state_type":"RUNNING","tags":[]}"#,
        )
        .unwrap();
        assert_eq!(run.state_type, StateType::Running);
        assert_eq!(run.deployment_id.as_deref(), Some("d"));
    }
}
