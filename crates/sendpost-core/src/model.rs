//! Entities of the sendpost domain.
//!
//! Stages form two shapes at once: the top-level chain of a sendpost is a
//! singly-linked list through `next_stage_id`, and a parallel stage owns a
//! flat set of children that point back at it through `parent_stage_id`.
//! Both links are plain ids resolved through a [`Store`](crate::store::Store);
//! nothing holds another entity in memory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SendpostError};
use crate::types::{StageType, StateType};

pub type SendpostId = u64;
pub type StageId = u64;
pub type ScheduleId = u64;

/// Free-form key/value bag used for stage and global parameters.
pub type Parameters = serde_json::Map<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// Sendpost
// ---------------------------------------------------------------------------

/// A campaign workflow: a named chain of stages plus global parameters.
///
/// An `id` of 0 marks a record that has not been saved yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sendpost {
    pub id: SendpostId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub state: StateType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_stage_id: Option<StageId>,
    #[serde(default)]
    pub global_parameters: Parameters,
}

impl Sendpost {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: 0,
            name: name.into(),
            description: None,
            state: StateType::NeverRunning,
            first_stage_id: None,
            global_parameters: Parameters::new(),
        }
    }

    /// Fresh, never-run duplicate carrying over the global parameters.
    pub fn duplicate(&self, name: impl Into<String>, description: Option<String>) -> Self {
        Self {
            description,
            global_parameters: self.global_parameters.clone(),
            ..Sendpost::new(name)
        }
    }
}

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub id: StageId,
    pub sendpost_id: SendpostId,
    #[serde(rename = "type", default)]
    pub stage_type: StageType,
    #[serde(default)]
    pub state: StateType,
    pub deployment_id: String,
    /// External run identifier, bound while the stage runs remotely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default)]
    pub parameters: Parameters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_stage_id: Option<StageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_stage_id: Option<StageId>,
    #[serde(default)]
    pub blocked: bool,
}

impl Stage {
    pub fn new(
        sendpost_id: SendpostId,
        stage_type: StageType,
        deployment_id: impl Into<String>,
        parameters: Parameters,
    ) -> Self {
        Self {
            id: 0,
            sendpost_id,
            stage_type,
            state: StateType::NeverRunning,
            deployment_id: deployment_id.into(),
            run_id: None,
            parameters,
            next_stage_id: None,
            parent_stage_id: None,
            blocked: false,
        }
    }

    pub fn is_parallel(&self) -> bool {
        self.stage_type == StageType::Parallel
    }

    /// Point this stage at its successor in the top-level chain.
    ///
    /// Children of a parallel stage are never chain links.
    pub fn set_next_stage(&mut self, next: Option<StageId>) -> Result<()> {
        if next.is_some() && self.parent_stage_id.is_some() {
            return Err(SendpostError::LinkConflict(self.id));
        }
        self.next_stage_id = next;
        Ok(())
    }

    /// Attach this stage under a parallel parent.
    pub fn set_parent_stage(&mut self, parent: StageId) -> Result<()> {
        if self.next_stage_id.is_some() {
            return Err(SendpostError::LinkConflict(self.id));
        }
        self.parent_stage_id = Some(parent);
        Ok(())
    }

    /// Unlinked, never-run copy for another sendpost.
    pub fn duplicate(&self, sendpost_id: SendpostId) -> Self {
        Self {
            blocked: self.blocked,
            ..Stage::new(
                sendpost_id,
                self.stage_type,
                self.deployment_id.clone(),
                self.parameters.clone(),
            )
        }
    }
}

/// Override stage parameters with global ones, key by key.
///
/// Only keys the stage already declares are touched; globals never introduce
/// new keys into a stage's bag.
pub fn merge_global_parameters(stage: &mut Parameters, global: &Parameters) {
    for (key, value) in global {
        if let Some(slot) = stage.get_mut(key) {
            *slot = value.clone();
        }
    }
}

// ---------------------------------------------------------------------------
// Schedule
// ---------------------------------------------------------------------------

/// A planned future run of a sendpost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: ScheduleId,
    pub sendpost_id: SendpostId,
    pub planned_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Schedule {
    pub fn new(sendpost_id: SendpostId, planned_at: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            sendpost_id,
            planned_at,
            started_at: None,
            completed_at: None,
        }
    }

    /// Not yet picked up by a worker.
    pub fn is_pending(&self) -> bool {
        self.started_at.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(v: serde_json::Value) -> Parameters {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn merge_overrides_only_shared_keys() {
        let mut stage = params(json!({"segment": "all", "limit": 10}));
        let global = params(json!({"segment": "vip", "campaign": "spring"}));

        merge_global_parameters(&mut stage, &global);

        assert_eq!(stage, params(json!({"segment": "vip", "limit": 10})));
        assert!(!stage.contains_key("campaign"));
    }

    #[test]
    fn merge_with_empty_globals_is_identity() {
        let mut stage = params(json!({"a": 1}));
        merge_global_parameters(&mut stage, &Parameters::new());
        assert_eq!(stage, params(json!({"a": 1})));
    }

    #[test]
    fn child_stage_rejects_next_link() {
        let mut stage = Stage::new(1, StageType::Sequential, "dep", Parameters::new());
        stage.id = 7;
        stage.set_parent_stage(3).unwrap();
        let err = stage.set_next_stage(Some(9)).unwrap_err();
        assert!(matches!(err, SendpostError::LinkConflict(7)));
        // Clearing is always allowed.
        stage.set_next_stage(None).unwrap();
    }

    #[test]
    fn chained_stage_rejects_parent() {
        let mut stage = Stage::new(1, StageType::Sequential, "dep", Parameters::new());
        stage.set_next_stage(Some(2)).unwrap();
        assert!(stage.set_parent_stage(5).is_err());
    }

    #[test]
    fn duplicate_stage_is_unlinked_and_fresh() {
        let mut stage = Stage::new(1, StageType::Parallel, "dep", params(json!({"k": "v"})));
        stage.id = 4;
        stage.state = StateType::Failed;
        stage.run_id = Some("r".into());
        stage.next_stage_id = Some(5);
        stage.blocked = true;

        let copy = stage.duplicate(2);
        assert_eq!(copy.id, 0);
        assert_eq!(copy.sendpost_id, 2);
        assert_eq!(copy.state, StateType::NeverRunning);
        assert_eq!(copy.run_id, None);
        assert_eq!(copy.next_stage_id, None);
        assert!(copy.blocked);
        assert_eq!(copy.parameters, stage.parameters);
    }

    #[test]
    fn stage_serializes_type_field() {
        let stage = Stage::new(1, StageType::Observer, "dep", Parameters::new());
        let v = serde_json::to_value(&stage).unwrap();
        assert_eq!(v["type"], "OBSERVER");
        assert_eq!(v["state"], "NEVERRUNNING");
    }
}
