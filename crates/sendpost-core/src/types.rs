use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// StateType
// ---------------------------------------------------------------------------

/// Lifecycle state shared by sendposts and stages.
///
/// The uppercase label (`RUNNING`, `COMPLETED`, …) is both the persisted form
/// and the text frame broadcast to observers. `Updated` is a broadcast-only
/// signal and is never stored on an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StateType {
    #[default]
    NeverRunning,
    Scheduled,
    Pending,
    Running,
    Updated,
    Completed,
    Failed,
    Cancelled,
    Cancelling,
    Crashed,
    Paused,
}

impl StateType {
    pub fn all() -> &'static [StateType] {
        &[
            StateType::NeverRunning,
            StateType::Scheduled,
            StateType::Pending,
            StateType::Running,
            StateType::Updated,
            StateType::Completed,
            StateType::Failed,
            StateType::Cancelled,
            StateType::Cancelling,
            StateType::Crashed,
            StateType::Paused,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StateType::NeverRunning => "NEVERRUNNING",
            StateType::Scheduled => "SCHEDULED",
            StateType::Pending => "PENDING",
            StateType::Running => "RUNNING",
            StateType::Updated => "UPDATED",
            StateType::Completed => "COMPLETED",
            StateType::Failed => "FAILED",
            StateType::Cancelled => "CANCELLED",
            StateType::Cancelling => "CANCELLING",
            StateType::Crashed => "CRASHED",
            StateType::Paused => "PAUSED",
        }
    }

    /// Member of the terminal-failure set: cancelled, cancelling, failed, crashed.
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            StateType::Cancelled | StateType::Cancelling | StateType::Failed | StateType::Crashed
        )
    }

    /// A state after which a stage run will not change again.
    pub fn is_terminal(self) -> bool {
        self == StateType::Completed || self.is_failure()
    }
}

impl fmt::Display for StateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StateType {
    type Err = crate::error::SendpostError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StateType::all()
            .iter()
            .copied()
            .find(|st| st.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| crate::error::SendpostError::UnknownState(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// StageType
// ---------------------------------------------------------------------------

/// Execution strategy of a stage. Fixed when the stage is created.
///
/// Unrecognised labels deserialize as `Sequential`, the default strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "&'static str")]
pub enum StageType {
    #[default]
    Sequential,
    Parallel,
    Observer,
}

impl StageType {
    pub fn as_str(self) -> &'static str {
        match self {
            StageType::Sequential => "SEQUENTIAL",
            StageType::Parallel => "PARALLEL",
            StageType::Observer => "OBSERVER",
        }
    }

    /// Lenient parse: anything that isn't parallel or observer is sequential.
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("parallel") {
            StageType::Parallel
        } else if s.eq_ignore_ascii_case("observer") {
            StageType::Observer
        } else {
            StageType::Sequential
        }
    }
}

impl From<String> for StageType {
    fn from(s: String) -> Self {
        StageType::parse(&s)
    }
}

impl From<StageType> for &'static str {
    fn from(t: StageType) -> Self {
        t.as_str()
    }
}

impl fmt::Display for StageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
