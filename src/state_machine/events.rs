use crate::constants::transitions;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle transitions a job can undergo. Notification actions are bound
/// to one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobTransition {
    /// A node takes hold of a created job
    Acquire,
    /// The holding node lets go of an acquired job
    Release,
    /// Execution begins
    Start,
    /// Execution completed successfully
    Finish,
    /// Execution failed
    Error,
    /// An errored job is made runnable again
    Reset,
    /// The job is returned to its initial phase
    Abort,
}

impl JobTransition {
    pub const ALL: [JobTransition; 7] = [
        Self::Acquire,
        Self::Release,
        Self::Start,
        Self::Finish,
        Self::Error,
        Self::Reset,
        Self::Abort,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Acquire => transitions::ACQUIRE,
            Self::Release => transitions::RELEASE,
            Self::Start => transitions::START,
            Self::Finish => transitions::FINISH,
            Self::Error => transitions::ERROR,
            Self::Reset => transitions::RESET,
            Self::Abort => transitions::ABORT,
        }
    }

    /// Transitions only meaningful for jobs held by a node
    pub fn is_node_transition(&self) -> bool {
        matches!(self, Self::Acquire | Self::Release)
    }
}

impl fmt::Display for JobTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobTransition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("Invalid job transition: {s}"))
    }
}
