use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle phase of a job.
///
/// Workable jobs move through all five phases; meta-jobs never enter
/// `Acquired` because they are never held by a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    /// Initial phase when the job is created
    #[default]
    Created,
    /// A node holds the job but has not started it
    Acquired,
    /// The job is being executed
    Started,
    /// The job completed successfully
    Finished,
    /// The job failed with an error
    Errored,
}

impl JobPhase {
    /// Only `Finished` is terminal; `Errored` jobs can be reset
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Errored)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Started)
    }

    /// Whether a meta-job may report this phase
    pub fn valid_for_meta(&self) -> bool {
        !matches!(self, Self::Acquired)
    }

    /// Phase implied by a workable job's fields. `error` wins over everything,
    /// then `end_time`, `start_time` and finally the holding node.
    pub fn derive_workable(
        start_time: Option<DateTime<Utc>>,
        end_time: Option<DateTime<Utc>>,
        error: Option<&str>,
        node_uuid: Option<Uuid>,
    ) -> Self {
        if error.is_some() {
            Self::Errored
        } else if end_time.is_some() {
            Self::Finished
        } else if start_time.is_some() {
            Self::Started
        } else if node_uuid.is_some() {
            Self::Acquired
        } else {
            Self::Created
        }
    }

    /// Phase implied by a meta-job's fields
    pub fn derive_meta(
        start_time: Option<DateTime<Utc>>,
        end_time: Option<DateTime<Utc>>,
        error: Option<&str>,
    ) -> Self {
        if error.is_some() {
            Self::Errored
        } else if end_time.is_some() {
            Self::Finished
        } else if start_time.is_some() {
            Self::Started
        } else {
            Self::Created
        }
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Acquired => write!(f, "acquired"),
            Self::Started => write!(f, "started"),
            Self::Finished => write!(f, "finished"),
            Self::Errored => write!(f, "errored"),
        }
    }
}

impl std::str::FromStr for JobPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "acquired" => Ok(Self::Acquired),
            "started" => Ok(Self::Started),
            "finished" => Ok(Self::Finished),
            "errored" => Ok(Self::Errored),
            _ => Err(format!("Invalid job phase: {s}")),
        }
    }
}
