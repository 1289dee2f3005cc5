//! Error types for the jobflow engine.
//!
//! Validation and phase errors are raised before any state is written, so a
//! caller can correct its request and retry. Errors raised while a meta-job
//! creates its children are not surfaced here at all: they become the
//! meta-job's `Errored` phase instead.

use crate::config::ConfigurationError;
use crate::database::PersistenceError;
use crate::storage::BlobError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum JobflowError {
    #[error("Illegal phase transition for job {job_uuid}: cannot {transition} from {phase}")]
    IllegalPhaseTransition {
        job_uuid: Uuid,
        phase: String,
        transition: String,
    },

    #[error("Job {0} has already been acquired")]
    JobAcquired(Uuid),

    #[error("Job {0} has not been acquired")]
    JobNotAcquired(Uuid),

    #[error("Job {0} has already been started")]
    JobStarted(Uuid),

    #[error("Job {0} has not been started")]
    JobNotStarted(Uuid),

    #[error("Job {0} has already finished")]
    JobFinished(Uuid),

    #[error("Job {0} has not finished")]
    JobNotFinished(Uuid),

    #[error("Node {0} is already working on a job")]
    NodeAlreadyWorking(Uuid),

    #[error("Invalid job input: {0}")]
    InvalidJobInput(String),

    #[error("No descendant named '{0}'")]
    BadDescendantName(String),

    #[error("Child notification overrides supplied for workable template '{0}'")]
    ChildNotificationOverridesForWorkableJob(String),

    #[error("Meta-job {0} cannot be acquired by a node")]
    AcquireMetaJobAttempt(Uuid),

    #[error("Bad name: {0}")]
    BadName(String),

    #[error("Job {0} is not a root job")]
    NotRootJob(Uuid),

    #[error("Job {0} not found")]
    JobNotFound(Uuid),

    #[error("Node {0} not found")]
    NodeNotFound(Uuid),

    #[error("Job template not found: {0}")]
    TemplateNotFound(String),

    #[error("Invalid job template '{name}': {reason}")]
    InvalidTemplate { name: String, reason: String },

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Blob store error: {0}")]
    Blob(#[from] BlobError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
}

impl JobflowError {
    pub fn illegal_transition(
        job_uuid: Uuid,
        phase: impl ToString,
        transition: impl ToString,
    ) -> Self {
        Self::IllegalPhaseTransition {
            job_uuid,
            phase: phase.to_string(),
            transition: transition.to_string(),
        }
    }

    pub fn invalid_template(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTemplate {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// True for errors caused by another caller winning a race for the same job or node
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::JobAcquired(_)
                | Self::JobStarted(_)
                | Self::JobFinished(_)
                | Self::NodeAlreadyWorking(_)
        )
    }
}

pub type JobflowResult<T> = Result<T, JobflowError>;
