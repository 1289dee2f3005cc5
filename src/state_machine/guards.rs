use super::events::JobTransition;
use super::graph::JobGraph;
use super::states::JobPhase;
use crate::error::{JobflowError, JobflowResult};
use crate::models::{Job, ValueType};
use uuid::Uuid;

/// Precondition checked before a transition runs.
///
/// Guards report the narrow phase errors callers act on (`JobAcquired`,
/// `JobNotStarted`, ...). The transitions themselves only ever report
/// `IllegalPhaseTransition`.
pub trait TransitionGuard {
    fn check(&self, job: &Job, graph: &JobGraph) -> JobflowResult<()>;

    /// Description of this guard for logging
    fn description(&self) -> &'static str;
}

/// Node transitions only apply to workable jobs
pub struct WorkableOnlyGuard;

impl TransitionGuard for WorkableOnlyGuard {
    fn check(&self, job: &Job, _graph: &JobGraph) -> JobflowResult<()> {
        if job.is_meta {
            return Err(JobflowError::AcquireMetaJobAttempt(job.job_uuid));
        }
        Ok(())
    }

    fn description(&self) -> &'static str {
        "Meta-jobs are never driven by a node"
    }
}

/// The job's phase must allow the transition
pub struct PhaseGuard(pub JobTransition);

impl TransitionGuard for PhaseGuard {
    fn check(&self, job: &Job, _graph: &JobGraph) -> JobflowResult<()> {
        match phase_error(job.job_uuid, job.phase(), self.0) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn description(&self) -> &'static str {
        "Job phase must allow the transition"
    }
}

/// Only the node holding a job may start it
pub struct NodeHoldsJobGuard(pub Uuid);

impl TransitionGuard for NodeHoldsJobGuard {
    fn check(&self, job: &Job, _graph: &JobGraph) -> JobflowResult<()> {
        if job.node_uuid != Some(self.0) {
            return Err(JobflowError::JobAcquired(job.job_uuid));
        }
        Ok(())
    }

    fn description(&self) -> &'static str {
        "Node must hold the job"
    }
}

/// A node works on at most one job at a time
pub struct NodeIdleGuard(pub Uuid);

impl TransitionGuard for NodeIdleGuard {
    fn check(&self, _job: &Job, graph: &JobGraph) -> JobflowResult<()> {
        if graph.node(self.0)?.is_working_job() {
            return Err(JobflowError::NodeAlreadyWorking(self.0));
        }
        Ok(())
    }

    fn description(&self) -> &'static str {
        "Node must not be working on another job"
    }
}

/// Outputs are added to started workable jobs, one per `(name, type)`
pub struct OutputSlotGuard<'a> {
    pub name: &'a str,
    pub value_type: &'a ValueType,
}

impl TransitionGuard for OutputSlotGuard<'_> {
    fn check(&self, job: &Job, graph: &JobGraph) -> JobflowResult<()> {
        if job.is_meta {
            return Err(JobflowError::illegal_transition(
                job.job_uuid,
                job.phase(),
                "add_output",
            ));
        }
        match job.phase() {
            JobPhase::Created | JobPhase::Acquired => {
                return Err(JobflowError::JobNotStarted(job.job_uuid))
            }
            JobPhase::Finished | JobPhase::Errored => {
                return Err(JobflowError::JobFinished(job.job_uuid))
            }
            JobPhase::Started => {}
        }
        if graph
            .outputs(job.job_uuid)
            .iter()
            .any(|output| output.matches(self.name, self.value_type))
        {
            return Err(JobflowError::BadName(format!(
                "job {} already has an output '{}' of type '{}'",
                job.job_uuid, self.name, self.value_type
            )));
        }
        Ok(())
    }

    fn description(&self) -> &'static str {
        "Job must be started and the output name unused"
    }
}

/// Narrow error for a transition the phase does not allow, `None` when allowed
pub fn phase_error(job_uuid: Uuid, phase: JobPhase, transition: JobTransition) -> Option<JobflowError> {
    use JobPhase::*;
    use JobTransition::*;

    match (transition, phase) {
        (Acquire, Created) | (Release, Acquired) | (Start, Acquired) => None,
        (Finish | Error, Started) => None,
        (Reset, Errored) => None,
        (Abort, Created | Acquired | Started | Errored) => None,

        (_, Finished) => Some(JobflowError::JobFinished(job_uuid)),
        (Acquire, Acquired) => Some(JobflowError::JobAcquired(job_uuid)),
        (Acquire | Release | Start, Started | Errored) => Some(JobflowError::JobStarted(job_uuid)),
        (Release | Start, Created) => Some(JobflowError::JobNotAcquired(job_uuid)),
        (Finish | Error, Created | Acquired) => Some(JobflowError::JobNotStarted(job_uuid)),
        _ => Some(JobflowError::illegal_transition(job_uuid, phase, transition)),
    }
}

/// Runs guards in order, stopping at the first failure
pub fn check_guards(
    guards: &[&dyn TransitionGuard],
    job: &Job,
    graph: &JobGraph,
) -> JobflowResult<()> {
    for guard in guards {
        guard.check(job, graph).map_err(|error| {
            tracing::debug!(
                job_uuid = %job.job_uuid,
                guard = guard.description(),
                error = %error,
                "transition guard rejected"
            );
            error
        })?;
    }
    Ok(())
}
