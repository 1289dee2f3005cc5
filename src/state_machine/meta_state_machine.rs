//! # Meta-Job Transitions
//!
//! Meta-jobs are never held by a node. They start when their first child
//! starts, finish when every child relation has a finished job, and error
//! when a child errors or a child cannot be created. All propagation walks
//! the parent chain iteratively.

use super::events::JobTransition;
use super::job_state_machine::JobStateMachine;
use super::states::JobPhase;
use crate::constants::child_error_message;
use crate::error::JobflowResult;
use crate::orchestration::dependency_resolver::DependencyResolver;
use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

impl JobStateMachine<'_> {
    /// Starts a meta-job and any created ancestors, outermost first.
    /// Already started meta-jobs are left alone.
    pub(crate) fn start_meta(&mut self, job_uuid: Uuid) -> JobflowResult<()> {
        let mut pending = Vec::new();
        for uuid in self.graph.parent_hierarchy(job_uuid)? {
            if self.current_phase(uuid)? == JobPhase::Created {
                pending.push(uuid);
            }
        }

        for uuid in pending {
            let from = self.current_phase(uuid)?;
            self.graph.job_mut(uuid)?.start_time = Some(Utc::now());
            self.record(uuid, JobTransition::Start, from, None, None)?;
        }
        Ok(())
    }

    /// Hands a finished job to its ancestors, finishing each meta-job whose
    /// children are now all finished
    pub(crate) fn propagate_finish(&mut self, job_uuid: Uuid) -> JobflowResult<()> {
        let mut child_uuid = job_uuid;
        while let Some(parent_uuid) = self.graph.job(child_uuid)?.parent_uuid {
            if !self.finish_meta(parent_uuid, child_uuid)? {
                break;
            }
            child_uuid = parent_uuid;
        }
        Ok(())
    }

    /// Receives a finished child: copies its outputs, creates the children
    /// that became eligible and finishes when nothing is left to run.
    /// Returns whether the meta-job finished.
    pub(crate) fn finish_meta(&mut self, job_uuid: Uuid, child_uuid: Uuid) -> JobflowResult<bool> {
        let child = self.graph.job(child_uuid)?;
        let child_name = child.child_name.clone().unwrap_or_default();
        let copies: Vec<_> = self
            .graph
            .outputs(child_uuid)
            .iter()
            .map(|output| output.copied_to(job_uuid, &child_name))
            .collect();
        for output in copies {
            self.graph.insert_output(output);
        }

        let outcome = DependencyResolver::try_create_children(self, job_uuid)?;
        if let Some(error) = outcome.error {
            self.finish_with_error_meta(job_uuid, &error)?;
            return Ok(false);
        }
        if !outcome.all_finished {
            return Ok(false);
        }
        self.complete_meta(job_uuid)
    }

    /// Marks a started meta-job whose children are all finished as finished
    fn complete_meta(&mut self, job_uuid: Uuid) -> JobflowResult<bool> {
        let from = self.current_phase(job_uuid)?;
        if from != JobPhase::Started {
            debug!(job_uuid = %job_uuid, phase = %from, "children finished, meta-job left as is");
            return Ok(false);
        }
        self.graph.job_mut(job_uuid)?.end_time = Some(Utc::now());
        self.record(job_uuid, JobTransition::Finish, from, None, None)?;
        Ok(true)
    }

    /// Errors a meta-job and every ancestor that is not already errored.
    /// Each level wraps the message with the name of the child that failed.
    pub(crate) fn finish_with_error_meta(&mut self, job_uuid: Uuid, error: &str) -> JobflowResult<()> {
        let mut current = job_uuid;
        let mut message = error.to_string();

        loop {
            let from = self.current_phase(current)?;
            if from == JobPhase::Errored {
                return Ok(());
            }
            if from == JobPhase::Finished {
                warn!(job_uuid = %current, error = %message, "error reported to a finished meta-job");
                return Ok(());
            }

            let job = self.graph.job_mut(current)?;
            job.error = Some(message.clone());
            job.end_time = Some(Utc::now());
            self.record(current, JobTransition::Error, from, None, Some(message.clone()))?;

            let job = self.graph.job(current)?;
            match (job.parent_uuid, job.child_name.as_deref()) {
                (Some(parent_uuid), Some(child_name)) => {
                    message = child_error_message(child_name, &message);
                    current = parent_uuid;
                }
                _ => return Ok(()),
            }
        }
    }

    /// Resets an errored meta-job.
    ///
    /// Errored children are reset first without touching this job, then the
    /// job's own error is cleared and the resolver runs again, so children
    /// whose creation failed get another chance. With `propagate` the
    /// ancestors are reset as well once they have no errored children left.
    pub(crate) fn reset_meta(&mut self, job_uuid: Uuid, propagate: bool) -> JobflowResult<JobPhase> {
        let from = self.expect_phase(job_uuid, &[JobPhase::Errored], JobTransition::Reset)?;

        for child_uuid in self.graph.child_uuids(job_uuid) {
            let child = self.graph.job(child_uuid)?;
            if child.phase() != JobPhase::Errored {
                continue;
            }
            if child.is_meta {
                self.reset_meta(child_uuid, false)?;
            } else {
                self.reset_workable(child_uuid)?;
            }
        }

        let job = self.graph.job_mut(job_uuid)?;
        job.error = None;
        job.end_time = None;
        self.record(job_uuid, JobTransition::Reset, from, None, None)?;

        let outcome = DependencyResolver::try_create_children(self, job_uuid)?;
        if let Some(error) = outcome.error {
            self.finish_with_error_meta(job_uuid, &error)?;
            return self.current_phase(job_uuid);
        }
        if outcome.all_finished && self.complete_meta(job_uuid)? {
            self.propagate_finish(job_uuid)?;
        }

        if propagate {
            self.try_reset_parents(job_uuid)?;
        }
        self.current_phase(job_uuid)
    }

    /// Resets errored ancestors that no longer have an errored child
    pub(crate) fn try_reset_parents(&mut self, job_uuid: Uuid) -> JobflowResult<()> {
        let Some(parent_uuid) = self.graph.job(job_uuid)?.parent_uuid else {
            return Ok(());
        };
        if self.current_phase(parent_uuid)? != JobPhase::Errored {
            return Ok(());
        }
        let blocked = self
            .graph
            .children(parent_uuid)
            .any(|child| child.phase() == JobPhase::Errored);
        if blocked {
            debug!(job_uuid = %parent_uuid, "meta-job still has errored children");
            return Ok(());
        }
        self.reset_meta(parent_uuid, true).map(|_| ())
    }

    /// Aborts every unfinished descendant, then clears the meta-job's own
    /// error. It returns to `Created` unless some child already finished.
    pub(crate) fn abort_meta(&mut self, job_uuid: Uuid) -> JobflowResult<JobPhase> {
        let mut descendants = self.graph.descendants(job_uuid);
        descendants.reverse();
        descendants.push(job_uuid);

        let mut phase = self.current_phase(job_uuid)?;
        for uuid in descendants {
            let job = self.graph.job(uuid)?;
            let from = job.phase();
            if from == JobPhase::Finished {
                continue;
            }
            if !job.is_meta {
                self.abort_workable(uuid)?;
                continue;
            }

            let any_finished = self
                .graph
                .children(uuid)
                .any(|child| child.phase() == JobPhase::Finished);
            let job = self.graph.job_mut(uuid)?;
            job.error = None;
            job.end_time = None;
            if !any_finished {
                job.start_time = None;
            } else if job.start_time.is_none() {
                job.start_time = Some(Utc::now());
            }
            if from != JobPhase::Created {
                let to = self.record(uuid, JobTransition::Abort, from, None, None)?;
                if uuid == job_uuid {
                    phase = to;
                }
            }
        }
        Ok(phase)
    }
}
