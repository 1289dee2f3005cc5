//! # Workable Transitions
//!
//! A workable job's phase follows from its fields:
//!
//! | Phase    | node | start_time | end_time | error |
//! |----------|------|------------|----------|-------|
//! | Created  | -    | -          | -        | -     |
//! | Acquired | set  | -          | -        | -     |
//! | Started  | set  | set        | -        | -     |
//! | Finished | set  | set        | set      | -     |
//! | Errored  | set  | set        | set      | set   |
//!
//! Outputs only survive a successful finish; every other transition out of
//! `Started` wipes them.

use super::events::JobTransition;
use super::guards::{
    check_guards, NodeHoldsJobGuard, NodeIdleGuard, OutputSlotGuard, PhaseGuard,
    WorkableOnlyGuard,
};
use super::job_state_machine::JobStateMachine;
use super::states::JobPhase;
use crate::constants::child_error_message;
use crate::error::{JobflowError, JobflowResult};
use crate::models::{JobOutput, ValueType};
use crate::storage::BlobHandle;
use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

impl JobStateMachine<'_> {
    /// A node takes hold of a created job
    pub fn acquire(&mut self, job_uuid: Uuid, node_uuid: Uuid) -> JobflowResult<JobPhase> {
        let job = self.graph.job(job_uuid)?;
        self.graph.node(node_uuid)?;
        check_guards(
            &[&WorkableOnlyGuard, &PhaseGuard(JobTransition::Acquire)],
            job,
            self.graph,
        )?;

        let from = self.expect_phase(job_uuid, &[JobPhase::Created], JobTransition::Acquire)?;
        self.graph.job_mut(job_uuid)?.node_uuid = Some(node_uuid);
        self.record(job_uuid, JobTransition::Acquire, from, Some(node_uuid), None)
    }

    /// The holding node lets go of a job it has not started
    pub fn release(&mut self, job_uuid: Uuid) -> JobflowResult<JobPhase> {
        let job = self.graph.job(job_uuid)?;
        check_guards(
            &[&WorkableOnlyGuard, &PhaseGuard(JobTransition::Release)],
            job,
            self.graph,
        )?;
        self.release_workable(job_uuid)
    }

    fn release_workable(&mut self, job_uuid: Uuid) -> JobflowResult<JobPhase> {
        let from = self.expect_phase(job_uuid, &[JobPhase::Acquired], JobTransition::Release)?;
        self.graph.wipe_outputs(job_uuid);
        let node_uuid = self.graph.job_mut(job_uuid)?.node_uuid.take();
        self.record(job_uuid, JobTransition::Release, from, node_uuid, None)
    }

    /// The holding node starts work. Created ancestors start first.
    pub fn start(&mut self, job_uuid: Uuid, node_uuid: Uuid) -> JobflowResult<JobPhase> {
        let job = self.graph.job(job_uuid)?;
        self.graph.node(node_uuid)?;
        check_guards(
            &[
                &WorkableOnlyGuard,
                &PhaseGuard(JobTransition::Start),
                &NodeHoldsJobGuard(node_uuid),
                &NodeIdleGuard(node_uuid),
            ],
            job,
            self.graph,
        )?;

        let from = self.expect_phase(job_uuid, &[JobPhase::Acquired], JobTransition::Start)?;
        if let Some(parent_uuid) = self.graph.job(job_uuid)?.parent_uuid {
            self.start_meta(parent_uuid)?;
        }

        self.graph.wipe_outputs(job_uuid);
        self.graph.job_mut(job_uuid)?.start_time = Some(Utc::now());
        self.graph.node_mut(node_uuid)?.current_job = Some(job_uuid);
        self.record(job_uuid, JobTransition::Start, from, Some(node_uuid), None)
    }

    /// The holding node reports success; the parent receives the outputs.
    ///
    /// A node that does not hold the job gets a no-op, after its own
    /// reference to the job is cleared.
    pub fn finish(&mut self, job_uuid: Uuid, node_uuid: Uuid) -> JobflowResult<JobPhase> {
        let job = self.graph.job(job_uuid)?;
        self.graph.node(node_uuid)?;
        check_guards(
            &[&WorkableOnlyGuard, &PhaseGuard(JobTransition::Finish)],
            job,
            self.graph,
        )?;
        if self.ignore_foreign_node(job_uuid, node_uuid)? {
            return self.current_phase(job_uuid);
        }

        let from = self.expect_phase(job_uuid, &[JobPhase::Started], JobTransition::Finish)?;
        self.graph.job_mut(job_uuid)?.end_time = Some(Utc::now());
        self.graph.clear_current_job(node_uuid, job_uuid)?;
        let phase = self.record(job_uuid, JobTransition::Finish, from, Some(node_uuid), None)?;

        self.propagate_finish(job_uuid)?;
        Ok(phase)
    }

    /// The holding node reports failure; the parent errors with a wrapped message
    pub fn finish_with_error(
        &mut self,
        job_uuid: Uuid,
        node_uuid: Uuid,
        error: &str,
    ) -> JobflowResult<JobPhase> {
        let job = self.graph.job(job_uuid)?;
        self.graph.node(node_uuid)?;
        check_guards(
            &[&WorkableOnlyGuard, &PhaseGuard(JobTransition::Error)],
            job,
            self.graph,
        )?;
        if self.ignore_foreign_node(job_uuid, node_uuid)? {
            return self.current_phase(job_uuid);
        }

        let from = self.expect_phase(job_uuid, &[JobPhase::Started], JobTransition::Error)?;
        self.graph.wipe_outputs(job_uuid);
        let job = self.graph.job_mut(job_uuid)?;
        job.end_time = Some(Utc::now());
        job.error = Some(error.to_string());
        self.graph.clear_current_job(node_uuid, job_uuid)?;
        let phase = self.record(
            job_uuid,
            JobTransition::Error,
            from,
            Some(node_uuid),
            Some(error.to_string()),
        )?;

        let job = self.graph.job(job_uuid)?;
        if let (Some(parent_uuid), Some(child_name)) = (job.parent_uuid, job.child_name.clone()) {
            self.finish_with_error_meta(parent_uuid, &child_error_message(&child_name, error))?;
        }
        Ok(phase)
    }

    /// Clears an errored job back to `Acquired` (`Created` for meta-jobs)
    /// and lets the parent recover once none of its children are errored
    pub fn reset(&mut self, job_uuid: Uuid) -> JobflowResult<JobPhase> {
        let job = self.graph.job(job_uuid)?;
        check_guards(&[&PhaseGuard(JobTransition::Reset)], job, self.graph)?;

        if job.is_meta {
            return self.reset_meta(job_uuid, true);
        }
        let phase = self.reset_workable(job_uuid)?;
        self.try_reset_parents(job_uuid)?;
        Ok(phase)
    }

    pub(crate) fn reset_workable(&mut self, job_uuid: Uuid) -> JobflowResult<JobPhase> {
        let from = self.expect_phase(job_uuid, &[JobPhase::Errored], JobTransition::Reset)?;
        self.graph.wipe_outputs(job_uuid);
        let job = self.graph.job_mut(job_uuid)?;
        job.start_time = None;
        job.end_time = None;
        job.error = None;
        self.record(job_uuid, JobTransition::Reset, from, None, None)
    }

    /// Returns an unfinished job to `Created`. Aborting an errored job acts
    /// as a reset, so the parent recovers once it has no errored children.
    pub fn abort(&mut self, job_uuid: Uuid) -> JobflowResult<JobPhase> {
        let job = self.graph.job(job_uuid)?;
        check_guards(&[&PhaseGuard(JobTransition::Abort)], job, self.graph)?;

        if job.is_meta {
            return self.abort_meta(job_uuid);
        }
        let was_errored = job.phase() == JobPhase::Errored;
        let phase = self.abort_workable(job_uuid)?;
        if was_errored {
            self.try_reset_parents(job_uuid)?;
        }
        Ok(phase)
    }

    pub(crate) fn abort_workable(&mut self, job_uuid: Uuid) -> JobflowResult<JobPhase> {
        let from = self.current_phase(job_uuid)?;
        match from {
            JobPhase::Created => return Ok(from),
            JobPhase::Finished => {
                return Err(JobflowError::illegal_transition(
                    job_uuid,
                    from,
                    JobTransition::Abort,
                ))
            }
            JobPhase::Acquired => {
                self.release_workable(job_uuid)?;
            }
            JobPhase::Errored => {
                self.reset_workable(job_uuid)?;
                self.release_workable(job_uuid)?;
            }
            JobPhase::Started => {
                self.graph.wipe_outputs(job_uuid);
                let job = self.graph.job_mut(job_uuid)?;
                job.start_time = None;
                let holder = job.node_uuid.take();
                if let Some(node_uuid) = holder {
                    self.graph.clear_current_job(node_uuid, job_uuid)?;
                }
            }
        }
        self.record(job_uuid, JobTransition::Abort, from, None, None)
    }

    /// Stores an output of a started job. The payload is already in the blob store.
    pub fn add_output(
        &mut self,
        job_uuid: Uuid,
        name: &str,
        value_type: ValueType,
        blob: BlobHandle,
        creator_uuid: Uuid,
    ) -> JobflowResult<JobOutput> {
        let job = self.graph.job(job_uuid)?;
        check_guards(
            &[&OutputSlotGuard {
                name,
                value_type: &value_type,
            }],
            job,
            self.graph,
        )?;

        let output = JobOutput::new(job_uuid, name, value_type, blob, creator_uuid);
        debug!(job_uuid = %job_uuid, name = %output.name, value_type = %output.value_type, "output added");
        self.graph.insert_output(output.clone());
        Ok(output)
    }

    /// True when `node_uuid` does not hold the job; its stale reference is dropped
    fn ignore_foreign_node(&mut self, job_uuid: Uuid, node_uuid: Uuid) -> JobflowResult<bool> {
        if self.graph.job(job_uuid)?.node_uuid == Some(node_uuid) {
            return Ok(false);
        }
        self.graph.clear_current_job(node_uuid, job_uuid)?;
        debug!(
            job_uuid = %job_uuid,
            node_uuid = %node_uuid,
            "ignoring report from a node that does not hold the job"
        );
        Ok(true)
    }
}
