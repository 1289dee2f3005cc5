//! # Job Model
//!
//! A job is one instantiation of a [`JobTemplate`](super::job_template::JobTemplate).
//! Jobs form trees: a meta-job owns the jobs created for its child relations,
//! and every job records the root of its tree so the whole tree can be loaded
//! and locked as a unit.
//!
//! The `phase` field is written only by the state machine. It must always
//! agree with the phase implied by `start_time`, `end_time`, `error` and
//! `node_uuid`; [`Job::phase_is_consistent`] checks exactly that.

use super::value_type::InputValue;
use crate::state_machine::states::JobPhase;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// The user on whose behalf an operation runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_uuid: Uuid,
    pub email: Option<String>,
}

impl Principal {
    pub fn new(user_uuid: Uuid, email: Option<String>) -> Self {
        Self { user_uuid, email }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_uuid: Uuid,
    pub template_uuid: Uuid,
    pub root_uuid: Uuid,
    pub parent_uuid: Option<Uuid>,
    /// Name of the child relation this job was created for, if it has a parent
    pub child_name: Option<String>,
    pub is_meta: bool,
    pub creator: Principal,
    pub description: String,
    pub input_values: BTreeMap<String, InputValue>,
    pub parameter_values: BTreeMap<String, Value>,
    pub node_uuid: Option<Uuid>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub phase: JobPhase,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Fields needed to create a job row
#[derive(Debug, Clone)]
pub struct NewJob {
    pub template_uuid: Uuid,
    pub is_meta: bool,
    pub parent: Option<(Uuid, Uuid, String)>,
    pub creator: Principal,
    pub description: String,
    pub input_values: BTreeMap<String, InputValue>,
    pub parameter_values: BTreeMap<String, Value>,
}

impl Job {
    pub fn create(new_job: NewJob) -> Self {
        let job_uuid = Uuid::new_v4();
        let (parent_uuid, root_uuid, child_name) = match new_job.parent {
            Some((parent_uuid, root_uuid, child_name)) => {
                (Some(parent_uuid), root_uuid, Some(child_name))
            }
            None => (None, job_uuid, None),
        };

        Self {
            job_uuid,
            template_uuid: new_job.template_uuid,
            root_uuid,
            parent_uuid,
            child_name,
            is_meta: new_job.is_meta,
            creator: new_job.creator,
            description: new_job.description,
            input_values: new_job.input_values,
            parameter_values: new_job.parameter_values,
            node_uuid: None,
            start_time: None,
            end_time: None,
            error: None,
            phase: JobPhase::Created,
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    pub fn phase(&self) -> JobPhase {
        self.phase
    }

    pub fn is_root(&self) -> bool {
        self.parent_uuid.is_none()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Phase implied by the job's nullable fields
    pub fn derived_phase(&self) -> JobPhase {
        if self.is_meta {
            JobPhase::derive_meta(self.start_time, self.end_time, self.error.as_deref())
        } else {
            JobPhase::derive_workable(
                self.start_time,
                self.end_time,
                self.error.as_deref(),
                self.node_uuid,
            )
        }
    }

    pub fn phase_is_consistent(&self) -> bool {
        let meta_ok = !self.is_meta || (self.node_uuid.is_none() && self.phase.valid_for_meta());
        meta_ok && self.phase == self.derived_phase()
    }

    /// Records the phase reached by a transition
    pub(crate) fn set_phase(&mut self, phase: JobPhase) {
        self.phase = phase;
        debug_assert!(
            self.phase_is_consistent(),
            "job {} phase {} diverges from derived phase {}",
            self.job_uuid,
            self.phase,
            self.derived_phase()
        );
    }
}
