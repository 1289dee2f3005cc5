//! # Job State Machine
//!
//! [`JobStateMachine`] applies transitions to the jobs of one locked
//! [`JobGraph`]. Workable transitions live in `workable_state_machine.rs`,
//! meta-job transitions and parent propagation in `meta_state_machine.rs`.
//!
//! Every public transition runs its guards first, so a rejected call leaves
//! the graph untouched. Once guards pass, the transition and all of its
//! propagation up the parent chain happen on the graph; the caller persists
//! the result as one change set.

use super::actions::{
    DefaultActions, FireNotificationsAction, LogTransitionAction, TransitionAction,
    TransitionEvent,
};
use super::events::JobTransition;
use super::graph::JobGraph;
use super::states::JobPhase;
use crate::error::{JobflowError, JobflowResult};
use crate::models::{ActionSpec, JobTemplate, NotificationOverride, TemplateLookup};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

pub struct JobStateMachine<'a> {
    pub(crate) graph: &'a mut JobGraph,
    pub(crate) templates: &'a (dyn TemplateLookup + Sync),
    pub(crate) defaults: &'a DefaultActions,
}

impl<'a> JobStateMachine<'a> {
    pub fn new(
        graph: &'a mut JobGraph,
        templates: &'a (dyn TemplateLookup + Sync),
        defaults: &'a DefaultActions,
    ) -> Self {
        Self {
            graph,
            templates,
            defaults,
        }
    }

    pub fn graph(&self) -> &JobGraph {
        self.graph
    }

    pub fn current_phase(&self, job_uuid: Uuid) -> JobflowResult<JobPhase> {
        Ok(self.graph.job(job_uuid)?.phase())
    }

    pub(crate) fn template(&self, template_uuid: Uuid) -> JobflowResult<Arc<JobTemplate>> {
        self.templates
            .template(template_uuid)
            .ok_or_else(|| JobflowError::TemplateNotFound(template_uuid.to_string()))
    }

    pub(crate) fn template_of(&self, job_uuid: Uuid) -> JobflowResult<Arc<JobTemplate>> {
        let template_uuid = self.graph.job(job_uuid)?.template_uuid;
        self.template(template_uuid)
    }

    /// Backstop for internal callers: the transition must start from one of `allowed`
    pub(crate) fn expect_phase(
        &self,
        job_uuid: Uuid,
        allowed: &[JobPhase],
        transition: JobTransition,
    ) -> JobflowResult<JobPhase> {
        let phase = self.current_phase(job_uuid)?;
        if allowed.contains(&phase) {
            Ok(phase)
        } else {
            Err(JobflowError::illegal_transition(job_uuid, phase, transition))
        }
    }

    /// Sets the job's phase from its fields and runs the transition actions
    pub(crate) fn record(
        &mut self,
        job_uuid: Uuid,
        transition: JobTransition,
        from: JobPhase,
        node_uuid: Option<Uuid>,
        error: Option<String>,
    ) -> JobflowResult<JobPhase> {
        let job = self.graph.job_mut(job_uuid)?;
        let to = job.derived_phase();
        job.set_phase(to);

        let event = TransitionEvent {
            job_uuid,
            transition,
            from,
            to,
            node_uuid,
            error,
        };
        let actions: [&dyn TransitionAction; 2] = [&LogTransitionAction, &FireNotificationsAction];
        for action in actions {
            action.execute(self.graph, &event)?;
        }
        Ok(to)
    }

    /// Registers notification overrides for descendants of a root meta-job.
    ///
    /// Names are `:`-separated relation paths and are validated against the
    /// template; the overrides apply when the descendant is created.
    pub fn attach_notification_overrides(
        &mut self,
        job_uuid: Uuid,
        overrides: BTreeMap<String, NotificationOverride>,
    ) -> JobflowResult<()> {
        let job = self.graph.job(job_uuid)?;
        let root_uuid = job.root_uuid;
        let template = self.template(job.template_uuid)?;
        if !template.is_meta() {
            if overrides.is_empty() {
                return Ok(());
            }
            return Err(JobflowError::ChildNotificationOverridesForWorkableJob(
                template.identifier(),
            ));
        }
        if !job.is_root() {
            return Err(JobflowError::NotRootJob(job_uuid));
        }

        for name in overrides.keys() {
            template.get_descendant(self.templates, name)?;
        }
        for (name, spec) in overrides {
            self.graph.set_override(root_uuid, name, spec);
        }
        Ok(())
    }

    /// Binds extra notification actions to an existing job
    pub fn attach_notifications(
        &mut self,
        job_uuid: Uuid,
        actions: &[ActionSpec],
    ) -> JobflowResult<usize> {
        self.graph.job(job_uuid)?;
        Ok(super::actions::attach_actions(self.graph, job_uuid, actions))
    }
}
