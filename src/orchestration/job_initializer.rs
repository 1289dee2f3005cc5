//! # Job Initializer
//!
//! Instantiates jobs from templates. Root jobs are validated against the
//! template's declared (or, for meta-templates, derived) inputs and
//! parameters. Sub-jobs are not: their values come from the parent's
//! already validated values or from a finished dependency's outputs.
//!
//! A new meta-job immediately gets every child relation that has no
//! dependencies.

use super::dependency_resolver::DependencyResolver;
use crate::error::{JobflowError, JobflowResult};
use crate::models::core::job_template::qualified;
use crate::models::{
    ChildRelation, InputValue, Job, JobTemplate, MetaTemplate, NewJob, NotificationOverride,
    Principal, ValueType,
};
use crate::state_machine::actions::set_notifications_from_override;
use crate::state_machine::JobStateMachine;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Everything needed to create a root job
#[derive(Debug, Clone)]
pub struct JobCreation {
    pub template: Arc<JobTemplate>,
    pub creator: Principal,
    pub description: String,
    pub input_values: BTreeMap<String, InputValue>,
    pub parameter_values: BTreeMap<String, Value>,
    pub notification_override: Option<NotificationOverride>,
    pub child_notification_overrides: BTreeMap<String, NotificationOverride>,
}

/// Creates a root job, and for meta-templates its first children
#[instrument(skip_all, fields(template = %request.template.identifier()))]
pub fn create_job(machine: &mut JobStateMachine<'_>, request: JobCreation) -> JobflowResult<Uuid> {
    let template = request.template;
    if template.is_deleted() {
        return Err(JobflowError::TemplateNotFound(template.identifier()));
    }

    let input_values = template.check_input_values(machine.templates, &request.input_values)?;
    let parameter_values =
        template.check_parameter_values(machine.templates, &request.parameter_values)?;

    if !request.child_notification_overrides.is_empty() {
        if !template.is_meta() {
            return Err(JobflowError::ChildNotificationOverridesForWorkableJob(
                template.identifier(),
            ));
        }
        for name in request.child_notification_overrides.keys() {
            template.get_descendant(machine.templates, name)?;
        }
    }

    instantiate(
        machine,
        &template,
        NewJob {
            template_uuid: template.template_uuid,
            is_meta: template.is_meta(),
            parent: None,
            creator: request.creator,
            description: request.description,
            input_values,
            parameter_values,
        },
        request.notification_override.as_ref(),
        request.child_notification_overrides,
    )
}

/// Creates the job for one child relation of a meta-job.
///
/// Inputs come from the parent's `"{relation}:{input}"` value when present,
/// otherwise from the output a dependency edge points at. Parameters come
/// from `"{relation}:{parameter}"` or the child's default.
pub(crate) fn create_sub_job(
    machine: &mut JobStateMachine<'_>,
    parent_uuid: Uuid,
    meta: &MetaTemplate,
    relation: &ChildRelation,
    finished: &BTreeMap<String, Uuid>,
) -> JobflowResult<Uuid> {
    let child_template = machine.template(relation.template_uuid)?;
    let parent = machine.graph().job(parent_uuid)?;

    let mut input_values = BTreeMap::new();
    for input in child_template.inputs(machine.templates)? {
        let key = qualified(&relation.name, &input.name);
        let value = match parent.input_values.get(&key) {
            Some(value) => value.clone(),
            None => resolve_from_dependency(machine, meta, relation, &input.name, finished)?,
        };
        input_values.insert(input.name, value);
    }

    let mut parameter_values = BTreeMap::new();
    for parameter in child_template.parameters(machine.templates)? {
        let key = qualified(&relation.name, &parameter.name);
        let supplied = parent
            .parameter_values
            .get(&key)
            .filter(|_| !parameter.is_const);
        let value = supplied
            .or(parameter.default.as_ref())
            .cloned()
            .ok_or_else(|| {
                JobflowError::InvalidJobInput(format!(
                    "no value for parameter '{key}' of {}",
                    child_template.identifier()
                ))
            })?;
        parameter_values.insert(parameter.name, value);
    }

    let full_name = match machine.graph().full_child_name(parent_uuid)? {
        Some(prefix) => qualified(&prefix, &relation.name),
        None => relation.name.clone(),
    };
    let notification_override = machine.graph().override_for(&full_name).cloned();
    debug!(
        child = %full_name,
        has_override = notification_override.is_some(),
        "instantiating child relation"
    );

    let new_job = NewJob {
        template_uuid: child_template.template_uuid,
        is_meta: child_template.is_meta(),
        parent: Some((parent_uuid, parent.root_uuid, relation.name.clone())),
        creator: parent.creator.clone(),
        description: parent.description.clone(),
        input_values,
        parameter_values,
    };
    instantiate(
        machine,
        &child_template,
        new_job,
        notification_override.as_ref(),
        BTreeMap::new(),
    )
}

/// Binds an input to the output a dependency edge points at
fn resolve_from_dependency(
    machine: &JobStateMachine<'_>,
    meta: &MetaTemplate,
    relation: &ChildRelation,
    input_name: &str,
    finished: &BTreeMap<String, Uuid>,
) -> JobflowResult<InputValue> {
    let missing = || {
        JobflowError::InvalidJobInput(format!(
            "no value for input '{}'",
            qualified(&relation.name, input_name)
        ))
    };
    let edge = meta
        .edge_for_input(&relation.name, input_name)
        .ok_or_else(missing)?;
    let dependency_uuid = finished.get(&edge.dependency).ok_or_else(missing)?;

    let output_type = ValueType::data(edge.output_type.clone());
    let output = machine
        .graph()
        .outputs(*dependency_uuid)
        .iter()
        .find(|output| output.matches(&edge.output_name, &output_type))
        .ok_or_else(|| {
            JobflowError::InvalidJobInput(format!(
                "dependency '{}' has no output '{}' of type '{}' for input '{}'",
                edge.dependency,
                edge.output_name,
                output_type,
                qualified(&relation.name, input_name)
            ))
        })?;

    Ok(InputValue::from_output(output.output_uuid, &edge.output_type))
}

/// Inserts the job row, installs its notifications and, for meta-jobs,
/// registers child overrides and creates the children that can start now
fn instantiate(
    machine: &mut JobStateMachine<'_>,
    template: &JobTemplate,
    new_job: NewJob,
    notification_override: Option<&NotificationOverride>,
    child_overrides: BTreeMap<String, NotificationOverride>,
) -> JobflowResult<Uuid> {
    let job = Job::create(new_job);
    let job_uuid = job.job_uuid;
    let root_uuid = job.root_uuid;
    machine.graph.insert_job(job);

    set_notifications_from_override(
        machine.graph,
        job_uuid,
        machine.defaults,
        notification_override,
    )?;

    if template.is_meta() {
        for (name, spec) in child_overrides {
            machine.graph.set_override(root_uuid, name, spec);
        }
        let outcome = DependencyResolver::try_create_children(machine, job_uuid)?;
        if let Some(error) = outcome.error {
            machine.finish_with_error_meta(job_uuid, &error)?;
        }
    }
    Ok(job_uuid)
}
