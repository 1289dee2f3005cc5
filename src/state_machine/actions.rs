use super::events::JobTransition;
use super::graph::JobGraph;
use super::states::JobPhase;
use crate::error::JobflowResult;
use crate::models::{ActionSpec, NotificationAction, NotificationOverride};
use crate::notifications::{NotificationContext, PendingNotification};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

/// A transition that has just been applied to a job
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionEvent {
    pub job_uuid: Uuid,
    pub transition: JobTransition,
    pub from: JobPhase,
    pub to: JobPhase,
    pub node_uuid: Option<Uuid>,
    pub error: Option<String>,
}

/// Side effect run after a transition has been applied
pub trait TransitionAction {
    fn execute(&self, graph: &mut JobGraph, event: &TransitionEvent) -> JobflowResult<()>;

    /// Description of this action for logging
    fn description(&self) -> &'static str;
}

/// Emits a structured log line for every transition
pub struct LogTransitionAction;

impl TransitionAction for LogTransitionAction {
    fn execute(&self, _graph: &mut JobGraph, event: &TransitionEvent) -> JobflowResult<()> {
        info!(
            job_uuid = %event.job_uuid,
            transition = %event.transition,
            from = %event.from,
            to = %event.to,
            node_uuid = ?event.node_uuid,
            "job transition"
        );
        Ok(())
    }

    fn description(&self) -> &'static str {
        "Log job transition"
    }
}

/// Queues the job's notification actions bound to the transition
pub struct FireNotificationsAction;

impl TransitionAction for FireNotificationsAction {
    fn execute(&self, graph: &mut JobGraph, event: &TransitionEvent) -> JobflowResult<()> {
        let job = graph.job(event.job_uuid)?;
        let has_parent = job.parent_uuid.is_some();
        let node = match event.node_uuid {
            Some(node_uuid) => Some(
                graph
                    .node(node_uuid)
                    .map(|node| node.name.clone())
                    .unwrap_or_else(|_| node_uuid.to_string()),
            ),
            None => None,
        };
        let context = NotificationContext {
            job_uuid: job.job_uuid,
            description: job.description.clone(),
            transition: event.transition,
            node,
            error: event.error.clone(),
            creator_email: job.creator.email.clone(),
        };

        let pending: Vec<PendingNotification> = graph
            .actions_for(event.job_uuid, event.transition)
            .into_iter()
            .filter(|action| !action.is_suppressed(has_parent))
            .map(|action| PendingNotification {
                notification: action.notification.clone(),
                context: context.clone(),
            })
            .collect();

        debug!(
            job_uuid = %event.job_uuid,
            transition = %event.transition,
            queued = pending.len(),
            "queued notifications"
        );
        for item in pending {
            graph.enqueue(item);
        }
        Ok(())
    }

    fn description(&self) -> &'static str {
        "Queue notifications bound to the transition"
    }
}

/// Default notification actions installed on new jobs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultActions {
    #[serde(default)]
    pub workable: Vec<ActionSpec>,
    #[serde(default)]
    pub meta: Vec<ActionSpec>,
}

impl DefaultActions {
    pub fn for_kind(&self, is_meta: bool) -> &[ActionSpec] {
        if is_meta {
            &self.meta
        } else {
            &self.workable
        }
    }
}

/// Installs the defaults for the job's kind
pub fn attach_default_notifications(
    graph: &mut JobGraph,
    job_uuid: Uuid,
    defaults: &DefaultActions,
) -> JobflowResult<usize> {
    let is_meta = graph.job(job_uuid)?.is_meta;
    Ok(attach_actions(graph, job_uuid, defaults.for_kind(is_meta)))
}

/// Installs the actions an override asks for.
///
/// Without an override the defaults are installed. With `keep_defaults` the
/// override's actions are added on top of the defaults; otherwise they
/// replace them.
pub fn set_notifications_from_override(
    graph: &mut JobGraph,
    job_uuid: Uuid,
    defaults: &DefaultActions,
    notification_override: Option<&NotificationOverride>,
) -> JobflowResult<usize> {
    match notification_override {
        None => attach_default_notifications(graph, job_uuid, defaults),
        Some(spec) => {
            let mut installed = 0;
            if spec.keep_defaults {
                installed += attach_default_notifications(graph, job_uuid, defaults)?;
            }
            installed += attach_actions(graph, job_uuid, &spec.actions);
            Ok(installed)
        }
    }
}

/// Binds actions to a job, skipping bindings it already has
pub fn attach_actions(graph: &mut JobGraph, job_uuid: Uuid, specs: &[ActionSpec]) -> usize {
    specs
        .iter()
        .filter(|spec| graph.add_action(NotificationAction::from_spec(job_uuid, spec)))
        .count()
}
