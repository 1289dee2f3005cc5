//! # Job Engine
//!
//! Public entry point for every lifecycle operation.
//!
//! ## Overview
//!
//! Each operation runs as one store transaction:
//!
//! 1. lock the job's tree (root row first, then the nodes involved)
//! 2. load it into a [`JobGraph`] and apply the transition, including all
//!    propagation up and down the tree
//! 3. write the resulting change set and commit
//! 4. deliver the notifications queued by the transition
//!
//! Any error before the commit drops the transaction, so a failed operation
//! leaves no partial state behind. Notifications go out only after a
//! successful commit and delivery failures are logged, never returned.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use jobflow_core::database::MemoryJobStore;
//! use jobflow_core::notifications::{LoggingTransport, NotificationDispatcher};
//! use jobflow_core::orchestration::JobEngine;
//! use jobflow_core::state_machine::DefaultActions;
//! use jobflow_core::storage::MemoryBlobStore;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = JobEngine::bootstrap(
//!     MemoryJobStore::new(),
//!     Arc::new(MemoryBlobStore::new()),
//!     NotificationDispatcher::new(Arc::new(LoggingTransport)),
//!     DefaultActions::default(),
//! )
//! .await?;
//! let node = engine.register_node("gpu-01").await?;
//! # Ok(())
//! # }
//! ```

use super::job_initializer::{self, JobCreation};
use crate::database::{JobStore, StoreTransaction};
use crate::error::{JobflowError, JobflowResult};
use crate::models::{
    ActionSpec, InputValue, Job, JobOutput, JobTemplate, Node, NotificationAction,
    NotificationOverride, Principal, ValueType,
};
use crate::notifications::NotificationDispatcher;
use crate::registry::TemplateRegistry;
use crate::state_machine::{DefaultActions, JobGraph, JobPhase, JobStateMachine};
use crate::storage::BlobStore;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// A request to instantiate a template as a new root job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJobRequest {
    pub template_uuid: Uuid,
    pub creator: Principal,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub input_values: BTreeMap<String, InputValue>,
    #[serde(default)]
    pub parameter_values: BTreeMap<String, Value>,
    #[serde(default)]
    pub notification_override: Option<NotificationOverride>,
    /// Overrides for descendants, keyed by `:`-separated relation path
    #[serde(default)]
    pub child_notification_overrides: BTreeMap<String, NotificationOverride>,
}

impl CreateJobRequest {
    pub fn new(template_uuid: Uuid, creator: Principal) -> Self {
        Self {
            template_uuid,
            creator,
            description: String::new(),
            input_values: BTreeMap::new(),
            parameter_values: BTreeMap::new(),
            notification_override: None,
            child_notification_overrides: BTreeMap::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_input(mut self, name: impl Into<String>, value: InputValue) -> Self {
        self.input_values.insert(name.into(), value);
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: Value) -> Self {
        self.parameter_values.insert(name.into(), value);
        self
    }

    pub fn with_notification_override(mut self, spec: NotificationOverride) -> Self {
        self.notification_override = Some(spec);
        self
    }

    pub fn with_child_override(mut self, name: impl Into<String>, spec: NotificationOverride) -> Self {
        self.child_notification_overrides.insert(name.into(), spec);
        self
    }
}

pub struct JobEngine<S: JobStore> {
    store: Arc<S>,
    registry: Arc<TemplateRegistry>,
    blobs: Arc<dyn BlobStore>,
    dispatcher: NotificationDispatcher,
    defaults: DefaultActions,
}

impl<S: JobStore> std::fmt::Debug for JobEngine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobEngine")
            .field("templates", &self.registry.stats())
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

impl<S: JobStore> JobEngine<S> {
    pub fn new(
        store: S,
        registry: Arc<TemplateRegistry>,
        blobs: Arc<dyn BlobStore>,
        dispatcher: NotificationDispatcher,
        defaults: DefaultActions,
    ) -> Self {
        Self {
            store: Arc::new(store),
            registry,
            blobs,
            dispatcher,
            defaults,
        }
    }

    /// Builds an engine whose template registry is hydrated from the store
    pub async fn bootstrap(
        store: S,
        blobs: Arc<dyn BlobStore>,
        dispatcher: NotificationDispatcher,
        defaults: DefaultActions,
    ) -> JobflowResult<Self> {
        let templates = store.load_templates().await?;
        let registry = Arc::new(TemplateRegistry::hydrate(templates));
        Ok(Self::new(store, registry, blobs, dispatcher, defaults))
    }

    pub fn registry(&self) -> &TemplateRegistry {
        &self.registry
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    // ---- templates and nodes ----

    /// Validates and stores a template
    #[instrument(skip_all, fields(template = %template.identifier()))]
    pub async fn register_template(&self, template: JobTemplate) -> JobflowResult<Arc<JobTemplate>> {
        self.registry.validate(&template)?;
        self.store.insert_template(&template).await?;
        Ok(self.registry.insert(template))
    }

    /// Retires a template. Existing jobs keep working; new jobs are refused.
    #[instrument(skip(self))]
    pub async fn retire_template(&self, template_uuid: Uuid) -> JobflowResult<()> {
        let deleted_at = Utc::now();
        if !self.store.retire_template(template_uuid, deleted_at).await? {
            return Err(JobflowError::TemplateNotFound(template_uuid.to_string()));
        }
        self.registry.retire(template_uuid, deleted_at);
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn register_node(&self, name: &str) -> JobflowResult<Node> {
        let node = Node::new(name);
        self.store.insert_node(&node).await?;
        info!(node_uuid = %node.node_uuid, "node registered");
        Ok(node)
    }

    // ---- lifecycle ----

    /// Creates a root job; a meta-template also gets its first children
    #[instrument(skip_all, fields(template_uuid = %request.template_uuid))]
    pub async fn create_job(&self, request: CreateJobRequest) -> JobflowResult<Job> {
        let template = self
            .registry
            .get(request.template_uuid)
            .ok_or_else(|| JobflowError::TemplateNotFound(request.template_uuid.to_string()))?;

        let tx = self.store.begin().await?;
        let mut graph = JobGraph::new();
        let job_uuid = {
            let mut machine = JobStateMachine::new(&mut graph, &*self.registry, &self.defaults);
            job_initializer::create_job(
                &mut machine,
                JobCreation {
                    template,
                    creator: request.creator,
                    description: request.description,
                    input_values: request.input_values,
                    parameter_values: request.parameter_values,
                    notification_override: request.notification_override,
                    child_notification_overrides: request.child_notification_overrides,
                },
            )?
        };
        let job = graph.job(job_uuid)?.clone();
        self.commit(tx, graph).await?;

        info!(job_uuid = %job_uuid, phase = %job.phase(), "job created");
        Ok(job)
    }

    #[instrument(skip(self))]
    pub async fn acquire(&self, job_uuid: Uuid, node_uuid: Uuid) -> JobflowResult<JobPhase> {
        self.with_tree(job_uuid, &[node_uuid], |machine| {
            machine.acquire(job_uuid, node_uuid)
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn release(&self, job_uuid: Uuid) -> JobflowResult<JobPhase> {
        self.with_tree(job_uuid, &[], |machine| machine.release(job_uuid))
            .await
    }

    #[instrument(skip(self))]
    pub async fn start(&self, job_uuid: Uuid, node_uuid: Uuid) -> JobflowResult<JobPhase> {
        self.with_tree(job_uuid, &[node_uuid], |machine| {
            machine.start(job_uuid, node_uuid)
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn finish(&self, job_uuid: Uuid, node_uuid: Uuid) -> JobflowResult<JobPhase> {
        self.with_tree(job_uuid, &[node_uuid], |machine| {
            machine.finish(job_uuid, node_uuid)
        })
        .await
    }

    #[instrument(skip(self, error))]
    pub async fn finish_with_error(
        &self,
        job_uuid: Uuid,
        node_uuid: Uuid,
        error: &str,
    ) -> JobflowResult<JobPhase> {
        self.with_tree(job_uuid, &[node_uuid], |machine| {
            machine.finish_with_error(job_uuid, node_uuid, error)
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn reset(&self, job_uuid: Uuid) -> JobflowResult<JobPhase> {
        self.with_tree(job_uuid, &[], |machine| machine.reset(job_uuid))
            .await
    }

    #[instrument(skip(self))]
    pub async fn abort(&self, job_uuid: Uuid) -> JobflowResult<JobPhase> {
        self.with_tree(job_uuid, &[], |machine| machine.abort(job_uuid))
            .await
    }

    /// Stores the payload, then records the output on the started job
    #[instrument(skip(self, data), fields(bytes = data.len()))]
    pub async fn add_output(
        &self,
        job_uuid: Uuid,
        name: &str,
        value_type: ValueType,
        data: Vec<u8>,
        creator: &Principal,
    ) -> JobflowResult<JobOutput> {
        let blob = self.blobs.put(data).await?;
        let creator_uuid = creator.user_uuid;
        self.with_tree(job_uuid, &[], move |machine| {
            machine.add_output(job_uuid, name, value_type, blob, creator_uuid)
        })
        .await
    }

    // ---- notifications ----

    /// Registers overrides for descendants of a root meta-job that have not
    /// been created yet
    #[instrument(skip(self, overrides), fields(count = overrides.len()))]
    pub async fn attach_notification_overrides(
        &self,
        job_uuid: Uuid,
        overrides: BTreeMap<String, NotificationOverride>,
    ) -> JobflowResult<()> {
        self.with_tree(job_uuid, &[], move |machine| {
            machine.attach_notification_overrides(job_uuid, overrides)
        })
        .await
    }

    /// Binds actions to a job, returning how many were new
    #[instrument(skip(self, actions), fields(count = actions.len()))]
    pub async fn attach_notifications(
        &self,
        job_uuid: Uuid,
        actions: &[ActionSpec],
    ) -> JobflowResult<usize> {
        self.with_tree(job_uuid, &[], |machine| {
            machine.attach_notifications(job_uuid, actions)
        })
        .await
    }

    // ---- queries ----

    pub async fn get_job(&self, job_uuid: Uuid) -> JobflowResult<Job> {
        self.store
            .find_job(job_uuid)
            .await?
            .ok_or(JobflowError::JobNotFound(job_uuid))
    }

    pub async fn get_children(&self, job_uuid: Uuid) -> JobflowResult<Vec<Job>> {
        self.get_job(job_uuid).await?;
        Ok(self.store.find_children(job_uuid).await?)
    }

    pub async fn get_outputs(&self, job_uuid: Uuid) -> JobflowResult<Vec<JobOutput>> {
        self.get_job(job_uuid).await?;
        Ok(self.store.find_outputs(job_uuid).await?)
    }

    /// Notification actions bound to a job, in binding order
    pub async fn get_actions(&self, job_uuid: Uuid) -> JobflowResult<Vec<NotificationAction>> {
        self.get_job(job_uuid).await?;
        Ok(self.store.find_actions(job_uuid).await?)
    }

    pub async fn get_node(&self, node_uuid: Uuid) -> JobflowResult<Node> {
        self.store
            .find_node(node_uuid)
            .await?
            .ok_or(JobflowError::NodeNotFound(node_uuid))
    }

    /// Payload of a job's output
    pub async fn read_output(&self, job_uuid: Uuid, name: &str) -> JobflowResult<Vec<u8>> {
        let output = self
            .get_outputs(job_uuid)
            .await?
            .into_iter()
            .find(|output| output.name == name)
            .ok_or_else(|| JobflowError::BadName(format!("job {job_uuid} has no output '{name}'")))?;
        Ok(self.blobs.get(&output.blob).await?)
    }

    /// Soft-deletes a whole tree, aborting it first unless it finished
    #[instrument(skip(self))]
    pub async fn delete_job(&self, job_uuid: Uuid) -> JobflowResult<usize> {
        self.with_tree(job_uuid, &[], |machine| {
            let job = machine.graph().job(job_uuid)?;
            if !job.is_root() {
                return Err(JobflowError::NotRootJob(job_uuid));
            }
            if job.phase() != JobPhase::Finished {
                machine.abort(job_uuid)?;
            }

            let deleted_at = Utc::now();
            let tree: Vec<Uuid> = machine.graph().jobs().map(|job| job.job_uuid).collect();
            for uuid in &tree {
                machine.graph.job_mut(*uuid)?.deleted_at = Some(deleted_at);
            }
            Ok(tree.len())
        })
        .await
    }

    /// Runs `op` against the locked tree containing `job_uuid` and persists
    /// the result
    async fn with_tree<T, F>(&self, job_uuid: Uuid, node_uuids: &[Uuid], op: F) -> JobflowResult<T>
    where
        F: FnOnce(&mut JobStateMachine<'_>) -> JobflowResult<T>,
    {
        let mut tx = self.store.begin().await?;
        let snapshot = tx
            .lock_tree(job_uuid, node_uuids)
            .await?
            .ok_or(JobflowError::JobNotFound(job_uuid))?;
        let mut graph = JobGraph::from_snapshot(snapshot);

        let result = {
            let mut machine = JobStateMachine::new(&mut graph, &*self.registry, &self.defaults);
            op(&mut machine)?
        };
        self.commit(tx, graph).await?;
        Ok(result)
    }

    async fn commit(&self, mut tx: S::Tx, graph: JobGraph) -> JobflowResult<()> {
        let (changes, outbox) = graph.into_changes();
        if !changes.is_empty() {
            tx.apply(&changes).await?;
        }
        tx.commit().await?;
        debug!(
            jobs = changes.jobs.len(),
            outputs = changes.inserted_outputs.len(),
            notifications = outbox.len(),
            "changes committed"
        );
        self.dispatcher.dispatch_all(outbox).await;
        Ok(())
    }
}
