//! # Store Traits
//!
//! Every state-changing operation runs inside one [`StoreTransaction`]:
//!
//! 1. [`StoreTransaction::lock_tree`] locks the root row of the job's tree,
//!    then the involved node rows in uuid order, and returns a snapshot of
//!    the whole tree.
//! 2. The caller mutates an in-memory copy of the snapshot and produces a
//!    [`ChangeSet`].
//! 3. [`StoreTransaction::apply`] writes the change set and
//!    [`StoreTransaction::commit`] makes it visible.
//!
//! Dropping a transaction without committing discards everything it staged.
//! Locking at the root serialises all transitions within one tree, which is
//! what parent propagation needs: a child's finish may rewrite every ancestor.

use super::error::PersistenceResult;
use crate::models::{Job, JobOutput, JobTemplate, Node, NotificationAction, StoredOverride};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Locked view of one job tree
#[derive(Debug, Clone, Default)]
pub struct TreeSnapshot {
    pub jobs: Vec<Job>,
    pub outputs: Vec<JobOutput>,
    pub nodes: Vec<Node>,
    pub actions: Vec<NotificationAction>,
    pub overrides: Vec<StoredOverride>,
}

/// Writes produced by one operation, applied in field order
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    /// Outputs removed by a wipe
    pub deleted_outputs: Vec<Uuid>,
    /// Inserted or updated jobs; inserted jobs come after their parents
    pub jobs: Vec<Job>,
    pub nodes: Vec<Node>,
    pub inserted_outputs: Vec<JobOutput>,
    /// New actions; an action whose key already exists is skipped
    pub actions: Vec<NotificationAction>,
    /// Overrides replace any existing override for the same descendant
    pub overrides: Vec<StoredOverride>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.deleted_outputs.is_empty()
            && self.jobs.is_empty()
            && self.nodes.is_empty()
            && self.inserted_outputs.is_empty()
            && self.actions.is_empty()
            && self.overrides.is_empty()
    }
}

#[async_trait]
pub trait StoreTransaction: Send {
    /// Locks the tree containing `job_uuid` and the given nodes.
    ///
    /// Nodes referenced by jobs of the tree are locked as well. Returns
    /// `None` when the job does not exist or has been deleted.
    async fn lock_tree(
        &mut self,
        job_uuid: Uuid,
        node_uuids: &[Uuid],
    ) -> PersistenceResult<Option<TreeSnapshot>>;

    async fn apply(&mut self, changes: &ChangeSet) -> PersistenceResult<()>;

    async fn commit(self) -> PersistenceResult<()>;
}

/// Repository for templates, jobs, nodes and notification bindings
#[async_trait]
pub trait JobStore: Send + Sync + 'static {
    type Tx: StoreTransaction;

    async fn begin(&self) -> PersistenceResult<Self::Tx>;

    /// Inserts a template. `(name, version)` must be unique among live templates.
    async fn insert_template(&self, template: &JobTemplate) -> PersistenceResult<()>;

    /// Soft-deletes a template, returning whether a live template was retired
    async fn retire_template(
        &self,
        template_uuid: Uuid,
        deleted_at: DateTime<Utc>,
    ) -> PersistenceResult<bool>;

    /// All templates, retired ones included, oldest first
    async fn load_templates(&self) -> PersistenceResult<Vec<JobTemplate>>;

    async fn insert_node(&self, node: &Node) -> PersistenceResult<()>;

    async fn find_node(&self, node_uuid: Uuid) -> PersistenceResult<Option<Node>>;

    /// A live job by uuid
    async fn find_job(&self, job_uuid: Uuid) -> PersistenceResult<Option<Job>>;

    /// Live children of a job, oldest first
    async fn find_children(&self, parent_uuid: Uuid) -> PersistenceResult<Vec<Job>>;

    async fn find_outputs(&self, job_uuid: Uuid) -> PersistenceResult<Vec<JobOutput>>;

    async fn find_actions(&self, job_uuid: Uuid) -> PersistenceResult<Vec<NotificationAction>>;
}
