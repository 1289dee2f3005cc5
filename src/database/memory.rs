//! In-process [`JobStore`] used by tests and single-process deployments.
//!
//! All state sits behind one async mutex. A transaction holds the mutex from
//! `begin` until it is committed or dropped, so transactions are fully
//! serialised; staged changes only reach the shared state on commit.

use super::error::{constraint_violation, PersistenceResult};
use super::store::{ChangeSet, JobStore, StoreTransaction, TreeSnapshot};
use crate::models::{Job, JobOutput, JobTemplate, Node, NotificationAction, StoredOverride};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Debug, Default)]
struct MemoryState {
    templates: Vec<JobTemplate>,
    jobs: HashMap<Uuid, Job>,
    outputs: Vec<JobOutput>,
    nodes: HashMap<Uuid, Node>,
    actions: Vec<NotificationAction>,
    overrides: Vec<StoredOverride>,
}

impl MemoryState {
    fn live_job(&self, job_uuid: Uuid) -> Option<&Job> {
        self.jobs.get(&job_uuid).filter(|job| !job.is_deleted())
    }

    fn snapshot(&self, root_uuid: Uuid, node_uuids: &[Uuid]) -> TreeSnapshot {
        let mut jobs: Vec<Job> = self
            .jobs
            .values()
            .filter(|job| job.root_uuid == root_uuid && !job.is_deleted())
            .cloned()
            .collect();
        jobs.sort_by_key(|job| (job.created_at, job.job_uuid));

        let job_uuids: BTreeSet<Uuid> = jobs.iter().map(|job| job.job_uuid).collect();
        let node_uuids: BTreeSet<Uuid> = node_uuids
            .iter()
            .copied()
            .chain(jobs.iter().filter_map(|job| job.node_uuid))
            .collect();

        TreeSnapshot {
            outputs: self
                .outputs
                .iter()
                .filter(|output| job_uuids.contains(&output.job_uuid))
                .cloned()
                .collect(),
            nodes: node_uuids
                .iter()
                .filter_map(|uuid| self.nodes.get(uuid))
                .cloned()
                .collect(),
            actions: self
                .actions
                .iter()
                .filter(|action| job_uuids.contains(&action.job_uuid))
                .cloned()
                .collect(),
            overrides: self
                .overrides
                .iter()
                .filter(|o| o.root_uuid == root_uuid)
                .cloned()
                .collect(),
            jobs,
        }
    }

    fn apply(&mut self, changes: ChangeSet) {
        self.outputs
            .retain(|output| !changes.deleted_outputs.contains(&output.output_uuid));
        for job in changes.jobs {
            self.jobs.insert(job.job_uuid, job);
        }
        for node in changes.nodes {
            self.nodes.insert(node.node_uuid, node);
        }
        self.outputs.extend(changes.inserted_outputs);
        for action in changes.actions {
            if !self.actions.iter().any(|a| a.key() == action.key()) {
                self.actions.push(action);
            }
        }
        for stored in changes.overrides {
            self.overrides.retain(|o| {
                o.root_uuid != stored.root_uuid || o.descendant_name != stored.descendant_name
            });
            self.overrides.push(stored);
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryJobStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

pub struct MemoryTransaction {
    state: OwnedMutexGuard<MemoryState>,
    staged: Vec<ChangeSet>,
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn lock_tree(
        &mut self,
        job_uuid: Uuid,
        node_uuids: &[Uuid],
    ) -> PersistenceResult<Option<TreeSnapshot>> {
        let Some(root_uuid) = self.state.live_job(job_uuid).map(|job| job.root_uuid) else {
            return Ok(None);
        };
        Ok(Some(self.state.snapshot(root_uuid, node_uuids)))
    }

    async fn apply(&mut self, changes: &ChangeSet) -> PersistenceResult<()> {
        self.staged.push(changes.clone());
        Ok(())
    }

    async fn commit(mut self) -> PersistenceResult<()> {
        for changes in std::mem::take(&mut self.staged) {
            self.state.apply(changes);
        }
        Ok(())
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    type Tx = MemoryTransaction;

    async fn begin(&self) -> PersistenceResult<Self::Tx> {
        Ok(MemoryTransaction {
            state: self.state.clone().lock_owned().await,
            staged: Vec::new(),
        })
    }

    async fn insert_template(&self, template: &JobTemplate) -> PersistenceResult<()> {
        let mut state = self.state.lock().await;
        let duplicate = state.templates.iter().any(|t| {
            t.template_uuid == template.template_uuid
                || (!t.is_deleted() && t.name == template.name && t.version == template.version)
        });
        if duplicate {
            return Err(constraint_violation(format!(
                "jf_job_templates_name_version ({})",
                template.identifier()
            )));
        }
        state.templates.push(template.clone());
        Ok(())
    }

    async fn retire_template(
        &self,
        template_uuid: Uuid,
        deleted_at: DateTime<Utc>,
    ) -> PersistenceResult<bool> {
        let mut state = self.state.lock().await;
        let live = state
            .templates
            .iter_mut()
            .find(|t| t.template_uuid == template_uuid && !t.is_deleted());
        Ok(match live {
            Some(template) => {
                template.deleted_at = Some(deleted_at);
                true
            }
            None => false,
        })
    }

    async fn load_templates(&self) -> PersistenceResult<Vec<JobTemplate>> {
        let mut templates = self.state.lock().await.templates.clone();
        templates.sort_by_key(|t| t.created_at);
        Ok(templates)
    }

    async fn insert_node(&self, node: &Node) -> PersistenceResult<()> {
        let mut state = self.state.lock().await;
        if state.nodes.contains_key(&node.node_uuid) {
            return Err(constraint_violation(format!("jf_nodes_pkey ({})", node.node_uuid)));
        }
        state.nodes.insert(node.node_uuid, node.clone());
        Ok(())
    }

    async fn find_node(&self, node_uuid: Uuid) -> PersistenceResult<Option<Node>> {
        Ok(self.state.lock().await.nodes.get(&node_uuid).cloned())
    }

    async fn find_job(&self, job_uuid: Uuid) -> PersistenceResult<Option<Job>> {
        Ok(self.state.lock().await.live_job(job_uuid).cloned())
    }

    async fn find_children(&self, parent_uuid: Uuid) -> PersistenceResult<Vec<Job>> {
        let state = self.state.lock().await;
        let mut children: Vec<Job> = state
            .jobs
            .values()
            .filter(|job| job.parent_uuid == Some(parent_uuid) && !job.is_deleted())
            .cloned()
            .collect();
        children.sort_by_key(|job| (job.created_at, job.job_uuid));
        Ok(children)
    }

    async fn find_outputs(&self, job_uuid: Uuid) -> PersistenceResult<Vec<JobOutput>> {
        let state = self.state.lock().await;
        Ok(state
            .outputs
            .iter()
            .filter(|output| output.job_uuid == job_uuid)
            .cloned()
            .collect())
    }

    async fn find_actions(&self, job_uuid: Uuid) -> PersistenceResult<Vec<NotificationAction>> {
        let state = self.state.lock().await;
        Ok(state
            .actions
            .iter()
            .filter(|action| action.job_uuid == job_uuid)
            .cloned()
            .collect())
    }
}
