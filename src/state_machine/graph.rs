//! # Job Graph
//!
//! In-memory arena holding one locked job tree for the duration of an
//! operation. Jobs are indexed by uuid and keep a parent link, so ancestor
//! walks are simple loops bounded by the tree depth.
//!
//! Every mutation goes through the graph, which records what changed. When
//! the operation finishes, [`JobGraph::into_changes`] yields the
//! [`ChangeSet`] to persist and the notifications queued along the way.

use crate::database::{ChangeSet, TreeSnapshot};
use crate::error::{JobflowError, JobflowResult};
use crate::models::{
    Job, JobOutput, Node, NotificationAction, NotificationOverride, StoredOverride,
};
use crate::notifications::PendingNotification;
use crate::state_machine::events::JobTransition;
use std::collections::{BTreeSet, HashMap, HashSet};
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct JobGraph {
    jobs: HashMap<Uuid, Job>,
    children: HashMap<Uuid, Vec<Uuid>>,
    outputs: HashMap<Uuid, Vec<JobOutput>>,
    nodes: HashMap<Uuid, Node>,
    actions: HashMap<Uuid, Vec<NotificationAction>>,
    overrides: HashMap<String, NotificationOverride>,

    dirty_jobs: Vec<Uuid>,
    dirty_job_set: HashSet<Uuid>,
    dirty_nodes: BTreeSet<Uuid>,
    inserted_outputs: Vec<Uuid>,
    deleted_outputs: Vec<Uuid>,
    new_actions: Vec<NotificationAction>,
    new_overrides: Vec<StoredOverride>,
    outbox: Vec<PendingNotification>,
}

impl JobGraph {
    /// Graph for a tree that does not exist yet
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: TreeSnapshot) -> Self {
        let mut graph = Self::new();
        for job in snapshot.jobs {
            graph.index_job(job);
        }
        for output in snapshot.outputs {
            graph.outputs.entry(output.job_uuid).or_default().push(output);
        }
        for node in snapshot.nodes {
            graph.nodes.insert(node.node_uuid, node);
        }
        for action in snapshot.actions {
            graph.actions.entry(action.job_uuid).or_default().push(action);
        }
        for stored in snapshot.overrides {
            graph.overrides.insert(stored.descendant_name, stored.spec);
        }
        graph
    }

    /// Makes nodes locked outside the tree available to the operation
    pub fn add_nodes(&mut self, nodes: impl IntoIterator<Item = Node>) {
        for node in nodes {
            self.nodes.entry(node.node_uuid).or_insert(node);
        }
    }

    fn index_job(&mut self, job: Job) {
        if let Some(parent_uuid) = job.parent_uuid {
            self.children.entry(parent_uuid).or_default().push(job.job_uuid);
        }
        self.jobs.insert(job.job_uuid, job);
    }

    fn mark_dirty(&mut self, job_uuid: Uuid) {
        if self.dirty_job_set.insert(job_uuid) {
            self.dirty_jobs.push(job_uuid);
        }
    }

    pub fn job(&self, job_uuid: Uuid) -> JobflowResult<&Job> {
        self.jobs
            .get(&job_uuid)
            .ok_or(JobflowError::JobNotFound(job_uuid))
    }

    /// Mutable access; the job is written back when the operation commits
    pub fn job_mut(&mut self, job_uuid: Uuid) -> JobflowResult<&mut Job> {
        if !self.jobs.contains_key(&job_uuid) {
            return Err(JobflowError::JobNotFound(job_uuid));
        }
        self.mark_dirty(job_uuid);
        self.jobs
            .get_mut(&job_uuid)
            .ok_or(JobflowError::JobNotFound(job_uuid))
    }

    pub fn insert_job(&mut self, job: Job) {
        let job_uuid = job.job_uuid;
        self.index_job(job);
        self.mark_dirty(job_uuid);
    }

    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.jobs.values()
    }

    /// Children of a job in creation order
    pub fn child_uuids(&self, parent_uuid: Uuid) -> Vec<Uuid> {
        self.children.get(&parent_uuid).cloned().unwrap_or_default()
    }

    pub fn children(&self, parent_uuid: Uuid) -> impl Iterator<Item = &Job> {
        self.children
            .get(&parent_uuid)
            .into_iter()
            .flatten()
            .filter_map(move |uuid| self.jobs.get(uuid))
    }

    /// Jobs below `job_uuid`, parents before children
    pub fn descendants(&self, job_uuid: Uuid) -> Vec<Uuid> {
        let mut found = Vec::new();
        let mut frontier = self.child_uuids(job_uuid);
        while !frontier.is_empty() {
            let mut next = Vec::new();
            for uuid in frontier {
                next.extend(self.child_uuids(uuid));
                found.push(uuid);
            }
            frontier = next;
        }
        found
    }

    /// Chain of job uuids from the root down to `job_uuid`
    pub fn parent_hierarchy(&self, job_uuid: Uuid) -> JobflowResult<Vec<Uuid>> {
        let mut chain = vec![job_uuid];
        let mut current = self.job(job_uuid)?;
        while let Some(parent_uuid) = current.parent_uuid {
            chain.push(parent_uuid);
            current = self.job(parent_uuid)?;
        }
        chain.reverse();
        Ok(chain)
    }

    /// `:`-joined relation names from the root, `None` for a root job
    pub fn full_child_name(&self, job_uuid: Uuid) -> JobflowResult<Option<String>> {
        let mut names = Vec::new();
        for uuid in self.parent_hierarchy(job_uuid)? {
            if let Some(name) = &self.job(uuid)?.child_name {
                names.push(name.as_str());
            }
        }
        Ok(if names.is_empty() {
            None
        } else {
            Some(names.join(&crate::constants::CHILD_NAME_SEPARATOR.to_string()))
        })
    }

    pub fn outputs(&self, job_uuid: Uuid) -> &[JobOutput] {
        self.outputs.get(&job_uuid).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn insert_output(&mut self, output: JobOutput) {
        self.inserted_outputs.push(output.output_uuid);
        self.outputs.entry(output.job_uuid).or_default().push(output);
    }

    /// Removes every output of a job, returning how many were removed
    pub fn wipe_outputs(&mut self, job_uuid: Uuid) -> usize {
        let removed = self.outputs.remove(&job_uuid).unwrap_or_default();
        for output in &removed {
            let staged = self
                .inserted_outputs
                .iter()
                .position(|uuid| *uuid == output.output_uuid);
            match staged {
                Some(index) => {
                    self.inserted_outputs.remove(index);
                }
                None => self.deleted_outputs.push(output.output_uuid),
            }
        }
        removed.len()
    }

    pub fn node(&self, node_uuid: Uuid) -> JobflowResult<&Node> {
        self.nodes
            .get(&node_uuid)
            .ok_or(JobflowError::NodeNotFound(node_uuid))
    }

    pub fn node_mut(&mut self, node_uuid: Uuid) -> JobflowResult<&mut Node> {
        let node = self
            .nodes
            .get_mut(&node_uuid)
            .ok_or(JobflowError::NodeNotFound(node_uuid))?;
        self.dirty_nodes.insert(node_uuid);
        Ok(node)
    }

    /// Clears a node's current job if it points at `job_uuid`
    pub fn clear_current_job(&mut self, node_uuid: Uuid, job_uuid: Uuid) -> JobflowResult<()> {
        if self.node(node_uuid)?.current_job == Some(job_uuid) {
            self.node_mut(node_uuid)?.current_job = None;
        }
        Ok(())
    }

    /// Actions bound to a job for one transition, in installation order
    pub fn actions_for(&self, job_uuid: Uuid, transition: JobTransition) -> Vec<&NotificationAction> {
        self.actions
            .get(&job_uuid)
            .into_iter()
            .flatten()
            .filter(|action| action.transition == transition)
            .collect()
    }

    /// Installs an action unless an identical binding already exists
    pub fn add_action(&mut self, action: NotificationAction) -> bool {
        let bound = self.actions.entry(action.job_uuid).or_default();
        if bound.iter().any(|existing| existing.key() == action.key()) {
            return false;
        }
        bound.push(action.clone());
        self.new_actions.push(action);
        true
    }

    /// Override registered at the root for a fully-qualified child name
    pub fn override_for(&self, descendant_name: &str) -> Option<&NotificationOverride> {
        self.overrides.get(descendant_name)
    }

    pub fn set_override(&mut self, root_uuid: Uuid, descendant_name: String, spec: NotificationOverride) {
        self.overrides.insert(descendant_name.clone(), spec.clone());
        self.new_overrides.retain(|o| o.descendant_name != descendant_name);
        self.new_overrides.push(StoredOverride {
            root_uuid,
            descendant_name,
            spec,
        });
    }

    pub fn enqueue(&mut self, notification: PendingNotification) {
        self.outbox.push(notification);
    }

    pub fn outbox(&self) -> &[PendingNotification] {
        &self.outbox
    }

    /// Consumes the graph into the writes to persist and the queued notifications
    pub fn into_changes(mut self) -> (ChangeSet, Vec<PendingNotification>) {
        let jobs = self
            .dirty_jobs
            .iter()
            .filter_map(|uuid| self.jobs.get(uuid))
            .cloned()
            .collect();
        let nodes = self
            .dirty_nodes
            .iter()
            .filter_map(|uuid| self.nodes.get(uuid))
            .cloned()
            .collect();
        let inserted: HashSet<Uuid> = self.inserted_outputs.iter().copied().collect();
        let mut inserted_outputs: Vec<JobOutput> = self
            .outputs
            .values()
            .flatten()
            .filter(|output| inserted.contains(&output.output_uuid))
            .cloned()
            .collect();
        inserted_outputs.sort_by_key(|output| (output.created_at, output.output_uuid));

        let changes = ChangeSet {
            deleted_outputs: std::mem::take(&mut self.deleted_outputs),
            jobs,
            nodes,
            inserted_outputs,
            actions: std::mem::take(&mut self.new_actions),
            overrides: std::mem::take(&mut self.new_overrides),
        };
        (changes, self.outbox)
    }
}
