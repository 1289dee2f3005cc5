//! # Dependency Resolver
//!
//! Decides which child relations of a meta-job can be instantiated now.
//!
//! A relation is eligible once every relation it depends on has a finished
//! job and it has no job of its own yet. Relations are tried in declaration
//! order; the first creation failure ends the pass and is reported back as
//! an error message rather than a caller error, because it turns into the
//! meta-job's `Errored` phase.
//!
//! The resolver runs when the meta-job is created, whenever one of its
//! children finishes, and when the meta-job is reset. A relation waiting on
//! several dependencies is therefore picked up on the finish of whichever
//! dependency happens to complete last.

use super::job_initializer::create_sub_job;
use crate::error::JobflowResult;
use crate::state_machine::states::JobPhase;
use crate::state_machine::JobStateMachine;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Result of one resolution pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionOutcome {
    /// Every declared relation has a finished job
    pub all_finished: bool,
    /// Message of the creation failure that ended the pass
    pub error: Option<String>,
    /// Jobs created during this pass, in creation order
    pub created: Vec<Uuid>,
}

pub struct DependencyResolver;

impl DependencyResolver {
    #[instrument(skip_all, fields(meta_uuid = %meta_uuid))]
    pub fn try_create_children(
        machine: &mut JobStateMachine<'_>,
        meta_uuid: Uuid,
    ) -> JobflowResult<ResolutionOutcome> {
        let template = machine.template_of(meta_uuid)?;
        let Some(meta) = template.as_meta() else {
            return Ok(ResolutionOutcome::default());
        };

        let mut finished: BTreeMap<String, Uuid> = BTreeMap::new();
        let mut instantiated: BTreeSet<String> = BTreeSet::new();
        for child in machine.graph().children(meta_uuid) {
            let Some(name) = child.child_name.clone() else {
                continue;
            };
            if child.phase() == JobPhase::Finished {
                finished.insert(name.clone(), child.job_uuid);
            }
            instantiated.insert(name);
        }

        if meta
            .children
            .iter()
            .all(|relation| finished.contains_key(&relation.name))
        {
            debug!(children = meta.children.len(), "all child relations finished");
            return Ok(ResolutionOutcome {
                all_finished: true,
                ..Default::default()
            });
        }

        let mut outcome = ResolutionOutcome::default();
        for relation in &meta.children {
            if instantiated.contains(&relation.name) {
                continue;
            }
            let dependencies = meta.dependency_names(&relation.name);
            if !dependencies.iter().all(|name| finished.contains_key(*name)) {
                debug!(relation = %relation.name, "waiting on dependencies");
                continue;
            }

            match create_sub_job(machine, meta_uuid, meta, relation, &finished) {
                Ok(job_uuid) => {
                    info!(relation = %relation.name, job_uuid = %job_uuid, "created child job");
                    outcome.created.push(job_uuid);
                }
                Err(error) => {
                    warn!(relation = %relation.name, error = %error, "failed to create child job");
                    outcome.error = Some(error.to_string());
                    break;
                }
            }
        }
        Ok(outcome)
    }
}
