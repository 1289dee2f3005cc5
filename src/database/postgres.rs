//! # PostgreSQL Store
//!
//! [`JobStore`] backed by PostgreSQL through sqlx. Queries are checked at
//! runtime so the crate builds without a live database. Value maps, template
//! definitions and notifications are stored as JSONB.
//!
//! Tree locking takes `SELECT ... FOR UPDATE` on the root job row, then on
//! the node rows in uuid order. Every transaction follows that order, so two
//! transactions can wait on each other's rows but never deadlock.

use super::error::{constraint_violation, invalid_row, PersistenceResult};
use super::store::{ChangeSet, JobStore, StoreTransaction, TreeSnapshot};
use crate::models::{
    Job, JobOutput, JobTemplate, Node, Notification, NotificationAction, NotificationOverride,
    Principal, StoredOverride, ValueType,
};
use crate::state_machine::events::JobTransition;
use crate::state_machine::states::JobPhase;
use crate::storage::BlobHandle;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::collections::BTreeSet;
use tracing::{debug, info};
use uuid::Uuid;

/// Embedded schema migrations
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

const JOB_COLUMNS: &str = "job_uuid, template_uuid, root_uuid, parent_uuid, child_name, is_meta, \
     creator_uuid, creator_email, description, input_values, parameter_values, node_uuid, \
     start_time, end_time, error, phase, created_at, deleted_at";

const OUTPUT_COLUMNS: &str =
    "output_uuid, job_uuid, name, value_type, blob_handle, creator_uuid, created_at";

#[derive(Debug, Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects using the database section of the configuration
    pub async fn connect(url: &str, max_connections: u32) -> PersistenceResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        info!(max_connections, "connected to job store database");
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> PersistenceResult<()> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

pub struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

fn parse_job(row: &PgRow) -> PersistenceResult<Job> {
    let phase: String = row.try_get("phase")?;
    Ok(Job {
        job_uuid: row.try_get("job_uuid")?,
        template_uuid: row.try_get("template_uuid")?,
        root_uuid: row.try_get("root_uuid")?,
        parent_uuid: row.try_get("parent_uuid")?,
        child_name: row.try_get("child_name")?,
        is_meta: row.try_get("is_meta")?,
        creator: Principal::new(row.try_get("creator_uuid")?, row.try_get("creator_email")?),
        description: row.try_get("description")?,
        input_values: serde_json::from_value(row.try_get("input_values")?)?,
        parameter_values: serde_json::from_value(row.try_get("parameter_values")?)?,
        node_uuid: row.try_get("node_uuid")?,
        start_time: row.try_get("start_time")?,
        end_time: row.try_get("end_time")?,
        error: row.try_get("error")?,
        phase: phase
            .parse::<JobPhase>()
            .map_err(|e| invalid_row("jf_jobs.phase", e))?,
        created_at: row.try_get("created_at")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

fn parse_output(row: &PgRow) -> PersistenceResult<JobOutput> {
    let value_type: String = row.try_get("value_type")?;
    let blob: String = row.try_get("blob_handle")?;
    Ok(JobOutput {
        output_uuid: row.try_get("output_uuid")?,
        job_uuid: row.try_get("job_uuid")?,
        name: row.try_get("name")?,
        value_type: value_type
            .parse::<ValueType>()
            .map_err(|e| invalid_row("jf_job_outputs.value_type", e))?,
        blob: BlobHandle::from_hex(blob),
        creator_uuid: row.try_get("creator_uuid")?,
        created_at: row.try_get("created_at")?,
    })
}

fn parse_node(row: &PgRow) -> PersistenceResult<Node> {
    Ok(Node {
        node_uuid: row.try_get("node_uuid")?,
        name: row.try_get("name")?,
        current_job: row.try_get("current_job")?,
        created_at: row.try_get("created_at")?,
    })
}

fn parse_action(row: &PgRow) -> PersistenceResult<NotificationAction> {
    let transition: String = row.try_get("transition")?;
    let notification: Notification = serde_json::from_value(row.try_get("definition")?)?;
    Ok(NotificationAction {
        job_uuid: row.try_get("job_uuid")?,
        transition: transition
            .parse::<JobTransition>()
            .map_err(|e| invalid_row("jf_notification_actions.transition", e))?,
        notification_uuid: row.try_get("notification_uuid")?,
        notification,
        suppress_for_parent: row.try_get("suppress_for_parent")?,
    })
}

fn parse_template(row: &PgRow) -> PersistenceResult<JobTemplate> {
    let mut template: JobTemplate = serde_json::from_value(row.try_get("definition")?)?;
    template.template_uuid = row.try_get("template_uuid")?;
    template.created_at = row.try_get("created_at")?;
    template.deleted_at = row.try_get("deleted_at")?;
    Ok(template)
}

impl PgTransaction {
    /// Locks node rows in uuid order
    async fn lock_nodes(&mut self, node_uuids: &[Uuid]) -> PersistenceResult<Vec<Node>> {
        let ordered: Vec<Uuid> = node_uuids
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if ordered.is_empty() {
            return Ok(Vec::new());
        }

        sqlx::query(
            "SELECT node_uuid, name, current_job, created_at FROM jf_nodes \
             WHERE node_uuid = ANY($1) ORDER BY node_uuid FOR UPDATE",
        )
        .bind(ordered)
        .fetch_all(&mut *self.tx)
        .await?
        .iter()
        .map(parse_node)
        .collect()
    }

    async fn upsert_job(&mut self, job: &Job) -> PersistenceResult<()> {
        sqlx::query(
            r#"
            INSERT INTO jf_jobs (
                job_uuid, template_uuid, root_uuid, parent_uuid, child_name, is_meta,
                creator_uuid, creator_email, description, input_values, parameter_values,
                node_uuid, start_time, end_time, error, phase, created_at, deleted_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            ON CONFLICT (job_uuid) DO UPDATE SET
                description = EXCLUDED.description,
                node_uuid = EXCLUDED.node_uuid,
                start_time = EXCLUDED.start_time,
                end_time = EXCLUDED.end_time,
                error = EXCLUDED.error,
                phase = EXCLUDED.phase,
                deleted_at = EXCLUDED.deleted_at
            "#,
        )
        .bind(job.job_uuid)
        .bind(job.template_uuid)
        .bind(job.root_uuid)
        .bind(job.parent_uuid)
        .bind(&job.child_name)
        .bind(job.is_meta)
        .bind(job.creator.user_uuid)
        .bind(&job.creator.email)
        .bind(&job.description)
        .bind(serde_json::to_value(&job.input_values)?)
        .bind(serde_json::to_value(&job.parameter_values)?)
        .bind(job.node_uuid)
        .bind(job.start_time)
        .bind(job.end_time)
        .bind(&job.error)
        .bind(job.phase.to_string())
        .bind(job.created_at)
        .bind(job.deleted_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_action(&mut self, action: &NotificationAction) -> PersistenceResult<()> {
        sqlx::query(
            r#"
            INSERT INTO jf_notifications (notification_uuid, kind, definition)
            VALUES ($1, $2, $3)
            ON CONFLICT (notification_uuid) DO NOTHING
            "#,
        )
        .bind(action.notification_uuid)
        .bind(action.notification.kind())
        .bind(serde_json::to_value(&action.notification)?)
        .execute(&mut *self.tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO jf_notification_actions
                (job_uuid, transition, notification_uuid, suppress_for_parent)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (job_uuid, transition, notification_uuid) DO NOTHING
            "#,
        )
        .bind(action.job_uuid)
        .bind(action.transition.as_str())
        .bind(action.notification_uuid)
        .bind(action.suppress_for_parent)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl StoreTransaction for PgTransaction {
    async fn lock_tree(
        &mut self,
        job_uuid: Uuid,
        node_uuids: &[Uuid],
    ) -> PersistenceResult<Option<TreeSnapshot>> {
        let root_uuid: Option<Uuid> = sqlx::query_scalar(
            "SELECT root_uuid FROM jf_jobs WHERE job_uuid = $1 AND deleted_at IS NULL",
        )
        .bind(job_uuid)
        .fetch_optional(&mut *self.tx)
        .await?;
        let Some(root_uuid) = root_uuid else {
            return Ok(None);
        };

        let locked: Option<Uuid> = sqlx::query_scalar(
            "SELECT job_uuid FROM jf_jobs WHERE job_uuid = $1 AND deleted_at IS NULL FOR UPDATE",
        )
        .bind(root_uuid)
        .fetch_optional(&mut *self.tx)
        .await?;
        if locked.is_none() {
            return Ok(None);
        }

        let jobs = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jf_jobs \
             WHERE root_uuid = $1 AND deleted_at IS NULL \
             ORDER BY created_at, job_uuid"
        ))
        .bind(root_uuid)
        .fetch_all(&mut *self.tx)
        .await?
        .iter()
        .map(parse_job)
        .collect::<PersistenceResult<Vec<_>>>()?;

        let job_uuids: Vec<Uuid> = jobs.iter().map(|job| job.job_uuid).collect();
        let wanted_nodes: Vec<Uuid> = node_uuids
            .iter()
            .copied()
            .chain(jobs.iter().filter_map(|job| job.node_uuid))
            .collect();
        let nodes = self.lock_nodes(&wanted_nodes).await?;

        let outputs = sqlx::query(&format!(
            "SELECT {OUTPUT_COLUMNS} FROM jf_job_outputs \
             WHERE job_uuid = ANY($1) ORDER BY created_at, output_uuid"
        ))
        .bind(job_uuids.clone())
        .fetch_all(&mut *self.tx)
        .await?
        .iter()
        .map(parse_output)
        .collect::<PersistenceResult<Vec<_>>>()?;

        let actions = sqlx::query(
            r#"
            SELECT a.job_uuid, a.transition, a.notification_uuid, a.suppress_for_parent,
                   n.definition
            FROM jf_notification_actions a
            JOIN jf_notifications n ON n.notification_uuid = a.notification_uuid
            WHERE a.job_uuid = ANY($1)
            ORDER BY a.position
            "#,
        )
        .bind(job_uuids.clone())
        .fetch_all(&mut *self.tx)
        .await?
        .iter()
        .map(parse_action)
        .collect::<PersistenceResult<Vec<_>>>()?;

        let overrides = sqlx::query(
            "SELECT descendant_name, definition FROM jf_notification_overrides WHERE root_uuid = $1",
        )
        .bind(root_uuid)
        .fetch_all(&mut *self.tx)
        .await?
        .iter()
        .map(|row| -> PersistenceResult<StoredOverride> {
            let spec: NotificationOverride = serde_json::from_value(row.try_get("definition")?)?;
            Ok(StoredOverride {
                root_uuid,
                descendant_name: row.try_get("descendant_name")?,
                spec,
            })
        })
        .collect::<PersistenceResult<Vec<_>>>()?;

        debug!(
            root_uuid = %root_uuid,
            jobs = jobs.len(),
            nodes = nodes.len(),
            "locked job tree"
        );

        Ok(Some(TreeSnapshot {
            jobs,
            outputs,
            nodes,
            actions,
            overrides,
        }))
    }

    async fn apply(&mut self, changes: &ChangeSet) -> PersistenceResult<()> {
        if !changes.deleted_outputs.is_empty() {
            sqlx::query("DELETE FROM jf_job_outputs WHERE output_uuid = ANY($1)")
                .bind(changes.deleted_outputs.clone())
                .execute(&mut *self.tx)
                .await?;
        }

        for job in &changes.jobs {
            self.upsert_job(job).await?;
        }

        for node in &changes.nodes {
            sqlx::query("UPDATE jf_nodes SET current_job = $2 WHERE node_uuid = $1")
                .bind(node.node_uuid)
                .bind(node.current_job)
                .execute(&mut *self.tx)
                .await?;
        }

        for output in &changes.inserted_outputs {
            let result = sqlx::query(&format!(
                "INSERT INTO jf_job_outputs ({OUTPUT_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7) \
                 ON CONFLICT ON CONSTRAINT jf_job_outputs_name_type DO NOTHING"
            ))
            .bind(output.output_uuid)
            .bind(output.job_uuid)
            .bind(&output.name)
            .bind(output.value_type.to_string())
            .bind(output.blob.as_str())
            .bind(output.creator_uuid)
            .bind(output.created_at)
            .execute(&mut *self.tx)
            .await?;
            if result.rows_affected() == 0 {
                return Err(constraint_violation(format!(
                    "jf_job_outputs_name_type ({}, {})",
                    output.name, output.value_type
                )));
            }
        }

        for action in &changes.actions {
            self.insert_action(action).await?;
        }

        for stored in &changes.overrides {
            sqlx::query(
                r#"
                INSERT INTO jf_notification_overrides (root_uuid, descendant_name, definition)
                VALUES ($1, $2, $3)
                ON CONFLICT (root_uuid, descendant_name) DO UPDATE SET definition = EXCLUDED.definition
                "#,
            )
            .bind(stored.root_uuid)
            .bind(&stored.descendant_name)
            .bind(serde_json::to_value(&stored.spec)?)
            .execute(&mut *self.tx)
            .await?;
        }

        Ok(())
    }

    async fn commit(self) -> PersistenceResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    type Tx = PgTransaction;

    async fn begin(&self) -> PersistenceResult<Self::Tx> {
        Ok(PgTransaction {
            tx: self.pool.begin().await?,
        })
    }

    async fn insert_template(&self, template: &JobTemplate) -> PersistenceResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO jf_job_templates
                (template_uuid, name, version, is_meta, definition, created_at, deleted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(template.template_uuid)
        .bind(&template.name)
        .bind(&template.version)
        .bind(template.is_meta())
        .bind(serde_json::to_value(template)?)
        .bind(template.created_at)
        .bind(template.deleted_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(constraint_violation(format!(
                "jf_job_templates_name_version ({})",
                template.identifier()
            )));
        }
        Ok(())
    }

    async fn retire_template(
        &self,
        template_uuid: Uuid,
        deleted_at: DateTime<Utc>,
    ) -> PersistenceResult<bool> {
        let result = sqlx::query(
            "UPDATE jf_job_templates SET deleted_at = $2 \
             WHERE template_uuid = $1 AND deleted_at IS NULL",
        )
        .bind(template_uuid)
        .bind(deleted_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn load_templates(&self) -> PersistenceResult<Vec<JobTemplate>> {
        sqlx::query(
            "SELECT template_uuid, definition, created_at, deleted_at FROM jf_job_templates \
             ORDER BY created_at, template_uuid",
        )
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(parse_template)
        .collect()
    }

    async fn insert_node(&self, node: &Node) -> PersistenceResult<()> {
        sqlx::query(
            "INSERT INTO jf_nodes (node_uuid, name, current_job, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(node.node_uuid)
        .bind(&node.name)
        .bind(node.current_job)
        .bind(node.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_node(&self, node_uuid: Uuid) -> PersistenceResult<Option<Node>> {
        sqlx::query("SELECT node_uuid, name, current_job, created_at FROM jf_nodes WHERE node_uuid = $1")
            .bind(node_uuid)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(parse_node)
            .transpose()
    }

    async fn find_job(&self, job_uuid: Uuid) -> PersistenceResult<Option<Job>> {
        sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jf_jobs WHERE job_uuid = $1 AND deleted_at IS NULL"
        ))
        .bind(job_uuid)
        .fetch_optional(&self.pool)
        .await?
        .as_ref()
        .map(parse_job)
        .transpose()
    }

    async fn find_children(&self, parent_uuid: Uuid) -> PersistenceResult<Vec<Job>> {
        sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jf_jobs \
             WHERE parent_uuid = $1 AND deleted_at IS NULL ORDER BY created_at, job_uuid"
        ))
        .bind(parent_uuid)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(parse_job)
        .collect()
    }

    async fn find_outputs(&self, job_uuid: Uuid) -> PersistenceResult<Vec<JobOutput>> {
        sqlx::query(&format!(
            "SELECT {OUTPUT_COLUMNS} FROM jf_job_outputs WHERE job_uuid = $1 \
             ORDER BY created_at, output_uuid"
        ))
        .bind(job_uuid)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(parse_output)
        .collect()
    }

    async fn find_actions(&self, job_uuid: Uuid) -> PersistenceResult<Vec<NotificationAction>> {
        sqlx::query(
            r#"
            SELECT a.job_uuid, a.transition, a.notification_uuid, a.suppress_for_parent,
                   n.definition
            FROM jf_notification_actions a
            JOIN jf_notifications n ON n.notification_uuid = a.notification_uuid
            WHERE a.job_uuid = $1
            ORDER BY a.position
            "#,
        )
        .bind(job_uuid)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(parse_action)
        .collect()
    }
}
