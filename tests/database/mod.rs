//! PostgreSQL store tests. Each test gets a fresh database with the embedded
//! migrations applied.

#![cfg(feature = "postgres")]

use crate::common::{feeds, int, meta, template_a};
use jobflow_core::database::{
    ChangeSet, JobStore, PersistenceError, PgJobStore, StoreTransaction, TreeSnapshot,
};
use jobflow_core::models::{
    ActionSpec, Job, JobOutput, Notification, NotificationOverride, Principal, ValueType,
};
use jobflow_core::notifications::{LoggingTransport, NotificationDispatcher};
use jobflow_core::state_machine::DefaultActions;
use jobflow_core::storage::{BlobHandle, MemoryBlobStore};
use jobflow_core::{CreateJobRequest, JobEngine, JobPhase, JobTransition, JobflowError};
use sqlx::PgPool;
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

async fn engine(pool: PgPool) -> JobEngine<PgJobStore> {
    JobEngine::bootstrap(
        PgJobStore::new(pool),
        Arc::new(MemoryBlobStore::new()),
        NotificationDispatcher::new(Arc::new(LoggingTransport)),
        DefaultActions::default(),
    )
    .await
    .expect("engine bootstrap")
}

fn creator() -> Principal {
    Principal::new(Uuid::new_v4(), Some("owner@example.com".to_string()))
}

/// Root of a fresh `a1 -> a2` pipeline
async fn pipeline(engine: &JobEngine<PgJobStore>, request: impl FnOnce(Uuid) -> CreateJobRequest) -> Uuid {
    let a = match engine.registry().find("A", "1.0") {
        Some(existing) => existing,
        None => engine.register_template(template_a()).await.unwrap(),
    };
    let m = match engine.registry().find("M", "1.0") {
        Some(existing) => existing,
        None => engine
            .register_template(meta(
                "M",
                &[("a1", a.template_uuid), ("a2", a.template_uuid)],
                vec![feeds("a1", "y", "a2", "x")],
            ))
            .await
            .unwrap(),
    };
    engine
        .create_job(request(m.template_uuid))
        .await
        .unwrap()
        .job_uuid
}

async fn child(engine: &JobEngine<PgJobStore>, parent: Uuid, name: &str) -> Uuid {
    engine
        .get_children(parent)
        .await
        .unwrap()
        .into_iter()
        .find(|job| job.child_name.as_deref() == Some(name))
        .expect("child exists")
        .job_uuid
}

#[sqlx::test(migrator = "jobflow_core::database::MIGRATOR")]
async fn test_tree_snapshot_round_trip(pool: PgPool) -> sqlx::Result<()> {
    let engine = engine(pool).await;
    let owner = creator();
    let root = pipeline(&engine, |m| {
        CreateJobRequest::new(m, owner.clone())
            .with_description("nightly")
            .with_input("a1:x", int(1))
            .with_child_override(
                "a2",
                NotificationOverride {
                    keep_defaults: true,
                    actions: vec![ActionSpec::new(
                        JobTransition::Finish,
                        Notification::print("a2 done"),
                    )],
                },
            )
    })
    .await;
    let a1 = child(&engine, root, "a1").await;
    let node = engine.register_node("gpu-01").await.unwrap().node_uuid;

    engine
        .attach_notifications(
            a1,
            &[ActionSpec::new(JobTransition::Start, Notification::print("a1 started on {node}"))],
        )
        .await
        .unwrap();
    engine.acquire(a1, node).await.unwrap();
    engine.start(a1, node).await.unwrap();
    let output = engine
        .add_output(a1, "y", ValueType::data("int"), b"1".to_vec(), &owner)
        .await
        .unwrap();

    let mut tx = engine.store().begin().await.unwrap();
    let snapshot = tx.lock_tree(a1, &[node]).await.unwrap().expect("tree exists");
    tx.commit().await.unwrap();

    let uuids: BTreeSet<Uuid> = snapshot.jobs.iter().map(|job| job.job_uuid).collect();
    assert_eq!(uuids, BTreeSet::from([root, a1]));

    let stored = snapshot.jobs.iter().find(|job| job.job_uuid == a1).unwrap();
    let stored_root = snapshot.jobs.iter().find(|job| job.job_uuid == root).unwrap();
    assert_eq!(stored.phase(), JobPhase::Started);
    assert!(stored.phase_is_consistent());
    assert_eq!(stored.root_uuid, root);
    assert_eq!(stored.parent_uuid, Some(root));
    assert_eq!(stored.child_name.as_deref(), Some("a1"));
    assert_eq!(stored.description, "nightly");
    assert_eq!(stored.node_uuid, Some(node));
    assert_eq!(stored.input_values.get("x"), Some(&int(1)));
    assert!(stored_root.is_root());
    assert_eq!(stored_root.phase(), JobPhase::Started);

    assert_eq!(snapshot.nodes.len(), 1);
    assert_eq!(snapshot.nodes[0].current_job, Some(a1));

    assert_eq!(snapshot.outputs.len(), 1);
    assert_eq!(snapshot.outputs[0].output_uuid, output.output_uuid);
    assert_eq!(snapshot.outputs[0].blob, output.blob);
    assert!(snapshot.outputs[0].matches("y", &ValueType::data("int")));

    assert!(snapshot.actions.iter().any(|action| action.job_uuid == a1
        && action.transition == JobTransition::Start
        && action.notification == Notification::print("a1 started on {node}")));

    assert_eq!(snapshot.overrides.len(), 1);
    assert_eq!(snapshot.overrides[0].descendant_name, "a2");
    assert!(snapshot.overrides[0].spec.keep_defaults);
    Ok(())
}

#[sqlx::test(migrator = "jobflow_core::database::MIGRATOR")]
async fn test_dropped_transaction_rolls_back(pool: PgPool) -> sqlx::Result<()> {
    let engine = engine(pool).await;
    let owner = creator();
    let root = pipeline(&engine, |m| {
        CreateJobRequest::new(m, owner.clone())
            .with_description("before")
            .with_input("a1:x", int(1))
    })
    .await;

    let rename = |description: &str, snapshot: &TreeSnapshot| {
        let mut job: Job = snapshot
            .jobs
            .iter()
            .find(|job| job.job_uuid == root)
            .cloned()
            .expect("root in snapshot");
        job.description = description.to_string();
        ChangeSet {
            jobs: vec![job],
            ..ChangeSet::default()
        }
    };

    {
        let mut tx = engine.store().begin().await.unwrap();
        let snapshot = tx.lock_tree(root, &[]).await.unwrap().unwrap();
        tx.apply(&rename("dropped", &snapshot)).await.unwrap();
    }
    assert_eq!(engine.get_job(root).await.unwrap().description, "before");

    let mut tx = engine.store().begin().await.unwrap();
    let snapshot = tx.lock_tree(root, &[]).await.unwrap().unwrap();
    tx.apply(&rename("committed", &snapshot)).await.unwrap();
    tx.commit().await.unwrap();
    assert_eq!(engine.get_job(root).await.unwrap().description, "committed");
    Ok(())
}

#[sqlx::test(migrator = "jobflow_core::database::MIGRATOR")]
async fn test_duplicate_output_slot_is_rejected(pool: PgPool) -> sqlx::Result<()> {
    let engine = engine(pool).await;
    let owner = creator();
    let a = engine.register_template(template_a()).await.unwrap();
    let job_uuid = engine
        .create_job(CreateJobRequest::new(a.template_uuid, owner.clone()).with_input("x", int(1)))
        .await
        .unwrap()
        .job_uuid;
    let node = engine.register_node("gpu-01").await.unwrap().node_uuid;
    engine.acquire(job_uuid, node).await.unwrap();
    engine.start(job_uuid, node).await.unwrap();
    engine
        .add_output(job_uuid, "y", ValueType::data("int"), b"1".to_vec(), &owner)
        .await
        .unwrap();

    // the guard catches the duplicate before it reaches the database
    assert!(matches!(
        engine
            .add_output(job_uuid, "y", ValueType::data("int"), b"2".to_vec(), &owner)
            .await,
        Err(JobflowError::BadName(_))
    ));

    // and the unique constraint catches a write that bypasses the guard
    let mut tx = engine.store().begin().await.unwrap();
    tx.lock_tree(job_uuid, &[]).await.unwrap().unwrap();
    let duplicate = ChangeSet {
        inserted_outputs: vec![JobOutput::new(
            job_uuid,
            "y",
            ValueType::data("int"),
            BlobHandle::for_content(b"3"),
            owner.user_uuid,
        )],
        ..ChangeSet::default()
    };
    assert!(matches!(
        tx.apply(&duplicate).await,
        Err(PersistenceError::ConstraintViolation { .. })
    ));
    drop(tx);

    assert_eq!(engine.get_outputs(job_uuid).await.unwrap().len(), 1);
    Ok(())
}

#[sqlx::test(migrator = "jobflow_core::database::MIGRATOR")]
async fn test_concurrent_acquire_has_one_winner(pool: PgPool) -> sqlx::Result<()> {
    let engine = Arc::new(engine(pool).await);
    let a = engine.register_template(template_a()).await.unwrap();
    let job_uuid = engine
        .create_job(CreateJobRequest::new(a.template_uuid, creator()).with_input("x", int(1)))
        .await
        .unwrap()
        .job_uuid;
    let first = engine.register_node("gpu-01").await.unwrap().node_uuid;
    let second = engine.register_node("gpu-02").await.unwrap().node_uuid;

    let (left, right) = tokio::join!(
        {
            let engine = Arc::clone(&engine);
            async move { engine.acquire(job_uuid, first).await }
        },
        {
            let engine = Arc::clone(&engine);
            async move { engine.acquire(job_uuid, second).await }
        }
    );

    let results = [left, right];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(
        results
            .iter()
            .filter(|r| matches!(r, Err(JobflowError::JobAcquired(_))))
            .count(),
        1
    );

    let job = engine.get_job(job_uuid).await.unwrap();
    assert_eq!(job.phase(), JobPhase::Acquired);
    assert!(job.node_uuid == Some(first) || job.node_uuid == Some(second));
    Ok(())
}

#[sqlx::test(migrator = "jobflow_core::database::MIGRATOR")]
async fn test_templates_survive_restart(pool: PgPool) -> sqlx::Result<()> {
    let first = engine(pool.clone()).await;
    let a = first.register_template(template_a()).await.unwrap();
    let retired = first
        .register_template(meta("Old", &[("a1", a.template_uuid)], Vec::new()))
        .await
        .unwrap();
    first.retire_template(retired.template_uuid).await.unwrap();

    let restarted = engine(pool).await;
    assert_eq!(
        restarted.registry().find("A", "1.0").map(|t| t.template_uuid),
        Some(a.template_uuid)
    );
    assert!(restarted.registry().find("Old", "1.0").is_none());
    assert!(restarted.registry().get(retired.template_uuid).is_some());

    assert!(matches!(
        restarted.register_template(template_a()).await,
        Err(JobflowError::InvalidTemplate { .. })
    ));
    Ok(())
}
