use crate::common::{int, template_a, Harness};
use jobflow_core::{CreateJobRequest, JobPhase, JobflowError};
use uuid::Uuid;

async fn created_job(harness: &Harness) -> Uuid {
    let template = harness.ensure(template_a()).await;
    harness
        .engine
        .create_job(
            CreateJobRequest::new(template.template_uuid, harness.creator.clone())
                .with_description("single job")
                .with_input("x", int(7)),
        )
        .await
        .unwrap()
        .job_uuid
}

#[tokio::test]
async fn test_full_lifecycle() {
    let harness = Harness::new().await;
    let job_uuid = created_job(&harness).await;
    let node = harness.node("gpu-01").await;

    assert_eq!(harness.job(job_uuid).await.phase(), JobPhase::Created);
    assert_eq!(harness.engine.acquire(job_uuid, node).await.unwrap(), JobPhase::Acquired);
    assert_eq!(harness.engine.start(job_uuid, node).await.unwrap(), JobPhase::Started);

    let running = harness.job(job_uuid).await;
    assert_eq!(running.node_uuid, Some(node));
    assert!(running.start_time.is_some());

    assert_eq!(harness.engine.finish(job_uuid, node).await.unwrap(), JobPhase::Finished);
    let finished = harness.job(job_uuid).await;
    assert!(finished.end_time.is_some());
    assert!(finished.error.is_none());
    assert!(finished.phase_is_consistent());

    // the node is free again
    let second = created_job(&harness).await;
    harness.acquire_and_start(second, node).await;
}

#[tokio::test]
async fn test_acquire_release_round_trip() {
    let harness = Harness::new().await;
    let job_uuid = created_job(&harness).await;
    let node = harness.node("gpu-01").await;
    let before = harness.job(job_uuid).await;

    harness.engine.acquire(job_uuid, node).await.unwrap();
    assert_eq!(harness.engine.release(job_uuid).await.unwrap(), JobPhase::Created);

    let after = harness.job(job_uuid).await;
    assert_eq!(after.node_uuid, None);
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_concurrent_acquire_has_one_winner() {
    let harness = Harness::new().await;
    let job_uuid = created_job(&harness).await;
    let first = harness.node("gpu-01").await;
    let second = harness.node("gpu-02").await;

    let (a, b) = tokio::join!(
        harness.engine.acquire(job_uuid, first),
        harness.engine.acquire(job_uuid, second)
    );

    let (winner, loser) = match (a, b) {
        (Ok(_), Err(error)) => (first, error),
        (Err(error), Ok(_)) => (second, error),
        other => panic!("expected exactly one successful acquire, got {other:?}"),
    };
    assert!(loser.is_conflict());
    assert!(matches!(loser, JobflowError::JobAcquired(_)));

    let job = harness.job(job_uuid).await;
    assert_eq!(job.phase(), JobPhase::Acquired);
    assert_eq!(job.node_uuid, Some(winner));
}

#[tokio::test]
async fn test_narrow_phase_errors() {
    let harness = Harness::new().await;
    let job_uuid = created_job(&harness).await;
    let node = harness.node("gpu-01").await;
    let other = harness.node("gpu-02").await;

    assert!(matches!(
        harness.engine.release(job_uuid).await,
        Err(JobflowError::JobNotAcquired(_))
    ));
    assert!(matches!(
        harness.engine.start(job_uuid, node).await,
        Err(JobflowError::JobNotAcquired(_))
    ));
    assert!(matches!(
        harness.engine.finish(job_uuid, node).await,
        Err(JobflowError::JobNotStarted(_))
    ));

    harness.engine.acquire(job_uuid, node).await.unwrap();
    assert!(matches!(
        harness.engine.start(job_uuid, other).await,
        Err(JobflowError::JobAcquired(_))
    ));

    harness.engine.start(job_uuid, node).await.unwrap();
    assert!(matches!(
        harness.engine.release(job_uuid).await,
        Err(JobflowError::JobStarted(_))
    ));

    harness.engine.finish(job_uuid, node).await.unwrap();
    assert!(matches!(
        harness.engine.acquire(job_uuid, node).await,
        Err(JobflowError::JobFinished(_))
    ));
    assert!(matches!(
        harness.engine.abort(job_uuid).await,
        Err(JobflowError::JobFinished(_))
    ));
}

#[tokio::test]
async fn test_node_works_one_job_at_a_time() {
    let harness = Harness::new().await;
    let first = created_job(&harness).await;
    let second = created_job(&harness).await;
    let node = harness.node("gpu-01").await;

    harness.engine.acquire(first, node).await.unwrap();
    harness.engine.acquire(second, node).await.unwrap();
    harness.engine.start(first, node).await.unwrap();

    assert!(matches!(
        harness.engine.start(second, node).await,
        Err(JobflowError::NodeAlreadyWorking(_))
    ));

    harness.engine.finish(first, node).await.unwrap();
    assert_eq!(harness.engine.start(second, node).await.unwrap(), JobPhase::Started);
}

#[tokio::test]
async fn test_finish_from_foreign_node_is_ignored() {
    let harness = Harness::new().await;
    let job_uuid = created_job(&harness).await;
    let node = harness.node("gpu-01").await;
    let stranger = harness.node("gpu-02").await;
    harness.acquire_and_start(job_uuid, node).await;

    assert_eq!(
        harness.engine.finish(job_uuid, stranger).await.unwrap(),
        JobPhase::Started
    );
    assert_eq!(
        harness
            .engine
            .finish_with_error(job_uuid, stranger, "late report")
            .await
            .unwrap(),
        JobPhase::Started
    );
    assert_eq!(harness.job(job_uuid).await.node_uuid, Some(node));
}

#[tokio::test]
async fn test_error_and_reset() {
    let harness = Harness::new().await;
    let job_uuid = created_job(&harness).await;
    let node = harness.node("gpu-01").await;
    harness.acquire_and_start(job_uuid, node).await;

    assert_eq!(
        harness
            .engine
            .finish_with_error(job_uuid, node, "out of memory")
            .await
            .unwrap(),
        JobPhase::Errored
    );
    let errored = harness.job(job_uuid).await;
    assert_eq!(errored.error.as_deref(), Some("out of memory"));
    assert!(matches!(
        harness.engine.acquire(job_uuid, node).await,
        Err(JobflowError::JobStarted(_))
    ));

    assert_eq!(harness.engine.reset(job_uuid).await.unwrap(), JobPhase::Acquired);
    let reset = harness.job(job_uuid).await;
    assert!(reset.error.is_none());
    assert!(reset.start_time.is_none());
    assert_eq!(reset.node_uuid, Some(node));

    // the holding node can run it again
    harness.engine.start(job_uuid, node).await.unwrap();
    harness.engine.finish(job_uuid, node).await.unwrap();
}

#[tokio::test]
async fn test_reset_requires_errored() {
    let harness = Harness::new().await;
    let job_uuid = created_job(&harness).await;
    assert!(matches!(
        harness.engine.reset(job_uuid).await,
        Err(JobflowError::IllegalPhaseTransition { .. })
    ));
}

#[tokio::test]
async fn test_abort_from_each_phase() {
    let harness = Harness::new().await;
    let node = harness.node("gpu-01").await;

    let created = created_job(&harness).await;
    assert_eq!(harness.engine.abort(created).await.unwrap(), JobPhase::Created);

    let acquired = created_job(&harness).await;
    harness.engine.acquire(acquired, node).await.unwrap();
    assert_eq!(harness.engine.abort(acquired).await.unwrap(), JobPhase::Created);
    assert_eq!(harness.job(acquired).await.node_uuid, None);

    let started = created_job(&harness).await;
    harness.acquire_and_start(started, node).await;
    assert_eq!(harness.engine.abort(started).await.unwrap(), JobPhase::Created);
    let aborted = harness.job(started).await;
    assert!(aborted.node_uuid.is_none());
    assert!(aborted.start_time.is_none());

    let errored = created_job(&harness).await;
    harness.acquire_and_start(errored, node).await;
    harness
        .engine
        .finish_with_error(errored, node, "boom")
        .await
        .unwrap();
    assert_eq!(harness.engine.abort(errored).await.unwrap(), JobPhase::Created);
    assert!(harness.job(errored).await.error.is_none());

    // aborting freed the node
    let next = created_job(&harness).await;
    harness.acquire_and_start(next, node).await;
}

#[tokio::test]
async fn test_unknown_job_and_node() {
    let harness = Harness::new().await;
    let job_uuid = created_job(&harness).await;

    assert!(matches!(
        harness.engine.acquire(Uuid::new_v4(), Uuid::new_v4()).await,
        Err(JobflowError::JobNotFound(_))
    ));
    assert!(matches!(
        harness.engine.acquire(job_uuid, Uuid::new_v4()).await,
        Err(JobflowError::NodeNotFound(_))
    ));
}
