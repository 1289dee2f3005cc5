use crate::common::{feeds, int, meta, template_a, Delivery, Harness};
use jobflow_core::constants::websocket_group;
use jobflow_core::database::MemoryJobStore;
use jobflow_core::models::{ActionSpec, Notification, NotificationOverride, Principal};
use jobflow_core::notifications::{NotificationDispatcher, WebSocketHub};
use jobflow_core::state_machine::{DefaultActions, JobTransition};
use jobflow_core::storage::MemoryBlobStore;
use jobflow_core::{CreateJobRequest, JobEngine, JobflowError};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

fn print_on(transition: JobTransition, message: &str) -> ActionSpec {
    ActionSpec::new(transition, Notification::print(message))
}

fn replacing(actions: Vec<ActionSpec>) -> NotificationOverride {
    NotificationOverride {
        keep_defaults: false,
        actions,
    }
}

async fn job_a(harness: &Harness, creator: Principal) -> Uuid {
    let template = harness.ensure(template_a()).await;
    harness
        .engine
        .create_job(
            CreateJobRequest::new(template.template_uuid, creator)
                .with_description("resnet")
                .with_input("x", int(1)),
        )
        .await
        .unwrap()
        .job_uuid
}

/// Registers `M` (`a1 -> a2`) and creates a root job from it
async fn pipeline_job(harness: &Harness, request: impl FnOnce(Uuid) -> CreateJobRequest) -> Uuid {
    let a = harness.ensure(template_a()).await;
    let m = harness
        .ensure(meta(
            "M",
            &[("a1", a.template_uuid), ("a2", a.template_uuid)],
            vec![feeds("a1", "y", "a2", "x")],
        ))
        .await;
    harness
        .engine
        .create_job(request(m.template_uuid).with_input("a1:x", int(1)))
        .await
        .unwrap()
        .job_uuid
}

#[tokio::test]
async fn test_default_print_is_rendered_after_commit() {
    let harness = Harness::with_defaults(DefaultActions {
        workable: vec![print_on(
            JobTransition::Finish,
            "{description} {pk} {transition} on {node}",
        )],
        meta: Vec::new(),
    })
    .await;
    let job_uuid = job_a(&harness, harness.creator.clone()).await;
    let node = harness.node("gpu-01").await;

    harness.acquire_and_start(job_uuid, node).await;
    assert!(harness.transport.deliveries().is_empty());

    harness.engine.finish(job_uuid, node).await.unwrap();
    assert_eq!(
        harness.transport.prints(),
        vec![format!("resnet {job_uuid} finish on gpu-01")]
    );

    // a rejected transition delivers nothing
    harness.transport.clear();
    assert!(harness.engine.finish(job_uuid, node).await.is_err());
    assert!(harness.transport.deliveries().is_empty());
}

#[tokio::test]
async fn test_unresolvable_placeholder_does_not_fail_the_transition() {
    let harness = Harness::with_defaults(DefaultActions {
        workable: vec![
            print_on(JobTransition::Start, "failed with {error}"),
            print_on(JobTransition::Start, "started {pk}"),
        ],
        meta: Vec::new(),
    })
    .await;
    let job_uuid = job_a(&harness, harness.creator.clone()).await;
    let node = harness.node("gpu-01").await;

    harness.acquire_and_start(job_uuid, node).await;
    assert_eq!(harness.transport.prints(), vec![format!("started {job_uuid}")]);
}

#[tokio::test]
async fn test_suppressed_actions_only_fire_for_roots() {
    let harness = Harness::with_defaults(DefaultActions {
        workable: vec![print_on(JobTransition::Start, "job {pk} started").suppressed_for_parent()],
        meta: vec![print_on(JobTransition::Start, "workflow {pk} started")],
    })
    .await;
    let node = harness.node("gpu-01").await;

    let root = pipeline_job(&harness, |m| CreateJobRequest::new(m, harness.creator.clone())).await;
    let a1 = harness.child(root, "a1").await.unwrap().job_uuid;
    harness.acquire_and_start(a1, node).await;
    assert_eq!(
        harness.transport.prints(),
        vec![format!("workflow {root} started")]
    );

    harness.engine.finish(a1, node).await.unwrap();
    harness.transport.clear();
    let standalone = job_a(&harness, harness.creator.clone()).await;
    let other = harness.node("gpu-02").await;
    harness.acquire_and_start(standalone, other).await;
    assert_eq!(
        harness.transport.prints(),
        vec![format!("job {standalone} started")]
    );
}

#[tokio::test]
async fn test_child_overrides_from_create_request() {
    let harness = Harness::with_defaults(DefaultActions {
        workable: vec![ActionSpec::new(JobTransition::Finish, Notification::WebSocket)],
        meta: Vec::new(),
    })
    .await;
    let node = harness.node("gpu-01").await;

    let root = pipeline_job(&harness, |m| {
        CreateJobRequest::new(m, harness.creator.clone())
            .with_child_override(
                "a1",
                replacing(vec![print_on(JobTransition::Finish, "a1 finished")]),
            )
            .with_child_override(
                "a2",
                NotificationOverride {
                    keep_defaults: true,
                    actions: vec![print_on(JobTransition::Start, "a2 {transition}")],
                },
            )
    })
    .await;

    let a1 = harness.child(root, "a1").await.unwrap().job_uuid;
    harness.complete_with_output(a1, node, 5).await;
    assert_eq!(
        harness.transport.deliveries(),
        vec![Delivery::Print("a1 finished".to_string())]
    );

    // a2 is created later and still picks up its override
    harness.transport.clear();
    let a2 = harness.child(root, "a2").await.unwrap().job_uuid;
    harness.complete_with_output(a2, node, 6).await;
    let deliveries = harness.transport.deliveries();
    assert_eq!(deliveries[0], Delivery::Print("a2 start".to_string()));
    assert!(matches!(
        &deliveries[1],
        Delivery::WebSocket { group, payload }
            if *group == websocket_group(a2) && payload["transition"] == "finish"
    ));
    assert_eq!(deliveries.len(), 2);
}

#[tokio::test]
async fn test_override_names_are_validated() {
    let harness = Harness::new().await;
    let a = harness.ensure(template_a()).await;
    let m = harness
        .ensure(meta("M", &[("a1", a.template_uuid)], Vec::new()))
        .await;

    for name in ["nope", "a1:deeper", ""] {
        let result = harness
            .engine
            .create_job(
                CreateJobRequest::new(m.template_uuid, harness.creator.clone())
                    .with_input("a1:x", int(1))
                    .with_child_override(name, NotificationOverride::default()),
            )
            .await;
        assert!(
            matches!(result, Err(JobflowError::BadDescendantName(_))),
            "{name}: {result:?}"
        );
    }

    let workable = harness
        .engine
        .create_job(
            CreateJobRequest::new(a.template_uuid, harness.creator.clone())
                .with_input("x", int(1))
                .with_child_override("a1", NotificationOverride::default()),
        )
        .await;
    assert!(matches!(
        workable,
        Err(JobflowError::ChildNotificationOverridesForWorkableJob(_))
    ));
}

#[tokio::test]
async fn test_attach_overrides_after_creation() {
    let harness = Harness::new().await;
    let node = harness.node("gpu-01").await;
    let root = pipeline_job(&harness, |m| CreateJobRequest::new(m, harness.creator.clone())).await;

    harness
        .engine
        .attach_notification_overrides(
            root,
            BTreeMap::from([(
                "a2".to_string(),
                replacing(vec![print_on(JobTransition::Finish, "a2 done")]),
            )]),
        )
        .await
        .unwrap();

    let a1 = harness.child(root, "a1").await.unwrap().job_uuid;
    harness.complete_with_output(a1, node, 1).await;
    let a2 = harness.child(root, "a2").await.unwrap().job_uuid;
    harness.complete_with_output(a2, node, 2).await;
    assert_eq!(harness.transport.prints(), vec!["a2 done".to_string()]);

    assert!(matches!(
        harness
            .engine
            .attach_notification_overrides(
                root,
                BTreeMap::from([("missing".to_string(), NotificationOverride::default())]),
            )
            .await,
        Err(JobflowError::BadDescendantName(_))
    ));
}

#[tokio::test]
async fn test_attach_overrides_requires_root_meta_job() {
    let harness = Harness::new().await;
    let a = harness.ensure(template_a()).await;
    let inner = harness
        .ensure(meta("Inner", &[("leaf", a.template_uuid)], Vec::new()))
        .await;
    let outer = harness
        .ensure(meta("Outer", &[("inner", inner.template_uuid)], Vec::new()))
        .await;
    let root = harness
        .engine
        .create_job(
            CreateJobRequest::new(outer.template_uuid, harness.creator.clone())
                .with_input("inner:leaf:x", int(1)),
        )
        .await
        .unwrap()
        .job_uuid;
    let inner_job = harness.child(root, "inner").await.unwrap().job_uuid;
    let leaf = harness.child(inner_job, "leaf").await.unwrap().job_uuid;
    let overrides = || BTreeMap::from([("leaf".to_string(), NotificationOverride::default())]);

    assert!(matches!(
        harness.engine.attach_notification_overrides(inner_job, overrides()).await,
        Err(JobflowError::NotRootJob(_))
    ));
    assert!(matches!(
        harness.engine.attach_notification_overrides(leaf, overrides()).await,
        Err(JobflowError::ChildNotificationOverridesForWorkableJob(_))
    ));
    harness
        .engine
        .attach_notification_overrides(leaf, BTreeMap::new())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_attach_notifications_is_idempotent() {
    let harness = Harness::new().await;
    let job_uuid = job_a(&harness, harness.creator.clone()).await;
    let node = harness.node("gpu-01").await;
    let actions = vec![
        print_on(JobTransition::Acquire, "acquired {pk} by {node}"),
        print_on(JobTransition::Start, "started"),
    ];

    assert_eq!(harness.engine.attach_notifications(job_uuid, &actions).await.unwrap(), 2);
    assert_eq!(harness.engine.attach_notifications(job_uuid, &actions).await.unwrap(), 0);

    let bound = harness.engine.get_actions(job_uuid).await.unwrap();
    let attached: Vec<_> = bound
        .iter()
        .filter(|action| actions.iter().any(|spec| spec.notification == action.notification))
        .map(|action| action.transition)
        .collect();
    assert_eq!(attached, vec![JobTransition::Acquire, JobTransition::Start]);

    harness.acquire_and_start(job_uuid, node).await;
    assert_eq!(
        harness.transport.prints(),
        vec![format!("acquired {job_uuid} by gpu-01"), "started".to_string()]
    );
}

#[tokio::test]
async fn test_email_recipients() {
    let harness = Harness::with_defaults(DefaultActions {
        workable: vec![ActionSpec::new(
            JobTransition::Error,
            Notification::email("Job {pk} failed", "{error}"),
        )],
        meta: Vec::new(),
    })
    .await;
    let node = harness.node("gpu-01").await;

    let owned = job_a(&harness, harness.creator.clone()).await;
    harness.acquire_and_start(owned, node).await;
    harness.engine.finish_with_error(owned, node, "oom").await.unwrap();
    let emails = harness.transport.emails();
    assert_eq!(emails.len(), 1);
    assert_eq!(emails[0].to, vec!["owner@example.com".to_string()]);
    assert_eq!(emails[0].subject, format!("Job {owned} failed"));
    assert_eq!(emails[0].body, "oom");

    // no address to fall back to: the email is dropped, the transition still succeeds
    harness.transport.clear();
    let anonymous = job_a(&harness, Principal::new(Uuid::new_v4(), None)).await;
    harness.acquire_and_start(anonymous, node).await;
    assert_eq!(
        harness
            .engine
            .finish_with_error(anonymous, node, "oom")
            .await
            .unwrap(),
        jobflow_core::JobPhase::Errored
    );
    assert!(harness.transport.emails().is_empty());
}

#[tokio::test]
async fn test_websocket_hub_receives_transitions() {
    let hub = WebSocketHub::new(16);
    let engine = JobEngine::bootstrap(
        MemoryJobStore::new(),
        Arc::new(MemoryBlobStore::new()),
        NotificationDispatcher::new(Arc::new(hub.clone())),
        DefaultActions {
            workable: vec![
                ActionSpec::new(JobTransition::Start, Notification::WebSocket),
                ActionSpec::new(JobTransition::Finish, Notification::WebSocket),
            ],
            meta: Vec::new(),
        },
    )
    .await
    .unwrap();
    let template = engine.register_template(template_a()).await.unwrap();
    let node = engine.register_node("gpu-01").await.unwrap().node_uuid;
    let job_uuid = engine
        .create_job(
            CreateJobRequest::new(template.template_uuid, Principal::new(Uuid::new_v4(), None))
                .with_description("hub")
                .with_input("x", int(1)),
        )
        .await
        .unwrap()
        .job_uuid;

    let mut rx = hub.subscribe(&websocket_group(job_uuid));
    engine.acquire(job_uuid, node).await.unwrap();
    engine.start(job_uuid, node).await.unwrap();
    engine.finish(job_uuid, node).await.unwrap();

    let started = rx.recv().await.unwrap();
    assert_eq!(started.payload["transition"], "start");
    assert_eq!(started.payload["node"], "gpu-01");
    assert_eq!(started.payload["description"], "hub");
    assert_eq!(started.payload["pk"], job_uuid.to_string());
    assert_eq!(rx.recv().await.unwrap().payload["transition"], "finish");
    assert!(rx.try_recv().is_err());
}
