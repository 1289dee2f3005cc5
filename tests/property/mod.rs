//! Random transition sequences against one job tree. Whatever the order of
//! calls, and whether they succeed or not, the tree must stay consistent.

use crate::common::{feeds, int, meta, template_a};
use jobflow_core::models::{JobTemplate, Node, Principal, ValueType};
use jobflow_core::orchestration::job_initializer::{create_job, JobCreation};
use jobflow_core::registry::TemplateRegistry;
use jobflow_core::state_machine::{DefaultActions, JobGraph, JobPhase, JobStateMachine};
use jobflow_core::storage::BlobHandle;
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone)]
enum Op {
    Acquire(usize, usize),
    Release(usize),
    Start(usize, usize),
    Finish(usize, usize),
    Error(usize, usize),
    Reset(usize),
    Abort(usize),
    AddOutput(usize),
}

fn op() -> impl Strategy<Value = Op> {
    let job = 0..4usize;
    let node = 0..2usize;
    prop_oneof![
        3 => (job.clone(), node.clone()).prop_map(|(j, n)| Op::Acquire(j, n)),
        1 => job.clone().prop_map(Op::Release),
        3 => (job.clone(), node.clone()).prop_map(|(j, n)| Op::Start(j, n)),
        3 => (job.clone(), node.clone()).prop_map(|(j, n)| Op::Finish(j, n)),
        1 => (job.clone(), node).prop_map(|(j, n)| Op::Error(j, n)),
        1 => job.clone().prop_map(Op::Reset),
        1 => job.clone().prop_map(Op::Abort),
        3 => job.prop_map(Op::AddOutput),
    ]
}

struct Fixture {
    registry: TemplateRegistry,
    root_template: Arc<JobTemplate>,
    nodes: Vec<Node>,
    defaults: DefaultActions,
}

/// `M`: `a1 -> a2` plus an independent `b`
fn fixture() -> Fixture {
    let registry = TemplateRegistry::new();
    let a = registry.insert(template_a());
    let m = meta(
        "M",
        &[
            ("a1", a.template_uuid),
            ("a2", a.template_uuid),
            ("b", a.template_uuid),
        ],
        vec![feeds("a1", "y", "a2", "x")],
    );
    registry.validate(&m).unwrap();
    let root_template = registry.insert(m);

    Fixture {
        registry,
        root_template,
        nodes: vec![Node::new("gpu-01"), Node::new("gpu-02")],
        defaults: DefaultActions::default(),
    }
}

/// Jobs of the tree, root first, then children by relation name
fn ordered_jobs(graph: &JobGraph) -> Vec<Uuid> {
    let mut jobs: Vec<(String, Uuid)> = graph
        .jobs()
        .map(|job| (job.child_name.clone().unwrap_or_default(), job.job_uuid))
        .collect();
    jobs.sort();
    jobs.into_iter().map(|(_, uuid)| uuid).collect()
}

fn check_invariants(graph: &JobGraph, root: Uuid) -> Result<(), TestCaseError> {
    for job in graph.jobs() {
        prop_assert!(
            job.phase_is_consistent(),
            "job {:?} has phase {} but fields imply {}",
            job.child_name,
            job.phase(),
            job.derived_phase()
        );

        if job.is_meta {
            continue;
        }
        match job.phase() {
            JobPhase::Started => {
                let node_uuid = job.node_uuid.unwrap_or_default();
                let node = graph
                    .node(node_uuid)
                    .map_err(|e| TestCaseError::fail(e.to_string()))?;
                prop_assert_eq!(node.current_job, Some(job.job_uuid));
            }
            JobPhase::Finished => {}
            _ => {
                prop_assert!(graph.outputs(job.job_uuid).is_empty());
            }
        }
    }

    let children: Vec<_> = graph.children(root).collect();
    let names: BTreeSet<_> = children.iter().filter_map(|c| c.child_name.clone()).collect();
    prop_assert_eq!(names.len(), children.len(), "one job per child relation");

    let root_job = graph.job(root).map_err(|e| TestCaseError::fail(e.to_string()))?;
    if root_job.phase() == JobPhase::Finished {
        prop_assert_eq!(children.len(), 3);
        prop_assert!(children.iter().all(|c| c.phase() == JobPhase::Finished));
    }
    if children.iter().any(|c| c.phase() == JobPhase::Started) {
        prop_assert_ne!(root_job.phase(), JobPhase::Created);
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_random_transitions_keep_tree_consistent(ops in prop::collection::vec(op(), 1..60)) {
        let fixture = fixture();
        let creator = Principal::new(Uuid::new_v4(), None);
        let mut graph = JobGraph::new();
        graph.add_nodes(fixture.nodes.clone());

        let root = {
            let mut machine = JobStateMachine::new(&mut graph, &fixture.registry, &fixture.defaults);
            create_job(
                &mut machine,
                JobCreation {
                    template: Arc::clone(&fixture.root_template),
                    creator: creator.clone(),
                    description: "property".to_string(),
                    input_values: BTreeMap::from([
                        ("a1:x".to_string(), int(1)),
                        ("b:x".to_string(), int(2)),
                    ]),
                    parameter_values: BTreeMap::new(),
                    notification_override: None,
                    child_notification_overrides: BTreeMap::new(),
                },
            )
            .unwrap()
        };
        check_invariants(&graph, root)?;

        for op in ops {
            let jobs = ordered_jobs(&graph);
            let pick = |i: usize| jobs[i % jobs.len()];
            let node = |i: usize| fixture.nodes[i].node_uuid;

            let mut machine = JobStateMachine::new(&mut graph, &fixture.registry, &fixture.defaults);
            let _ = match op {
                Op::Acquire(j, n) => machine.acquire(pick(j), node(n)).map(|_| ()),
                Op::Release(j) => machine.release(pick(j)).map(|_| ()),
                Op::Start(j, n) => machine.start(pick(j), node(n)).map(|_| ()),
                Op::Finish(j, n) => machine.finish(pick(j), node(n)).map(|_| ()),
                Op::Error(j, n) => machine.finish_with_error(pick(j), node(n), "boom").map(|_| ()),
                Op::Reset(j) => machine.reset(pick(j)).map(|_| ()),
                Op::Abort(j) => machine.abort(pick(j)).map(|_| ()),
                Op::AddOutput(j) => machine
                    .add_output(
                        pick(j),
                        "y",
                        ValueType::data("int"),
                        BlobHandle::for_content(b"1"),
                        creator.user_uuid,
                    )
                    .map(|_| ()),
            };
            check_invariants(&graph, root)?;
        }
    }
}
