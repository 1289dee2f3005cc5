//! Shared fixtures: an engine over the in-memory store, template builders and
//! a transport that records every delivery.

#![allow(dead_code)]

use async_trait::async_trait;
use jobflow_core::database::MemoryJobStore;
use jobflow_core::models::{
    ChildRelation, Dependency, InputSpec, InputValue, Job, JobTemplate, JobTemplateKind,
    MetaTemplate, ParameterSpec, Principal, ValueType, WorkableTemplate,
};
use jobflow_core::notifications::{
    EmailMessage, NotificationDispatcher, NotificationTransport, TransportResult,
};
use jobflow_core::state_machine::DefaultActions;
use jobflow_core::storage::MemoryBlobStore;
use jobflow_core::JobEngine;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Print(String),
    Email(EmailMessage),
    WebSocket { group: String, payload: Value },
}

#[derive(Debug, Default)]
pub struct RecordingTransport {
    deliveries: Mutex<Vec<Delivery>>,
}

impl RecordingTransport {
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().clone()
    }

    pub fn prints(&self) -> Vec<String> {
        self.deliveries
            .lock()
            .iter()
            .filter_map(|d| match d {
                Delivery::Print(text) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn emails(&self) -> Vec<EmailMessage> {
        self.deliveries
            .lock()
            .iter()
            .filter_map(|d| match d {
                Delivery::Email(email) => Some(email.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.deliveries.lock().clear();
    }
}

#[async_trait]
impl NotificationTransport for RecordingTransport {
    async fn send_print(&self, text: &str) -> TransportResult<()> {
        self.deliveries.lock().push(Delivery::Print(text.to_string()));
        Ok(())
    }

    async fn send_email(&self, email: &EmailMessage) -> TransportResult<()> {
        self.deliveries.lock().push(Delivery::Email(email.clone()));
        Ok(())
    }

    async fn broadcast_websocket(&self, group: &str, payload: &Value) -> TransportResult<()> {
        self.deliveries.lock().push(Delivery::WebSocket {
            group: group.to_string(),
            payload: payload.clone(),
        });
        Ok(())
    }
}

pub struct Harness {
    pub engine: JobEngine<MemoryJobStore>,
    pub transport: Arc<RecordingTransport>,
    pub blobs: Arc<MemoryBlobStore>,
    pub creator: Principal,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_defaults(DefaultActions::default()).await
    }

    pub async fn with_defaults(defaults: DefaultActions) -> Self {
        let transport = Arc::new(RecordingTransport::default());
        let blobs = Arc::new(MemoryBlobStore::new());
        let engine = JobEngine::bootstrap(
            MemoryJobStore::new(),
            blobs.clone(),
            NotificationDispatcher::new(transport.clone()),
            defaults,
        )
        .await
        .expect("engine bootstrap");

        Self {
            engine,
            transport,
            blobs,
            creator: Principal::new(Uuid::new_v4(), Some("owner@example.com".to_string())),
        }
    }

    pub async fn register(&self, template: JobTemplate) -> Arc<JobTemplate> {
        self.engine
            .register_template(template)
            .await
            .expect("template registration")
    }

    /// Registers `template` unless its `name==version` is already live
    pub async fn ensure(&self, template: JobTemplate) -> Arc<JobTemplate> {
        match self
            .engine
            .registry()
            .find(&template.name, &template.version)
        {
            Some(existing) => existing,
            None => self.register(template).await,
        }
    }

    pub async fn node(&self, name: &str) -> Uuid {
        self.engine
            .register_node(name)
            .await
            .expect("node registration")
            .node_uuid
    }

    pub async fn job(&self, job_uuid: Uuid) -> Job {
        self.engine.get_job(job_uuid).await.expect("job exists")
    }

    /// Child of `parent` created for relation `name`
    pub async fn child(&self, parent: Uuid, name: &str) -> Option<Job> {
        self.engine
            .get_children(parent)
            .await
            .expect("children")
            .into_iter()
            .find(|job| job.child_name.as_deref() == Some(name))
    }

    pub async fn acquire_and_start(&self, job_uuid: Uuid, node_uuid: Uuid) {
        self.engine.acquire(job_uuid, node_uuid).await.expect("acquire");
        self.engine.start(job_uuid, node_uuid).await.expect("start");
    }

    /// Runs a workable job to completion, producing an int output `y`
    pub async fn complete_with_output(&self, job_uuid: Uuid, node_uuid: Uuid, y: i64) {
        self.acquire_and_start(job_uuid, node_uuid).await;
        self.engine
            .add_output(
                job_uuid,
                "y",
                ValueType::data("int"),
                y.to_string().into_bytes(),
                &self.creator,
            )
            .await
            .expect("add output");
        self.engine.finish(job_uuid, node_uuid).await.expect("finish");
    }
}

pub fn int(value: i64) -> InputValue {
    InputValue::new(value, ValueType::data("int"))
}

pub fn int_input(name: &str) -> InputSpec {
    InputSpec {
        name: name.to_string(),
        types: BTreeSet::from([ValueType::data("int")]),
        options: Value::Null,
        help: String::new(),
    }
}

pub fn int_parameter(name: &str, default: Option<i64>, is_const: bool) -> ParameterSpec {
    ParameterSpec {
        name: name.to_string(),
        types: BTreeSet::from([ValueType::data("int")]),
        default: default.map(Value::from),
        default_type: default.map(|_| ValueType::data("int")),
        is_const,
        help: String::new(),
    }
}

pub fn workable(name: &str, inputs: Vec<InputSpec>, parameters: Vec<ParameterSpec>) -> JobTemplate {
    JobTemplate::new(
        name,
        "1.0",
        JobTemplateKind::Workable(WorkableTemplate {
            framework: "pytorch".to_string(),
            job_type: "train".to_string(),
            executor_class: "Trainer".to_string(),
            required_packages: Vec::new(),
            body: String::new(),
            inputs,
            parameters,
        }),
    )
}

pub fn meta(name: &str, children: &[(&str, Uuid)], dependencies: Vec<Dependency>) -> JobTemplate {
    JobTemplate::new(
        name,
        "1.0",
        JobTemplateKind::Meta(MetaTemplate {
            children: children
                .iter()
                .map(|(name, template_uuid)| ChildRelation {
                    name: name.to_string(),
                    template_uuid: *template_uuid,
                })
                .collect(),
            dependencies,
        }),
    )
}

/// `dependency`'s int output `output` feeds `dependent`'s input `input`
pub fn feeds(dependency: &str, output: &str, dependent: &str, input: &str) -> Dependency {
    Dependency {
        dependent: dependent.to_string(),
        dependency: dependency.to_string(),
        input_name: input.to_string(),
        output_name: output.to_string(),
        output_type: "int".to_string(),
    }
}

/// Template `A`: workable, one int input `x`
pub fn template_a() -> JobTemplate {
    workable("A", vec![int_input("x")], Vec::new())
}
