//! # Job Template
//!
//! Versioned, immutable job definitions. A template is either *workable* (a
//! leaf executed by one worker node) or *meta* (a workflow of named child
//! relations wired together by dependency edges).
//!
//! ## Derived inputs
//!
//! Meta-templates do not declare inputs of their own. Their inputs are every
//! input of every child relation that is not fed by a dependency edge, named
//! `"{relation}:{input}"`. Nested meta children contribute their own derived
//! inputs, so a grandchild input surfaces as `"outer:inner:input"`. Parameters
//! are derived the same way.

use super::value_type::{InputValue, ValueType};
use crate::constants::CHILD_NAME_SEPARATOR;
use crate::error::{JobflowError, JobflowResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

/// Resolves child template references
pub trait TemplateLookup {
    fn template(&self, template_uuid: Uuid) -> Option<Arc<JobTemplate>>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSpec {
    pub name: String,
    pub types: BTreeSet<ValueType>,
    #[serde(default)]
    pub options: Value,
    #[serde(default)]
    pub help: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    pub types: BTreeSet<ValueType>,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub default_type: Option<ValueType>,
    #[serde(default, rename = "const")]
    pub is_const: bool,
    #[serde(default)]
    pub help: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkableTemplate {
    pub framework: String,
    pub job_type: String,
    pub executor_class: String,
    #[serde(default)]
    pub required_packages: Vec<String>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub inputs: Vec<InputSpec>,
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
}

/// A named edge from a meta-template to one of its direct child templates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildRelation {
    pub name: String,
    pub template_uuid: Uuid,
}

/// `dependency`'s output `(output_name, output_type)` feeds `dependent`'s input `input_name`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub dependent: String,
    pub dependency: String,
    pub input_name: String,
    pub output_name: String,
    pub output_type: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MetaTemplate {
    pub children: Vec<ChildRelation>,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
}

impl MetaTemplate {
    pub fn child(&self, name: &str) -> Option<&ChildRelation> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Names of the relations `relation` depends on
    pub fn dependency_names(&self, relation: &str) -> BTreeSet<&str> {
        self.dependencies
            .iter()
            .filter(|d| d.dependent == relation)
            .map(|d| d.dependency.as_str())
            .collect()
    }

    /// The edge feeding `relation`'s input `input_name`, if any
    pub fn edge_for_input(&self, relation: &str, input_name: &str) -> Option<&Dependency> {
        self.dependencies
            .iter()
            .find(|d| d.dependent == relation && d.input_name == input_name)
    }

    fn validate_structure(&self) -> Result<(), String> {
        if self.children.is_empty() {
            return Err("meta-template declares no children".to_string());
        }

        let mut names = HashSet::new();
        for child in &self.children {
            validate_name(&child.name)?;
            if !names.insert(child.name.as_str()) {
                return Err(format!("duplicate child relation '{}'", child.name));
            }
        }

        let mut fed_inputs = HashSet::new();
        for dep in &self.dependencies {
            for relation in [&dep.dependent, &dep.dependency] {
                if !names.contains(relation.as_str()) {
                    return Err(format!("dependency references unknown child '{relation}'"));
                }
            }
            if dep.dependent == dep.dependency {
                return Err(format!("child '{}' depends on itself", dep.dependent));
            }
            if !fed_inputs.insert((dep.dependent.as_str(), dep.input_name.as_str())) {
                return Err(format!(
                    "input '{}' of child '{}' is fed by more than one dependency",
                    dep.input_name, dep.dependent
                ));
            }
            dep.output_type
                .parse::<ValueType>()
                .ok()
                .filter(|t| !t.is_job_output())
                .ok_or_else(|| format!("invalid output type '{}'", dep.output_type))?;
        }

        self.check_acyclic()
    }

    fn check_acyclic(&self) -> Result<(), String> {
        // Kahn's algorithm over relation names
        let mut in_degree: HashMap<&str, usize> =
            self.children.iter().map(|c| (c.name.as_str(), 0)).collect();
        let mut edges: HashSet<(&str, &str)> = HashSet::new();
        for dep in &self.dependencies {
            if edges.insert((dep.dependency.as_str(), dep.dependent.as_str())) {
                *in_degree.entry(dep.dependent.as_str()).or_default() += 1;
            }
        }

        let mut ready: Vec<&str> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(n, _)| *n)
            .collect();
        let mut visited = 0;
        while let Some(name) = ready.pop() {
            visited += 1;
            for (_, to) in edges.iter().filter(|(from, _)| *from == name) {
                if let Some(d) = in_degree.get_mut(to) {
                    *d -= 1;
                    if *d == 0 {
                        ready.push(*to);
                    }
                }
            }
        }

        if visited == self.children.len() {
            Ok(())
        } else {
            Err("dependency graph contains a cycle".to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobTemplateKind {
    Workable(WorkableTemplate),
    Meta(MetaTemplate),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobTemplate {
    pub template_uuid: Uuid,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub licence: String,
    #[serde(default)]
    pub data_domain: Option<String>,
    #[serde(flatten)]
    pub kind: JobTemplateKind,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl JobTemplate {
    pub fn new(name: impl Into<String>, version: impl Into<String>, kind: JobTemplateKind) -> Self {
        Self {
            template_uuid: Uuid::new_v4(),
            name: name.into(),
            version: version.into(),
            description: String::new(),
            scope: String::new(),
            licence: String::new(),
            data_domain: None,
            kind,
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn is_meta(&self) -> bool {
        matches!(self.kind, JobTemplateKind::Meta(_))
    }

    pub fn as_meta(&self) -> Option<&MetaTemplate> {
        match &self.kind {
            JobTemplateKind::Meta(meta) => Some(meta),
            JobTemplateKind::Workable(_) => None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// `name==version`, used in logs and error messages
    pub fn identifier(&self) -> String {
        format!("{}=={}", self.name, self.version)
    }

    /// Declared inputs, or derived inputs for meta-templates
    pub fn inputs(&self, lookup: &dyn TemplateLookup) -> JobflowResult<Vec<InputSpec>> {
        match &self.kind {
            JobTemplateKind::Workable(workable) => Ok(workable.inputs.clone()),
            JobTemplateKind::Meta(meta) => {
                let mut derived = Vec::new();
                for relation in &meta.children {
                    let child = self.child_template(lookup, relation)?;
                    for input in child.inputs(lookup)? {
                        if meta.edge_for_input(&relation.name, &input.name).is_none() {
                            derived.push(InputSpec {
                                name: qualified(&relation.name, &input.name),
                                ..input
                            });
                        }
                    }
                }
                Ok(derived)
            }
        }
    }

    /// Declared parameters, or derived parameters for meta-templates
    pub fn parameters(&self, lookup: &dyn TemplateLookup) -> JobflowResult<Vec<ParameterSpec>> {
        match &self.kind {
            JobTemplateKind::Workable(workable) => Ok(workable.parameters.clone()),
            JobTemplateKind::Meta(meta) => {
                let mut derived = Vec::new();
                for relation in &meta.children {
                    let child = self.child_template(lookup, relation)?;
                    for parameter in child.parameters(lookup)? {
                        derived.push(ParameterSpec {
                            name: qualified(&relation.name, &parameter.name),
                            ..parameter
                        });
                    }
                }
                Ok(derived)
            }
        }
    }

    /// Requires a correctly typed value for every input and drops everything else
    pub fn check_input_values(
        &self,
        lookup: &dyn TemplateLookup,
        input_values: &BTreeMap<String, InputValue>,
    ) -> JobflowResult<BTreeMap<String, InputValue>> {
        let mut checked = BTreeMap::new();
        for input in self.inputs(lookup)? {
            let value = input_values.get(&input.name).ok_or_else(|| {
                JobflowError::InvalidJobInput(format!(
                    "missing value for input '{}' of {}",
                    input.name,
                    self.identifier()
                ))
            })?;
            if !input.types.contains(&value.value_type) {
                return Err(JobflowError::InvalidJobInput(format!(
                    "input '{}' of {} does not accept type '{}'",
                    input.name,
                    self.identifier(),
                    value.value_type
                )));
            }
            checked.insert(input.name, value.clone());
        }
        Ok(checked)
    }

    /// Fills defaults, pins const parameters and drops unknown entries
    pub fn check_parameter_values(
        &self,
        lookup: &dyn TemplateLookup,
        parameter_values: &BTreeMap<String, Value>,
    ) -> JobflowResult<BTreeMap<String, Value>> {
        let mut checked = BTreeMap::new();
        for parameter in self.parameters(lookup)? {
            let supplied = parameter_values
                .get(&parameter.name)
                .filter(|_| !parameter.is_const);
            let value = supplied
                .or(parameter.default.as_ref())
                .cloned()
                .ok_or_else(|| {
                    JobflowError::InvalidJobInput(format!(
                        "missing value for parameter '{}' of {}",
                        parameter.name,
                        self.identifier()
                    ))
                })?;
            checked.insert(parameter.name, value);
        }
        Ok(checked)
    }

    /// Walks a `:`-separated path of child relation names
    pub fn get_descendant(
        &self,
        lookup: &dyn TemplateLookup,
        path: &str,
    ) -> JobflowResult<Arc<JobTemplate>> {
        let bad_name = || JobflowError::BadDescendantName(path.to_string());
        let mut current: Option<Arc<JobTemplate>> = None;

        for segment in path.split(CHILD_NAME_SEPARATOR) {
            let template = current.as_deref().unwrap_or(self);
            let meta = template.as_meta().ok_or_else(bad_name)?;
            let relation = meta.child(segment).ok_or_else(bad_name)?;
            current = Some(lookup.template(relation.template_uuid).ok_or_else(bad_name)?);
        }

        current.ok_or_else(bad_name)
    }

    /// Structural validation performed when a template is registered
    pub fn validate(&self, lookup: &dyn TemplateLookup) -> JobflowResult<()> {
        let invalid = |reason: String| JobflowError::invalid_template(self.identifier(), reason);

        if self.name.trim().is_empty() || self.version.trim().is_empty() {
            return Err(invalid("name and version are required".to_string()));
        }

        match &self.kind {
            JobTemplateKind::Workable(workable) => {
                let mut names = HashSet::new();
                for input in &workable.inputs {
                    validate_name(&input.name).map_err(invalid)?;
                    if !names.insert(input.name.as_str()) {
                        return Err(invalid(format!("duplicate input '{}'", input.name)));
                    }
                    if input.types.is_empty() {
                        return Err(invalid(format!("input '{}' allows no types", input.name)));
                    }
                }
                let mut names = HashSet::new();
                for parameter in &workable.parameters {
                    validate_name(&parameter.name).map_err(invalid)?;
                    if !names.insert(parameter.name.as_str()) {
                        return Err(invalid(format!("duplicate parameter '{}'", parameter.name)));
                    }
                    if parameter.is_const && parameter.default.is_none() {
                        return Err(invalid(format!(
                            "const parameter '{}' has no default",
                            parameter.name
                        )));
                    }
                    if let Some(default_type) = &parameter.default_type {
                        if !parameter.types.contains(default_type) {
                            return Err(invalid(format!(
                                "default type '{default_type}' of parameter '{}' is not allowed",
                                parameter.name
                            )));
                        }
                    }
                }
                Ok(())
            }
            JobTemplateKind::Meta(meta) => {
                meta.validate_structure().map_err(invalid)?;
                for relation in &meta.children {
                    let child = self.child_template(lookup, relation)?;
                    let child_inputs = child.inputs(lookup)?;
                    for dep in meta.dependencies.iter().filter(|d| d.dependent == relation.name) {
                        if !child_inputs.iter().any(|i| i.name == dep.input_name) {
                            return Err(invalid(format!(
                                "child '{}' has no input '{}'",
                                relation.name, dep.input_name
                            )));
                        }
                    }
                }
                Ok(())
            }
        }
    }

    fn child_template(
        &self,
        lookup: &dyn TemplateLookup,
        relation: &ChildRelation,
    ) -> JobflowResult<Arc<JobTemplate>> {
        lookup.template(relation.template_uuid).ok_or_else(|| {
            JobflowError::TemplateNotFound(format!(
                "{} (child '{}' of {})",
                relation.template_uuid,
                relation.name,
                self.identifier()
            ))
        })
    }
}

pub(crate) fn qualified(prefix: &str, name: &str) -> String {
    format!("{prefix}{CHILD_NAME_SEPARATOR}{name}")
}

fn validate_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("empty name".to_string());
    }
    if name.contains(CHILD_NAME_SEPARATOR) {
        return Err(format!("name '{name}' must not contain '{CHILD_NAME_SEPARATOR}'"));
    }
    Ok(())
}
