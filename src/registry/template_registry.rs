//! # Template Registry
//!
//! In-memory index of job templates, hydrated from the store at startup and
//! kept current as templates are registered and retired.
//!
//! Templates are immutable, so the registry hands out `Arc<JobTemplate>`
//! and never clones a definition. Retired templates stay resolvable by uuid
//! because existing jobs still refer to them; only the `(name, version)`
//! index forgets them.

use crate::error::{JobflowError, JobflowResult};
use crate::models::{JobTemplate, TemplateLookup};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Key for `(name, version)` lookup
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TemplateKey {
    pub name: String,
    pub version: String,
}

impl TemplateKey {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl std::fmt::Display for TemplateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}=={}", self.name, self.version)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryStats {
    pub total_templates: usize,
    pub live_templates: usize,
    pub meta_templates: usize,
}

#[derive(Debug, Default)]
pub struct TemplateRegistry {
    by_uuid: DashMap<Uuid, Arc<JobTemplate>>,
    live: DashMap<TemplateKey, Uuid>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from stored templates, retired ones included
    pub fn hydrate(templates: impl IntoIterator<Item = JobTemplate>) -> Self {
        let registry = Self::new();
        for template in templates {
            registry.insert(template);
        }
        info!(templates = registry.by_uuid.len(), "template registry hydrated");
        registry
    }

    /// Checks a new template against the registered ones: structure, child
    /// references and `(name, version)` uniqueness
    pub fn validate(&self, template: &JobTemplate) -> JobflowResult<()> {
        if self.by_uuid.contains_key(&template.template_uuid) {
            return Err(JobflowError::invalid_template(
                template.identifier(),
                format!("uuid {} is already registered", template.template_uuid),
            ));
        }
        let key = TemplateKey::new(&template.name, &template.version);
        if self.live.contains_key(&key) {
            return Err(JobflowError::invalid_template(
                template.identifier(),
                "a live template with this name and version exists",
            ));
        }
        template.validate(self)
    }

    /// Adds a template that has already been validated and stored
    pub fn insert(&self, template: JobTemplate) -> Arc<JobTemplate> {
        let template = Arc::new(template);
        if !template.is_deleted() {
            self.live.insert(
                TemplateKey::new(&template.name, &template.version),
                template.template_uuid,
            );
        }
        self.by_uuid
            .insert(template.template_uuid, Arc::clone(&template));
        debug!(template = %template.identifier(), "template registered");
        template
    }

    /// Marks a template retired. Returns the retired template, or `None` when
    /// it is unknown or already retired.
    pub fn retire(&self, template_uuid: Uuid, deleted_at: DateTime<Utc>) -> Option<Arc<JobTemplate>> {
        let current = self.get(template_uuid)?;
        if current.is_deleted() {
            return None;
        }
        let mut retired = (*current).clone();
        retired.deleted_at = Some(deleted_at);
        let retired = Arc::new(retired);

        self.live
            .remove(&TemplateKey::new(&retired.name, &retired.version));
        self.by_uuid.insert(template_uuid, Arc::clone(&retired));
        info!(template = %retired.identifier(), "template retired");
        Some(retired)
    }

    pub fn get(&self, template_uuid: Uuid) -> Option<Arc<JobTemplate>> {
        self.by_uuid
            .get(&template_uuid)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Live template by name and version
    pub fn find(&self, name: &str, version: &str) -> Option<Arc<JobTemplate>> {
        let uuid = *self.live.get(&TemplateKey::new(name, version))?;
        self.get(uuid)
    }

    /// Live templates, sorted by name then version
    pub fn live_templates(&self) -> Vec<Arc<JobTemplate>> {
        let mut templates: Vec<_> = self
            .by_uuid
            .iter()
            .filter(|entry| !entry.value().is_deleted())
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        templates.sort_by(|a, b| (&a.name, &a.version).cmp(&(&b.name, &b.version)));
        templates
    }

    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats {
            total_templates: 0,
            live_templates: 0,
            meta_templates: 0,
        };
        for entry in self.by_uuid.iter() {
            stats.total_templates += 1;
            if !entry.value().is_deleted() {
                stats.live_templates += 1;
            }
            if entry.value().is_meta() {
                stats.meta_templates += 1;
            }
        }
        stats
    }
}

impl TemplateLookup for TemplateRegistry {
    fn template(&self, template_uuid: Uuid) -> Option<Arc<JobTemplate>> {
        self.get(template_uuid)
    }
}
