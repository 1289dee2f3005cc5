//! # Registry Infrastructure
//!
//! The [`TemplateRegistry`] resolves job templates by uuid for the state
//! machine and by `(name, version)` for callers.

pub mod template_registry;

pub use template_registry::{RegistryStats, TemplateKey, TemplateRegistry};
