#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Jobflow Core
//!
//! Passive lifecycle engine for machine-learning jobs.
//!
//! ## Overview
//!
//! Jobs are instantiated from versioned templates. A *workable* job is run by
//! one worker node; a *meta* job is a workflow whose child relations are
//! created as their dependencies finish, with outputs of finished children
//! feeding the inputs of later ones. The engine never runs anything itself:
//! nodes drive workable jobs through `acquire`, `start`, `finish` or
//! `finish_with_error`, and meta-jobs follow their children.
//!
//! ## Module Organization
//!
//! - [`models`] - Templates, jobs, outputs, nodes and notifications
//! - [`state_machine`] - Phase derivation, guards and transitions
//! - [`orchestration`] - The [`JobEngine`] facade, job initializer and dependency resolver
//! - [`registry`] - Template registry
//! - [`database`] - Store abstraction with Postgres and in-memory backends
//! - [`storage`] - Content-addressed blob store for output payloads
//! - [`notifications`] - Templates, dispatch and transports
//! - [`config`] - Configuration management
//! - [`logging`] - Structured logging setup
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use jobflow_core::config::ConfigManager;
//! use jobflow_core::database::MemoryJobStore;
//! use jobflow_core::notifications::{LoggingTransport, NotificationDispatcher};
//! use jobflow_core::storage::MemoryBlobStore;
//! use jobflow_core::JobEngine;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigManager::load()?;
//! jobflow_core::logging::init_logging(&config.config().logging);
//!
//! let engine = JobEngine::bootstrap(
//!     MemoryJobStore::new(),
//!     Arc::new(MemoryBlobStore::new()),
//!     NotificationDispatcher::new(Arc::new(LoggingTransport)),
//!     config.config().default_actions(),
//! )
//! .await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod database;
pub mod error;
pub mod logging;
pub mod models;
pub mod notifications;
pub mod orchestration;
pub mod registry;
pub mod state_machine;
pub mod storage;

pub use config::{ConfigManager, ConfigurationError, JobflowConfig};
pub use error::{JobflowError, JobflowResult};
pub use orchestration::{CreateJobRequest, JobEngine};
pub use registry::TemplateRegistry;
pub use state_machine::{JobPhase, JobTransition};
