//! # Orchestration
//!
//! The [`JobEngine`] facade plus the two pieces that create jobs: the job
//! initializer (root jobs and sub-jobs from templates) and the dependency
//! resolver (which child relations of a meta-job can be created now).
//!
//! ```text
//! JobEngine ── lock tree ──> JobGraph ──> JobStateMachine
//!                                           │
//!                          job_initializer <┴> DependencyResolver
//! ```

pub mod dependency_resolver;
pub mod engine;
pub mod job_initializer;

pub use dependency_resolver::{DependencyResolver, ResolutionOutcome};
pub use engine::{CreateJobRequest, JobEngine};
pub use job_initializer::JobCreation;
