//! # Persistence
//!
//! Job, template and node storage behind the [`JobStore`] trait.
//!
//! - [`store`] - the store and transaction traits, snapshots and change sets
//! - [`memory`] - in-process store used by tests and embedded deployments
//! - [`postgres`] - sqlx-backed PostgreSQL store with embedded migrations

pub mod error;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod store;

pub use error::{PersistenceError, PersistenceResult};
pub use memory::{MemoryJobStore, MemoryTransaction};
#[cfg(feature = "postgres")]
pub use postgres::{PgJobStore, PgTransaction, MIGRATOR};
pub use store::{ChangeSet, JobStore, StoreTransaction, TreeSnapshot};
