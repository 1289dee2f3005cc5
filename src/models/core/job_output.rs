//! # Job Output
//!
//! Named, typed results attached to a job while it is running. The payload
//! itself lives in the blob store; the output only records its handle.

use super::value_type::ValueType;
use crate::storage::BlobHandle;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutput {
    pub output_uuid: Uuid,
    pub job_uuid: Uuid,
    pub name: String,
    pub value_type: ValueType,
    pub blob: BlobHandle,
    pub creator_uuid: Uuid,
    pub created_at: DateTime<Utc>,
}

impl JobOutput {
    pub fn new(
        job_uuid: Uuid,
        name: impl Into<String>,
        value_type: ValueType,
        blob: BlobHandle,
        creator_uuid: Uuid,
    ) -> Self {
        Self {
            output_uuid: Uuid::new_v4(),
            job_uuid,
            name: name.into(),
            value_type,
            blob,
            creator_uuid,
            created_at: Utc::now(),
        }
    }

    /// Whether this output matches a declared `(name, type)` pair
    pub fn matches(&self, name: &str, value_type: &ValueType) -> bool {
        self.name == name && &self.value_type == value_type
    }

    /// Copy of this output owned by `owner`, renamed `"{child_name}:{name}"`
    pub fn copied_to(&self, owner: Uuid, child_name: &str) -> Self {
        Self {
            output_uuid: Uuid::new_v4(),
            job_uuid: owner,
            name: super::job_template::qualified(child_name, &self.name),
            value_type: self.value_type.clone(),
            blob: self.blob.clone(),
            creator_uuid: self.creator_uuid,
            created_at: Utc::now(),
        }
    }
}
