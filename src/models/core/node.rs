use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A worker node. It may hold several acquired jobs but works on at most one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub node_uuid: Uuid,
    pub name: String,
    pub current_job: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            node_uuid: Uuid::new_v4(),
            name: name.into(),
            current_job: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_working_job(&self) -> bool {
        self.current_job.is_some()
    }
}
