//! # Notifications
//!
//! Notifications are immutable values identified by their content: two equal
//! notifications share one uuid (a v5 uuid over the canonical JSON form), so
//! persisting an existing notification is a no-op rather than a duplicate.
//!
//! A [`NotificationAction`] binds a notification to one transition of one job.
//! A [`NotificationOverride`] replaces or augments the default actions of a
//! descendant job; overrides are held by the root job, keyed by the
//! descendant's fully-qualified child name, and applied when that descendant
//! is created.

use crate::state_machine::events::JobTransition;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const NOTIFICATION_NAMESPACE: Uuid = Uuid::from_u128(0x6a0b_54f1_2c3e_4d8a_9f21_7be0_c4d3_1a55);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    /// Writes a formatted message to the print transport
    Print { message: String },
    /// Sends an email; `to` falls back to the job creator's address
    Email {
        subject: String,
        body: String,
        #[serde(default)]
        to: Option<Vec<String>>,
        #[serde(default)]
        cc: Vec<String>,
        #[serde(default)]
        bcc: Vec<String>,
    },
    /// Broadcasts the transition to the job's websocket group
    WebSocket,
}

impl Notification {
    pub fn print(message: impl Into<String>) -> Self {
        Self::Print {
            message: message.into(),
        }
    }

    pub fn email(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self::Email {
            subject: subject.into(),
            body: body.into(),
            to: None,
            cc: Vec::new(),
            bcc: Vec::new(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Print { .. } => "print",
            Self::Email { .. } => "email",
            Self::WebSocket => "web_socket",
        }
    }

    /// Content-derived identity
    pub fn notification_uuid(&self) -> Uuid {
        let canonical = serde_json::to_string(self).unwrap_or_else(|_| format!("{self:?}"));
        Uuid::new_v5(&NOTIFICATION_NAMESPACE, canonical.as_bytes())
    }
}

/// A notification to bind to a transition, as supplied in configuration and overrides
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSpec {
    pub transition: JobTransition,
    pub notification: Notification,
    #[serde(default)]
    pub suppress_for_parent: bool,
}

impl ActionSpec {
    pub fn new(transition: JobTransition, notification: Notification) -> Self {
        Self {
            transition,
            notification,
            suppress_for_parent: false,
        }
    }

    pub fn suppressed_for_parent(mut self) -> Self {
        self.suppress_for_parent = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub job_uuid: Uuid,
    pub transition: JobTransition,
    pub notification_uuid: Uuid,
    pub notification: Notification,
    pub suppress_for_parent: bool,
}

impl NotificationAction {
    pub fn from_spec(job_uuid: Uuid, spec: &ActionSpec) -> Self {
        Self {
            job_uuid,
            transition: spec.transition,
            notification_uuid: spec.notification.notification_uuid(),
            notification: spec.notification.clone(),
            suppress_for_parent: spec.suppress_for_parent,
        }
    }

    /// Suppressed only for child jobs whose action asks for it
    pub fn is_suppressed(&self, has_parent: bool) -> bool {
        has_parent && self.suppress_for_parent
    }

    /// Identity of the action: at most one row per (job, transition, notification)
    pub fn key(&self) -> (Uuid, JobTransition, Uuid) {
        (self.job_uuid, self.transition, self.notification_uuid)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NotificationOverride {
    /// Install the default actions before layering `actions` on top
    #[serde(default)]
    pub keep_defaults: bool,
    #[serde(default)]
    pub actions: Vec<ActionSpec>,
}

/// An override registered on a root job for one of its descendants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredOverride {
    pub root_uuid: Uuid,
    pub descendant_name: String,
    pub spec: NotificationOverride,
}
