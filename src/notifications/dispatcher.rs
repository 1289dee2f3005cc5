//! # Notification Dispatch
//!
//! Transitions never talk to transports directly. The state machine queues a
//! [`PendingNotification`] for every non-suppressed action bound to the
//! transition, and the engine hands the queue to [`NotificationDispatcher`]
//! once the transaction that produced it has committed.
//!
//! Delivery is best effort. Rendering and transport failures are logged and
//! dropped; they never reach the caller of the transition.

use super::template::{render, FormatError};
use super::transport::{EmailMessage, NotificationTransport, TransportError};
use crate::constants::websocket_group;
use crate::models::Notification;
use crate::state_machine::events::JobTransition;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// Values available to notification templates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationContext {
    pub job_uuid: Uuid,
    pub description: String,
    pub transition: JobTransition,
    /// Name of the node involved, for node transitions
    pub node: Option<String>,
    /// Error text, for the error transition
    pub error: Option<String>,
    pub creator_email: Option<String>,
}

impl NotificationContext {
    /// Resolves a template placeholder. `{node}` and `{error}` only resolve
    /// when the transition carries them.
    pub fn lookup(&self, key: &str) -> Option<String> {
        match key {
            "pk" => Some(self.job_uuid.to_string()),
            "description" => Some(self.description.clone()),
            "transition" => Some(self.transition.to_string()),
            "node" => self.node.clone(),
            "error" => self.error.clone(),
            _ => None,
        }
    }
}

/// A notification queued by a transition, waiting for commit
#[derive(Debug, Clone, PartialEq)]
pub struct PendingNotification {
    pub notification: Notification,
    pub context: NotificationContext,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Failed to render notification: {0}")]
    Format(#[from] FormatError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    transport: Arc<dyn NotificationTransport>,
}

impl std::fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationDispatcher").finish_non_exhaustive()
    }
}

impl NotificationDispatcher {
    pub fn new(transport: Arc<dyn NotificationTransport>) -> Self {
        Self { transport }
    }

    /// Delivers every queued notification in order, logging failures
    pub async fn dispatch_all(&self, pending: Vec<PendingNotification>) {
        for item in pending {
            if let Err(error) = self.dispatch(&item).await {
                warn!(
                    job_uuid = %item.context.job_uuid,
                    transition = %item.context.transition,
                    kind = item.notification.kind(),
                    error = %error,
                    "notification delivery failed"
                );
            }
        }
    }

    /// Renders and delivers one notification
    pub async fn dispatch(&self, pending: &PendingNotification) -> Result<(), DispatchError> {
        let context = &pending.context;
        let lookup = |key: &str| context.lookup(key);

        match &pending.notification {
            Notification::Print { message } => {
                let text = render(message, lookup)?;
                self.transport.send_print(&text).await?;
            }
            Notification::Email {
                subject,
                body,
                to,
                cc,
                bcc,
            } => {
                let to = match to {
                    Some(to) if !to.is_empty() => to.clone(),
                    _ => context.creator_email.iter().cloned().collect(),
                };
                if to.is_empty() {
                    return Err(TransportError::NoRecipients.into());
                }
                let email = EmailMessage {
                    subject: render(subject, lookup)?,
                    body: render(body, lookup)?,
                    to,
                    cc: cc.clone(),
                    bcc: bcc.clone(),
                };
                self.transport.send_email(&email).await?;
            }
            Notification::WebSocket => {
                let payload = json!({
                    "pk": context.job_uuid,
                    "description": context.description,
                    "transition": context.transition,
                    "node": context.node,
                    "error": context.error,
                });
                self.transport
                    .broadcast_websocket(&websocket_group(context.job_uuid), &payload)
                    .await?;
            }
        }

        debug!(
            job_uuid = %context.job_uuid,
            transition = %context.transition,
            kind = pending.notification.kind(),
            "notification delivered"
        );
        Ok(())
    }
}
