//! Delivery backends for rendered notifications.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub subject: String,
    pub body: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("{transport} delivery failed: {reason}")]
    Delivery { transport: &'static str, reason: String },

    #[error("Email has no recipients")]
    NoRecipients,
}

pub type TransportResult<T> = Result<T, TransportError>;

#[async_trait]
pub trait NotificationTransport: Send + Sync {
    async fn send_print(&self, text: &str) -> TransportResult<()>;

    async fn send_email(&self, email: &EmailMessage) -> TransportResult<()>;

    async fn broadcast_websocket(&self, group: &str, payload: &Value) -> TransportResult<()>;
}

/// Writes every notification to the tracing subscriber
#[derive(Debug, Default, Clone)]
pub struct LoggingTransport;

#[async_trait]
impl NotificationTransport for LoggingTransport {
    async fn send_print(&self, text: &str) -> TransportResult<()> {
        tracing::info!(target: "jobflow::notifications", "{text}");
        Ok(())
    }

    async fn send_email(&self, email: &EmailMessage) -> TransportResult<()> {
        tracing::info!(
            target: "jobflow::notifications",
            subject = %email.subject,
            to = ?email.to,
            cc = ?email.cc,
            bcc_count = email.bcc.len(),
            "email notification"
        );
        Ok(())
    }

    async fn broadcast_websocket(&self, group: &str, payload: &Value) -> TransportResult<()> {
        tracing::debug!(
            target: "jobflow::notifications",
            group = %group,
            payload = %payload,
            "websocket notification"
        );
        Ok(())
    }
}

/// Fans each delivery out to several transports. Every transport is tried;
/// the first failure is returned after all have run.
#[derive(Clone, Default)]
pub struct CompositeTransport {
    transports: Vec<Arc<dyn NotificationTransport>>,
}

impl CompositeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, transport: Arc<dyn NotificationTransport>) -> Self {
        self.transports.push(transport);
        self
    }
}

fn first_error(results: Vec<TransportResult<()>>) -> TransportResult<()> {
    results.into_iter().find(Result::is_err).unwrap_or(Ok(()))
}

#[async_trait]
impl NotificationTransport for CompositeTransport {
    async fn send_print(&self, text: &str) -> TransportResult<()> {
        let sends = self.transports.iter().map(|t| t.send_print(text));
        first_error(futures::future::join_all(sends).await)
    }

    async fn send_email(&self, email: &EmailMessage) -> TransportResult<()> {
        let sends = self.transports.iter().map(|t| t.send_email(email));
        first_error(futures::future::join_all(sends).await)
    }

    async fn broadcast_websocket(&self, group: &str, payload: &Value) -> TransportResult<()> {
        let sends = self
            .transports
            .iter()
            .map(|t| t.broadcast_websocket(group, payload));
        first_error(futures::future::join_all(sends).await)
    }
}
