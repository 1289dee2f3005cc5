//! # Notifications
//!
//! Rendering and delivery of the notifications bound to job transitions.
//!
//! - [`template`] - `{placeholder}` substitution
//! - [`transport`] - the [`NotificationTransport`] seam and stock transports
//! - [`broadcast`] - per-job websocket groups over tokio broadcast channels
//! - [`dispatcher`] - post-commit delivery of queued notifications

pub mod broadcast;
pub mod dispatcher;
pub mod template;
pub mod transport;

pub use broadcast::{GroupMessage, WebSocketHub};
pub use dispatcher::{
    DispatchError, NotificationContext, NotificationDispatcher, PendingNotification,
};
pub use template::{render, FormatError};
pub use transport::{
    CompositeTransport, EmailMessage, LoggingTransport, NotificationTransport, TransportError,
    TransportResult,
};
