//! # System Constants
//!
//! Names and formats shared between the job model, the dependency resolver
//! and notification dispatch.

/// Separator between relation names in a fully-qualified child name (`outer:inner:leaf`)
pub const CHILD_NAME_SEPARATOR: char = ':';

/// Prefix of the per-job websocket broadcast group (`Job-{pk}`)
pub const WEBSOCKET_GROUP_PREFIX: &str = "Job-";

/// Default capacity of each websocket group's broadcast channel
pub const DEFAULT_WEBSOCKET_CAPACITY: usize = 256;

/// Transition names used in notification templates and logs
pub mod transitions {
    pub const ACQUIRE: &str = "acquire";
    pub const RELEASE: &str = "release";
    pub const START: &str = "start";
    pub const FINISH: &str = "finish";
    pub const ERROR: &str = "error";
    pub const RESET: &str = "reset";
    pub const ABORT: &str = "abort";
}

/// Websocket group name for a job
pub fn websocket_group(job_uuid: uuid::Uuid) -> String {
    format!("{WEBSOCKET_GROUP_PREFIX}{job_uuid}")
}

/// Message propagated to a parent when one of its children errors
pub fn child_error_message(child_name: &str, error: &str) -> String {
    format!("Error in child job '{child_name}':\n{error}")
}
