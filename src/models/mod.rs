pub mod core;

// Re-export core models for easy access
pub use self::core::job::{Job, NewJob, Principal};
pub use self::core::job_output::JobOutput;
pub use self::core::job_template::{
    ChildRelation, Dependency, InputSpec, JobTemplate, JobTemplateKind, MetaTemplate,
    ParameterSpec, TemplateLookup, WorkableTemplate,
};
pub use self::core::node::Node;
pub use self::core::notification::{
    ActionSpec, Notification, NotificationAction, NotificationOverride, StoredOverride,
};
pub use self::core::value_type::{InputValue, ValueType};
