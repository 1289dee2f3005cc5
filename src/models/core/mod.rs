pub mod job;
pub mod job_output;
pub mod job_template;
pub mod node;
pub mod notification;
pub mod value_type;
