// Job lifecycle state machine
//
// Phases are derived from job fields; transitions run guards first, then
// mutate the locked job graph and queue notification actions.

pub mod actions;
pub mod events;
pub mod graph;
pub mod guards;
pub mod job_state_machine;
pub mod meta_state_machine;
pub mod states;
pub mod workable_state_machine;

// Re-export main types for convenient access
pub use actions::{DefaultActions, TransitionAction, TransitionEvent};
pub use events::JobTransition;
pub use graph::JobGraph;
pub use guards::TransitionGuard;
pub use job_state_machine::JobStateMachine;
pub use states::JobPhase;
