//! Application layer: the recommendation workflow state machine.

pub mod workflow;

pub use workflow::{RecommendationWorkflow, WorkflowDeps, WorkflowState, WorkflowStep};
