//! Workflow state and types
//!
//! This module contains the durable data model:
//! - [`ExecutionState`]: the persisted record of one workflow instance
//! - [`StepName`]: identifiers for the workflow's steps
//! - [`Signal`]: external approval callbacks
//! - [`Outcome`]: the single terminal result of an instance

mod signal;
mod state;
mod step;

pub use signal::{ApprovalSource, Signal};
pub use state::{ApprovalStatus, ExecutionState, Outcome, StepResult, WorkflowInputs};
pub use step::StepName;
