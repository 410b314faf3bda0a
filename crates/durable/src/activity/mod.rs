//! Activity execution
//!
//! Activities are the side-effecting collaborator calls a workflow makes.
//! The [`ActivityInvoker`] wraps each call with a per-attempt timeout and
//! the configured retry policy, and reduces the outcome to a single
//! [`StepResult`](crate::workflow::StepResult) for durable recording.

mod context;
mod invoker;

pub use context::ActivityContext;
pub use invoker::{
    ActivityError, ActivityInvoker, ServiceResult, StepHandler, StepOptions, StepOverrides,
};
