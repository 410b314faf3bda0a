//! Workflow execution engine
//!
//! The engine owns one control loop per live instance. Each iteration
//! folds pending signals into the state, asks the orchestrator for the
//! next decision, and acts on it: run steps, suspend on the approval
//! wait, or complete. Every transition is persisted before the loop
//! moves on.

mod scheduler;
mod slots;

pub use scheduler::{Engine, EngineConfig, EngineError, WorkflowHandle};
pub use slots::WorkerSlots;
