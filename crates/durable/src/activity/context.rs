//! Activity execution context

use crate::workflow::WorkflowInputs;

/// Context provided to step handlers during execution
///
/// Carries the workflow inputs the collaborators need plus attempt
/// information, so a handler can tell whether the current call is its
/// last chance before the invoker gives up.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityContext {
    /// Workflow instance ID that owns this step
    pub instance_id: String,

    /// Name of the person who initiated the request
    pub initiator: String,

    /// Credit amount being requested
    pub amount: i64,

    /// Current attempt number (1-based)
    pub attempt: u32,

    /// Maximum attempts allowed
    pub max_attempts: u32,
}

impl ActivityContext {
    /// Create a context for the first attempt of a step
    pub fn new(instance_id: impl Into<String>, inputs: &WorkflowInputs) -> Self {
        Self {
            instance_id: instance_id.into(),
            initiator: inputs.initiator.clone(),
            amount: inputs.amount,
            attempt: 1,
            max_attempts: 1,
        }
    }

    /// Derive a context for a specific attempt under a retry budget
    pub fn for_attempt(&self, attempt: u32, max_attempts: u32) -> Self {
        Self {
            attempt,
            max_attempts,
            ..self.clone()
        }
    }

    /// Check if this is the last retry attempt
    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}
